//! Envelope routing.
//!
//! The [`Router`] decides, for one envelope, whether it is delivered
//! locally, posted on a registered channel (directly or through a relay),
//! or handed to the host bridge.
//!
//! # Delivery
//!
//! Channel delivery to one tab makes at most two posting attempts:
//!
//! 1. Look up the channel, dialing it if missing and the route allows
//!    (at most one dial per tab).
//! 2. Post. A stale channel is unregistered and the decision retried
//!    once; the second failure is a [`Error::DeliveryFailed`].

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::{BridgeFrame, ChannelName, Envelope, Location};
use crate::transport::{ConnectTarget, HostBridge, Port, TabQuery, Transport};

use super::registry::{ChannelKey, PortRegistry};
use super::routing::{Dial, Route, RoutingTable, Scope};

// ============================================================================
// Constants
// ============================================================================

/// Posting attempts per tab before giving up.
const MAX_ATTEMPTS: usize = 2;

// ============================================================================
// Types
// ============================================================================

/// Caller-supplied routing hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteHint {
    /// Tab the destination lives in.
    pub tab_id: Option<TabId>,
    /// Without a tab, deliver to every active tab instead of the first
    /// that accepts.
    pub broadcast_to_all_tabs: bool,
}

impl RouteHint {
    /// No hint.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self {
            tab_id: None,
            broadcast_to_all_tabs: false,
        }
    }

    /// Deliver to `tab_id`.
    #[inline]
    #[must_use]
    pub const fn tab(tab_id: TabId) -> Self {
        Self {
            tab_id: Some(tab_id),
            broadcast_to_all_tabs: false,
        }
    }

    /// Deliver to `tab_id` if given, otherwise to every active tab.
    #[inline]
    #[must_use]
    pub const fn tab_or_all(tab_id: Option<TabId>) -> Self {
        Self {
            tab_id,
            broadcast_to_all_tabs: tab_id.is_none(),
        }
    }
}

impl From<Option<TabId>> for RouteHint {
    fn from(tab_id: Option<TabId>) -> Self {
        Self {
            tab_id,
            broadcast_to_all_tabs: false,
        }
    }
}

/// Outcome of a successful [`Router::route`].
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// The envelope is addressed to this endpoint.
    Local(Envelope),
    /// Posted on this many channels.
    Channel(usize),
    /// Handed to the host bridge.
    Bridge,
}

// ============================================================================
// Router
// ============================================================================

/// Routes envelopes leaving one endpoint.
pub struct Router {
    location: Location,
    own_tab: Option<TabId>,
    table: RoutingTable,
    registry: Arc<PortRegistry>,
    transport: Option<Arc<dyn Transport>>,
    tabs: Option<Arc<dyn TabQuery>>,
    bridge: Option<Arc<dyn HostBridge>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("location", &self.location)
            .field("own_tab", &self.own_tab)
            .field("table", &self.table)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Router {
    /// Creates a router. Collaborators are checked by the builder.
    #[must_use]
    pub fn new(
        location: Location,
        own_tab: Option<TabId>,
        table: RoutingTable,
        registry: Arc<PortRegistry>,
        transport: Option<Arc<dyn Transport>>,
        tabs: Option<Arc<dyn TabQuery>>,
        bridge: Option<Arc<dyn HostBridge>>,
    ) -> Self {
        Self {
            location,
            own_tab,
            table,
            registry,
            transport,
            tabs,
            bridge,
        }
    }

    /// Returns the location this router routes from.
    #[inline]
    #[must_use]
    pub fn location(&self) -> Location {
        self.location
    }

    /// Returns the routing table.
    #[inline]
    #[must_use]
    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Returns the registry channels are looked up in.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<PortRegistry> {
        &self.registry
    }

    /// Returns the name this endpoint gives channels it opens.
    #[must_use]
    pub fn channel_name(&self) -> ChannelName {
        match self.own_tab {
            Some(tab_id) => ChannelName::for_tab(self.location, tab_id),
            None => ChannelName::new(self.location),
        }
    }

    /// Routes one envelope.
    ///
    /// The payload is never modified; a missing `orig_tab_id` is filled
    /// in with the tab a per-tab channel belongs to. Transport failures
    /// surface as [`Error::DeliveryFailed`].
    ///
    /// # Errors
    ///
    /// - [`Error::Unroutable`] if the table has no route
    /// - [`Error::DeliveryFailed`] if no channel or bridge accepted it
    /// - [`Error::Config`] if an active-tab lookup is needed but no
    ///   [`TabQuery`] was configured
    pub async fn route(&self, envelope: Envelope, hint: RouteHint) -> Result<Routed> {
        let dest = envelope.dest_location;
        if dest == self.location {
            return Ok(Routed::Local(envelope));
        }

        let route = self
            .table
            .route(dest)
            .ok_or_else(|| Error::unroutable(self.location, dest))?;

        match route {
            Route::Bridge => {
                self.send_to_bridge(&envelope, hint.tab_id.or(envelope.orig_tab_id))?;
                Ok(Routed::Bridge)
            }
            Route::Direct { .. } | Route::Relay(_) => match (self.table.scope(), hint.tab_id) {
                (Scope::Single, _) => {
                    self.deliver(None, &envelope).await?;
                    Ok(Routed::Channel(1))
                }
                (Scope::PerTab, Some(tab_id)) => {
                    self.deliver(Some(tab_id), &envelope).await?;
                    Ok(Routed::Channel(1))
                }
                (Scope::PerTab, None) => {
                    self.deliver_to_active_tabs(&envelope, hint.broadcast_to_all_tabs)
                        .await
                }
            },
        }
    }

    /// Packs `envelope` and hands it to the host bridge.
    fn send_to_bridge(&self, envelope: &Envelope, tab_id: Option<TabId>) -> Result<()> {
        let dest = envelope.dest_location;
        let bridge = self
            .bridge
            .as_ref()
            .ok_or_else(|| Error::delivery_failed(dest, "no host bridge"))?;

        let frame = BridgeFrame::new(tab_id, envelope)?;
        bridge
            .send(frame)
            .map_err(|e| Error::delivery_failed(dest, e.to_string()))?;

        trace!(from = %self.location, to = %dest, ?tab_id, "Envelope sent over bridge");
        Ok(())
    }

    /// Delivers to the active tabs of the active window.
    async fn deliver_to_active_tabs(&self, envelope: &Envelope, broadcast: bool) -> Result<Routed> {
        let dest = envelope.dest_location;
        let tabs = self.tabs.as_ref().ok_or_else(|| {
            Error::config(format!("routing to {dest} without a tab needs a tab query"))
        })?;

        let window = tabs
            .active_window()
            .await
            .map_err(|e| Error::delivery_failed(dest, e.to_string()))?;
        let active = tabs
            .active_tabs(window.id)
            .await
            .map_err(|e| Error::delivery_failed(dest, e.to_string()))?;

        let mut delivered = 0usize;
        let mut last_error = None;

        for tab in active {
            match self.deliver(Some(tab.id), envelope).await {
                Ok(()) => {
                    delivered += 1;
                    if !broadcast {
                        break;
                    }
                }
                Err(e) => {
                    debug!(to = %dest, tab_id = %tab.id, error = %e, "Tab did not accept envelope");
                    last_error = Some(e);
                }
            }
        }

        if delivered > 0 {
            return Ok(Routed::Channel(delivered));
        }
        Err(last_error.unwrap_or_else(|| Error::delivery_failed(dest, "no active tab")))
    }

    /// Posts on the channel for `(tab_id, dest)`, dialing once and
    /// retrying once on a stale channel.
    ///
    /// An envelope without an originating tab is stamped with `tab_id`.
    async fn deliver(&self, tab_id: Option<TabId>, envelope: &Envelope) -> Result<()> {
        let stamped;
        let envelope = match (envelope.orig_tab_id, tab_id) {
            (None, Some(tab_id)) => {
                stamped = envelope.clone().with_orig_tab(tab_id);
                &stamped
            }
            _ => envelope,
        };
        let dest = envelope.dest_location;
        let key = self.registry.channel_key(tab_id, dest);
        let mut dialed = false;

        for attempt in 1..=MAX_ATTEMPTS {
            let port = match self.registry.find(key) {
                Some(port) => port,
                None if !dialed => {
                    dialed = true;
                    self.dial(key)
                        .await
                        .map_err(|e| Error::delivery_failed(dest, e.to_string()))?
                }
                None => break,
            };

            match port.post_message(envelope) {
                Ok(()) => {
                    trace!(from = %self.location, to = %dest, %key, attempt, "Envelope posted");
                    return Ok(());
                }
                Err(e) if e.is_stale_channel() => {
                    debug!(%key, port_id = %port.id(), attempt, "Stale channel, unregistering");
                    self.registry.release(key, &port);
                }
                Err(e) => return Err(Error::delivery_failed(dest, e.to_string())),
            }
        }

        warn!(from = %self.location, to = %dest, %key, "Delivery failed after retry");
        Err(Error::delivery_failed(dest, format!("no live channel to {key}")))
    }

    /// Opens and registers the direct channel for `key`.
    async fn dial(&self, key: ChannelKey) -> Result<Arc<dyn Port>> {
        let target = match (self.table.dial_for(key.location), key.tab_id) {
            (Some(Dial::Runtime), _) => ConnectTarget::Runtime,
            (Some(Dial::Tab), Some(tab_id)) => ConnectTarget::Tab(tab_id),
            (Some(Dial::Tab), None) => {
                return Err(Error::config(format!("dialing {} needs a tab", key.location)));
            }
            (None, _) => {
                return Err(Error::connection(format!("no channel registered for {key}")));
            }
        };
        let transport = self
            .transport
            .as_ref()
            .ok_or_else(|| Error::config("no transport"))?;

        debug!(%key, %target, "Opening channel on demand");
        let port = transport.connect(target, &self.channel_name()).await?;
        self.registry.register(key, Arc::clone(&port));
        Ok(port)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::Ordering;

    use rustc_hash::FxHashMap;
    use serde_json::json;

    use crate::bus::testing::{MockPort, MockTransport};
    use crate::identifiers::WindowId;
    use crate::transport::{MemoryBridge, MemoryTabs};

    fn tab(id: u32) -> TabId {
        TabId::new(id).unwrap()
    }

    fn background(
        transport: Arc<MockTransport>,
        tabs: Option<Arc<MemoryTabs>>,
    ) -> (Router, Arc<PortRegistry>) {
        let table = RoutingTable::for_location(Location::BackgroundScript);
        let registry = Arc::new(PortRegistry::new(table.relays(), Arc::new(|_| {})));
        let router = Router::new(
            Location::BackgroundScript,
            None,
            table,
            Arc::clone(&registry),
            Some(transport as Arc<dyn Transport>),
            tabs.map(|t| t as Arc<dyn TabQuery>),
            None,
        );
        (router, registry)
    }

    fn to_content(payload: serde_json::Value) -> Envelope {
        Envelope::notify(Location::BackgroundScript, Location::ContentScript, payload)
    }

    #[tokio::test]
    async fn test_local_destination_is_returned() {
        let (router, _) = background(MockTransport::new(), None);
        let envelope = Envelope::notify(Location::Core, Location::BackgroundScript, json!(1));
        let routed = router.route(envelope.clone(), RouteHint::none()).await.unwrap();
        assert_eq!(routed, Routed::Local(envelope));
    }

    #[tokio::test]
    async fn test_posts_on_registered_channel() {
        let transport = MockTransport::new();
        let (router, registry) = background(Arc::clone(&transport), None);
        let port = MockPort::new("ContentScript");
        registry.register(ChannelKey::new(Some(tab(7)), Location::ContentScript), port.clone());

        let envelope = to_content(json!({"ping": true}));
        router.route(envelope.clone(), RouteHint::tab(tab(7))).await.unwrap();

        assert_eq!(port.posted.lock().as_slice(), &[envelope.with_orig_tab(tab(7))]);
        assert_eq!(transport.dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_relay_uses_content_channel() {
        let (router, registry) = background(MockTransport::new(), None);
        let port = MockPort::new("ContentScript");
        registry.register(ChannelKey::new(Some(tab(3)), Location::ContentScript), port.clone());

        let envelope = Envelope::notify(Location::BackgroundScript, Location::Core, json!("x"));
        router.route(envelope.clone(), RouteHint::tab(tab(3))).await.unwrap();
        assert_eq!(port.posted.lock()[0].dest_location, Location::Core);
        assert_eq!(port.posted.lock()[0].payload, json!("x"));
    }

    #[tokio::test]
    async fn test_dials_missing_channel_once() {
        let transport = MockTransport::new();
        let (router, registry) = background(Arc::clone(&transport), None);
        let dialed = MockPort::new("BackgroundScript");
        transport.will_return(dialed.clone());

        router
            .route(to_content(json!(1)), RouteHint::tab(tab(7)))
            .await
            .unwrap();

        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);
        assert_eq!(
            transport.dialed.lock()[0],
            (ConnectTarget::Tab(tab(7)), "BackgroundScript".to_string())
        );
        assert_eq!(dialed.posted.lock().len(), 1);
        assert!(dialed.has_listener());
        assert!(
            registry
                .find(ChannelKey::new(Some(tab(7)), Location::ContentScript))
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_stale_channel_retried_once_then_fails() {
        let transport = MockTransport::new();
        let (router, registry) = background(Arc::clone(&transport), None);
        let key = ChannelKey::new(Some(tab(7)), Location::ContentScript);
        let first = MockPort::stale("ContentScript");
        let redialed = MockPort::stale("BackgroundScript");
        registry.register(key, first.clone());
        transport.will_return(redialed.clone());

        let err = router
            .route(to_content(json!(1)), RouteHint::tab(tab(7)))
            .await
            .unwrap_err();

        assert!(err.is_delivery_error());
        let attempts = first.post_attempts.load(Ordering::SeqCst)
            + redialed.post_attempts.load(Ordering::SeqCst);
        assert_eq!(attempts, 2);
        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);
        assert!(registry.find(key).is_none());
    }

    #[tokio::test]
    async fn test_stale_channel_recovers_by_dialing() {
        let transport = MockTransport::new();
        let (router, registry) = background(Arc::clone(&transport), None);
        let key = ChannelKey::new(Some(tab(7)), Location::ContentScript);
        let stale = MockPort::stale("ContentScript");
        let fresh = MockPort::new("BackgroundScript");
        registry.register(key, stale.clone());
        transport.will_return(fresh.clone());

        router
            .route(to_content(json!(1)), RouteHint::tab(tab(7)))
            .await
            .unwrap();
        assert_eq!(fresh.posted.lock().len(), 1);
        assert_eq!(registry.find(key).map(|p| p.id()), Some(fresh.id()));
    }

    #[tokio::test]
    async fn test_undialable_destination_fails_without_dial() {
        let transport = MockTransport::new();
        let (router, _) = background(Arc::clone(&transport), None);
        let envelope =
            Envelope::notify(Location::BackgroundScript, Location::DevtoolsScript, json!(1));

        let err = router.route(envelope, RouteHint::tab(tab(1))).await.unwrap_err();
        assert!(err.is_delivery_error());
        assert_eq!(transport.dials.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unroutable_destination() {
        let (bridge, _rx) = MemoryBridge::channel();
        let table = RoutingTable::for_location(Location::Core);
        let registry = Arc::new(PortRegistry::new(FxHashMap::default(), Arc::new(|_| {})));
        let router = Router::new(
            Location::Core,
            None,
            table,
            registry,
            None,
            None,
            Some(bridge as Arc<dyn HostBridge>),
        );

        let envelope = Envelope::notify(Location::Core, Location::DevtoolsScript, json!(1));
        let err = router.route(envelope, RouteHint::none()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Unroutable { from: Location::Core, to: Location::DevtoolsScript }
        ));
    }

    #[tokio::test]
    async fn test_bridge_route_carries_tab() {
        let (bridge, mut rx) = MemoryBridge::channel();
        let table = RoutingTable::for_location(Location::Core);
        let registry = Arc::new(PortRegistry::new(FxHashMap::default(), Arc::new(|_| {})));
        let router = Router::new(
            Location::Core,
            None,
            table,
            registry,
            None,
            None,
            Some(bridge as Arc<dyn HostBridge>),
        );

        let envelope = Envelope::notify(Location::Core, Location::ContentScript, json!("go"));
        let routed = router
            .route(envelope.clone(), RouteHint::tab(tab(5)))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Bridge);

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.tab_id, Some(tab(5)));
        assert_eq!(frame.envelope().unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_no_hint_picks_first_active_tab() {
        let transport = MockTransport::new();
        let tabs = MemoryTabs::new(WindowId::new(1), [tab(1), tab(2)]);
        let (router, registry) = background(Arc::clone(&transport), Some(tabs));
        let one = MockPort::new("ContentScript");
        let two = MockPort::new("ContentScript");
        registry.register(ChannelKey::new(Some(tab(1)), Location::ContentScript), one.clone());
        registry.register(ChannelKey::new(Some(tab(2)), Location::ContentScript), two.clone());

        let routed = router
            .route(to_content(json!(1)), RouteHint::none())
            .await
            .unwrap();
        assert_eq!(routed, Routed::Channel(1));
        assert_eq!(one.posted.lock().len(), 1);
        assert!(two.posted.lock().is_empty());

        let routed = router
            .route(to_content(json!(2)), RouteHint::tab_or_all(None))
            .await
            .unwrap();
        assert_eq!(routed, Routed::Channel(2));
        assert_eq!(two.posted.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_no_hint_without_tab_query_is_config_error() {
        let (router, _) = background(MockTransport::new(), None);
        let err = router
            .route(to_content(json!(1)), RouteHint::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }
}
