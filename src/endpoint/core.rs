//! Bus endpoint.
//!
//! An [`Endpoint`] is one location's presence on the bus. It owns the
//! correlator, the channel registry and the router, and runs an event
//! loop task that serializes everything the transports report:
//!
//! - inbound envelopes on registered channels
//! - channel disconnects
//! - inbound channel connections
//! - envelopes handed in by the host bridge
//!
//! # Example
//!
//! ```no_run
//! use context_bus::{Endpoint, Location, MemoryContext, MemoryNetwork, RouteHint};
//! use serde_json::json;
//!
//! # async fn example() -> context_bus::Result<()> {
//! let network = MemoryNetwork::new();
//! let background = Endpoint::builder(Location::BackgroundScript)
//!     .transport(network.transport(MemoryContext::background()))
//!     .routing_table(
//!         context_bus::RoutingTable::new(context_bus::Scope::PerTab).with_route(
//!             Location::ContentScript,
//!             context_bus::Route::Direct { dial: Some(context_bus::Dial::Tab) },
//!         ),
//!     )
//!     .build()?;
//!
//! let tab = context_bus::TabId::new(7).unwrap();
//! let reply = background
//!     .request(Location::ContentScript, json!({"ping": true}), RouteHint::tab(tab))
//!     .await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::bus::{
    ChannelEvent, ChannelKey, ChannelSink, Correlator, PortRegistry, RouteHint, Routed, Router,
    RoutingTable, Scope,
};
use crate::error::{Error, Result};
use crate::identifiers::{PortId, ResponseId, TabId, WindowId};
use crate::protocol::{
    BridgeFrame, BusEvent, ChannelName, Envelope, Location, ResponseCode, RestOfEnvelope, unpack,
};
use crate::transport::{ConnectTarget, HostBridge, Port, TabQuery, Transport};

use super::builder::EndpointBuilder;
use super::connector::{ConnectionState, Connector};
use super::options::BusOptions;

// ============================================================================
// Types
// ============================================================================

/// Inbound message handler.
///
/// Receives every envelope addressed to the endpoint that is not a
/// response, plus a [`Responder`] when the sender awaits a reply. Runs on
/// the event loop; long work should be spawned.
pub type MessageHandler = Arc<dyn Fn(Envelope, Option<Responder>) + Send + Sync>;

/// Work items of the event loop.
enum EndpointEvent {
    /// A registered channel reported something.
    Channel(ChannelEvent),
    /// An inbound channel was registered.
    Accepted {
        key: ChannelKey,
        window_id: Option<WindowId>,
    },
    /// The host bridge delivered an envelope.
    Inbound {
        envelope: Envelope,
        tab_id: Option<TabId>,
    },
    /// Stop the loop.
    Shutdown,
}

/// Everything the builder hands over.
pub(crate) struct EndpointParts {
    pub location: Location,
    pub own_tab: Option<TabId>,
    pub options: BusOptions,
    pub table: RoutingTable,
    pub transport: Option<Arc<dyn Transport>>,
    pub tabs: Option<Arc<dyn TabQuery>>,
    pub bridge: Option<Arc<dyn HostBridge>>,
}

/// Shared state of an endpoint.
pub(crate) struct EndpointInner {
    location: Location,
    own_tab: Option<TabId>,
    options: BusOptions,
    router: Router,
    correlator: Correlator,
    handler: RwLock<Option<MessageHandler>>,
    connector: Option<Arc<Connector>>,
    events_tx: mpsc::UnboundedSender<EndpointEvent>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Drop for EndpointInner {
    fn drop(&mut self) {
        if let Some(connector) = &self.connector {
            connector.stop();
        }
        if let Some(task) = self.event_loop.lock().take() {
            task.abort();
        }
    }
}

// ============================================================================
// Endpoint
// ============================================================================

/// One location's handle on the bus.
///
/// Cloning shares the same endpoint.
#[derive(Clone)]
pub struct Endpoint {
    pub(crate) inner: Arc<EndpointInner>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("location", &self.inner.location)
            .field("own_tab", &self.inner.own_tab)
            .field("channels", &self.channels())
            .field("pending", &self.pending_count())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Endpoint - Construction
// ============================================================================

impl Endpoint {
    /// Creates a configuration builder for an endpoint at `location`.
    #[inline]
    #[must_use]
    pub fn builder(location: Location) -> EndpointBuilder {
        EndpointBuilder::new(location)
    }

    /// Wires the components together and spawns the event loop.
    ///
    /// Must be called inside a tokio runtime.
    pub(crate) fn start(parts: EndpointParts) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let sink: ChannelSink = {
            let tx = events_tx.clone();
            Arc::new(move |event| {
                let _ = tx.send(EndpointEvent::Channel(event));
            })
        };
        let registry = Arc::new(PortRegistry::new(parts.table.relays(), sink));
        let initiator_peer = parts.table.initiator_peer();

        let router = Router::new(
            parts.location,
            parts.own_tab,
            parts.table,
            Arc::clone(&registry),
            parts.transport.clone(),
            parts.tabs,
            parts.bridge,
        );

        let connector = match (&parts.transport, initiator_peer) {
            (Some(transport), Some(peer)) => Some(Connector::new(
                ChannelKey::new(None, peer),
                ConnectTarget::Runtime,
                router.channel_name(),
                Arc::clone(&registry),
                Arc::clone(transport),
                parts.options.connect_retry,
                parts.options.reconnect_delay,
            )),
            _ => None,
        };

        let inner = Arc::new(EndpointInner {
            location: parts.location,
            own_tab: parts.own_tab,
            options: parts.options,
            router,
            correlator: Correlator::new(parts.options.response_timeout, parts.options.max_pending),
            handler: RwLock::new(None),
            connector,
            events_tx,
            event_loop: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if let Some(transport) = &parts.transport {
            let weak = Arc::downgrade(&inner);
            transport.on_connect(Arc::new(move |port| {
                match weak.upgrade() {
                    Some(inner) => Endpoint { inner }.accept(port),
                    None => port.disconnect(),
                }
            }));
        }

        let task = tokio::spawn(Self::run_event_loop(Arc::downgrade(&inner), events_rx));
        *inner.event_loop.lock() = Some(task);

        if let Some(connector) = &inner.connector {
            connector.start();
        }

        info!(location = %inner.location, own_tab = ?inner.own_tab, "Endpoint started");
        Self { inner }
    }
}

// ============================================================================
// Endpoint - Public API
// ============================================================================

impl Endpoint {
    /// Returns the location of this endpoint.
    #[inline]
    #[must_use]
    pub fn location(&self) -> Location {
        self.inner.location
    }

    /// Returns the tab this endpoint lives in, if configured.
    #[inline]
    #[must_use]
    pub fn own_tab(&self) -> Option<TabId> {
        self.inner.own_tab
    }

    /// Returns the endpoint options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &BusOptions {
        &self.inner.options
    }

    /// Returns the number of requests awaiting responses.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    /// Returns the keys of all registered channels.
    #[must_use]
    pub fn channels(&self) -> Vec<ChannelKey> {
        self.inner.router.registry().keys()
    }

    /// Returns the initiator state, for endpoints that dial their
    /// counterpart.
    #[must_use]
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner.connector.as_ref().map(|c| c.state())
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Installs the inbound message handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRegistered`] if a handler is installed.
    pub fn on_message<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(Envelope, Option<Responder>) + Send + Sync + 'static,
    {
        let mut slot = self.inner.handler.write();
        if slot.is_some() {
            return Err(Error::already_registered(self.location()));
        }
        *slot = Some(Arc::new(handler));
        debug!(location = %self.location(), "Message handler installed");
        Ok(())
    }

    /// Sends a fire-and-forget envelope.
    ///
    /// # Errors
    ///
    /// Returns the routing error; delivery failures are also logged.
    pub async fn send(
        &self,
        destination: Location,
        payload: Value,
        hint: impl Into<RouteHint>,
    ) -> Result<()> {
        self.ensure_open()?;
        let envelope = self.stamp(Envelope::notify(self.location(), destination, payload));

        self.route_outbound(envelope, hint.into())
            .await
            .inspect_err(|e| {
                warn!(from = %self.location(), to = %destination, error = %e, "Send failed");
            })
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// - [`Error::DeliveryFailed`] or [`Error::Unroutable`] immediately if
    ///   routing fails
    /// - [`Error::RequestTimedOut`] if no response arrives in time
    /// - [`Error::TooManyPending`] at capacity
    pub async fn request(
        &self,
        destination: Location,
        payload: Value,
        hint: impl Into<RouteHint>,
    ) -> Result<Value> {
        self.ensure_open()?;
        let (response_id, pending) = self.inner.correlator.register()?;
        let envelope = self.stamp(Envelope::request(
            self.location(),
            destination,
            payload,
            response_id.clone(),
        ));

        if let Err(e) = self.route_outbound(envelope, hint.into()).await {
            self.inner.correlator.fail(&response_id, Error::ConnectionClosed);
            warn!(
                from = %self.location(),
                to = %destination,
                %response_id,
                error = %e,
                "Request not delivered"
            );
            return Err(e);
        }

        trace!(%response_id, to = %destination, "Awaiting response");
        pending.await
    }

    /// Accepts a packed envelope from the host bridge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] or [`Error::Protocol`] for a malformed
    /// envelope, [`Error::ConnectionClosed`] after shutdown.
    pub fn receive_from_bridge(&self, tab_id: Option<TabId>, packed: &str) -> Result<()> {
        let envelope = unpack(packed)?;
        self.enqueue(EndpointEvent::Inbound { envelope, tab_id })
    }

    /// Accepts a frame from a [`BridgeConnection`](crate::transport::BridgeConnection).
    ///
    /// # Errors
    ///
    /// See [`receive_from_bridge`](Self::receive_from_bridge).
    pub fn receive_frame(&self, frame: &BridgeFrame) -> Result<()> {
        self.receive_from_bridge(frame.tab_id, &frame.packed)
    }

    /// Host entry point taking the envelope in three parts.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the parts do not form a valid
    /// envelope, [`Error::ConnectionClosed`] after shutdown.
    pub fn receive_from_host(
        &self,
        destination: Location,
        response_code: ResponseCode,
        rest: RestOfEnvelope,
    ) -> Result<()> {
        let envelope = rest.into_envelope(destination, response_code);
        envelope.validate()?;
        self.enqueue(EndpointEvent::Inbound {
            envelope,
            tab_id: None,
        })
    }

    /// Stops the endpoint.
    ///
    /// Disconnects every channel and fails outstanding requests with
    /// [`Error::ConnectionClosed`]. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(connector) = &self.inner.connector {
            connector.stop();
        }
        let _ = self.inner.events_tx.send(EndpointEvent::Shutdown);
        self.inner.router.registry().clear();
        self.inner.correlator.shutdown();

        info!(location = %self.location(), "Endpoint shut down");
    }
}

// ============================================================================
// Endpoint - Internal
// ============================================================================

impl Endpoint {
    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        Ok(())
    }

    fn enqueue(&self, event: EndpointEvent) -> Result<()> {
        self.ensure_open()?;
        self.inner
            .events_tx
            .send(event)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Stamps the endpoint's own tab onto an outgoing envelope.
    fn stamp(&self, envelope: Envelope) -> Envelope {
        match self.inner.own_tab {
            Some(tab_id) => envelope.with_orig_tab(tab_id),
            None => envelope,
        }
    }

    /// Routes an envelope, delivering it here if it is addressed here.
    async fn route_outbound(&self, envelope: Envelope, hint: RouteHint) -> Result<()> {
        if let Routed::Local(envelope) = self.inner.router.route(envelope, hint).await? {
            self.deliver_locally(envelope);
        }
        Ok(())
    }

    /// Hands an envelope addressed to this endpoint to the correlator or
    /// the handler.
    fn deliver_locally(&self, envelope: Envelope) {
        if envelope.is_response() {
            if let Some(response_id) = envelope.response_id
                && let Err(e) = self.inner.correlator.resolve(&response_id, envelope.payload)
            {
                warn!(location = %self.location(), error = %e, "Dropping response");
            }
            return;
        }

        let handler = self.inner.handler.read().clone();
        let Some(handler) = handler else {
            warn!(
                location = %self.location(),
                from = %envelope.orig_location,
                "No message handler installed, dropping envelope"
            );
            return;
        };

        let responder = match (envelope.expects_response(), envelope.response_id.clone()) {
            (true, Some(response_id)) => Some(Responder {
                endpoint: self.clone(),
                reply_to: envelope.orig_location,
                response_id,
                tab_id: envelope.orig_tab_id,
            }),
            _ => None,
        };

        handler(envelope, responder);
    }

    /// Registers a channel opened by another context.
    fn accept(&self, port: Arc<dyn Port>) {
        if self.is_closed() {
            port.disconnect();
            return;
        }

        let name: ChannelName = match port.name().parse() {
            Ok(name) => name,
            Err(e) => {
                warn!(location = %self.location(), error = %e, "Rejecting channel");
                port.disconnect();
                return;
            }
        };
        if name.location == self.location() {
            warn!(location = %self.location(), %name, "Rejecting channel from own location");
            port.disconnect();
            return;
        }

        let sender = port.sender().unwrap_or_default();
        let key = match self.inner.router.table().scope() {
            Scope::Single => ChannelKey::new(None, name.location),
            Scope::PerTab => match name.tab_id.or(sender.tab_id) {
                Some(tab_id) => ChannelKey::new(Some(tab_id), name.location),
                None => {
                    warn!(location = %self.location(), %name, "Rejecting channel without a tab");
                    port.disconnect();
                    return;
                }
            },
        };

        self.inner.router.registry().register(key, port);
        let _ = self.inner.events_tx.send(EndpointEvent::Accepted {
            key,
            window_id: sender.window_id,
        });
    }

    /// Event loop: one event at a time, until shutdown or drop.
    async fn run_event_loop(
        weak: Weak<EndpointInner>,
        mut events_rx: mpsc::UnboundedReceiver<EndpointEvent>,
    ) {
        while let Some(event) = events_rx.recv().await {
            let Some(inner) = weak.upgrade() else {
                break;
            };
            if inner.closed.load(Ordering::SeqCst) {
                break;
            }
            let endpoint = Endpoint { inner };

            match event {
                EndpointEvent::Channel(ChannelEvent::Message { key, envelope, .. }) => {
                    endpoint.handle_inbound(envelope, key.tab_id).await;
                }
                EndpointEvent::Channel(ChannelEvent::Disconnected { key, port_id, port }) => {
                    endpoint.handle_disconnect(key, port_id, port);
                }
                EndpointEvent::Accepted { key, window_id } => {
                    endpoint.handle_accepted(key, window_id).await;
                }
                EndpointEvent::Inbound { envelope, tab_id } => {
                    endpoint.handle_inbound(envelope, tab_id).await;
                }
                EndpointEvent::Shutdown => break,
            }
        }

        debug!("Endpoint event loop terminated");
    }

    /// Delivers or forwards an inbound envelope.
    async fn handle_inbound(&self, mut envelope: Envelope, tab_id: Option<TabId>) {
        if let Err(e) = envelope.validate() {
            warn!(location = %self.location(), error = %e, "Dropping malformed envelope");
            return;
        }
        if envelope.orig_tab_id.is_none() {
            envelope.orig_tab_id = tab_id;
        }

        let destination = envelope.dest_location;
        if destination == self.location() {
            self.deliver_locally(envelope);
            return;
        }

        trace!(
            location = %self.location(),
            from = %envelope.orig_location,
            to = %destination,
            "Forwarding envelope"
        );
        let hint = RouteHint::from(tab_id.or(envelope.orig_tab_id));
        if let Err(e) = self.route_outbound(envelope, hint).await {
            warn!(location = %self.location(), to = %destination, error = %e, "Forward failed");
        }
    }

    /// Drops a disconnected channel; initiators schedule a reconnect.
    ///
    /// The connector is told whenever its key is left without a channel,
    /// including channels a sender already released as stale.
    fn handle_disconnect(&self, key: ChannelKey, port_id: PortId, port: Weak<dyn Port>) {
        let registry = self.inner.router.registry();
        match port.upgrade() {
            Some(port) if registry.unregister(key, Some(port.as_ref())) => {
                info!(location = %self.location(), %key, %port_id, "Channel disconnected");
            }
            Some(_) => trace!(%key, %port_id, "Disconnect for replaced channel"),
            None => trace!(%key, %port_id, "Disconnect for released channel"),
        }

        if let Some(connector) = &self.inner.connector
            && connector.key() == key
            && registry.find(key).is_none()
        {
            connector.on_disconnected();
        }
    }

    /// Follow-up work for an accepted channel.
    async fn handle_accepted(&self, key: ChannelKey, window_id: Option<WindowId>) {
        info!(location = %self.location(), %key, "Channel accepted");

        if let Some(connector) = &self.inner.connector
            && connector.key() == key
        {
            connector.on_accepted();
        }

        if let (Location::BackgroundScript, Location::ContentScript, Some(tab_id)) =
            (self.location(), key.location, key.tab_id)
        {
            self.identify_tab(tab_id, window_id).await;
        }
    }

    /// Tells the host which tab a newly connected content agent lives in.
    async fn identify_tab(&self, tab_id: TabId, window_id: Option<WindowId>) {
        if self.inner.router.table().route(Location::Core).is_none() {
            return;
        }

        let payload = match (BusEvent::TabIdentify { tab_id, window_id }).to_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to encode tab identification");
                return;
            }
        };
        let envelope =
            Envelope::notify(self.location(), Location::Core, payload).with_orig_tab(tab_id);

        if let Err(e) = self.route_outbound(envelope, RouteHint::tab(tab_id)).await {
            debug!(%tab_id, error = %e, "Tab identification not delivered");
        }
    }
}

// ============================================================================
// Responder
// ============================================================================

/// Reply handle for one request.
///
/// Consumed by replying; dropping it leaves the requester to time out.
pub struct Responder {
    endpoint: Endpoint,
    reply_to: Location,
    response_id: ResponseId,
    tab_id: Option<TabId>,
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("reply_to", &self.reply_to)
            .field("response_id", &self.response_id)
            .field("tab_id", &self.tab_id)
            .finish_non_exhaustive()
    }
}

impl Responder {
    /// Returns the correlation id of the request.
    #[inline]
    #[must_use]
    pub fn response_id(&self) -> &ResponseId {
        &self.response_id
    }

    /// Returns the location awaiting the reply.
    #[inline]
    #[must_use]
    pub fn reply_to(&self) -> Location {
        self.reply_to
    }

    /// Sends the reply in the background.
    pub fn respond(self, payload: Value) {
        tokio::spawn(async move {
            let _ = self.reply(payload).await;
        });
    }

    /// Sends the reply and waits for routing to finish.
    ///
    /// # Errors
    ///
    /// Returns the routing error, which is also logged.
    pub async fn reply(self, payload: Value) -> Result<()> {
        let envelope = Envelope {
            orig_location: self.endpoint.location(),
            dest_location: self.reply_to,
            payload,
            response_code: ResponseCode::R,
            response_id: Some(self.response_id.clone()),
            orig_tab_id: self.tab_id,
        };

        self.endpoint
            .route_outbound(envelope, RouteHint::from(self.tab_id))
            .await
            .inspect_err(|e| {
                warn!(
                    response_id = %self.response_id,
                    to = %self.reply_to,
                    error = %e,
                    "Reply not delivered"
                );
            })
    }
}

// ============================================================================
// Tests
// ============================================================================
