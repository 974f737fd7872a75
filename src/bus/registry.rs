//! Port registry.
//!
//! Maps `(tab, peer location)` to the live channel handle of one
//! endpoint. Registering a handle also wires its listener into the
//! endpoint's event queue, so no message can arrive on a registered
//! channel without being seen.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                PortRegistry                 │
//! │  (tab 7, ContentScript)  → port-12          │
//! │  (tab 7, DevtoolsScript) → port-15          │
//! │  (tab 8, ContentScript)  → port-19          │
//! │                                             │
//! │  relays: Core → ContentScript               │
//! │          DevtoolsPrivate → ContentScript    │
//! └─────────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::identifiers::{PortId, TabId};
use crate::protocol::{Envelope, Location};
use crate::transport::{Port, PortListener, PortSignal};

// ============================================================================
// Types
// ============================================================================

/// Registry key: the peer's location and, for per-tab endpoints, its tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelKey {
    /// Tab scope; `None` on endpoints holding one session-wide channel.
    pub tab_id: Option<TabId>,
    /// Peer location.
    pub location: Location,
}

impl ChannelKey {
    /// Creates a key.
    #[inline]
    #[must_use]
    pub const fn new(tab_id: Option<TabId>, location: Location) -> Self {
        Self { tab_id, location }
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tab_id {
            Some(tab_id) => write!(f, "{}@{}", self.location, tab_id),
            None => write!(f, "{}", self.location),
        }
    }
}

/// Transport notification tagged with the registration it belongs to.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// An envelope arrived on a registered channel.
    Message {
        /// Registration key.
        key: ChannelKey,
        /// Handle it arrived on.
        port_id: PortId,
        /// The envelope.
        envelope: Envelope,
    },
    /// A registered channel's peer went away.
    Disconnected {
        /// Registration key.
        key: ChannelKey,
        /// Handle that disconnected.
        port_id: PortId,
        /// Handle, if still alive, for listener detachment.
        port: Weak<dyn Port>,
    },
}

/// Receiver of channel events, normally the endpoint's event queue.
pub type ChannelSink = Arc<dyn Fn(ChannelEvent) + Send + Sync>;

// ============================================================================
// PortRegistry
// ============================================================================

/// Per-endpoint table of live channel handles.
pub struct PortRegistry {
    /// Live handles by key.
    ports: Mutex<FxHashMap<ChannelKey, Arc<dyn Port>>>,
    /// Locations reachable only through another location's channel.
    relays: FxHashMap<Location, Location>,
    /// Event sink listeners forward into.
    sink: ChannelSink,
}

impl fmt::Debug for PortRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortRegistry")
            .field("ports", &self.keys())
            .field("relays", &self.relays)
            .finish_non_exhaustive()
    }
}

impl PortRegistry {
    /// Creates an empty registry.
    ///
    /// `relays` maps a destination to the location whose channel carries
    /// its traffic.
    #[must_use]
    pub fn new(relays: FxHashMap<Location, Location>, sink: ChannelSink) -> Self {
        Self {
            ports: Mutex::new(FxHashMap::default()),
            relays,
            sink,
        }
    }

    /// Registers `port` under `key` and attaches its listener.
    ///
    /// Registering the handle that is already live is a no-op. A
    /// different handle replaces the live one, which is detached and
    /// disconnected so a reconnecting peer never leaves a zombie channel.
    ///
    /// Returns `false` for the no-op case.
    pub fn register(&self, key: ChannelKey, port: Arc<dyn Port>) -> bool {
        let previous = {
            let mut ports = self.ports.lock();
            if let Some(live) = ports.get(&key)
                && live.id() == port.id()
            {
                trace!(%key, port_id = %port.id(), "Port already registered");
                return false;
            }
            port.set_listener(self.listener_for(key, &port));
            ports.insert(key, port)
        };

        if let Some(old) = previous {
            debug!(%key, port_id = %old.id(), "Replacing registered port");
            old.clear_listener();
            old.disconnect();
        } else {
            debug!(%key, "Port registered");
        }
        true
    }

    /// Removes the registration for `key`.
    ///
    /// With `handle` given, only that handle is unregistered: if it is no
    /// longer the live one (it was replaced by a reconnect), only its own
    /// listener is detached and the live registration stays.
    ///
    /// Returns `true` if a registration was removed.
    pub fn unregister(&self, key: ChannelKey, handle: Option<&dyn Port>) -> bool {
        let removed = {
            let mut ports = self.ports.lock();
            match (ports.get(&key), handle) {
                (Some(live), Some(handle)) if live.id() != handle.id() => None,
                (None, _) => None,
                _ => ports.remove(&key),
            }
        };

        match removed {
            Some(port) => {
                port.clear_listener();
                debug!(%key, port_id = %port.id(), "Port unregistered");
                true
            }
            None => {
                if let Some(handle) = handle {
                    handle.clear_listener();
                    trace!(%key, port_id = %handle.id(), "Stale unregister ignored");
                }
                false
            }
        }
    }

    /// Unregisters `port` after a sender found it dead.
    ///
    /// The removal is reported to the sink as a disconnect, since the
    /// detached listener can no longer report one.
    ///
    /// Returns `true` if `port` was the live registration.
    pub fn release(&self, key: ChannelKey, port: &Arc<dyn Port>) -> bool {
        if !self.unregister(key, Some(port.as_ref())) {
            return false;
        }
        (self.sink)(ChannelEvent::Disconnected {
            key,
            port_id: port.id(),
            port: Arc::downgrade(port),
        });
        true
    }

    /// Returns the handle registered under exactly `key`.
    #[must_use]
    pub fn find(&self, key: ChannelKey) -> Option<Arc<dyn Port>> {
        self.ports.lock().get(&key).cloned()
    }

    /// Returns the key carrying traffic for `location`, applying relay
    /// redirection.
    #[must_use]
    pub fn channel_key(&self, tab_id: Option<TabId>, location: Location) -> ChannelKey {
        let location = self.relays.get(&location).copied().unwrap_or(location);
        ChannelKey::new(tab_id, location)
    }

    /// Looks up the channel for `location` in `tab_id`, through its relay
    /// if it has one.
    #[must_use]
    pub fn resolve(&self, tab_id: Option<TabId>, location: Location) -> Option<Arc<dyn Port>> {
        self.find(self.channel_key(tab_id, location))
    }

    /// Returns all registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<ChannelKey> {
        let mut keys: Vec<_> = self.ports.lock().keys().copied().collect();
        keys.sort();
        keys
    }

    /// Returns the number of registrations.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.ports.lock().len()
    }

    /// Returns `true` if nothing is registered.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ports.lock().is_empty()
    }

    /// Disconnects and removes every registration.
    pub fn clear(&self) {
        let drained: Vec<_> = self.ports.lock().drain().collect();
        for (key, port) in drained {
            port.clear_listener();
            port.disconnect();
            debug!(%key, "Port closed during teardown");
        }
    }

    /// Builds the listener forwarding `port`'s signals into the sink.
    fn listener_for(&self, key: ChannelKey, port: &Arc<dyn Port>) -> PortListener {
        let sink = Arc::clone(&self.sink);
        let port_id = port.id();
        let weak = Arc::downgrade(port);

        Arc::new(move |signal| match signal {
            PortSignal::Message(envelope) => sink(ChannelEvent::Message {
                key,
                port_id,
                envelope,
            }),
            PortSignal::Disconnected => sink(ChannelEvent::Disconnected {
                key,
                port_id,
                port: weak.clone(),
            }),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::bus::testing::MockPort;

    fn tab(id: u32) -> Option<TabId> {
        TabId::new(id)
    }

    fn registry() -> (PortRegistry, Arc<Mutex<Vec<ChannelEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink_events = Arc::clone(&events);
        let mut relays = FxHashMap::default();
        relays.insert(Location::Core, Location::ContentScript);
        let sink: ChannelSink = Arc::new(move |e: ChannelEvent| sink_events.lock().push(e));
        let registry = PortRegistry::new(relays, sink);
        (registry, events)
    }

    #[test]
    fn test_register_attaches_listener() {
        let (registry, events) = registry();
        let port = MockPort::new("ContentScript");
        let key = ChannelKey::new(tab(7), Location::ContentScript);

        assert!(registry.register(key, port.clone()));
        assert!(port.has_listener());

        let envelope =
            Envelope::notify(Location::ContentScript, Location::BackgroundScript, json!(1));
        port.emit(PortSignal::Message(envelope));
        assert!(matches!(
            events.lock().as_slice(),
            [ChannelEvent::Message { key: k, port_id, .. }] if *k == key && *port_id == port.id()
        ));
    }

    #[test]
    fn test_register_same_handle_is_noop() {
        let (registry, _) = registry();
        let port = MockPort::new("ContentScript");
        let key = ChannelKey::new(tab(7), Location::ContentScript);

        assert!(registry.register(key, port.clone()));
        assert!(!registry.register(key, port.clone()));
        assert!(!port.was_disconnected());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_replaces_and_tears_down_old() {
        let (registry, _) = registry();
        let key = ChannelKey::new(tab(7), Location::ContentScript);
        let old = MockPort::new("ContentScript");
        let new = MockPort::new("ContentScript");
        let other = MockPort::new("ContentScript");
        registry.register(ChannelKey::new(tab(8), Location::ContentScript), other.clone());

        registry.register(key, old.clone());
        registry.register(key, new.clone());

        assert!(old.was_disconnected());
        assert!(!old.has_listener());
        assert!(!new.was_disconnected());
        assert!(!other.was_disconnected());
        assert_eq!(registry.find(key).map(|p| p.id()), Some(new.id()));
    }

    #[test]
    fn test_stale_unregister_keeps_live() {
        let (registry, _) = registry();
        let key = ChannelKey::new(tab(7), Location::ContentScript);
        let old = MockPort::new("ContentScript");
        let new = MockPort::new("ContentScript");

        registry.register(key, old.clone());
        registry.register(key, new.clone());

        assert!(!registry.unregister(key, Some(old.as_ref())));
        assert_eq!(registry.find(key).map(|p| p.id()), Some(new.id()));
        assert!(new.has_listener());
    }

    #[test]
    fn test_unregister_live_handle() {
        let (registry, _) = registry();
        let key = ChannelKey::new(tab(7), Location::ContentScript);
        let port = MockPort::new("ContentScript");
        registry.register(key, port.clone());

        assert!(registry.unregister(key, Some(port.as_ref())));
        assert!(registry.find(key).is_none());
        assert!(!port.has_listener());
        assert!(!registry.unregister(key, None));
    }

    #[test]
    fn test_disconnect_signal_carries_handle() {
        let (registry, events) = registry();
        let key = ChannelKey::new(None, Location::BackgroundScript);
        let port = MockPort::new("ContentScript");
        registry.register(key, port.clone());

        port.emit(PortSignal::Disconnected);
        let events = events.lock();
        match events.as_slice() {
            [ChannelEvent::Disconnected { key: k, port: weak, .. }] => {
                assert_eq!(*k, key);
                assert_eq!(weak.upgrade().map(|p| p.id()), Some(port.id()));
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_release_reports_disconnect() {
        let (registry, events) = registry();
        let key = ChannelKey::new(None, Location::BackgroundScript);
        let mock = MockPort::stale("ContentScript");
        let port: Arc<dyn Port> = mock.clone();
        registry.register(key, Arc::clone(&port));

        assert!(registry.release(key, &port));
        assert!(registry.find(key).is_none());
        assert!(!mock.has_listener());
        assert!(matches!(
            events.lock().as_slice(),
            [ChannelEvent::Disconnected { key: k, port_id, .. }]
                if *k == key && *port_id == mock.id()
        ));

        // A second release of the same handle reports nothing.
        assert!(!registry.release(key, &port));
        assert_eq!(events.lock().len(), 1);
    }

    #[test]
    fn test_relay_redirection() {
        let (registry, _) = registry();
        let port = MockPort::new("ContentScript");
        registry.register(ChannelKey::new(tab(3), Location::ContentScript), port.clone());

        let via_relay = registry.resolve(tab(3), Location::Core);
        assert_eq!(via_relay.map(|p| p.id()), Some(port.id()));
        assert_eq!(
            registry.channel_key(tab(3), Location::Core),
            ChannelKey::new(tab(3), Location::ContentScript)
        );
        assert!(registry.resolve(tab(4), Location::Core).is_none());
    }

    #[test]
    fn test_clear_disconnects_everything() {
        let (registry, _) = registry();
        let a = MockPort::new("a");
        let b = MockPort::new("b");
        registry.register(ChannelKey::new(tab(1), Location::ContentScript), a.clone());
        registry.register(ChannelKey::new(tab(1), Location::DevtoolsScript), b.clone());

        registry.clear();
        assert!(registry.is_empty());
        assert!(a.was_disconnected() && b.was_disconnected());
    }
}
