//! Initiator connection state machine.
//!
//! Endpoints that can only open a channel to a fixed counterpart (content
//! agents and devtools panels connecting to the background controller)
//! keep that channel alive with a [`Connector`]:
//!
//! ```text
//!               connect ok / inbound accepted
//! Disconnected ──► Connecting ──────────────────► Connected
//!      ▲               │ connect failed               │
//!      │◄──────────────┘ (retry after backoff)         │
//!      └───────────────────────────────────────────────┘
//!               live channel dropped (reconnect after delay)
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{ChannelKey, PortRegistry};
use crate::protocol::ChannelName;
use crate::transport::{ConnectTarget, Transport};

// ============================================================================
// ConnectionState
// ============================================================================

/// State of an initiating endpoint's channel to its counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No channel and no attempt in flight.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// A channel is registered.
    Connected,
}

// ============================================================================
// Connector
// ============================================================================

/// Keeps one outbound channel registered.
pub struct Connector {
    key: ChannelKey,
    target: ConnectTarget,
    name: ChannelName,
    registry: Arc<PortRegistry>,
    transport: Arc<dyn Transport>,
    retry: Duration,
    reconnect_delay: Duration,
    state: Mutex<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("key", &self.key)
            .field("target", &self.target)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a connector in the `Disconnected` state.
    #[must_use]
    pub fn new(
        key: ChannelKey,
        target: ConnectTarget,
        name: ChannelName,
        registry: Arc<PortRegistry>,
        transport: Arc<dyn Transport>,
        retry: Duration,
        reconnect_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            key,
            target,
            name,
            registry,
            transport,
            retry,
            reconnect_delay,
            state: Mutex::new(ConnectionState::Disconnected),
            task: Mutex::new(None),
        })
    }

    /// Returns the registry key of the maintained channel.
    #[inline]
    #[must_use]
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Starts connecting immediately.
    pub fn start(self: &Arc<Self>) {
        self.schedule(Duration::ZERO);
    }

    /// Reacts to the live channel being unregistered.
    ///
    /// Ignored unless `Connected`: otherwise an attempt is already
    /// pending, or the connector was stopped.
    pub fn on_disconnected(self: &Arc<Self>) {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Connected {
                return;
            }
            *state = ConnectionState::Disconnected;
        }
        info!(
            key = %self.key,
            delay_ms = self.reconnect_delay.as_millis() as u64,
            "Channel lost, reconnecting"
        );
        self.schedule(self.reconnect_delay);
    }

    /// Reacts to the counterpart connecting to us first.
    pub fn on_accepted(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.set_state(ConnectionState::Connected);
        debug!(key = %self.key, "Inbound channel accepted");
    }

    /// Stops any pending attempt.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
        self.set_state(ConnectionState::Disconnected);
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock() = state;
    }

    /// Replaces the pending attempt with one starting after `delay`.
    fn schedule(self: &Arc<Self>, delay: Duration) {
        let weak = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Self::run(weak).await;
        });

        if let Some(previous) = self.task.lock().replace(task) {
            previous.abort();
        }
    }

    /// Connect loop: retries on the fixed backoff until a channel is
    /// registered or the connector is dropped.
    async fn run(weak: Weak<Self>) {
        loop {
            let Some(this) = weak.upgrade() else {
                return;
            };

            if this.registry.find(this.key).is_some() {
                this.set_state(ConnectionState::Connected);
                return;
            }

            this.set_state(ConnectionState::Connecting);
            match this.transport.connect(this.target, &this.name).await {
                Ok(port) => {
                    this.registry.register(this.key, port);
                    this.set_state(ConnectionState::Connected);
                    info!(key = %this.key, name = %this.name, "Channel connected");
                    return;
                }
                Err(e) => {
                    this.set_state(ConnectionState::Disconnected);
                    warn!(
                        key = %this.key,
                        error = %e,
                        retry_ms = this.retry.as_millis() as u64,
                        "Connect failed, retrying"
                    );
                    let retry = this.retry;
                    drop(this);
                    tokio::time::sleep(retry).await;
                }
            }
        }
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

    use crate::bus::testing::{MockPort, MockTransport};
    use crate::protocol::Location;

    const RETRY: Duration = Duration::from_secs(5);
    const RECONNECT: Duration = Duration::from_secs(1);

    fn connector(transport: Arc<MockTransport>) -> (Arc<Connector>, Arc<PortRegistry>) {
        let registry = Arc::new(PortRegistry::new(FxHashMap::default(), Arc::new(|_| {})));
        let connector = Connector::new(
            ChannelKey::new(None, Location::BackgroundScript),
            ConnectTarget::Runtime,
            ChannelName::new(Location::ContentScript),
            Arc::clone(&registry),
            transport,
            RETRY,
            RECONNECT,
        );
        (connector, registry)
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_and_registers() {
        let transport = MockTransport::new();
        transport.will_return(MockPort::new("ContentScript"));
        let (connector, registry) = connector(Arc::clone(&transport));

        connector.start();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(connector.state(), ConnectionState::Connected);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            transport.dialed.lock()[0],
            (ConnectTarget::Runtime, "ContentScript".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_on_backoff() {
        let transport = MockTransport::new();
        let (connector, registry) = connector(Arc::clone(&transport));

        connector.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(connector.state(), ConnectionState::Disconnected);
        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);

        transport.will_return(MockPort::new("ContentScript"));
        tokio::time::sleep(RETRY).await;

        assert_eq!(transport.dials.load(Ordering::SeqCst), 2);
        assert_eq!(connector.state(), ConnectionState::Connected);
        assert!(!registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnects_after_delay() {
        let transport = MockTransport::new();
        transport.will_return(MockPort::new("ContentScript"));
        let (connector, registry) = connector(Arc::clone(&transport));
        connector.start();
        tokio::time::sleep(Duration::from_millis(1)).await;

        registry.unregister(connector.key(), None);
        transport.will_return(MockPort::new("ContentScript"));
        connector.on_disconnected();
        assert_eq!(connector.state(), ConnectionState::Disconnected);

        tokio::time::sleep(RECONNECT / 2).await;
        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);

        tokio::time::sleep(RECONNECT).await;
        assert_eq!(transport.dials.load(Ordering::SeqCst), 2);
        assert_eq!(connector.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_while_connecting_keeps_backoff() {
        let transport = MockTransport::new();
        let (connector, _) = connector(Arc::clone(&transport));
        connector.start();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);

        connector.on_disconnected();
        tokio::time::sleep(RECONNECT * 2).await;
        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);

        tokio::time::sleep(RETRY).await;
        assert_eq!(transport.dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_connector_stays_down() {
        let transport = MockTransport::new();
        transport.will_return(MockPort::new("ContentScript"));
        let (connector, _) = connector(Arc::clone(&transport));
        connector.start();
        tokio::time::sleep(Duration::from_millis(1)).await;

        connector.stop();
        connector.on_disconnected();
        tokio::time::sleep(RETRY * 2).await;

        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);
        assert_eq!(connector.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_inbound_stops_retrying() {
        let transport = MockTransport::new();
        let (connector, _) = connector(Arc::clone(&transport));
        connector.start();
        tokio::time::sleep(Duration::from_millis(1)).await;

        connector.on_accepted();
        tokio::time::sleep(RETRY * 3).await;

        assert_eq!(transport.dials.load(Ordering::SeqCst), 1);
        assert_eq!(connector.state(), ConnectionState::Connected);
    }
}
