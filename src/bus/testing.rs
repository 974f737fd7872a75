//! Test doubles shared by the bus unit tests.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::identifiers::PortId;
use crate::protocol::{ChannelName, Envelope};
use crate::transport::{
    ConnectListener, ConnectTarget, Port, PortListener, PortSignal, SenderInfo, Transport,
};

/// Routes `tracing` output through the test harness; `RUST_LOG` filters it.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Port that records posts and can be told to report itself stale.
pub(crate) struct MockPort {
    id: PortId,
    name: String,
    stale: AtomicBool,
    disconnected: AtomicBool,
    pub posted: Mutex<Vec<Envelope>>,
    pub post_attempts: AtomicUsize,
    listener: Mutex<Option<PortListener>>,
}

impl MockPort {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            id: PortId::next(),
            name: name.to_string(),
            stale: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            posted: Mutex::new(Vec::new()),
            post_attempts: AtomicUsize::new(0),
            listener: Mutex::new(None),
        })
    }

    pub fn stale(name: &str) -> Arc<Self> {
        let port = Self::new(name);
        port.stale.store(true, Ordering::SeqCst);
        port
    }

    pub fn has_listener(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn was_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Delivers a signal as if it came from the peer.
    pub fn emit(&self, signal: PortSignal) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(signal);
        }
    }
}

impl fmt::Debug for MockPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockPort")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("stale", &self.stale)
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}

impl Port for MockPort {
    fn id(&self) -> PortId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn sender(&self) -> Option<SenderInfo> {
        None
    }

    fn post_message(&self, envelope: &Envelope) -> Result<()> {
        self.post_attempts.fetch_add(1, Ordering::SeqCst);
        if self.stale.load(Ordering::SeqCst) || self.was_disconnected() {
            return Err(Error::stale_channel(self.id));
        }
        self.posted.lock().push(envelope.clone());
        Ok(())
    }

    fn set_listener(&self, listener: PortListener) {
        *self.listener.lock() = Some(listener);
    }

    fn clear_listener(&self) {
        *self.listener.lock() = None;
    }

    fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }
}

/// Transport that hands out pre-made ports and counts dials.
#[derive(Default)]
pub(crate) struct MockTransport {
    pub dials: AtomicUsize,
    pub dialed: Mutex<Vec<(ConnectTarget, String)>>,
    next: Mutex<Vec<Arc<MockPort>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the port returned by the next successful dial.
    pub fn will_return(&self, port: Arc<MockPort>) {
        self.next.lock().push(port);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, target: ConnectTarget, name: &ChannelName) -> Result<Arc<dyn Port>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.dialed.lock().push((target, name.to_string()));
        let port = self.next.lock().pop();
        match port {
            Some(port) => Ok(port as Arc<dyn Port>),
            None => Err(Error::connection(format!("{target} unreachable"))),
        }
    }

    fn on_connect(&self, _listener: ConnectListener) {}
}
