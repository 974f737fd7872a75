//! In-process transport.
//!
//! Wires endpoints of one process together with the same semantics as
//! extension messaging ports: named duplex channels, inbound connection
//! listeners, and disconnect notifications delivered to the opposite end
//! only. Used by the crate's tests and by embedders that host several
//! contexts in one process.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 MemoryNetwork                 │
//! │  (BackgroundScript, -)   → connect listener   │
//! │  (ContentScript, tab 7)  → connect listener   │
//! │  (ContentScript, tab 8)  → connect listener   │
//! └───────────────────────────────────────────────┘
//!        ▲ connect(Runtime)        ▲ connect(Tab(7))
//!        │                         │
//!   MemoryTransport           MemoryTransport
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::{PortId, TabId, WindowId};
use crate::protocol::{BridgeFrame, ChannelName, Envelope, Location};

use super::{
    ConnectListener, ConnectTarget, HostBridge, Port, PortListener, PortSignal, SenderInfo,
    TabInfo, TabQuery, Transport, WindowInfo,
};

// ============================================================================
// MemoryContext
// ============================================================================

/// One execution context attached to a [`MemoryNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryContext {
    /// Location of the context.
    pub location: Location,
    /// Tab of page-scoped contexts.
    pub tab_id: Option<TabId>,
    /// Window of page-scoped contexts.
    pub window_id: Option<WindowId>,
}

impl MemoryContext {
    /// The session-wide background controller.
    #[inline]
    #[must_use]
    pub const fn background() -> Self {
        Self {
            location: Location::BackgroundScript,
            tab_id: None,
            window_id: None,
        }
    }

    /// A page-scoped context in `tab_id`.
    #[inline]
    #[must_use]
    pub const fn in_tab(location: Location, tab_id: TabId, window_id: WindowId) -> Self {
        Self {
            location,
            tab_id: Some(tab_id),
            window_id: Some(window_id),
        }
    }

    /// Key under which a connect target is listening.
    fn target_key(target: ConnectTarget) -> (Location, Option<TabId>) {
        match target {
            ConnectTarget::Runtime => (Location::BackgroundScript, None),
            ConnectTarget::Tab(tab_id) => (Location::ContentScript, Some(tab_id)),
        }
    }

    fn key(&self) -> (Location, Option<TabId>) {
        (self.location, self.tab_id)
    }
}

// ============================================================================
// MemoryNetwork
// ============================================================================

/// Shared state of the in-process network.
#[derive(Default)]
struct NetworkInner {
    /// Inbound connect listeners by context.
    listeners: Mutex<FxHashMap<(Location, Option<TabId>), ConnectListener>>,
    /// Channels held by each context, for simulated context loss.
    ///
    /// Held independently of the handles, so a context that already
    /// released its end still severs the channel when it is dropped.
    owned: Mutex<FxHashMap<(Location, Option<TabId>), Vec<EndLink>>>,
    /// Targets refusing connections.
    offline: Mutex<FxHashSet<ConnectTarget>>,
    /// Total `connect` calls.
    connect_attempts: AtomicUsize,
}

/// In-process network connecting [`MemoryTransport`]s.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("contexts", &self.inner.listeners.lock().len())
            .finish_non_exhaustive()
    }
}

impl MemoryNetwork {
    /// Creates an empty network.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the transport of one context.
    #[must_use]
    pub fn transport(&self, context: MemoryContext) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            network: self.clone(),
            context,
        })
    }

    /// Makes connections to `target` fail (or succeed again).
    pub fn set_offline(&self, target: ConnectTarget, offline: bool) {
        let mut set = self.inner.offline.lock();
        if offline {
            set.insert(target);
        } else {
            set.remove(&target);
        }
    }

    /// Number of `connect` calls made on this network so far.
    #[inline]
    #[must_use]
    pub fn connect_attempts(&self) -> usize {
        self.inner.connect_attempts.load(Ordering::SeqCst)
    }

    /// Simulates a context vanishing (tab navigation, panel close).
    ///
    /// Every channel the context holds is disconnected, peers are
    /// notified, and the context stops accepting connections.
    pub fn drop_context(&self, location: Location, tab_id: Option<TabId>) {
        let key = (location, tab_id);
        self.inner.listeners.lock().remove(&key);
        let ends = self.inner.owned.lock().remove(&key).unwrap_or_default();

        let count = ends.iter().filter(|link| link.sever()).count();

        debug!(%location, ?tab_id, channels = count, "Memory context dropped");
    }

    fn track(&self, owner: (Location, Option<TabId>), end: &PortEnd) {
        let mut owned = self.inner.owned.lock();
        let ends = owned.entry(owner).or_default();
        ends.retain(EndLink::is_connected);
        ends.push(end.link());
    }
}

// ============================================================================
// MemoryTransport
// ============================================================================

/// [`Transport`] of one context on a [`MemoryNetwork`].
pub struct MemoryTransport {
    network: MemoryNetwork,
    context: MemoryContext,
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl MemoryTransport {
    /// Returns the context this transport belongs to.
    #[inline]
    #[must_use]
    pub fn context(&self) -> MemoryContext {
        self.context
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, target: ConnectTarget, name: &ChannelName) -> Result<Arc<dyn Port>> {
        let inner = &self.network.inner;
        inner.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if inner.offline.lock().contains(&target) {
            return Err(Error::connection(format!("{target} is offline")));
        }

        let target_key = MemoryContext::target_key(target);
        let listener = inner
            .listeners
            .lock()
            .get(&target_key)
            .cloned()
            .ok_or_else(|| Error::connection(format!("nothing listening on {target}")))?;

        let sender = SenderInfo {
            tab_id: self.context.tab_id,
            window_id: self.context.window_id,
        };
        let (local, remote) = PortEnd::pair(name.to_string(), sender);

        self.network.track(self.context.key(), &local);
        self.network.track(target_key, &remote);

        trace!(%name, %target, "Memory channel opened");
        let remote: Arc<dyn Port> = Arc::new(MemoryPort(remote));
        listener(remote);

        let local: Arc<dyn Port> = Arc::new(MemoryPort(local));
        Ok(local)
    }

    fn on_connect(&self, listener: ConnectListener) {
        self.network
            .inner
            .listeners
            .lock()
            .insert(self.context.key(), listener);
    }
}

// ============================================================================
// MemoryPort
// ============================================================================

/// A context's hold on one channel: the shared state plus the far end.
struct EndLink {
    connected: Arc<AtomicBool>,
    peer: Weak<PortEnd>,
}

impl EndLink {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Disconnects the channel and notifies the far end if it is still
    /// held. Returns `false` if the channel was already down.
    fn sever(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        if let Some(peer) = self.peer.upgrade() {
            peer.notify(PortSignal::Disconnected);
        }
        true
    }
}

/// One end of an in-process channel.
struct PortEnd {
    id: PortId,
    name: String,
    sender: Option<SenderInfo>,
    /// Shared by both ends.
    connected: Arc<AtomicBool>,
    listener: Mutex<Option<PortListener>>,
    peer: Mutex<Weak<PortEnd>>,
}

impl PortEnd {
    /// Creates both ends; the remote one reports the opener as sender.
    fn pair(name: String, sender: SenderInfo) -> (Arc<Self>, Arc<Self>) {
        let connected = Arc::new(AtomicBool::new(true));
        let local = Arc::new(Self {
            id: PortId::next(),
            name: name.clone(),
            sender: None,
            connected: Arc::clone(&connected),
            listener: Mutex::new(None),
            peer: Mutex::new(Weak::new()),
        });
        let remote = Arc::new(Self {
            id: PortId::next(),
            name,
            sender: Some(sender),
            connected,
            listener: Mutex::new(None),
            peer: Mutex::new(Arc::downgrade(&local)),
        });
        *local.peer.lock() = Arc::downgrade(&remote);
        (local, remote)
    }

    fn notify(&self, signal: PortSignal) {
        let listener = self.listener.lock().clone();
        if let Some(listener) = listener {
            listener(signal);
        }
    }

    fn link(&self) -> EndLink {
        EndLink {
            connected: Arc::clone(&self.connected),
            peer: self.peer.lock().clone(),
        }
    }

    fn disconnect_from_here(&self) {
        self.link().sever();
    }
}

/// [`Port`] handle on a [`MemoryNetwork`].
pub struct MemoryPort(Arc<PortEnd>);

impl fmt::Debug for MemoryPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPort")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl MemoryPort {
    /// Returns `true` while neither end has disconnected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }
}

impl Port for MemoryPort {
    fn id(&self) -> PortId {
        self.0.id
    }

    fn name(&self) -> &str {
        &self.0.name
    }

    fn sender(&self) -> Option<SenderInfo> {
        self.0.sender
    }

    fn post_message(&self, envelope: &Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(Error::stale_channel(self.0.id));
        }
        let peer = self.0.peer.lock().upgrade();
        match peer {
            Some(peer) => {
                peer.notify(PortSignal::Message(envelope.clone()));
                Ok(())
            }
            None => Err(Error::stale_channel(self.0.id)),
        }
    }

    fn set_listener(&self, listener: PortListener) {
        *self.0.listener.lock() = Some(listener);
    }

    fn clear_listener(&self) {
        *self.0.listener.lock() = None;
    }

    fn disconnect(&self) {
        self.0.disconnect_from_here();
    }
}

// ============================================================================
// MemoryTabs
// ============================================================================

/// [`TabQuery`] over a fixed window whose active tabs tests control.
#[derive(Debug)]
pub struct MemoryTabs {
    window_id: WindowId,
    active: Mutex<Vec<TabId>>,
}

impl MemoryTabs {
    /// Creates a window with the given active tabs.
    #[must_use]
    pub fn new(window_id: WindowId, active: impl IntoIterator<Item = TabId>) -> Arc<Self> {
        Arc::new(Self {
            window_id,
            active: Mutex::new(active.into_iter().collect()),
        })
    }

    /// Replaces the active tab set.
    pub fn set_active(&self, active: impl IntoIterator<Item = TabId>) {
        *self.active.lock() = active.into_iter().collect();
    }
}

#[async_trait]
impl TabQuery for MemoryTabs {
    async fn active_window(&self) -> Result<WindowInfo> {
        Ok(WindowInfo { id: self.window_id })
    }

    async fn active_tabs(&self, window_id: WindowId) -> Result<Vec<TabInfo>> {
        if window_id != self.window_id {
            return Ok(Vec::new());
        }
        Ok(self
            .active
            .lock()
            .iter()
            .map(|&id| TabInfo { id, active: true })
            .collect())
    }
}

// ============================================================================
// MemoryBridge
// ============================================================================

/// [`HostBridge`] that queues frames on an mpsc channel.
///
/// The receiving half is pumped into the far side's
/// [`Endpoint::receive_from_bridge`](crate::Endpoint::receive_from_bridge).
#[derive(Debug, Clone)]
pub struct MemoryBridge {
    tx: mpsc::UnboundedSender<BridgeFrame>,
}

impl MemoryBridge {
    /// Creates a bridge and the receiver of its frames.
    #[must_use]
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<BridgeFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

impl HostBridge for MemoryBridge {
    fn send(&self, frame: BridgeFrame) -> Result<()> {
        self.tx
            .send(frame)
            .map_err(|_| Error::connection("host bridge closed"))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn tab(id: u32) -> TabId {
        TabId::new(id).unwrap()
    }

    fn collect(port: &Arc<dyn Port>) -> Arc<Mutex<Vec<PortSignal>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        port.set_listener(Arc::new(move |signal| sink.lock().push(signal)));
        seen
    }

    #[tokio::test]
    async fn test_connect_delivers_remote_end_with_sender() {
        let network = MemoryNetwork::new();
        let background = network.transport(MemoryContext::background());
        let content = network.transport(MemoryContext::in_tab(
            Location::ContentScript,
            tab(7),
            WindowId::new(1),
        ));

        let accepted = Arc::new(Mutex::new(Vec::<Arc<dyn Port>>::new()));
        let sink = Arc::clone(&accepted);
        background.on_connect(Arc::new(move |port| sink.lock().push(port)));

        let local = content
            .connect(
                ConnectTarget::Runtime,
                &ChannelName::new(Location::ContentScript),
            )
            .await
            .unwrap();

        let remote = accepted.lock().pop().unwrap();
        assert_eq!(remote.name(), "ContentScript");
        assert_eq!(remote.sender().and_then(|s| s.tab_id), Some(tab(7)));
        assert_ne!(remote.id(), local.id());
        assert_eq!(network.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn test_messages_and_disconnect_reach_peer_only() {
        let network = MemoryNetwork::new();
        let background = network.transport(MemoryContext::background());
        let content = network.transport(MemoryContext::in_tab(
            Location::ContentScript,
            tab(2),
            WindowId::new(1),
        ));

        let accepted = Arc::new(Mutex::new(None::<Arc<dyn Port>>));
        let sink = Arc::clone(&accepted);
        background.on_connect(Arc::new(move |port| *sink.lock() = Some(port)));

        let local = content
            .connect(ConnectTarget::Runtime, &ChannelName::new(Location::ContentScript))
            .await
            .unwrap();
        let remote = accepted.lock().take().unwrap();

        let local_seen = collect(&local);
        let remote_seen = collect(&remote);

        let envelope = Envelope::notify(
            Location::ContentScript,
            Location::BackgroundScript,
            json!("hello"),
        );
        local.post_message(&envelope).unwrap();
        assert!(matches!(
            remote_seen.lock().as_slice(),
            [PortSignal::Message(e)] if e == &envelope
        ));

        local.disconnect();
        assert!(matches!(remote_seen.lock().last(), Some(PortSignal::Disconnected)));
        assert!(local_seen.lock().is_empty());

        let err = remote.post_message(&envelope).unwrap_err();
        assert!(err.is_stale_channel());
    }

    #[tokio::test]
    async fn test_offline_target_refuses() {
        let network = MemoryNetwork::new();
        let background = network.transport(MemoryContext::background());
        background.on_connect(Arc::new(|_| {}));
        network.set_offline(ConnectTarget::Tab(tab(3)), true);

        let result = background
            .connect(
                ConnectTarget::Tab(tab(3)),
                &ChannelName::new(Location::BackgroundScript),
            )
            .await;
        assert!(matches!(result, Err(Error::Connection { .. })));
    }

    #[tokio::test]
    async fn test_drop_context_notifies_peers() {
        let network = MemoryNetwork::new();
        let background = network.transport(MemoryContext::background());
        let content = network.transport(MemoryContext::in_tab(
            Location::ContentScript,
            tab(4),
            WindowId::new(1),
        ));
        content.on_connect(Arc::new(|_| {}));

        let local = background
            .connect(
                ConnectTarget::Tab(tab(4)),
                &ChannelName::new(Location::BackgroundScript),
            )
            .await
            .unwrap();
        let seen = collect(&local);

        network.drop_context(Location::ContentScript, Some(tab(4)));
        assert!(matches!(seen.lock().as_slice(), [PortSignal::Disconnected]));

        let again = background
            .connect(
                ConnectTarget::Tab(tab(4)),
                &ChannelName::new(Location::BackgroundScript),
            )
            .await;
        assert!(again.is_err());
    }

    #[tokio::test]
    async fn test_drop_context_notifies_when_both_ends_held() {
        let network = MemoryNetwork::new();
        let background = network.transport(MemoryContext::background());
        let content = network.transport(MemoryContext::in_tab(
            Location::ContentScript,
            tab(5),
            WindowId::new(1),
        ));
        let accepted = Arc::new(Mutex::new(None::<Arc<dyn Port>>));
        let sink = Arc::clone(&accepted);
        background.on_connect(Arc::new(move |port| *sink.lock() = Some(port)));

        let local = content
            .connect(ConnectTarget::Runtime, &ChannelName::new(Location::ContentScript))
            .await
            .unwrap();
        let remote = accepted.lock().take().unwrap();
        let local_seen = collect(&local);
        let remote_seen = collect(&remote);

        network.drop_context(Location::BackgroundScript, None);

        assert!(matches!(local_seen.lock().as_slice(), [PortSignal::Disconnected]));
        assert!(remote_seen.lock().is_empty());
        assert!(local.post_message(&Envelope::notify(
            Location::ContentScript,
            Location::BackgroundScript,
            json!(null),
        ))
        .unwrap_err()
        .is_stale_channel());
    }

    #[tokio::test]
    async fn test_tabs_and_bridge() {
        let tabs = MemoryTabs::new(WindowId::new(9), [tab(1), tab(2)]);
        let window = tabs.active_window().await.unwrap();
        assert_eq!(window.id, WindowId::new(9));
        assert_eq!(tabs.active_tabs(window.id).await.unwrap().len(), 2);
        assert!(tabs.active_tabs(WindowId::new(1)).await.unwrap().is_empty());

        let (bridge, mut rx) = MemoryBridge::channel();
        let envelope = Envelope::notify(Location::ContentScript, Location::Core, json!(1));
        bridge
            .send(BridgeFrame::new(Some(tab(1)), &envelope).unwrap())
            .unwrap();
        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.dest_location, Location::Core);
    }
}
