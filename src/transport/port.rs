//! Duplex channel abstraction.
//!
//! The bus never talks to a concrete transport. Each context provides a
//! [`Transport`] that can open named channels and announce inbound ones;
//! every channel is a [`Port`] handle with message and disconnect
//! notifications.
//!
//! Disconnect semantics follow extension messaging ports: calling
//! [`Port::disconnect`] notifies the *other* end only.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::{PortId, TabId, WindowId};
use crate::protocol::{ChannelName, Envelope};

// ============================================================================
// Types
// ============================================================================

/// Notification delivered to a port's listener.
#[derive(Debug, Clone)]
pub enum PortSignal {
    /// The peer posted an envelope.
    Message(Envelope),
    /// The peer went away or disconnected the channel.
    Disconnected,
}

/// Listener attached to a port.
///
/// Invoked from the transport's context; implementations should only
/// enqueue work.
pub type PortListener = Arc<dyn Fn(PortSignal) + Send + Sync>;

/// Listener for inbound channel connections.
pub type ConnectListener = Arc<dyn Fn(Arc<dyn Port>) + Send + Sync>;

/// Where the peer that opened a channel lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SenderInfo {
    /// Tab of the opening context, if it is page-scoped.
    pub tab_id: Option<TabId>,
    /// Window of that tab.
    pub window_id: Option<WindowId>,
}

/// Target of an outbound connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectTarget {
    /// The session-wide controller of the extension.
    Runtime,
    /// The content agent of one tab.
    Tab(TabId),
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime => f.write_str("runtime"),
            Self::Tab(tab_id) => write!(f, "tab {tab_id}"),
        }
    }
}

// ============================================================================
// Port
// ============================================================================

/// Handle to one duplex channel.
pub trait Port: Send + Sync + fmt::Debug {
    /// Process-unique identity of this handle.
    fn id(&self) -> PortId;

    /// Name the opening side gave the channel.
    fn name(&self) -> &str;

    /// Location of the opening side, if the transport reports it.
    fn sender(&self) -> Option<SenderInfo>;

    /// Posts an envelope to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleChannel`](crate::Error::StaleChannel) if the
    /// channel is disconnected.
    fn post_message(&self, envelope: &Envelope) -> Result<()>;

    /// Installs the listener, replacing any previous one.
    fn set_listener(&self, listener: PortListener);

    /// Removes the listener.
    fn clear_listener(&self);

    /// Tears the channel down and notifies the peer.
    fn disconnect(&self);
}

// ============================================================================
// Transport
// ============================================================================

/// Channel factory available in one execution context.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens a channel named `name` to `target`.
    ///
    /// Resolves once the transport confirms the channel is open.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if the target
    /// cannot be reached.
    async fn connect(&self, target: ConnectTarget, name: &ChannelName) -> Result<Arc<dyn Port>>;

    /// Installs the listener for channels opened by other contexts.
    fn on_connect(&self, listener: ConnectListener);
}
