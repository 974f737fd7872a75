//! Host-side collaborators: tab queries and the side-channel bridge.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::{TabId, WindowId};
use crate::protocol::BridgeFrame;

// ============================================================================
// Tab Query
// ============================================================================

/// A browser window as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowInfo {
    /// Window id.
    pub id: WindowId,
}

/// A browser tab as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabInfo {
    /// Tab id.
    pub id: TabId,
    /// Whether the tab is the active one of its window.
    pub active: bool,
}

/// Window/tab lookup used when a message has no tab hint.
#[async_trait]
pub trait TabQuery: Send + Sync {
    /// Returns the current (or last focused) window.
    async fn active_window(&self) -> Result<WindowInfo>;

    /// Returns the active tabs of `window_id`.
    async fn active_tabs(&self, window_id: WindowId) -> Result<Vec<TabInfo>>;
}

// ============================================================================
// Host Bridge
// ============================================================================

/// Outbound half of the host side channel.
///
/// Contexts with no duplex channel to their peer hand packed envelopes
/// to the host through this function-call bridge. The inbound half is
/// [`Endpoint::receive_from_bridge`](crate::Endpoint::receive_from_bridge).
pub trait HostBridge: Send + Sync {
    /// Hands one frame to the far side. Must not block.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`](crate::Error::Connection) if the far
    /// side is gone.
    fn send(&self, frame: BridgeFrame) -> Result<()>;
}
