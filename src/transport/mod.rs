//! Transport layer.
//!
//! The bus consumes its transports through traits; this module defines
//! them and ships two implementations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Port (duplex, named)    ┌──────────────┐
//! │  Background  │◄─────────────────────────►│   Content    │
//! │  Transport   │   "ContentScript"         │   Transport  │
//! └──────────────┘                           └──────┬───────┘
//!                                                   │ HostBridge
//!                                                   │ (packed JSON)
//!                                            ┌──────▼───────┐
//!                                            │     Core     │
//!                                            └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `port` | [`Port`] and [`Transport`] traits |
//! | `host` | [`TabQuery`] and [`HostBridge`] traits |
//! | `memory` | In-process network, tabs and bridge |
//! | `connection` | WebSocket [`HostBridge`] and its event loop |
//! | `server` | WebSocket bridge server binding and acceptance |

// ============================================================================
// Submodules
// ============================================================================

/// WebSocket host bridge connection.
pub mod connection;

/// Host-side collaborators.
pub mod host;

/// In-process transport.
pub mod memory;

/// Duplex channel abstraction.
pub mod port;

/// WebSocket bridge server.
pub mod server;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{BridgeConnection, FrameHandler};
pub use host::{HostBridge, TabInfo, TabQuery, WindowInfo};
pub use memory::{
    MemoryBridge, MemoryContext, MemoryNetwork, MemoryPort, MemoryTabs, MemoryTransport,
};
pub use port::{
    ConnectListener, ConnectTarget, Port, PortListener, PortSignal, SenderInfo, Transport,
};
pub use server::BridgeServer;
