//! Context Bus - cross-context message bus for browser-automation
//! extensions.
//!
//! Interconnects the execution contexts of an automation extension and
//! its host process with ordered request/reply semantics over
//! unreliable, asymmetric transports.
//!
//! # Architecture
//!
//! ```text
//!                ┌──────────────────┐
//!                │ BackgroundScript │  one per session
//!                └──┬────────────┬──┘
//!          channel  │            │  channel
//!        ┌──────────▼──┐    ┌────▼───────────┐
//!        │ContentScript│    │ DevtoolsScript │  one per tab
//!        └──────┬──────┘    └────────────────┘
//!   host bridge │
//!        ┌──────▼──────┐    ┌────────────────┐
//!        │    Core     │    │DevtoolsPrivate │  bridge only
//!        └─────────────┘    └────────────────┘
//! ```
//!
//! Key design principles:
//!
//! - Each [`Endpoint`] owns its correlator, channel registry and router
//! - A caller only ever observes a reply, a timeout, or an explicit error
//! - Relay topology lives in an explicit [`RoutingTable`], validated at
//!   build time
//! - Transports are traits; an in-process [`MemoryNetwork`] and a
//!   WebSocket [`BridgeConnection`] ship with the crate
//!
//! # Quick Start
//!
//! ```no_run
//! use context_bus::{
//!     BackgroundMessenger, BusOptions, ContentMessenger, Location, MemoryBridge, MemoryContext,
//!     MemoryNetwork, Result, TabId, WindowId,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let network = MemoryNetwork::new();
//!     let background = BackgroundMessenger::new(
//!         network.transport(MemoryContext::background()),
//!         None,
//!         BusOptions::new(),
//!     )?;
//!     background.on_message(|envelope, responder| {
//!         if let Some(responder) = responder {
//!             responder.respond(json!({"echo": envelope.payload}));
//!         }
//!     })?;
//!
//!     let tab = TabId::new(7).unwrap();
//!     let (bridge, _frames) = MemoryBridge::channel();
//!     let page = ContentMessenger::new(
//!         network.transport(MemoryContext::in_tab(
//!             Location::ContentScript,
//!             tab,
//!             WindowId::new(1),
//!         )),
//!         tab,
//!         bridge,
//!         BusOptions::new(),
//!     )?;
//!
//!     let reply = page.request_background_script(json!("ping")).await?;
//!     println!("Reply: {reply}");
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`bus`] | Correlator, registry, routing table, router |
//! | [`endpoint`] | [`Endpoint`], builder, options, connector |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`messenger`] | Per-context adapters |
//! | [`protocol`] | Envelope, locations, channel names, bridge packing |
//! | [`transport`] | Transport traits and implementations |

// ============================================================================
// Modules
// ============================================================================

/// Per-endpoint bus machinery.
///
/// Correlation, channel registration and routing.
pub mod bus;

/// Bus endpoints and their configuration.
///
/// Use [`Endpoint::builder()`] to create a configured endpoint.
pub mod endpoint;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// Per-context adapters with typed send and request methods.
pub mod messenger;

/// Bus protocol types.
pub mod protocol;

/// Transport traits and implementations.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Bus types
pub use bus::{
    ChannelKey, Correlator, Dial, PendingResponse, PortRegistry, Route, RouteHint, Routed, Router,
    RoutingTable, Scope,
};

// Endpoint types
pub use endpoint::{
    BusOptions, ConnectionState, Endpoint, EndpointBuilder, MessageHandler, Responder,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{PortId, ResponseId, TabId, WindowId};

// Messenger types
pub use messenger::{
    BackgroundMessenger, ContentMessenger, CoreMessenger, DevtoolsPrivateMessenger,
    DevtoolsScriptMessenger,
};

// Protocol types
pub use protocol::{
    BridgeFrame, BusEvent, ChannelName, Envelope, Location, ResponseCode, RestOfEnvelope,
};

// Transport types
pub use transport::{
    BridgeConnection, BridgeServer, ConnectTarget, HostBridge, MemoryBridge, MemoryContext,
    MemoryNetwork, MemoryTabs, Port, TabQuery, Transport,
};
