//! Bus endpoints.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Endpoint`] | One location's presence on the bus |
//! | [`EndpointBuilder`] | Fluent configuration builder |
//! | [`BusOptions`] | Timeouts, backoff and capacity |
//! | [`Responder`] | Reply handle passed to message handlers |
//! | [`Connector`] | Keeps an initiator's channel alive |

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for endpoint configuration.
pub mod builder;

/// Initiator connection state machine.
pub mod connector;

/// Endpoint, event loop and responder.
pub mod core;

/// Timing and capacity options.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::EndpointBuilder;
pub use connector::{ConnectionState, Connector};
pub use core::{Endpoint, MessageHandler, Responder};
pub use options::BusOptions;
