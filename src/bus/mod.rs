//! Per-endpoint bus machinery.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `correlator` | Pending requests, timeouts, response matching |
//! | `registry` | Live channel handles keyed by tab and peer |
//! | `routing` | Static destination → route table |
//! | `router` | Per-envelope delivery decision with bounded retry |

// ============================================================================
// Submodules
// ============================================================================

/// Request/response correlation.
pub mod correlator;

/// Channel registry.
pub mod registry;

/// Envelope routing.
pub mod router;

/// Routing table.
pub mod routing;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Re-exports
// ============================================================================

pub use correlator::{Correlator, PendingResponse};
pub use registry::{ChannelEvent, ChannelKey, ChannelSink, PortRegistry};
pub use router::{RouteHint, Routed, Router};
pub use routing::{Dial, Route, RoutingTable, Scope};
