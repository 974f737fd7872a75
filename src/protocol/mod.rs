//! Bus protocol types.
//!
//! This module defines the envelope exchanged between execution contexts
//! and the naming conventions transports rely on.
//!
//! # Protocol Overview
//!
//! | Type | Purpose |
//! |------|---------|
//! | [`Location`] | Logical endpoint identity |
//! | [`Envelope`] | Message with origin, destination, payload, correlation |
//! | [`ChannelName`] | `"<Location>[:<tabId>]"` connection names |
//! | [`BridgeFrame`] | JSON-packed envelope crossing the host boundary |
//! | [`BusEvent`] | Notifications produced by the bus itself |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `bridge` | Host bridge packing |
//! | `channel_name` | Channel naming convention |
//! | `envelope` | Envelope and response codes |
//! | `event` | Typed bus events |
//! | `location` | Location enum |

// ============================================================================
// Submodules
// ============================================================================

/// Host bridge packing.
pub mod bridge;

/// Channel naming convention.
pub mod channel_name;

/// Envelope and response codes.
pub mod envelope;

/// Typed bus events.
pub mod event;

/// Logical endpoint identities.
pub mod location;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::{BridgeFrame, RestOfEnvelope, pack, unpack};
pub use channel_name::ChannelName;
pub use envelope::{Envelope, ResponseCode};
pub use event::BusEvent;
pub use location::Location;
