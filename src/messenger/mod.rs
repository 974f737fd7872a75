//! Per-context bus adapters.
//!
//! Each adapter wraps an [`Endpoint`](crate::Endpoint) configured with
//! the standard routing table of its location and exposes typed
//! `send_to_*` / `request_*` methods.
//!
//! | Adapter | Location | Connection strategy |
//! |---------|----------|---------------------|
//! | [`BackgroundMessenger`] | `BackgroundScript` | Accepts channels, dials tabs on demand |
//! | [`ContentMessenger`] | `ContentScript` | Dials the background, bridge to the host |
//! | [`DevtoolsScriptMessenger`] | `DevtoolsScript` | Dials the background |
//! | [`DevtoolsPrivateMessenger`] | `DevtoolsPrivate` | Bridge only |
//! | [`CoreMessenger`] | `Core` | Bridge only |

// ============================================================================
// Submodules
// ============================================================================

/// Background controller adapter.
pub mod background;

/// Content agent adapter.
pub mod content;

/// Host-side adapter.
pub mod core;

/// Developer-tools adapters.
pub mod devtools;

// ============================================================================
// Re-exports
// ============================================================================

pub use background::BackgroundMessenger;
pub use content::ContentMessenger;
pub use core::CoreMessenger;
pub use devtools::{DevtoolsPrivateMessenger, DevtoolsScriptMessenger};

// ============================================================================
// Tests
// ============================================================================
