//! Bus-level notification payloads.
//!
//! Application payloads are opaque to the bus; these are the few the bus
//! itself produces. They are a closed tagged enum, dispatched by `match`.
//!
//! | Event | Producer | Consumer |
//! |-------|----------|----------|
//! | `OnTabIdentify` | background controller | `Core` |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{TabId, WindowId};

// ============================================================================
// BusEvent
// ============================================================================

/// Notification generated by the bus.
///
/// # Format
///
/// ```json
/// { "event": "OnTabIdentify", "tabId": 7, "windowId": 1 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
#[non_exhaustive]
pub enum BusEvent {
    /// A content agent connected to the background controller.
    #[serde(rename = "OnTabIdentify", rename_all = "camelCase")]
    TabIdentify {
        /// Tab hosting the content agent.
        tab_id: TabId,
        /// Window containing the tab, when the transport reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_id: Option<WindowId>,
    },
}

impl BusEvent {
    /// Converts the event into an envelope payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn to_payload(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Recognizes a bus event inside an arbitrary payload.
    ///
    /// Returns `None` for application payloads.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Option<Self> {
        serde_json::from_value(payload.clone()).ok()
    }
}

// ============================================================================
// Tests
// ============================================================================
