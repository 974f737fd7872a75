//! Envelope wire shape and validity predicates.
//!
//! # Format
//!
//! ```json
//! {
//!   "origLocation": "ContentScript",
//!   "destLocation": "BackgroundScript",
//!   "payload": { ... },
//!   "responseCode": "Y",
//!   "responseId": "uuid",
//!   "origTabId": 7
//! }
//! ```
//!
//! | Code | Meaning | `responseId` |
//! |------|---------|--------------|
//! | `Y` | sender awaits a response | required |
//! | `N` | fire-and-forget | absent |
//! | `R` | this envelope is a response | required |

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::{ResponseId, TabId};

use super::Location;

// ============================================================================
// ResponseCode
// ============================================================================

/// Correlation role of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    /// Sender awaits a response.
    Y,
    /// Fire-and-forget.
    N,
    /// This envelope is a response.
    R,
}

// ============================================================================
// Envelope
// ============================================================================

/// The unit of transfer on the bus.
///
/// Immutable once sent: routing may fill in `orig_tab_id` but never
/// touches the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Sending location.
    pub orig_location: Location,

    /// Destination location.
    pub dest_location: Location,

    /// Application payload, opaque to the bus.
    #[serde(default)]
    pub payload: Value,

    /// Correlation role.
    pub response_code: ResponseCode,

    /// Correlation id, present for `Y` and `R`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<ResponseId>,

    /// Tab the request conceptually originated from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_tab_id: Option<TabId>,
}

impl Envelope {
    /// Creates a fire-and-forget envelope.
    #[inline]
    #[must_use]
    pub fn notify(orig: Location, dest: Location, payload: Value) -> Self {
        Self {
            orig_location: orig,
            dest_location: dest,
            payload,
            response_code: ResponseCode::N,
            response_id: None,
            orig_tab_id: None,
        }
    }

    /// Creates a request envelope that expects a response under `id`.
    #[inline]
    #[must_use]
    pub fn request(orig: Location, dest: Location, payload: Value, id: ResponseId) -> Self {
        Self {
            orig_location: orig,
            dest_location: dest,
            payload,
            response_code: ResponseCode::Y,
            response_id: Some(id),
            orig_tab_id: None,
        }
    }

    /// Creates the response to `request`, sent from `responder`.
    ///
    /// Addressed to the request's origin and carrying its tab so the
    /// response can be routed back without independent tab tracking.
    #[inline]
    #[must_use]
    pub fn response_to(request: &Envelope, responder: Location, payload: Value) -> Self {
        Self {
            orig_location: responder,
            dest_location: request.orig_location,
            payload,
            response_code: ResponseCode::R,
            response_id: request.response_id.clone(),
            orig_tab_id: request.orig_tab_id,
        }
    }

    /// Sets the originating tab.
    #[inline]
    #[must_use]
    pub fn with_orig_tab(mut self, tab_id: TabId) -> Self {
        self.orig_tab_id = Some(tab_id);
        self
    }

    /// Returns `true` if this envelope is a response.
    #[inline]
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.response_code == ResponseCode::R
    }

    /// Returns `true` if the sender awaits a response.
    #[inline]
    #[must_use]
    pub fn expects_response(&self) -> bool {
        self.response_code == ResponseCode::Y
    }

    /// Checks that `response_id` is present exactly when the code needs it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] on a mismatch.
    pub fn validate(&self) -> Result<()> {
        match (self.response_code, &self.response_id) {
            (ResponseCode::Y | ResponseCode::R, None) => Err(Error::protocol(format!(
                "{:?} envelope from {} has no responseId",
                self.response_code, self.orig_location
            ))),
            (ResponseCode::N, Some(id)) => Err(Error::protocol(format!(
                "fire-and-forget envelope from {} carries responseId {id}",
                self.orig_location
            ))),
            _ => Ok(()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
