//! Host bridge packing.
//!
//! Envelopes crossing the browser/host boundary travel as JSON strings.
//! The host's inbound entry point receives them split into three
//! arguments: destination, response code and the rest of the envelope.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::identifiers::{ResponseId, TabId};

use super::{Envelope, Location, ResponseCode};

// ============================================================================
// Packing
// ============================================================================

/// Serializes an envelope for the host bridge.
///
/// # Errors
///
/// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
pub fn pack(envelope: &Envelope) -> Result<String> {
    Ok(serde_json::to_string(envelope)?)
}

/// Parses and validates an envelope received over the host bridge.
///
/// # Errors
///
/// - [`Error::Json`](crate::Error::Json) if the string is not an envelope
/// - [`Error::Protocol`](crate::Error::Protocol) if correlation fields are inconsistent
pub fn unpack(packed: &str) -> Result<Envelope> {
    let envelope: Envelope = serde_json::from_str(packed)?;
    envelope.validate()?;
    Ok(envelope)
}

// ============================================================================
// RestOfEnvelope
// ============================================================================

/// The envelope fields other than destination and response code.
///
/// Third argument of the host's inbound entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestOfEnvelope {
    /// Sending location.
    pub orig_location: Location,
    /// Application payload.
    #[serde(default)]
    pub payload: Value,
    /// Correlation id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<ResponseId>,
    /// Originating tab.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orig_tab_id: Option<TabId>,
}

impl RestOfEnvelope {
    /// Reassembles the full envelope.
    #[must_use]
    pub fn into_envelope(self, dest_location: Location, response_code: ResponseCode) -> Envelope {
        Envelope {
            orig_location: self.orig_location,
            dest_location,
            payload: self.payload,
            response_code,
            response_id: self.response_id,
            orig_tab_id: self.orig_tab_id,
        }
    }
}

impl From<Envelope> for RestOfEnvelope {
    fn from(envelope: Envelope) -> Self {
        Self {
            orig_location: envelope.orig_location,
            payload: envelope.payload,
            response_id: envelope.response_id,
            orig_tab_id: envelope.orig_tab_id,
        }
    }
}

// ============================================================================
// BridgeFrame
// ============================================================================

/// One outbound hand-off to the host bridge.
///
/// Carries enough addressing for the host side to pick the page or
/// devtools frontend to inject into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeFrame {
    /// Tab the frame concerns, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<TabId>,
    /// Destination of the packed envelope.
    pub dest_location: Location,
    /// JSON-packed envelope.
    pub packed: String,
}

impl BridgeFrame {
    /// Packs `envelope` into a frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if serialization fails.
    pub fn new(tab_id: Option<TabId>, envelope: &Envelope) -> Result<Self> {
        Ok(Self {
            tab_id,
            dest_location: envelope.dest_location,
            packed: pack(envelope)?,
        })
    }

    /// Unpacks the carried envelope.
    ///
    /// # Errors
    ///
    /// See [`unpack`].
    pub fn envelope(&self) -> Result<Envelope> {
        unpack(&self.packed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_pack_unpack() {
        let envelope = Envelope::request(
            Location::ContentScript,
            Location::Core,
            json!({"action": "getState"}),
            ResponseId::generate(),
        );
        let packed = pack(&envelope).unwrap();
        assert_eq!(unpack(&packed).unwrap(), envelope);
    }

    #[test]
    fn test_unpack_rejects_invalid() {
        assert!(unpack("not json").is_err());
        let missing_id = json!({
            "origLocation": "Core",
            "destLocation": "ContentScript",
            "responseCode": "Y"
        });
        assert!(unpack(&missing_id.to_string()).is_err());
    }

    #[test]
    fn test_unpack_accepts_counter_ids() {
        let packed = json!({
            "origLocation": "Core",
            "destLocation": "ContentScript",
            "payload": null,
            "responseCode": "Y",
            "responseId": "42"
        });
        let envelope = unpack(&packed.to_string()).unwrap();
        assert_eq!(envelope.response_id, ResponseId::new("42"));
        assert!(envelope.expects_response());
    }

    #[test]
    fn test_rest_of_envelope_reassembles() {
        let id = ResponseId::generate();
        let rest = RestOfEnvelope {
            orig_location: Location::Core,
            payload: json!(1),
            response_id: Some(id.clone()),
            orig_tab_id: TabId::new(2),
        };
        let envelope = rest.into_envelope(Location::ContentScript, ResponseCode::R);
        assert!(envelope.is_response());
        assert_eq!(envelope.response_id, Some(id));
        assert_eq!(envelope.dest_location, Location::ContentScript);
    }

    #[test]
    fn test_frame_addresses_destination() {
        let envelope = Envelope::notify(
            Location::Core,
            Location::DevtoolsPrivate,
            json!({"event": "x"}),
        );
        let frame = BridgeFrame::new(TabId::new(5), &envelope).unwrap();
        assert_eq!(frame.dest_location, Location::DevtoolsPrivate);
        assert_eq!(frame.envelope().unwrap(), envelope);
    }
}
