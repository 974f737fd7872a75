//! Error types for the context bus.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use context_bus::{Location, Result};
//!
//! async fn example(endpoint: &Endpoint) -> Result<()> {
//!     let state = endpoint.request(Location::Core, json!({"action": "state"}), None).await?;
//!     println!("{state}");
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Setup | [`Error::AlreadyRegistered`], [`Error::Config`] |
//! | Correlation | [`Error::DanglingResponse`], [`Error::RequestTimedOut`], [`Error::TooManyPending`] |
//! | Routing | [`Error::DeliveryFailed`], [`Error::Unroutable`], [`Error::StaleChannel`] |
//! | Protocol | [`Error::Protocol`], [`Error::InvalidChannelName`] |
//! | Connection | [`Error::Connection`], [`Error::ConnectionClosed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio::sync::oneshot::error::RecvError;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::{PortId, ResponseId};
use crate::protocol::Location;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Setup Errors
    // ========================================================================
    /// A second inbound handler was installed on one endpoint.
    ///
    /// Signals a programming error; fatal at setup time.
    #[error("Message handler already registered for {location}")]
    AlreadyRegistered {
        /// Endpoint that already had a handler.
        location: Location,
    },

    /// Endpoint configuration error.
    ///
    /// Returned when the routing table or collaborators are inconsistent.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Correlation Errors
    // ========================================================================
    /// A response arrived with no matching pending request.
    ///
    /// Either it came after the timeout or its id was never issued.
    /// Logged and dropped by endpoints.
    #[error("Dangling response: {response_id}")]
    DanglingResponse {
        /// The unmatched response id.
        response_id: ResponseId,
    },

    /// No response arrived within the correlation window.
    #[error("Request {response_id} timed out after {timeout_ms}ms")]
    RequestTimedOut {
        /// The request that timed out.
        response_id: ResponseId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Too many requests awaiting responses.
    #[error("Too many pending requests: {pending}/{max}")]
    TooManyPending {
        /// Currently pending requests.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    // ========================================================================
    // Routing Errors
    // ========================================================================
    /// Routing could not reach the destination after the bounded retry.
    #[error("Delivery to {destination} failed: {reason}")]
    DeliveryFailed {
        /// Intended destination.
        destination: Location,
        /// Why delivery failed.
        reason: String,
    },

    /// The routing table has no path to the destination.
    #[error("No route from {from} to {to}")]
    Unroutable {
        /// Routing endpoint.
        from: Location,
        /// Requested destination.
        to: Location,
    },

    /// Posting on a channel whose peer is gone.
    ///
    /// Internal signal; the router turns it into one re-route attempt.
    #[error("Stale channel: {port_id}")]
    StaleChannel {
        /// The disconnected channel handle.
        port_id: PortId,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Protocol violation or malformed envelope.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    /// Channel name does not follow `"<Location>[:<tabId>]"`.
    #[error("Invalid channel name: {name:?}")]
    InvalidChannelName {
        /// The offending name.
        name: String,
    },

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Channel or bridge connection failed.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Endpoint or connection shut down while work was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// Channel receive error.
    #[error("Channel closed")]
    ChannelClosed(#[from] RecvError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an already-registered error.
    #[inline]
    pub fn already_registered(location: Location) -> Self {
        Self::AlreadyRegistered { location }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a dangling response error.
    #[inline]
    pub fn dangling_response(response_id: ResponseId) -> Self {
        Self::DanglingResponse { response_id }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timed_out(response_id: ResponseId, timeout_ms: u64) -> Self {
        Self::RequestTimedOut {
            response_id,
            timeout_ms,
        }
    }

    /// Creates a delivery failed error.
    #[inline]
    pub fn delivery_failed(destination: Location, reason: impl Into<String>) -> Self {
        Self::DeliveryFailed {
            destination,
            reason: reason.into(),
        }
    }

    /// Creates an unroutable error.
    #[inline]
    pub fn unroutable(from: Location, to: Location) -> Self {
        Self::Unroutable { from, to }
    }

    /// Creates a stale channel error.
    #[inline]
    pub fn stale_channel(port_id: PortId) -> Self {
        Self::StaleChannel { port_id }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates an invalid channel name error.
    #[inline]
    pub fn invalid_channel_name(name: impl Into<String>) -> Self {
        Self::InvalidChannelName { name: name.into() }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::RequestTimedOut { .. })
    }

    /// Returns `true` if this is the internal stale-channel signal.
    #[inline]
    #[must_use]
    pub fn is_stale_channel(&self) -> bool {
        matches!(self, Self::StaleChannel { .. })
    }

    /// Returns `true` if the destination could not be reached.
    #[inline]
    #[must_use]
    pub fn is_delivery_error(&self) -> bool {
        matches!(
            self,
            Self::DeliveryFailed { .. } | Self::Unroutable { .. } | Self::StaleChannel { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::ConnectionClosed | Self::WebSocket(_)
        )
    }

    /// Returns `true` if this error is recoverable.
    ///
    /// Recoverable errors may succeed on retry once the peer reconnects.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::RequestTimedOut { .. }
                | Self::DeliveryFailed { .. }
                | Self::StaleChannel { .. }
                | Self::Connection { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::delivery_failed(Location::ContentScript, "no active tab");
        assert_eq!(
            err.to_string(),
            "Delivery to ContentScript failed: no active tab"
        );
    }

    #[test]
    fn test_already_registered_display() {
        let err = Error::already_registered(Location::BackgroundScript);
        assert_eq!(
            err.to_string(),
            "Message handler already registered for BackgroundScript"
        );
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::request_timed_out(ResponseId::generate(), 10_000);
        let other_err = Error::connection("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_delivery_error() {
        assert!(Error::delivery_failed(Location::Core, "x").is_delivery_error());
        assert!(Error::unroutable(Location::Core, Location::DevtoolsScript).is_delivery_error());
        assert!(Error::stale_channel(PortId::next()).is_delivery_error());
        assert!(!Error::config("x").is_delivery_error());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::request_timed_out(ResponseId::generate(), 1).is_recoverable());
        assert!(!Error::already_registered(Location::Core).is_recoverable());
        assert!(!Error::config("test").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
