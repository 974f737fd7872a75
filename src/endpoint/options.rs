//! Endpoint timing and capacity options.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use context_bus::BusOptions;
//!
//! let options = BusOptions::new()
//!     .with_response_timeout(Duration::from_secs(30))
//!     .with_max_pending(500);
//!
//! assert_eq!(options.connect_retry, Duration::from_secs(5));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Default window for a request's response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default delay before retrying a failed connect.
pub const DEFAULT_CONNECT_RETRY: Duration = Duration::from_secs(5);

/// Default delay before reconnecting after the live channel dropped.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default cap on requests awaiting responses.
pub const DEFAULT_MAX_PENDING: usize = 100;

// ============================================================================
// BusOptions
// ============================================================================

/// Timing and capacity configuration of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusOptions {
    /// How long a request waits for its response.
    pub response_timeout: Duration,

    /// Backoff between failed connect attempts of initiating endpoints.
    pub connect_retry: Duration,

    /// Delay before an initiating endpoint reconnects after a disconnect.
    pub reconnect_delay: Duration,

    /// Maximum requests awaiting responses at once.
    pub max_pending: usize,
}

impl Default for BusOptions {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl BusOptions {
    /// Creates options with the default settings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            connect_retry: DEFAULT_CONNECT_RETRY,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_pending: DEFAULT_MAX_PENDING,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl BusOptions {
    /// Sets the response window.
    #[inline]
    #[must_use]
    pub const fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Sets the connect retry backoff.
    #[inline]
    #[must_use]
    pub const fn with_connect_retry(mut self, backoff: Duration) -> Self {
        self.connect_retry = backoff;
        self
    }

    /// Sets the reconnect delay.
    #[inline]
    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Sets the pending request cap.
    #[inline]
    #[must_use]
    pub const fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================
