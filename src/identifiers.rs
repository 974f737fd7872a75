//! Type-safe identifiers for bus entities.
//!
//! Newtype wrappers keep tab ids, window ids, correlation ids and port
//! handles from being mixed up at compile time.
//!
//! | Type | Backing | Source |
//! |------|---------|--------|
//! | [`TabId`] | `NonZeroU32` | Browser tab id (0 is never a valid tab) |
//! | [`WindowId`] | `u32` | Browser window id |
//! | [`ResponseId`] | `Arc<str>` | Opaque token chosen by the requester |
//! | [`PortId`] | `u64` | Process-local counter, one per channel handle |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ============================================================================
// TabId
// ============================================================================

/// Browser tab identifier.
///
/// Tab ids are always positive; `0` is rejected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(NonZeroU32);

impl TabId {
    /// Creates a tab id, returning `None` for `0`.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Option<Self> {
        match NonZeroU32::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TabId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<NonZeroU32>().map(Self)
    }
}

// ============================================================================
// WindowId
// ============================================================================

/// Browser window identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(u32);

impl WindowId {
    /// Creates a window id.
    #[inline]
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ResponseId
// ============================================================================

/// Correlates a request envelope with its response.
///
/// Opaque on the wire: any non-empty string a peer picked is accepted.
/// Ids generated here are v4 UUIDs, so collisions within a browser
/// session are practically impossible.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResponseId(Arc<str>);

impl ResponseId {
    /// Generates a fresh response id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Wraps a token received from a peer; `None` if it is empty.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        (!token.is_empty()).then(|| Self(Arc::from(token)))
    }

    /// Returns the token.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResponseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for ResponseId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ResponseId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let token = String::deserialize(deserializer)?;
        Self::new(token).ok_or_else(|| serde::de::Error::custom("empty responseId"))
    }
}

// ============================================================================
// PortId
// ============================================================================

static NEXT_PORT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one transport channel handle.
///
/// Two handles to the same peer (before and after a reconnect) always
/// carry different ids, which is what lets the registry tell a stale
/// disconnect notification from a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortId(u64);

impl PortId {
    /// Allocates the next process-unique port id.
    #[inline]
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw id.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port-{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
