//! Logical endpoint identities.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ============================================================================
// Location
// ============================================================================

/// A logical endpoint on the bus.
///
/// `Core` and `BackgroundScript` exist once per browser session; the
/// other locations exist once per tab.
///
/// Serialized by variant name, which is also the prefix of channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Location {
    /// Privileged host process driving the browser.
    Core,
    /// Persistent background controller of the extension.
    BackgroundScript,
    /// Per-page content agent.
    ContentScript,
    /// Developer-tools panel page.
    DevtoolsScript,
    /// Developer-tools frontend internals, reachable only via the host bridge.
    DevtoolsPrivate,
}

impl Location {
    /// All locations, in declaration order.
    pub const ALL: [Location; 5] = [
        Location::Core,
        Location::BackgroundScript,
        Location::ContentScript,
        Location::DevtoolsScript,
        Location::DevtoolsPrivate,
    ];

    /// Returns the wire name of this location.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Core => "Core",
            Self::BackgroundScript => "BackgroundScript",
            Self::ContentScript => "ContentScript",
            Self::DevtoolsScript => "DevtoolsScript",
            Self::DevtoolsPrivate => "DevtoolsPrivate",
        }
    }

    /// Returns `true` for locations that are singletons per browser session.
    #[inline]
    #[must_use]
    pub const fn is_session_wide(self) -> bool {
        matches!(self, Self::Core | Self::BackgroundScript)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Location {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|location| location.as_str() == s)
            .ok_or_else(|| Error::protocol(format!("Unknown location: {s}")))
    }
}

// ============================================================================
// Tests
// ============================================================================
