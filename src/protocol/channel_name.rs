//! Channel naming convention.
//!
//! A connecting side names its channel `"<LocationName>[:<tabId>]"` so the
//! accepting side can recover the peer identity and tab scope from the
//! connection name alone.
//!
//! | Name | Location | Tab |
//! |------|----------|-----|
//! | `ContentScript` | `ContentScript` | from the transport's sender info |
//! | `DevtoolsScript:12` | `DevtoolsScript` | `12` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::identifiers::TabId;

use super::Location;

// ============================================================================
// ChannelName
// ============================================================================

/// Parsed transport-level channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelName {
    /// Location of the side that opened the channel.
    pub location: Location,
    /// Tab scope, if the opener stated one.
    pub tab_id: Option<TabId>,
}

impl ChannelName {
    /// Creates a channel name without tab scope.
    #[inline]
    #[must_use]
    pub const fn new(location: Location) -> Self {
        Self {
            location,
            tab_id: None,
        }
    }

    /// Creates a tab-scoped channel name.
    #[inline]
    #[must_use]
    pub const fn for_tab(location: Location, tab_id: TabId) -> Self {
        Self {
            location,
            tab_id: Some(tab_id),
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tab_id {
            Some(tab_id) => write!(f, "{}:{}", self.location, tab_id),
            None => f.write_str(self.location.as_str()),
        }
    }
}

impl FromStr for ChannelName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (location, tab) = match s.split_once(':') {
            Some((location, tab)) => (location, Some(tab)),
            None => (s, None),
        };

        let location = location
            .parse::<Location>()
            .map_err(|_| Error::invalid_channel_name(s))?;

        let tab_id = match tab {
            Some(tab) => Some(
                tab.parse::<TabId>()
                    .map_err(|_| Error::invalid_channel_name(s))?,
            ),
            None => None,
        };

        Ok(Self { location, tab_id })
    }
}

// ============================================================================
// Tests
// ============================================================================
