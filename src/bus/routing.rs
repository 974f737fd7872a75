//! Static routing table.
//!
//! Each endpoint knows, per destination, whether it owns a direct
//! channel, must relay through another location's channel, or must cross
//! the host bridge. The table is fixed at build time and validated
//! against the collaborators the endpoint was given, so an unreachable
//! destination is a startup error rather than a silent drop.
//!
//! | From | ContentScript | BackgroundScript | DevtoolsScript | Core | DevtoolsPrivate |
//! |------|---------------|------------------|----------------|------|-----------------|
//! | BackgroundScript | direct, dial tab | - | direct | via ContentScript | via ContentScript |
//! | ContentScript | - | direct, dial runtime | via BackgroundScript | bridge | bridge |
//! | DevtoolsScript | via BackgroundScript | direct, dial runtime | - | via BackgroundScript | via BackgroundScript |
//! | DevtoolsPrivate | bridge | bridge | bridge | bridge | - |
//! | Core | bridge | bridge | unroutable | - | bridge |

// ============================================================================
// Imports
// ============================================================================

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::protocol::Location;

// ============================================================================
// Types
// ============================================================================

/// How an endpoint opens a missing direct channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dial {
    /// Connect to the session-wide controller.
    Runtime,
    /// Connect to the content agent of the destination tab.
    Tab,
}

/// How one destination is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Over a registered channel to the destination itself.
    Direct {
        /// Dial strategy when no channel is registered; `None` means the
        /// peer must connect first.
        dial: Option<Dial>,
    },
    /// Over the channel registered for another location, which forwards.
    Relay(Location),
    /// Across the host bridge.
    Bridge,
}

/// How many channels an endpoint holds per peer location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scope {
    /// One session-wide channel per peer; registry keys carry no tab.
    #[default]
    Single,
    /// One channel per tab and peer.
    PerTab,
}

// ============================================================================
// RoutingTable
// ============================================================================

/// Destination → route mapping of one endpoint.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    scope: Scope,
    routes: FxHashMap<Location, Route>,
}

impl RoutingTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new(scope: Scope) -> Self {
        Self {
            scope,
            routes: FxHashMap::default(),
        }
    }

    /// Returns the standard table of an endpoint at `location`.
    #[must_use]
    pub fn for_location(location: Location) -> Self {
        use Location::*;

        let direct = |dial| Route::Direct { dial };
        match location {
            BackgroundScript => Self::new(Scope::PerTab)
                .with_route(ContentScript, direct(Some(Dial::Tab)))
                .with_route(DevtoolsScript, direct(None))
                .with_route(Core, Route::Relay(ContentScript))
                .with_route(DevtoolsPrivate, Route::Relay(ContentScript)),
            ContentScript => Self::new(Scope::Single)
                .with_route(BackgroundScript, direct(Some(Dial::Runtime)))
                .with_route(DevtoolsScript, Route::Relay(BackgroundScript))
                .with_route(Core, Route::Bridge)
                .with_route(DevtoolsPrivate, Route::Bridge),
            DevtoolsScript => Self::new(Scope::Single)
                .with_route(BackgroundScript, direct(Some(Dial::Runtime)))
                .with_route(ContentScript, Route::Relay(BackgroundScript))
                .with_route(Core, Route::Relay(BackgroundScript))
                .with_route(DevtoolsPrivate, Route::Relay(BackgroundScript)),
            DevtoolsPrivate => Self::new(Scope::Single)
                .with_route(ContentScript, Route::Bridge)
                .with_route(BackgroundScript, Route::Bridge)
                .with_route(DevtoolsScript, Route::Bridge)
                .with_route(Core, Route::Bridge),
            Core => Self::new(Scope::Single)
                .with_route(ContentScript, Route::Bridge)
                .with_route(BackgroundScript, Route::Bridge)
                .with_route(DevtoolsPrivate, Route::Bridge),
        }
    }

    /// Adds or replaces the route to `destination`.
    #[must_use]
    pub fn with_route(mut self, destination: Location, route: Route) -> Self {
        self.routes.insert(destination, route);
        self
    }

    /// Returns the channel scope.
    #[inline]
    #[must_use]
    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns the route to `destination`.
    #[inline]
    #[must_use]
    pub fn route(&self, destination: Location) -> Option<Route> {
        self.routes.get(&destination).copied()
    }

    /// Returns the relay redirections, `destination → carrier`.
    #[must_use]
    pub fn relays(&self) -> FxHashMap<Location, Location> {
        self.routes
            .iter()
            .filter_map(|(&dest, route)| match route {
                Route::Relay(via) => Some((dest, *via)),
                _ => None,
            })
            .collect()
    }

    /// Returns `true` if any destination is reached over a channel.
    #[must_use]
    pub fn uses_channels(&self) -> bool {
        self.routes
            .values()
            .any(|route| !matches!(route, Route::Bridge))
    }

    /// Returns `true` if any destination is reached over the bridge.
    #[must_use]
    pub fn uses_bridge(&self) -> bool {
        self.routes
            .values()
            .any(|route| matches!(route, Route::Bridge))
    }

    /// Returns the dial strategy for a direct channel to `location`.
    #[must_use]
    pub fn dial_for(&self, location: Location) -> Option<Dial> {
        match self.route(location)? {
            Route::Direct { dial } => dial,
            _ => None,
        }
    }

    /// Returns the counterpart a single-channel endpoint keeps a
    /// channel open to, if it dials the session-wide controller.
    #[must_use]
    pub fn initiator_peer(&self) -> Option<Location> {
        if self.scope != Scope::Single {
            return None;
        }
        self.routes
            .iter()
            .filter(|(_, route)| {
                matches!(route, Route::Direct { dial: Some(Dial::Runtime) })
            })
            .map(|(&dest, _)| dest)
            .min()
    }

    /// Checks the table for an endpoint at `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a destination routes to the endpoint
    /// itself, a relay does not point at a direct route, or a route needs
    /// a collaborator that is missing.
    pub fn validate(&self, origin: Location, has_transport: bool, has_bridge: bool) -> Result<()> {
        let mut destinations: Vec<_> = self.routes.keys().copied().collect();
        destinations.sort();

        for dest in destinations {
            if dest == origin {
                return Err(Error::config(format!("{origin} routes to itself")));
            }
            match self.routes[&dest] {
                Route::Relay(via) => match self.route(via) {
                    Some(Route::Direct { .. }) => {}
                    _ => {
                        return Err(Error::config(format!(
                            "relay for {dest} points at {via}, which has no direct route"
                        )));
                    }
                },
                Route::Direct { .. } if !has_transport => {
                    return Err(Error::config(format!(
                        "direct route to {dest} needs a transport"
                    )));
                }
                Route::Bridge if !has_bridge => {
                    return Err(Error::config(format!(
                        "bridge route to {dest} needs a host bridge"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
