//! Builder pattern for endpoint configuration.
//!
//! Provides a fluent API for configuring and starting [`Endpoint`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use context_bus::{Endpoint, Location, MemoryBridge};
//!
//! # async fn example() -> context_bus::Result<()> {
//! let (bridge, _frames) = MemoryBridge::channel();
//! let core = Endpoint::builder(Location::Core)
//!     .host_bridge(bridge)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::bus::RoutingTable;
use crate::error::{Error, Result};
use crate::identifiers::TabId;
use crate::protocol::Location;
use crate::transport::{HostBridge, TabQuery, Transport};

use super::core::{Endpoint, EndpointParts};
use super::options::BusOptions;

// ============================================================================
// EndpointBuilder
// ============================================================================

/// Builder for configuring an [`Endpoint`].
///
/// Use [`Endpoint::builder()`] to create one. Without an explicit
/// routing table the standard table of the location is used.
#[derive(Clone)]
pub struct EndpointBuilder {
    /// Location of the endpoint.
    location: Location,
    /// Tab the endpoint lives in.
    tab_id: Option<TabId>,
    /// Timing and capacity.
    options: BusOptions,
    /// Destination routes.
    table: Option<RoutingTable>,
    /// Channel transport.
    transport: Option<Arc<dyn Transport>>,
    /// Active tab lookup.
    tabs: Option<Arc<dyn TabQuery>>,
    /// Host side channel.
    bridge: Option<Arc<dyn HostBridge>>,
}

impl fmt::Debug for EndpointBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointBuilder")
            .field("location", &self.location)
            .field("tab_id", &self.tab_id)
            .field("options", &self.options)
            .field("table", &self.table)
            .field("has_transport", &self.transport.is_some())
            .field("has_tab_query", &self.tabs.is_some())
            .field("has_bridge", &self.bridge.is_some())
            .finish()
    }
}

// ============================================================================
// EndpointBuilder Implementation
// ============================================================================

impl EndpointBuilder {
    /// Creates a builder for an endpoint at `location`.
    #[inline]
    #[must_use]
    pub fn new(location: Location) -> Self {
        Self {
            location,
            tab_id: None,
            options: BusOptions::new(),
            table: None,
            transport: None,
            tabs: None,
            bridge: None,
        }
    }

    /// Sets the tab this endpoint lives in.
    ///
    /// Named into the channels it opens and stamped on its envelopes.
    #[inline]
    #[must_use]
    pub fn tab_id(mut self, tab_id: TabId) -> Self {
        self.tab_id = Some(tab_id);
        self
    }

    /// Sets timing and capacity options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: BusOptions) -> Self {
        self.options = options;
        self
    }

    /// Replaces the standard routing table.
    #[inline]
    #[must_use]
    pub fn routing_table(mut self, table: RoutingTable) -> Self {
        self.table = Some(table);
        self
    }

    /// Sets the channel transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets the active tab lookup used when routing without a tab.
    #[inline]
    #[must_use]
    pub fn tab_query(mut self, tabs: Arc<dyn TabQuery>) -> Self {
        self.tabs = Some(tabs);
        self
    }

    /// Sets the host bridge.
    #[inline]
    #[must_use]
    pub fn host_bridge(mut self, bridge: Arc<dyn HostBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Validates the configuration and starts the endpoint.
    ///
    /// Must be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the routing table is inconsistent or needs
    ///   a collaborator that was not given
    /// - [`Error::Config`] if a timing option is zero where it must not be
    pub fn build(self) -> Result<Endpoint> {
        self.validate_options()?;
        let table = self.validate_table()?;

        Ok(Endpoint::start(EndpointParts {
            location: self.location,
            own_tab: self.tab_id,
            options: self.options,
            table,
            transport: self.transport,
            tabs: self.tabs,
            bridge: self.bridge,
        }))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl EndpointBuilder {
    /// Validates timing and capacity.
    fn validate_options(&self) -> Result<()> {
        if self.options.response_timeout.is_zero() {
            return Err(Error::config(
                "Response timeout must be positive. Use BusOptions::with_response_timeout().",
            ));
        }
        if self.options.max_pending == 0 {
            return Err(Error::config(
                "Pending request cap must be positive. Use BusOptions::with_max_pending().",
            ));
        }
        Ok(())
    }

    /// Resolves and validates the routing table.
    fn validate_table(&self) -> Result<RoutingTable> {
        let table = self
            .table
            .clone()
            .unwrap_or_else(|| RoutingTable::for_location(self.location));

        table.validate(
            self.location,
            self.transport.is_some(),
            self.bridge.is_some(),
        )?;
        Ok(table)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::bus::{Route, Scope};
    use crate::transport::{MemoryBridge, MemoryContext, MemoryNetwork};

    #[test]
    fn test_new_uses_defaults() {
        let builder = EndpointBuilder::new(Location::ContentScript);
        assert_eq!(builder.location, Location::ContentScript);
        assert_eq!(builder.options, BusOptions::default());
        assert!(builder.table.is_none());
        assert!(builder.transport.is_none());
        assert!(builder.bridge.is_none());
    }

    #[test]
    fn test_content_needs_transport_and_bridge() {
        let err = EndpointBuilder::new(Location::ContentScript)
            .validate_table()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let (bridge, _rx) = MemoryBridge::channel();
        let err = EndpointBuilder::new(Location::ContentScript)
            .host_bridge(bridge)
            .validate_table()
            .unwrap_err();
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn test_complete_content_config_validates() {
        let network = MemoryNetwork::new();
        let (bridge, _rx) = MemoryBridge::channel();
        let builder = EndpointBuilder::new(Location::ContentScript)
            .transport(network.transport(MemoryContext::background()))
            .host_bridge(bridge);
        assert!(builder.validate_table().is_ok());
        assert!(builder.validate_options().is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let builder = EndpointBuilder::new(Location::Core)
            .options(BusOptions::new().with_response_timeout(Duration::ZERO));
        assert!(builder.validate_options().is_err());

        let builder =
            EndpointBuilder::new(Location::Core).options(BusOptions::new().with_max_pending(0));
        assert!(builder.validate_options().is_err());
    }

    #[test]
    fn test_custom_table_replaces_standard() {
        let builder = EndpointBuilder::new(Location::Core).routing_table(
            RoutingTable::new(Scope::Single).with_route(Location::ContentScript, Route::Bridge),
        );
        assert!(builder.validate_table().is_err());

        let (bridge, _rx) = MemoryBridge::channel();
        let table = builder.host_bridge(bridge).validate_table().unwrap();
        assert!(table.route(Location::BackgroundScript).is_none());
    }

    #[tokio::test]
    async fn test_build_starts_endpoint() {
        let (bridge, _rx) = MemoryBridge::channel();
        let endpoint = EndpointBuilder::new(Location::Core)
            .host_bridge(bridge)
            .build()
            .unwrap();
        assert_eq!(endpoint.location(), Location::Core);
        assert!(endpoint.connection_state().is_none());
        endpoint.shutdown();
    }
}
