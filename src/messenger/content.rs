//! Content agent adapter.
//!
//! One per tab. Keeps a channel to the background controller alive,
//! crosses the host bridge for `Core` and `DevtoolsPrivate`, and reaches
//! the devtools panel through the background controller.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::bus::RouteHint;
use crate::endpoint::{BusOptions, ConnectionState, Endpoint, Responder};
use crate::error::Result;
use crate::identifiers::TabId;
use crate::protocol::{BridgeFrame, Envelope, Location};
use crate::transport::{HostBridge, Transport};

// ============================================================================
// ContentMessenger
// ============================================================================

/// Bus adapter of a content agent.
#[derive(Debug, Clone)]
pub struct ContentMessenger {
    endpoint: Endpoint,
}

impl ContentMessenger {
    /// Starts the content endpoint of `tab_id` and begins connecting to
    /// the background controller.
    ///
    /// Everything the agent sends carries `tab_id`, so replies crossing
    /// the host bridge can be addressed back to this page.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) on invalid options.
    pub fn new(
        transport: Arc<dyn Transport>,
        tab_id: TabId,
        bridge: Arc<dyn HostBridge>,
        options: BusOptions,
    ) -> Result<Self> {
        let endpoint = Endpoint::builder(Location::ContentScript)
            .tab_id(tab_id)
            .transport(transport)
            .host_bridge(bridge)
            .options(options)
            .build()?;
        Ok(Self { endpoint })
    }

    /// Returns the underlying endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the state of the channel to the background controller.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.endpoint
            .connection_state()
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Installs the inbound message handler.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyRegistered`](crate::Error::AlreadyRegistered)
    /// on a second call.
    pub fn on_message<F>(&self, handler: F) -> Result<()>
    where
        F: Fn(Envelope, Option<Responder>) + Send + Sync + 'static,
    {
        self.endpoint.on_message(handler)
    }

    /// Feeds a frame the host injected into this page.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::receive_frame`].
    pub fn receive_frame(&self, frame: &BridgeFrame) -> Result<()> {
        self.endpoint.receive_frame(frame)
    }

    /// Notifies the background controller.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_background_script(&self, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::BackgroundScript, payload, RouteHint::none())
            .await
    }

    /// Requests from the background controller.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_background_script(&self, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::BackgroundScript, payload, RouteHint::none())
            .await
    }

    /// Notifies this tab's devtools panel.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_devtools_script(&self, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::DevtoolsScript, payload, RouteHint::none())
            .await
    }

    /// Requests from this tab's devtools panel.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_devtools_script(&self, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::DevtoolsScript, payload, RouteHint::none())
            .await
    }

    /// Notifies the host.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_core(&self, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::Core, payload, RouteHint::none())
            .await
    }

    /// Requests from the host.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_core(&self, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::Core, payload, RouteHint::none())
            .await
    }

    /// Notifies this tab's devtools internals.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_devtools_private(&self, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::DevtoolsPrivate, payload, RouteHint::none())
            .await
    }

    /// Requests from this tab's devtools internals.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_devtools_private(&self, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::DevtoolsPrivate, payload, RouteHint::none())
            .await
    }

    /// Shuts the endpoint down.
    pub fn shutdown(&self) {
        self.endpoint.shutdown();
    }
}
