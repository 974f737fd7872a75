//! Developer-tools adapters.
//!
//! - [`DevtoolsScriptMessenger`]: the panel page. Dials the background
//!   controller under `"DevtoolsScript:<tab>"` and reaches everything
//!   else through it.
//! - [`DevtoolsPrivateMessenger`]: the frontend internals. Bridge only.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::bus::RouteHint;
use crate::endpoint::{BusOptions, ConnectionState, Endpoint, Responder};
use crate::error::Result;
use crate::identifiers::TabId;
use crate::protocol::{BridgeFrame, Envelope, Location, ResponseCode, RestOfEnvelope};
use crate::transport::{HostBridge, Transport};

// ============================================================================
// DevtoolsScriptMessenger
// ============================================================================

/// Bus adapter of a devtools panel.
#[derive(Debug, Clone)]
pub struct DevtoolsScriptMessenger {
    endpoint: Endpoint,
}

impl DevtoolsScriptMessenger {
    /// Starts the panel endpoint for the panel inspecting `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) on invalid options.
    pub fn new(transport: Arc<dyn Transport>, tab_id: TabId, options: BusOptions) -> Result<Self> {
        let endpoint = Endpoint::builder(Location::DevtoolsScript)
            .tab_id(tab_id)
            .transport(transport)
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

    /// Notifies the background controller.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_background_script(&self, payload: Value) -> Result<()> {
        self.send(Location::BackgroundScript, payload).await
    }

    /// Requests from the background controller.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_background_script(&self, payload: Value) -> Result<Value> {
        self.request(Location::BackgroundScript, payload).await
    }

    /// Notifies the inspected tab's content agent.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_content_script(&self, payload: Value) -> Result<()> {
        self.send(Location::ContentScript, payload).await
    }

    /// Requests from the inspected tab's content agent.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_content_script(&self, payload: Value) -> Result<Value> {
        self.request(Location::ContentScript, payload).await
    }

    /// Notifies the host.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_core(&self, payload: Value) -> Result<()> {
        self.send(Location::Core, payload).await
    }

    /// Requests from the host.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_core(&self, payload: Value) -> Result<Value> {
        self.request(Location::Core, payload).await
    }

    /// Notifies the inspected tab's devtools internals.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_devtools_private(&self, payload: Value) -> Result<()> {
        self.send(Location::DevtoolsPrivate, payload).await
    }

    /// Shuts the endpoint down.
    pub fn shutdown(&self) {
        self.endpoint.shutdown();
    }

    async fn send(&self, destination: Location, payload: Value) -> Result<()> {
        self.endpoint
            .send(destination, payload, RouteHint::none())
            .await
    }

    async fn request(&self, destination: Location, payload: Value) -> Result<Value> {
        self.endpoint
            .request(destination, payload, RouteHint::none())
            .await
    }
}

// ============================================================================
// DevtoolsPrivateMessenger
// ============================================================================

/// Bus adapter of the devtools frontend internals.
///
/// Everything crosses the host bridge; inbound envelopes arrive through
/// [`receive_from_host`](Self::receive_from_host).
#[derive(Debug, Clone)]
pub struct DevtoolsPrivateMessenger {
    endpoint: Endpoint,
}

impl DevtoolsPrivateMessenger {
    /// Starts the endpoint; `tab_id` is the inspected tab, if known.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) on invalid options.
    pub fn new(
        bridge: Arc<dyn HostBridge>,
        tab_id: Option<TabId>,
        options: BusOptions,
    ) -> Result<Self> {
        let mut builder = Endpoint::builder(Location::DevtoolsPrivate)
            .host_bridge(bridge)
            .options(options);
        if let Some(tab_id) = tab_id {
            builder = builder.tab_id(tab_id);
        }
        Ok(Self {
            endpoint: builder.build()?,
        })
    }

    /// Returns the underlying endpoint.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
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

    /// Host entry point.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::receive_from_host`].
    pub fn receive_from_host(
        &self,
        destination: Location,
        response_code: ResponseCode,
        rest: RestOfEnvelope,
    ) -> Result<()> {
        self.endpoint
            .receive_from_host(destination, response_code, rest)
    }

    /// Feeds a frame the host delivered.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::receive_frame`].
    pub fn receive_frame(&self, frame: &BridgeFrame) -> Result<()> {
        self.endpoint.receive_frame(frame)
    }

    /// Notifies the host.
    ///
    /// # Errors
    ///
    /// Returns the bridge error.
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

    /// Notifies the inspected tab's content agent.
    ///
    /// # Errors
    ///
    /// Returns the bridge error.
    pub async fn send_to_content_script(&self, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::ContentScript, payload, RouteHint::none())
            .await
    }

    /// Requests from the inspected tab's content agent.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_content_script(&self, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::ContentScript, payload, RouteHint::none())
            .await
    }

    /// Shuts the endpoint down.
    pub fn shutdown(&self) {
        self.endpoint.shutdown();
    }
}
