//! Host-side adapter.
//!
//! `Core` runs in the host process and talks to the browser only through
//! the host bridge: every outbound envelope becomes a [`BridgeFrame`]
//! addressed to a tab, and every inbound one arrives packed.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::bus::RouteHint;
use crate::endpoint::{BusOptions, Endpoint, Responder};
use crate::error::Result;
use crate::identifiers::TabId;
use crate::protocol::{BridgeFrame, Envelope, Location};
use crate::transport::HostBridge;

// ============================================================================
// CoreMessenger
// ============================================================================

/// Bus adapter of the host process.
#[derive(Debug, Clone)]
pub struct CoreMessenger {
    endpoint: Endpoint,
}

impl CoreMessenger {
    /// Starts the host endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) on invalid options.
    pub fn new(bridge: Arc<dyn HostBridge>, options: BusOptions) -> Result<Self> {
        let endpoint = Endpoint::builder(Location::Core)
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

    /// Feeds a frame received from the browser.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::receive_frame`].
    pub fn receive_frame(&self, frame: &BridgeFrame) -> Result<()> {
        self.endpoint.receive_frame(frame)
    }

    /// Notifies the content agent of `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns the bridge error.
    pub async fn send_to_content_script(&self, tab_id: TabId, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::ContentScript, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Requests from the content agent of `tab_id`.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_content_script(&self, tab_id: TabId, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::ContentScript, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Notifies the background controller through the page of `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns the bridge error.
    pub async fn send_to_background_script(&self, tab_id: TabId, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::BackgroundScript, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Requests from the background controller through the page of
    /// `tab_id`.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_background_script(&self, tab_id: TabId, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::BackgroundScript, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Notifies the devtools internals of `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns the bridge error.
    pub async fn send_to_devtools_private(&self, tab_id: TabId, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::DevtoolsPrivate, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Requests from the devtools internals of `tab_id`.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_devtools_private(&self, tab_id: TabId, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::DevtoolsPrivate, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Shuts the endpoint down.
    pub fn shutdown(&self) {
        self.endpoint.shutdown();
    }
}
