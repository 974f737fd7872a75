//! Background controller adapter.
//!
//! The background controller is session-wide and keeps one channel per
//! tab and peer. It accepts channels from content agents and devtools
//! panels, dials content agents on demand, and reaches `Core` and
//! `DevtoolsPrivate` through the tab's content agent.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use serde_json::Value;

use crate::bus::RouteHint;
use crate::endpoint::{BusOptions, Endpoint, Responder};
use crate::error::Result;
use crate::identifiers::TabId;
use crate::protocol::{Envelope, Location};
use crate::transport::{TabQuery, Transport};

// ============================================================================
// BackgroundMessenger
// ============================================================================

/// Bus adapter of the background controller.
#[derive(Debug, Clone)]
pub struct BackgroundMessenger {
    endpoint: Endpoint,
}

impl BackgroundMessenger {
    /// Starts the background endpoint.
    ///
    /// `tabs` is needed only for sends without a tab.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) on invalid options.
    pub fn new(
        transport: Arc<dyn Transport>,
        tabs: Option<Arc<dyn TabQuery>>,
        options: BusOptions,
    ) -> Result<Self> {
        let mut builder = Endpoint::builder(Location::BackgroundScript)
            .transport(transport)
            .options(options);
        if let Some(tabs) = tabs {
            builder = builder.tab_query(tabs);
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

    /// Notifies the content agent of `tab_id`, or of every active tab when
    /// no tab is given.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_content_script(
        &self,
        tab_id: Option<TabId>,
        payload: Value,
    ) -> Result<()> {
        self.endpoint
            .send(Location::ContentScript, payload, RouteHint::tab_or_all(tab_id))
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

    /// Notifies the devtools panel inspecting `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_devtools_script(&self, tab_id: TabId, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::DevtoolsScript, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Requests from the devtools panel inspecting `tab_id`.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_devtools_script(&self, tab_id: TabId, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::DevtoolsScript, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Notifies the host through the content agent of `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
    pub async fn send_to_core(&self, tab_id: TabId, payload: Value) -> Result<()> {
        self.endpoint
            .send(Location::Core, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Requests from the host through the content agent of `tab_id`.
    ///
    /// # Errors
    ///
    /// See [`Endpoint::request`].
    pub async fn request_core(&self, tab_id: TabId, payload: Value) -> Result<Value> {
        self.endpoint
            .request(Location::Core, payload, RouteHint::tab(tab_id))
            .await
    }

    /// Notifies the devtools internals of `tab_id`.
    ///
    /// # Errors
    ///
    /// Returns the routing error.
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
