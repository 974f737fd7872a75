//! WebSocket server for the host bridge.
//!
//! The host process binds a bridge server and the browser-side relay
//! connects to it.
//!
//! # Connection Flow
//!
//! 1. Host binds to `localhost:0` (random port)
//! 2. The relay is told the `ws://` URL out of band
//! 3. Relay connects; the upgraded socket becomes a [`BridgeConnection`]
//! 4. [`BridgeServer::accept_endpoint`] builds the host endpoint on top of
//!    it and attaches it as the frame handler
//! 5. Frames flow both ways until either side shuts down

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, EndpointBuilder};
use crate::error::{Error, Result};

use super::BridgeConnection;

// ============================================================================
// Constants
// ============================================================================

/// Default time to wait for the relay to connect.
pub const DEFAULT_ACCEPT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// BridgeServer
// ============================================================================

/// A bridge server that is bound but not yet connected.
///
/// # Example
///
/// ```ignore
/// use std::net::{IpAddr, Ipv4Addr};
/// use context_bus::transport::BridgeServer;
///
/// let server = BridgeServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;
/// let ws_url = server.ws_url();
///
/// // Hand ws_url to the relay...
///
/// let (core, bridge) = server
///     .accept_endpoint(Endpoint::builder(Location::Core))
///     .await?;
/// ```
#[derive(Debug)]
pub struct BridgeServer {
    /// TCP listener for incoming connections.
    listener: TcpListener,
    /// Address the server is bound to.
    addr: SocketAddr,
    /// How long [`accept`](Self::accept) waits for the relay.
    accept_timeout: Duration,
}

impl BridgeServer {
    /// Binds a bridge server to the specified address and port.
    ///
    /// Use port 0 to let the OS assign a random available port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind(ip: IpAddr, port: u16) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let addr = listener.local_addr()?;

        debug!(%addr, "Bridge server bound");

        Ok(Self {
            listener,
            addr,
            accept_timeout: DEFAULT_ACCEPT_TIMEOUT,
        })
    }

    /// Sets how long [`accept`](Self::accept) waits for the relay.
    #[must_use]
    pub fn with_accept_timeout(mut self, accept_timeout: Duration) -> Self {
        self.accept_timeout = accept_timeout;
        self
    }

    /// Returns the address the server is bound to.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the port the server is bound to.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Returns the WebSocket URL the relay should dial.
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Accepts the relay's connection.
    ///
    /// Frames received before a handler is attached are held by the
    /// connection.
    ///
    /// # Errors
    ///
    /// - [`Error::Connection`] if nothing connects within the accept timeout
    /// - [`Error::Connection`] if the WebSocket upgrade fails
    pub async fn accept(self) -> Result<BridgeConnection> {
        let (stream, peer) = timeout(self.accept_timeout, self.listener.accept())
            .await
            .map_err(|_| {
                Error::connection(format!(
                    "no bridge client within {}ms",
                    self.accept_timeout.as_millis()
                ))
            })??;

        debug!(%peer, "TCP connection accepted");

        let ws_stream = tokio_tungstenite::accept_async(stream)
            .await
            .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

        info!(addr = %self.addr, %peer, "Bridge connection established");

        Ok(BridgeConnection::new(ws_stream))
    }

    /// Accepts the relay's connection and builds a host-side endpoint on it.
    ///
    /// The connection becomes the endpoint's host bridge and the endpoint
    /// is attached as its frame handler before this returns.
    ///
    /// # Errors
    ///
    /// - Any error of [`accept`](Self::accept)
    /// - The builder's error; the connection is shut down in that case
    pub async fn accept_endpoint(
        self,
        builder: EndpointBuilder,
    ) -> Result<(Endpoint, BridgeConnection)> {
        let bridge = self.accept().await?;

        let endpoint = match builder.host_bridge(Arc::new(bridge.clone())).build() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!(error = %e, "Host endpoint rejected, closing bridge");
                bridge.shutdown();
                return Err(e);
            }
        };

        bridge.attach(&endpoint);
        Ok((endpoint, bridge))
    }
}

// ============================================================================
// Tests
// ============================================================================
