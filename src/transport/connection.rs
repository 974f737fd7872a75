//! WebSocket host bridge connection.
//!
//! Carries [`BridgeFrame`]s between a browser-side relay and the host
//! process over one WebSocket, so the host side channel can cross a
//! process boundary.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Outgoing frames queued by [`HostBridge::send`]
//! - Incoming text frames, parsed and handed to the frame handler
//! - Handler attachment
//! - Shutdown and remote close
//!
//! The task owns the handler. Frames arriving before one is attached are
//! held (up to [`MAX_BACKLOG`]) and replayed in arrival order.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::{from_str, to_string};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace, warn};

use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::protocol::BridgeFrame;

use super::HostBridge;

// ============================================================================
// Constants
// ============================================================================

/// Inbound frames held while no handler is attached.
pub const MAX_BACKLOG: usize = 1024;

// ============================================================================
// Types
// ============================================================================

/// Inbound frame callback.
pub type FrameHandler = Arc<dyn Fn(BridgeFrame) + Send + Sync>;

/// Internal commands for the event loop.
enum BridgeCommand {
    /// Write one frame.
    Send(BridgeFrame),
    /// Install the inbound handler and replay the backlog into it.
    Attach(FrameHandler),
    /// Close the socket.
    Shutdown,
}

/// Inbound side of the event loop.
#[derive(Default)]
struct Inbound {
    handler: Option<FrameHandler>,
    backlog: VecDeque<BridgeFrame>,
}

impl Inbound {
    fn dispatch(&mut self, frame: BridgeFrame) {
        match &self.handler {
            Some(handler) => handler(frame),
            None => {
                if self.backlog.len() == MAX_BACKLOG {
                    self.backlog.pop_front();
                    warn!(max = MAX_BACKLOG, "Bridge backlog full, dropping oldest frame");
                }
                trace!(dest = %frame.dest_location, "Holding bridge frame until attach");
                self.backlog.push_back(frame);
            }
        }
    }

    fn attach(&mut self, handler: FrameHandler) {
        if !self.backlog.is_empty() {
            debug!(count = self.backlog.len(), "Replaying held bridge frames");
        }
        for frame in self.backlog.drain(..) {
            handler(frame);
        }
        self.handler = Some(handler);
    }
}

// ============================================================================
// BridgeConnection
// ============================================================================

/// Host bridge over a WebSocket.
///
/// Cloning shares the same socket and event loop.
#[derive(Clone)]
pub struct BridgeConnection {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<BridgeCommand>,
}

impl BridgeConnection {
    /// Creates a connection from an established WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub(crate) fn new<S>(ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(Self::run_event_loop(ws_stream, command_rx));
        Self { command_tx }
    }

    /// Connects to a bridge server as a client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| Error::connection(format!("WebSocket connect to {url} failed: {e}")))?;

        debug!(%url, "Bridge client connected");
        Ok(Self::new(ws_stream))
    }

    /// Sets the callback for inbound frames, replacing any previous one.
    ///
    /// Frames received so far without a handler are replayed into it
    /// first.
    pub fn set_frame_handler(&self, handler: FrameHandler) {
        if self.command_tx.send(BridgeCommand::Attach(handler)).is_err() {
            debug!("Frame handler set on a closed bridge");
        }
    }

    /// Feeds inbound frames into `endpoint`.
    ///
    /// Holds the endpoint weakly; frames arriving after it is dropped are
    /// discarded.
    pub fn attach(&self, endpoint: &Endpoint) {
        let weak = Arc::downgrade(&endpoint.inner);
        self.set_frame_handler(Arc::new(move |frame| {
            let Some(inner) = weak.upgrade() else {
                trace!(dest = %frame.dest_location, "Bridge frame for dropped endpoint");
                return;
            };
            if let Err(e) = (Endpoint { inner }).receive_frame(&frame) {
                warn!(error = %e, "Dropping bridge frame");
            }
        }));
    }

    /// Shuts down the connection gracefully.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(BridgeCommand::Shutdown);
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<BridgeCommand>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let mut inbound = Inbound::default();

        loop {
            tokio::select! {
                message = ws_read.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            match from_str::<BridgeFrame>(&text) {
                                Ok(frame) => inbound.dispatch(frame),
                                Err(e) => warn!(error = %e, "Failed to parse bridge frame"),
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!("Bridge closed by remote");
                            break;
                        }

                        Some(Err(e)) => {
                            error!(error = %e, "Bridge WebSocket error");
                            break;
                        }

                        None => {
                            debug!("Bridge stream ended");
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(BridgeCommand::Send(frame)) => {
                            let json = match to_string(&frame) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!(error = %e, "Failed to serialize bridge frame");
                                    continue;
                                }
                            };
                            if let Err(e) = ws_write.send(Message::Text(json.into())).await {
                                warn!(error = %e, "Failed to write bridge frame");
                                break;
                            }
                            trace!(dest = %frame.dest_location, "Bridge frame sent");
                        }

                        Some(BridgeCommand::Attach(handler)) => inbound.attach(handler),

                        Some(BridgeCommand::Shutdown) => {
                            debug!("Bridge shutdown requested");
                            let _ = ws_write.close().await;
                            break;
                        }

                        None => {
                            debug!("Bridge command channel closed");
                            break;
                        }
                    }
                }
            }
        }

        debug!("Bridge event loop terminated");
    }
}

impl HostBridge for BridgeConnection {
    fn send(&self, frame: BridgeFrame) -> Result<()> {
        self.command_tx
            .send(BridgeCommand::Send(frame))
            .map_err(|_| Error::ConnectionClosed)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use parking_lot::Mutex;
    use serde_json::json;
    use tokio::sync::oneshot;

    use crate::identifiers::TabId;
    use crate::protocol::{Envelope, Location};
    use crate::transport::BridgeServer;

    #[tokio::test]
    async fn test_frames_cross_the_socket() {
        let server = BridgeServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");
        let url = server.ws_url();

        let accept = tokio::spawn(server.accept());
        let client = BridgeConnection::connect(&url).await.expect("connect");
        let host = accept.await.expect("join").expect("accept");

        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        host.set_frame_handler(Arc::new(move |frame| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(frame);
            }
        }));

        let envelope = Envelope::notify(Location::ContentScript, Location::Core, json!({"n": 1}));
        let frame = BridgeFrame::new(TabId::new(3), &envelope).unwrap();
        client.send(frame.clone()).unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), rx)
            .await
            .expect("frame in time")
            .expect("frame");
        assert_eq!(received, frame);

        client.shutdown();
        host.shutdown();
    }

    #[tokio::test]
    async fn test_frames_before_handler_are_replayed_in_order() {
        let server = BridgeServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");
        let url = server.ws_url();

        let accept = tokio::spawn(server.accept());
        let client = BridgeConnection::connect(&url).await.expect("connect");
        let host = accept.await.expect("join").expect("accept");

        for n in 0..3 {
            let envelope = Envelope::notify(Location::ContentScript, Location::Core, json!(n));
            client.send(BridgeFrame::new(TabId::new(3), &envelope).unwrap()).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        host.set_frame_handler(Arc::new(move |frame: BridgeFrame| {
            let payload = frame.envelope().map(|envelope| envelope.payload);
            let _ = tx.send(payload.unwrap_or_default());
        }));

        let envelope = Envelope::notify(Location::ContentScript, Location::Core, json!(3));
        client.send(BridgeFrame::new(TabId::new(3), &envelope).unwrap()).unwrap();

        let mut seen = Vec::new();
        while seen.len() < 4 {
            let payload = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("frame in time")
                .expect("frame");
            seen.push(payload);
        }
        assert_eq!(seen, vec![json!(0), json!(1), json!(2), json!(3)]);

        client.shutdown();
        host.shutdown();
    }

    #[tokio::test]
    async fn test_send_after_shutdown_fails_eventually() {
        let server = BridgeServer::bind(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
            .await
            .expect("bind should succeed");
        let url = server.ws_url();

        let accept = tokio::spawn(server.accept());
        let client = BridgeConnection::connect(&url).await.expect("connect");
        let _host = accept.await.expect("join").expect("accept");

        client.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let envelope = Envelope::notify(Location::ContentScript, Location::Core, json!(null));
        let result = client.send(BridgeFrame::new(None, &envelope).unwrap());
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }
}
