//! Request/response correlation.
//!
//! Each endpoint owns one [`Correlator`]. Registering a request yields a
//! fresh [`ResponseId`] to embed in the outgoing envelope and a
//! [`PendingResponse`] future for the caller. Exactly one of these ends
//! the entry:
//!
//! - a matching response arrives ([`Correlator::resolve`])
//! - the timer fires ([`Error::RequestTimedOut`])
//! - delivery fails up front ([`Correlator::fail`])
//!
//! Removal from the map is the single point of truth, so a response
//! racing its own timeout is delivered at most once.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::identifiers::ResponseId;

// ============================================================================
// Types
// ============================================================================

/// One outstanding request.
struct PendingEntry {
    /// Completes the caller's future.
    tx: oneshot::Sender<Result<Value>>,
    /// Timeout task, aborted on resolve.
    timer: JoinHandle<()>,
}

/// Map of response IDs to pending entries.
type PendingMap = FxHashMap<ResponseId, PendingEntry>;

// ============================================================================
// PendingResponse
// ============================================================================

/// Future resolving to the response payload or a correlation error.
///
/// Dropping it abandons the result; the entry still ends by response or
/// timeout.
#[must_use = "the response is lost unless awaited"]
pub struct PendingResponse {
    response_id: ResponseId,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingResponse {
    /// Returns the correlation id of this request.
    #[inline]
    #[must_use]
    pub fn response_id(&self) -> &ResponseId {
        &self.response_id
    }
}

impl Future for PendingResponse {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.rx.poll_unpin(cx).map(|outcome| match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::ConnectionClosed),
        })
    }
}

// ============================================================================
// Correlator
// ============================================================================

/// Per-endpoint table of requests awaiting responses.
///
/// Timers run as tokio tasks, so a runtime must be active when
/// registering.
#[derive(Clone)]
pub struct Correlator {
    pending: Arc<Mutex<PendingMap>>,
    timeout: Duration,
    max_pending: usize,
}

impl Correlator {
    /// Creates a correlator with the given response window and capacity.
    #[must_use]
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self {
            pending: Arc::new(Mutex::new(PendingMap::default())),
            timeout,
            max_pending,
        }
    }

    /// Returns the response window.
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the number of requests awaiting responses.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Returns `true` if `response_id` is still awaiting its response.
    #[inline]
    #[must_use]
    pub fn is_pending(&self, response_id: &ResponseId) -> bool {
        self.pending.lock().contains_key(response_id)
    }

    /// Allocates a response id and arms its timer.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TooManyPending`] at capacity.
    pub fn register(&self) -> Result<(ResponseId, PendingResponse)> {
        let mut pending = self.pending.lock();
        if pending.len() >= self.max_pending {
            warn!(
                pending = pending.len(),
                max = self.max_pending,
                "Too many pending requests"
            );
            return Err(Error::TooManyPending {
                pending: pending.len(),
                max: self.max_pending,
            });
        }

        let response_id = ResponseId::generate();
        let (tx, rx) = oneshot::channel();
        let timer = tokio::spawn(Self::expire(
            Arc::downgrade(&self.pending),
            response_id.clone(),
            self.timeout,
        ));

        pending.insert(response_id.clone(), PendingEntry { tx, timer });
        trace!(%response_id, "Request registered");

        let handle = PendingResponse {
            response_id: response_id.clone(),
            rx,
        };
        Ok((response_id, handle))
    }

    /// Completes a pending request with its response payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DanglingResponse`] if nothing is waiting for
    /// `response_id` (already timed out, or never issued).
    pub fn resolve(&self, response_id: &ResponseId, payload: Value) -> Result<()> {
        let entry = self
            .pending
            .lock()
            .remove(response_id)
            .ok_or_else(|| Error::dangling_response(response_id.clone()))?;

        entry.timer.abort();
        if entry.tx.send(Ok(payload)).is_err() {
            trace!(%response_id, "Response arrived after caller gave up");
        }
        Ok(())
    }

    /// Completes a pending request with an error.
    ///
    /// Returns `false` if the request was no longer pending.
    pub fn fail(&self, response_id: &ResponseId, error: Error) -> bool {
        let Some(entry) = self.pending.lock().remove(response_id) else {
            return false;
        };
        entry.timer.abort();
        let _ = entry.tx.send(Err(error));
        true
    }

    /// Fails every pending request with [`Error::ConnectionClosed`].
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        let count = drained.len();

        for (_, entry) in drained {
            entry.timer.abort();
            let _ = entry.tx.send(Err(Error::ConnectionClosed));
        }

        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }

    /// Timer body: removes the entry and reports the timeout.
    async fn expire(
        pending: std::sync::Weak<Mutex<PendingMap>>,
        response_id: ResponseId,
        window: Duration,
    ) {
        tokio::time::sleep(window).await;

        let Some(pending) = pending.upgrade() else {
            return;
        };
        let entry = pending.lock().remove(&response_id);

        if let Some(entry) = entry {
            let timeout_ms = window.as_millis() as u64;
            warn!(%response_id, timeout_ms, "Response not received in time");
            let _ = entry
                .tx
                .send(Err(Error::request_timed_out(response_id, timeout_ms)));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;
    use tokio_test::{assert_pending, assert_ready, task};

    const WINDOW: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_resolve_delivers_payload() {
        let correlator = Correlator::new(WINDOW, 100);
        let (id, pending) = correlator.register().unwrap();
        assert_eq!(pending.response_id(), &id);

        correlator.resolve(&id, json!("pong")).unwrap();
        assert_eq!(pending.await.unwrap(), json!("pong"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_until_resolved() {
        let correlator = Correlator::new(WINDOW, 100);
        let (id, pending) = correlator.register().unwrap();
        let mut pending = task::spawn(pending);
        assert_pending!(pending.poll());

        correlator.resolve(&id, json!(42)).unwrap();
        assert!(pending.is_woken());
        let payload = assert_ready!(pending.poll());
        assert_eq!(payload.unwrap(), json!(42));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_surfaces_to_caller() {
        let correlator = Correlator::new(WINDOW, 100);
        let (id, pending) = correlator.register().unwrap();

        let err = pending.await.unwrap_err();
        assert!(matches!(
            err,
            Error::RequestTimedOut { response_id, timeout_ms: 10_000 } if response_id == id
        ));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_is_dangling() {
        let correlator = Correlator::new(WINDOW, 100);
        let (id, pending) = correlator.register().unwrap();
        assert!(pending.await.unwrap_err().is_timeout());

        let err = correlator.resolve(&id, json!(1)).unwrap_err();
        assert!(matches!(err, Error::DanglingResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_id_is_dangling() {
        let correlator = Correlator::new(WINDOW, 100);
        let err = correlator
            .resolve(&ResponseId::generate(), Value::Null)
            .unwrap_err();
        assert!(matches!(err, Error::DanglingResponse { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_cross_talk() {
        let correlator = Correlator::new(WINDOW, 100);
        let (first_id, first) = correlator.register().unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        let (second_id, second) = correlator.register().unwrap();

        correlator.resolve(&second_id, json!("second")).unwrap();
        assert_eq!(second.await.unwrap(), json!("second"));
        assert!(correlator.is_pending(&first_id));

        // First still times out on its own schedule.
        let err = first.await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_request_never_times_out() {
        let correlator = Correlator::new(WINDOW, 100);
        let (id, pending) = correlator.register().unwrap();
        correlator.resolve(&id, json!(true)).unwrap();

        tokio::time::advance(WINDOW * 2).await;
        assert_eq!(pending.await.unwrap(), json!(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_completes_once() {
        let correlator = Correlator::new(WINDOW, 100);
        let (id, pending) = correlator.register().unwrap();

        assert!(correlator.fail(
            &id,
            Error::delivery_failed(crate::protocol::Location::Core, "gone")
        ));
        assert!(!correlator.fail(&id, Error::ConnectionClosed));
        assert!(pending.await.unwrap_err().is_delivery_error());
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_limit() {
        let correlator = Correlator::new(WINDOW, 2);
        let _a = correlator.register().unwrap();
        let _b = correlator.register().unwrap();
        assert!(matches!(
            correlator.register(),
            Err(Error::TooManyPending { pending: 2, max: 2 })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_fails_all() {
        let correlator = Correlator::new(WINDOW, 100);
        let (_, a) = correlator.register().unwrap();
        let (_, b) = correlator.register().unwrap();

        correlator.shutdown();
        assert!(matches!(a.await, Err(Error::ConnectionClosed)));
        assert!(matches!(b.await, Err(Error::ConnectionClosed)));
        assert_eq!(correlator.pending_count(), 0);
    }
}
