//! In-process loopback peer.
//!
//! `LoopbackClient` implements the full session contract without a network:
//! it answers every submit after a configurable latency, enforces the
//! per-session outstanding-request window with a semaphore, and routes
//! registered-delivery receipts to bound receiver sessions round-robin.
//! The CLI and the integration tests drive the harness against it; fault
//! injection hooks (bind rejection, mid-flight severing) exist to exercise
//! the harness failure paths.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use barrage_core::{STATUS_OK, SessionConfig, SessionCounters};
use bytes::Bytes;
use rand::Rng;
use tokio::sync::Semaphore;

use crate::error::{BindError, SessionError};
use crate::session::{
    Client, PendingResponse, Receipt, Request, Response, SendFailure, SendOutcome, Session,
    SessionHandler,
};

/// Command status the loopback peer uses when rejecting a bind.
const BIND_REJECT_STATUS: u32 = 13;

/// Command status attached to simulated submit errors.
const SIMULATED_ERROR_STATUS: u32 = 8;

/// Tuning knobs for the loopback peer.
#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Simulated bind handshake duration.
    pub bind_latency: Duration,

    /// Base delay between a submit and its response.
    pub response_latency: Duration,

    /// Upper bound of uniform jitter added to the response latency.
    pub latency_jitter: Duration,

    /// Delay between a successful submit response and its receipt.
    pub receipt_latency: Duration,

    /// If set, every Nth submit (by sequence number) is answered with a
    /// non-success status.
    pub error_every: Option<u64>,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            bind_latency: Duration::from_millis(1),
            response_latency: Duration::from_millis(1),
            latency_jitter: Duration::ZERO,
            receipt_latency: Duration::from_millis(2),
            error_every: None,
        }
    }
}

/// A receiver-capable session registered for receipt routing.
#[derive(Clone)]
struct ReceiverSlot {
    bound: Arc<AtomicBool>,
    handler: Arc<dyn SessionHandler>,
    counters: Arc<SessionCounters>,
}

/// State shared by every session bound through one client.
struct PeerShared {
    config: LoopbackConfig,
    bind_faults: AtomicUsize,
    receivers: Mutex<Vec<ReceiverSlot>>,
    next_receiver: AtomicUsize,
}

impl PeerShared {
    fn lock_receivers(&self) -> std::sync::MutexGuard<'_, Vec<ReceiverSlot>> {
        self.receivers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pick the next bound receiver, round-robin. Unbound slots are
    /// skipped; fully drained lists drop the receipt.
    fn route_receipt(self: &Arc<Self>, reference: u64) {
        let slot = {
            let receivers = self.lock_receivers();
            let live: Vec<&ReceiverSlot> =
                receivers.iter().filter(|s| s.bound.load(Ordering::Acquire)).collect();
            if live.is_empty() {
                tracing::debug!(reference, "no bound receiver for receipt, dropping");
                return;
            }
            let index = self.next_receiver.fetch_add(1, Ordering::Relaxed) % live.len();
            live[index].clone()
        };

        let latency = self.config.receipt_latency;
        tokio::spawn(async move {
            tokio::time::sleep(latency).await;
            if !slot.bound.load(Ordering::Acquire) {
                return;
            }
            let receipt = Receipt { reference, payload: Bytes::from(format!("id:{reference}")) };
            slot.counters.rx_receipt.record_request();
            let ack = slot.handler.on_receipt(&receipt);
            slot.counters.rx_receipt.record_response(ack);
        });
    }
}

/// Client that binds [`LoopbackSession`]s against the in-process peer.
#[derive(Clone)]
pub struct LoopbackClient {
    shared: Arc<PeerShared>,
}

impl Default for LoopbackClient {
    fn default() -> Self {
        Self::new(LoopbackConfig::default())
    }
}

impl LoopbackClient {
    /// Create a loopback client with the given peer behavior.
    pub fn new(config: LoopbackConfig) -> Self {
        Self {
            shared: Arc::new(PeerShared {
                config,
                bind_faults: AtomicUsize::new(0),
                receivers: Mutex::new(Vec::new()),
                next_receiver: AtomicUsize::new(0),
            }),
        }
    }

    /// Reject the next `n` bind attempts with a bind failure.
    pub fn fail_next_binds(&self, n: usize) {
        self.shared.bind_faults.fetch_add(n, Ordering::AcqRel);
    }

    fn take_bind_fault(&self) -> bool {
        self.shared
            .bind_faults
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Client for LoopbackClient {
    type Session = LoopbackSession;

    async fn bind(
        &self,
        config: SessionConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Self::Session, BindError> {
        let handshake = tokio::time::sleep(self.shared.config.bind_latency);
        if tokio::time::timeout(config.connect_timeout, handshake).await.is_err() {
            return Err(BindError::Timeout {
                timeout_ms: config.connect_timeout.as_millis() as u64,
            });
        }

        if self.take_bind_fault() {
            return Err(BindError::Rejected { status: BIND_REJECT_STATUS });
        }

        let window = u32::try_from(config.window_size.max(1)).unwrap_or(u32::MAX);
        let counters = Arc::new(SessionCounters::new());
        let bound = Arc::new(AtomicBool::new(true));

        if config.mode.receives() {
            self.shared.lock_receivers().push(ReceiverSlot {
                bound: Arc::clone(&bound),
                handler: Arc::clone(&handler),
                counters: Arc::clone(&counters),
            });
        }

        tracing::debug!(system_id = %config.system_id, mode = ?config.mode, "session bound");

        Ok(LoopbackSession {
            config,
            shared: Arc::clone(&self.shared),
            counters,
            handler,
            window: Arc::new(Semaphore::new(window as usize)),
            bound,
            sequence: AtomicU64::new(0),
        })
    }
}

/// One bound loopback session.
pub struct LoopbackSession {
    config: SessionConfig,
    shared: Arc<PeerShared>,
    counters: Arc<SessionCounters>,
    handler: Arc<dyn SessionHandler>,
    window: Arc<Semaphore>,
    bound: Arc<AtomicBool>,
    sequence: AtomicU64,
}

impl std::fmt::Debug for LoopbackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackSession")
            .field("config", &self.config)
            .field("bound", &self.bound.load(Ordering::Acquire))
            .field("sequence", &self.sequence.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl LoopbackSession {
    /// Drop the link as a transport failure would: the handler sees an
    /// unexpected close and every in-flight request fails with a closed
    /// channel once its latency elapses.
    pub fn sever(&self) {
        if self.bound.swap(false, Ordering::AcqRel) {
            tracing::debug!(system_id = %self.config.system_id, "link severed");
            self.handler.on_unexpected_close();
        }
    }

    fn response_status(&self, sequence: u64) -> u32 {
        match self.shared.config.error_every {
            Some(n) if n > 0 && sequence % n == 0 => SIMULATED_ERROR_STATUS,
            _ => STATUS_OK,
        }
    }

    fn response_latency(&self) -> Duration {
        let base = self.shared.config.response_latency;
        let jitter = self.shared.config.latency_jitter;
        if jitter.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter.as_micros() as u64);
        base + Duration::from_micros(extra)
    }
}

#[async_trait]
impl Session for LoopbackSession {
    async fn send_async(&self, request: Request) -> Result<PendingResponse, SessionError> {
        if !self.is_bound() {
            return Err(SessionError::NotBound);
        }

        // Window backpressure: blocks until a slot frees up.
        let permit = Arc::clone(&self.window)
            .acquire_owned()
            .await
            .map_err(|_| SessionError::NotBound)?;

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.tx_submit.record_request();

        let (pending, mut resolver) = PendingResponse::channel(sequence);
        let status = self.response_status(sequence);
        let latency = self.response_latency();
        let counters = Arc::clone(&self.counters);
        let handler = Arc::clone(&self.handler);
        let bound = Arc::clone(&self.bound);
        let shared = Arc::clone(&self.shared);
        let want_receipt = request.want_receipt && self.config.registered_receipts;

        tokio::spawn(async move {
            // Holding the permit models the request occupying window space
            // until it reaches a terminal outcome.
            let _permit = permit;

            let deadline = tokio::time::Instant::now() + latency;
            let cancelled = tokio::select! {
                () = tokio::time::sleep_until(deadline) => false,
                explicit = resolver.cancelled() => {
                    if explicit {
                        true
                    } else {
                        // Handle dropped without cancelling; the request
                        // still completes normally.
                        tokio::time::sleep_until(deadline).await;
                        false
                    }
                },
            };

            if cancelled {
                resolver.resolve(SendOutcome::Cancelled);
                return;
            }

            if !bound.load(Ordering::Acquire) {
                resolver.resolve(SendOutcome::Failed(SendFailure::ChannelClosed));
                return;
            }

            let response = Response { sequence, status };
            counters.tx_submit.record_response(status);
            handler.on_response(&response);
            resolver.resolve(SendOutcome::Response(response));

            if want_receipt && status == STATUS_OK {
                shared.route_receipt(sequence);
            }
        });

        Ok(pending)
    }

    fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    async fn unbind(&self, timeout: Duration) {
        // Drain: wait for every window slot, bounded by the unbind timeout.
        let window = u32::try_from(self.config.window_size.max(1)).unwrap_or(u32::MAX);
        let drained = tokio::time::timeout(timeout, self.window.acquire_many(window)).await;
        match drained {
            Ok(_) => tracing::debug!(system_id = %self.config.system_id, "unbound clean"),
            Err(_) => {
                tracing::debug!(system_id = %self.config.system_id, "unbind timed out with requests in flight");
            },
        }
        self.bound.store(false, Ordering::Release);
    }

    fn counters(&self) -> Arc<SessionCounters> {
        Arc::clone(&self.counters)
    }
}

#[cfg(test)]
mod tests {
    use barrage_core::BindMode;

    use super::*;
    use crate::payload::{FixedRequest, RequestSource};

    struct NoopHandler;
    impl SessionHandler for NoopHandler {}

    fn config(mode: BindMode, window: usize) -> SessionConfig {
        SessionConfig { mode, window_size: window, ..SessionConfig::default() }
    }

    #[tokio::test]
    async fn bind_and_answer_one_submit() {
        let client = LoopbackClient::default();
        let session = client
            .bind(config(BindMode::Transmitter, 1), Arc::new(NoopHandler))
            .await
            .expect("bind failed");

        let response = session
            .send_sync(FixedRequest::lorem(false).next_request(), Duration::from_secs(1))
            .await
            .expect("send failed");
        assert!(response.is_ok());

        let snapshot = session.counters().snapshot();
        assert_eq!(snapshot.submit.requests, 1);
        assert_eq!(snapshot.submit.ok(), 1);
    }

    #[tokio::test]
    async fn bind_fault_rejects_with_status() {
        let client = LoopbackClient::default();
        client.fail_next_binds(1);

        let err = client
            .bind(config(BindMode::Transmitter, 1), Arc::new(NoopHandler))
            .await
            .expect_err("bind should fail");
        assert!(matches!(err, BindError::Rejected { status: BIND_REJECT_STATUS }));

        // Only the next bind was poisoned.
        assert!(client.bind(config(BindMode::Transmitter, 1), Arc::new(NoopHandler)).await.is_ok());
    }

    #[tokio::test]
    async fn timeout_cancel_frees_window_capacity() {
        let client = LoopbackClient::new(LoopbackConfig {
            response_latency: Duration::from_secs(60),
            ..LoopbackConfig::default()
        });
        let session = client
            .bind(config(BindMode::Transmitter, 1), Arc::new(NoopHandler))
            .await
            .expect("bind failed");

        let request = FixedRequest::lorem(false).next_request();
        let err = session
            .send_sync(request.clone(), Duration::from_millis(20))
            .await
            .expect_err("should time out");
        assert!(err.is_recoverable());

        // The timed-out request was cancelled, so the single window slot
        // must be available again almost immediately.
        let reissued = tokio::time::timeout(Duration::from_millis(500), session.send_async(request))
            .await
            .expect("window slot was not recovered after cancel");
        assert!(reissued.is_ok());
    }

    #[tokio::test]
    async fn severed_session_fails_in_flight_with_channel_closed() {
        let client = LoopbackClient::new(LoopbackConfig {
            response_latency: Duration::from_millis(50),
            ..LoopbackConfig::default()
        });
        let session = client
            .bind(config(BindMode::Transmitter, 1), Arc::new(NoopHandler))
            .await
            .expect("bind failed");

        let mut pending = session
            .send_async(FixedRequest::lorem(false).next_request())
            .await
            .expect("send failed");
        session.sever();

        let outcome = pending.wait().await.expect("resolver dropped");
        assert_eq!(outcome, SendOutcome::Failed(SendFailure::ChannelClosed));
        assert!(!session.is_bound());
    }

    #[tokio::test]
    async fn receipts_route_to_bound_receiver() {
        let client = LoopbackClient::default();

        let receiver = client
            .bind(config(BindMode::Receiver, 1), Arc::new(NoopHandler))
            .await
            .expect("receiver bind failed");
        let sender = client
            .bind(config(BindMode::Transmitter, 1), Arc::new(NoopHandler))
            .await
            .expect("sender bind failed");

        sender
            .send_sync(FixedRequest::lorem(true).next_request(), Duration::from_secs(1))
            .await
            .expect("send failed");

        // Receipt delivery is asynchronous; poll briefly.
        let mut received = 0;
        for _ in 0..100 {
            received = receiver.counters().snapshot().receipt.requests;
            if received > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(received, 1, "receipt should reach the bound receiver");
        assert_eq!(sender.counters().snapshot().receipt.requests, 0);
    }

    #[tokio::test]
    async fn transceiver_receives_its_own_receipts() {
        let client = LoopbackClient::default();
        let session = client
            .bind(config(BindMode::Transceiver, 1), Arc::new(NoopHandler))
            .await
            .expect("bind failed");

        session
            .send_sync(FixedRequest::lorem(true).next_request(), Duration::from_secs(1))
            .await
            .expect("send failed");

        let mut received = 0;
        for _ in 0..100 {
            received = session.counters().snapshot().receipt.requests;
            if received > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(received, 1);
    }

    #[tokio::test]
    async fn error_every_marks_statuses() {
        let client = LoopbackClient::new(LoopbackConfig {
            error_every: Some(2),
            ..LoopbackConfig::default()
        });
        let session = client
            .bind(config(BindMode::Transmitter, 4), Arc::new(NoopHandler))
            .await
            .expect("bind failed");

        for _ in 0..4 {
            session
                .send_sync(FixedRequest::lorem(false).next_request(), Duration::from_secs(1))
                .await
                .ok();
        }

        let snapshot = session.counters().snapshot();
        assert_eq!(snapshot.submit.requests, 4);
        assert_eq!(snapshot.submit.ok(), 2);
        assert_eq!(snapshot.submit.errors(), 2);
    }

    #[tokio::test]
    async fn unbind_waits_for_in_flight_requests() {
        let client = LoopbackClient::new(LoopbackConfig {
            response_latency: Duration::from_millis(30),
            ..LoopbackConfig::default()
        });
        let session = client
            .bind(config(BindMode::Transmitter, 2), Arc::new(NoopHandler))
            .await
            .expect("bind failed");

        let _pending = session
            .send_async(FixedRequest::lorem(false).next_request())
            .await
            .expect("send failed");

        session.unbind(Duration::from_secs(1)).await;
        assert!(!session.is_bound());
        let snapshot = session.counters().snapshot();
        assert_eq!(snapshot.submit.responses, 1, "unbind should drain the window first");
    }
}
