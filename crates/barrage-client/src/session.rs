//! The session capability and its value types.
//!
//! A `Session` is an opaque handle to one bound protocol connection. It
//! owns the outstanding-request window: an asynchronous send blocks while
//! the window is full, and returns a [`PendingResponse`] handle that the
//! transport later resolves with exactly one terminal outcome. Response
//! delivery happens on the transport's execution context and is surfaced
//! to the owner through the [`SessionHandler`] callbacks plus the handle.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use barrage_core::{STATUS_OK, SessionConfig, SessionCounters};
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::correlate::send_and_await;
use crate::error::{BindError, CorrelationError, SessionError};

/// An outbound submit request.
#[derive(Debug, Clone)]
pub struct Request {
    /// Source address presented to the peer.
    pub source: String,

    /// Destination address.
    pub dest: String,

    /// Message payload.
    pub payload: Bytes,

    /// Whether the peer should produce a delivery receipt.
    pub want_receipt: bool,
}

/// A correlated response to a submit request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Per-session sequence number of the request this answers.
    pub sequence: u64,

    /// Command status; [`STATUS_OK`] means success.
    pub status: u32,
}

impl Response {
    /// Whether the response carries the success status.
    pub fn is_ok(&self) -> bool {
        self.status == STATUS_OK
    }
}

/// An incoming delivery receipt.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Sequence number of the submit this receipt refers to.
    pub reference: u64,

    /// Receipt payload.
    pub payload: Bytes,
}

/// Failure cause attached to a resolved send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    /// The channel closed after the send but before the response.
    ChannelClosed,

    /// Any other transport or protocol failure.
    Protocol(String),
}

/// Terminal outcome of an asynchronous send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The peer answered.
    Response(Response),

    /// The transport failed the request.
    Failed(SendFailure),

    /// The request was cancelled before completion.
    Cancelled,
}

/// Correlation handle for one outstanding request.
///
/// Resolved exactly once by the transport. Dropping the handle does not
/// cancel the request; only [`PendingResponse::cancel`] does, which also
/// frees the request's window slot.
#[derive(Debug)]
pub struct PendingResponse {
    sequence: u64,
    outcome: oneshot::Receiver<SendOutcome>,
    cancel: Option<oneshot::Sender<()>>,
}

impl PendingResponse {
    /// Create a handle and its transport-side resolver.
    pub fn channel(sequence: u64) -> (Self, ResponseResolver) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = oneshot::channel();
        (
            Self { sequence, outcome: outcome_rx, cancel: Some(cancel_tx) },
            ResponseResolver { outcome: Some(outcome_tx), cancel: cancel_rx },
        )
    }

    /// Sequence number assigned to the request.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wait for the terminal outcome.
    ///
    /// Returns `None` if the transport dropped its resolver without ever
    /// resolving the request; a handle in that state is an invariant
    /// violation for the caller to escalate.
    pub async fn wait(&mut self) -> Option<SendOutcome> {
        (&mut self.outcome).await.ok()
    }

    /// Ask the transport to cancel the outstanding request and release its
    /// window slot. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Transport-side half of a [`PendingResponse`].
#[derive(Debug)]
pub struct ResponseResolver {
    outcome: Option<oneshot::Sender<SendOutcome>>,
    cancel: oneshot::Receiver<()>,
}

impl ResponseResolver {
    /// Resolve the request with its terminal outcome. Only the first call
    /// has any effect.
    pub fn resolve(&mut self, outcome: SendOutcome) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }

    /// Wait for an explicit cancellation request.
    ///
    /// Returns `true` when the caller cancelled; `false` when the handle
    /// was dropped without cancelling (the request proceeds normally).
    pub async fn cancelled(&mut self) -> bool {
        (&mut self.cancel).await.is_ok()
    }
}

/// Callbacks invoked by the transport's delivery context.
///
/// The defaults acknowledge incoming receipts with success and ignore the
/// rest, which is what a plain transmitter needs.
pub trait SessionHandler: Send + Sync + 'static {
    /// An expected, correlated response arrived.
    fn on_response(&self, _response: &Response) {}

    /// The channel dropped without an unbind.
    fn on_unexpected_close(&self) {}

    /// An incoming receipt arrived; the return value is the command status
    /// of the acknowledgement sent back to the peer.
    fn on_receipt(&self, _receipt: &Receipt) -> u32 {
        STATUS_OK
    }
}

/// One bound protocol session.
#[async_trait]
pub trait Session: Send + Sync + 'static {
    /// Issue an asynchronous send.
    ///
    /// Blocks while the outstanding-request window is full; the returned
    /// handle resolves when the transport delivers the outcome.
    async fn send_async(&self, request: Request) -> Result<PendingResponse, SessionError>;

    /// Issue a send and wait up to `timeout` for the response.
    ///
    /// A request that times out is cancelled before the error is returned,
    /// so it never lingers in the window.
    async fn send_sync(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<Response, CorrelationError> {
        send_and_await(self, request, timeout).await
    }

    /// Whether the session is currently bound.
    fn is_bound(&self) -> bool;

    /// Unbind, waiting up to `timeout` for in-flight requests to settle.
    async fn unbind(&self, timeout: Duration);

    /// The session's counters, maintained by the transport.
    fn counters(&self) -> Arc<SessionCounters>;
}

/// Capability that creates bound sessions.
#[async_trait]
pub trait Client: Send + Sync {
    /// Concrete session type produced by this client.
    type Session: Session;

    /// Connect, perform the bind handshake, and return the bound session.
    async fn bind(
        &self,
        config: SessionConfig,
        handler: Arc<dyn SessionHandler>,
    ) -> Result<Self::Session, BindError>;
}
