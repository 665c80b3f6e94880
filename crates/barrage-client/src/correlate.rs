//! Single-request correlation: send and wait with a bound.
//!
//! Used by simpler single-threaded drivers and by [`Session::send_sync`].
//! The windowed send loop never waits per-request; this helper exists for
//! callers that do.

use std::time::Duration;

use crate::error::CorrelationError;
use crate::session::{Request, Response, SendFailure, SendOutcome, Session};

/// Issue `request` asynchronously and wait up to `timeout` for its
/// correlated response.
///
/// On timeout the outstanding request is cancelled before the error is
/// surfaced, so a timed-out request never keeps occupying window space.
/// Terminal outcomes map to three disjoint results: a response is
/// returned, a failure is classified as channel-closed or unrecoverable,
/// and a cancellation without a cause is reported as recoverable. A handle
/// that resolves in none of those states is an invariant violation and is
/// logged with full diagnostic context before being escalated.
///
/// # Errors
///
/// See [`CorrelationError`] for the taxonomy.
pub async fn send_and_await<S>(
    session: &S,
    request: Request,
    timeout: Duration,
) -> Result<Response, CorrelationError>
where
    S: Session + ?Sized,
{
    let mut pending = session.send_async(request).await?;
    let sequence = pending.sequence();

    let Ok(outcome) = tokio::time::timeout(timeout, pending.wait()).await else {
        pending.cancel();
        return Err(CorrelationError::Timeout { timeout_ms: timeout.as_millis() as u64 });
    };

    match outcome {
        Some(SendOutcome::Response(response)) => Ok(response),

        Some(SendOutcome::Failed(SendFailure::ChannelClosed)) => {
            Err(CorrelationError::ChannelClosed)
        },

        Some(SendOutcome::Failed(SendFailure::Protocol(reason))) => {
            Err(CorrelationError::Protocol { reason })
        },

        Some(SendOutcome::Cancelled) => {
            tracing::error!(sequence, "request cancelled externally before completion");
            Err(CorrelationError::Cancelled)
        },

        None => {
            tracing::error!(
                sequence,
                "response handle dropped unresolved: not done, not failed, not cancelled"
            );
            Err(CorrelationError::InvariantViolation { sequence })
        },
    }
}
