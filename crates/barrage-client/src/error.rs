//! Client error types.

use thiserror::Error;

/// Errors from binding a session.
#[derive(Debug, Error)]
pub enum BindError {
    /// The connection attempt failed outright.
    #[error("connect to {addr} failed: {reason}")]
    Connect {
        /// Peer address the connect targeted.
        addr: String,
        /// Description of the connect failure.
        reason: String,
    },

    /// The peer rejected the bind request.
    #[error("bind rejected with status {status}")]
    Rejected {
        /// Command status returned by the peer.
        status: u32,
    },

    /// The bind handshake did not complete within the connect timeout.
    #[error("bind timed out after {timeout_ms} ms")]
    Timeout {
        /// Configured connect timeout in milliseconds.
        timeout_ms: u64,
    },
}

/// Errors from issuing a send on a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is not (or no longer) bound.
    #[error("session is not bound")]
    NotBound,
}

/// Errors from the send-and-await correlation helper.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// No response arrived within the allowed time. The outstanding
    /// request has already been cancelled, so its window slot is free.
    #[error("no response within {timeout_ms} ms")]
    Timeout {
        /// The wait bound in milliseconds.
        timeout_ms: u64,
    },

    /// The channel closed after the send but before the response.
    #[error("channel closed between send and response")]
    ChannelClosed,

    /// The request was cancelled before completing. Cancellation without a
    /// cause is presumed externally triggered and may be retried.
    #[error("request was cancelled before completion")]
    Cancelled,

    /// The transport reported a failure the protocol cannot recover from.
    #[error("unrecoverable protocol failure: {reason}")]
    Protocol {
        /// Description of the failure.
        reason: String,
    },

    /// The response handle resolved in a state that should be impossible.
    #[error("response handle for sequence {sequence} resolved in an impossible state")]
    InvariantViolation {
        /// Sequence number of the affected request.
        sequence: u64,
    },

    /// The send itself could not be issued.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl CorrelationError {
    /// Whether the caller may reasonably retry after this error.
    ///
    /// Timeouts and external cancellations are transient; closed channels,
    /// protocol failures, and invariant violations are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Cancelled)
    }
}
