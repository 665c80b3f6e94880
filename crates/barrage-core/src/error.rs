//! Core error types.

use thiserror::Error;

/// Errors from exit-policy construction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    /// A manual policy may only wrap a non-manual policy.
    #[error("manual exit policy cannot wrap another manual exit policy")]
    NestedManual,
}
