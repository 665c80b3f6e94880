//! Run coordination primitives for the barrage load harness.
//!
//! This crate holds the pure coordination logic shared by every session
//! task in a load run: the immutable session configuration, the
//! concurrently mutated counters, the composable exit-condition policies,
//! and the run-wide state (bind barrier, start gate, stop signal, submit
//! budget). Nothing here performs I/O; the session capability itself lives
//! in `barrage-client` and the driving tasks in `barrage-loadgen`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod counters;
mod error;
mod exit;
mod state;

pub use config::{BindMode, SessionConfig};
pub use counters::{
    CommandCounter, CommandSnapshot, STATUS_OK, SessionCounters, SessionSnapshot, Totals,
};
pub use error::PolicyError;
pub use exit::ExitPolicy;
pub use state::{BarrierState, BindBarrier, Gate, RunState, StartOutcome};
