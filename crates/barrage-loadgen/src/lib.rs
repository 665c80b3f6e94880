//! Windowed multi-session load generation harness.
//!
//! The harness establishes N concurrent protocol sessions, drives each at
//! a bounded concurrency of outstanding requests, correlates asynchronous
//! responses back into per-session counters, applies a composable exit
//! policy, and shuts down without losing in-flight work.
//!
//! ## Architecture
//!
//! ```text
//! barrage-loadgen
//!   ├─ Orchestrator        (spawns everything, owns the run lifecycle)
//!   ├─ SessionTask         (bind → barrier → send loop → drain → unbind)
//!   ├─ QuiescenceMonitor   (detects when receipts stop arriving)
//!   ├─ Reporter            (periodic rate deltas + cumulative totals)
//!   └─ RunSummary          (final throughput and failure accounting)
//! ```
//!
//! Session tasks coordinate exclusively through `barrage_core::RunState`:
//! every task arrives at the bind barrier, no task sends before the start
//! gate opens, and a broken barrier aborts the run before any send.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod monitor;
mod orchestrator;
mod report;
mod task;

pub use monitor::QuiescenceMonitor;
pub use orchestrator::{Orchestrator, RunConfig};
pub use report::{Reporter, RunSummary, SessionFailure, SessionReport};
pub use task::{SessionTask, TaskError, TaskView};
