//! Composable exit-condition policies for the send loop.
//!
//! A policy decides, per evaluation, whether a session's send loop keeps
//! running. Policies are shared across all sending sessions of a run, so
//! every decision reads (and for count limits, consumes) shared state.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use crate::error::PolicyError;
use crate::state::RunState;

/// Exit-condition policy evaluated before every send.
#[derive(Debug)]
pub enum ExitPolicy {
    /// Keep running while the shared submit budget is below `limit`.
    ///
    /// Every evaluation consumes one unit of budget, even when the caller
    /// never issues the send (for example because the session became
    /// unbound between the check and the send). Exits that race with
    /// session teardown can therefore deliver slightly fewer submits than
    /// the configured total. Across all concurrent callers, exactly
    /// `limit` evaluations return `true`.
    CountLimit {
        /// Total submit budget for the run.
        limit: u64,
    },

    /// Keep running until a fixed duration after the run start.
    ///
    /// The absolute deadline is derived lazily from the shared start
    /// timestamp; concurrent first evaluations recompute the same value,
    /// so no synchronization is needed beyond the cell.
    DurationLimit {
        /// How long after the start gate the loop may run.
        duration: Duration,

        /// Lazily computed absolute deadline.
        deadline: OnceLock<Instant>,
    },

    /// Delegate to `inner`, but stop as soon as a manual stop is
    /// requested.
    Manual {
        /// The wrapped, non-manual policy.
        inner: Box<ExitPolicy>,
    },
}

impl ExitPolicy {
    /// A manually stoppable count limit: run until `limit` submits have
    /// been budgeted across all sessions.
    pub fn submit_count(limit: u64) -> Self {
        Self::Manual { inner: Box::new(Self::CountLimit { limit }) }
    }

    /// A manually stoppable duration limit: run for `duration` after the
    /// start gate opens.
    pub fn duration(duration: Duration) -> Self {
        Self::Manual { inner: Box::new(Self::DurationLimit { duration, deadline: OnceLock::new() }) }
    }

    /// Wrap an arbitrary policy with the manual stop check.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NestedManual`] if `inner` is itself manual.
    pub fn manual(inner: Self) -> Result<Self, PolicyError> {
        if matches!(inner, Self::Manual { .. }) {
            return Err(PolicyError::NestedManual);
        }
        Ok(Self::Manual { inner: Box::new(inner) })
    }

    /// Decide whether the send loop should keep running.
    pub fn should_run(&self, state: &RunState) -> bool {
        match self {
            Self::CountLimit { limit } => state.consume_submit_budget() < *limit,

            Self::DurationLimit { duration, deadline } => match state.started_at() {
                Some(started) => {
                    let deadline = *deadline.get_or_init(|| started + *duration);
                    Instant::now() < deadline
                },
                // Not started yet; the start gate is still holding the
                // loop back, so there is nothing to stop.
                None => true,
            },

            Self::Manual { inner } => !state.stop_requested() && inner.should_run(state),
        }
    }
}
