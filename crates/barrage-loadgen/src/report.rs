//! Live throughput reporting and the final run summary.
//!
//! The reporter logs per-interval deltas for a live rate display and, on
//! every Kth tick, the cumulative totals. The summary is computed once,
//! after all session tasks have terminated.

use std::sync::Arc;
use std::time::Duration;

use barrage_core::{BindMode, RunState, SessionSnapshot, Totals};

use crate::task::TaskView;

/// Sum the counters of every session that has bound.
fn aggregate(views: &[Arc<TaskView>]) -> Totals {
    let snapshots: Vec<SessionSnapshot> = views.iter().filter_map(|v| v.snapshot()).collect();
    Totals::aggregate(&snapshots)
}

/// Periodic throughput logger.
pub struct Reporter {
    views: Vec<Arc<TaskView>>,
    interval: Duration,
    cumulative_every: u32,
}

impl Reporter {
    /// Create a reporter sampling `views` every `interval`, logging
    /// cumulative totals every `cumulative_every` ticks.
    pub fn new(views: Vec<Arc<TaskView>>, interval: Duration, cumulative_every: u32) -> Self {
        Self { views, interval, cumulative_every: cumulative_every.max(1) }
    }

    /// Run until cancelled by the orchestrator.
    pub async fn run(self) {
        let mut last = Totals::default();
        let mut tick = 0u32;

        loop {
            tokio::time::sleep(self.interval).await;

            let totals = aggregate(&self.views);
            let delta = totals.delta(&last);
            tracing::info!(
                target: "barrage_loadgen::throughput",
                sent = delta.submitted,
                ok = delta.resp_ok,
                error = delta.resp_error,
                receipts = delta.receipts,
            );

            tick = tick.wrapping_add(1);
            if tick % self.cumulative_every == 0 {
                tracing::info!(
                    target: "barrage_loadgen::total",
                    sent = totals.submitted,
                    ok = totals.resp_ok,
                    error = totals.resp_error,
                    receipts = totals.receipts,
                );
            }

            last = totals;
        }
    }
}

/// One failed session in the final accounting.
#[derive(Debug, Clone)]
pub struct SessionFailure {
    /// Session index within the run.
    pub index: usize,

    /// Human-readable failure cause.
    pub cause: String,
}

/// Per-session breakdown in the final accounting.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Session index within the run.
    pub index: usize,

    /// Bind role of the session.
    pub mode: BindMode,

    /// Final counter snapshot.
    pub snapshot: SessionSnapshot,
}

/// Final accounting for one load run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Total sessions in the run.
    pub sessions: usize,

    /// Configured per-session window size.
    pub window_size: usize,

    /// Whether the run was aborted before the start gate opened.
    pub aborted: bool,

    /// Failed sessions with their causes.
    pub failures: Vec<SessionFailure>,

    /// Total sending time: latest send-loop exit minus run start.
    /// Excludes drain time by construction.
    pub elapsed: Duration,

    /// Run-wide totals over all non-failed sessions.
    pub totals: Totals,

    /// Submits per second of sending time.
    pub throughput: f64,

    /// Per-session breakdown for every session that bound.
    pub per_session: Vec<SessionReport>,
}

impl RunSummary {
    /// Compute the summary after all session tasks have terminated.
    pub fn compute(views: &[Arc<TaskView>], state: &RunState, window_size: usize) -> Self {
        let finished = views.iter().filter_map(|v| v.sending_finished()).max();
        let elapsed = match (state.started_at(), finished) {
            (Some(started), Some(finished)) => finished.saturating_duration_since(started),
            _ => Duration::ZERO,
        };

        let mut failures = Vec::new();
        let mut healthy = Vec::new();
        let mut per_session = Vec::new();
        for view in views {
            match view.failure() {
                Some(cause) => failures.push(SessionFailure { index: view.index(), cause }),
                None => {
                    if let Some(snapshot) = view.snapshot() {
                        healthy.push(snapshot.clone());
                        per_session.push(SessionReport {
                            index: view.index(),
                            mode: view.mode(),
                            snapshot,
                        });
                    }
                },
            }
        }

        let totals = Totals::aggregate(&healthy);
        let throughput = if elapsed.is_zero() {
            0.0
        } else {
            totals.submitted as f64 / elapsed.as_secs_f64()
        };

        Self {
            sessions: views.len(),
            window_size,
            aborted: state.aborted(),
            failures,
            elapsed,
            totals,
            throughput,
            per_session,
        }
    }

    /// Log the summary, one line per figure.
    pub fn log(&self) {
        tracing::info!("performance run finished:");
        tracing::info!("       sessions: {}", self.sessions);
        tracing::info!("    window size: {}", self.window_size);
        tracing::info!("sessions failed: {}", self.failures.len());
        tracing::info!("           time: {:.3} s", self.elapsed.as_secs_f64());
        tracing::info!("  actual submit: {}", self.totals.submitted);
        tracing::info!(" submit resp ok: {}", self.totals.resp_ok);
        tracing::info!("submit resp err: {}", self.totals.resp_error);
        tracing::info!("       receipts: {}", self.totals.receipts);
        tracing::info!("     throughput: {:.3} per sec", self.throughput);

        for failure in &self.failures {
            tracing::error!(session = failure.index, cause = %failure.cause, "session failed");
        }

        for report in &self.per_session {
            if report.mode.sends() {
                tracing::info!(
                    session = report.index,
                    requests = report.snapshot.submit.requests,
                    ok = report.snapshot.submit.ok(),
                    error = report.snapshot.submit.errors(),
                    "submit",
                );
            }
        }
        for report in &self.per_session {
            if report.mode.receives() {
                tracing::info!(
                    session = report.index,
                    receipts = report.snapshot.receipt.requests,
                    "receipt",
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use barrage_core::SessionCounters;

    use super::*;

    #[test]
    fn summary_excludes_failed_sessions_from_totals() {
        let state = RunState::new(0);
        state.start();

        let healthy = TaskView::new(0, BindMode::Transmitter);
        let counters = Arc::new(SessionCounters::new());
        counters.tx_submit.record_request();
        counters.tx_submit.record_response(0);
        healthy.set_counters(counters);
        healthy.mark_sending_finished();

        let failed = TaskView::new(1, BindMode::Transmitter);
        failed.record_failure(crate::task::TaskError::Send(
            barrage_client::SessionError::NotBound,
        ));

        let summary = RunSummary::compute(&[healthy, failed], &state, 5);
        assert_eq!(summary.sessions, 2);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].index, 1);
        assert_eq!(summary.totals.submitted, 1);
        assert_eq!(summary.per_session.len(), 1);
        assert!(summary.elapsed > Duration::ZERO || summary.throughput == 0.0);
    }

    #[test]
    fn summary_without_start_has_zero_elapsed() {
        let state = RunState::new(3);
        state.abort();

        let view = TaskView::new(0, BindMode::Transmitter);
        let summary = RunSummary::compute(&[view], &state, 5);

        assert!(summary.aborted);
        assert_eq!(summary.elapsed, Duration::ZERO);
        assert_eq!(summary.totals.submitted, 0);
        assert!((summary.throughput - 0.0).abs() < f64::EPSILON);
    }
}
