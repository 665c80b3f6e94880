//! Top-level run driver.
//!
//! The orchestrator spawns one task per session, waits for every session
//! to bind, releases the start gate, runs the background reporter and
//! quiescence monitor, waits for all session tasks to terminate, and
//! computes the final summary. A broken bind barrier or a bind deadline
//! aborts the run before any session sends.

use std::sync::Arc;
use std::time::Duration;

use barrage_client::{Client, FixedRequest, RequestSource};
use barrage_core::{BarrierState, BindMode, ExitPolicy, RunState, SessionConfig};
use tokio::io::AsyncBufReadExt;
use tokio::task::JoinHandle;

use crate::monitor::QuiescenceMonitor;
use crate::report::{Reporter, RunSummary};
use crate::task::{SessionTask, TaskView};

/// Configuration for one load run.
#[derive(Debug)]
pub struct RunConfig {
    /// Number of transmitter-only sessions.
    pub transmitters: usize,

    /// Number of receiver-only sessions.
    pub receivers: usize,

    /// Number of transceiver sessions.
    pub transceivers: usize,

    /// Per-session configuration; the bind mode is overridden per role.
    pub session: SessionConfig,

    /// Exit policy shared by every sending session.
    pub policy: ExitPolicy,

    /// Pause between consecutive sends on one session.
    pub submit_delay: Duration,

    /// How long to wait for every session to bind before aborting.
    pub bind_deadline: Duration,

    /// Reporter sampling interval.
    pub report_interval: Duration,

    /// Reporter logs cumulative totals every this many ticks.
    pub cumulative_every: u32,

    /// Quiescence monitor sampling interval.
    pub quiescence_interval: Duration,

    /// Whether to stop the run when a line arrives on stdin.
    pub manual_exit: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            transmitters: 26,
            receivers: 2,
            transceivers: 0,
            session: SessionConfig::default(),
            policy: ExitPolicy::submit_count(10_000),
            submit_delay: Duration::from_millis(1),
            bind_deadline: Duration::from_secs(7),
            report_interval: Duration::from_secs(1),
            cumulative_every: 10,
            quiescence_interval: Duration::from_secs(1),
            manual_exit: false,
        }
    }
}

/// Drives a whole load run against one client.
pub struct Orchestrator<C> {
    client: Arc<C>,
    config: RunConfig,
}

impl<C> Orchestrator<C>
where
    C: Client + 'static,
{
    /// Create an orchestrator for `client` with the given run shape.
    pub fn new(client: C, config: RunConfig) -> Self {
        Self { client: Arc::new(client), config }
    }

    /// Execute the run to completion and return the final summary.
    ///
    /// Always returns a summary: an aborted run (bind failure or bind
    /// deadline) reports its session failures and zero submits.
    pub async fn execute(self) -> RunSummary {
        let Self { client, config } = self;
        let RunConfig {
            transmitters,
            receivers,
            transceivers,
            session,
            policy,
            submit_delay,
            bind_deadline,
            report_interval,
            cumulative_every,
            quiescence_interval,
            manual_exit,
        } = config;

        let session_total = transmitters + receivers + transceivers;
        let state = Arc::new(RunState::new(session_total));
        let policy = Arc::new(policy);
        let source: Arc<dyn RequestSource> =
            Arc::new(FixedRequest::lorem(session.registered_receipts));

        let roles = std::iter::repeat_n(BindMode::Transmitter, transmitters)
            .chain(std::iter::repeat_n(BindMode::Receiver, receivers))
            .chain(std::iter::repeat_n(BindMode::Transceiver, transceivers));

        let mut views = Vec::with_capacity(session_total);
        let mut tasks = Vec::with_capacity(session_total);
        for (index, mode) in roles.enumerate() {
            let view = TaskView::new(index, mode);
            let task = SessionTask::new(
                Arc::clone(&client),
                session.with_mode(mode),
                Arc::clone(&source),
                Arc::clone(&policy),
                Arc::clone(&state),
                Arc::clone(&view),
                submit_delay,
            );
            views.push(view);
            tasks.push(tokio::spawn(task.run()));
        }

        tracing::info!(
            sessions = session_total,
            deadline = ?bind_deadline,
            "waiting for all sessions to bind"
        );

        let bound = tokio::time::timeout(bind_deadline, state.bind_barrier().wait()).await;

        let mut support: Vec<JoinHandle<()>> = Vec::new();
        match bound {
            Ok(BarrierState::Released) => {
                state.start();
                tracing::info!("all sessions bound, test started");

                if session.registered_receipts {
                    support.push(tokio::spawn(
                        QuiescenceMonitor::new(
                            Arc::clone(&state),
                            views.clone(),
                            quiescence_interval,
                        )
                        .run(),
                    ));
                } else {
                    // No receipts will ever arrive; release receivers at
                    // once so they unbind as soon as they are told to.
                    state.stop_receiving().open();
                }

                support.push(tokio::spawn(
                    Reporter::new(views.clone(), report_interval, cumulative_every).run(),
                ));

                if manual_exit {
                    support.push(tokio::spawn(manual_exit_listener(Arc::clone(&state))));
                }
            },
            Ok(other) => {
                tracing::error!(barrier = ?other, "one or more sessions failed to bind, aborting run");
                state.abort();
            },
            Err(_) => {
                tracing::error!(
                    deadline = ?bind_deadline,
                    "sessions did not bind within the deadline, aborting run"
                );
                state.abort();
            },
        }

        for task in tasks {
            if task.await.is_err() {
                tracing::error!("session task aborted unexpectedly");
            }
        }

        for task in support {
            task.abort();
        }

        RunSummary::compute(&views, &state, session.window_size)
    }
}

/// Stop the run when the operator presses Enter.
async fn manual_exit_listener(state: Arc<RunState>) {
    tracing::info!("press enter to stop the run");
    let mut line = String::new();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin());
    if stdin.read_line(&mut line).await.is_ok() {
        tracing::info!("manual stop requested");
        state.request_stop();
    }
}
