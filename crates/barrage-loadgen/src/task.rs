//! Per-session task state machine.
//!
//! One task owns one session's whole lifecycle:
//! bind → arrive at the bind barrier → wait for the start gate → send loop
//! (sender roles) → drain in-flight responses → receipt idle loop
//! (receiver roles) → unbind. Any failure is caught, stored on the task's
//! shared view, and breaks the bind barrier; it never cancels sibling
//! sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

use barrage_client::{
    BindError, Client, Receipt, RequestSource, Response, Session, SessionError, SessionHandler,
};
use barrage_core::{
    BindMode, ExitPolicy, RunState, SessionConfig, SessionCounters, SessionSnapshot, StartOutcome,
};
use thiserror::Error;
use tokio::sync::Notify;

/// How long the drain wait sleeps between re-checks when no response
/// notification arrives.
const DRAIN_POLL_SLICE: Duration = Duration::from_millis(250);

/// Bounded wait used by the receipt idle loop so the task stays
/// responsive to the stop signal and to the session dropping.
const RECEIVE_POLL_SLICE: Duration = Duration::from_secs(5);

/// Terminal failure of a session task.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The bind handshake failed; breaks the bind barrier for the run.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// A send could not be issued.
    #[error(transparent)]
    Send(#[from] SessionError),
}

/// Monitor- and reporter-facing view of one session task.
///
/// Created before the task is spawned and shared with the quiescence
/// monitor, the reporter, and the final summary. The task populates the
/// counters after a successful bind and keeps the bound flag current.
#[derive(Debug)]
pub struct TaskView {
    index: usize,
    mode: BindMode,
    counters: OnceLock<Arc<SessionCounters>>,
    bound: AtomicBool,
    sending_finished: OnceLock<Instant>,
    failure: Mutex<Option<TaskError>>,
}

impl TaskView {
    /// Create the view for session `index` bound with `mode`.
    pub fn new(index: usize, mode: BindMode) -> Arc<Self> {
        Arc::new(Self {
            index,
            mode,
            counters: OnceLock::new(),
            bound: AtomicBool::new(false),
            sending_finished: OnceLock::new(),
            failure: Mutex::new(None),
        })
    }

    /// Session index within the run.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Bind role of the session.
    pub fn mode(&self) -> BindMode {
        self.mode
    }

    /// The session's counters, available once the session has bound.
    pub fn counters(&self) -> Option<Arc<SessionCounters>> {
        self.counters.get().map(Arc::clone)
    }

    /// Snapshot the session counters, if the session ever bound.
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.counters.get().map(|c| c.snapshot())
    }

    /// Whether the session is currently bound, as last observed by the
    /// task or its handler.
    pub fn is_bound(&self) -> bool {
        self.bound.load(Ordering::Acquire)
    }

    /// When the send loop exited, if it has. Recorded at loop exit
    /// regardless of success, independent of how long draining takes.
    pub fn sending_finished(&self) -> Option<Instant> {
        self.sending_finished.get().copied()
    }

    /// The task's terminal failure cause, if any.
    pub fn failure(&self) -> Option<String> {
        self.lock_failure().as_ref().map(ToString::to_string)
    }

    pub(crate) fn set_counters(&self, counters: Arc<SessionCounters>) {
        let _ = self.counters.set(counters);
    }

    pub(crate) fn set_bound(&self, bound: bool) {
        self.bound.store(bound, Ordering::Release);
    }

    pub(crate) fn mark_sending_finished(&self) {
        let _ = self.sending_finished.set(Instant::now());
    }

    pub(crate) fn record_failure(&self, cause: TaskError) {
        *self.lock_failure() = Some(cause);
    }

    fn lock_failure(&self) -> std::sync::MutexGuard<'_, Option<TaskError>> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handler wired into the session at bind time.
///
/// Response delivery happens on the transport's execution context; the
/// handler only flips shared flags and wakes the drain wait, never touches
/// task-local state directly.
struct TaskHandler {
    view: Arc<TaskView>,
    responses: Notify,
}

impl TaskHandler {
    fn new(view: Arc<TaskView>) -> Self {
        Self { view, responses: Notify::new() }
    }
}

impl SessionHandler for TaskHandler {
    fn on_response(&self, _response: &Response) {
        self.responses.notify_waiters();
    }

    fn on_unexpected_close(&self) {
        tracing::warn!(session = self.view.index(), "channel closed unexpectedly");
        self.view.set_bound(false);
        // Wake the drain wait so the task is not stuck waiting for
        // responses that will never arrive.
        self.responses.notify_waiters();
    }

    fn on_receipt(&self, _receipt: &Receipt) -> u32 {
        barrage_core::STATUS_OK
    }
}

/// Drives one session through its lifecycle.
pub struct SessionTask<C: Client> {
    client: Arc<C>,
    config: SessionConfig,
    source: Arc<dyn RequestSource>,
    policy: Arc<ExitPolicy>,
    state: Arc<RunState>,
    view: Arc<TaskView>,
    submit_delay: Duration,
}

impl<C: Client> SessionTask<C> {
    /// Assemble a task. Nothing runs until [`SessionTask::run`].
    pub fn new(
        client: Arc<C>,
        config: SessionConfig,
        source: Arc<dyn RequestSource>,
        policy: Arc<ExitPolicy>,
        state: Arc<RunState>,
        view: Arc<TaskView>,
        submit_delay: Duration,
    ) -> Self {
        Self { client, config, source, policy, state, view, submit_delay }
    }

    /// Run the session to termination.
    ///
    /// Failures are recorded on the task view and break the bind barrier
    /// (a no-op once the barrier has released); they are never rethrown.
    pub async fn run(self) {
        if let Err(cause) = self.drive().await {
            self.state.bind_barrier().fail();
            self.view.set_bound(false);
            tracing::error!(session = self.view.index(), error = %cause, "session task failed");
            self.view.record_failure(cause);
        }
    }

    async fn drive(&self) -> Result<(), TaskError> {
        let handler = Arc::new(TaskHandler::new(Arc::clone(&self.view)));
        let session = self
            .client
            .bind(self.config.clone(), Arc::clone(&handler) as Arc<dyn SessionHandler>)
            .await?;

        self.view.set_counters(session.counters());
        self.view.set_bound(true);
        self.state.bind_barrier().arrive();

        if self.state.wait_for_start().await == StartOutcome::Go {
            if self.config.mode.sends() {
                let pumped = self.pump(&session).await;
                // Throughput accounting ends here, before the drain.
                self.view.mark_sending_finished();
                pumped?;
                self.drain(&session, &handler).await;
            }
            if self.config.mode.receives() {
                self.idle_until_stopped(&session).await;
            }
        }

        session.unbind(self.config.unbind_timeout).await;
        self.view.set_bound(false);
        Ok(())
    }

    /// The send loop: issue asynchronous sends while the session is bound
    /// and the exit policy allows. Concurrency is bounded by the session's
    /// outstanding-request window, not by waiting per request.
    async fn pump(&self, session: &C::Session) -> Result<(), TaskError> {
        while session.is_bound() && self.policy.should_run(&self.state) {
            let request = self.source.next_request();
            let _pending = session.send_async(request).await?;
            // The outcome is observed through the handler and the session
            // counters; the loop moves on immediately.
            if !self.submit_delay.is_zero() {
                tokio::time::sleep(self.submit_delay).await;
            }
        }
        Ok(())
    }

    /// Wait until every request sent on this session has reached a
    /// terminal outcome, or the session drops.
    async fn drain(&self, session: &C::Session, handler: &TaskHandler) {
        let counters = session.counters();
        tracing::debug!(
            session = self.view.index(),
            in_flight = counters.tx_submit.requests().saturating_sub(counters.tx_submit.responses()),
            "draining in-flight requests"
        );

        loop {
            let notified = handler.responses.notified();
            if counters.tx_submit.responses() >= counters.tx_submit.requests()
                || !self.view.is_bound()
            {
                break;
            }
            let _ = tokio::time::timeout(DRAIN_POLL_SLICE, notified).await;
        }

        tracing::debug!(session = self.view.index(), "drain complete");
    }

    /// Idle until the stop-receiving signal fires or the session drops.
    /// The wait is sliced so the task stays cancellable.
    async fn idle_until_stopped(&self, session: &C::Session) {
        while session.is_bound() {
            if self.state.stop_receiving().wait_timeout(RECEIVE_POLL_SLICE).await {
                break;
            }
        }
    }
}
