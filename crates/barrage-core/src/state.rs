//! Run-wide coordination state.
//!
//! One `RunState` exists per load run. It owns the bind barrier every
//! session arrives at, the start gate that releases the send loops, the
//! stop-receiving signal for receiver sessions, the abort gate that
//! unblocks bound waiters when the run is cancelled before it starts, and
//! the shared submit budget consumed by count-limited exit policies.

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;

/// Observable state of the bind barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    /// Not all sessions have arrived yet.
    Pending,

    /// Every session arrived; the run may start.
    Released,

    /// At least one session failed before arriving; the run must not start.
    Broken,
}

/// Barrier released when every session has bound, or broken by the first
/// failure.
///
/// The state makes exactly one transition out of `Pending`. A failure
/// after release is ignored: the run has already started and per-session
/// failures are accounted for elsewhere.
#[derive(Debug)]
pub struct BindBarrier {
    remaining: AtomicUsize,
    state: watch::Sender<BarrierState>,
}

impl BindBarrier {
    /// Create a barrier expecting `parties` arrivals.
    pub fn new(parties: usize) -> Self {
        let (state, _) = watch::channel(if parties == 0 {
            BarrierState::Released
        } else {
            BarrierState::Pending
        });
        Self { remaining: AtomicUsize::new(parties), state }
    }

    /// Record one successful arrival. The final arrival releases the
    /// barrier.
    pub fn arrive(&self) {
        let prev = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if prev == Ok(1) {
            self.transition(BarrierState::Released);
        }
    }

    /// Break the barrier. All current and future waiters observe `Broken`.
    pub fn fail(&self) {
        self.transition(BarrierState::Broken);
    }

    /// Current barrier state.
    pub fn state(&self) -> BarrierState {
        *self.state.borrow()
    }

    /// Wait until the barrier leaves `Pending` and return the terminal
    /// state.
    pub async fn wait(&self) -> BarrierState {
        let mut rx = self.state.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail.
        match rx.wait_for(|s| *s != BarrierState::Pending).await {
            Ok(state) => *state,
            Err(_) => BarrierState::Broken,
        }
    }

    /// Single transition point out of `Pending`.
    fn transition(&self, next: BarrierState) {
        self.state.send_if_modified(|s| {
            if *s == BarrierState::Pending {
                *s = next;
                true
            } else {
                false
            }
        });
    }
}

/// One-shot gate: closed until opened, open forever after.
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Create a closed gate.
    pub fn new() -> Self {
        let (open, _) = watch::channel(false);
        Self { open }
    }

    /// Open the gate. Returns `true` only for the call that actually
    /// opened it.
    pub fn open(&self) -> bool {
        self.open.send_if_modified(|open| {
            if *open {
                false
            } else {
                *open = true;
                true
            }
        })
    }

    /// Whether the gate has been opened.
    pub fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    /// Wait until the gate opens.
    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }

    /// Wait up to `limit` for the gate to open. Returns whether it is open.
    pub async fn wait_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }
}

/// Outcome of waiting for the run to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The start gate opened; begin sending.
    Go,

    /// The run was aborted before it started; unwind without sending.
    Aborted,
}

/// Shared coordination state for one load run.
#[derive(Debug)]
pub struct RunState {
    bind_barrier: BindBarrier,
    start_gate: Gate,
    stop_receiving: Gate,
    abort_gate: Gate,
    stop_flag: AtomicBool,
    submits_issued: AtomicU64,
    started_at: OnceLock<Instant>,
}

impl RunState {
    /// Create state for a run of `session_total` sessions.
    pub fn new(session_total: usize) -> Self {
        Self {
            bind_barrier: BindBarrier::new(session_total),
            start_gate: Gate::new(),
            stop_receiving: Gate::new(),
            abort_gate: Gate::new(),
            stop_flag: AtomicBool::new(false),
            submits_issued: AtomicU64::new(0),
            started_at: OnceLock::new(),
        }
    }

    /// The barrier every session arrives at after binding.
    pub fn bind_barrier(&self) -> &BindBarrier {
        &self.bind_barrier
    }

    /// The gate receiver sessions poll while idling.
    pub fn stop_receiving(&self) -> &Gate {
        &self.stop_receiving
    }

    /// Release the start gate and record the run start timestamp.
    ///
    /// Only the first call has any effect; the return value reports
    /// whether this call performed the release.
    pub fn start(&self) -> bool {
        let _ = self.started_at.set(Instant::now());
        self.start_gate.open()
    }

    /// When the start gate was released, if it has been.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    /// Block until the run either starts or is aborted.
    pub async fn wait_for_start(&self) -> StartOutcome {
        tokio::select! {
            () = self.start_gate.wait() => StartOutcome::Go,
            () = self.abort_gate.wait() => StartOutcome::Aborted,
        }
    }

    /// Request a cooperative stop: manual-wrapped exit policies return
    /// false from now on and receiver sessions are released.
    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.stop_receiving.open();
    }

    /// Whether a cooperative stop has been requested.
    pub fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Abort a run that never started: release every waiter in a way that
    /// prevents sending.
    pub fn abort(&self) {
        self.request_stop();
        self.abort_gate.open();
    }

    /// Whether the run was aborted before starting.
    pub fn aborted(&self) -> bool {
        self.abort_gate.is_open()
    }

    /// Consume one unit of the shared submit budget and return the value
    /// before the increment.
    pub fn consume_submit_budget(&self) -> u64 {
        self.submits_issued.fetch_add(1, Ordering::Relaxed)
    }

    /// How many budget units have been consumed.
    pub fn submits_issued(&self) -> u64 {
        self.submits_issued.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn barrier_releases_after_all_arrivals() {
        let barrier = Arc::new(BindBarrier::new(3));
        assert_eq!(barrier.state(), BarrierState::Pending);

        barrier.arrive();
        barrier.arrive();
        assert_eq!(barrier.state(), BarrierState::Pending);

        barrier.arrive();
        assert_eq!(barrier.wait().await, BarrierState::Released);
    }

    #[tokio::test]
    async fn barrier_break_wins_over_late_arrivals() {
        let barrier = BindBarrier::new(2);
        barrier.arrive();
        barrier.fail();
        barrier.arrive();

        assert_eq!(barrier.wait().await, BarrierState::Broken);
    }

    #[tokio::test]
    async fn barrier_fail_after_release_is_ignored() {
        let barrier = BindBarrier::new(1);
        barrier.arrive();
        barrier.fail();

        assert_eq!(barrier.state(), BarrierState::Released);
    }

    #[tokio::test]
    async fn barrier_wakes_concurrent_waiters() {
        let barrier = Arc::new(BindBarrier::new(2));
        let mut waiters = Vec::new();
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            waiters.push(tokio::spawn(async move { barrier.wait().await }));
        }

        barrier.arrive();
        barrier.arrive();

        for waiter in waiters {
            assert_eq!(waiter.await.expect("waiter panicked"), BarrierState::Released);
        }
    }

    #[test]
    fn extra_arrivals_do_not_underflow() {
        let barrier = BindBarrier::new(1);
        barrier.arrive();
        barrier.arrive();
        assert_eq!(barrier.state(), BarrierState::Released);
    }

    #[tokio::test]
    async fn gate_opens_exactly_once() {
        let gate = Gate::new();
        assert!(!gate.is_open());
        assert!(gate.open());
        assert!(!gate.open());
        assert!(gate.is_open());
        gate.wait().await;
    }

    #[tokio::test]
    async fn gate_wait_timeout_reports_closed_gate() {
        let gate = Gate::new();
        assert!(!gate.wait_timeout(Duration::from_millis(10)).await);

        gate.open();
        assert!(gate.wait_timeout(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn start_releases_exactly_once() {
        let state = Arc::new(RunState::new(0));

        let released: usize = {
            let mut tasks = Vec::new();
            for _ in 0..8 {
                let state = Arc::clone(&state);
                tasks.push(tokio::spawn(async move { usize::from(state.start()) }));
            }
            let mut total = 0;
            for task in tasks {
                total += task.await.expect("start task panicked");
            }
            total
        };

        assert_eq!(released, 1, "start gate must release exactly once");
        assert!(state.started_at().is_some());
    }

    #[tokio::test]
    async fn wait_for_start_observes_abort() {
        let state = Arc::new(RunState::new(3));
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait_for_start().await })
        };

        state.abort();
        assert_eq!(waiter.await.expect("waiter panicked"), StartOutcome::Aborted);
        assert!(state.stop_requested());
        assert!(state.stop_receiving().is_open());
    }

    #[tokio::test]
    async fn wait_for_start_observes_go() {
        let state = Arc::new(RunState::new(0));
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait_for_start().await })
        };

        state.start();
        assert_eq!(waiter.await.expect("waiter panicked"), StartOutcome::Go);
    }

    #[test]
    fn submit_budget_counts_up() {
        let state = RunState::new(0);
        assert_eq!(state.consume_submit_budget(), 0);
        assert_eq!(state.consume_submit_budget(), 1);
        assert_eq!(state.submits_issued(), 2);
    }
}
