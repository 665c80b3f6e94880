//! Quiescence detection for delivery receipts.
//!
//! Receipts keep arriving after every sender has finished. The monitor
//! samples the receipt counters on a fixed interval and, once all
//! sender-role sessions are done and the receipt total stops moving
//! between two consecutive samples, releases the stop-receiving gate so
//! receiver sessions can unbind.

use std::sync::Arc;
use std::time::Duration;

use barrage_core::RunState;

use crate::task::TaskView;

/// Watches receipt counters and declares quiescence.
pub struct QuiescenceMonitor {
    state: Arc<RunState>,
    views: Vec<Arc<TaskView>>,
    interval: Duration,
}

impl QuiescenceMonitor {
    /// Create a monitor sampling `views` every `interval`.
    pub fn new(state: Arc<RunState>, views: Vec<Arc<TaskView>>, interval: Duration) -> Self {
        Self { state, views, interval }
    }

    /// Run until quiescence is declared or the stop signal fires some
    /// other way. Cancelling the task is a normal shutdown.
    pub async fn run(self) {
        let mut last_total = 0u64;

        loop {
            tokio::time::sleep(self.interval).await;

            if self.state.stop_receiving().is_open() {
                return;
            }

            let mut total = 0u64;
            let mut sending_done = true;
            for view in &self.views {
                total += view.counters().map_or(0, |c| c.rx_receipt.requests());
                if view.mode().sends() {
                    sending_done =
                        sending_done && (view.sending_finished().is_some() || !view.is_bound());
                }
            }

            if sending_done && total == last_total {
                if self.state.stop_receiving().open() {
                    tracing::info!(receipts = total, "no more receipts arriving, stop receiving");
                }
                return;
            }

            last_total = total;
        }
    }
}

#[cfg(test)]
mod tests {
    use barrage_core::BindMode;

    use super::*;

    #[tokio::test]
    async fn declares_quiescence_once_senders_finish_and_receipts_stall() {
        let state = Arc::new(RunState::new(0));
        let sender = TaskView::new(0, BindMode::Transmitter);
        // Bound and still sending: no finish timestamp yet.
        sender.set_bound(true);
        let receiver = TaskView::new(1, BindMode::Receiver);

        let monitor = QuiescenceMonitor::new(
            Arc::clone(&state),
            vec![Arc::clone(&sender), Arc::clone(&receiver)],
            Duration::from_millis(10),
        );
        let handle = tokio::spawn(monitor.run());

        // Sender still busy: gate must stay closed.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!state.stop_receiving().is_open());

        // A finished sender with a stalled receipt total releases the gate.
        sender.mark_sending_finished();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not declare quiescence")
            .expect("monitor panicked");
        assert!(state.stop_receiving().is_open());
    }

    #[tokio::test]
    async fn growing_receipt_total_defers_quiescence() {
        let state = Arc::new(RunState::new(0));
        let sender = TaskView::new(0, BindMode::Transmitter);
        sender.mark_sending_finished();

        let counters = Arc::new(barrage_core::SessionCounters::new());
        let receiver = TaskView::new(1, BindMode::Receiver);
        receiver.set_counters(Arc::clone(&counters));

        let monitor = QuiescenceMonitor::new(
            Arc::clone(&state),
            vec![Arc::clone(&sender), Arc::clone(&receiver)],
            Duration::from_millis(50),
        );
        let handle = tokio::spawn(monitor.run());

        // Feed receipts before the first sample so it observes a total
        // that moved since the initial zero.
        for _ in 0..5 {
            counters.rx_receipt.record_request();
            tokio::time::sleep(Duration::from_millis(8)).await;
        }

        // Between the first sample (moving total) and the second, the
        // gate must still be closed.
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(!state.stop_receiving().is_open(), "gate opened while receipts were moving");

        // The next sample sees an unchanged total.
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not declare quiescence")
            .expect("monitor panicked");
        assert!(state.stop_receiving().is_open());
    }

    #[tokio::test]
    async fn unbound_sender_counts_as_finished() {
        let state = Arc::new(RunState::new(0));
        // Never bound, never finished sending: treated as done because the
        // session is not bound.
        let sender = TaskView::new(0, BindMode::Transmitter);

        let monitor =
            QuiescenceMonitor::new(Arc::clone(&state), vec![sender], Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(2), monitor.run())
            .await
            .expect("monitor did not declare quiescence");
        assert!(state.stop_receiving().is_open());
    }

    #[tokio::test]
    async fn signal_fires_exactly_once_across_monitors() {
        let state = Arc::new(RunState::new(0));
        let sender = TaskView::new(0, BindMode::Transmitter);
        sender.mark_sending_finished();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let monitor = QuiescenceMonitor::new(
                Arc::clone(&state),
                vec![Arc::clone(&sender)],
                Duration::from_millis(10),
            );
            handles.push(tokio::spawn(monitor.run()));
        }
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(2), handle)
                .await
                .expect("monitor did not terminate")
                .expect("monitor panicked");
        }

        // All monitors observed the open gate; `Gate::open` made exactly
        // one transition, so receivers saw a single release.
        assert!(state.stop_receiving().is_open());
    }
}
