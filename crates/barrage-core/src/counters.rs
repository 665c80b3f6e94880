//! Per-session command counters and run-wide aggregation.
//!
//! Counters are mutated concurrently by the sending path and by the
//! response-delivery path of the transport layer, so every mutation is a
//! single atomic operation. Snapshots are ordered so a legitimate reading
//! never observes more responses than requests.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicU64, Ordering};

/// Command status value meaning success.
pub const STATUS_OK: u32 = 0;

/// Concurrent tally for one command type on one session.
///
/// Tracks requests issued, responses observed, and a per-status breakdown
/// of those responses.
#[derive(Debug, Default)]
pub struct CommandCounter {
    requests: AtomicU64,
    responses: AtomicU64,
    status: Mutex<BTreeMap<u32, u64>>,
}

impl CommandCounter {
    /// Create a counter with all tallies at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one request issued.
    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one response observed with the given command status.
    pub fn record_response(&self, status: u32) {
        *self.lock_status().entry(status).or_insert(0) += 1;
        self.responses.fetch_add(1, Ordering::Release);
    }

    /// Requests issued so far.
    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    /// Responses observed so far.
    pub fn responses(&self) -> u64 {
        self.responses.load(Ordering::Acquire)
    }

    /// Take a consistent snapshot of this counter.
    ///
    /// Responses are read before requests: every response is preceded by
    /// its request, and the request tally only grows, so the snapshot can
    /// never show `responses > requests`. The status breakdown is eventually
    /// consistent with the response total.
    pub fn snapshot(&self) -> CommandSnapshot {
        let status = self.lock_status().clone();
        let responses = self.responses();
        let requests = self.requests();
        CommandSnapshot { requests, responses, status }
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, u64>> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point-in-time view of a [`CommandCounter`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSnapshot {
    /// Requests issued.
    pub requests: u64,

    /// Responses observed.
    pub responses: u64,

    /// Responses grouped by command status.
    pub status: BTreeMap<u32, u64>,
}

impl CommandSnapshot {
    /// Responses that carried the success status.
    pub fn ok(&self) -> u64 {
        self.status.get(&STATUS_OK).copied().unwrap_or(0)
    }

    /// Responses that carried any non-success status.
    pub fn errors(&self) -> u64 {
        self.responses.saturating_sub(self.ok())
    }
}

/// Counters for one session, split by command type.
#[derive(Debug, Default)]
pub struct SessionCounters {
    /// Outbound submit requests and their responses.
    pub tx_submit: CommandCounter,

    /// Inbound delivery receipts and the acknowledgements sent for them.
    pub rx_receipt: CommandCounter,
}

impl SessionCounters {
    /// Create session counters with all tallies at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot both command counters.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot { submit: self.tx_submit.snapshot(), receipt: self.rx_receipt.snapshot() }
    }
}

/// Point-in-time view of a session's counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Submit-side snapshot.
    pub submit: CommandSnapshot,

    /// Receipt-side snapshot.
    pub receipt: CommandSnapshot,
}

/// Run-wide totals aggregated over session snapshots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    /// Submits issued.
    pub submitted: u64,

    /// Submit responses with the success status.
    pub resp_ok: u64,

    /// Submit responses with a non-success status.
    pub resp_error: u64,

    /// Delivery receipts received.
    pub receipts: u64,
}

impl Totals {
    /// Sum session snapshots into run-wide totals.
    pub fn aggregate<'a, I>(snapshots: I) -> Self
    where
        I: IntoIterator<Item = &'a SessionSnapshot>,
    {
        let mut totals = Self::default();
        for snapshot in snapshots {
            totals.submitted += snapshot.submit.requests;
            totals.resp_ok += snapshot.submit.ok();
            totals.resp_error += snapshot.submit.errors();
            totals.receipts += snapshot.receipt.requests;
        }
        totals
    }

    /// Difference between this reading and an earlier one.
    pub fn delta(&self, earlier: &Self) -> Self {
        Self {
            submitted: self.submitted.saturating_sub(earlier.submitted),
            resp_ok: self.resp_ok.saturating_sub(earlier.resp_ok),
            resp_error: self.resp_error.saturating_sub(earlier.resp_error),
            receipts: self.receipts.saturating_sub(earlier.receipts),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn snapshot_groups_responses_by_status() {
        let counter = CommandCounter::new();
        for _ in 0..5 {
            counter.record_request();
        }
        counter.record_response(0);
        counter.record_response(0);
        counter.record_response(8);

        let snapshot = counter.snapshot();
        assert_eq!(snapshot.requests, 5);
        assert_eq!(snapshot.responses, 3);
        assert_eq!(snapshot.ok(), 2);
        assert_eq!(snapshot.errors(), 1);
    }

    #[test]
    fn snapshot_never_shows_more_responses_than_requests() {
        let counter = Arc::new(CommandCounter::new());
        let writer = {
            let counter = Arc::clone(&counter);
            std::thread::spawn(move || {
                for _ in 0..20_000 {
                    counter.record_request();
                    counter.record_response(0);
                }
            })
        };

        for _ in 0..2_000 {
            let snapshot = counter.snapshot();
            assert!(
                snapshot.responses <= snapshot.requests,
                "torn snapshot: {} responses > {} requests",
                snapshot.responses,
                snapshot.requests
            );
        }

        writer.join().expect("writer thread panicked");
    }

    #[test]
    fn totals_aggregate_and_delta() {
        let a = SessionCounters::new();
        a.tx_submit.record_request();
        a.tx_submit.record_request();
        a.tx_submit.record_response(0);
        a.tx_submit.record_response(1);

        let b = SessionCounters::new();
        b.rx_receipt.record_request();

        let totals = Totals::aggregate([&a.snapshot(), &b.snapshot()]);
        assert_eq!(totals.submitted, 2);
        assert_eq!(totals.resp_ok, 1);
        assert_eq!(totals.resp_error, 1);
        assert_eq!(totals.receipts, 1);

        let earlier = Totals { submitted: 1, resp_ok: 1, resp_error: 0, receipts: 0 };
        let delta = totals.delta(&earlier);
        assert_eq!(delta.submitted, 1);
        assert_eq!(delta.resp_ok, 0);
        assert_eq!(delta.resp_error, 1);
        assert_eq!(delta.receipts, 1);
    }

    proptest! {
        /// For any in-order mix of requests and responses, the snapshot is
        /// internally consistent.
        #[test]
        fn snapshot_is_consistent(ops in proptest::collection::vec(0u32..4, 0..200)) {
            let counter = CommandCounter::new();
            let mut outstanding = 0u64;

            for op in ops {
                if op == 0 || outstanding == 0 {
                    counter.record_request();
                    outstanding += 1;
                } else {
                    counter.record_response(op % 2);
                    outstanding -= 1;
                }
            }

            let snapshot = counter.snapshot();
            prop_assert!(snapshot.responses <= snapshot.requests);
            prop_assert_eq!(
                snapshot.status.values().sum::<u64>(),
                snapshot.responses
            );
            prop_assert_eq!(snapshot.ok() + snapshot.errors(), snapshot.responses);
        }
    }
}
