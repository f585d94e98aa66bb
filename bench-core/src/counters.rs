//! # counters
//!
//! Process-wide tallies shared by every worker of a run. All cross-worker
//! coordination goes through these single-word atomics: the send budget,
//! the sent/received totals and the stop flag.
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

use tokio::sync::Notify;

/// Shared counters for one benchmark run
#[derive(Debug)]
pub struct Counters {
    /// configured message count, 0 when unbounded
    configured: u64,
    /// remaining budget; goes negative by one for every failed claim
    budget: AtomicI64,
    sent_total: AtomicU64,
    recv_total: AtomicU64,
    stop: AtomicBool,
    stop_notify: Notify,
}

impl Counters {
    /// `msg_count` of 0 leaves the budget inert
    pub fn new(msg_count: u64) -> Self {
        Self {
            configured: msg_count,
            budget: AtomicI64::new(i64::try_from(msg_count).unwrap_or(i64::MAX)),
            sent_total: AtomicU64::new(0),
            recv_total: AtomicU64::new(0),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.configured > 0
    }

    pub fn configured(&self) -> u64 {
        self.configured
    }

    /// Take one message from the budget. Returns `false` once the budget is
    /// exhausted; every successful claim is backed by a distinct unit of the
    /// configured count, so concurrent claimers can never over-spend it.
    /// Unbounded runs always succeed.
    pub fn try_claim(&self) -> bool {
        if !self.is_bounded() {
            return true;
        }
        self.budget.fetch_sub(1, Ordering::AcqRel) > 0
    }

    /// Remaining budget. Negative once workers have failed claims.
    pub fn remaining(&self) -> i64 {
        self.budget.load(Ordering::Acquire)
    }

    pub fn record_sent(&self) -> u64 {
        self.sent_total.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn sent_total(&self) -> u64 {
        self.sent_total.load(Ordering::Acquire)
    }

    pub fn record_recv(&self) -> u64 {
        self.recv_total.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn recv_total(&self) -> u64 {
        self.recv_total.load(Ordering::Acquire)
    }

    /// Set the stop flag. The flag is never cleared; only the first call
    /// wakes waiters.
    pub fn request_stop(&self) {
        if !self.stop.swap(true, Ordering::AcqRel) {
            self.stop_notify.notify_waiters();
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// Resolves once [`request_stop`](Self::request_stop) has been called
    pub async fn stopped(&self) {
        loop {
            let notified = self.stop_notify.notified();
            tokio::pin!(notified);
            // register before checking so a concurrent request_stop is not missed
            notified.as_mut().enable();
            if self.stop_requested() {
                return;
            }
            notified.await;
        }
    }

    /// Messages issued so far as derived from the remaining budget. Each
    /// active worker holds one claim it has not spent yet, hence the
    /// `parallel` correction. Unbounded runs report the sent counter.
    pub fn publish_progress(&self, parallel: usize) -> u64 {
        if !self.is_bounded() {
            return self.sent_total();
        }
        let configured = i128::from(self.configured);
        let issued =
            configured - i128::from(self.remaining()) - i128::try_from(parallel).unwrap_or(0);
        u64::try_from(issued.clamp(0, configured)).unwrap_or(0)
    }
}
