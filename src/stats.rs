//! ==============================================================================
//! stats.rs - running totals for the poll loop and the sink
//! ==============================================================================
//!
//! purpose:
//!     counts polls, failures and sink writes since start (or since the
//!     last `POST /stats/clear`).
//!
//! consistency:
//!     all counters sit behind one mutex. a finished poll bumps several
//!     counters through a single `record()` call, so a concurrent `reset()`
//!     lands entirely before or entirely after it.
//!
//! ==============================================================================

use crate::domain::unix_now;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Counter {
    /// every fetch attempt
    Polls,
    PollsOk,
    PollsFailed,
    FetchTimeouts,
    ConversionErrors,
    SinkWrites,
    SinkErrors,
}

impl Counter {
    pub const ALL: [Counter; 7] = [
        Counter::Polls,
        Counter::PollsOk,
        Counter::PollsFailed,
        Counter::FetchTimeouts,
        Counter::ConversionErrors,
        Counter::SinkWrites,
        Counter::SinkErrors,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Counter::Polls => "polls",
            Counter::PollsOk => "polls_ok",
            Counter::PollsFailed => "polls_failed",
            Counter::FetchTimeouts => "fetch_timeouts",
            Counter::ConversionErrors => "conversion_errors",
            Counter::SinkWrites => "sink_writes",
            Counter::SinkErrors => "sink_errors",
        }
    }
}

/// point-in-time copy of all counters
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub counts: BTreeMap<&'static str, u64>,
    /// unix timestamp (s) of process start
    pub started: u64,
    /// unix timestamp (s) of the last reset, `started` if never reset
    pub cleared: u64,
}

impl StatsSnapshot {
    pub fn get(&self, counter: Counter) -> u64 {
        self.counts.get(counter.as_str()).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct Inner {
    counts: [u64; Counter::ALL.len()],
    started: u64,
    cleared: u64,
}

#[derive(Clone, Debug)]
pub struct Stats {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self::started_at(unix_now())
    }

    pub fn started_at(started: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                counts: [0; Counter::ALL.len()],
                started,
                cleared: started,
            })),
        }
    }

    // plain integers are valid whatever a panicking holder left behind
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn increment(&self, counter: Counter) {
        self.record(&[counter]);
    }

    /// bump several counters as one step
    pub fn record(&self, counters: &[Counter]) {
        let mut inner = self.lock();
        for &counter in counters {
            let slot = &mut inner.counts[counter as usize];
            *slot = slot.saturating_add(1);
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        StatsSnapshot {
            counts: Counter::ALL
                .iter()
                .map(|&c| (c.as_str(), inner.counts[c as usize]))
                .collect(),
            started: inner.started,
            cleared: inner.cleared,
        }
    }

    /// zero every counter; the start time is kept
    pub fn reset(&self) {
        self.reset_at(unix_now());
    }

    pub fn reset_at(&self, at: u64) {
        let mut inner = self.lock();
        inner.counts = [0; Counter::ALL.len()];
        inner.cleared = at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_zero() {
        let stats = Stats::started_at(10);
        let snap = stats.snapshot();
        assert_eq!(snap.counts.len(), Counter::ALL.len());
        assert!(snap.counts.values().all(|&v| v == 0));
        assert_eq!(snap.started, 10);
        assert_eq!(snap.cleared, 10);
    }

    #[test]
    fn counter_index_matches_all_order() {
        for (i, c) in Counter::ALL.iter().enumerate() {
            assert_eq!(*c as usize, i);
        }
    }

    #[test]
    fn increment_and_record() {
        let stats = Stats::new();
        stats.increment(Counter::Polls);
        stats.record(&[Counter::Polls, Counter::PollsFailed, Counter::FetchTimeouts]);

        let snap = stats.snapshot();
        assert_eq!(snap.get(Counter::Polls), 2);
        assert_eq!(snap.get(Counter::PollsFailed), 1);
        assert_eq!(snap.get(Counter::FetchTimeouts), 1);
        assert_eq!(snap.get(Counter::PollsOk), 0);
        assert_eq!(snap.counts["polls"], 2);
    }

    #[test]
    fn reset_zeroes_counts_and_keeps_start() {
        let stats = Stats::started_at(10);
        stats.record(&[Counter::Polls, Counter::PollsOk]);
        stats.reset_at(20);

        let snap = stats.snapshot();
        assert!(snap.counts.values().all(|&v| v == 0));
        assert_eq!(snap.started, 10);
        assert_eq!(snap.cleared, 20);

        stats.record(&[Counter::Polls, Counter::PollsOk]);
        let snap = stats.snapshot();
        assert_eq!(snap.get(Counter::PollsOk), 1);
        assert_eq!(snap.get(Counter::PollsFailed), 0);
    }

    #[test]
    fn concurrent_reset_never_splits_a_poll() {
        let stats = Stats::new();
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let stats = stats.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        stats.record(&[Counter::Polls, Counter::PollsOk]);
                    }
                })
            })
            .collect();

        for _ in 0..100 {
            stats.reset();
            let snap = stats.snapshot();
            assert_eq!(snap.get(Counter::Polls), snap.get(Counter::PollsOk));
        }

        for w in writers {
            w.join().unwrap();
        }
        let snap = stats.snapshot();
        assert_eq!(snap.get(Counter::Polls), snap.get(Counter::PollsOk));
    }
}
