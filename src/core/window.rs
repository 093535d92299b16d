//! Sliding-window event counting for the abuse guard.
//!
//! This module provides the per-key counter used for request rate limiting,
//! failed login tracking, breach attempt tracking and query log throttling.
//! Every key owns an ordered list of event timestamps; entries older than the
//! window are pruned whenever the key is touched.

use std::collections::{HashMap, VecDeque};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Sliding window counter keyed by an arbitrary identity (usually an IP)
#[derive(Debug)]
pub struct TimeWindowCounter {
    /// Length of the trailing window
    window: Duration,
    /// Event timestamps per key, oldest first
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl TimeWindowCounter {
    /// Create a new counter with the given window length
    pub fn new(window: Duration) -> Self {
        debug_assert!(window > Duration::zero(), "window must be positive");
        Self {
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Length of the trailing window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an event for `key` at `now`
    ///
    /// # Returns
    ///
    /// The number of events for `key` within the trailing window,
    /// including the one just recorded.
    pub fn record(&self, key: &str, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let mut windows = self.windows.lock();
        let events = windows.entry(key.to_string()).or_default();
        prune(events, cutoff);
        events.push_back(now);
        events.len()
    }

    /// Number of events for `key` within the trailing window
    ///
    /// Expired entries are pruned as a side effect; a key left with no
    /// entries is dropped.
    pub fn count(&self, key: &str, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let mut windows = self.windows.lock();
        let Some(events) = windows.get_mut(key) else {
            return 0;
        };
        prune(events, cutoff);
        let count = events.len();
        if count == 0 {
            windows.remove(key);
        }
        count
    }

    /// Record an event and restart the key once the count passes `threshold`
    ///
    /// Both steps happen under one lock, so concurrent callers see exactly
    /// one crossing.
    ///
    /// # Returns
    ///
    /// `Some(count)` for the event that pushed the count above `threshold`.
    pub fn record_and_reset_above(&self, key: &str, now: DateTime<Utc>, threshold: usize) -> Option<usize> {
        let cutoff = self.cutoff(now);
        let mut windows = self.windows.lock();
        let events = windows.entry(key.to_string()).or_default();
        prune(events, cutoff);
        events.push_back(now);
        let count = events.len();
        if count > threshold {
            windows.remove(key);
            Some(count)
        } else {
            None
        }
    }

    /// Forget every event recorded for `key`
    pub fn clear(&self, key: &str) {
        self.windows.lock().remove(key);
    }

    /// Number of keys with at least one event inside the window
    pub fn active_keys(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        self.windows
            .lock()
            .values()
            .filter(|events| events.back().is_some_and(|t| *t >= cutoff))
            .count()
    }

    /// Drop every key whose newest event has left the window
    ///
    /// # Returns
    ///
    /// The number of keys removed.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = self.cutoff(now);
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, events| events.back().is_some_and(|t| *t >= cutoff));
        before - windows.len()
    }

    fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Number of keys currently held in memory
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

fn prune(events: &mut VecDeque<DateTime<Utc>>, cutoff: DateTime<Utc>) {
    while events.front().is_some_and(|t| *t < cutoff) {
        events.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_record_counts_trailing_window() {
        let counter = TimeWindowCounter::new(Duration::seconds(60));

        assert_eq!(counter.record("10.0.0.1", at(0)), 1);
        assert_eq!(counter.record("10.0.0.1", at(10)), 2);
        assert_eq!(counter.record("10.0.0.1", at(59)), 3);

        // The event at t=0 is now older than the window
        assert_eq!(counter.record("10.0.0.1", at(61)), 3);
        assert_eq!(counter.record("10.0.0.1", at(125)), 1);
    }

    #[test]
    fn test_boundary_event_is_retained() {
        let counter = TimeWindowCounter::new(Duration::seconds(60));
        counter.record("k", at(0));
        assert_eq!(counter.count("k", at(60)), 1);
        assert_eq!(counter.count("k", at(61)), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let counter = TimeWindowCounter::new(Duration::seconds(60));
        counter.record("a", at(0));
        counter.record("a", at(1));
        counter.record("b", at(2));

        assert_eq!(counter.count("a", at(3)), 2);
        assert_eq!(counter.count("b", at(3)), 1);
        assert_eq!(counter.count("c", at(3)), 0);
    }

    #[test]
    fn test_count_prunes_and_drops_empty_keys() {
        let counter = TimeWindowCounter::new(Duration::seconds(60));
        counter.record("a", at(0));
        assert_eq!(counter.tracked_keys(), 1);

        assert_eq!(counter.count("a", at(120)), 0);
        assert_eq!(counter.tracked_keys(), 0);
    }

    #[test]
    fn test_clear_forgets_key() {
        let counter = TimeWindowCounter::new(Duration::seconds(300));
        for i in 0..5 {
            counter.record("a", at(i));
        }
        counter.clear("a");
        assert_eq!(counter.count("a", at(6)), 0);
        assert_eq!(counter.record("a", at(7)), 1);
    }

    #[test]
    fn test_record_and_reset_above() {
        let counter = TimeWindowCounter::new(Duration::seconds(300));
        assert_eq!(counter.record_and_reset_above("a", at(0), 2), None);
        assert_eq!(counter.record_and_reset_above("a", at(1), 2), None);
        assert_eq!(counter.record_and_reset_above("a", at(2), 2), Some(3));
        assert_eq!(counter.count("a", at(3)), 0);
        assert_eq!(counter.record_and_reset_above("a", at(4), 2), None);
    }

    #[test]
    fn test_concurrent_crossing_is_reported_once() {
        let counter = Arc::new(TimeWindowCounter::new(Duration::seconds(300)));
        let crossings = Arc::new(AtomicUsize::new(0));
        let now = at(0);

        // 8 threads x 7 calls against a threshold of 50: one crossing at 51
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = Arc::clone(&counter);
                let crossings = Arc::clone(&crossings);
                std::thread::spawn(move || {
                    for _ in 0..7 {
                        if counter.record_and_reset_above("k", now, 50).is_some() {
                            crossings.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(crossings.load(Ordering::SeqCst), 1);
        assert_eq!(counter.count("k", now), 5);
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let counter = TimeWindowCounter::new(Duration::seconds(i64::MAX / 1000));
        assert_eq!(counter.record("k", at(0)), 1);
        assert_eq!(counter.record("k", at(1)), 2);
        assert_eq!(counter.active_keys(at(2)), 1);
        assert_eq!(counter.purge_idle(at(2)), 0);
    }

    #[test]
    fn test_active_keys_and_purge() {
        let counter = TimeWindowCounter::new(Duration::seconds(600));
        counter.record("a", at(0));
        counter.record("a", at(10));
        counter.record("b", at(300));
        counter.record("c", at(500));

        assert_eq!(counter.active_keys(at(600)), 3);
        assert_eq!(counter.active_keys(at(611)), 2);

        assert_eq!(counter.purge_idle(at(1000)), 2);
        assert_eq!(counter.tracked_keys(), 1);
    }
}
