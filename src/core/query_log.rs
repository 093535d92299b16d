//! Access log volume control.
//!
//! Nothing in this module ever blocks a request. It only decides which
//! access events reach the audit log and marks keys that query unusually
//! often.

use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::warn;

use crate::core::audit::{AuditEntry, AuditSink};
use crate::core::window::TimeWindowCounter;
use crate::models::AuditConfig;
use crate::utils::format_window_key;

pub const HIGH_FREQUENCY_ACTION: &str = "QUERY_HIGH_FREQUENCY";

const SKIPPED_PATTERNS: &[&str] = &[
    "/_framework/",
    "/_blazor/",
    "/_content/",
    "/css/",
    "/js/",
    "/lib/",
    "/bootstrap/",
    "/favicon.ico",
    "/robots.txt",
    ".css",
    ".js",
    ".map",
    ".woff",
    ".woff2",
    ".ttf",
    ".eot",
    ".svg",
    ".png",
    ".jpg",
    ".jpeg",
    ".gif",
    ".ico",
];

const LOGGED_PATHS: &[&str] = &["/", "/admin", "/admin/login", "/admin/dashboard"];

/// Whether an access to `path` is worth an audit line
///
/// Static assets and framework internals are skipped; only the main pages
/// are logged, with or without a trailing slash.
pub fn is_loggable_path(path: &str) -> bool {
    let lowered = path.to_ascii_lowercase();
    if SKIPPED_PATTERNS.iter().any(|pattern| lowered.contains(pattern)) {
        return false;
    }
    let trimmed = if lowered.len() > 1 {
        lowered.strip_suffix('/').unwrap_or(&lowered)
    } else {
        lowered.as_str()
    };
    LOGGED_PATHS.contains(&trimmed)
}

/// Per (key, category) frequency tracking for access logging
pub struct QueryLogThrottle {
    counter: TimeWindowCounter,
    threshold: usize,
    sink: Arc<dyn AuditSink>,
}

impl QueryLogThrottle {
    pub fn new(config: &AuditConfig, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            counter: TimeWindowCounter::new(config.window()),
            threshold: config.high_frequency_threshold as usize,
            sink,
        }
    }

    /// Decide whether an access event for `key` in `category` is persisted
    ///
    /// Always `true`. When the count inside the window passes the threshold
    /// a single high frequency marker is appended and the count restarts.
    pub fn should_log(&self, key: &str, category: &str, now: DateTime<Utc>) -> bool {
        let window_key = format_window_key(key, category);
        if let Some(count) = self.counter.record_and_reset_above(&window_key, now, self.threshold) {
            warn!("High frequency {} queries from {}: {}", category, key, count);
            self.sink.append(AuditEntry::new(
                now,
                key,
                HIGH_FREQUENCY_ACTION,
                "",
                format!(
                    "High frequency {} queries: {} in {}min",
                    category,
                    count,
                    self.counter.window().num_minutes()
                ),
                "",
            ));
        }
        true
    }

    /// Drop idle counters
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        self.counter.purge_idle(now)
    }

    pub fn tracked_keys(&self) -> usize {
        self.counter.tracked_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audit::MemoryAuditLog;
    use chrono::{Duration, TimeZone};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn throttle(threshold: u32) -> (QueryLogThrottle, Arc<MemoryAuditLog>) {
        let log = Arc::new(MemoryAuditLog::default());
        let config = AuditConfig {
            high_frequency_threshold: threshold,
            ..AuditConfig::default()
        };
        (QueryLogThrottle::new(&config, log.clone()), log)
    }

    #[test]
    fn test_loggable_paths() {
        assert!(is_loggable_path("/"));
        assert!(is_loggable_path("/admin"));
        assert!(is_loggable_path("/Admin/Login/"));
        assert!(is_loggable_path("/admin/dashboard"));
        assert!(!is_loggable_path("/css/site.css"));
        assert!(!is_loggable_path("/_blazor/negotiate"));
        assert!(!is_loggable_path("/favicon.ico"));
        assert!(!is_loggable_path("/rooms"));
    }

    #[test]
    fn test_always_logs_and_marks_once() {
        let (throttle, log) = throttle(50);

        for i in 0..50 {
            assert!(throttle.should_log("10.0.0.1", "VACANT_ROOMS", at(i)));
        }
        assert!(log.entries().is_empty());

        assert!(throttle.should_log("10.0.0.1", "VACANT_ROOMS", at(50)));
        let entries = log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, HIGH_FREQUENCY_ACTION);
        assert_eq!(entries[0].ip, "10.0.0.1");
        assert!(entries[0].details.contains("51 in 5min"));

        // Counter restarted
        for i in 51..60 {
            assert!(throttle.should_log("10.0.0.1", "VACANT_ROOMS", at(i)));
        }
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn test_concurrent_callers_emit_one_marker() {
        let (throttle, log) = throttle(50);
        let throttle = Arc::new(throttle);
        let now = at(0);

        // 56 calls cross the threshold once
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                std::thread::spawn(move || {
                    for _ in 0..7 {
                        assert!(throttle.should_log("10.0.0.9", "VACANT_ROOMS", now));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let markers = log
            .entries()
            .iter()
            .filter(|e| e.action == HIGH_FREQUENCY_ACTION)
            .count();
        assert_eq!(markers, 1);
    }

    #[test]
    fn test_categories_are_counted_separately() {
        let (throttle, log) = throttle(2);
        throttle.should_log("k", "VACANT_ROOMS", at(0));
        throttle.should_log("k", "VACANT_ROOMS", at(1));
        throttle.should_log("k", "ROOM_USAGE", at(2));
        assert!(log.entries().is_empty());

        throttle.should_log("k", "VACANT_ROOMS", at(3));
        assert_eq!(log.entries().len(), 1);
    }

    #[test]
    fn test_old_queries_leave_window() {
        let (throttle, log) = throttle(2);
        throttle.should_log("k", "VACANT_ROOMS", at(0));
        throttle.should_log("k", "VACANT_ROOMS", at(1));
        let later = at(1) + Duration::minutes(6);
        throttle.should_log("k", "VACANT_ROOMS", later);
        assert!(log.entries().is_empty());
        assert_eq!(throttle.purge_idle(later + Duration::minutes(6)), 1);
    }
}
