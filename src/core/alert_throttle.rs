//! Cooldown for outbound security alerts.

use std::collections::HashMap;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::core::alerts::AlertChannel;

/// At most one alert per channel per cooldown window
#[derive(Debug)]
pub struct AlertThrottle {
    cooldown: Duration,
    last_sent: Mutex<HashMap<AlertChannel, DateTime<Utc>>>,
}

impl AlertThrottle {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Whether an alert on `channel` may go out at `now`
    ///
    /// A `true` answer also marks the channel as sent; the check and the
    /// update happen under one lock so concurrent triggers yield one send.
    pub fn should_send(&self, channel: AlertChannel, now: DateTime<Utc>) -> bool {
        let mut last_sent = self.last_sent.lock();
        match last_sent.get(&channel) {
            Some(last) if now - *last < self.cooldown => false,
            _ => {
                last_sent.insert(channel, now);
                true
            }
        }
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
    fn test_cooldown_per_channel() {
        let throttle = AlertThrottle::new(Duration::minutes(15));

        assert!(throttle.should_send(AlertChannel::RateLimit, at(0)));
        assert!(!throttle.should_send(AlertChannel::RateLimit, at(60)));
        assert!(!throttle.should_send(AlertChannel::RateLimit, at(899)));
        assert!(throttle.should_send(AlertChannel::BruteForce, at(60)));

        assert!(throttle.should_send(AlertChannel::RateLimit, at(900)));
        assert!(!throttle.should_send(AlertChannel::RateLimit, at(901)));
    }

    #[test]
    fn test_suppressed_attempts_do_not_extend_cooldown() {
        let throttle = AlertThrottle::new(Duration::seconds(100));
        assert!(throttle.should_send(AlertChannel::AdminLockdown, at(0)));
        assert!(!throttle.should_send(AlertChannel::AdminLockdown, at(99)));
        assert!(throttle.should_send(AlertChannel::AdminLockdown, at(100)));
    }

    #[test]
    fn test_concurrent_triggers_send_once() {
        let throttle = Arc::new(AlertThrottle::new(Duration::minutes(15)));
        let sent = Arc::new(AtomicUsize::new(0));
        let now = at(0);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                let sent = Arc::clone(&sent);
                std::thread::spawn(move || {
                    if throttle.should_send(AlertChannel::BruteForce, now) {
                        sent.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(sent.load(Ordering::SeqCst), 1);
    }
}
