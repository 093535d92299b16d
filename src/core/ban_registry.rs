//! Temporary bans with lazy expiry.

use std::collections::HashMap;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::utils::expiry_after;

/// Why a key was banned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BanReason {
    RateLimit,
    BruteForce,
    Manual,
}

impl BanReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BanReason::RateLimit => "rate_limit",
            BanReason::BruteForce => "brute_force",
            BanReason::Manual => "manual",
        }
    }
}

impl std::fmt::Display for BanReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct BanEntry {
    expires_at: DateTime<Utc>,
    reason: BanReason,
}

/// Snapshot of an active ban for operator views
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveBan {
    pub key: String,
    pub reason: BanReason,
    pub expires_at: DateTime<Utc>,
    pub remaining_seconds: i64,
}

/// Map of banned keys to their expiry instant
#[derive(Debug, Default)]
pub struct BanRegistry {
    bans: Mutex<HashMap<String, BanEntry>>,
}

impl BanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ban `key` until `now + duration`
    ///
    /// A ban on an already banned key replaces the expiry with the fresh
    /// value; durations never stack.
    ///
    /// # Returns
    ///
    /// `true` if the key was not actively banned before this call. A
    /// non-positive duration is an anomaly: it is logged and no ban is
    /// written.
    pub fn ban(&self, key: &str, duration: Duration, reason: BanReason, now: DateTime<Utc>) -> bool {
        if duration <= Duration::zero() {
            debug_assert!(false, "ban duration must be positive, got {}", duration);
            warn!("Refusing to ban {} with non-positive duration {}", key, duration);
            return false;
        }

        let entry = BanEntry {
            expires_at: expiry_after(now, duration),
            reason,
        };

        let previous = self.bans.lock().insert(key.to_string(), entry);
        let created = previous.map_or(true, |old| now >= old.expires_at);
        if created {
            info!("Banned {} for {}s (reason: {})", key, duration.num_seconds(), reason);
        } else {
            info!("Ban on {} refreshed for {}s (reason: {})", key, duration.num_seconds(), reason);
        }
        created
    }

    /// Whether `key` is banned at `now`
    ///
    /// An expired entry is evicted on lookup.
    pub fn is_banned(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut bans = self.bans.lock();
        match bans.get(key) {
            Some(entry) if now < entry.expires_at => true,
            Some(_) => {
                bans.remove(key);
                debug!("Ban on {} expired", key);
                false
            }
            None => false,
        }
    }

    /// Remove a ban regardless of its remaining time
    ///
    /// # Returns
    ///
    /// `true` if a ban entry existed.
    pub fn unban(&self, key: &str) -> bool {
        let removed = self.bans.lock().remove(key).is_some();
        if removed {
            info!("Unbanned {}", key);
        }
        removed
    }

    /// Active bans ordered by soonest expiry
    pub fn list_active(&self, now: DateTime<Utc>) -> Vec<ActiveBan> {
        let mut active: Vec<ActiveBan> = self
            .bans
            .lock()
            .iter()
            .filter(|(_, entry)| now < entry.expires_at)
            .map(|(key, entry)| ActiveBan {
                key: key.clone(),
                reason: entry.reason,
                expires_at: entry.expires_at,
                remaining_seconds: (entry.expires_at - now).num_seconds(),
            })
            .collect();
        active.sort_by(|a, b| a.expires_at.cmp(&b.expires_at).then_with(|| a.key.cmp(&b.key)));
        active
    }

    /// Number of bans still in force at `now`
    pub fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.bans
            .lock()
            .values()
            .filter(|entry| now < entry.expires_at)
            .count()
    }

    /// Remove every expired entry
    ///
    /// # Returns
    ///
    /// The number of entries removed.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let mut bans = self.bans.lock();
        let before = bans.len();
        bans.retain(|_, entry| now < entry.expires_at);
        let removed = before - bans.len();
        if removed > 0 {
            debug!("Cleaned up {} expired bans", removed);
        }
        removed
    }
}
