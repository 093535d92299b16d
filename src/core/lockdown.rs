//! Process-wide admin surface lockdown.

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use parking_lot::Mutex;

use crate::utils::expiry_after;

/// Global lockdown flag with an expiry instant
#[derive(Debug, Default)]
pub struct LockdownState {
    until: Mutex<Option<DateTime<Utc>>>,
}

impl LockdownState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the admin surface until `now + duration`
    ///
    /// # Returns
    ///
    /// `true` if no lockdown was in force at `now`. An active lockdown is
    /// extended and reports `false`.
    pub fn activate(&self, duration: Duration, now: DateTime<Utc>) -> bool {
        if duration <= Duration::zero() {
            debug_assert!(false, "lockdown duration must be positive, got {}", duration);
            warn!("Refusing to activate lockdown with non-positive duration {}", duration);
            return false;
        }
        let until = expiry_after(now, duration);
        let mut current = self.until.lock();
        let started = current.map_or(true, |expires_at| now >= expires_at);
        *current = Some(until);
        if started {
            info!("Admin lockdown active until {}", until);
        } else {
            info!("Admin lockdown extended until {}", until);
        }
        started
    }

    /// Whether the lockdown is in force at `now`
    ///
    /// An expired lockdown is cleared on lookup.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.active_until(now).is_some()
    }

    /// Expiry of the lockdown if it is in force at `now`
    pub fn active_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut until = self.until.lock();
        match *until {
            Some(expires_at) if now < expires_at => Some(expires_at),
            Some(_) => {
                *until = None;
                info!("Admin lockdown expired");
                None
            }
            None => None,
        }
    }

    /// End the lockdown immediately
    pub fn clear(&self) {
        if self.until.lock().take().is_some() {
            info!("Admin lockdown cleared");
        }
    }
}
