//! Abuse guard: request rate limiting, brute-force detection, bans and
//! admin lockdown.
//!
//! Every inbound request and every login attempt is offered to the
//! [`AbuseGuard`] before any work is done. Per key the guard moves between
//! clean, warned and banned; globally it escalates to an admin lockdown when
//! enough distinct keys are caught brute forcing within the attacker window.
//!
//! Every operation has an `_at` variant taking the current instant, which the
//! plain variants call with `Utc::now()`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use metrics::{gauge, increment_counter};
use serde::Serialize;
use thiserror::Error;

use crate::core::alert_throttle::AlertThrottle;
use crate::core::alerts::{AlertChannel, AlertLevel, AlertSink, SecurityAlert};
use crate::core::audit::{AuditEntry, AuditSink};
use crate::core::ban_registry::{ActiveBan, BanReason, BanRegistry};
use crate::core::lockdown::LockdownState;
use crate::core::window::TimeWindowCounter;
use crate::models::{AlertConfig, GuardConfig};

pub const BRUTE_FORCE_ACTION: &str = "SECURITY_BRUTE_FORCE_DETECTED";
pub const LOCKDOWN_ACTION: &str = "SECURITY_ADMIN_LOCKDOWN";

/// Longest accepted window or duration: ten years
const MAX_CONFIG_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// Errors raised while building a guard
#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Invalid guard configuration: {0}")]
    InvalidConfig(String),
}

/// Why a request was denied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    /// The key was already banned; the request was not counted
    Banned,
    /// This request pushed the key over the rate limit and banned it
    RateLimited,
}

/// Outcome of [`AbuseGuard::check_request`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDecision {
    Allow,
    Deny(DenyReason),
}

impl RequestDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RequestDecision::Allow)
    }
}

/// Outcome of [`AbuseGuard::check_login`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Accepted,
    /// Failed or refused login; `attempts_remaining` is zero once banned
    Rejected { attempts_remaining: u32 },
}

/// Snapshot of the guard for operator dashboards
#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    pub active_bans: usize,
    pub total_bans: u64,
    pub admin_locked: bool,
    pub lockdown_until: Option<DateTime<Utc>>,
    pub recent_breach_attempts: usize,
    pub tracked_keys: usize,
}

/// In-process abuse guard
pub struct AbuseGuard {
    config: GuardConfig,
    requests: TimeWindowCounter,
    login_failures: TimeWindowCounter,
    breach_attempts: TimeWindowCounter,
    bans: BanRegistry,
    lockdown: LockdownState,
    alert_throttle: AlertThrottle,
    alerts: Arc<dyn AlertSink>,
    audit: Option<Arc<dyn AuditSink>>,
    bans_issued: AtomicU64,
}

impl AbuseGuard {
    /// Create a guard, rejecting inconsistent thresholds up front
    pub fn new(
        config: GuardConfig,
        alert_config: &AlertConfig,
        alerts: Arc<dyn AlertSink>,
    ) -> Result<Self, GuardError> {
        validate(&config)?;
        info!(
            "Abuse guard ready: deny above {} req/{}s, ban after {} failed logins/{}s, lockdown at {} attackers/{}s",
            config.request_deny_threshold,
            config.request_window_seconds,
            config.login_fail_threshold,
            config.login_window_seconds,
            config.attacker_threshold,
            config.attacker_window_seconds,
        );

        Ok(Self {
            requests: TimeWindowCounter::new(config.request_window()),
            login_failures: TimeWindowCounter::new(config.login_window()),
            breach_attempts: TimeWindowCounter::new(config.attacker_window()),
            bans: BanRegistry::new(),
            lockdown: LockdownState::new(),
            alert_throttle: AlertThrottle::new(alert_config.cooldown()),
            alerts,
            audit: None,
            bans_issued: AtomicU64::new(0),
            config,
        })
    }

    /// Record brute force detections and lockdowns in `sink`
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn check_request(&self, key: &str) -> RequestDecision {
        self.check_request_at(key, Utc::now())
    }

    /// Count a request from `key` and decide whether it may proceed
    ///
    /// Banned keys are denied without being counted. The request that takes
    /// the trailing count above the deny threshold is denied and bans the key.
    pub fn check_request_at(&self, key: &str, now: DateTime<Utc>) -> RequestDecision {
        if self.bans.is_banned(key, now) {
            increment_counter!("guard_requests_denied_total", "reason" => "banned");
            return RequestDecision::Deny(DenyReason::Banned);
        }

        let count = self.requests.record(key, now);

        if count > self.config.request_deny_threshold as usize {
            increment_counter!("guard_requests_denied_total", "reason" => "rate_limited");
            warn!(
                "Rate limit exceeded by {}: {} requests in {}s",
                key, count, self.config.request_window_seconds
            );
            self.ban(key, self.config.rate_limit_ban(), BanReason::RateLimit, now);
            self.raise_alert(
                AlertLevel::Warning,
                AlertChannel::RateLimit,
                "Rate limit ban",
                format!(
                    "IP {} made {} requests in {}s and has been banned for {} minutes.",
                    key,
                    count,
                    self.config.request_window_seconds,
                    self.config.rate_limit_ban().num_minutes()
                ),
                Some(key),
                now,
            );
            return RequestDecision::Deny(DenyReason::RateLimited);
        }

        if count > self.config.request_warn_threshold as usize {
            warn!(
                "High request rate from {}: {} requests in {}s",
                key, count, self.config.request_window_seconds
            );
        }

        RequestDecision::Allow
    }

    pub fn check_login(&self, key: &str, success: bool) -> LoginOutcome {
        self.check_login_at(key, success, Utc::now())
    }

    /// Track a login attempt from `key`
    ///
    /// A success forgives every earlier failure. Reaching the failure
    /// threshold bans the key and records a breach attempt; enough distinct
    /// attackers inside the attacker window lock the admin surface.
    pub fn check_login_at(&self, key: &str, success: bool, now: DateTime<Utc>) -> LoginOutcome {
        if self.bans.is_banned(key, now) {
            debug!("Login attempt from banned {} ignored", key);
            return LoginOutcome::Rejected { attempts_remaining: 0 };
        }

        if success {
            self.login_failures.clear(key);
            info!("Successful admin login from {}", key);
            return LoginOutcome::Accepted;
        }

        increment_counter!("guard_login_failures_total");
        let failures = self.login_failures.record(key, now);
        let threshold = self.config.login_fail_threshold as usize;

        if failures >= threshold {
            warn!("Brute force detected from {}: {} failed logins", key, failures);
            self.ban(key, self.config.brute_force_ban(), BanReason::BruteForce, now);
            self.raise_alert(
                AlertLevel::Warning,
                AlertChannel::BruteForce,
                "Brute force ban",
                format!(
                    "IP {} failed {} logins within {} minutes and has been banned for {} minutes.",
                    key,
                    failures,
                    self.config.login_window().num_minutes(),
                    self.config.brute_force_ban().num_minutes()
                ),
                Some(key),
                now,
            );
            self.audit(
                now,
                key,
                BRUTE_FORCE_ACTION,
                format!("{} failed logins within {}min", failures, self.config.login_window().num_minutes()),
            );
            self.record_breach(key, now);
            return LoginOutcome::Rejected { attempts_remaining: 0 };
        }

        let warning_from = threshold.saturating_sub(self.config.login_warning_margin as usize);
        if failures >= warning_from {
            warn!("Multiple failed login attempts from {}: {}/{}", key, failures, threshold);
        } else {
            debug!("Failed login from {}: {}/{}", key, failures, threshold);
        }

        LoginOutcome::Rejected {
            attempts_remaining: (threshold - failures) as u32,
        }
    }

    fn record_breach(&self, key: &str, now: DateTime<Utc>) {
        self.breach_attempts.record(key, now);
        let attackers = self.breach_attempts.active_keys(now);
        if attackers < self.config.attacker_threshold as usize {
            return;
        }

        if self.lockdown.activate(self.config.lockdown(), now) {
            increment_counter!("guard_lockdowns_total");
        }
        self.audit(
            now,
            key,
            LOCKDOWN_ACTION,
            format!(
                "Admin panel locked for {}min: {} distinct attackers within {}min",
                self.config.lockdown().num_minutes(),
                attackers,
                self.config.attacker_window().num_minutes()
            ),
        );
        error!(
            "Admin panel locked for {} minutes: {} distinct attackers within {} minutes (latest {})",
            self.config.lockdown().num_minutes(),
            attackers,
            self.config.attacker_window().num_minutes(),
            key
        );
        self.raise_alert(
            AlertLevel::Critical,
            AlertChannel::AdminLockdown,
            "CRITICAL: Admin panel locked",
            format!(
                "Admin panel has been locked for {} minutes after brute force attempts from {} distinct IPs within {} minutes. Latest attacker IP: {}",
                self.config.lockdown().num_minutes(),
                attackers,
                self.config.attacker_window().num_minutes(),
                key
            ),
            Some(key),
            now,
        );
    }

    fn audit(&self, now: DateTime<Utc>, key: &str, action: &str, details: String) {
        if let Some(sink) = &self.audit {
            sink.append(AuditEntry::new(now, key, action, "/admin/login", details, ""));
        }
    }

    fn ban(&self, key: &str, duration: Duration, reason: BanReason, now: DateTime<Utc>) {
        if self.bans.ban(key, duration, reason, now) {
            self.bans_issued.fetch_add(1, Ordering::Relaxed);
            increment_counter!("guard_bans_total", "reason" => reason.as_str());
        }
        gauge!("guard_active_bans", self.bans.active_count(now) as f64);
    }

    fn raise_alert(
        &self,
        level: AlertLevel,
        channel: AlertChannel,
        subject: &str,
        body: String,
        key: Option<&str>,
        now: DateTime<Utc>,
    ) {
        if self.alert_throttle.should_send(channel, now) {
            self.alerts
                .dispatch(SecurityAlert::new(level, channel, subject, body, key, now));
        } else {
            increment_counter!("guard_alerts_suppressed_total");
            debug!("Alert suppressed by cooldown: {}", subject);
        }
    }

    pub fn is_admin_surface_available(&self) -> bool {
        self.is_admin_surface_available_at(Utc::now())
    }

    pub fn is_admin_surface_available_at(&self, now: DateTime<Utc>) -> bool {
        !self.lockdown.is_active(now)
    }

    /// Expiry of the current lockdown, if any
    pub fn lockdown_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lockdown.active_until(now)
    }

    pub fn clear_lockdown(&self) {
        self.lockdown.clear();
    }

    pub fn is_key_banned(&self, key: &str, now: DateTime<Utc>) -> bool {
        self.bans.is_banned(key, now)
    }

    /// Ban `key` on operator request
    pub fn ban_key(&self, key: &str, duration: Duration, now: DateTime<Utc>) {
        self.ban(key, duration, BanReason::Manual, now);
    }

    pub fn list_banned_ips(&self) -> Vec<ActiveBan> {
        self.list_banned_ips_at(Utc::now())
    }

    pub fn list_banned_ips_at(&self, now: DateTime<Utc>) -> Vec<ActiveBan> {
        self.bans.list_active(now)
    }

    /// Lift a ban and forget the key's recent requests and failures
    pub fn unban(&self, key: &str) -> bool {
        let removed = self.bans.unban(key);
        if removed {
            self.requests.clear(key);
            self.login_failures.clear(key);
            gauge!("guard_active_bans", self.bans.active_count(Utc::now()) as f64);
        }
        removed
    }

    /// Drop expired bans and lockdown, and idle counters
    ///
    /// # Returns
    ///
    /// The number of expired bans removed.
    pub fn cleanup_expired(&self, now: DateTime<Utc>) -> usize {
        let expired = self.bans.cleanup_expired(now);
        // Lookup clears an expired lockdown
        let locked = self.lockdown.is_active(now);
        let idle = self.requests.purge_idle(now)
            + self.login_failures.purge_idle(now)
            + self.breach_attempts.purge_idle(now);
        if expired > 0 || idle > 0 {
            debug!(
                "Guard cleanup: {} expired bans, {} idle windows, lockdown {}",
                expired,
                idle,
                if locked { "active" } else { "inactive" }
            );
        }
        gauge!("guard_active_bans", self.bans.active_count(now) as f64);
        expired
    }

    pub fn security_stats(&self, now: DateTime<Utc>) -> SecurityStats {
        SecurityStats {
            active_bans: self.bans.active_count(now),
            total_bans: self.bans_issued.load(Ordering::Relaxed),
            admin_locked: self.lockdown.is_active(now),
            lockdown_until: self.lockdown.active_until(now),
            recent_breach_attempts: self.breach_attempts.active_keys(now),
            tracked_keys: self.requests.tracked_keys(),
        }
    }
}

fn validate(config: &GuardConfig) -> Result<(), GuardError> {
    let windows = [
        ("request_window_seconds", config.request_window_seconds),
        ("rate_limit_ban_seconds", config.rate_limit_ban_seconds),
        ("login_window_seconds", config.login_window_seconds),
        ("brute_force_ban_seconds", config.brute_force_ban_seconds),
        ("attacker_window_seconds", config.attacker_window_seconds),
        ("lockdown_seconds", config.lockdown_seconds),
    ];
    if let Some((name, _)) = windows.iter().find(|(_, value)| *value == 0) {
        return Err(GuardError::InvalidConfig(format!("{} must be positive", name)));
    }
    if let Some((name, value)) = windows.iter().find(|(_, value)| *value > MAX_CONFIG_SECONDS) {
        return Err(GuardError::InvalidConfig(format!(
            "{} ({}) must not exceed {}",
            name, value, MAX_CONFIG_SECONDS
        )));
    }

    let thresholds = [
        ("request_deny_threshold", config.request_deny_threshold),
        ("login_fail_threshold", config.login_fail_threshold),
        ("attacker_threshold", config.attacker_threshold),
    ];
    if let Some((name, _)) = thresholds.iter().find(|(_, value)| *value == 0) {
        return Err(GuardError::InvalidConfig(format!("{} must be positive", name)));
    }

    if config.request_warn_threshold >= config.request_deny_threshold {
        return Err(GuardError::InvalidConfig(format!(
            "request_warn_threshold ({}) must be below request_deny_threshold ({})",
            config.request_warn_threshold, config.request_deny_threshold
        )));
    }
    if config.login_warning_margin >= config.login_fail_threshold {
        return Err(GuardError::InvalidConfig(format!(
            "login_warning_margin ({}) must be below login_fail_threshold ({})",
            config.login_warning_margin, config.login_fail_threshold
        )));
    }
    Ok(())
}
