//! Periodic cleanup of guard state.
//!
//! Expired bans and stale window entries are already ignored on lookup; this
//! task only keeps memory bounded for keys that stop sending traffic.

use std::sync::Arc;
use std::time::Duration;
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::Serialize;
use tokio::time;

use crate::core::guard::AbuseGuard;
use crate::core::query_log::QueryLogThrottle;
use crate::models::MaintenanceConfig;

/// Result of one cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub expired_bans: usize,
    pub idle_query_windows: usize,
}

/// Run one cleanup pass at `now`
pub fn run_maintenance_pass(
    guard: &AbuseGuard,
    query_log: &QueryLogThrottle,
    now: DateTime<Utc>,
) -> MaintenanceReport {
    let report = MaintenanceReport {
        expired_bans: guard.cleanup_expired(now),
        idle_query_windows: query_log.purge_idle(now),
    };
    debug!(
        "Maintenance pass: {} expired bans, {} idle query windows",
        report.expired_bans, report.idle_query_windows
    );
    report
}

/// Run cleanup passes forever on the configured interval
pub async fn start_maintenance(
    guard: Arc<AbuseGuard>,
    query_log: Arc<QueryLogThrottle>,
    config: MaintenanceConfig,
) {
    info!("Starting maintenance every {}s...", config.interval_seconds);
    let mut interval = time::interval(Duration::from_secs(config.interval_seconds.max(1)));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        interval.tick().await;
        run_maintenance_pass(&guard, &query_log, Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerts::LogAlertSink;
    use crate::core::audit::MemoryAuditLog;
    use crate::models::{AlertConfig, AuditConfig, GuardConfig};
    use chrono::TimeZone;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn test_pass_removes_expired_state() {
        let guard = AbuseGuard::new(
            GuardConfig::default(),
            &AlertConfig::default(),
            Arc::new(LogAlertSink),
        )
        .unwrap();
        let query_log = QueryLogThrottle::new(&AuditConfig::default(), Arc::new(MemoryAuditLog::default()));

        guard.ban_key("10.0.0.1", chrono::Duration::minutes(1), at(0));
        query_log.should_log("10.0.0.1", "VACANT_ROOMS", at(0));

        assert_eq!(run_maintenance_pass(&guard, &query_log, at(30)), MaintenanceReport::default());
        assert_eq!(
            run_maintenance_pass(&guard, &query_log, at(3600)),
            MaintenanceReport {
                expired_bans: 1,
                idle_query_windows: 1,
            }
        );
        assert_eq!(query_log.tracked_keys(), 0);
    }
}
