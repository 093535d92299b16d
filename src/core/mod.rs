//! Core functionality for the abuse guard service.
//!
//! This module contains the core components of the service,
//! including sliding window counting, bans, admin lockdown, alerting,
//! audit logging and periodic maintenance.

pub mod window;
pub mod ban_registry;
pub mod lockdown;
pub mod alert_throttle;
pub mod alerts;
pub mod guard;
pub mod audit;
pub mod query_log;
pub mod maintenance;

pub use window::TimeWindowCounter;
pub use ban_registry::{ActiveBan, BanReason, BanRegistry};
pub use lockdown::LockdownState;
pub use alert_throttle::AlertThrottle;
pub use alerts::{
    AlertChannel, AlertError, AlertLevel, AlertNotifier, AlertSink, EmailNotifier, LogAlertSink,
    QueuedAlertSink, SecurityAlert,
};
pub use guard::{AbuseGuard, DenyReason, GuardError, LoginOutcome, RequestDecision, SecurityStats};
pub use audit::{AuditEntry, AuditError, AuditSink, FileAuditLog, MemoryAuditLog};
pub use query_log::QueryLogThrottle;
pub use maintenance::{MaintenanceReport, start_maintenance};
