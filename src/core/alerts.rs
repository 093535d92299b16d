//! Security alert delivery for the abuse guard.
//!
//! The guard hands alerts to an [`AlertSink`], which must return
//! immediately. [`QueuedAlertSink`] buffers alerts on a bounded channel and a
//! background worker forwards them to an [`AlertNotifier`], usually the
//! [`EmailNotifier`] talking to the notification HTTP API.

use std::time::Duration;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use log::{error, info, warn};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use crate::models::AlertConfig;

/// Errors that can occur while delivering an alert
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("API request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Notification API rejected the alert with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Alert level
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum AlertLevel {
    /// Warning alert
    Warning,
    /// Critical alert
    Critical,
}

/// Independent cooldown channels for outbound alerts
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    RateLimit,
    BruteForce,
    AdminLockdown,
}

/// Alert raised by the guard
#[derive(Debug, Clone, Serialize)]
pub struct SecurityAlert {
    /// Alert ID
    pub id: String,
    /// Alert level
    pub level: AlertLevel,
    /// Cooldown channel
    pub channel: AlertChannel,
    /// Short subject line
    pub subject: String,
    /// Human readable details
    pub body: String,
    /// Offending key, if any
    pub ip: Option<String>,
    /// Alert creation timestamp
    pub created_at: DateTime<Utc>,
}

impl SecurityAlert {
    pub fn new(
        level: AlertLevel,
        channel: AlertChannel,
        subject: impl Into<String>,
        body: impl Into<String>,
        ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            level,
            channel,
            subject: subject.into(),
            body: body.into(),
            ip: ip.map(str::to_string),
            created_at: now,
        }
    }
}

/// Fire-and-forget destination for alerts
///
/// Implementations must not block the caller.
#[cfg_attr(test, mockall::automock)]
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, alert: SecurityAlert);
}

/// Sink that only writes alerts to the service log
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn dispatch(&self, alert: SecurityAlert) {
        warn!("[{:?}] {}: {}", alert.level, alert.subject, alert.body);
    }
}

/// Sink that queues alerts for a background worker
#[derive(Debug, Clone)]
pub struct QueuedAlertSink {
    sender: mpsc::Sender<SecurityAlert>,
}

impl QueuedAlertSink {
    /// Create a sink and the receiving end for [`run_alert_worker`]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SecurityAlert>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl AlertSink for QueuedAlertSink {
    fn dispatch(&self, alert: SecurityAlert) {
        match self.sender.try_send(alert) {
            Ok(()) => {}
            Err(TrySendError::Full(alert)) => {
                warn!("Alert queue full, dropping alert: {}", alert.subject);
            }
            Err(TrySendError::Closed(alert)) => {
                error!("Alert worker stopped, dropping alert: {}", alert.subject);
            }
        }
    }
}

/// Delivers a single alert to an external system
pub trait AlertNotifier: Send + Sync {
    fn notify(&self, alert: &SecurityAlert) -> BoxFuture<'static, Result<(), AlertError>>;
}

/// Request body of the notification API
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmailRequest<'a> {
    to: [&'a str; 1],
    subject: String,
    body: String,
    category: &'static str,
    is_html: bool,
    priority: u8,
}

/// Notification API client
pub struct EmailNotifier {
    /// HTTP client
    client: Client,
    /// Full URL of the send endpoint
    endpoint: String,
    /// API key
    api_key: String,
    /// Alert recipient
    recipient: String,
}

impl EmailNotifier {
    /// Create a new notifier instance
    pub fn new(config: &AlertConfig) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/email/send", config.api_base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            recipient: config.recipient.clone(),
        })
    }
}

impl AlertNotifier for EmailNotifier {
    fn notify(&self, alert: &SecurityAlert) -> BoxFuture<'static, Result<(), AlertError>> {
        let payload = EmailRequest {
            to: [self.recipient.as_str()],
            subject: format!("VacantRoom security alert - {}", alert.subject),
            body: format_alert_body(alert),
            category: "SECURITY_ALERT",
            is_html: false,
            priority: match alert.level {
                AlertLevel::Critical => 2,
                AlertLevel::Warning => 1,
            },
        };
        let request = self
            .client
            .post(&self.endpoint)
            .header("X-API-Key", &self.api_key)
            .json(&payload);

        Box::pin(async move {
            let response = request.send().await?;
            let status = response.status();
            if status.is_success() {
                return Ok(());
            }
            let body = response.text().await.unwrap_or_default();
            Err(AlertError::Rejected {
                status: status.as_u16(),
                body,
            })
        })
    }
}

fn format_alert_body(alert: &SecurityAlert) -> String {
    format!(
        "Alert: {}\nLevel: {:?}\nIP: {}\nTime: {}\n\n{}",
        alert.subject,
        alert.level,
        alert.ip.as_deref().unwrap_or("-"),
        alert.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        alert.body,
    )
}

/// Drain the alert queue until every sender is dropped
pub async fn run_alert_worker<N: AlertNotifier>(
    mut receiver: mpsc::Receiver<SecurityAlert>,
    notifier: N,
    max_attempts: u32,
    retry_delay: Duration,
) {
    info!("Starting alert worker...");
    while let Some(alert) = receiver.recv().await {
        deliver(&notifier, &alert, max_attempts, retry_delay).await;
    }
    info!("Alert worker stopped");
}

async fn deliver<N: AlertNotifier>(
    notifier: &N,
    alert: &SecurityAlert,
    max_attempts: u32,
    retry_delay: Duration,
) -> bool {
    let max_attempts = max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match notifier.notify(alert).await {
            Ok(()) => {
                info!("Security alert sent: {}", alert.subject);
                return true;
            }
            Err(e) => {
                warn!(
                    "Alert delivery attempt {}/{} failed for {}: {}",
                    attempt, max_attempts, alert.subject, e
                );
                if attempt < max_attempts && !retry_delay.is_zero() {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }
    error!("Giving up on security alert {}", alert.id);
    false
}
