//! Append-only access audit log.
//!
//! Entries are written one per line to a file per UTC day named
//! `access-YYYY-MM-DD.log`:
//!
//! ```text
//! [2024-05-01 08:30:12.345] IP:10.0.0.1 ACTION:ACCESS PATH:/admin DETAILS: UA:Mozilla/5.0
//! ```
//!
//! Writers never touch the disk themselves; [`FileAuditLog`] hands entries to
//! a background task through a channel.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::{debug, error, info};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";
const LOOKBACK_DAYS: i64 = 7;
const MEMORY_CAPACITY: usize = 100;

/// Errors that can occur during audit log operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One audit log line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub action: String,
    pub path: String,
    pub details: String,
    pub user_agent: String,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        ip: impl Into<String>,
        action: impl Into<String>,
        path: impl Into<String>,
        details: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            ip: ip.into(),
            action: action.into(),
            path: path.into(),
            details: details.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Security relevant entries: bans, lockdowns and login activity
    pub fn is_security_event(&self) -> bool {
        self.action.starts_with("SECURITY_") || self.action.contains("LOGIN")
    }

    /// Render as a single log line, without the trailing newline
    pub fn to_line(&self) -> String {
        format!(
            "[{}] IP:{} ACTION:{} PATH:{} DETAILS:{} UA:{}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            single_line(&self.ip),
            single_line(&self.action),
            single_line(&self.path),
            single_line(&self.details),
            single_line(&self.user_agent),
        )
    }

    /// Parse a line produced by [`AuditEntry::to_line`]
    pub fn parse_line(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (timestamp, rest) = rest.split_once("] ")?;
        let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        let rest = rest.strip_prefix("IP:")?;
        let (ip, rest) = rest.split_once(" ACTION:")?;
        let (action, rest) = rest.split_once(" PATH:")?;
        let (path, rest) = rest.split_once(" DETAILS:")?;
        let (details, user_agent) = rest.rsplit_once(" UA:")?;

        Some(Self::new(
            Utc.from_utc_datetime(&timestamp),
            ip,
            action,
            path,
            details,
            user_agent,
        ))
    }
}

fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// Destination for audit entries
///
/// Implementations must not block the caller.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: AuditEntry);
}

/// Keeps the most recent entries in memory
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl MemoryAuditLog {
    /// Entries oldest first
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Up to `count` entries, newest first
    pub fn recent(&self, count: usize) -> Vec<AuditEntry> {
        self.entries.lock().iter().rev().take(count).cloned().collect()
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: AuditEntry) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > MEMORY_CAPACITY {
            entries.pop_front();
        }
    }
}

/// Audit sink backed by daily log files
#[derive(Debug, Clone)]
pub struct FileAuditLog {
    sender: mpsc::UnboundedSender<AuditEntry>,
    directory: PathBuf,
}

impl FileAuditLog {
    /// Create a sink and the receiving end for [`run_audit_writer`]
    pub fn new(directory: impl Into<PathBuf>) -> (Self, mpsc::UnboundedReceiver<AuditEntry>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let log = Self {
            sender,
            directory: directory.into(),
        };
        (log, receiver)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl AuditSink for FileAuditLog {
    fn append(&self, entry: AuditEntry) {
        if self.sender.send(entry).is_err() {
            error!("Audit writer stopped, dropping entry");
        }
    }
}

/// Path of the log file for `date`
pub fn log_file_path(directory: &Path, date: NaiveDate) -> PathBuf {
    directory.join(format!("access-{}.log", date.format("%Y-%m-%d")))
}

/// Append queued entries to disk until every sender is dropped
///
/// Write failures are logged and the entry is dropped.
pub async fn run_audit_writer(directory: PathBuf, mut receiver: mpsc::UnboundedReceiver<AuditEntry>) {
    info!("Starting audit writer in {}", directory.display());
    while let Some(entry) = receiver.recv().await {
        if let Err(e) = append_entry(&directory, &entry).await {
            error!("Failed to write audit entry to {}: {}", directory.display(), e);
        }
    }
    info!("Audit writer stopped");
}

async fn append_entry(directory: &Path, entry: &AuditEntry) -> Result<(), AuditError> {
    tokio::fs::create_dir_all(directory).await?;
    let path = log_file_path(directory, entry.timestamp.date_naive());
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    let mut line = entry.to_line();
    line.push('\n');
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

/// Read up to `count` entries, newest first
///
/// Scans the file for `today` and the seven days before it. Missing files
/// and malformed lines are skipped.
pub async fn read_recent(
    directory: &Path,
    count: usize,
    today: NaiveDate,
) -> Result<Vec<AuditEntry>, AuditError> {
    let mut entries = Vec::new();
    for offset in 0..=LOOKBACK_DAYS {
        if entries.len() >= count {
            break;
        }
        let Some(date) = today.checked_sub_signed(Duration::days(offset)) else {
            break;
        };
        let path = log_file_path(directory, date);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        let mut day: Vec<AuditEntry> = content
            .lines()
            .filter_map(|line| {
                let parsed = AuditEntry::parse_line(line);
                if parsed.is_none() && !line.is_empty() {
                    debug!("Skipping malformed audit line in {}", path.display());
                }
                parsed
            })
            .collect();
        day.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries.extend(day.into_iter().take(count - entries.len()));
    }
    Ok(entries)
}

/// Recent security events, newest first
pub async fn recent_security_events(
    directory: &Path,
    count: usize,
    today: NaiveDate,
) -> Result<Vec<AuditEntry>, AuditError> {
    let entries = read_recent(directory, count.saturating_mul(2), today).await?;
    Ok(entries
        .into_iter()
        .filter(AuditEntry::is_security_event)
        .take(count)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;
    use uuid::Uuid;

    fn entry(seconds: i64, action: &str) -> AuditEntry {
        AuditEntry::new(
            Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap(),
            "10.0.0.1",
            action,
            "/admin/login",
            "Attempt 2/8",
            "Mozilla/5.0 (X11; Linux)",
        )
    }

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("vacant-room-guard-{}", Uuid::new_v4()))
    }

    #[test]
    fn test_line_format() {
        let line = entry(0, "ADMIN_LOGIN_FAILED").to_line();
        assert_eq!(
            line,
            "[2023-11-14 22:13:20.000] IP:10.0.0.1 ACTION:ADMIN_LOGIN_FAILED PATH:/admin/login \
             DETAILS:Attempt 2/8 UA:Mozilla/5.0 (X11; Linux)"
        );
        assert_eq!(AuditEntry::parse_line(&line), Some(entry(0, "ADMIN_LOGIN_FAILED")));
    }

    #[test]
    fn test_newlines_are_flattened() {
        let mut e = entry(0, "ACCESS");
        e.details = "line one\nline two".to_string();
        let line = e.to_line();
        assert!(!line.contains('\n'));
        assert_eq!(AuditEntry::parse_line(&line).unwrap().details, "line one line two");
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        assert!(AuditEntry::parse_line("").is_none());
        assert!(AuditEntry::parse_line("garbage").is_none());
        assert!(AuditEntry::parse_line("[not a time] IP:x ACTION:y PATH:z DETAILS: UA:").is_none());
    }

    #[test]
    fn test_security_event_filter() {
        assert!(entry(0, "SECURITY_IP_BANNED").is_security_event());
        assert!(entry(0, "ADMIN_LOGIN_SUCCESS").is_security_event());
        assert!(!entry(0, "ACCESS").is_security_event());
    }

    #[test]
    fn test_memory_log_is_bounded() {
        let log = MemoryAuditLog::default();
        for i in 0..150 {
            log.append(entry(i, "ACCESS"));
        }
        assert_eq!(log.entries().len(), MEMORY_CAPACITY);
        assert_eq!(log.recent(1)[0].timestamp, entry(149, "ACCESS").timestamp);
    }

    #[tokio::test]
    async fn test_writer_and_reader() {
        let dir = scratch_dir();
        let (log, receiver) = FileAuditLog::new(&dir);

        log.append(entry(0, "ACCESS"));
        log.append(entry(1, "SECURITY_IP_BANNED"));
        log.append(entry(2, "ADMIN_LOGIN_FAILED"));
        drop(log);
        run_audit_writer(dir.clone(), receiver).await;

        let today = entry(0, "ACCESS").timestamp.date_naive();
        let recent = assert_ok!(read_recent(&dir, 10, today).await);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].action, "ADMIN_LOGIN_FAILED");
        assert_eq!(recent[2].action, "ACCESS");

        let events = assert_ok!(recent_security_events(&dir, 10, today).await);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(AuditEntry::is_security_event));

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing_directory() {
        let today = Utc::now().date_naive();
        let recent = assert_ok!(read_recent(&scratch_dir(), 10, today).await);
        assert!(recent.is_empty());
    }
}
