use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Abuse guard thresholds and durations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Trailing window for request counting (seconds)
    pub request_window_seconds: u64,
    /// Requests per window above which a "high rate" signal is logged
    pub request_warn_threshold: u32,
    /// Requests per window above which the key is banned
    pub request_deny_threshold: u32,
    /// Ban length after a rate limit violation (seconds)
    pub rate_limit_ban_seconds: u64,
    /// Trailing window for failed login counting (seconds)
    pub login_window_seconds: u64,
    /// Failed logins per window that trigger a brute-force ban
    pub login_fail_threshold: u32,
    /// Distance below the fail threshold where warnings start
    pub login_warning_margin: u32,
    /// Ban length after brute-force detection (seconds)
    pub brute_force_ban_seconds: u64,
    /// Window in which distinct brute-force attackers are counted (seconds)
    pub attacker_window_seconds: u64,
    /// Distinct attackers within the attacker window that trigger lockdown
    pub attacker_threshold: u32,
    /// Admin panel lockdown length (seconds)
    pub lockdown_seconds: u64,
}

impl GuardConfig {
    pub fn request_window(&self) -> Duration {
        seconds(self.request_window_seconds)
    }

    pub fn rate_limit_ban(&self) -> Duration {
        seconds(self.rate_limit_ban_seconds)
    }

    pub fn login_window(&self) -> Duration {
        seconds(self.login_window_seconds)
    }

    pub fn brute_force_ban(&self) -> Duration {
        seconds(self.brute_force_ban_seconds)
    }

    pub fn attacker_window(&self) -> Duration {
        seconds(self.attacker_window_seconds)
    }

    pub fn lockdown(&self) -> Duration {
        seconds(self.lockdown_seconds)
    }
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            request_window_seconds: 60,
            request_warn_threshold: 80,
            request_deny_threshold: 120,
            rate_limit_ban_seconds: 15 * 60,
            login_window_seconds: 5 * 60,
            login_fail_threshold: 8,
            login_warning_margin: 3,
            brute_force_ban_seconds: 30 * 60,
            attacker_window_seconds: 10 * 60,
            attacker_threshold: 5,
            lockdown_seconds: 15 * 60,
        }
    }
}

/// Outbound security alert configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Whether alerts are delivered to the notification API
    pub enabled: bool,
    /// Minimum spacing between two alerts on the same channel (seconds)
    pub cooldown_seconds: u64,
    /// Base URL of the notification API
    pub api_base_url: String,
    /// API key sent in the `X-API-Key` header
    pub api_key: String,
    /// Alert recipient address
    pub recipient: String,
    /// Per-request timeout (seconds)
    pub timeout_seconds: u64,
    /// Pending alerts kept before new ones are dropped
    pub queue_capacity: usize,
    /// Delivery attempts per alert
    pub max_attempts: u32,
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        seconds(self.cooldown_seconds)
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cooldown_seconds: 15 * 60,
            api_base_url: "http://127.0.0.1:5000".to_string(),
            api_key: String::new(),
            recipient: String::new(),
            timeout_seconds: 30,
            queue_capacity: 64,
            max_attempts: 2,
        }
    }
}

/// Access audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Whether access entries are written to disk
    pub enabled: bool,
    /// Directory holding the daily `access-YYYY-MM-DD.log` files
    pub directory: String,
    /// Per key and category count that triggers a high frequency marker
    pub high_frequency_threshold: u32,
    /// Window for the high frequency count (seconds)
    pub window_seconds: u64,
}

impl AuditConfig {
    pub fn window(&self) -> Duration {
        seconds(self.window_seconds)
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: "logs".to_string(),
            high_frequency_threshold: 50,
            window_seconds: 5 * 60,
        }
    }
}

/// Background maintenance configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Sweep interval in seconds
    pub interval_seconds: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self { interval_seconds: 60 }
    }
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Abuse guard configuration
    pub guard: GuardConfig,
    /// Alert configuration
    pub alerts: AlertConfig,
    /// Audit log configuration
    pub audit: AuditConfig,
    /// Maintenance configuration
    pub maintenance: MaintenanceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            guard: GuardConfig::default(),
            alerts: AlertConfig::default(),
            audit: AuditConfig::default(),
            maintenance: MaintenanceConfig::default(),
        }
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX).min(i64::MAX / 1000))
}
