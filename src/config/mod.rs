//! Configuration management for the abuse guard service.
//!
//! This module handles loading and managing application configuration
//! from an optional TOML file overlaid with environment variables.

use std::env;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
pub use crate::models::{
    AlertConfig, AuditConfig, Config, GuardConfig, MaintenanceConfig, ServerConfig,
};

/// Load configuration from the config file and environment variables
///
/// Environment variables use the `GUARD` prefix and `__` as the section
/// separator, e.g. `GUARD_GUARD__REQUEST_DENY_THRESHOLD=200`.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());
    build_config(ConfigBuilder::builder().add_source(File::with_name(&config_file).required(false)))
}

fn build_config(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<Config, ConfigError> {
    let defaults = Config::default();

    let config = builder
        .add_source(
            Environment::with_prefix("GUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .set_default("server.host", defaults.server.host)?
        .set_default("server.port", defaults.server.port)?
        .set_default("guard.request_window_seconds", defaults.guard.request_window_seconds)?
        .set_default("guard.request_warn_threshold", defaults.guard.request_warn_threshold)?
        .set_default("guard.request_deny_threshold", defaults.guard.request_deny_threshold)?
        .set_default("guard.rate_limit_ban_seconds", defaults.guard.rate_limit_ban_seconds)?
        .set_default("guard.login_window_seconds", defaults.guard.login_window_seconds)?
        .set_default("guard.login_fail_threshold", defaults.guard.login_fail_threshold)?
        .set_default("guard.login_warning_margin", defaults.guard.login_warning_margin)?
        .set_default("guard.brute_force_ban_seconds", defaults.guard.brute_force_ban_seconds)?
        .set_default("guard.attacker_window_seconds", defaults.guard.attacker_window_seconds)?
        .set_default("guard.attacker_threshold", defaults.guard.attacker_threshold)?
        .set_default("guard.lockdown_seconds", defaults.guard.lockdown_seconds)?
        .set_default("alerts.enabled", defaults.alerts.enabled)?
        .set_default("alerts.cooldown_seconds", defaults.alerts.cooldown_seconds)?
        .set_default("alerts.api_base_url", defaults.alerts.api_base_url)?
        .set_default("alerts.api_key", defaults.alerts.api_key)?
        .set_default("alerts.recipient", defaults.alerts.recipient)?
        .set_default("alerts.timeout_seconds", defaults.alerts.timeout_seconds)?
        .set_default("alerts.queue_capacity", defaults.alerts.queue_capacity as u64)?
        .set_default("alerts.max_attempts", defaults.alerts.max_attempts)?
        .set_default("audit.enabled", defaults.audit.enabled)?
        .set_default("audit.directory", defaults.audit.directory)?
        .set_default("audit.high_frequency_threshold", defaults.audit.high_frequency_threshold)?
        .set_default("audit.window_seconds", defaults.audit.window_seconds)?
        .set_default("maintenance.interval_seconds", defaults.maintenance.interval_seconds)?
        .build()?;

    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn test_defaults_without_file() {
        let config = build_config(ConfigBuilder::builder()).unwrap();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.guard.request_deny_threshold, 120);
        assert_eq!(config.guard.login_fail_threshold, 8);
        assert_eq!(config.alerts.cooldown_seconds, 900);
        assert_eq!(config.audit.high_frequency_threshold, 50);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let toml = r#"
            [guard]
            request_deny_threshold = 3
            rate_limit_ban_seconds = 60

            [alerts]
            enabled = true
            recipient = "ops@example.com"
        "#;
        let builder = ConfigBuilder::builder().add_source(File::from_str(toml, FileFormat::Toml));
        let config = build_config(builder).unwrap();

        assert_eq!(config.guard.request_deny_threshold, 3);
        assert_eq!(config.guard.rate_limit_ban_seconds, 60);
        assert_eq!(config.guard.request_warn_threshold, 80);
        assert!(config.alerts.enabled);
        assert_eq!(config.alerts.recipient, "ops@example.com");
    }
}
