//! Global configuration types for Stepgate.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls the
//! engine's retry policy, approval timeouts, background sweep cadence and
//! outbound notifications.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration.
///
/// Loaded from `~/.stepgate/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Tunables for the workflow engine, approval gate and rollback engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Attempts per step before the workflow fails (first run included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Fixed delay between attempts of the same step.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Cadence of the approval timeout sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Used for automated steps that do not set their own timeout.
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    /// Used for approval steps that do not set their own timeout.
    #[serde(default = "default_approval_timeout_secs")]
    pub default_approval_timeout_secs: u64,

    /// Number of execution log entries copied into a rollback snapshot.
    #[serde(default = "default_rollback_log_tail")]
    pub rollback_log_tail: usize,

    /// Upper bound on a single notifier call.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_sweep_interval_secs() -> u64 {
    5
}

fn default_task_timeout_secs() -> u64 {
    60 * 60
}

fn default_approval_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_rollback_log_tail() -> usize {
    10
}

fn default_notify_timeout_ms() -> u64 {
    5_000
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_task_timeout_secs: default_task_timeout_secs(),
            default_approval_timeout_secs: default_approval_timeout_secs(),
            rollback_log_tail: default_rollback_log_tail(),
            notify_timeout_ms: default_notify_timeout_ms(),
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn default_approval_timeout(&self) -> Duration {
        Duration::from_secs(self.default_approval_timeout_secs)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}

/// Outbound notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Slack-compatible incoming webhook. Notifications are only logged when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_config_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.default_approval_timeout(), Duration::from_secs(86_400));
        assert_eq!(config.rollback_log_tail, 10);
    }

    #[test]
    fn test_global_config_deserialize_with_defaults() {
        let config: GlobalConfig = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_attempts, 3);
        assert!(config.notifications.webhook_url.is_none());
    }

    #[test]
    fn test_global_config_deserialize_with_values() {
        let toml_str = r#"
[engine]
max_attempts = 5
retry_delay_ms = 250

[notifications]
webhook_url = "https://hooks.example.com/T000/B000"
"#;
        let config: GlobalConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_attempts, 5);
        assert_eq!(config.engine.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.engine.sweep_interval_secs, 5);
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://hooks.example.com/T000/B000")
        );
    }

    #[test]
    fn test_sweep_interval_never_zero() {
        let config = EngineConfig {
            sweep_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(1));
    }
}
