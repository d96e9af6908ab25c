//! Session configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
const DEFAULT_TOMBSTONE_RETENTION_DAYS: u32 = 30;

const fn default_poll_interval_secs() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

const fn default_tombstone_retention_days() -> u32 {
    DEFAULT_TOMBSTONE_RETENTION_DAYS
}

/// Configuration for one editing session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Actor label recorded on every modification, typically an email
    pub actor: String,
    /// Seconds between background polls of the shared folder
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Days a tombstone must age before compaction may drop it
    #[serde(default = "default_tombstone_retention_days")]
    pub tombstone_retention_days: u32,
}

impl SessionConfig {
    /// Config for `actor` with default polling and retention
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            tombstone_retention_days: DEFAULT_TOMBSTONE_RETENTION_DAYS,
        }
    }

    /// Set the background poll interval in seconds
    #[must_use]
    pub const fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    /// Set the tombstone retention window in days
    #[must_use]
    pub const fn with_tombstone_retention_days(mut self, days: u32) -> Self {
        self.tombstone_retention_days = days;
        self
    }

    /// Poll interval as a `Duration`
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Tombstone retention window in milliseconds
    #[must_use]
    pub fn tombstone_retention_ms(&self) -> i64 {
        i64::from(self.tombstone_retention_days) * 86_400_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_apply() {
        let config = SessionConfig::new("jane@example.com");
        assert_eq!(config.poll_interval(), Duration::from_secs(30));
        assert_eq!(config.tombstone_retention_ms(), 30 * 86_400_000);
    }

    #[test]
    fn builders_override_defaults() {
        let config = SessionConfig::new("jane@example.com")
            .with_poll_interval_secs(5)
            .with_tombstone_retention_days(7);
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.tombstone_retention_ms(), 7 * 86_400_000);
    }

    #[test]
    fn serde_fills_missing_fields() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"actor": "jane@example.com"}"#).unwrap();
        assert_eq!(config, SessionConfig::new("jane@example.com"));
    }
}
