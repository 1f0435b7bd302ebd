//! Controller configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

/// Environment variable overriding [`ControllerConfig::ping_timeout`].
pub const PING_TIMEOUT_ENV: &str = "DPI_PING_TIMEOUT_MS";
/// Environment variable overriding [`ControllerConfig::shutdown_grace`].
pub const SHUTDOWN_GRACE_ENV: &str = "DPI_SHUTDOWN_GRACE_MS";

/// Controller configuration. Durations deserialize from milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Bound on each worker's answer to `ping`.
    #[serde(rename = "ping_timeout_ms", deserialize_with = "millis")]
    pub ping_timeout: Duration,
    /// How long a stopping worker may take to exit before it is killed.
    #[serde(rename = "shutdown_grace_ms", deserialize_with = "millis")]
    pub shutdown_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

impl ControllerConfig {
    /// Defaults overridden from `DPI_PING_TIMEOUT_MS` and
    /// `DPI_SHUTDOWN_GRACE_MS`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(timeout) = duration_var(&lookup, PING_TIMEOUT_ENV) {
            config.ping_timeout = timeout;
        }
        if let Some(grace) = duration_var(&lookup, SHUTDOWN_GRACE_ENV) {
            config.shutdown_grace = grace;
        }
        config
    }
}

fn duration_var(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(err) => {
            tracing::warn!(key, value = %raw, error = %err, "Ignoring invalid duration");
            None
        }
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    u64::deserialize(deserializer).map(Duration::from_millis)
}
