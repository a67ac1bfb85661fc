//! Handoff configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Well-known channel every context listens on for handshakes and heartbeats.
pub const HANDSHAKE_CHANNEL_ID: &str = "player-handoff.handshake";

/// Config error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config document: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0} must be greater than zero")]
    Zero(&'static str),
}

/// Configuration passed explicitly to every handoff component.
///
/// All fields have defaults, so a partial JSON document is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HandoffConfig {
    /// Name of the process-wide handshake channel.
    pub handshake_channel_id: String,
    /// Page opened in the detached window. `None` disables detaching.
    pub detach_url: Option<String>,
    /// Window open target.
    pub window_target: String,
    /// Window open feature string.
    pub window_features: String,
    /// Per-call response timeout.
    pub response_timeout_ms: u64,
    /// Delay between `connect` attempts while the popup is still loading.
    pub connect_retry_interval_ms: u64,
    /// Heartbeat check period.
    pub heartbeat_interval_ms: u64,
    /// Silence longer than this counts as one missed heartbeat.
    pub heartbeat_failure_time_diff_ms: u64,
    /// Consecutive misses that force the session back.
    pub heartbeat_failure_threshold: u32,
    /// Poll period while waiting for seeking/buffering to clear.
    pub precondition_poll_interval_ms: u64,
    /// Upper bound on that wait. `None` waits indefinitely.
    pub precondition_wait_timeout_ms: Option<u64>,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            handshake_channel_id: HANDSHAKE_CHANNEL_ID.to_string(),
            detach_url: None,
            window_target: "_blank".to_string(),
            window_features: "popup=yes,width=1280,height=720".to_string(),
            response_timeout_ms: 20_000,
            connect_retry_interval_ms: 500,
            heartbeat_interval_ms: 1_000,
            heartbeat_failure_time_diff_ms: 2_001,
            heartbeat_failure_threshold: 10,
            precondition_poll_interval_ms: 100,
            precondition_wait_timeout_ms: Some(30_000),
        }
    }
}

impl HandoffConfig {
    /// Create a config that enables detaching to `detach_url`.
    #[must_use]
    pub fn with_detach_url(detach_url: impl Into<String>) -> Self {
        Self {
            detach_url: Some(detach_url.into()),
            ..Self::default()
        }
    }

    /// Parse a JSON config document.
    ///
    /// # Errors
    /// Returns error if the document is not valid JSON for this shape or
    /// fails [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the timers cannot run with.
    ///
    /// # Errors
    /// Returns error naming the first interval, timeout or threshold that is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("responseTimeoutMs", self.response_timeout_ms),
            ("connectRetryIntervalMs", self.connect_retry_interval_ms),
            ("heartbeatIntervalMs", self.heartbeat_interval_ms),
            ("heartbeatFailureTimeDiffMs", self.heartbeat_failure_time_diff_ms),
            ("heartbeatFailureThreshold", u64::from(self.heartbeat_failure_threshold)),
            ("preconditionPollIntervalMs", self.precondition_poll_interval_ms),
        ];
        match required.into_iter().find(|(_, value)| *value == 0) {
            Some((field, _)) => Err(ConfigError::Zero(field)),
            None => Ok(()),
        }
    }

    /// Whether detaching is configured at all.
    #[must_use]
    pub fn detach_enabled(&self) -> bool {
        self.detach_url.as_deref().is_some_and(|url| !url.trim().is_empty())
    }

    /// URL for the detached window of the handshake scoped by `proxy_id`.
    #[must_use]
    pub fn detached_window_url(&self, proxy_id: &str) -> Option<String> {
        let base = self.detach_url.as_deref().filter(|url| !url.trim().is_empty())?;
        let separator = if base.contains('?') { '&' } else { '?' };
        Some(format!("{base}{separator}proxyId={proxy_id}"))
    }

    #[must_use]
    pub const fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    #[must_use]
    pub const fn connect_retry_interval(&self) -> Duration {
        Duration::from_millis(self.connect_retry_interval_ms)
    }

    #[must_use]
    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    #[must_use]
    pub const fn heartbeat_failure_time_diff(&self) -> Duration {
        Duration::from_millis(self.heartbeat_failure_time_diff_ms)
    }

    #[must_use]
    pub const fn precondition_poll_interval(&self) -> Duration {
        Duration::from_millis(self.precondition_poll_interval_ms)
    }

    #[must_use]
    pub fn precondition_wait_timeout(&self) -> Option<Duration> {
        self.precondition_wait_timeout_ms.map(Duration::from_millis)
    }
}
