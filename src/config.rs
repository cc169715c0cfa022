//! Harvester configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::harvest::traits::ValidationError;
use crate::traits::HttpMethod;

/// Retry behaviour for a single page request.
///
/// Retries never restart pagination; they only repeat the current attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,

    /// Honour HTTP 503 by waiting and retrying
    pub retry_on_503: bool,

    /// Upper bound for any 503 wait, in seconds
    pub max_wait_secs: u64,

    /// Wait used when a 503 carries no usable `Retry-After`, in seconds
    pub default_wait_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_on_503: true,
            max_wait_secs: 300,
            default_wait_secs: 60,
        }
    }
}

impl RetryPolicy {
    /// Never retry.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Total attempts allowed for one request.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retrying a 503.
    ///
    /// Uses `Retry-After` when it is a whole number of seconds, otherwise the
    /// default wait; both are capped at `max_wait_secs`.
    pub fn wait_for(&self, retry_after: Option<&str>) -> Duration {
        let secs = retry_after
            .and_then(|value| value.trim().parse::<u64>().ok())
            .unwrap_or(self.default_wait_secs);
        Duration::from_secs(secs.min(self.max_wait_secs))
    }
}

/// Connection settings for one repository endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvesterConfig {
    /// OAI-PMH base URL
    pub base_url: String,

    #[serde(default)]
    pub http_method: HttpMethod,

    /// Per-request timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryPolicy,

    /// Keep each record's original XML
    #[serde(default)]
    pub preserve_raw: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl HarvesterConfig {
    /// Creates a configuration with defaults: GET, 30 s timeout, 3 retries.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http_method: HttpMethod::Get,
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            preserve_raw: false,
        }
    }

    pub fn with_method(mut self, method: HttpMethod) -> Self {
        self.http_method = method;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_preserve_raw(mut self, preserve_raw: bool) -> Self {
        self.preserve_raw = preserve_raw;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Checks the base URL and timeout.
    ///
    /// # Errors
    ///
    /// [`ValidationError::MissingParameter`] for an empty URL,
    /// [`ValidationError::InvalidBaseUrl`] for a non-HTTP one and
    /// [`ValidationError::InvalidTimeout`] for a zero timeout.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.base_url.trim().is_empty() {
            return Err(ValidationError::MissingParameter("base_url"));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ValidationError::InvalidBaseUrl(self.base_url.clone()));
        }
        if self.timeout_ms == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }
}
