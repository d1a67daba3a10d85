//! Client configuration.
//!
//! # Design
//! `ClientConfig` is immutable once handed to a client. The retry budget and
//! base backoff default to the values the forum's rate limiter is tuned for
//! (four attempts, one second on top of the server's suggested wait).

use std::time::Duration;

use serde::Deserialize;

use crate::error::ApiError;

/// Attempts per logical call when the server keeps answering 429.
pub const DEFAULT_RETRY_COUNT: u32 = 4;

/// Extra wait added to every rate-limit sleep.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Connection settings for one `DiscourseClient`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ClientConfig {
    /// Base URL including scheme, e.g. `https://forum.example.com`.
    pub host: String,
    pub api_username: String,
    pub api_key: String,
    /// Bounds each physical attempt, not the whole retry sequence.
    #[serde(default)]
    pub timeout: Option<Duration>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: Duration,
}

fn default_retry_count() -> u32 {
    DEFAULT_RETRY_COUNT
}

fn default_retry_backoff() -> Duration {
    DEFAULT_RETRY_BACKOFF
}

impl ClientConfig {
    pub fn new(host: &str, api_username: &str, api_key: &str) -> Self {
        Self {
            host: host.to_string(),
            api_username: api_username.to_string(),
            api_key: api_key.to_string(),
            timeout: None,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// A budget of zero is treated as one attempt.
    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    /// Read `DISCOURSE_HOST`, `DISCOURSE_API_USERNAME`, `DISCOURSE_API_KEY`
    /// and the optional `DISCOURSE_TIMEOUT` (seconds) from the environment.
    pub fn from_env() -> Result<Self, ApiError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ApiError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| ApiError::Config(format!("{name} is not set")))
        };

        let mut config = Self::new(
            &require("DISCOURSE_HOST")?,
            &require("DISCOURSE_API_USERNAME")?,
            &require("DISCOURSE_API_KEY")?,
        );

        if let Some(raw) = lookup("DISCOURSE_TIMEOUT") {
            let secs: f64 = raw
                .parse()
                .map_err(|_| ApiError::Config(format!("DISCOURSE_TIMEOUT is not a number: {raw}")))?;
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|_| ApiError::Config(format!("DISCOURSE_TIMEOUT is out of range: {raw}")))?;
            config.timeout = Some(timeout);
        }

        Ok(config)
    }
}
