//! Application configuration and environment variable parsing.
//!
//! This module handles loading configuration settings from the environment (e.g., .env file).
//! It defines the `AppConfig` struct which governs the API endpoint, page size, the
//! transient-error retry budget and how long the rate-limit governor sleeps at a time.

use crate::error::ConfigError;
use crate::types::AuthToken;
use serde::Deserialize;
use std::time::Duration as StdDuration;

/// Largest page size the GitHub REST API accepts.
const MAX_PER_PAGE: u8 = 100;

/// Application configuration loaded from environment variables.
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    /// GitHub Personal Access Token sent as a bearer credential on every request.
    pub github_token: Option<String>,

    /// Base URL of the REST API. Overridable for GitHub Enterprise.
    #[serde(default = "default_api_url")]
    pub github_api_url: String,

    /// Items requested per page.
    #[serde(default = "default_per_page")]
    pub fetch_per_page: u8,

    /// How many times a transient failure is retried before the run gives up.
    #[serde(default = "default_max_retries")]
    pub fetch_max_retries: u32,

    /// First backoff delay in milliseconds; doubles on every retry.
    #[serde(default = "default_backoff_min_ms")]
    pub fetch_backoff_min_ms: u64,

    /// Upper bound on a single backoff delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub fetch_backoff_max_ms: u64,

    /// Longest single sleep while waiting for a rate-limit reset. The wall clock is
    /// re-read after each sleep.
    #[serde(default = "default_rate_limit_poll_secs")]
    pub rate_limit_poll_secs: u64,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_per_page() -> u8 {
    MAX_PER_PAGE
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_min_ms() -> u64 {
    500
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_rate_limit_poll_secs() -> u64 {
    60
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: default_api_url(),
            fetch_per_page: default_per_page(),
            fetch_max_retries: default_max_retries(),
            fetch_backoff_min_ms: default_backoff_min_ms(),
            fetch_backoff_max_ms: default_backoff_max_ms(),
            rate_limit_poll_secs: default_rate_limit_poll_secs(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(envy::from_env()?)
    }

    /// The credential, or `MissingToken` when it is absent or blank.
    pub fn auth_token(&self) -> Result<AuthToken, ConfigError> {
        AuthToken::from_config(self.github_token.as_deref())
    }

    /// Page size clamped to what the API accepts.
    pub fn per_page(&self) -> u8 {
        self.fetch_per_page.clamp(1, MAX_PER_PAGE)
    }

    pub fn api_url(&self) -> &str {
        self.github_api_url.trim_end_matches('/')
    }

    pub fn backoff_min(&self) -> StdDuration {
        StdDuration::from_millis(self.fetch_backoff_min_ms)
    }

    pub fn backoff_max(&self) -> StdDuration {
        StdDuration::from_millis(self.fetch_backoff_max_ms.max(self.fetch_backoff_min_ms))
    }

    pub fn rate_limit_poll(&self) -> StdDuration {
        StdDuration::from_secs(self.rate_limit_poll_secs.max(1))
    }
}
