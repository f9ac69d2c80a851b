//! Error taxonomy for the fetch pipeline.
//!
//! Retriable conditions (transient transport failures and rate limiting) are
//! absorbed inside [`crate::github::GitHubClient`] and only surface here once
//! the retry budget is spent.

use crate::types::RecordKind;
use thiserror::Error;

/// Problems detected before any network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("GITHUB_TOKEN is not set")]
    MissingToken,

    #[error("invalid repository '{0}', expected owner/name")]
    InvalidRepository(String),

    #[error("--max must be a positive integer, got {0}")]
    InvalidMax(usize),

    #[error("invalid environment configuration: {0}")]
    Env(#[from] envy::Error),
}

/// Fatal outcomes of a single API call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("authentication failed ({status}): {message}")]
    Authentication { status: u16, message: String },

    #[error("repository not found: {message}")]
    NotFound { message: String },

    #[error("request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("giving up after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("failed to set up HTTP client: {0}")]
    Setup(String),
}

/// A raw item lacked a field every row must carry.
#[derive(Debug, Error)]
#[error("malformed {kind} {identifier}: missing or invalid field '{field}'")]
pub struct MalformedRecordError {
    pub kind: RecordKind,
    /// The item's identifying field (sha or issue number), or `<unknown>`.
    pub identifier: String,
    pub field: &'static str,
}

/// Anything that stops a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Malformed(#[from] MalformedRecordError),

    #[error("failed to write output: {0}")]
    Sink(#[from] csv::Error),

    #[error("run cancelled")]
    Cancelled,
}

/// Coarse failure classes, each with its own process exit code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Authentication,
    NotFound,
    Transport,
    MalformedRecord,
    Output,
    Cancelled,
}

impl ErrorCategory {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorCategory::Configuration => 2,
            ErrorCategory::Authentication => 3,
            ErrorCategory::NotFound => 4,
            ErrorCategory::Transport => 5,
            ErrorCategory::MalformedRecord => 6,
            ErrorCategory::Output => 7,
            ErrorCategory::Cancelled => 130,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorCategory::Configuration => "configuration error",
            ErrorCategory::Authentication => "authentication error",
            ErrorCategory::NotFound => "not found",
            ErrorCategory::Transport => "transport error",
            ErrorCategory::MalformedRecord => "malformed record",
            ErrorCategory::Output => "output error",
            ErrorCategory::Cancelled => "cancelled",
        }
    }
}

impl FetchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            FetchError::Config(_) => ErrorCategory::Configuration,
            FetchError::Transport(TransportError::Authentication { .. }) => {
                ErrorCategory::Authentication
            }
            FetchError::Transport(TransportError::NotFound { .. }) => ErrorCategory::NotFound,
            FetchError::Transport(_) => ErrorCategory::Transport,
            FetchError::Malformed(_) => ErrorCategory::MalformedRecord,
            FetchError::Sink(_) => ErrorCategory::Output,
            FetchError::Cancelled => ErrorCategory::Cancelled,
        }
    }
}

/// A failed run, with enough progress context to see how far it got.
#[derive(Debug, Error)]
#[error("{error} (after {records_written} records from {pages_fetched} pages)")]
pub struct PipelineError {
    #[source]
    pub error: FetchError,
    pub records_written: usize,
    pub pages_fetched: usize,
}

impl PipelineError {
    pub fn category(&self) -> ErrorCategory {
        self.error.category()
    }
}
