//! Core data model shared by the fetch pipeline.

use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

/// A raw API item: the JSON object exactly as the API returned it.
pub type RawItem = serde_json::Map<String, serde_json::Value>;

/// A unique identifier for a GitHub repository.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// The owner of the repository (e.g., "octocat").
    pub owner: String,
    /// The name of the repository (e.g., "Hello-World").
    pub repo: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

impl FromStr for RepoId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRepository(s.to_string());

        let (owner, repo) = s.trim().split_once('/').ok_or_else(invalid)?;
        if !is_valid_segment(owner) || !is_valid_segment(repo) {
            return Err(invalid());
        }

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

/// Owner and repository names are restricted to the characters GitHub allows,
/// which also keeps them safe to splice into a URL path.
fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Which collection a run retrieves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordKind {
    Commit,
    Issue,
}

impl RecordKind {
    /// Plural noun used in user-facing messages.
    pub fn plural(self) -> &'static str {
        match self {
            RecordKind::Commit => "commits",
            RecordKind::Issue => "issues",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Commit => f.write_str("commit"),
            RecordKind::Issue => f.write_str("issue"),
        }
    }
}

/// Issue state filter forwarded to the issues endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateFilter {
    Open,
    Closed,
    #[default]
    All,
}

impl StateFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            StateFilter::Open => "open",
            StateFilter::Closed => "closed",
            StateFilter::All => "all",
        }
    }
}

/// Opaque bearer credential. Its `Debug` output never reveals the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Accepts a token read from configuration; an absent or blank value is a
    /// configuration error.
    pub fn from_config(token: Option<&str>) -> Result<Self, ConfigError> {
        match token.map(str::trim) {
            Some(t) if !t.is_empty() => Ok(Self(t.to_string())),
            _ => Err(ConfigError::MissingToken),
        }
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw secret, for building the `Authorization` header only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Everything the pipeline needs to know about one run.
#[derive(Clone, Debug)]
pub struct FetchRequest {
    pub repository: RepoId,
    pub record_kind: RecordKind,
    /// Stop after this many rows; `None` walks the whole collection.
    pub max_records: Option<NonZeroUsize>,
    /// Only meaningful for issues.
    pub state_filter: StateFilter,
    /// Drop items the issues endpoint marks as pull requests.
    pub skip_pull_requests: bool,
    /// Only items updated (issues) or committed (commits) at or after this time.
    pub since: Option<DateTime<Utc>>,
    pub auth_token: AuthToken,
}

impl FetchRequest {
    pub fn commits(repository: RepoId, auth_token: AuthToken) -> Self {
        Self {
            repository,
            record_kind: RecordKind::Commit,
            max_records: None,
            state_filter: StateFilter::All,
            skip_pull_requests: false,
            since: None,
            auth_token,
        }
    }

    pub fn issues(repository: RepoId, state_filter: StateFilter, auth_token: AuthToken) -> Self {
        Self {
            repository,
            record_kind: RecordKind::Issue,
            max_records: None,
            state_filter,
            skip_pull_requests: false,
            since: None,
            auth_token,
        }
    }

    /// Caps the run at `max` rows. Zero is rejected since the cap must be at least one.
    pub fn with_max_records(mut self, max: Option<usize>) -> Result<Self, ConfigError> {
        self.max_records = match max {
            None => None,
            Some(n) => Some(NonZeroUsize::new(n).ok_or(ConfigError::InvalidMax(n))?),
        };
        Ok(self)
    }

    pub fn with_since(mut self, since: Option<DateTime<Utc>>) -> Self {
        self.since = since;
        self
    }

    pub fn with_skip_pull_requests(mut self, skip: bool) -> Self {
        self.skip_pull_requests = skip;
        self
    }

    /// API path of the collection this request walks.
    pub fn collection_path(&self) -> String {
        let RepoId { owner, repo } = &self.repository;
        match self.record_kind {
            RecordKind::Commit => format!("/repos/{owner}/{repo}/commits"),
            RecordKind::Issue => format!("/repos/{owner}/{repo}/issues"),
        }
    }

    /// Query parameters for the first page.
    pub fn query(&self, per_page: u8) -> Vec<(&'static str, String)> {
        let mut query = vec![("per_page", per_page.to_string())];
        if self.record_kind == RecordKind::Issue {
            query.push(("state", self.state_filter.as_str().to_string()));
        }
        if let Some(since) = self.since {
            query.push((
                "since",
                since.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            ));
        }
        query
    }
}

/// Rate-limit metadata attached to a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// One batch of items from a single paginated call.
#[derive(Clone, Debug, Default)]
pub struct Page {
    pub items: Vec<RawItem>,
    /// Absolute URL of the next page, taken from the `Link` header.
    pub next: Option<String>,
    pub rate_limit: Option<RateLimitSnapshot>,
}
