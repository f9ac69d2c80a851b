pub mod clock;
pub mod config;
pub mod cursor;
pub mod error;
pub mod fetcher;
pub mod github;
pub mod governor;
pub mod http;
pub mod normalize;
pub mod shutdown;
pub mod sink;
pub mod testing;
pub mod types;

pub use config::AppConfig;
pub use error::{ErrorCategory, FetchError, PipelineError};
pub use fetcher::{Miner, RunSummary};
pub use types::{AuthToken, FetchRequest, RecordKind, RepoId, StateFilter};

use chrono::{DateTime, Utc};
use crate::clock::Clock;
use crate::error::ConfigError;
use crate::http::HttpTransport;
use crate::shutdown::CancellationFlag;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One fetch as asked for on the command line, not yet validated.
#[derive(Clone, Debug)]
pub struct Invocation {
    /// `owner/repo`, parsed only once the credential has been checked.
    pub repository: String,
    pub record_kind: RecordKind,
    /// Ignored for commits.
    pub state: StateFilter,
    pub max_records: Option<usize>,
    pub since: Option<DateTime<Utc>>,
    pub skip_pull_requests: bool,
    pub destination: PathBuf,
}

/// Validates `invocation` against `config` and runs it over `transport`.
///
/// The credential and the repository are checked before the output file is
/// created or any request is sent; either failure is a configuration error
/// with no progress.
pub async fn execute(
    config: AppConfig,
    invocation: Invocation,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    cancel: CancellationFlag,
) -> Result<RunSummary, PipelineError> {
    let token = config.auth_token().map_err(config_failure)?;
    let repository: RepoId = invocation.repository.parse().map_err(config_failure)?;

    let miner = Miner::with_transport(config, transport, clock).with_cancellation(cancel);
    match invocation.record_kind {
        RecordKind::Commit => {
            fetch_commits(
                &miner,
                repository,
                token,
                invocation.max_records,
                invocation.since,
                &invocation.destination,
            )
            .await
        }
        RecordKind::Issue => {
            fetch_issues(
                &miner,
                repository,
                token,
                invocation.state,
                invocation.max_records,
                invocation.since,
                invocation.skip_pull_requests,
                &invocation.destination,
            )
            .await
        }
    }
}

/// Fetches commits of `repository` into a CSV file at `destination`.
pub async fn fetch_commits(
    miner: &Miner,
    repository: RepoId,
    auth_token: AuthToken,
    max_records: Option<usize>,
    since: Option<DateTime<Utc>>,
    destination: &Path,
) -> Result<RunSummary, PipelineError> {
    let request = FetchRequest::commits(repository, auth_token)
        .with_since(since)
        .with_max_records(max_records)
        .map_err(config_failure)?;
    miner.run(&request, destination).await
}

/// Fetches issues of `repository` into a CSV file at `destination`.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_issues(
    miner: &Miner,
    repository: RepoId,
    auth_token: AuthToken,
    state: StateFilter,
    max_records: Option<usize>,
    since: Option<DateTime<Utc>>,
    skip_pull_requests: bool,
    destination: &Path,
) -> Result<RunSummary, PipelineError> {
    let request = FetchRequest::issues(repository, state, auth_token)
        .with_since(since)
        .with_skip_pull_requests(skip_pull_requests)
        .with_max_records(max_records)
        .map_err(config_failure)?;
    miner.run(&request, destination).await
}

fn config_failure(error: ConfigError) -> PipelineError {
    PipelineError {
        error: FetchError::Config(error),
        records_written: 0,
        pages_fetched: 0,
    }
}
