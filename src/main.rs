use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use repo_miner::clock::SystemClock;
use repo_miner::http::OctocrabTransport;
use repo_miner::shutdown::{cancel_on_ctrl_c, CancellationFlag};
use repo_miner::{
    AppConfig, ErrorCategory, Invocation, PipelineError, RecordKind, RunSummary, StateFilter,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "repo-miner")]
#[command(version)]
#[command(about = "Fetch GitHub commits or issues and save them as CSV")]
#[command(after_long_help = r#"ENVIRONMENT VARIABLES
    GITHUB_TOKEN            GitHub personal access token (required)
    GITHUB_API_URL          API base URL (default: https://api.github.com)
    FETCH_PER_PAGE          Items per page, 1-100 (default: 100)
    FETCH_MAX_RETRIES       Retries for transient failures (default: 3)
    FETCH_BACKOFF_MIN_MS    First retry delay (default: 500)
    FETCH_BACKOFF_MAX_MS    Longest retry delay (default: 30000)
    RATE_LIMIT_POLL_SECS    Longest single sleep while rate limited (default: 60)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch commits and save to CSV
    FetchCommits {
        #[command(flatten)]
        common: CommonOptions,
    },
    /// Fetch issues and save to CSV
    FetchIssues {
        #[command(flatten)]
        common: CommonOptions,

        /// Filter issues by state
        #[arg(long, value_enum, default_value_t = StateArg::All)]
        state: StateArg,

        /// Leave out pull requests, which the issues endpoint also returns
        #[arg(long)]
        skip_pull_requests: bool,
    },
}

#[derive(Debug, Clone, Args)]
struct CommonOptions {
    /// Repository in owner/repo format
    #[arg(long)]
    repo: String,

    /// Maximum number of records to fetch (default: unlimited)
    #[arg(long)]
    max: Option<usize>,

    /// Path to the output CSV file
    #[arg(long)]
    out: PathBuf,

    /// Only records at or after this RFC 3339 timestamp
    #[arg(long)]
    since: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    Open,
    Closed,
    All,
}

impl CommonOptions {
    fn into_invocation(self, record_kind: RecordKind) -> Invocation {
        Invocation {
            repository: self.repo,
            record_kind,
            state: StateFilter::All,
            max_records: self.max,
            since: self.since,
            skip_pull_requests: false,
            destination: self.out,
        }
    }
}

impl From<StateArg> for StateFilter {
    fn from(state: StateArg) -> Self {
        match state {
            StateArg::Open => StateFilter::Open,
            StateArg::Closed => StateFilter::Closed,
            StateArg::All => StateFilter::All,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never mix with the summary on stdout.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repo_miner=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok((kind, summary, out)) => {
            println!(
                "Saved {} {} to {}",
                summary.records_written,
                kind.plural(),
                out.display()
            );
            ExitCode::SUCCESS
        }
        Err(Failure::Pipeline(e)) => report(e.category(), e.to_string()),
        Err(Failure::Setup(category, e)) => report(category, format!("{e:#}")),
    }
}

enum Failure {
    Setup(ErrorCategory, anyhow::Error),
    Pipeline(PipelineError),
}

fn report(category: ErrorCategory, message: String) -> ExitCode {
    tracing::error!(category = category.label(), "{}", message);
    eprintln!("error ({}): {}", category.label(), message);
    ExitCode::from(category.exit_code())
}

async fn run(cli: Cli) -> Result<(RecordKind, RunSummary, PathBuf), Failure> {
    let config = AppConfig::from_env()
        .map_err(|e| Failure::Setup(ErrorCategory::Configuration, e.into()))?;

    let invocation = match cli.command {
        Commands::FetchCommits { common } => common.into_invocation(RecordKind::Commit),
        Commands::FetchIssues {
            common,
            state,
            skip_pull_requests,
        } => Invocation {
            state: state.into(),
            skip_pull_requests,
            ..common.into_invocation(RecordKind::Issue)
        },
    };
    let kind = invocation.record_kind;
    let out = invocation.destination.clone();

    // Building the client opens no connection; the credential is checked in
    // `execute` before the first request.
    let transport = OctocrabTransport::new().map_err(|e| {
        let e = anyhow::Error::from(e).context("failed to create GitHub client");
        Failure::Setup(ErrorCategory::Transport, e)
    })?;

    let cancel = CancellationFlag::new();
    cancel_on_ctrl_c(cancel.clone());

    let summary = repo_miner::execute(
        config,
        invocation,
        Arc::new(transport),
        Arc::new(SystemClock),
        cancel,
    )
    .await
    .map_err(Failure::Pipeline)?;

    Ok((kind, summary, out))
}
