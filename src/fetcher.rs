//! Pipeline orchestrator.
//!
//! This module implements `Miner`, the entry point for a fetch run. It:
//! 1. Opens the CSV sink for the destination.
//! 2. Walks the commit or issue collection page by page.
//! 3. Normalizes each item and appends it to the sink in arrival order.
//! 4. Flushes and closes the sink on every exit path, keeping partial output.

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::cursor::PaginationCursor;
use crate::error::{FetchError, PipelineError};
use crate::github::GitHubClient;
use crate::http::HttpTransport;
use crate::normalize::{self, is_pull_request};
use crate::shutdown::CancellationFlag;
use crate::sink::CsvSink;
use crate::types::{FetchRequest, RecordKind};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

/// Outcome of a successful run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    pub records_written: usize,
    pub pages_fetched: usize,
}

pub struct Miner {
    config: AppConfig,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    cancel: CancellationFlag,
}

impl Miner {
    /// A miner issuing requests through `transport` and waiting on `clock`.
    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
            cancel: CancellationFlag::new(),
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs the request into a CSV file at `destination`.
    ///
    /// The file is created before the first request and is always flushed and
    /// closed; on failure whatever was written so far stays on disk.
    pub async fn run(
        &self,
        request: &FetchRequest,
        destination: &Path,
    ) -> Result<RunSummary, PipelineError> {
        let sink = CsvSink::create(destination, request.record_kind).map_err(|e| PipelineError {
            error: FetchError::Sink(e),
            records_written: 0,
            pages_fetched: 0,
        })?;
        self.run_to_sink(request, sink).await.map(|(summary, _)| summary)
    }

    /// Runs the request into an arbitrary sink, then closes it. The destination
    /// is handed back on success.
    pub async fn run_to_sink<W: Write>(
        &self,
        request: &FetchRequest,
        mut sink: CsvSink<W>,
    ) -> Result<(RunSummary, W), PipelineError> {
        let outcome = self.drive(request, &mut sink).await;
        let records_written = sink.rows_written();

        // Close on every path; a close failure only surfaces if the run itself succeeded.
        let closed = sink.finish();

        match (outcome, closed) {
            (Ok(pages_fetched), Ok(destination)) => {
                tracing::info!(
                    repo = %request.repository,
                    records = records_written,
                    pages = pages_fetched,
                    "Fetched {}",
                    request.record_kind.plural()
                );
                Ok((
                    RunSummary {
                        records_written,
                        pages_fetched,
                    },
                    destination,
                ))
            }
            (Ok(pages_fetched), Err(e)) => Err(PipelineError {
                error: FetchError::Sink(e),
                records_written,
                pages_fetched,
            }),
            (Err((error, pages_fetched)), closed) => {
                if let Err(e) = closed {
                    tracing::error!("Failed to close output after aborted run: {}", e);
                }
                Err(PipelineError {
                    error,
                    records_written,
                    pages_fetched,
                })
            }
        }
    }

    /// Pages through the collection, writing each normalized row. Returns the
    /// number of pages fetched, alongside the error when the run aborts.
    async fn drive<W: Write>(
        &self,
        request: &FetchRequest,
        sink: &mut CsvSink<W>,
    ) -> Result<usize, (FetchError, usize)> {
        let mut client = GitHubClient::new(
            &self.config,
            request.auth_token.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.clock),
        );

        let mut cursor = PaginationCursor::new(
            &mut client,
            request.collection_path(),
            request.query(self.config.per_page()),
            request.max_records,
        )
        .with_cancellation(self.cancel.clone());

        if request.record_kind == RecordKind::Issue && request.skip_pull_requests {
            cursor = cursor.with_skip(is_pull_request);
        }

        tracing::info!(
            repo = %request.repository,
            kind = %request.record_kind,
            max = ?request.max_records,
            "Starting fetch"
        );

        loop {
            let item = match cursor.next_item().await {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(e) => return Err((e, cursor.pages_fetched())),
            };

            let written = normalize::normalize(&item, request.record_kind)
                .map_err(FetchError::from)
                .and_then(|row| sink.write_row(&row).map_err(FetchError::from));
            if let Err(e) = written {
                return Err((e, cursor.pages_fetched()));
            }

            // Each finished page reaches the destination before the next request.
            if cursor.page_drained() {
                sink.flush()
                    .map_err(|e| (FetchError::from(e), cursor.pages_fetched()))?;
            }
        }

        Ok(cursor.pages_fetched())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use crate::testing::{ManualClock, MockTransport};
    use crate::types::{AuthToken, RepoId, StateFilter};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn miner(transport: &MockTransport) -> Miner {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let config = AppConfig {
            github_api_url: "https://api.test".to_string(),
            fetch_max_retries: 0,
            ..AppConfig::default()
        };
        Miner::with_transport(config, Arc::new(transport.clone()), Arc::new(clock))
    }

    fn issue(number: u64, pr: bool) -> serde_json::Value {
        let mut value = json!({
            "id": number + 1000,
            "number": number,
            "title": format!("Issue {number}"),
            "state": "open",
            "created_at": "2024-01-01T00:00:00Z",
            "closed_at": null,
            "user": { "login": "octocat" },
            "comments": 0,
            "html_url": format!("https://github.com/o/r/issues/{number}")
        });
        if pr {
            value["pull_request"] = json!({ "url": "https://api.github.com/pulls/1" });
        }
        value
    }

    fn request(skip_prs: bool) -> FetchRequest {
        let repo: RepoId = "o/r".parse().unwrap();
        FetchRequest::issues(repo, StateFilter::All, AuthToken::new("t"))
            .with_skip_pull_requests(skip_prs)
    }

    #[tokio::test]
    async fn test_pull_requests_included_by_default() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::json(
            200,
            &json!([issue(1, false), issue(2, true)]),
        ));

        let (summary, out) = miner(&transport)
            .run_to_sink(&request(false), CsvSink::new(Vec::new(), RecordKind::Issue))
            .await
            .unwrap();

        assert_eq!(summary.records_written, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(",true,"));
    }

    #[tokio::test]
    async fn test_pull_requests_skipped_on_request() {
        let transport = MockTransport::new();
        transport.push_response(HttpResponse::json(
            200,
            &json!([issue(1, false), issue(2, true), issue(3, false)]),
        ));

        let (summary, out) = miner(&transport)
            .run_to_sink(&request(true), CsvSink::new(Vec::new(), RecordKind::Issue))
            .await
            .unwrap();

        assert_eq!(summary.records_written, 2);
        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("issues/2"));
        assert!(transport.requests()[0]
            .request
            .url
            .ends_with("/repos/o/r/issues?per_page=100&state=all"));
    }

    #[tokio::test]
    async fn test_malformed_record_aborts_with_progress() {
        let transport = MockTransport::new();
        let mut bad = issue(2, false);
        bad.as_object_mut().unwrap().remove("title");
        transport.push_response(HttpResponse::json(200, &json!([issue(1, false), bad])));

        let err = miner(&transport)
            .run_to_sink(&request(false), CsvSink::new(Vec::new(), RecordKind::Issue))
            .await
            .unwrap_err();

        assert!(matches!(err.error, FetchError::Malformed(_)));
        assert_eq!(err.records_written, 1);
        assert_eq!(err.pages_fetched, 1);
        assert!(err.to_string().contains("#2"));
    }
}
