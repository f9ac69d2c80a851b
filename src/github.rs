//! GitHub API client: authenticated page requests, response classification and
//! retry.
//!
//! Every response is classified into one of four outcomes. Success yields a
//! [`Page`]; a rate-limit rejection is handed to the [`RateLimitGovernor`] and
//! retried once the window resets, without touching the retry budget; a
//! transient failure (5xx or connection error) is retried with exponential
//! backoff until the budget runs out; anything else is fatal.

use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::TransportError;
use crate::governor::RateLimitGovernor;
use crate::http::{HttpError, HttpHeaders, HttpRequest, HttpResponse, HttpTransport};
use crate::types::{AuthToken, Page, RawItem};
use backon::{BackoffBuilder, ExponentialBuilder};
use std::sync::Arc;
use std::time::Duration as StdDuration;

const API_VERSION: &str = "2022-11-28";

/// Configuration for retrying transient failures.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay before the first retry.
    pub min_delay: StdDuration,
    /// Maximum delay between retries.
    pub max_delay: StdDuration,
    /// Maximum number of retry attempts after the first failure.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl RetryConfig {
    #[must_use]
    pub fn new(min_delay: StdDuration, max_delay: StdDuration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.backoff_min(),
            config.backoff_max(),
            config.fetch_max_retries as usize,
        )
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// Result of a single HTTP attempt, before any retry decision.
#[derive(Debug)]
enum Attempt {
    Success(Page),
    RateLimited,
    Retriable(String),
    Fatal(TransportError),
}

pub struct GitHubClient {
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    governor: RateLimitGovernor,
    base_url: String,
    token: AuthToken,
    retry: RetryConfig,
}

impl GitHubClient {
    pub fn new(
        config: &AppConfig,
        token: AuthToken,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            governor: RateLimitGovernor::new(Arc::clone(&clock), config.rate_limit_poll()),
            transport,
            clock,
            base_url: config.api_url().to_string(),
            token,
            retry: RetryConfig::from_config(config),
        }
    }

    #[must_use]
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn governor(&self) -> &RateLimitGovernor {
        &self.governor
    }

    /// Fetches one page. `path` is either an API path (joined to the base URL)
    /// or an absolute continuation URL taken from a previous page.
    pub async fn send(
        &mut self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Page, TransportError> {
        let url = self.resolve(path, query);
        let mut backoff = self.retry.clone().into_backoff().build();
        let mut failures: u32 = 0;

        loop {
            self.governor.wait_until_ready().await;

            tracing::debug!(url = %url, "GET");
            let request = HttpRequest {
                url: url.clone(),
                headers: self.default_headers(),
            };

            let attempt = match self.transport.get(request).await {
                Ok(response) => self.classify(&url, response),
                Err(HttpError::InvalidRequest(reason)) => {
                    Attempt::Fatal(TransportError::Setup(reason))
                }
                Err(e) => Attempt::Retriable(e.to_string()),
            };

            match attempt {
                Attempt::Success(page) => return Ok(page),
                Attempt::RateLimited => continue,
                Attempt::Fatal(e) => return Err(e),
                Attempt::Retriable(reason) => {
                    failures += 1;
                    match backoff.next() {
                        Some(delay) => {
                            tracing::warn!(
                                url = %url,
                                attempt = failures,
                                delay_ms = delay.as_millis() as u64,
                                "Transient failure, retrying: {}",
                                reason
                            );
                            self.clock.sleep(delay).await;
                        }
                        None => {
                            return Err(TransportError::RetryExhausted {
                                attempts: failures,
                                last_error: reason,
                            })
                        }
                    }
                }
            }
        }
    }

    fn resolve(&self, path: &str, query: &[(&str, String)]) -> String {
        let mut url = if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        };

        if !query.is_empty() {
            let pairs: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
            url.push(if url.contains('?') { '&' } else { '?' });
            url.push_str(&pairs.join("&"));
        }
        url
    }

    fn default_headers(&self) -> HttpHeaders {
        vec![
            (
                "Accept".to_string(),
                "application/vnd.github+json".to_string(),
            ),
            ("X-GitHub-Api-Version".to_string(), API_VERSION.to_string()),
            (
                "Authorization".to_string(),
                format!("Bearer {}", self.token.expose()),
            ),
        ]
    }

    fn classify(&mut self, url: &str, response: HttpResponse) -> Attempt {
        let rate_limit = self.governor.observe(&response.headers);
        let status = response.status;

        match status {
            200..=299 => match serde_json::from_str::<Vec<RawItem>>(&response.body) {
                Ok(items) => Attempt::Success(Page {
                    items,
                    next: response.header("link").and_then(next_link),
                    rate_limit,
                }),
                Err(e) => Attempt::Fatal(TransportError::Decode {
                    url: url.to_string(),
                    reason: e.to_string(),
                }),
            },
            // The commits endpoint answers 409 for a repository with no commits.
            409 => {
                tracing::info!(url = %url, "Repository is empty: {}", error_message(&response));
                Attempt::Success(Page {
                    rate_limit,
                    ..Page::default()
                })
            }
            429 => {
                self.governor.on_rate_limited(&response.headers);
                Attempt::RateLimited
            }
            403 if is_rate_limit_rejection(&response) => {
                self.governor.on_rate_limited(&response.headers);
                Attempt::RateLimited
            }
            401 | 403 => Attempt::Fatal(TransportError::Authentication {
                status,
                message: error_message(&response),
            }),
            404 => Attempt::Fatal(TransportError::NotFound {
                message: error_message(&response),
            }),
            400..=499 => Attempt::Fatal(TransportError::Client {
                status,
                message: error_message(&response),
            }),
            500..=599 => Attempt::Retriable(format!(
                "server error {}: {}",
                status,
                error_message(&response)
            )),
            _ => Attempt::Fatal(TransportError::Decode {
                url: url.to_string(),
                reason: format!("unexpected status {status}"),
            }),
        }
    }
}

/// A 403 is a rate-limit rejection when the quota is spent, when the server
/// asks us to back off, or when the message says so (secondary limits).
fn is_rate_limit_rejection(response: &HttpResponse) -> bool {
    response
        .header("x-ratelimit-remaining")
        .is_some_and(|v| v.trim() == "0")
        || response.header("retry-after").is_some()
        || error_message(response)
            .to_lowercase()
            .contains("rate limit")
}

/// The `message` field of a GitHub error body, or the raw body.
fn error_message(response: &HttpResponse) -> String {
    serde_json::from_str::<serde_json::Value>(&response.body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| response.body.chars().take(200).collect())
}

/// Extract the `rel="next"` URL from a `Link` header.
pub fn next_link(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let mut url = None;
        let mut is_next = false;

        for segment in part.trim().split(';') {
            let segment = segment.trim();
            if segment.starts_with('<') && segment.ends_with('>') {
                url = Some(&segment[1..segment.len() - 1]);
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                is_next = rel_value
                    .trim_matches('"')
                    .split_whitespace()
                    .any(|rel| rel == "next");
            }
        }

        url.filter(|_| is_next).map(str::to_string)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualClock, MockTransport};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn setup(max_retries: usize) -> (GitHubClient, MockTransport, ManualClock) {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let transport = MockTransport::new().with_clock(clock.clone());
        let config = AppConfig {
            github_api_url: "https://api.test".to_string(),
            ..AppConfig::default()
        };
        let client = GitHubClient::new(
            &config,
            AuthToken::new("fake-token"),
            Arc::new(transport.clone()),
            Arc::new(clock.clone()),
        )
        .with_retry_config(
            RetryConfig::new(
                StdDuration::from_millis(100),
                StdDuration::from_secs(10),
                max_retries,
            )
            .with_jitter(false),
        );
        (client, transport, clock)
    }

    #[test]
    fn test_next_link_extracts_next_url() {
        let header = r#"<https://api.github.com/repositories/1/commits?page=2>; rel="next", <https://api.github.com/repositories/1/commits?page=9>; rel="last""#;
        assert_eq!(
            next_link(header).as_deref(),
            Some("https://api.github.com/repositories/1/commits?page=2")
        );
    }

    #[test]
    fn test_next_link_absent_on_last_page() {
        let header = r#"<https://api.github.com/x?page=1>; rel="first", <https://api.github.com/x?page=8>; rel="prev""#;
        assert_eq!(next_link(header), None);
    }

    #[tokio::test]
    async fn test_success_parses_items_and_sends_bearer_token() {
        let (mut client, transport, _clock) = setup(2);
        transport.push_response(
            HttpResponse::json(200, &json!([{"sha": "a"}, {"sha": "b"}]))
                .with_header("Link", r#"<https://api.test/next?page=2>; rel="next""#)
                .with_header("x-ratelimit-remaining", "4999")
                .with_header("x-ratelimit-reset", "1704070800"),
        );

        let page = client
            .send("/repos/o/r/commits", &[("per_page", "100".to_string())])
            .await
            .unwrap();

        assert_eq!(page.items.len(), 2);
        assert_eq!(page.next.as_deref(), Some("https://api.test/next?page=2"));
        assert_eq!(page.rate_limit.map(|r| r.remaining), Some(4999));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].request.url,
            "https://api.test/repos/o/r/commits?per_page=100"
        );
        assert_eq!(
            requests[0].request.header("authorization"),
            Some("Bearer fake-token")
        );
    }

    #[tokio::test]
    async fn test_continuation_url_is_used_verbatim() {
        let (mut client, transport, _clock) = setup(2);
        transport.push_response(HttpResponse::json(200, &json!([])));

        client
            .send("https://api.test/repositories/1/commits?page=2", &[])
            .await
            .unwrap();

        assert_eq!(
            transport.requests()[0].request.url,
            "https://api.test/repositories/1/commits?page=2"
        );
    }

    #[tokio::test]
    async fn test_two_server_errors_then_success_takes_three_attempts() {
        let (mut client, transport, clock) = setup(2);
        transport.push_response(HttpResponse::json(502, &json!({"message": "Bad Gateway"})));
        transport.push_error(HttpError::Transport("connection reset".into()));
        transport.push_response(HttpResponse::json(200, &json!([{"sha": "a"}])));

        let page = client.send("/repos/o/r/commits", &[]).await.unwrap();

        assert_eq!(page.items.len(), 1);
        assert_eq!(transport.request_count(), 3);
        let sleeps = clock.sleeps();
        assert_eq!(sleeps.len(), 2);
        assert!(sleeps[1] > sleeps[0], "delays should grow: {sleeps:?}");
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let (mut client, transport, _clock) = setup(2);
        for _ in 0..3 {
            transport.push_response(HttpResponse::json(503, &json!({"message": "unavailable"})));
        }

        let err = client.send("/repos/o/r/commits", &[]).await.unwrap_err();

        match err {
            TransportError::RetryExhausted {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("503"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_fatal_and_not_retried() {
        let cases = [
            (401, "Bad credentials"),
            (403, "Resource not accessible"),
            (404, "Not Found"),
            (422, "Validation Failed"),
        ];
        for (status, message) in cases {
            let (mut client, transport, _clock) = setup(2);
            transport.push_response(HttpResponse::json(status, &json!({"message": message})));

            let err = client.send("/repos/o/r/issues", &[]).await.unwrap_err();

            match (status, &err) {
                (401 | 403, TransportError::Authentication { message: m, .. }) => {
                    assert_eq!(m, message)
                }
                (404, TransportError::NotFound { message: m }) => assert_eq!(m, message),
                (422, TransportError::Client { status: 422, .. }) => {}
                _ => panic!("status {status} produced {err:?}"),
            }
            assert_eq!(transport.request_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_rate_limited_response_waits_and_does_not_spend_budget() {
        let (mut client, transport, clock) = setup(0);
        let reset = clock.now() + chrono::Duration::seconds(120);
        transport.push_response(
            HttpResponse::json(403, &json!({"message": "API rate limit exceeded"}))
                .with_header("x-ratelimit-remaining", "0")
                .with_header("x-ratelimit-reset", reset.timestamp().to_string()),
        );
        transport.push_response(
            HttpResponse::json(429, &json!({"message": "slow down"})).with_header("Retry-After", "5"),
        );
        transport.push_response(HttpResponse::json(200, &json!([{"number": 1}])));

        let page = client.send("/repos/o/r/issues", &[]).await.unwrap();

        assert_eq!(page.items.len(), 1);
        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[1].at.unwrap() >= reset);
        assert!(requests[2].at.unwrap() >= reset + chrono::Duration::seconds(5));
        // All three hit the same page.
        assert!(requests.iter().all(|r| r.request.url == requests[0].request.url));
    }

    #[tokio::test]
    async fn test_empty_repository_yields_empty_page() {
        let (mut client, transport, _clock) = setup(2);
        transport.push_response(HttpResponse::json(
            409,
            &json!({"message": "Git Repository is empty."}),
        ));

        let page = client.send("/repos/o/r/commits", &[]).await.unwrap();

        assert!(page.items.is_empty());
        assert!(page.next.is_none());
    }

    #[tokio::test]
    async fn test_non_array_body_is_a_decode_error() {
        let (mut client, transport, _clock) = setup(2);
        transport.push_response(HttpResponse::json(200, &json!({"not": "a list"})));

        let err = client.send("/repos/o/r/commits", &[]).await.unwrap_err();
        assert!(matches!(err, TransportError::Decode { .. }));
    }

    #[test]
    fn test_backoff_without_jitter_doubles_up_to_cap() {
        let delays: Vec<StdDuration> = RetryConfig::new(
            StdDuration::from_millis(100),
            StdDuration::from_millis(500),
            4,
        )
        .with_jitter(false)
        .into_backoff()
        .build()
        .collect();

        assert_eq!(
            delays,
            vec![
                StdDuration::from_millis(100),
                StdDuration::from_millis(200),
                StdDuration::from_millis(400),
                StdDuration::from_millis(500),
            ]
        );
    }
}
