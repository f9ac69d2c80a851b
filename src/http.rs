use async_trait::async_trait;
use octocrab::Octocrab;
use thiserror::Error;

/// HTTP headers represented as key/value pairs.
///
/// Header names are treated case-insensitively by helper functions.
pub type HttpHeaders = Vec<(String, String)>;

/// A minimal HTTP GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HttpHeaders,
}

impl HttpRequest {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

/// A minimal HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HttpHeaders,
    pub body: String,
}

impl HttpResponse {
    /// A response with a JSON body and no headers.
    #[must_use]
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        header_get(&self.headers, name)
    }
}

#[derive(Debug, Error)]
pub enum HttpError {
    /// Connection-level failure: DNS, TLS, reset, timeout, truncated body.
    #[error("http transport error: {0}")]
    Transport(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no mock response queued for GET {url}")]
    NoMockResponse { url: String },
}

/// Transport boundary for all HTTP I/O.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Get the first header value matching `name` (case-insensitive).
#[must_use]
pub fn header_get<'a>(headers: &'a HttpHeaders, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// A real HTTP transport backed by octocrab's connection pool.
///
/// Authentication and retries are left to the caller: the client carries no
/// credential of its own and octocrab's built-in retry layer is disabled so
/// that every attempt is visible to the retry budget.
#[derive(Clone)]
pub struct OctocrabTransport {
    octocrab: Octocrab,
}

impl OctocrabTransport {
    pub fn new() -> Result<Self, HttpError> {
        let octocrab = Octocrab::builder()
            .add_retry_config(octocrab::service::middleware::retry::RetryConfig::None)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;
        Ok(Self { octocrab })
    }
}

#[async_trait]
impl HttpTransport for OctocrabTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut header_map = http::HeaderMap::new();
        for (name, value) in &request.headers {
            let name = http::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
            let value = http::header::HeaderValue::from_str(value)
                .map_err(|e| HttpError::InvalidRequest(e.to_string()))?;
            header_map.insert(name, value);
        }

        let response = self
            .octocrab
            ._get_with_headers(request.url.as_str(), Some(header_map))
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers: HttpHeaders = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect();

        let body = self
            .octocrab
            .body_to_string(response)
            .await
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_get_is_case_insensitive_and_returns_first_match() {
        let headers: HttpHeaders = vec![
            ("X-RateLimit-Remaining".to_string(), "10".to_string()),
            ("x-ratelimit-remaining".to_string(), "9".to_string()),
        ];
        assert_eq!(header_get(&headers, "x-ratelimit-remaining"), Some("10"));
        assert_eq!(header_get(&headers, "X-RATELIMIT-REMAINING"), Some("10"));
        assert_eq!(header_get(&headers, "missing"), None);
    }

    #[test]
    fn json_response_builder_sets_body_and_headers() {
        let resp = HttpResponse::json(200, &serde_json::json!([{"sha": "abc"}]))
            .with_header("Link", "<https://example.com?page=2>; rel=\"next\"");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"[{"sha":"abc"}]"#);
        assert!(resp.header("link").is_some());
    }

    #[tokio::test]
    async fn octocrab_transport_builds_without_credentials() {
        let transport = OctocrabTransport::new();
        assert!(transport.is_ok());
    }
}
