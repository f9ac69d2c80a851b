//! In-memory doubles for the transport and the clock.
//!
//! No sockets and no real sleeping: responses are canned, time is virtual.

use crate::clock::Clock;
use crate::http::{HttpError, HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

/// A clock whose `sleep` advances virtual time instantly.
#[derive(Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockInner>>,
}

struct ManualClockInner {
    now: DateTime<Utc>,
    sleeps: Vec<StdDuration>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClockInner {
                now,
                sleeps: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualClockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn advance(&self, duration: StdDuration) {
        let mut inner = self.lock();
        inner.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
    }

    /// Every delay passed to `sleep`, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<StdDuration> {
        self.lock().sleeps.clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    async fn sleep(&self, duration: StdDuration) {
        self.lock().sleeps.push(duration);
        self.advance(duration);
    }
}

/// A request as the mock saw it, stamped with the clock time it was issued.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub request: HttpRequest,
    pub at: Option<DateTime<Utc>>,
}

/// In-memory mock transport.
///
/// Responses are returned in FIFO order regardless of URL, which matches how a
/// sequential pagination run consumes them.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    clock: Option<ManualClock>,
}

#[derive(Default)]
struct MockTransportInner {
    responses: VecDeque<Result<HttpResponse, HttpError>>,
    requests: Vec<RecordedRequest>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp every recorded request with this clock's time.
    #[must_use]
    pub fn with_clock(mut self, clock: ManualClock) -> Self {
        self.clock = Some(clock);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.lock().responses.push_back(Ok(response));
    }

    /// Queue a connection-level failure.
    pub fn push_error(&self, error: HttpError) {
        self.lock().responses.push_back(Err(error));
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn get(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let at = self.clock.as_ref().map(Clock::now);
        let mut inner = self.lock();
        let url = request.url.clone();
        inner.requests.push(RecordedRequest { request, at });

        inner
            .responses
            .pop_front()
            .unwrap_or(Err(HttpError::NoMockResponse { url }))
    }
}
