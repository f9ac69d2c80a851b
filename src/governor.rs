//! Rate-limit governor.
//!
//! Tracks the quota the API reports on every response and suspends the caller
//! until the declared reset time once the quota is exhausted. Unlike transient
//! error retries, waiting here is unbounded in attempts: the delay comes from
//! the server, not from guesswork.

use crate::clock::Clock;
use crate::http::{header_get, HttpHeaders};
use crate::types::RateLimitSnapshot;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// Wait applied to a 429 that names neither a reset time nor `Retry-After`.
const DEFAULT_RATE_LIMIT_WAIT: StdDuration = StdDuration::from_secs(60);

/// Shortest wait after a rejection, so a `Retry-After: 0` cannot spin.
const MIN_RATE_LIMIT_WAIT: StdDuration = StdDuration::from_secs(1);

/// What the API last told us about the quota.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GovernorState {
    /// `None` until a response carries rate-limit headers.
    pub remaining_calls: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GovernorPhase {
    Ready,
    Waiting { until: DateTime<Utc> },
}

pub struct RateLimitGovernor {
    state: GovernorState,
    clock: Arc<dyn Clock>,
    max_sleep: StdDuration,
}

impl RateLimitGovernor {
    pub fn new(clock: Arc<dyn Clock>, max_sleep: StdDuration) -> Self {
        Self {
            state: GovernorState::default(),
            clock,
            max_sleep,
        }
    }

    pub fn state(&self) -> GovernorState {
        self.state
    }

    pub fn phase(&self) -> GovernorPhase {
        match self.state {
            GovernorState {
                remaining_calls: Some(0),
                reset_at: Some(until),
            } if self.clock.now() < until => GovernorPhase::Waiting { until },
            _ => GovernorPhase::Ready,
        }
    }

    /// Records the quota headers of any response.
    pub fn observe(&mut self, headers: &HttpHeaders) -> Option<RateLimitSnapshot> {
        let snapshot = parse_rate_limit_headers(headers)?;
        self.state.remaining_calls = Some(snapshot.remaining);
        self.state.reset_at = Some(snapshot.reset_at);
        Some(snapshot)
    }

    /// Records a response the server rejected for rate limiting. `Retry-After`
    /// wins over `x-ratelimit-reset`; with neither, a fixed default wait applies.
    /// A deadline that cannot be represented falls through to the next source.
    pub fn on_rate_limited(&mut self, headers: &HttpHeaders) {
        let now = self.clock.now();
        let snapshot = self.observe(headers);
        let retry_after = header_get(headers, "retry-after")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .and_then(|secs| deadline_after(now, StdDuration::from_secs(secs)));

        let reset_at = retry_after
            .or_else(|| snapshot.map(|s| s.reset_at).filter(|at| *at > now))
            .or_else(|| deadline_after(now, DEFAULT_RATE_LIMIT_WAIT))
            .unwrap_or(now);
        let earliest = deadline_after(now, MIN_RATE_LIMIT_WAIT).unwrap_or(now);

        self.state.remaining_calls = Some(0);
        self.state.reset_at = Some(reset_at.max(earliest));
    }

    /// Suspends until the quota window has reset. Returns immediately when Ready.
    ///
    /// Sleeps in slices of at most `max_sleep` and re-reads the wall clock after
    /// each one, so clock drift or a suspended process cannot cause an early
    /// or oversized wait.
    pub async fn wait_until_ready(&mut self) -> StdDuration {
        let mut waited = StdDuration::ZERO;

        while let GovernorPhase::Waiting { until } = self.phase() {
            let remaining = (until - self.clock.now())
                .to_std()
                .unwrap_or(StdDuration::ZERO);
            if waited.is_zero() {
                tracing::warn!(
                    reset_at = %until,
                    wait_secs = remaining.as_secs(),
                    "Rate limit exhausted, waiting for reset"
                );
            }
            let slice = remaining.min(self.max_sleep);
            self.clock.sleep(slice).await;
            waited += slice;
        }

        if self.state.remaining_calls == Some(0) {
            // The window has passed; the next response reports the fresh quota.
            self.state.remaining_calls = None;
        }
        if !waited.is_zero() {
            tracing::info!(waited_secs = waited.as_secs(), "Rate limit window reset, resuming");
        }

        waited
    }
}

/// `now + wait`, or `None` when the result is out of range.
fn deadline_after(now: DateTime<Utc>, wait: StdDuration) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(wait.as_secs()).ok()?;
    now.checked_add_signed(chrono::Duration::try_seconds(secs)?)
}

/// Extract rate limit info from GitHub response headers.
pub fn parse_rate_limit_headers(headers: &HttpHeaders) -> Option<RateLimitSnapshot> {
    let remaining = header_get(headers, "x-ratelimit-remaining")
        .and_then(|v| v.trim().parse::<u64>().ok())?;
    let reset_epoch = header_get(headers, "x-ratelimit-reset")
        .and_then(|v| v.trim().parse::<i64>().ok())?;
    let reset_at = DateTime::from_timestamp(reset_epoch, 0)?;
    Some(RateLimitSnapshot {
        remaining,
        reset_at,
    })
}
