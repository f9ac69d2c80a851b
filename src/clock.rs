//! Time source for the pipeline's two suspension points: rate-limit waits and
//! retry backoff.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration as StdDuration;

#[async_trait]
pub trait Clock: Send + Sync {
    /// Current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: StdDuration);
}

/// The real clock: `Utc::now` and `tokio::time::sleep`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: StdDuration) {
        tokio::time::sleep(duration).await;
    }
}
