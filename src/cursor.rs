//! Pagination cursor.
//!
//! An explicit state machine over a paginated collection: the continuation
//! URL, the items left in the current page and a running count. A page is
//! requested only when the buffer is empty and the cap has not been reached.
//! Once the cap is hit the rest of the current page is dropped, and once the
//! cursor is exhausted it stays exhausted.

use crate::error::FetchError;
use crate::github::GitHubClient;
use crate::shutdown::CancellationFlag;
use crate::types::RawItem;
use std::num::NonZeroUsize;

#[derive(Clone, Debug, PartialEq, Eq)]
enum CursorState {
    /// No page requested yet.
    Start,
    /// The API announced another page at this URL.
    Next(String),
    Exhausted,
}

pub struct PaginationCursor<'a> {
    client: &'a mut GitHubClient,
    path: String,
    query: Vec<(&'static str, String)>,
    state: CursorState,
    buffer: std::vec::IntoIter<RawItem>,
    max_records: Option<NonZeroUsize>,
    yielded: usize,
    pages_fetched: usize,
    skip: Option<fn(&RawItem) -> bool>,
    cancel: CancellationFlag,
}

impl<'a> PaginationCursor<'a> {
    pub fn new(
        client: &'a mut GitHubClient,
        path: String,
        query: Vec<(&'static str, String)>,
        max_records: Option<NonZeroUsize>,
    ) -> Self {
        Self {
            client,
            path,
            query,
            state: CursorState::Start,
            buffer: Vec::new().into_iter(),
            max_records,
            yielded: 0,
            pages_fetched: 0,
            skip: None,
            cancel: CancellationFlag::new(),
        }
    }

    /// Items matching `skip` are dropped and do not count toward the cap.
    #[must_use]
    pub fn with_skip(mut self, skip: fn(&RawItem) -> bool) -> Self {
        self.skip = Some(skip);
        self
    }

    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    /// True when every item of the last fetched page has been handed out.
    pub fn page_drained(&self) -> bool {
        self.buffer.as_slice().is_empty()
    }

    fn cap_reached(&self) -> bool {
        self.max_records
            .is_some_and(|max| self.yielded >= max.get())
    }

    /// The next raw item, `Ok(None)` once the collection or the cap is
    /// exhausted.
    pub async fn next_item(&mut self) -> Result<Option<RawItem>, FetchError> {
        loop {
            if self.cap_reached() {
                self.state = CursorState::Exhausted;
                self.buffer = Vec::new().into_iter();
                return Ok(None);
            }

            if let Some(item) = self.buffer.next() {
                if self.skip.is_some_and(|skip| skip(&item)) {
                    tracing::debug!("Skipping item excluded by filter");
                    continue;
                }
                self.yielded += 1;
                return Ok(Some(item));
            }

            // Exhausted from here on unless the page announces a successor; a
            // failed request leaves it that way too.
            let page = match std::mem::replace(&mut self.state, CursorState::Exhausted) {
                CursorState::Exhausted => return Ok(None),
                _ if self.cancel.is_cancelled() => return Err(FetchError::Cancelled),
                CursorState::Next(url) => self.client.send(&url, &[]).await?,
                CursorState::Start => self.client.send(&self.path, &self.query).await?,
            };

            self.pages_fetched += 1;
            tracing::info!(
                page = self.pages_fetched,
                items = page.items.len(),
                remaining_quota = ?page.rate_limit.map(|r| r.remaining),
                "Fetched page"
            );

            self.state = match page.next {
                Some(next) if !page.items.is_empty() => CursorState::Next(next),
                _ => CursorState::Exhausted,
            };
            self.buffer = page.items.into_iter();
        }
    }
}
