//! Change stream processing
//!
//! The updated-since feeds are unbounded; the processor keeps at most one
//! page of payloads resident at a time. `ChangeFeed` is a pull cursor over
//! the server's pagination (only the next-page URL is held between calls),
//! and `ChangeStreamProcessor` drives a visitor over it strictly
//! sequentially. A feed or visitor error aborts the stream immediately.

use async_trait::async_trait;
use log::debug;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, Payload, PimClient};

/// Pull cursor over one paginated change feed.
#[async_trait]
pub trait ChangeFeed: Send {
    /// The next page of changed payloads, or `None` once the feed is
    /// exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<Payload>>, ApiError>;
}

/// Per-page callback driven by [`ChangeStreamProcessor`].
#[async_trait]
pub trait BatchVisitor: Send {
    async fn visit_batch(&mut self, batch: Vec<Payload>) -> anyhow::Result<()>;
}

/// Drives a [`ChangeFeed`] to exhaustion, one page at a time.
pub struct ChangeStreamProcessor;

impl ChangeStreamProcessor {
    /// Visit every page of `feed` in order. Stops early and cleanly on
    /// cancellation; propagates the first feed or visitor error, aborting
    /// the stream.
    pub async fn process(
        feed: &mut dyn ChangeFeed,
        visitor: &mut dyn BatchVisitor,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let mut pages = 0usize;
        while !cancel.is_cancelled() {
            let batch = match feed.next_batch().await? {
                Some(batch) => batch,
                None => break,
            };

            pages += 1;
            debug!("change stream page {} ({} entries)", pages, batch.len());
            visitor.visit_batch(batch).await?;
        }

        if cancel.is_cancelled() {
            debug!("change stream cancelled after {} pages", pages);
        }
        Ok(())
    }
}

/// [`ChangeFeed`] over the Akeneo search pagination: holds nothing but the
/// URL of the next page between calls.
pub struct PagedChangeFeed<'a> {
    client: &'a PimClient,
    next: Option<String>,
}

impl<'a> PagedChangeFeed<'a> {
    pub fn new(client: &'a PimClient, first_page_url: String) -> Self {
        Self {
            client,
            next: Some(first_page_url),
        }
    }
}

#[async_trait]
impl ChangeFeed for PagedChangeFeed<'_> {
    async fn next_batch(&mut self) -> Result<Option<Vec<Payload>>, ApiError> {
        let url = match self.next.take() {
            Some(url) => url,
            None => return Ok(None),
        };

        let (items, next) = self.client.fetch_search_page(&url).await?;
        self.next = next;
        Ok(Some(items))
    }
}
