use async_trait::async_trait;
use interfaces::{FeedError, FeedItem, FeedSource};
use std::sync::Arc;
use tracing::info;

use crate::fetcher::Fetcher;
use crate::parser::parse_feed;

/// RSS/Atom over HTTP: fetch the document, then parse it with feed-rs.
pub struct RssFeedSource {
    fetcher: Arc<Fetcher>,
}

impl RssFeedSource {
    pub fn new(fetcher: Arc<Fetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl FeedSource for RssFeedSource {
    async fn fetch_entries(&self, endpoint: &str) -> Result<Vec<FeedItem>, FeedError> {
        let content = self.fetcher.fetch_text(endpoint).await?;
        let items = parse_feed(&content)?;
        info!(endpoint, entries = items.len(), "Pulled RSS feed");
        Ok(items)
    }
}
