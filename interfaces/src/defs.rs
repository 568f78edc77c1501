use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{FeedError, LlmError, MediaError, PostingError};

/// One entry as returned by a feed source, before it becomes an article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub link: String,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl FeedItem {
    pub fn new(link: impl Into<String>) -> Self {
        Self {
            link: link.into(),
            title: None,
            summary: None,
            image_url: None,
            published: None,
            updated: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn published_at(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    pub fn updated_at(mut self, updated: DateTime<Utc>) -> Self {
        self.updated = Some(updated);
        self
    }

    /// Explicit publication time, falling back to the update time.
    pub fn effective_time(&self) -> Option<DateTime<Utc>> {
        self.published.or(self.updated)
    }
}

/// A single prompt-in/text-out request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Public engagement counters of a published post.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    pub likes: i64,
    pub reshares: i64,
    pub replies: i64,
    pub impressions: i64,
}

/// Anything that turns a feed endpoint into a list of entries.
///
/// `Ok(vec![])` means the feed was read and had nothing in it; a broken or
/// unreachable feed is an `Err`.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_entries(&self, endpoint: &str) -> Result<Vec<FeedItem>, FeedError>;
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Human-readable name, used in logs.
    fn model_name(&self) -> String;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

#[async_trait]
pub trait SocialPoster: Send + Sync {
    /// Upload an image and return the platform media id.
    async fn upload_media(&self, image: Vec<u8>) -> Result<String, PostingError>;

    /// Publish a post and return its external id.
    async fn create_post(&self, text: &str, media_id: Option<&str>) -> Result<String, PostingError>;

    async fn public_metrics(&self, external_id: &str) -> Result<EngagementMetrics, PostingError>;
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch_media(&self, url: &str) -> Result<Vec<u8>, MediaError>;
}
