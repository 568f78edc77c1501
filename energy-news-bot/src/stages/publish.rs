use chrono::{DateTime, Duration as ChronoDuration, Utc};
use interfaces::{MediaSource, SocialPoster};
use sqlx::{Connection, SqliteConnection};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::store;
use crate::types::{MetricsStats, Post, PublishStats, Result};

/// Posts older than this are no longer refreshed.
pub const METRICS_WINDOW_DAYS: i64 = 7;

/// Submits drafts to the social platform, oldest first.
pub struct PublishStage {
    poster: Arc<dyn SocialPoster>,
    media: Arc<dyn MediaSource>,
    delay: Duration,
}

impl PublishStage {
    pub fn new(poster: Arc<dyn SocialPoster>, media: Arc<dyn MediaSource>, delay: Duration) -> Self {
        Self {
            poster,
            media,
            delay,
        }
    }

    /// Publish up to `max_posts` drafts. After each successful post other
    /// than the last of the batch, wait the configured delay.
    ///
    /// Each outcome is committed before the next draft is touched, so no
    /// write transaction is open during API calls or the delay.
    pub async fn run(&self, conn: &mut SqliteConnection, max_posts: usize) -> Result<PublishStats> {
        let drafts = store::draft_posts(conn, max_posts).await?;
        let mut stats = PublishStats {
            total: drafts.len(),
            ..Default::default()
        };

        info!(drafts = drafts.len(), max_posts, "Publishing drafts");

        let last_index = drafts.len().saturating_sub(1);
        for (index, post) in drafts.iter().enumerate() {
            let media_id = match post.media_url.as_deref() {
                Some(url) => self.attach_media(post, url).await,
                None => None,
            };

            match self.poster.create_post(&post.text, media_id.as_deref()).await {
                Ok(external_id) => {
                    let mut tx = conn.begin().await?;
                    if !store::mark_post_posted(&mut *tx, post.id, &external_id, Utc::now()).await? {
                        warn!(post_id = post.id, "Post left draft state while publishing");
                    }
                    if let Some(article_id) = post.article_id {
                        store::mark_article_posted(&mut *tx, article_id).await?;
                    }
                    tx.commit().await?;
                    stats.posted += 1;
                    info!(post_id = post.id, external_id = %external_id, "Posted");

                    if index < last_index && !self.delay.is_zero() {
                        debug!(delay = ?self.delay, "Waiting before next post");
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => {
                    error!(post_id = post.id, error = %e, "Failed to post");
                    store::mark_post_failed(conn, post.id, &e.to_string()).await?;
                    stats.failed += 1;
                }
            }
        }

        info!(
            total = stats.total,
            posted = stats.posted,
            failed = stats.failed,
            "Publishing complete"
        );
        Ok(stats)
    }

    /// Fetch and upload the post image. Any failure degrades to a text-only post.
    async fn attach_media(&self, post: &Post, url: &str) -> Option<String> {
        let bytes = match self.media.fetch_media(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(post_id = post.id, url, error = %e, "Could not fetch media, posting text only");
                return None;
            }
        };

        match self.poster.upload_media(bytes).await {
            Ok(media_id) => Some(media_id),
            Err(e) => {
                warn!(post_id = post.id, url, error = %e, "Media upload failed, posting text only");
                None
            }
        }
    }
}

/// Backfills engagement counters for recently published posts.
pub struct MetricsRefresh {
    poster: Arc<dyn SocialPoster>,
}

impl MetricsRefresh {
    pub fn new(poster: Arc<dyn SocialPoster>) -> Self {
        Self { poster }
    }

    pub async fn run(&self, conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<MetricsStats> {
        let since = now - ChronoDuration::days(METRICS_WINDOW_DAYS);
        let posts = store::posted_since(conn, since).await?;
        let mut stats = MetricsStats {
            candidates: posts.len(),
            ..Default::default()
        };

        for post in &posts {
            let Some(external_id) = post.external_id.as_deref() else {
                continue;
            };

            match self.poster.public_metrics(external_id).await {
                Ok(metrics) => {
                    store::update_post_metrics(conn, post.id, &metrics, now).await?;
                    stats.updated += 1;
                    debug!(post_id = post.id, likes = metrics.likes, impressions = metrics.impressions, "Updated metrics");
                }
                Err(e) => {
                    warn!(post_id = post.id, external_id, error = %e, "Could not fetch metrics");
                }
            }
        }

        info!(candidates = stats.candidates, updated = stats.updated, "Metrics refresh complete");
        Ok(stats)
    }
}
