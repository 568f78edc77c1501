use chrono::{DateTime, Duration, Utc};
use interfaces::{FeedItem, FeedSource};
use sqlx::{Connection, SqliteConnection};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::validate_hours_back;
use crate::store;
use crate::types::{BotError, CrawlOutcome, CrawlStats, NewArticle, Result, Source};

/// Title stored for entries that carry none.
pub const UNTITLED: &str = "No title";

pub struct CrawlStage {
    feeds: Arc<dyn FeedSource>,
}

impl CrawlStage {
    pub fn new(feeds: Arc<dyn FeedSource>) -> Self {
        Self { feeds }
    }

    /// Crawl every enabled source once, in priority order.
    ///
    /// Entries published strictly before `now - hours_back` are skipped.
    /// `sources_crawled` counts every source attempted, failed ones included.
    /// Each source's writes are committed on their own once its feed is read.
    pub async fn run(
        &self,
        conn: &mut SqliteConnection,
        hours_back: i64,
        now: DateTime<Utc>,
    ) -> Result<CrawlStats> {
        let cutoff = crawl_cutoff(now, hours_back)?;
        let sources = store::list_enabled_sources(conn).await?;
        let mut stats = CrawlStats::default();

        info!(sources = sources.len(), %cutoff, "Starting crawl");

        for source in &sources {
            stats.sources_crawled += 1;

            let items = match self.feeds.fetch_entries(&source.rss_url).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(source = %source.name, error = %e, "Crawl failed");
                    stats.sources_failed += 1;
                    let message = e.to_string();
                    store::insert_crawl_log(
                        conn,
                        &source.name,
                        0,
                        0,
                        CrawlOutcome::Failed,
                        Some(message.as_str()),
                        now,
                    )
                    .await?;
                    continue;
                }
            };

            let mut tx = conn.begin().await?;
            let (found, new) = ingest(&mut *tx, source, items, cutoff, now).await?;
            store::touch_source_crawled(&mut *tx, source.id, now).await?;
            store::insert_crawl_log(
                &mut *tx,
                &source.name,
                found,
                new,
                CrawlOutcome::Success,
                None,
                now,
            )
            .await?;
            tx.commit().await?;

            info!(source = %source.name, found, new, "Crawled source");
            stats.articles_found += found;
            stats.articles_new += new;
        }

        info!(
            sources = stats.sources_crawled,
            failed = stats.sources_failed,
            found = stats.articles_found,
            new = stats.articles_new,
            "Crawl complete"
        );
        Ok(stats)
    }
}

/// Oldest publish time still ingested for a horizon of `hours_back`.
pub fn crawl_cutoff(now: DateTime<Utc>, hours_back: i64) -> Result<DateTime<Utc>> {
    validate_hours_back(hours_back)?;
    Duration::try_hours(hours_back)
        .and_then(|horizon| now.checked_sub_signed(horizon))
        .ok_or_else(|| BotError::Config(format!("crawl horizon of {hours_back} hours is out of range")))
}

/// Insert the fresh entries of one feed. Returns (entries seen, rows inserted).
async fn ingest(
    conn: &mut SqliteConnection,
    source: &Source,
    items: Vec<FeedItem>,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(usize, usize)> {
    let found = items.len();
    let mut new = 0;

    for item in items {
        let published_at = item.effective_time().unwrap_or(now);
        if published_at < cutoff {
            debug!(url = %item.link, %published_at, "Skipping entry older than cutoff");
            continue;
        }

        let article = NewArticle {
            title: item.title.unwrap_or_else(|| UNTITLED.to_string()),
            url: item.link,
            summary: item.summary,
            image_url: item.image_url,
            source: source.name.clone(),
            published_at,
        };

        if store::insert_article_if_absent(conn, &article, now).await? {
            new += 1;
        } else {
            debug!(url = %article.url, "Article already known");
        }
    }

    Ok((found, new))
}
