//! Durable state: sources, articles, posts and the crawl log.
//!
//! Every query takes a plain `&mut SqliteConnection` so the stages can run
//! inside whatever transaction the pipeline hands them. Status updates are
//! guarded by the expected prior status and report whether a row moved.

use chrono::{DateTime, Utc};
use interfaces::EngagementMetrics;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use std::str::FromStr;
use tracing::{debug, info};

use crate::config::SourceConfig;
use crate::types::{
    Article, ArticleStatus, CrawlLogEntry, CrawlOutcome, NewArticle, NewPost, Post, PostStatus,
    Result, Source,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// A private in-memory database. The single connection is never recycled,
    /// otherwise the data would vanish with it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    pub async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }
}

// Sources

/// Insert or refresh a source keyed by its feed URL. Never touches
/// `last_crawled`.
pub async fn upsert_source(conn: &mut SqliteConnection, source: &SourceConfig) -> Result<i64> {
    let row = sqlx::query(
        r#"
        INSERT INTO sources (name, rss_url, website_url, priority, enabled)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (rss_url) DO UPDATE SET
            name = excluded.name,
            website_url = excluded.website_url,
            priority = excluded.priority,
            enabled = excluded.enabled
        RETURNING id
        "#,
    )
    .bind(&source.name)
    .bind(&source.rss_url)
    .bind(&source.website)
    .bind(source.priority)
    .bind(source.enabled)
    .fetch_one(&mut *conn)
    .await?;

    let id: i64 = row.try_get("id")?;
    info!(source = %source.name, id, "Registered source");
    Ok(id)
}

pub async fn list_enabled_sources(conn: &mut SqliteConnection) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources WHERE enabled = 1 ORDER BY priority ASC, id ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(source_from_row).collect()
}

pub async fn list_sources(conn: &mut SqliteConnection) -> Result<Vec<Source>> {
    let rows = sqlx::query("SELECT * FROM sources ORDER BY priority ASC, id ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(source_from_row).collect()
}

pub async fn touch_source_crawled(
    conn: &mut SqliteConnection,
    source_id: i64,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE sources SET last_crawled = ? WHERE id = ?")
        .bind(at)
        .bind(source_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// Articles

/// Insert a new `pending` article. Returns `false` when the URL is already
/// known.
pub async fn insert_article_if_absent(
    conn: &mut SqliteConnection,
    article: &NewArticle,
    created_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO articles (url, title, summary, image_url, source, published_at, status, created_at)
        VALUES (?, ?, ?, ?, ?, ?, 'pending', ?)
        ON CONFLICT (url) DO NOTHING
        "#,
    )
    .bind(&article.url)
    .bind(&article.title)
    .bind(&article.summary)
    .bind(&article.image_url)
    .bind(&article.source)
    .bind(article.published_at)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Most recently published `pending` articles.
pub async fn pending_articles(conn: &mut SqliteConnection, limit: usize) -> Result<Vec<Article>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM articles
        WHERE status = 'pending'
        ORDER BY published_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit as i64)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(article_from_row).collect()
}

/// Move a `pending` article to `approved` or `filtered_out`.
pub async fn set_article_verdict(
    conn: &mut SqliteConnection,
    article_id: i64,
    relevant: bool,
    reason: &str,
) -> Result<bool> {
    let status = if relevant {
        ArticleStatus::Approved
    } else {
        ArticleStatus::FilteredOut
    };
    let result = sqlx::query(
        r#"
        UPDATE articles
        SET status = ?, us_energy_relevant = ?, filter_reason = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(status.as_str())
    .bind(relevant)
    .bind(reason)
    .bind(article_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `approved` articles that have no post yet, newest first.
pub async fn approved_articles_without_post(conn: &mut SqliteConnection) -> Result<Vec<Article>> {
    let rows = sqlx::query(
        r#"
        SELECT a.* FROM articles a
        LEFT JOIN posts p ON p.article_id = a.id
        WHERE a.status = 'approved' AND p.id IS NULL
        ORDER BY a.published_at DESC, a.id DESC
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(article_from_row).collect()
}

pub async fn mark_article_posted(conn: &mut SqliteConnection, article_id: i64) -> Result<bool> {
    let result =
        sqlx::query("UPDATE articles SET status = 'posted' WHERE id = ? AND status = 'approved'")
            .bind(article_id)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn get_article(conn: &mut SqliteConnection, article_id: i64) -> Result<Option<Article>> {
    let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
        .bind(article_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(article_from_row).transpose()
}

pub async fn get_article_by_url(conn: &mut SqliteConnection, url: &str) -> Result<Option<Article>> {
    let row = sqlx::query("SELECT * FROM articles WHERE url = ?")
        .bind(url)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(article_from_row).transpose()
}

pub async fn list_articles(conn: &mut SqliteConnection) -> Result<Vec<Article>> {
    let rows = sqlx::query("SELECT * FROM articles ORDER BY id ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(article_from_row).collect()
}

// Posts

/// Insert a `draft` post. Returns `None` if the article already has one.
pub async fn insert_draft(
    conn: &mut SqliteConnection,
    post: &NewPost,
    created_at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let row = sqlx::query(
        r#"
        INSERT INTO posts (article_id, text, hashtags, media_url, article_link, status, created_at)
        VALUES (?, ?, '', ?, ?, 'draft', ?)
        ON CONFLICT (article_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(post.article_id)
    .bind(&post.text)
    .bind(&post.media_url)
    .bind(&post.article_link)
    .bind(created_at)
    .fetch_optional(&mut *conn)
    .await?;

    row.map(|row| row.try_get::<i64, _>("id"))
        .transpose()
        .map_err(Into::into)
}

/// Oldest drafts first.
pub async fn draft_posts(conn: &mut SqliteConnection, limit: usize) -> Result<Vec<Post>> {
    let rows = sqlx::query("SELECT * FROM posts WHERE status = 'draft' ORDER BY id ASC LIMIT ?")
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(post_from_row).collect()
}

pub async fn mark_post_posted(
    conn: &mut SqliteConnection,
    post_id: i64,
    external_id: &str,
    posted_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE posts
        SET status = 'posted', external_id = ?, posted_at = ?, error = NULL
        WHERE id = ? AND status = 'draft'
        "#,
    )
    .bind(external_id)
    .bind(posted_at)
    .bind(post_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn mark_post_failed(
    conn: &mut SqliteConnection,
    post_id: i64,
    error: &str,
) -> Result<bool> {
    let result =
        sqlx::query("UPDATE posts SET status = 'failed', error = ? WHERE id = ? AND status = 'draft'")
            .bind(error)
            .bind(post_id)
            .execute(&mut *conn)
            .await?;
    Ok(result.rows_affected() == 1)
}

/// Published posts with an external id, posted at or after `since`.
pub async fn posted_since(conn: &mut SqliteConnection, since: DateTime<Utc>) -> Result<Vec<Post>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM posts
        WHERE status = 'posted' AND external_id IS NOT NULL AND posted_at >= ?
        ORDER BY id ASC
        "#,
    )
    .bind(since)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter().map(post_from_row).collect()
}

pub async fn update_post_metrics(
    conn: &mut SqliteConnection,
    post_id: i64,
    metrics: &EngagementMetrics,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE posts
        SET likes = ?, reshares = ?, replies = ?, impressions = ?, metrics_updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(metrics.likes)
    .bind(metrics.reshares)
    .bind(metrics.replies)
    .bind(metrics.impressions)
    .bind(at)
    .bind(post_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn get_post(conn: &mut SqliteConnection, post_id: i64) -> Result<Option<Post>> {
    let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
        .bind(post_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.as_ref().map(post_from_row).transpose()
}

pub async fn list_posts(conn: &mut SqliteConnection) -> Result<Vec<Post>> {
    let rows = sqlx::query("SELECT * FROM posts ORDER BY id ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(post_from_row).collect()
}

// Crawl log

pub async fn insert_crawl_log(
    conn: &mut SqliteConnection,
    source: &str,
    articles_found: usize,
    articles_new: usize,
    outcome: CrawlOutcome,
    error: Option<&str>,
    crawled_at: DateTime<Utc>,
) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO crawl_log (source, articles_found, articles_new, status, error, crawled_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(source)
    .bind(articles_found as i64)
    .bind(articles_new as i64)
    .bind(outcome.as_str())
    .bind(error)
    .bind(crawled_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn list_crawl_log(conn: &mut SqliteConnection) -> Result<Vec<CrawlLogEntry>> {
    let rows = sqlx::query("SELECT * FROM crawl_log ORDER BY id ASC")
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(crawl_log_from_row).collect()
}

// Row mapping

fn source_from_row(row: &SqliteRow) -> Result<Source> {
    Ok(Source {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        rss_url: row.try_get("rss_url")?,
        website_url: row.try_get("website_url")?,
        priority: row.try_get("priority")?,
        enabled: row.try_get("enabled")?,
        last_crawled: row.try_get("last_crawled")?,
    })
}

fn article_from_row(row: &SqliteRow) -> Result<Article> {
    let status: String = row.try_get("status")?;
    Ok(Article {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        summary: row.try_get("summary")?,
        image_url: row.try_get("image_url")?,
        source: row.try_get("source")?,
        published_at: row.try_get("published_at")?,
        status: status.parse()?,
        us_energy_relevant: row.try_get("us_energy_relevant")?,
        filter_reason: row.try_get("filter_reason")?,
        created_at: row.try_get("created_at")?,
    })
}

fn post_from_row(row: &SqliteRow) -> Result<Post> {
    let status: String = row.try_get("status")?;
    Ok(Post {
        id: row.try_get("id")?,
        article_id: row.try_get("article_id")?,
        text: row.try_get("text")?,
        hashtags: row.try_get("hashtags")?,
        media_url: row.try_get("media_url")?,
        article_link: row.try_get("article_link")?,
        status: status.parse::<PostStatus>()?,
        external_id: row.try_get("external_id")?,
        created_at: row.try_get("created_at")?,
        posted_at: row.try_get("posted_at")?,
        error: row.try_get("error")?,
        likes: row.try_get("likes")?,
        reshares: row.try_get("reshares")?,
        replies: row.try_get("replies")?,
        impressions: row.try_get("impressions")?,
        metrics_updated_at: row.try_get("metrics_updated_at")?,
    })
}

fn crawl_log_from_row(row: &SqliteRow) -> Result<CrawlLogEntry> {
    let status: String = row.try_get("status")?;
    Ok(CrawlLogEntry {
        id: row.try_get("id")?,
        source: row.try_get("source")?,
        articles_found: row.try_get("articles_found")?,
        articles_new: row.try_get("articles_new")?,
        status: status.parse()?,
        error: row.try_get("error")?,
        crawled_at: row.try_get("crawled_at")?,
    })
}
