use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::prompts::TemplateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Pending,
    Approved,
    FilteredOut,
    Posted,
}

impl ArticleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArticleStatus::Pending => "pending",
            ArticleStatus::Approved => "approved",
            ArticleStatus::FilteredOut => "filtered_out",
            ArticleStatus::Posted => "posted",
        }
    }
}

impl FromStr for ArticleStatus {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(ArticleStatus::Pending),
            "approved" => Ok(ArticleStatus::Approved),
            "filtered_out" => Ok(ArticleStatus::FilteredOut),
            "posted" => Ok(ArticleStatus::Posted),
            other => Err(BotError::InvalidStatus {
                kind: "article",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Draft,
    Posted,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Posted => "posted",
            PostStatus::Failed => "failed",
        }
    }
}

impl FromStr for PostStatus {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "posted" => Ok(PostStatus::Posted),
            "failed" => Ok(PostStatus::Failed),
            other => Err(BotError::InvalidStatus {
                kind: "post",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlOutcome {
    Success,
    Failed,
}

impl CrawlOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlOutcome::Success => "success",
            CrawlOutcome::Failed => "failed",
        }
    }
}

impl FromStr for CrawlOutcome {
    type Err = BotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "success" => Ok(CrawlOutcome::Success),
            "failed" => Ok(CrawlOutcome::Failed),
            other => Err(BotError::InvalidStatus {
                kind: "crawl",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub rss_url: String,
    pub website_url: Option<String>,
    pub priority: i64,
    pub enabled: bool,
    pub last_crawled: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub status: ArticleStatus,
    pub us_energy_relevant: Option<bool>,
    pub filter_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Article fields known at discovery time.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub title: String,
    pub summary: Option<String>,
    pub image_url: Option<String>,
    pub source: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub article_id: Option<i64>,
    pub text: String,
    pub hashtags: String,
    pub media_url: Option<String>,
    pub article_link: String,
    pub status: PostStatus,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub likes: Option<i64>,
    pub reshares: Option<i64>,
    pub replies: Option<i64>,
    pub impressions: Option<i64>,
    pub metrics_updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub article_id: i64,
    pub text: String,
    pub media_url: Option<String>,
    pub article_link: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlLogEntry {
    pub id: i64,
    pub source: String,
    pub articles_found: i64,
    pub articles_new: i64,
    pub status: CrawlOutcome,
    pub error: Option<String>,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub sources_crawled: usize,
    pub sources_failed: usize,
    pub articles_found: usize,
    pub articles_new: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    pub total: usize,
    pub approved: usize,
    pub filtered_out: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposeStats {
    pub total: usize,
    pub generated: usize,
    pub errored: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub total: usize,
    pub posted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsStats {
    pub candidates: usize,
    pub updated: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Crawl,
    Filter,
    Compose,
    Publish,
    Metrics,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Crawl => "crawl",
            Stage::Filter => "filter",
            Stage::Compose => "compose",
            Stage::Publish => "publish",
            Stage::Metrics => "metrics",
        };
        f.write_str(name)
    }
}

/// Errors that abort a whole stage or command. Item-level failures never
/// end up here; the stages absorb them.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Invalid {kind} status: {value}")]
    InvalidStatus { kind: &'static str, value: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Stage {stage} is already running")]
    StageBusy { stage: Stage },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BotError>;
