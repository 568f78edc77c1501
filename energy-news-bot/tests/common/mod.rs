#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use energy_news_bot::config::{BotConfig, SourceConfig};
use energy_news_bot::store;
use energy_news_bot::{Database, NewArticle, NewPost, Pipeline, Result};
use interfaces::{
    CompletionRequest, EngagementMetrics, FeedError, FeedItem, FeedSource, LanguageModel, LlmError,
    MediaError, MediaSource, PostingError, SocialPoster,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Once};
use std::time::Instant;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new("energy_news_bot=debug"))
            .with_test_writer()
            .init();
    });
}

/// Fresh in-memory database with the schema applied.
pub async fn test_db() -> Result<Database> {
    init_tracing();
    let db = Database::in_memory().await?;
    db.migrate().await?;
    Ok(db)
}

/// Database in a file under `dir`, so several pooled connections can be
/// open at once.
pub async fn file_db(dir: &tempfile::TempDir) -> Result<Database> {
    init_tracing();
    let url = format!("sqlite://{}", dir.path().join("bot.db").display());
    let db = Database::connect(&url).await?;
    db.migrate().await?;
    Ok(db)
}

/// Config with no delay between posts.
pub fn test_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.posting.delay_seconds = 0;
    config
}

pub fn source(name: &str, rss_url: &str, priority: i64) -> SourceConfig {
    SourceConfig {
        name: name.to_string(),
        rss_url: rss_url.to_string(),
        website: None,
        priority,
        enabled: true,
    }
}

pub async fn seed_sources(db: &Database, sources: &[SourceConfig]) -> Result<()> {
    let mut conn = db.acquire().await?;
    for s in sources {
        store::upsert_source(&mut conn, s).await?;
    }
    Ok(())
}

/// Insert a `pending` article and return its id.
pub async fn seed_article(db: &Database, url: &str, title: &str, published_at: DateTime<Utc>) -> Result<i64> {
    let mut conn = db.acquire().await?;
    let article = NewArticle {
        url: url.to_string(),
        title: title.to_string(),
        summary: Some(format!("Summary of {title}")),
        image_url: None,
        source: "Test Source".to_string(),
        published_at,
    };
    store::insert_article_if_absent(&mut conn, &article, Utc::now()).await?;
    let stored = store::get_article_by_url(&mut conn, url).await?;
    Ok(stored.map(|a| a.id).unwrap_or_default())
}

/// Insert an article that has already been approved.
pub async fn seed_approved(db: &Database, url: &str, title: &str, published_at: DateTime<Utc>) -> Result<i64> {
    let id = seed_article(db, url, title, published_at).await?;
    let mut conn = db.acquire().await?;
    store::set_article_verdict(&mut conn, id, true, "Yes, US energy").await?;
    Ok(id)
}

/// Insert an approved article with a draft post; returns the post id.
pub async fn seed_draft(db: &Database, url: &str, text: &str, media_url: Option<&str>) -> Result<i64> {
    let article_id = seed_approved(db, url, text, Utc::now()).await?;
    let mut conn = db.acquire().await?;
    let post = NewPost {
        article_id,
        text: text.to_string(),
        media_url: media_url.map(str::to_string),
        article_link: url.to_string(),
    };
    let id = store::insert_draft(&mut conn, &post, Utc::now()).await?;
    Ok(id.unwrap_or_default())
}

/// Feed source answering from a fixed table of endpoints.
#[derive(Default)]
pub struct ScriptedFeeds {
    responses: Mutex<HashMap<String, std::result::Result<Vec<FeedItem>, FeedError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, endpoint: &str, response: std::result::Result<Vec<FeedItem>, FeedError>) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert(endpoint.to_string(), response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for ScriptedFeeds {
    async fn fetch_entries(&self, endpoint: &str) -> std::result::Result<Vec<FeedItem>, FeedError> {
        self.calls.lock().unwrap().push(endpoint.to_string());
        self.responses
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| Err(FeedError::Http(format!("no route to {endpoint}"))))
    }
}

type Responder = Box<dyn Fn(&CompletionRequest) -> std::result::Result<String, LlmError> + Send + Sync>;

/// Language model whose answers come from a closure; every request is kept.
pub struct ScriptedLlm {
    respond: Responder,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&CompletionRequest) -> std::result::Result<String, LlmError> + Send + Sync + 'static,
    {
        Self {
            respond: Box::new(respond),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn constant(answer: &str) -> Self {
        let answer = answer.to_string();
        Self::new(move |_| Ok(answer.clone()))
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLlm {
    fn model_name(&self) -> String {
        "scripted".to_string()
    }

    async fn complete(&self, request: &CompletionRequest) -> std::result::Result<String, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.respond)(request)
    }
}

#[derive(Debug, Clone)]
pub struct PostCall {
    pub text: String,
    pub media_id: Option<String>,
    pub started: Instant,
    pub finished: Instant,
}

/// Social poster that records every call. Post outcomes are consumed from a
/// queue; once it is empty posts succeed with ids `ext-1`, `ext-2`, ...
#[derive(Default)]
pub struct RecordingPoster {
    outcomes: Mutex<VecDeque<std::result::Result<String, PostingError>>>,
    upload_result: Mutex<Option<std::result::Result<String, PostingError>>>,
    metrics: Mutex<HashMap<String, std::result::Result<EngagementMetrics, PostingError>>>,
    posts: Mutex<Vec<PostCall>>,
    uploads: Mutex<Vec<usize>>,
    post_latency: Option<std::time::Duration>,
}

impl RecordingPoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_outcomes(self, outcomes: Vec<std::result::Result<String, PostingError>>) -> Self {
        *self.outcomes.lock().unwrap() = outcomes.into();
        self
    }

    pub fn with_upload_result(self, result: std::result::Result<String, PostingError>) -> Self {
        *self.upload_result.lock().unwrap() = Some(result);
        self
    }

    pub fn with_metrics(self, external_id: &str, result: std::result::Result<EngagementMetrics, PostingError>) -> Self {
        self.metrics
            .lock()
            .unwrap()
            .insert(external_id.to_string(), result);
        self
    }

    pub fn with_post_latency(mut self, latency: std::time::Duration) -> Self {
        self.post_latency = Some(latency);
        self
    }

    pub fn posts(&self) -> Vec<PostCall> {
        self.posts.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<usize> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocialPoster for RecordingPoster {
    async fn upload_media(&self, image: Vec<u8>) -> std::result::Result<String, PostingError> {
        self.uploads.lock().unwrap().push(image.len());
        self.upload_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Ok("media-1".to_string()))
    }

    async fn create_post(&self, text: &str, media_id: Option<&str>) -> std::result::Result<String, PostingError> {
        let started = Instant::now();
        if let Some(latency) = self.post_latency {
            tokio::time::sleep(latency).await;
        }
        let mut posts = self.posts.lock().unwrap();
        let n = posts.len() + 1;
        posts.push(PostCall {
            text: text.to_string(),
            media_id: media_id.map(str::to_string),
            started,
            finished: Instant::now(),
        });
        self.outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(format!("ext-{n}")))
    }

    async fn public_metrics(&self, external_id: &str) -> std::result::Result<EngagementMetrics, PostingError> {
        self.metrics
            .lock()
            .unwrap()
            .get(external_id)
            .cloned()
            .unwrap_or_else(|| Err(PostingError::Api {
                status: 404,
                message: format!("unknown post {external_id}"),
            }))
    }
}

/// Media source serving one canned answer for every URL.
pub struct StaticMedia {
    result: std::result::Result<Vec<u8>, MediaError>,
    requested: Mutex<Vec<String>>,
}

impl StaticMedia {
    pub fn ok(bytes: &[u8]) -> Self {
        Self {
            result: Ok(bytes.to_vec()),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(error: MediaError) -> Self {
        Self {
            result: Err(error),
            requested: Mutex::new(Vec::new()),
        }
    }

    pub fn requested(&self) -> Vec<String> {
        self.requested.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for StaticMedia {
    async fn fetch_media(&self, url: &str) -> std::result::Result<Vec<u8>, MediaError> {
        self.requested.lock().unwrap().push(url.to_string());
        self.result.clone()
    }
}

/// Pipeline wired with every collaborator.
pub fn full_pipeline(
    db: &Database,
    config: BotConfig,
    feeds: Arc<ScriptedFeeds>,
    llm: Arc<ScriptedLlm>,
    poster: Arc<RecordingPoster>,
    media: Arc<StaticMedia>,
) -> Pipeline {
    Pipeline::new(db.clone(), config)
        .with_feeds(feeds)
        .with_llm(llm)
        .with_poster(poster, media)
}
