use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::prompts::validate_templates;
use crate::types::{BotError, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://energy_news.db";

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys, DB URL) stay as env vars.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BotConfig {
    pub sources: Vec<SourceConfig>,
    pub prompts: PromptsConfig,
    pub llm: LlmConfig,
    pub crawl: CrawlConfig,
    pub posting: PostingConfig,
    pub compose: ComposeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub name: String,
    pub rss_url: String,
    #[serde(default)]
    pub website: Option<String>,
    /// Lower is crawled first.
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_priority() -> i64 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptsConfig {
    pub filter_system: String,
    pub filter_template: String,
    pub tweet_system: String,
    pub tweet_template: String,
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            filter_system: "You are a news filter that identifies US energy and data center news."
                .to_string(),
            filter_template: "Decide whether this article is about US energy (power generation, \
grid, utilities, oil and gas, renewables, nuclear, energy policy) or US data centers and their \
power demand.\n\nTitle: {title}\nSummary: {summary}\n\nAnswer \"Yes\" or \"No\" first, then give \
a one-sentence reason."
                .to_string(),
            tweet_system:
                "You are a professional energy news writer creating concise, engaging tweets."
                    .to_string(),
            tweet_template: "Write a tweet about this energy news article.\n\nTitle: {title}\n\
Summary: {summary}\nLink: {url}\n\nKeep it under 280 characters including the link. No hashtags. \
Return only the tweet text."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub filter_temperature: f32,
    pub filter_max_tokens: u32,
    pub tweet_temperature: f32,
    pub tweet_max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_seconds: 60,
            filter_temperature: 0.3,
            filter_max_tokens: 100,
            tweet_temperature: 0.7,
            tweet_max_tokens: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    /// Entries published before `now - hours_back` are ignored.
    pub hours_back: i64,
    pub fetch: FetchConfig,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            hours_back: 12,
            fetch: FetchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchConfig {
    pub user_agent: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub max_feed_size_mb: usize,
    pub follow_redirects: bool,
    pub max_redirects: usize,
    /// Minimum gap between two requests to the same host.
    pub min_host_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("energy-news-bot/", env!("CARGO_PKG_VERSION")).to_string(),
            timeout_seconds: 30,
            max_retries: 2,
            retry_delay_seconds: 2,
            max_feed_size_mb: 10,
            follow_redirects: true,
            max_redirects: 5,
            min_host_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostingConfig {
    pub api_base_url: String,
    pub upload_base_url: String,
    pub max_posts: usize,
    pub delay_seconds: u64,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_initial_ms: u64,
    pub retry_max_elapsed_seconds: u64,
}

impl PostingConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_secs(self.delay_seconds)
    }
}

impl Default for PostingConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.x.com/2".to_string(),
            upload_base_url: "https://api.x.com/2".to_string(),
            max_posts: 10,
            delay_seconds: 60,
            timeout_seconds: 30,
            max_retries: 3,
            retry_initial_ms: 2000,
            retry_max_elapsed_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ComposeConfig {
    /// Copy the article image into the draft so it gets uploaded with the post.
    pub attach_images: bool,
}

impl BotConfig {
    /// Load, parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BotError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| BotError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: BotConfig =
            toml::from_str(content).map_err(|e| BotError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        validate_templates(&self.prompts.filter_template, &self.prompts.tweet_template)?;

        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(BotError::Config(format!(
                    "source with feed {} has an empty name",
                    source.rss_url
                )));
            }
            validate_feed_url(&source.rss_url)?;
        }

        validate_hours_back(self.crawl.hours_back)?;

        Ok(())
    }
}

/// Longest crawl horizon accepted, one year.
pub const MAX_HOURS_BACK: i64 = 24 * 365;

pub fn validate_hours_back(hours_back: i64) -> Result<()> {
    if !(1..=MAX_HOURS_BACK).contains(&hours_back) {
        return Err(BotError::Config(format!(
            "crawl horizon must be between 1 and {MAX_HOURS_BACK} hours, got {hours_back}"
        )));
    }
    Ok(())
}

pub fn validate_feed_url(url: &str) -> Result<()> {
    let parsed = url::Url::parse(url)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(BotError::Config(format!(
            "feed URL must be http or https: {}",
            url
        )));
    }
    if parsed.host_str().is_none() {
        return Err(BotError::Config(format!("feed URL has no host: {}", url)));
    }
    Ok(())
}

/// Values that come from the environment rather than the config file.
#[derive(Clone, Default)]
pub struct Secrets {
    pub openai_api_key: Option<String>,
    pub x_access_token: Option<String>,
}

impl Secrets {
    /// Read secrets from the process environment.
    pub fn from_env() -> Self {
        Self {
            openai_api_key: non_empty_var("OPENAI_API_KEY"),
            x_access_token: non_empty_var("X_ACCESS_TOKEN"),
        }
    }

    pub fn openai_api_key(&self) -> Result<&str> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| BotError::Config("OPENAI_API_KEY is not set".to_string()))
    }

    pub fn x_access_token(&self) -> Result<&str> {
        self.x_access_token
            .as_deref()
            .ok_or_else(|| BotError::Config("X_ACCESS_TOKEN is not set".to_string()))
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("x_access_token", &self.x_access_token.as_ref().map(|_| "***"))
            .finish()
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
