use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use energy_news_bot::config::{validate_hours_back, DEFAULT_DATABASE_URL};
use energy_news_bot::{
    BotConfig, Database, Fetcher, OpenAiAdapter, Pipeline, RssFeedSource, Secrets, XClient,
};
use interfaces::{LanguageModel, SocialPoster};
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const LOG_TARGET: &str = "energy_news_bot::main";

/// Energy news bot - crawls energy RSS feeds, filters and summarises them
/// with an LLM, and posts the results to X.
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Opts {
    /// Path to the TOML config file
    #[arg(long, global = true, default_value = "energy-news-bot.toml")]
    config: PathBuf,

    /// SQLite database URL
    #[arg(long, global = true, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Crawl, filter, generate and post in one go
    Run {
        /// Only ingest entries from the last N hours
        #[arg(long)]
        hours: Option<i64>,

        /// Maximum number of posts to publish
        #[arg(long)]
        max_tweets: Option<usize>,

        /// Seconds to wait between posts
        #[arg(long)]
        post_delay_secs: Option<u64>,
    },
    /// Generate drafts for approved articles and post them
    GenerateAndPost {
        #[arg(long, default_value_t = 3)]
        max_tweets: usize,

        #[arg(long)]
        post_delay_secs: Option<u64>,
    },
    /// Post existing drafts without generating new ones
    PostDrafts {
        #[arg(long, default_value_t = 3)]
        max_tweets: usize,

        #[arg(long)]
        post_delay_secs: Option<u64>,
    },
    /// Fetch engagement counters for posts from the last 7 days
    RefreshMetrics,
    /// Apply migrations and register the sources from the config file
    InitDb,
}

impl Command {
    fn post_delay_secs(&self) -> Option<u64> {
        match self {
            Command::Run { post_delay_secs, .. }
            | Command::GenerateAndPost { post_delay_secs, .. }
            | Command::PostDrafts { post_delay_secs, .. } => *post_delay_secs,
            Command::RefreshMetrics | Command::InitDb => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let opts = Opts::parse();

    if let Err(e) = init_logging() {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(opts).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: LOG_TARGET, "Command failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(opts: Opts) -> Result<()> {
    let mut config = load_config(&opts.config)?;
    if let Some(delay) = opts.command.post_delay_secs() {
        config.posting.delay_seconds = delay;
    }
    let secrets = Secrets::from_env();

    let db = Database::connect(&opts.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", opts.database_url))?;
    db.migrate().await.context("Failed to apply migrations")?;

    match opts.command {
        Command::InitDb => {
            let pipeline = Pipeline::new(db, config.clone());
            let count = pipeline.sync_sources(&config.sources).await?;
            info!(target: LOG_TARGET, sources = count, "Database initialised");
        }
        Command::Run {
            hours, max_tweets, ..
        } => {
            let fetcher = Arc::new(Fetcher::new(config.crawl.fetch.clone())?);
            let hours = hours.unwrap_or(config.crawl.hours_back);
            validate_hours_back(hours).context("Invalid --hours")?;
            let max_posts = max_tweets.unwrap_or(config.posting.max_posts);
            let pipeline = Pipeline::new(db, config.clone())
                .with_feeds(Arc::new(RssFeedSource::new(fetcher.clone())))
                .with_llm(language_model(&config, &secrets)?)
                .with_poster(poster(&config, &secrets)?, fetcher);

            let summary = pipeline.run_full(hours, max_posts).await?;
            print!("{summary}");
        }
        Command::GenerateAndPost { max_tweets, .. } => {
            let fetcher = Arc::new(Fetcher::new(config.crawl.fetch.clone())?);
            let pipeline = Pipeline::new(db, config.clone())
                .with_llm(language_model(&config, &secrets)?)
                .with_poster(poster(&config, &secrets)?, fetcher);

            let summary = pipeline.run_generate_and_post(max_tweets).await?;
            print!("{summary}");
        }
        Command::PostDrafts { max_tweets, .. } => {
            let fetcher = Arc::new(Fetcher::new(config.crawl.fetch.clone())?);
            let pipeline = Pipeline::new(db, config.clone())
                .with_poster(poster(&config, &secrets)?, fetcher);

            let summary = pipeline.run_post_drafts(max_tweets).await?;
            print!("{summary}");
        }
        Command::RefreshMetrics => {
            let fetcher = Arc::new(Fetcher::new(config.crawl.fetch.clone())?);
            let pipeline = Pipeline::new(db, config.clone())
                .with_poster(poster(&config, &secrets)?, fetcher);

            let stats = pipeline.refresh_metrics().await?;
            println!("metrics: {} recent posts, {} updated", stats.candidates, stats.updated);
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<BotConfig> {
    if !path.exists() {
        warn!(target: LOG_TARGET, path = %path.display(), "Config file not found, using defaults");
        return Ok(BotConfig::default());
    }
    let config = BotConfig::load(path)
        .with_context(|| format!("Failed to load config {}", path.display()))?;
    info!(target: LOG_TARGET, path = %path.display(), sources = config.sources.len(), "Loaded config");
    Ok(config)
}

fn language_model(config: &BotConfig, secrets: &Secrets) -> Result<Arc<dyn LanguageModel>> {
    let api_key = secrets.openai_api_key()?;
    Ok(Arc::new(OpenAiAdapter::new(api_key, &config.llm)?))
}

fn poster(config: &BotConfig, secrets: &Secrets) -> Result<Arc<dyn SocialPoster>> {
    let token = secrets.x_access_token()?;
    Ok(Arc::new(XClient::new(token, &config.posting)?))
}

fn init_logging() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialise logging: {e}"))
}
