use chrono::Utc;
use interfaces::{FeedSource, LanguageModel, MediaSource, SocialPoster};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::info;

use crate::config::{BotConfig, SourceConfig};
use crate::stages::{ComposeStage, CrawlStage, FilterStage, MetricsRefresh, PublishStage};
use crate::store::{self, Database};
use crate::types::{
    BotError, ComposeStats, CrawlStats, FilterStats, MetricsStats, PublishStats, Result, Stage,
};

/// One lock per stage so the same stage never runs twice at once.
#[derive(Default)]
struct StageGuards {
    crawl: Mutex<()>,
    filter: Mutex<()>,
    compose: Mutex<()>,
    publish: Mutex<()>,
    metrics: Mutex<()>,
}

impl StageGuards {
    fn acquire(&self, stage: Stage) -> Result<MutexGuard<'_, ()>> {
        let lock = match stage {
            Stage::Crawl => &self.crawl,
            Stage::Filter => &self.filter,
            Stage::Compose => &self.compose,
            Stage::Publish => &self.publish,
            Stage::Metrics => &self.metrics,
        };
        lock.try_lock().map_err(|_| BotError::StageBusy { stage })
    }
}

/// Counts from every stage that ran in one invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub crawl: Option<CrawlStats>,
    pub filter: Option<FilterStats>,
    pub compose: Option<ComposeStats>,
    pub publish: Option<PublishStats>,
    pub metrics: Option<MetricsStats>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = &self.crawl {
            writeln!(
                f,
                "crawl:   {} sources ({} failed), {} entries found, {} new",
                s.sources_crawled, s.sources_failed, s.articles_found, s.articles_new
            )?;
        }
        if let Some(s) = &self.filter {
            writeln!(
                f,
                "filter:  {} considered, {} approved, {} filtered out, {} errors",
                s.total, s.approved, s.filtered_out, s.errored
            )?;
        }
        if let Some(s) = &self.compose {
            writeln!(
                f,
                "compose: {} considered, {} drafts generated, {} errors",
                s.total, s.generated, s.errored
            )?;
        }
        if let Some(s) = &self.publish {
            writeln!(
                f,
                "publish: {} drafts, {} posted, {} failed",
                s.total, s.posted, s.failed
            )?;
        }
        if let Some(s) = &self.metrics {
            writeln!(f, "metrics: {} recent posts, {} updated", s.candidates, s.updated)?;
        }
        Ok(())
    }
}

/// Runs the stages in order. Stages commit item by item on a pooled
/// connection, so different stages can overlap.
///
/// Collaborators are optional so a command only needs the credentials of
/// the stages it actually runs; running an unconfigured stage is a config
/// error.
pub struct Pipeline {
    db: Database,
    config: BotConfig,
    crawl: Option<CrawlStage>,
    filter: Option<FilterStage>,
    compose: Option<ComposeStage>,
    publish: Option<PublishStage>,
    metrics: Option<MetricsRefresh>,
    guards: StageGuards,
}

impl Pipeline {
    pub fn new(db: Database, config: BotConfig) -> Self {
        Self {
            db,
            config,
            crawl: None,
            filter: None,
            compose: None,
            publish: None,
            metrics: None,
            guards: StageGuards::default(),
        }
    }

    pub fn with_feeds(mut self, feeds: Arc<dyn FeedSource>) -> Self {
        self.crawl = Some(CrawlStage::new(feeds));
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.filter = Some(FilterStage::new(
            llm.clone(),
            &self.config.prompts,
            &self.config.llm,
        ));
        self.compose = Some(ComposeStage::new(
            llm,
            &self.config.prompts,
            &self.config.llm,
            &self.config.compose,
        ));
        self
    }

    pub fn with_poster(mut self, poster: Arc<dyn SocialPoster>, media: Arc<dyn MediaSource>) -> Self {
        self.publish = Some(PublishStage::new(
            poster.clone(),
            media,
            self.config.posting.delay(),
        ));
        self.metrics = Some(MetricsRefresh::new(poster));
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Upsert the configured sources into the registry.
    pub async fn sync_sources(&self, sources: &[SourceConfig]) -> Result<usize> {
        let mut tx = self.db.begin().await?;
        for source in sources {
            store::upsert_source(&mut *tx, source).await?;
        }
        tx.commit().await?;
        info!(sources = sources.len(), "Source registry synced");
        Ok(sources.len())
    }

    pub async fn crawl(&self, hours_back: i64) -> Result<CrawlStats> {
        let stage = configured(&self.crawl, Stage::Crawl)?;
        let _guard = self.guards.acquire(Stage::Crawl)?;
        let mut conn = self.db.acquire().await?;
        stage.run(&mut conn, hours_back, Utc::now()).await
    }

    pub async fn filter(&self) -> Result<FilterStats> {
        let stage = configured(&self.filter, Stage::Filter)?;
        let _guard = self.guards.acquire(Stage::Filter)?;
        let mut conn = self.db.acquire().await?;
        stage.run(&mut conn).await
    }

    pub async fn compose(&self) -> Result<ComposeStats> {
        let stage = configured(&self.compose, Stage::Compose)?;
        let _guard = self.guards.acquire(Stage::Compose)?;
        let mut conn = self.db.acquire().await?;
        stage.run(&mut conn, Utc::now()).await
    }

    pub async fn publish(&self, max_posts: usize) -> Result<PublishStats> {
        let stage = configured(&self.publish, Stage::Publish)?;
        let _guard = self.guards.acquire(Stage::Publish)?;
        let mut conn = self.db.acquire().await?;
        stage.run(&mut conn, max_posts).await
    }

    pub async fn refresh_metrics(&self) -> Result<MetricsStats> {
        let stage = configured(&self.metrics, Stage::Metrics)?;
        let _guard = self.guards.acquire(Stage::Metrics)?;
        let mut conn = self.db.acquire().await?;
        stage.run(&mut conn, Utc::now()).await
    }

    /// Crawl, filter, compose and publish, in that order.
    pub async fn run_full(&self, hours_back: i64, max_posts: usize) -> Result<RunSummary> {
        info!(hours_back, max_posts, "Starting full pipeline run");
        let crawl = self.crawl(hours_back).await?;
        let filter = self.filter().await?;
        let compose = self.compose().await?;
        let publish = self.publish(max_posts).await?;
        Ok(RunSummary {
            crawl: Some(crawl),
            filter: Some(filter),
            compose: Some(compose),
            publish: Some(publish),
            metrics: None,
        })
    }

    pub async fn run_generate_and_post(&self, max_posts: usize) -> Result<RunSummary> {
        let compose = self.compose().await?;
        let publish = self.publish(max_posts).await?;
        Ok(RunSummary {
            compose: Some(compose),
            publish: Some(publish),
            ..Default::default()
        })
    }

    pub async fn run_post_drafts(&self, max_posts: usize) -> Result<RunSummary> {
        Ok(RunSummary {
            publish: Some(self.publish(max_posts).await?),
            ..Default::default()
        })
    }
}

fn configured<T>(stage: &Option<T>, name: Stage) -> Result<&T> {
    stage
        .as_ref()
        .ok_or_else(|| BotError::Config(format!("{name} stage has no collaborator configured")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prints_only_stages_that_ran() {
        let summary = RunSummary {
            publish: Some(PublishStats {
                total: 3,
                posted: 2,
                failed: 1,
            }),
            ..Default::default()
        };
        assert_eq!(summary.to_string(), "publish: 3 drafts, 2 posted, 1 failed\n");
    }

    #[test]
    fn guard_rejects_second_holder() {
        let guards = StageGuards::default();
        let held = guards.acquire(Stage::Publish).unwrap();
        assert!(matches!(
            guards.acquire(Stage::Publish),
            Err(BotError::StageBusy {
                stage: Stage::Publish
            })
        ));
        assert!(guards.acquire(Stage::Crawl).is_ok());
        drop(held);
        assert!(guards.acquire(Stage::Publish).is_ok());
    }
}
