use chrono::{DateTime, Utc};
use interfaces::{CompletionRequest, LanguageModel};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::ItemError;
use crate::config::{ComposeConfig, LlmConfig, PromptsConfig};
use crate::prompts::tweet_prompt;
use crate::store;
use crate::types::{Article, ComposeStats, NewPost, Result};
use crate::utils::{enforce_post_length, preview};

/// Turns approved articles into draft posts.
pub struct ComposeStage {
    llm: Arc<dyn LanguageModel>,
    system_prompt: String,
    template: String,
    temperature: f32,
    max_tokens: u32,
    attach_images: bool,
}

impl ComposeStage {
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        prompts: &PromptsConfig,
        llm_config: &LlmConfig,
        compose: &ComposeConfig,
    ) -> Self {
        Self {
            llm,
            system_prompt: prompts.tweet_system.clone(),
            template: prompts.tweet_template.clone(),
            temperature: llm_config.tweet_temperature,
            max_tokens: llm_config.tweet_max_tokens,
            attach_images: compose.attach_images,
        }
    }

    pub async fn run(&self, conn: &mut SqliteConnection, now: DateTime<Utc>) -> Result<ComposeStats> {
        let articles = store::approved_articles_without_post(conn).await?;
        let mut stats = ComposeStats {
            total: articles.len(),
            ..Default::default()
        };

        info!(articles = articles.len(), "Generating posts");

        for article in &articles {
            let text = match self.generate(article).await {
                Ok(text) => text,
                Err(e) => {
                    error!(article_id = article.id, error = %e, "Error generating post");
                    stats.errored += 1;
                    continue;
                }
            };

            if text.is_empty() {
                warn!(article_id = article.id, "Model returned an empty post");
                stats.errored += 1;
                continue;
            }

            let draft = NewPost {
                article_id: article.id,
                text,
                media_url: if self.attach_images {
                    article.image_url.clone()
                } else {
                    None
                },
                article_link: article.url.clone(),
            };

            match store::insert_draft(conn, &draft, now).await? {
                Some(post_id) => {
                    stats.generated += 1;
                    info!(
                        article_id = article.id,
                        post_id,
                        chars = draft.text.chars().count(),
                        title = %preview(&article.title, 50),
                        "Generated draft"
                    );
                }
                None => warn!(article_id = article.id, "Article already has a post"),
            }
        }

        info!(
            total = stats.total,
            generated = stats.generated,
            errored = stats.errored,
            "Generation complete"
        );
        Ok(stats)
    }

    async fn generate(&self, article: &Article) -> std::result::Result<String, ItemError> {
        let prompt = tweet_prompt(&self.template, article)?;
        let request = CompletionRequest {
            system: self.system_prompt.clone(),
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let raw = self.llm.complete(&request).await?;
        Ok(enforce_post_length(&raw))
    }
}
