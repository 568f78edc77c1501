use interfaces::{CompletionRequest, LanguageModel};
use sqlx::SqliteConnection;
use std::sync::Arc;
use tracing::{error, info, warn};

use super::ItemError;
use crate::config::{LlmConfig, PromptsConfig};
use crate::prompts::filter_prompt;
use crate::store;
use crate::types::{Article, FilterStats, Result};
use crate::utils::preview;

/// Pending articles classified per run.
pub const FILTER_BATCH_SIZE: usize = 50;

/// A classifier answer counts as relevant when it starts with "yes",
/// ignoring case and surrounding whitespace.
pub fn is_relevant(response: &str) -> bool {
    response
        .trim_start()
        .get(..3)
        .is_some_and(|head| head.eq_ignore_ascii_case("yes"))
}

pub struct FilterStage {
    llm: Arc<dyn LanguageModel>,
    system_prompt: String,
    template: String,
    temperature: f32,
    max_tokens: u32,
}

impl FilterStage {
    pub fn new(llm: Arc<dyn LanguageModel>, prompts: &PromptsConfig, llm_config: &LlmConfig) -> Self {
        Self {
            llm,
            system_prompt: prompts.filter_system.clone(),
            template: prompts.filter_template.clone(),
            temperature: llm_config.filter_temperature,
            max_tokens: llm_config.filter_max_tokens,
        }
    }

    pub async fn run(&self, conn: &mut SqliteConnection) -> Result<FilterStats> {
        let articles = store::pending_articles(conn, FILTER_BATCH_SIZE).await?;
        let mut stats = FilterStats {
            total: articles.len(),
            ..Default::default()
        };

        info!(articles = articles.len(), model = %self.llm.model_name(), "Filtering articles");

        for article in &articles {
            let answer = match self.classify(article).await {
                Ok(answer) => answer,
                Err(e) => {
                    error!(article_id = article.id, error = %e, "Error filtering article");
                    stats.errored += 1;
                    continue;
                }
            };

            let relevant = is_relevant(&answer);
            if !store::set_article_verdict(conn, article.id, relevant, &answer).await? {
                warn!(article_id = article.id, "Article left pending state while filtering");
                continue;
            }

            if relevant {
                stats.approved += 1;
                info!(article_id = article.id, title = %preview(&article.title, 50), "Approved");
            } else {
                stats.filtered_out += 1;
                info!(article_id = article.id, title = %preview(&article.title, 50), "Filtered out");
            }
        }

        info!(
            total = stats.total,
            approved = stats.approved,
            filtered_out = stats.filtered_out,
            errored = stats.errored,
            "Filtering complete"
        );
        Ok(stats)
    }

    async fn classify(&self, article: &Article) -> std::result::Result<String, ItemError> {
        let prompt = filter_prompt(&self.template, article)?;
        let request = CompletionRequest {
            system: self.system_prompt.clone(),
            prompt,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let answer = self.llm.complete(&request).await?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_prefix_decides_relevance() {
        assert!(is_relevant("Yes, this covers ERCOT."));
        assert!(is_relevant("  YES"));
        assert!(is_relevant("yes"));
        assert!(is_relevant("Yesterday's outage...")); // prefix rule, not word rule
        assert!(!is_relevant("No, this is about solar panels in Germany"));
        assert!(!is_relevant("Ye"));
        assert!(!is_relevant(""));
        assert!(!is_relevant("The answer is yes"));
    }

    #[test]
    fn non_ascii_prefix_does_not_panic() {
        assert!(!is_relevant("é yes"));
        assert!(!is_relevant("⚡"));
    }
}
