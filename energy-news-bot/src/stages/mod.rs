//! The four pipeline stages plus the metrics backfill.
//!
//! Each stage reads a batch from the store, calls out to its collaborators
//! one item at a time and writes the outcome back through the connection it
//! was given. Item-level failures are absorbed into the returned stats;
//! only store errors escape.

pub mod compose;
pub mod crawl;
pub mod filter;
pub mod publish;

pub use compose::ComposeStage;
pub use crawl::CrawlStage;
pub use filter::FilterStage;
pub use publish::{MetricsRefresh, PublishStage};

use interfaces::LlmError;

use crate::prompts::TemplateError;

/// Why a single article could not be processed. Logged and counted, never
/// propagated.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}
