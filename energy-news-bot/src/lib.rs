//! Energy news bot: crawls energy-sector RSS feeds, has a language model
//! pick and summarise the relevant stories, and posts them to X.

pub mod config;
pub mod fetcher;
pub mod llm_adapter;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod sources;
pub mod stages;
pub mod store;
pub mod types;
pub mod utils;
pub mod x_client;

pub use config::{BotConfig, Secrets};
pub use fetcher::Fetcher;
pub use llm_adapter::OpenAiAdapter;
pub use pipeline::{Pipeline, RunSummary};
pub use sources::RssFeedSource;
pub use store::Database;
pub use types::*;
pub use x_client::XClient;
