//! Contracts between the news bot pipeline and the outside world: feed
//! sources, the language model, the social-posting platform and media hosts.

pub mod defs;
pub mod errors;

pub use defs::{
    CompletionRequest, EngagementMetrics, FeedItem, FeedSource, LanguageModel, MediaSource,
    SocialPoster,
};
pub use errors::{FeedError, LlmError, MediaError, PostingError};
