use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status} from feed endpoint")]
    Status { status: u16 },

    #[error("Feed size exceeds limit: {size_mb}MB")]
    TooLarge { size_mb: usize },

    #[error("Feed parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Quota or rate limit exceeded: {0}")]
    Quota(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PostingError {
    #[error("Authorization failed: {0}")]
    Auth(String),

    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("Content rejected: {0}")]
    Rejected(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl PostingError {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PostingError::RateLimited { .. } => true,
            PostingError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("HTTP {status} from media URL")]
    Status { status: u16 },

    #[error("Media exceeds size limit: {size_mb}MB")]
    TooLarge { size_mb: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limits_and_server_errors_are_transient() {
        assert!(PostingError::RateLimited { retry_after_secs: Some(30) }.is_transient());
        assert!(
            PostingError::Api {
                status: 503,
                message: "over capacity".into()
            }
            .is_transient()
        );
        assert!(!PostingError::Auth("bad token".into()).is_transient());
        assert!(!PostingError::Rejected("duplicate content".into()).is_transient());
        assert!(
            !PostingError::Api {
                status: 404,
                message: "gone".into()
            }
            .is_transient()
        );
    }
}
