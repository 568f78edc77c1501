use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use chrono::Utc;
use interfaces::{EngagementMetrics, PostingError, SocialPoster};
use reqwest::header::{self, HeaderMap};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PostingConfig;
use crate::types::Result;

const LOG_TARGET: &str = "energy_news_bot::x_client";

#[derive(Debug, Serialize)]
struct CreatePostBody<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    media: Option<MediaIds<'a>>,
}

#[derive(Debug, Serialize)]
struct MediaIds<'a> {
    media_ids: [&'a str; 1],
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct CreatedPost {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UploadedMedia {
    id: Option<String>,
    media_id_string: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostWithMetrics {
    public_metrics: PublicMetrics,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PublicMetrics {
    like_count: i64,
    retweet_count: i64,
    reply_count: i64,
    impression_count: i64,
}

/// X (Twitter) API v2 client authenticated with an OAuth 2.0 user token.
pub struct XClient {
    http_client: Client,
    access_token: String,
    api_base_url: String,
    upload_base_url: String,
    max_retries: u32,
    retry_initial: Duration,
    retry_max_elapsed: Duration,
}

impl XClient {
    pub fn new(access_token: impl Into<String>, config: &PostingConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self {
            http_client,
            access_token: access_token.into(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            upload_base_url: config.upload_base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            retry_initial: Duration::from_millis(config.retry_initial_ms),
            retry_max_elapsed: Duration::from_secs(config.retry_max_elapsed_seconds),
        })
    }

    /// Run `call` until it succeeds, fails permanently, or the retry budget
    /// is spent. Rate-limit hints from the server stretch the wait.
    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> std::result::Result<T, PostingError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, PostingError>>,
    {
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: self.retry_initial,
            initial_interval: self.retry_initial,
            max_interval: self.retry_initial * 16,
            multiplier: 2.0,
            max_elapsed_time: Some(self.retry_max_elapsed),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            let err = match call().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_transient() || attempt >= self.max_retries {
                return Err(err);
            }

            let Some(mut delay) = backoff.next_backoff() else {
                return Err(err);
            };
            if let PostingError::RateLimited {
                retry_after_secs: Some(secs),
            } = &err
            {
                delay = delay.max(Duration::from_secs(*secs));
            }
            if delay > self.retry_max_elapsed {
                return Err(err);
            }

            attempt += 1;
            warn!(
                target: LOG_TARGET,
                operation,
                attempt,
                ?delay,
                error = %err,
                "Transient X API error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn send_post(&self, text: &str, media_id: Option<&str>) -> std::result::Result<String, PostingError> {
        let body = CreatePostBody {
            text,
            media: media_id.map(|id| MediaIds { media_ids: [id] }),
        };
        let response = self
            .http_client
            .post(format!("{}/tweets", self.api_base_url))
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await
            .map_err(network_error)?;

        let created: DataEnvelope<CreatedPost> = read_json(response).await?;
        Ok(created.data.id)
    }

    async fn send_media(&self, image: Vec<u8>) -> std::result::Result<String, PostingError> {
        let form = Form::new()
            .part("media", Part::bytes(image).file_name("image"))
            .text("media_category", "tweet_image");
        let response = self
            .http_client
            .post(format!("{}/media/upload", self.upload_base_url))
            .bearer_auth(&self.access_token)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        let value: Value = read_json(response).await?;
        media_id_from(value)
    }

    async fn fetch_metrics(&self, external_id: &str) -> std::result::Result<EngagementMetrics, PostingError> {
        let response = self
            .http_client
            .get(format!("{}/tweets/{}", self.api_base_url, external_id))
            .query(&[("tweet.fields", "public_metrics")])
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(network_error)?;

        let post: DataEnvelope<PostWithMetrics> = read_json(response).await?;
        let m = post.data.public_metrics;
        Ok(EngagementMetrics {
            likes: m.like_count,
            reshares: m.retweet_count,
            replies: m.reply_count,
            impressions: m.impression_count,
        })
    }
}

#[async_trait]
impl SocialPoster for XClient {
    async fn upload_media(&self, image: Vec<u8>) -> std::result::Result<String, PostingError> {
        let size = image.len();
        let media_id = self
            .with_retry("upload_media", || self.send_media(image.clone()))
            .await?;
        debug!(target: LOG_TARGET, media_id = %media_id, bytes = size, "Uploaded media");
        Ok(media_id)
    }

    async fn create_post(&self, text: &str, media_id: Option<&str>) -> std::result::Result<String, PostingError> {
        let id = self
            .with_retry("create_post", || self.send_post(text, media_id))
            .await?;
        info!(target: LOG_TARGET, external_id = %id, "Created post");
        Ok(id)
    }

    async fn public_metrics(&self, external_id: &str) -> std::result::Result<EngagementMetrics, PostingError> {
        self.with_retry("public_metrics", || self.fetch_metrics(external_id))
            .await
    }
}

fn network_error(e: reqwest::Error) -> PostingError {
    PostingError::Network(e.to_string())
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: Response) -> std::result::Result<T, PostingError> {
    let status = response.status().as_u16();
    let retry_after = retry_after_secs(response.headers(), Utc::now().timestamp());
    let body = response.text().await.map_err(network_error)?;

    if !(200..300).contains(&status) {
        return Err(classify_failure(status, retry_after, &body));
    }
    serde_json::from_str(&body).map_err(|e| PostingError::MalformedResponse(e.to_string()))
}

fn media_id_from(value: Value) -> std::result::Result<String, PostingError> {
    let uploaded: UploadedMedia = match value.get("data") {
        Some(data) => serde_json::from_value(data.clone()),
        None => serde_json::from_value(value),
    }
    .map_err(|e| PostingError::MalformedResponse(e.to_string()))?;

    uploaded
        .id
        .or(uploaded.media_id_string)
        .ok_or_else(|| PostingError::MalformedResponse("upload response has no media id".to_string()))
}

/// Seconds to wait before the next call, from `retry-after` or the epoch
/// timestamp in `x-rate-limit-reset`.
fn retry_after_secs(headers: &HeaderMap, now_epoch: i64) -> Option<u64> {
    let header_num = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
    };

    if let Some(secs) = header_num(header::RETRY_AFTER.as_str()) {
        return Some(secs.max(0) as u64);
    }
    header_num("x-rate-limit-reset").map(|reset| (reset - now_epoch).max(0) as u64)
}

fn classify_failure(status: u16, retry_after_secs: Option<u64>, body: &str) -> PostingError {
    let message = error_message(body);
    match status {
        401 | 403 => PostingError::Auth(message),
        429 => PostingError::RateLimited { retry_after_secs },
        400 | 422 => PostingError::Rejected(message),
        _ => PostingError::Api { status, message },
    }
}

fn error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        let found = value
            .get("detail")
            .or_else(|| value.pointer("/errors/0/message"))
            .or_else(|| value.pointer("/errors/0/detail"))
            .or_else(|| value.get("title"))
            .and_then(Value::as_str);
        if let Some(message) = found {
            return message.to_string();
        }
    }
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn classifies_statuses() {
        let unauthorized = r#"{"title":"Unauthorized","type":"about:blank","status":401,"detail":"Unauthorized"}"#;
        assert_eq!(
            classify_failure(401, None, unauthorized),
            PostingError::Auth("Unauthorized".into())
        );
        assert!(matches!(classify_failure(403, None, "{}"), PostingError::Auth(_)));
        assert_eq!(
            classify_failure(429, Some(15), ""),
            PostingError::RateLimited {
                retry_after_secs: Some(15)
            }
        );

        let duplicate = r#"{"errors":[{"message":"You are not allowed to create a Tweet with duplicate content."}]}"#;
        assert_eq!(
            classify_failure(400, None, duplicate),
            PostingError::Rejected("You are not allowed to create a Tweet with duplicate content.".into())
        );

        let err = classify_failure(503, None, "Service Unavailable");
        assert!(err.is_transient());
        assert_eq!(
            err,
            PostingError::Api {
                status: 503,
                message: "Service Unavailable".into()
            }
        );
    }

    #[test]
    fn reads_retry_hints() {
        let mut headers = HeaderMap::new();
        assert_eq!(retry_after_secs(&headers, 1_000), None);

        headers.insert("x-rate-limit-reset", HeaderValue::from_static("1090"));
        assert_eq!(retry_after_secs(&headers, 1_000), Some(90));
        assert_eq!(retry_after_secs(&headers, 2_000), Some(0));

        headers.insert(header::RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(retry_after_secs(&headers, 1_000), Some(7));
    }

    #[test]
    fn create_body_omits_media_when_absent() {
        let plain = serde_json::to_value(CreatePostBody {
            text: "Grid news",
            media: None,
        })
        .unwrap();
        assert_eq!(plain, serde_json::json!({ "text": "Grid news" }));

        let with_media = serde_json::to_value(CreatePostBody {
            text: "Grid news",
            media: Some(MediaIds { media_ids: ["77"] }),
        })
        .unwrap();
        assert_eq!(with_media["media"]["media_ids"][0], "77");
    }

    #[test]
    fn media_id_from_v2_and_v1_shapes() {
        let v2 = serde_json::json!({ "data": { "id": "1880028106020515840", "media_key": "3_1880" } });
        assert_eq!(media_id_from(v2).unwrap(), "1880028106020515840");

        let v1 = serde_json::json!({ "media_id": 710511363345354753u64, "media_id_string": "710511363345354753" });
        assert_eq!(media_id_from(v1).unwrap(), "710511363345354753");

        assert!(matches!(
            media_id_from(serde_json::json!({ "data": {} })),
            Err(PostingError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn retries_only_transient_errors() {
        let client = XClient::new(
            "token",
            &PostingConfig {
                max_retries: 2,
                retry_initial_ms: 1,
                retry_max_elapsed_seconds: 5,
                ..PostingConfig::default()
            },
        )
        .unwrap();

        let calls = std::sync::atomic::AtomicU32::new(0);
        let result = client
            .with_retry("test", || {
                let n = calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(PostingError::Api {
                            status: 502,
                            message: "bad gateway".into(),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;
        assert_eq!(result, Ok("ok"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);

        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: std::result::Result<(), _> = client
            .with_retry("test", || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(PostingError::Auth("expired".into())) }
            })
            .await;
        assert!(matches!(result, Err(PostingError::Auth(_))));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
