//! OpenRouter backend for recheck
//!
//! Provides a [`GenerationService`] over an OpenAI-compatible
//! chat-completions endpoint:
//! - Bearer auth plus the attribution headers OpenRouter expects
//! - Status and transport errors mapped onto [`GenerationError`]
//! - `Retry-After` (or `X-RateLimit-Reset`) forwarded to the gateway's backoff
//! - API key discovery (flag, environment, key file)
//!
//! Retries are the gateway's job; one `complete` call is one request.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod key;

use async_trait::async_trait;
use recheck_core::{GenerationError, GenerationRequest, GenerationService};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub use key::{load_api_key_from_keyfile, resolve_api_key, API_KEY_ENV, DEFAULT_KEYFILE};

/// Default service endpoint
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Characters of an error body kept in error messages
const BODY_SNIPPET: usize = 200;

/// Rate-limit reset hint sent when `Retry-After` is absent
const RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub temperature: f32,
    pub top_p: f32,
    pub request_timeout_secs: u64,
    /// Sent as `HTTP-Referer`
    pub referer: Option<String>,
    /// Sent as `X-Title`
    pub title: Option<String>,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: "openai/gpt-4o-mini".to_string(),
            max_tokens: None,
            temperature: 0.2,
            top_p: 0.9,
            request_timeout_secs: 120,
            referer: None,
            title: Some("recheck".to_string()),
        }
    }
}

impl OpenRouterConfig {
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Chat-completions URL
    #[must_use]
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

/// Errors building a client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid header value for {name}")]
    InvalidHeader { name: &'static str },

    #[error("cannot build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    top_p: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenRouter chat-completions client
#[derive(Debug, Clone)]
pub struct OpenRouterClient {
    http: reqwest::Client,
    config: OpenRouterConfig,
    url: String,
}

impl OpenRouterClient {
    /// Create client authenticated with `api_key`
    ///
    /// # Errors
    /// - `ClientError::InvalidHeader` if the key or attribution headers are not valid header values
    /// - `ClientError::Build` if the HTTP client cannot be constructed
    pub fn new(api_key: &str, config: OpenRouterConfig) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim()))
            .map_err(|_| ClientError::InvalidHeader { name: "Authorization" })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        if let Some(referer) = &config.referer {
            let value = HeaderValue::from_str(referer)
                .map_err(|_| ClientError::InvalidHeader { name: "HTTP-Referer" })?;
            headers.insert(HeaderName::from_static("http-referer"), value);
        }
        if let Some(title) = &config.title {
            let value = HeaderValue::from_str(title)
                .map_err(|_| ClientError::InvalidHeader { name: "X-Title" })?;
            headers.insert(HeaderName::from_static("x-title"), value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        let url = config.completions_url();
        Ok(Self { http, config, url })
    }

    #[inline]
    #[must_use]
    pub fn config(&self) -> &OpenRouterConfig {
        &self.config
    }
}

#[async_trait]
impl GenerationService for OpenRouterClient {
    async fn complete(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
        };

        tracing::debug!(url = %self.url, model = %self.config.model, "chat completion request");
        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Http {
                status: status.as_u16(),
                body: snippet(&text),
                retry_after,
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Malformed(format!("{e}: {}", snippet(&text))))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::Malformed("response has no choices".to_string()))?;
        Ok(choice.message.content.unwrap_or_default())
    }
}

/// Server-requested delay before the next call
///
/// `Retry-After` in delta-seconds form wins; HTTP dates are ignored.
/// Otherwise `X-RateLimit-Reset` is read as an epoch timestamp (seconds
/// or milliseconds) or, for small values, as plain seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    retry_after_at(headers, SystemTime::now())
}

fn retry_after_at(headers: &HeaderMap, now: SystemTime) -> Option<Duration> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
    };

    if let Some(raw) = header(RETRY_AFTER.as_str()) {
        return raw.parse::<u64>().ok().map(Duration::from_secs);
    }

    let reset = header(RATELIMIT_RESET)?.parse::<f64>().ok()?;
    if !reset.is_finite() || reset < 0.0 {
        return None;
    }
    let now = now.duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
    let secs = if reset > 1e12 {
        (reset / 1000.0 - now).max(0.0)
    } else if reset > 1e6 {
        (reset - now).max(0.0)
    } else {
        reset
    };
    Duration::try_from_secs_f64(secs).ok()
}

fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let config = OpenRouterConfig::default().with_base_url("http://localhost:9/api/v1/");
        assert_eq!(config.completions_url(), "http://localhost:9/api/v1/chat/completions");
    }

    #[test]
    fn retry_after_seconds_only() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(7)));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }

    #[test]
    fn ratelimit_reset_when_retry_after_absent() {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let reset = |value: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(RATELIMIT_RESET, HeaderValue::from_static(value));
            retry_after_at(&headers, now)
        };

        assert_eq!(reset("1700000012"), Some(Duration::from_secs(12)));
        assert_eq!(reset("1700000003000"), Some(Duration::from_secs(3)));
        assert_eq!(reset("1699999990"), Some(Duration::ZERO));
        assert_eq!(reset("4"), Some(Duration::from_secs(4)));
        assert_eq!(reset("soon"), None);
        assert_eq!(reset("-1"), None);

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        headers.insert(RATELIMIT_RESET, HeaderValue::from_static("1700000012"));
        assert_eq!(retry_after_at(&headers, now), Some(Duration::from_secs(2)));
    }

    #[test]
    fn snippet_is_char_bounded() {
        let body = "é".repeat(500);
        assert_eq!(snippet(&body).chars().count(), 200);
    }

    #[test]
    fn request_body_shape() {
        let body = ChatRequest {
            model: "m",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "s",
                },
                ChatMessage {
                    role: "user",
                    content: "u",
                },
            ],
            temperature: 0.2,
            top_p: 0.9,
            max_tokens: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["messages"][1]["role"], "user");
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn bad_key_rejected() {
        let err = OpenRouterClient::new("bad\nkey", OpenRouterConfig::default()).unwrap_err();
        assert!(matches!(err, ClientError::InvalidHeader { name: "Authorization" }));
    }
}
