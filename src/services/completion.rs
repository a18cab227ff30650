//! Completion service client.
//!
//! The extraction orchestrator talks to a text-completion model through the
//! `CompletionClient` trait. The HTTP implementation speaks the Messages API
//! (system blocks with prompt-cache markers, usage with cache token counts).

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

const API_VERSION: &str = "2023-06-01";

/// One block of the system prompt
#[derive(Debug, Clone, PartialEq)]
pub struct PromptBlock {
    pub text: String,
    /// Marked for provider-side prompt caching
    pub cacheable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub system: Vec<PromptBlock>,
    pub user_content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    #[error("rate limited by completion service: {message}")]
    RateLimited { message: String },

    #[error("completion service error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("completion service rejected the request ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("completion service unreachable: {0}")]
    Transport(String),
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError>;

    async fn health_check(&self) -> Result<()>;
}

/// Error body returned by the completion service.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP client for the completion service.
#[derive(Clone)]
pub struct HttpCompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpCompletionClient {
    /// Create a new completion client.
    pub fn new(base_url: &str, api_key: &str, timeout_seconds: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        tracing::info!(base_url = base_url, "Completion client initialized");

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

/// Map a non-success status to the retry taxonomy.
fn classify_status(status: StatusCode, message: String) -> CompletionError {
    match status.as_u16() {
        429 => CompletionError::RateLimited { message },
        // 529 is the provider's "overloaded" status
        500..=599 => CompletionError::Server {
            status: status.as_u16(),
            message,
        },
        code => CompletionError::Client { status: code, message },
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        #[derive(Serialize)]
        struct CacheControl {
            r#type: &'static str,
        }

        #[derive(Serialize)]
        struct SystemBlock<'a> {
            r#type: &'static str,
            text: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            cache_control: Option<CacheControl>,
        }

        #[derive(Serialize)]
        struct Message<'a> {
            role: &'static str,
            content: &'a str,
        }

        #[derive(Serialize)]
        struct Request<'a> {
            model: &'a str,
            max_tokens: u32,
            temperature: f32,
            system: Vec<SystemBlock<'a>>,
            messages: Vec<Message<'a>>,
        }

        #[derive(Deserialize)]
        struct ContentBlock {
            #[serde(default)]
            text: Option<String>,
        }

        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            model: String,
            content: Vec<ContentBlock>,
            #[serde(default)]
            usage: TokenUsage,
        }

        let url = format!("{}/v1/messages", self.base_url);
        let body = Request {
            model: &request.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request
                .system
                .iter()
                .map(|block| SystemBlock {
                    r#type: "text",
                    text: &block.text,
                    cache_control: block.cacheable.then_some(CacheControl { r#type: "ephemeral" }),
                })
                .collect(),
            messages: vec![Message {
                role: "user",
                content: &request.user_content,
            }],
        };

        debug!(url = %url, "Completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Completion request failed");
                CompletionError::Transport(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            let parsed = response.json::<Response>().await.map_err(|e| {
                error!(error = %e, "Failed to decode completion response");
                CompletionError::Transport(format!("invalid response body: {}", e))
            })?;

            let text = parsed
                .content
                .into_iter()
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join("");

            Ok(CompletionResponse {
                text,
                model: parsed.model,
                usage: parsed.usage,
            })
        } else {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|b| b.error.message)
                .unwrap_or_else(|_| format!("completion service error: {}", status));

            error!(status = %status, message = %message, "Completion service error");
            Err(classify_status(status, message))
        }
    }

    /// The Messages API has no health route; any HTTP answer means reachable.
    async fn health_check(&self) -> Result<()> {
        self.client
            .get(&self.base_url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .context("Completion service health check failed")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_follows_retry_taxonomy() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down".into()),
            CompletionError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::from_u16(529).unwrap(), "overloaded".into()),
            CompletionError::Server { status: 529, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, "bad".into()),
            CompletionError::Client { status: 400, .. }
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "key".into()),
            CompletionError::Client { status: 401, .. }
        ));
    }

    #[test]
    fn usage_defaults_missing_cache_counters() {
        let usage: TokenUsage =
            serde_json::from_str(r#"{"input_tokens": 1200, "output_tokens": 300}"#).unwrap();
        assert_eq!(usage.cache_read_input_tokens, 0);
        assert_eq!(usage.cache_creation_input_tokens, 0);
    }
}
