//! OpenAI-compatible chat backend implementation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use digest_core::{AiConfig, ChatBackend, ChatMessage, ChatReply, Error, Result};

use super::error::{to_digest_error, OpenAIErrorCode};
use super::types::*;

/// Default client-level timeout in seconds.
///
/// The pipeline applies its own, shorter per-attempt deadline; this only
/// bounds requests made outside it.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Transport settings for the backend.
///
/// Endpoint, key and model are not part of this: they come from the
/// workspace `AI_CONFIG` setting on every call.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Request timeout in seconds.
    pub timeout_seconds: u64,
    /// Skip TLS verification (for self-signed certs in local environments).
    pub skip_tls_verify: bool,
    /// HTTP-Referer header for OpenRouter.ai rankings (optional).
    pub http_referer: Option<String>,
    /// X-Title header for app name on OpenRouter.ai (optional).
    pub x_title: Option<String>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECS,
            skip_tls_verify: false,
            http_referer: None,
            x_title: None,
        }
    }
}

impl OpenAIConfig {
    /// Load transport settings from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OPENAI_TIMEOUT` | 120 |
    /// | `OPENAI_SKIP_TLS_VERIFY` | false |
    /// | `OPENAI_HTTP_REFERER` | unset |
    /// | `OPENAI_X_TITLE` | unset |
    pub fn from_env() -> Self {
        Self {
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_TIMEOUT_SECS),
            skip_tls_verify: std::env::var("OPENAI_SKIP_TLS_VERIFY")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
            http_referer: std::env::var("OPENAI_HTTP_REFERER").ok(),
            x_title: std::env::var("OPENAI_X_TITLE").ok(),
        }
    }
}

/// OpenAI-compatible chat backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new backend with the given transport configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let mut client_builder =
            Client::builder().timeout(Duration::from_secs(config.timeout_seconds));

        if config.skip_tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            component = "openai",
            timeout_secs = config.timeout_seconds,
            "Initializing OpenAI-compatible chat backend"
        );

        Ok(Self { client, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build an authenticated POST to `{endpoint}{path}`.
    fn build_request(&self, ai: &AiConfig, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", ai.endpoint.trim_end_matches('/'), path);
        let mut req = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", ai.api_key));

        if let Some(ref referer) = self.config.http_referer {
            req = req.header("HTTP-Referer", referer);
        }
        if let Some(ref title) = self.config.x_title {
            req = req.header("X-Title", title);
        }

        req.header("Content-Type", "application/json")
    }
}

#[async_trait]
impl ChatBackend for OpenAIBackend {
    async fn chat(&self, config: &AiConfig, messages: &[ChatMessage]) -> Result<ChatReply> {
        let start = Instant::now();
        let prompt_len: usize = messages.iter().map(|m| m.content.chars().count()).sum();
        debug!(
            subsystem = "inference",
            component = "openai",
            op = "chat",
            model = %config.model,
            prompt_len,
            "Sending chat completion"
        );

        let request = ChatCompletionRequest {
            model: &config.model,
            messages,
            temperature: None,
            max_tokens: None,
            stream: false,
        };

        let response = self
            .build_request(config, "/chat/completions")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            let (error_type, message) = match serde_json::from_str::<OpenAIErrorResponse>(&text) {
                Ok(body) => (
                    body.error
                        .error_type
                        .clone()
                        .or_else(|| body.error.code_str())
                        .unwrap_or_default(),
                    body.error.message,
                ),
                Err(_) if text.trim().is_empty() => (String::new(), "Unknown error".to_string()),
                Err(_) => (String::new(), text),
            };
            let code = OpenAIErrorCode::from_response(status, &error_type);
            return Err(to_digest_error(status, code, &message));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::inference(None, format!("Failed to parse response: {}", e)))?;

        let choices: Vec<String> = result
            .choices
            .into_iter()
            .map(|c| c.message.content.unwrap_or_default())
            .collect();

        debug!(
            subsystem = "inference",
            component = "openai",
            op = "chat",
            choices = choices.len(),
            response_len = choices.first().map(|c| c.chars().count()).unwrap_or(0),
            duration_ms = start.elapsed().as_millis() as u64,
            "Chat completion received"
        );

        Ok(ChatReply {
            choices,
            model: result.model,
        })
    }

    fn backend_name(&self) -> &'static str {
        "openai"
    }
}
