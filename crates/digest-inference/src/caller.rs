//! Summary caller: one provider call under the pipeline's timeout, retry
//! and response-validation policy.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use digest_core::{AiConfig, ChatBackend, ChatMessage, Error, PipelineLimits, Result};

use crate::retry::{retry_throttled, RetryPolicy};

/// Validated model output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub content: String,
    /// Whether `content` was cut to the maximum length.
    pub truncated: bool,
    /// Provider attempts consumed, including throttled ones.
    pub attempts: u32,
}

/// Length bounds applied to a successful reply.
#[derive(Debug, Clone, Copy)]
pub struct LengthBounds {
    pub min_chars: usize,
    pub max_chars: usize,
}

/// Calls the chat backend for summaries.
#[derive(Clone)]
pub struct SummaryCaller {
    backend: Arc<dyn ChatBackend>,
    timeout: Duration,
    retry: RetryPolicy,
    bounds: LengthBounds,
}

impl SummaryCaller {
    pub fn new(backend: Arc<dyn ChatBackend>, limits: &PipelineLimits) -> Self {
        Self {
            backend,
            timeout: limits.request_timeout,
            retry: RetryPolicy {
                max_retries: limits.max_retries,
                cool_down: limits.retry_cool_down,
            },
            bounds: LengthBounds {
                min_chars: limits.min_summary_chars,
                max_chars: limits.max_summary_chars,
            },
        }
    }

    pub fn backend(&self) -> &Arc<dyn ChatBackend> {
        &self.backend
    }

    /// Per-attempt deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `prompt` and return validated summary text.
    ///
    /// The configured system prompt, when set, is sent as a system message
    /// ahead of the user prompt.
    pub async fn summarize(
        &self,
        config: &AiConfig,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Summary> {
        let start = Instant::now();
        let mut messages = Vec::with_capacity(2);
        if !config.system_prompt.trim().is_empty() {
            messages.push(ChatMessage::system(config.system_prompt.clone()));
        }
        messages.push(ChatMessage::user(prompt));

        let backend = &self.backend;
        let timeout = self.timeout;
        let messages = &messages;
        let retried = retry_throttled(&self.retry, cancel, |attempt| async move {
            debug!(
                subsystem = "inference",
                component = "caller",
                op = "summarize",
                attempt,
                model = %config.model,
                "Calling AI provider"
            );
            match tokio::time::timeout(timeout, backend.chat(config, messages)).await {
                Ok(result) => result,
                Err(_) => Err(Error::DeadlineExceeded(format!(
                    "AI request timed out after {}s",
                    timeout.as_secs()
                ))),
            }
        })
        .await?;

        let attempts = retried.attempts;
        let reply = retried.value;
        let content = match reply.first() {
            None => return Err(Error::Internal("AI API returned no choices".to_string())),
            Some(c) if c.trim().is_empty() => {
                return Err(Error::Internal("AI API returned empty content".to_string()))
            }
            Some(c) => c,
        };

        let (content, truncated) = apply_length_bounds(content, self.bounds)?;

        info!(
            subsystem = "inference",
            component = "caller",
            op = "summarize",
            attempts,
            truncated,
            response_len = content.chars().count(),
            duration_ms = start.elapsed().as_millis() as u64,
            "AI summary generated"
        );

        Ok(Summary {
            content,
            truncated,
            attempts,
        })
    }
}

/// Reject replies shorter than the minimum and cut longer ones to the
/// maximum, counting characters rather than bytes.
pub fn apply_length_bounds(content: &str, bounds: LengthBounds) -> Result<(String, bool)> {
    let len = content.chars().count();
    if len < bounds.min_chars {
        return Err(Error::InvalidInput(format!(
            "AI generated summary is too short (minimum {} characters)",
            bounds.min_chars
        )));
    }
    if len > bounds.max_chars {
        warn!(
            subsystem = "inference",
            component = "caller",
            length = len,
            max = bounds.max_chars,
            "AI generated summary exceeds maximum length, truncating"
        );
        return Ok((content.chars().take(bounds.max_chars).collect(), true));
    }
    Ok((content.to_string(), false))
}
