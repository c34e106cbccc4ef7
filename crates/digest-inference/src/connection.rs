//! Connectivity self-test for an AI configuration.
//!
//! Sends one fixed test message with a deadline and no retries, then maps
//! the outcome to a user-facing [`ConnectionTestResult`]. Never mutates
//! state and never returns an error.

use std::time::Duration;

use tracing::{error, info};

use digest_core::{defaults, AiConfig, ChatBackend, ChatMessage, ConnectionTestResult, Error};

/// Hint shown when the request deadline elapsed.
pub const DIAG_TIMEOUT: &str =
    "Request timed out. Please check your network connection and endpoint URL.";
/// Hint shown for rejected credentials.
pub const DIAG_AUTH: &str = "Authentication failed. Please check your API key.";
/// Hint shown when the endpoint does not exist.
pub const DIAG_NOT_FOUND: &str = "Endpoint not found. Please check your endpoint URL.";
/// Hint shown when the provider throttles.
pub const DIAG_RATE_LIMIT: &str = "Rate limit exceeded. Please try again later.";
/// Hint shown when the model looks wrong.
pub const DIAG_MODEL: &str = "Invalid model name. Please check your model configuration.";
/// Fallback hint.
pub const DIAG_GENERIC: &str = "Failed to connect to AI provider. Please check your configuration.";

/// Pick the user-facing hint for a failed connection test.
///
/// Buckets are checked in a fixed order: timeout, authentication, not
/// found, throttling, model, generic.
pub fn diagnose(err: &Error) -> &'static str {
    let status = match err {
        Error::Inference { status, .. } => *status,
        _ => None,
    };
    let msg = err.to_string().to_lowercase();

    if matches!(err, Error::DeadlineExceeded(_))
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("deadline exceeded")
    {
        DIAG_TIMEOUT
    } else if status == Some(401) || msg.contains("401") || msg.contains("unauthorized") {
        DIAG_AUTH
    } else if status == Some(404) || msg.contains("404") || msg.contains("not found") {
        DIAG_NOT_FOUND
    } else if err.is_throttling() || msg.contains("429") || msg.contains("rate_limit") {
        DIAG_RATE_LIMIT
    } else if msg.contains("model") {
        DIAG_MODEL
    } else {
        DIAG_GENERIC
    }
}

/// Send the test message and report the outcome.
pub async fn test_connection(
    backend: &dyn ChatBackend,
    config: &AiConfig,
    timeout: Duration,
) -> ConnectionTestResult {
    let messages = [ChatMessage::user(defaults::CONNECTION_TEST_MESSAGE)];
    let outcome = match tokio::time::timeout(timeout, backend.chat(config, &messages)).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeadlineExceeded(format!(
            "connection test timed out after {}s",
            timeout.as_secs()
        ))),
    };

    let reply = match outcome {
        Ok(reply) => reply,
        Err(err) => {
            error!(
                subsystem = "inference",
                component = "connection_test",
                endpoint = %config.endpoint,
                model = %config.model,
                error = %err,
                "AI config test failed"
            );
            return ConnectionTestResult {
                success: false,
                error_message: err.to_string(),
                details: diagnose(&err).to_string(),
            };
        }
    };

    let content = match reply.first() {
        None => {
            return ConnectionTestResult {
                success: false,
                error_message: "AI provider returned no response".to_string(),
                details: "The AI provider responded but did not return any content. \
                          This may indicate a configuration issue."
                    .to_string(),
            }
        }
        Some(c) if c.is_empty() => {
            return ConnectionTestResult {
                success: false,
                error_message: "AI provider returned empty content".to_string(),
                details: "The AI provider responded but the content was empty. \
                          This may indicate a configuration issue."
                    .to_string(),
            }
        }
        Some(c) => c,
    };

    let response_len = content.chars().count();
    info!(
        subsystem = "inference",
        component = "connection_test",
        endpoint = %config.endpoint,
        model = %config.model,
        response_len,
        "AI config test successful"
    );

    ConnectionTestResult {
        success: true,
        error_message: String::new(),
        details: format!(
            "Successfully connected to AI provider. Model: {}, Response length: {} characters",
            config.model, response_len
        ),
    }
}
