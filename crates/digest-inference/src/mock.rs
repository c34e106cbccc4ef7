//! Scripted chat backend for deterministic testing.
//!
//! Replies are consumed in order from a script; once the script is empty
//! the fallback reply is used. Every call is logged for assertions.
//!
//! ## Usage
//!
//! ```rust
//! use digest_inference::mock::{MockChatBackend, MockStep};
//!
//! let backend = MockChatBackend::new()
//!     .then(MockStep::Throttle)
//!     .then(MockStep::reply("A summary long enough to pass validation."));
//! assert_eq!(backend.call_count(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use digest_core::{AiConfig, ChatBackend, ChatMessage, ChatReply, Error, Result};

/// One scripted outcome.
#[derive(Debug, Clone)]
pub enum MockStep {
    /// Return these choices.
    Reply(Vec<String>),
    /// Fail with HTTP 429.
    Throttle,
    /// Fail with the given status and message.
    Fail { status: Option<u16>, message: String },
    /// Fail as a transport error with the given message.
    Transport(String),
    /// Sleep, then apply the inner step.
    Delay(Duration, Box<MockStep>),
    /// Never complete.
    Hang,
}

impl MockStep {
    pub fn reply(content: impl Into<String>) -> Self {
        Self::Reply(vec![content.into()])
    }

    pub fn no_choices() -> Self {
        Self::Reply(Vec::new())
    }

    pub fn fail(status: u16, message: impl Into<String>) -> Self {
        Self::Fail {
            status: Some(status),
            message: message.into(),
        }
    }
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub model: String,
    pub endpoint: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Default)]
struct MockState {
    script: VecDeque<MockStep>,
    calls: Vec<MockCall>,
}

/// Scripted chat backend.
#[derive(Clone)]
pub struct MockChatBackend {
    state: Arc<Mutex<MockState>>,
    fallback: Arc<MockStep>,
}

impl Default for MockChatBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChatBackend {
    /// Backend that always replies with a generic, valid-length summary.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
            fallback: Arc::new(MockStep::reply(
                "Mock summary. The notes in this period covered planning, a few \
                 implementation sessions and some loose ideas worth revisiting later on.",
            )),
        }
    }

    /// Append a step to the script.
    pub fn then(self, step: MockStep) -> Self {
        self.lock().script.push_back(step);
        self
    }

    /// Replace the reply used once the script runs out.
    pub fn with_fallback(mut self, step: MockStep) -> Self {
        self.fallback = Arc::new(step);
        self
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_step(&self, config: &AiConfig, messages: &[ChatMessage]) -> MockStep {
        let mut state = self.lock();
        state.calls.push(MockCall {
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
            messages: messages.to_vec(),
        });
        state
            .script
            .pop_front()
            .unwrap_or_else(|| (*self.fallback).clone())
    }
}

async fn run_step(step: MockStep) -> Result<ChatReply> {
    let mut step = step;
    loop {
        match step {
            MockStep::Reply(choices) => {
                return Ok(ChatReply {
                    choices,
                    model: None,
                })
            }
            MockStep::Throttle => {
                return Err(Error::inference(
                    Some(429),
                    "AI provider returned 429: Rate limit exceeded",
                ))
            }
            MockStep::Fail { status, message } => return Err(Error::inference(status, message)),
            MockStep::Transport(message) => return Err(Error::Request(message)),
            MockStep::Delay(delay, inner) => {
                tokio::time::sleep(delay).await;
                step = *inner;
            }
            MockStep::Hang => {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[async_trait]
impl ChatBackend for MockChatBackend {
    async fn chat(&self, config: &AiConfig, messages: &[ChatMessage]) -> Result<ChatReply> {
        let step = self.next_step(config, messages);
        run_step(step).await
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}
