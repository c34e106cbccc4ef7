//! OpenAI-compatible chat backend.
//!
//! Works with any endpoint that speaks the `/chat/completions` protocol:
//! OpenAI, Azure OpenAI, OpenRouter, Ollama in compatibility mode, vLLM,
//! LocalAI and LM Studio.
//!
//! # Example
//!
//! ```rust,no_run
//! use digest_core::{AiConfig, ChatBackend, ChatMessage};
//! use digest_inference::openai::OpenAIBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let config = AiConfig {
//!         endpoint: "http://localhost:11434/v1".to_string(),
//!         api_key: "ollama".to_string(),
//!         model: "llama3".to_string(),
//!         system_prompt: String::new(),
//!     };
//!     let reply = backend
//!         .chat(&config, &[ChatMessage::user("Hello")])
//!         .await
//!         .unwrap();
//!     println!("{:?}", reply.first());
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig, DEFAULT_TIMEOUT_SECS};
pub use error::{to_digest_error, OpenAIErrorCode};
pub use types::*;
