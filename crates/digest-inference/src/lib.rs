//! # digest-inference
//!
//! Model-provider plumbing for the memo digest pipeline.
//!
//! This crate provides:
//! - An OpenAI-compatible [`ChatBackend`](digest_core::ChatBackend)
//! - A cancellable retry combinator that only retries throttled calls
//! - The summary caller (per-attempt deadline, retry, response validation)
//! - The connectivity self-test and its failure diagnosis
//! - A scripted mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use digest_core::{AiConfig, PipelineLimits};
//! use digest_inference::{openai::OpenAIBackend, SummaryCaller};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = Arc::new(OpenAIBackend::from_env().unwrap());
//!     let caller = SummaryCaller::new(backend, &PipelineLimits::default());
//!     let config = AiConfig {
//!         endpoint: "https://api.openai.com/v1".into(),
//!         api_key: "sk-...".into(),
//!         model: "gpt-4o-mini".into(),
//!         system_prompt: String::new(),
//!     };
//!     let summary = caller
//!         .summarize(&config, "[Memo 1]\n...", &CancellationToken::new())
//!         .await
//!         .unwrap();
//!     println!("{}", summary.content);
//! }
//! ```

pub mod caller;
pub mod openai;
pub mod connection;
pub mod retry;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use caller::{apply_length_bounds, LengthBounds, Summary, SummaryCaller};
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use connection::{diagnose, test_connection};
pub use retry::{retry_throttled, Retried, RetryPolicy};
