//! # digest-jobs
//!
//! The AI summarization pipeline and its unattended scheduler.
//!
//! This crate provides:
//! - Source selection over a resolved time window and tag filter
//! - Size-bounded prompt assembly
//! - A per-user hourly quota backed by a versioned settings ledger
//! - Summary materialization with best-effort source links
//! - [`SummaryService`], exposing generate / test / source-listing operations
//! - [`AutoSummaryScheduler`], a periodic per-user runner with failure isolation
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use digest_core::{PipelineLimits, SummaryRequest, SystemClock, TimeRange};
//! use digest_jobs::{AutoSummaryScheduler, SchedulerConfig, SummaryService};
//!
//! let service = Arc::new(SummaryService::new(
//!     notes, settings, backend, Arc::new(SystemClock), PipelineLimits::default(),
//! ));
//! let generated = service
//!     .generate_summary(user_id, &SummaryRequest::for_range(TimeRange::Last7Days), &cancel)
//!     .await?;
//!
//! let handle = AutoSummaryScheduler::new(service, SchedulerConfig::from_env()).start();
//! handle.shutdown().await?;
//! ```

pub mod config;
pub mod materializer;
pub mod pipeline;
pub mod prompt;
pub mod rate_limit;
pub mod scheduler;
pub mod selector;

pub use config::{load_ai_config, seed_ai_config};
pub use pipeline::SummaryService;
pub use prompt::{build_prompt, BuiltPrompt, DEFAULT_SYSTEM_PROMPT};
pub use rate_limit::{RateLimiter, Reservation};
pub use scheduler::{
    AutoSummaryScheduler, SchedulerConfig, SchedulerEvent, SchedulerHandle, SweepReport,
};
pub use selector::{resolve_window, select_sources};
