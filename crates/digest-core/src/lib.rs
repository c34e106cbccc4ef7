//! # digest-core
//!
//! Core types, traits, and abstractions for the memo digest pipeline.
//!
//! This crate provides the data model, error taxonomy and trait seams that
//! the storage, inference, jobs and API crates depend on.

pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tags;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, ErrorCode, Result};
pub use models::*;
pub use tags::*;
pub use traits::*;
