//! HTTP handlers for digest-api.

pub mod ai;
pub mod auto_summary;
pub mod summaries;
