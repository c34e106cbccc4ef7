//! Centralized default constants for the digest pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates read limits from here (usually through `PipelineLimits`) instead of
//! defining their own magic numbers.

// =============================================================================
// SETTINGS KEYS
// =============================================================================

/// Workspace setting holding the AI provider configuration.
pub const AI_CONFIG_KEY: &str = "AI_CONFIG";

/// Workspace setting holding the per-user hourly request ledger.
pub const RATE_LIMIT_KEY: &str = "AI_RATE_LIMIT";

/// Per-user setting holding the auto-summary cadence.
pub const AUTO_SUMMARY_KEY: &str = "AUTO_SUMMARY";

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Interactive summaries allowed per user per clock hour.
pub const MAX_REQUESTS_PER_HOUR: u32 = 5;

/// Ledger buckets older than this are pruned on every write.
pub const LEDGER_RETENTION_HOURS: i64 = 24;

/// Attempts at a compare-and-swap ledger write before giving up.
pub const LEDGER_CAS_ATTEMPTS: u32 = 8;

// =============================================================================
// SOURCE SELECTION & PROMPT
// =============================================================================

/// Maximum notes considered for one summary.
pub const MAX_SOURCE_MEMOS: i64 = 50;

/// Character budget for the concatenated note bodies.
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// Tag appended to every generated summary (stored without the `#`).
pub const MARKER_TAG: &str = "AI";

/// Leading line of every generated summary body.
pub const SUMMARY_HEADER_MARKER: &str = "<!-- AI Generated Summary -->";

/// Date format accepted for custom ranges.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// =============================================================================
// AI CALLS
// =============================================================================

/// Per-attempt timeout for a provider call.
pub const AI_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fixed wait after a throttled attempt.
pub const RETRY_COOL_DOWN_SECS: u64 = 60;

/// Extra attempts allowed after a throttled first attempt.
pub const MAX_RETRIES: u32 = 2;

/// Responses shorter than this are rejected.
pub const MIN_SUMMARY_CHARS: usize = 100;

/// Responses longer than this are truncated.
pub const MAX_SUMMARY_CHARS: usize = 5_000;

/// Message sent by the connectivity self-test.
pub const CONNECTION_TEST_MESSAGE: &str =
    "Hello! This is a test message. Please respond with 'Test successful' if you receive this.";

// =============================================================================
// SCHEDULER
// =============================================================================

/// Seconds between auto-summary sweeps.
pub const SCHEDULER_INTERVAL_SECS: u64 = 3_600;

/// Users processed concurrently within one sweep.
pub const SCHEDULER_MAX_CONCURRENT: usize = 4;

/// Event channel capacity for scheduler events.
pub const SCHEDULER_EVENT_CAPACITY: usize = 100;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for source listings.
pub const PAGE_LIMIT: i64 = 50;

/// Upper bound on a requested page size.
pub const PAGE_LIMIT_MAX: i64 = 100;

// =============================================================================
// SERVER
// =============================================================================

/// Default bind host.
pub const SERVER_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const SERVER_PORT: u16 = 3000;
