//! Structured logging schema and field name constants.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query the same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, pipeline completions |
//! | DEBUG | Decision points, intermediate values |
//! | TRACE | Per-note iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID for an HTTP request (UUIDv7).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "selector", "prompt", "rate_limiter", "caller", "scheduler"
pub const COMPONENT: &str = "component";

/// Logical operation name.
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Requesting user.
pub const USER_ID: &str = "user_id";

/// Note UUID being operated on.
pub const NOTE_ID: &str = "note_id";

/// Time range bucket of a summary request.
pub const TIME_RANGE: &str = "time_range";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of notes selected or used.
pub const NOTE_COUNT: &str = "note_count";

/// Character length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Character length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

/// Attempt number of a provider call (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
