//! Core data models for the memo digest pipeline.
//!
//! These types are shared across all digest crates: notes and their
//! relations, AI configuration, summary requests, settings payloads and
//! the chat wire model seen by the pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::defaults;
use crate::error::{Error, Result};

// =============================================================================
// NOTE TYPES
// =============================================================================

/// Who may read a note.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    /// Only the creator.
    #[default]
    Private,
    /// Any signed-in user.
    Protected,
    /// Anyone, including anonymous viewers.
    Public,
}

impl std::fmt::Display for Visibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private => write!(f, "PRIVATE"),
            Self::Protected => write!(f, "PROTECTED"),
            Self::Public => write!(f, "PUBLIC"),
        }
    }
}

impl std::str::FromStr for Visibility {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PRIVATE" => Ok(Self::Private),
            "PROTECTED" => Ok(Self::Protected),
            "PUBLIC" => Ok(Self::Public),
            _ => Err(format!("Invalid visibility: {}", s)),
        }
    }
}

/// Lifecycle state of a note row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RowStatus {
    #[default]
    Normal,
    Archived,
}

impl std::fmt::Display for RowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "NORMAL"),
            Self::Archived => write!(f, "ARCHIVED"),
        }
    }
}

impl std::str::FromStr for RowStatus {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NORMAL" => Ok(Self::Normal),
            "ARCHIVED" => Ok(Self::Archived),
            _ => Err(format!("Invalid row status: {}", s)),
        }
    }
}

/// Content-derived flags, recomputed whenever a note is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NoteProperty {
    pub has_link: bool,
    pub has_task_list: bool,
    pub has_code: bool,
    pub has_incomplete_tasks: bool,
}

/// A stored note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Note {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub content: String,
    pub visibility: Visibility,
    pub pinned: bool,
    /// Set on every note produced by the summarization pipeline.
    pub ai_generated: bool,
    pub row_status: RowStatus,
    /// Lowercase tag names without the leading `#`.
    pub tags: Vec<String>,
    pub property: NoteProperty,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Note {
    /// Whether the note carries `tag` (case-insensitive, `#` optional).
    pub fn has_tag(&self, tag: &str) -> bool {
        let wanted = crate::tags::normalize_tag(tag);
        !wanted.is_empty() && self.tags.iter().any(|t| *t == wanted)
    }

    /// Whether `viewer` may read this note.
    ///
    /// Anonymous viewers only see public notes; signed-in users see public
    /// and protected notes plus anything they created.
    pub fn is_visible_to(&self, viewer: Option<Uuid>) -> bool {
        match viewer {
            None => self.visibility == Visibility::Public,
            Some(user) => user == self.creator_id || self.visibility != Visibility::Private,
        }
    }
}

/// Input for creating a note. Tags and properties are derived by the store.
#[derive(Debug, Clone)]
pub struct NewNote {
    pub creator_id: Uuid,
    pub content: String,
    pub visibility: Visibility,
    pub pinned: bool,
    pub ai_generated: bool,
    /// Explicit creation time; the store uses its clock when unset.
    pub created_at: Option<DateTime<Utc>>,
}

impl NewNote {
    pub fn new(creator_id: Uuid, content: impl Into<String>) -> Self {
        Self {
            creator_id,
            content: content.into(),
            visibility: Visibility::Private,
            pinned: false,
            ai_generated: false,
            created_at: None,
        }
    }

    pub fn visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn ai_generated(mut self, ai_generated: bool) -> Self {
        self.ai_generated = ai_generated;
        self
    }

    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.created_at = Some(at);
        self
    }
}

/// Criteria for listing notes. Results are always newest first.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    pub creator_id: Option<Uuid>,
    /// Inclusive lower bound on `created_at`.
    pub created_after: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub created_before: Option<DateTime<Utc>>,
    /// Match notes carrying at least one of these (normalized) tags.
    pub any_tags: Vec<String>,
    /// Drop notes carrying this (normalized) tag.
    pub exclude_tag: Option<String>,
    pub ai_generated: Option<bool>,
    pub row_status: Option<RowStatus>,
    pub ids: Option<Vec<Uuid>>,
    pub limit: Option<i64>,
    pub offset: i64,
}

// =============================================================================
// RELATIONS
// =============================================================================

/// Kind of edge between two notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    Reference,
    Comment,
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "REFERENCE"),
            Self::Comment => write!(f, "COMMENT"),
        }
    }
}

impl std::str::FromStr for RelationType {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "REFERENCE" => Ok(Self::Reference),
            "COMMENT" => Ok(Self::Comment),
            _ => Err(format!("Invalid relation type: {}", s)),
        }
    }
}

/// Directed edge `note_id -> related_note_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
pub struct NoteRelation {
    pub note_id: Uuid,
    pub related_note_id: Uuid,
    pub relation_type: RelationType,
}

impl NoteRelation {
    pub fn reference(note_id: Uuid, related_note_id: Uuid) -> Self {
        Self {
            note_id,
            related_note_id,
            relation_type: RelationType::Reference,
        }
    }
}

// =============================================================================
// AI CONFIGURATION
// =============================================================================

/// Provider configuration stored under the `AI_CONFIG` workspace setting.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub system_prompt: String,
}

impl std::fmt::Debug for AiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AiConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("system_prompt_len", &self.system_prompt.chars().count())
            .finish()
    }
}

impl AiConfig {
    /// Reject configurations missing a required field.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.trim().is_empty() {
            return Err(Error::FailedPrecondition(
                "AI endpoint is not configured".to_string(),
            ));
        }
        if self.api_key.trim().is_empty() {
            return Err(Error::FailedPrecondition(
                "AI API key is not configured".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(Error::FailedPrecondition(
                "AI model is not configured".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply per-request overrides, ignoring blank values.
    pub fn with_overrides(&self, model: Option<&str>, system_prompt: Option<&str>) -> Self {
        let mut config = self.clone();
        if let Some(model) = model.filter(|m| !m.trim().is_empty()) {
            config.model = model.trim().to_string();
        }
        if let Some(prompt) = system_prompt.filter(|p| !p.trim().is_empty()) {
            config.system_prompt = prompt.to_string();
        }
        config
    }
}

// =============================================================================
// SUMMARY REQUESTS
// =============================================================================

/// Bucketed window selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub enum TimeRange {
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
    #[serde(rename = "custom")]
    Custom,
}

impl TimeRange {
    /// Fixed length in days, `None` for custom ranges.
    pub fn days(&self) -> Option<i64> {
        match self {
            Self::Last7Days => Some(7),
            Self::Last30Days => Some(30),
            Self::Last90Days => Some(90),
            Self::Custom => None,
        }
    }

    /// Smallest bucket covering `frequency_days`.
    pub fn covering(frequency_days: u32) -> Self {
        match frequency_days {
            0..=7 => Self::Last7Days,
            8..=30 => Self::Last30Days,
            _ => Self::Last90Days,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Last7Days => "7d",
            Self::Last30Days => "30d",
            Self::Last90Days => "90d",
            Self::Custom => "custom",
        }
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TimeRange {
    type Err = Error;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "7d" => Ok(Self::Last7Days),
            "30d" => Ok(Self::Last30Days),
            "90d" => Ok(Self::Last90Days),
            "custom" => Ok(Self::Custom),
            _ => Err(Error::InvalidInput(
                "invalid time_range: must be one of 7d, 30d, 90d, or custom".to_string(),
            )),
        }
    }
}

/// A single summarization request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SummaryRequest {
    /// One of `7d`, `30d`, `90d`, `custom`.
    pub time_range: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `YYYY-MM-DD`, required for custom ranges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`, inclusive, required for custom ranges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    /// Overrides the configured system prompt for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Overrides the configured model for this request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl SummaryRequest {
    pub fn for_range(range: TimeRange) -> Self {
        Self {
            time_range: range.as_str().to_string(),
            ..Default::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn custom(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            time_range: TimeRange::Custom.as_str().to_string(),
            start_date: Some(start.into()),
            end_date: Some(end.into()),
            ..Default::default()
        }
    }
}

/// Resolved `[start, end)` interval of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub range: TimeRange,
}

impl TimeWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Tunables threaded through the pipeline; defaults come from [`defaults`].
#[derive(Debug, Clone)]
pub struct PipelineLimits {
    pub max_requests_per_hour: u32,
    pub max_source_memos: i64,
    pub max_prompt_chars: usize,
    pub request_timeout: Duration,
    pub retry_cool_down: Duration,
    pub max_retries: u32,
    pub min_summary_chars: usize,
    pub max_summary_chars: usize,
}

impl Default for PipelineLimits {
    fn default() -> Self {
        Self {
            max_requests_per_hour: defaults::MAX_REQUESTS_PER_HOUR,
            max_source_memos: defaults::MAX_SOURCE_MEMOS,
            max_prompt_chars: defaults::MAX_PROMPT_CHARS,
            request_timeout: Duration::from_secs(defaults::AI_REQUEST_TIMEOUT_SECS),
            retry_cool_down: Duration::from_secs(defaults::RETRY_COOL_DOWN_SECS),
            max_retries: defaults::MAX_RETRIES,
            min_summary_chars: defaults::MIN_SUMMARY_CHARS,
            max_summary_chars: defaults::MAX_SUMMARY_CHARS,
        }
    }
}

// =============================================================================
// SETTINGS
// =============================================================================

/// A versioned workspace setting value.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSetting {
    pub value: JsonValue,
    /// Incremented on every write; used for compare-and-swap.
    pub version: i64,
}

/// A per-user setting value.
#[derive(Debug, Clone, PartialEq)]
pub struct UserSetting {
    pub user_id: Uuid,
    pub value: JsonValue,
}

/// Persisted per-user hourly request counts.
///
/// Keys have the form `user_{user_id}_{hour_unix_ts}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitLedger {
    #[serde(default)]
    pub counts: BTreeMap<String, u32>,
}

/// Per-user auto-summary cadence and bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct AutoSummarySetting {
    /// Days between runs; 0 disables.
    #[serde(default)]
    pub frequency_days: u32,
    #[serde(default)]
    pub enabled: bool,
    /// Consecutive failed runs.
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
}

impl AutoSummarySetting {
    pub fn is_active(&self) -> bool {
        self.enabled && self.frequency_days > 0
    }
}

// =============================================================================
// CHAT WIRE MODEL
// =============================================================================

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Provider reply reduced to what the pipeline inspects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatReply {
    /// Content of each returned choice, in order.
    pub choices: Vec<String>,
    pub model: Option<String>,
}

impl ChatReply {
    pub fn single(content: impl Into<String>) -> Self {
        Self {
            choices: vec![content.into()],
            model: None,
        }
    }

    /// First choice, if any.
    pub fn first(&self) -> Option<&str> {
        self.choices.first().map(String::as_str)
    }
}

// =============================================================================
// OPERATION RESULTS
// =============================================================================

/// Outcome of the connectivity self-test.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    pub details: String,
}

/// Outcome of a successful summary run.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct GeneratedSummary {
    pub note: Note,
    /// Notes included in the prompt.
    pub sources_used: usize,
    /// Source links actually persisted.
    pub links_created: usize,
    /// Whether the model output was cut to the length limit.
    pub truncated: bool,
    /// Provider attempts consumed.
    pub attempts: u32,
}

/// One page of the sources behind a summary.
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SourceMemoPage {
    pub notes: Vec<Note>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
    pub total_size: i64,
}
