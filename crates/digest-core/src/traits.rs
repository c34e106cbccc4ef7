//! Core traits for digest abstractions.
//!
//! The pipeline only talks to storage, the model provider and the wall
//! clock through these traits, so PostgreSQL, in-memory and scripted
//! implementations are interchangeable.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// NOTE STORE
// =============================================================================

/// Storage for notes and the relation graph between them.
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Insert a note. Tags and properties are derived from the content.
    async fn create_note(&self, note: NewNote) -> Result<Note>;

    /// Fetch a note by ID, failing with `NoteNotFound` when absent.
    async fn get_note(&self, id: Uuid) -> Result<Note>;

    /// List notes matching `filter`, newest first.
    async fn list_notes(&self, filter: &NoteFilter) -> Result<Vec<Note>>;

    /// Count notes matching `filter`, ignoring limit and offset.
    async fn count_notes(&self, filter: &NoteFilter) -> Result<i64>;

    /// Create a relation, or leave an identical one in place.
    async fn upsert_relation(&self, relation: &NoteRelation) -> Result<()>;

    /// Relations of `relation_type` leaving `note_id`.
    async fn list_relations(
        &self,
        note_id: Uuid,
        relation_type: RelationType,
    ) -> Result<Vec<NoteRelation>>;
}

// =============================================================================
// SETTING STORE
// =============================================================================

/// Key-value settings, workspace-wide (versioned) and per-user.
#[async_trait]
pub trait SettingStore: Send + Sync {
    /// Read a workspace setting with its current version.
    async fn get_workspace_setting(&self, key: &str) -> Result<Option<StoredSetting>>;

    /// Unconditionally write a workspace setting, bumping its version.
    async fn put_workspace_setting(&self, key: &str, value: &JsonValue) -> Result<StoredSetting>;

    /// Write only if the stored version still equals `expected_version`
    /// (`None` means "only if absent"). Returns whether the write happened.
    async fn compare_and_swap_workspace_setting(
        &self,
        key: &str,
        expected_version: Option<i64>,
        value: &JsonValue,
    ) -> Result<bool>;

    /// Read a per-user setting.
    async fn get_user_setting(&self, user_id: Uuid, key: &str) -> Result<Option<JsonValue>>;

    /// Write a per-user setting.
    async fn put_user_setting(&self, user_id: Uuid, key: &str, value: &JsonValue) -> Result<()>;

    /// All users that have `key` set.
    async fn list_user_settings(&self, key: &str) -> Result<Vec<UserSetting>>;
}

// =============================================================================
// INFERENCE
// =============================================================================

/// OpenAI-compatible chat completion backend.
///
/// The configuration is passed per call because it lives in workspace
/// settings and may change between requests.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send `messages` and return the raw reply.
    async fn chat(&self, config: &AiConfig, messages: &[ChatMessage]) -> Result<ChatReply>;

    /// Short identifier for logs.
    fn backend_name(&self) -> &'static str;
}

// =============================================================================
// CLOCK
// =============================================================================

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = at;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
