//! In-memory implementation of the store traits.
//!
//! Used by unit and integration tests across the workspace and for local
//! runs without PostgreSQL. Semantics mirror the PostgreSQL stores,
//! including versioned compare-and-swap on workspace settings. Faults can
//! be injected to exercise best-effort paths.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::sync::RwLock;
use uuid::Uuid;

use digest_core::{
    derive_payload, normalize_tag, Clock, Error, NewNote, Note, NoteFilter, NoteRelation,
    NoteStore, RelationType, Result, RowStatus, SettingStore, StoredSetting, SystemClock,
    UserSetting,
};

#[derive(Default)]
struct State {
    notes: HashMap<Uuid, Note>,
    relations: Vec<NoteRelation>,
    workspace: HashMap<String, StoredSetting>,
    users: BTreeMap<(String, Uuid), JsonValue>,
}

#[derive(Default)]
struct Faults {
    relation_targets: HashSet<Uuid>,
    workspace_writes: HashSet<String>,
    list_notes: bool,
}

/// Shared in-memory note and settings store.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
    faults: Arc<RwLock<Faults>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Stamp notes created without an explicit time using `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            faults: Arc::new(RwLock::new(Faults::default())),
            clock,
        }
    }

    /// Make `upsert_relation` fail whenever the related note is `target`.
    pub async fn fail_relations_to(&self, target: Uuid) {
        self.faults.write().await.relation_targets.insert(target);
    }

    /// Make every write to workspace setting `key` fail.
    pub async fn fail_workspace_writes(&self, key: &str) {
        self.faults
            .write()
            .await
            .workspace_writes
            .insert(key.to_string());
    }

    /// Make `list_notes` fail.
    pub async fn fail_list_notes(&self, fail: bool) {
        self.faults.write().await.list_notes = fail;
    }

    /// Archive a note in place.
    pub async fn archive_note(&self, id: Uuid) -> Result<()> {
        let mut state = self.state.write().await;
        let note = state.notes.get_mut(&id).ok_or(Error::NoteNotFound(id))?;
        note.row_status = RowStatus::Archived;
        Ok(())
    }

    /// Snapshot of every stored note, newest first.
    pub async fn all_notes(&self) -> Vec<Note> {
        let state = self.state.read().await;
        let mut notes: Vec<Note> = state.notes.values().cloned().collect();
        sort_newest_first(&mut notes);
        notes
    }

    async fn check_workspace_write(&self, key: &str) -> Result<()> {
        if self.faults.read().await.workspace_writes.contains(key) {
            return Err(Error::Internal(format!("injected write failure for {}", key)));
        }
        Ok(())
    }
}

fn sort_newest_first(notes: &mut [Note]) {
    notes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

fn matches(note: &Note, filter: &NoteFilter) -> bool {
    if filter.creator_id.is_some_and(|c| c != note.creator_id) {
        return false;
    }
    if filter.created_after.is_some_and(|t| note.created_at < t) {
        return false;
    }
    if filter.created_before.is_some_and(|t| note.created_at >= t) {
        return false;
    }
    if !filter.any_tags.is_empty()
        && !filter
            .any_tags
            .iter()
            .any(|t| note.tags.contains(&normalize_tag(t)))
    {
        return false;
    }
    if let Some(excluded) = &filter.exclude_tag {
        if note.tags.contains(&normalize_tag(excluded)) {
            return false;
        }
    }
    if filter.ai_generated.is_some_and(|f| f != note.ai_generated) {
        return false;
    }
    if filter.row_status.is_some_and(|s| s != note.row_status) {
        return false;
    }
    if let Some(ids) = &filter.ids {
        if !ids.contains(&note.id) {
            return false;
        }
    }
    true
}

#[async_trait]
impl NoteStore for MemoryStore {
    async fn create_note(&self, note: NewNote) -> Result<Note> {
        let now = self.clock.now();
        let (tags, property) = derive_payload(&note.content);
        let created_at = note.created_at.unwrap_or(now);
        let stored = Note {
            id: Uuid::now_v7(),
            creator_id: note.creator_id,
            content: note.content,
            visibility: note.visibility,
            pinned: note.pinned,
            ai_generated: note.ai_generated,
            row_status: RowStatus::Normal,
            tags,
            property,
            created_at,
            updated_at: created_at,
        };
        self.state
            .write()
            .await
            .notes
            .insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_note(&self, id: Uuid) -> Result<Note> {
        self.state
            .read()
            .await
            .notes
            .get(&id)
            .cloned()
            .ok_or(Error::NoteNotFound(id))
    }

    async fn list_notes(&self, filter: &NoteFilter) -> Result<Vec<Note>> {
        if self.faults.read().await.list_notes {
            return Err(Error::Internal("injected list failure".to_string()));
        }
        let state = self.state.read().await;
        let mut notes: Vec<Note> = state
            .notes
            .values()
            .filter(|n| matches(n, filter))
            .cloned()
            .collect();
        sort_newest_first(&mut notes);

        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.map(|l| l.max(0) as usize).unwrap_or(usize::MAX);
        Ok(notes.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_notes(&self, filter: &NoteFilter) -> Result<i64> {
        let state = self.state.read().await;
        Ok(state.notes.values().filter(|n| matches(n, filter)).count() as i64)
    }

    async fn upsert_relation(&self, relation: &NoteRelation) -> Result<()> {
        if self
            .faults
            .read()
            .await
            .relation_targets
            .contains(&relation.related_note_id)
        {
            return Err(Error::Internal(format!(
                "injected relation failure for {}",
                relation.related_note_id
            )));
        }
        let mut state = self.state.write().await;
        for id in [relation.note_id, relation.related_note_id] {
            if !state.notes.contains_key(&id) {
                return Err(Error::NoteNotFound(id));
            }
        }
        if !state.relations.contains(relation) {
            state.relations.push(*relation);
        }
        Ok(())
    }

    async fn list_relations(
        &self,
        note_id: Uuid,
        relation_type: RelationType,
    ) -> Result<Vec<NoteRelation>> {
        let state = self.state.read().await;
        Ok(state
            .relations
            .iter()
            .filter(|r| r.note_id == note_id && r.relation_type == relation_type)
            .copied()
            .collect())
    }
}

#[async_trait]
impl SettingStore for MemoryStore {
    async fn get_workspace_setting(&self, key: &str) -> Result<Option<StoredSetting>> {
        Ok(self.state.read().await.workspace.get(key).cloned())
    }

    async fn put_workspace_setting(&self, key: &str, value: &JsonValue) -> Result<StoredSetting> {
        self.check_workspace_write(key).await?;
        let mut state = self.state.write().await;
        let version = state.workspace.get(key).map(|s| s.version + 1).unwrap_or(1);
        let stored = StoredSetting {
            value: value.clone(),
            version,
        };
        state.workspace.insert(key.to_string(), stored.clone());
        Ok(stored)
    }

    async fn compare_and_swap_workspace_setting(
        &self,
        key: &str,
        expected_version: Option<i64>,
        value: &JsonValue,
    ) -> Result<bool> {
        self.check_workspace_write(key).await?;
        let mut state = self.state.write().await;
        let current = state.workspace.get(key).map(|s| s.version);
        if current != expected_version {
            return Ok(false);
        }
        state.workspace.insert(
            key.to_string(),
            StoredSetting {
                value: value.clone(),
                version: current.unwrap_or(0) + 1,
            },
        );
        Ok(true)
    }

    async fn get_user_setting(&self, user_id: Uuid, key: &str) -> Result<Option<JsonValue>> {
        Ok(self
            .state
            .read()
            .await
            .users
            .get(&(key.to_string(), user_id))
            .cloned())
    }

    async fn put_user_setting(&self, user_id: Uuid, key: &str, value: &JsonValue) -> Result<()> {
        self.state
            .write()
            .await
            .users
            .insert((key.to_string(), user_id), value.clone());
        Ok(())
    }

    async fn list_user_settings(&self, key: &str) -> Result<Vec<UserSetting>> {
        let state = self.state.read().await;
        Ok(state
            .users
            .iter()
            .filter(|((k, _), _)| k == key)
            .map(|((_, user_id), value)| UserSetting {
                user_id: *user_id,
                value: value.clone(),
            })
            .collect())
    }
}
