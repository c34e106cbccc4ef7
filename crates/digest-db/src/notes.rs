//! PostgreSQL note and relation storage.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::warn;
use uuid::Uuid;

use digest_core::{
    derive_payload, derive_property, normalize_tag, Error, NewNote, Note, NoteFilter,
    NoteProperty, NoteRelation, NoteStore, RelationType, Result,
};

/// PostgreSQL implementation of [`NoteStore`].
#[derive(Clone)]
pub struct PgNoteStore {
    pool: Pool<Postgres>,
}

impl PgNoteStore {
    /// Create a new PgNoteStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

const NOTE_COLUMNS: &str = "id, creator_id, content, visibility, pinned, ai_generated, \
     row_status, tags, property, created_at, updated_at";

/// Append `WHERE` clauses for `filter`, numbering placeholders from `param_idx`.
///
/// Binding order must match [`bind_filter`].
fn push_filter_clauses(query: &mut String, param_idx: &mut usize, filter: &NoteFilter) {
    query.push_str("WHERE TRUE ");
    if filter.creator_id.is_some() {
        query.push_str(&format!("AND creator_id = ${} ", param_idx));
        *param_idx += 1;
    }
    if filter.created_after.is_some() {
        query.push_str(&format!("AND created_at >= ${} ", param_idx));
        *param_idx += 1;
    }
    if filter.created_before.is_some() {
        query.push_str(&format!("AND created_at < ${} ", param_idx));
        *param_idx += 1;
    }
    if !filter.any_tags.is_empty() {
        query.push_str(&format!("AND tags && ${} ", param_idx));
        *param_idx += 1;
    }
    if filter.exclude_tag.is_some() {
        query.push_str(&format!("AND NOT (${} = ANY(tags)) ", param_idx));
        *param_idx += 1;
    }
    if filter.ai_generated.is_some() {
        query.push_str(&format!("AND ai_generated = ${} ", param_idx));
        *param_idx += 1;
    }
    if filter.row_status.is_some() {
        query.push_str(&format!("AND row_status = ${} ", param_idx));
        *param_idx += 1;
    }
    if filter.ids.is_some() {
        query.push_str(&format!("AND id = ANY(${}) ", param_idx));
        *param_idx += 1;
    }
}

fn bind_filter<'q>(
    mut q: sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments>,
    filter: &'q NoteFilter,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    if let Some(creator_id) = filter.creator_id {
        q = q.bind(creator_id);
    }
    if let Some(after) = filter.created_after {
        q = q.bind(after);
    }
    if let Some(before) = filter.created_before {
        q = q.bind(before);
    }
    if !filter.any_tags.is_empty() {
        let tags: Vec<String> = filter.any_tags.iter().map(|t| normalize_tag(t)).collect();
        q = q.bind(tags);
    }
    if let Some(tag) = &filter.exclude_tag {
        q = q.bind(normalize_tag(tag));
    }
    if let Some(ai_generated) = filter.ai_generated {
        q = q.bind(ai_generated);
    }
    if let Some(status) = filter.row_status {
        q = q.bind(status.to_string());
    }
    if let Some(ids) = &filter.ids {
        q = q.bind(ids.clone());
    }
    q
}

/// Decode the stored property column, recomputing it from content when the
/// stored value is unreadable.
fn decode_property(note_id: Uuid, content: &str, value: serde_json::Value) -> NoteProperty {
    serde_json::from_value(value).unwrap_or_else(|e| {
        warn!(
            subsystem = "db",
            component = "notes",
            note_id = %note_id,
            error = %e,
            "Unreadable note property, recomputing from content"
        );
        derive_property(content)
    })
}

fn note_from_row(row: &PgRow) -> Result<Note> {
    let id: Uuid = row.get("id");
    let content: String = row.get("content");
    let visibility: String = row.get("visibility");
    let row_status: String = row.get("row_status");
    let property = decode_property(id, &content, row.get("property"));
    Ok(Note {
        id,
        creator_id: row.get("creator_id"),
        content,
        visibility: visibility.parse().map_err(Error::Internal)?,
        pinned: row.get("pinned"),
        ai_generated: row.get("ai_generated"),
        row_status: row_status.parse().map_err(Error::Internal)?,
        tags: row.get("tags"),
        property,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl NoteStore for PgNoteStore {
    async fn create_note(&self, note: NewNote) -> Result<Note> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let created_at = note.created_at.unwrap_or(now);
        let (tags, property) = derive_payload(&note.content);

        let sql = format!(
            "INSERT INTO note (id, creator_id, content, visibility, pinned, ai_generated, \
             row_status, tags, property, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'NORMAL', $7, $8, $9, $9) \
             RETURNING {}",
            NOTE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(note.creator_id)
            .bind(&note.content)
            .bind(note.visibility.to_string())
            .bind(note.pinned)
            .bind(note.ai_generated)
            .bind(&tags)
            .bind(serde_json::to_value(property)?)
            .bind(created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        note_from_row(&row)
    }

    async fn get_note(&self, id: Uuid) -> Result<Note> {
        let sql = format!("SELECT {} FROM note WHERE id = $1", NOTE_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?
            .ok_or(Error::NoteNotFound(id))?;
        note_from_row(&row)
    }

    async fn list_notes(&self, filter: &NoteFilter) -> Result<Vec<Note>> {
        let mut query = format!("SELECT {} FROM note ", NOTE_COLUMNS);
        let mut param_idx = 1;
        push_filter_clauses(&mut query, &mut param_idx, filter);
        query.push_str("ORDER BY created_at DESC, id DESC ");
        if filter.limit.is_some() {
            query.push_str(&format!("LIMIT ${} ", param_idx));
            param_idx += 1;
        }
        query.push_str(&format!("OFFSET ${}", param_idx));

        let mut q = bind_filter(sqlx::query(&query), filter);
        if let Some(limit) = filter.limit {
            q = q.bind(limit);
        }
        q = q.bind(filter.offset.max(0));

        let rows = q.fetch_all(&self.pool).await.map_err(Error::Database)?;
        rows.iter().map(note_from_row).collect()
    }

    async fn count_notes(&self, filter: &NoteFilter) -> Result<i64> {
        let mut query = String::from("SELECT COUNT(*) AS total FROM note ");
        let mut param_idx = 1;
        push_filter_clauses(&mut query, &mut param_idx, filter);

        let row = bind_filter(sqlx::query(&query), filter)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.get("total"))
    }

    async fn upsert_relation(&self, relation: &NoteRelation) -> Result<()> {
        sqlx::query(
            "INSERT INTO note_relation (note_id, related_note_id, relation_type)
             VALUES ($1, $2, $3)
             ON CONFLICT (note_id, related_note_id, relation_type) DO NOTHING",
        )
        .bind(relation.note_id)
        .bind(relation.related_note_id)
        .bind(relation.relation_type.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_relations(
        &self,
        note_id: Uuid,
        relation_type: RelationType,
    ) -> Result<Vec<NoteRelation>> {
        let rows = sqlx::query(
            "SELECT note_id, related_note_id, relation_type FROM note_relation
             WHERE note_id = $1 AND relation_type = $2
             ORDER BY created_at ASC",
        )
        .bind(note_id)
        .bind(relation_type.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("relation_type");
                Ok(NoteRelation {
                    note_id: row.get("note_id"),
                    related_note_id: row.get("related_note_id"),
                    relation_type: kind.parse().map_err(Error::Internal)?,
                })
            })
            .collect()
    }
}
