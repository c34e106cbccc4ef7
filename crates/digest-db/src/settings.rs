//! PostgreSQL workspace and per-user settings.
//!
//! Workspace settings carry a monotonically increasing `version` column so
//! callers can perform optimistic compare-and-swap updates.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use digest_core::{Error, Result, SettingStore, StoredSetting, UserSetting};

/// PostgreSQL implementation of [`SettingStore`].
#[derive(Clone)]
pub struct PgSettingStore {
    pool: Pool<Postgres>,
}

impl PgSettingStore {
    /// Create a new PgSettingStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingStore for PgSettingStore {
    async fn get_workspace_setting(&self, key: &str) -> Result<Option<StoredSetting>> {
        let row = sqlx::query("SELECT value, version FROM workspace_setting WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.map(|r| StoredSetting {
            value: r.get("value"),
            version: r.get("version"),
        }))
    }

    async fn put_workspace_setting(&self, key: &str, value: &JsonValue) -> Result<StoredSetting> {
        let row = sqlx::query(
            "INSERT INTO workspace_setting (key, value, version, updated_at)
             VALUES ($1, $2, 1, NOW())
             ON CONFLICT (key) DO UPDATE
                SET value = EXCLUDED.value,
                    version = workspace_setting.version + 1,
                    updated_at = NOW()
             RETURNING value, version",
        )
        .bind(key)
        .bind(value)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(StoredSetting {
            value: row.get("value"),
            version: row.get("version"),
        })
    }

    async fn compare_and_swap_workspace_setting(
        &self,
        key: &str,
        expected_version: Option<i64>,
        value: &JsonValue,
    ) -> Result<bool> {
        let result = match expected_version {
            None => {
                sqlx::query(
                    "INSERT INTO workspace_setting (key, value, version, updated_at)
                     VALUES ($1, $2, 1, NOW())
                     ON CONFLICT (key) DO NOTHING",
                )
                .bind(key)
                .bind(value)
                .execute(&self.pool)
                .await
            }
            Some(version) => {
                sqlx::query(
                    "UPDATE workspace_setting
                     SET value = $2, version = version + 1, updated_at = NOW()
                     WHERE key = $1 AND version = $3",
                )
                .bind(key)
                .bind(value)
                .bind(version)
                .execute(&self.pool)
                .await
            }
        }
        .map_err(Error::Database)?;

        let swapped = result.rows_affected() == 1;
        if !swapped {
            debug!(
                subsystem = "db",
                component = "settings",
                op = "compare_and_swap",
                key,
                ?expected_version,
                "Setting version conflict"
            );
        }
        Ok(swapped)
    }

    async fn get_user_setting(&self, user_id: Uuid, key: &str) -> Result<Option<JsonValue>> {
        let row = sqlx::query("SELECT value FROM user_setting WHERE user_id = $1 AND key = $2")
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.map(|r| r.get("value")))
    }

    async fn put_user_setting(&self, user_id: Uuid, key: &str, value: &JsonValue) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_setting (user_id, key, value, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (user_id, key) DO UPDATE
                SET value = EXCLUDED.value, updated_at = NOW()",
        )
        .bind(user_id)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn list_user_settings(&self, key: &str) -> Result<Vec<UserSetting>> {
        let rows = sqlx::query(
            "SELECT user_id, value FROM user_setting WHERE key = $1 ORDER BY user_id",
        )
        .bind(key)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|r| UserSetting {
                user_id: r.get("user_id"),
                value: r.get("value"),
            })
            .collect())
    }
}
