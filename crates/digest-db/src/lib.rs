//! # digest-db
//!
//! Storage layer for the memo digest pipeline.
//!
//! This crate provides:
//! - PostgreSQL connection pool management
//! - [`PgNoteStore`] and [`PgSettingStore`], the sqlx implementations of the
//!   core store traits
//! - [`MemoryStore`], an in-memory implementation with fault injection
//!
//! ## Example
//!
//! ```rust,ignore
//! use digest_db::{Database, PoolConfig};
//!
//! let db = Database::connect("postgres://localhost/digest", PoolConfig::from_env()).await?;
//! db.migrate().await?;
//! let note = db.notes.get_note(id).await?;
//! ```

pub mod memory;
pub mod notes;
pub mod pool;
pub mod settings;

pub use memory::MemoryStore;
pub use notes::PgNoteStore;
pub use pool::{create_pool, log_pool_metrics, PoolConfig};
pub use settings::PgSettingStore;

use digest_core::{Error, Result};

/// Combined database context with all stores.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Notes and relations.
    pub notes: PgNoteStore,
    /// Workspace and user settings.
    pub settings: PgSettingStore,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            notes: PgNoteStore::new(pool.clone()),
            settings: PgSettingStore::new(pool.clone()),
            pool,
        }
    }

    /// Connect to `url` with the given pool configuration.
    pub async fn connect(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Cheap liveness check.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}
