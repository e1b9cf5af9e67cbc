//! SQLite store shared by the request path and the background loops.
//!
//! Bay holds no authoritative state in memory: every allocation decision
//! is a single SQL statement (the capacity-guarded insert, the pool
//! claim), so the store only has to provide statement-level atomicity.
//! WAL mode lets the reaper and replenisher read while request tasks
//! write; the busy timeout absorbs the occasional write-write collision
//! between a request task and a background sweep. Foreign keys are on
//! because session rows cascade when a ship row is deleted.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the store at `path`, fully migrated.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        Self::connect(options, 5).await
    }

    /// Throwaway store for tests. A single connection, because every
    /// `:memory:` connection is its own empty database.
    pub async fn ephemeral() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        Self::connect(options, 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("opening sqlite pool")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("applying migrations")?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
