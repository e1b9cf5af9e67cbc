//! Ship table access.
//!
//! The two statements that carry the concurrency contract live here: the
//! capacity-guarded INSERT (the authoritative cap check) and the single-row
//! warm-pool claim (`UPDATE ... RETURNING`). Every pool-state mutation goes
//! through the claim path.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::{Ship, ShipStatus};

const SHIP_COLUMNS: &str = r#"
    id, status, container_id, endpoint, cpus, memory, disk,
    ttl, warm_pool, created_at, updated_at, expires_at
"#;

#[derive(Debug, Clone)]
pub struct ShipRepository {
    pool: SqlitePool,
}

impl ShipRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a Creating row iff the count of non-Stopped ships is below
    /// `cap`. Returns false when the cap is already reached; this is the
    /// authoritative capacity check.
    pub async fn insert_within_cap(&self, ship: &Ship, cap: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO ships (
                id, status, container_id, endpoint, cpus, memory, disk,
                ttl, warm_pool, created_at, updated_at, expires_at
            )
            SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
            WHERE (SELECT COUNT(*) FROM ships WHERE status != 'stopped') < ?
            "#,
        )
        .bind(&ship.id)
        .bind(ship.status.to_string())
        .bind(&ship.container_id)
        .bind(&ship.endpoint)
        .bind(ship.cpus)
        .bind(&ship.memory)
        .bind(&ship.disk)
        .bind(ship.ttl)
        .bind(ship.warm_pool)
        .bind(ship.created_at)
        .bind(ship.updated_at)
        .bind(ship.expires_at)
        .bind(cap)
        .execute(&self.pool)
        .await
        .context("inserting ship")?;

        Ok(result.rows_affected() > 0)
    }

    /// Atomically claim one Running pool ship: clears `warm_pool`, stamps
    /// the new TTL and expiry, and returns the row. At most one caller can
    /// win a given row.
    pub async fn claim_warm_pool(
        &self,
        ttl: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<Ship>> {
        let query = format!(
            r#"
            UPDATE ships
            SET warm_pool = 0, ttl = ?, expires_at = ?, updated_at = ?
            WHERE id = (
                SELECT id FROM ships
                WHERE warm_pool = 1 AND status = 'running'
                ORDER BY created_at
                LIMIT 1
            )
            RETURNING {SHIP_COLUMNS}
            "#
        );
        let ship = sqlx::query_as::<_, Ship>(&query)
            .bind(ttl)
            .bind(expires_at)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await
            .context("claiming warm pool ship")?;

        Ok(ship)
    }

    /// Take a specific ship out of the pool, losing gracefully to a
    /// concurrent claim. The shrink branch of the replenisher goes through
    /// this so a ship can never be both evicted and handed to a session.
    pub async fn claim_pool_ship_by_id(&self, id: &str) -> Result<Option<Ship>> {
        let query = format!(
            r#"
            UPDATE ships
            SET warm_pool = 0, updated_at = ?
            WHERE id = ? AND warm_pool = 1 AND status = 'running'
            RETURNING {SHIP_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Ship>(&query)
            .bind(Utc::now())
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("claiming pool ship by id")
    }

    pub async fn get(&self, id: &str) -> Result<Option<Ship>> {
        let query = format!("SELECT {SHIP_COLUMNS} FROM ships WHERE id = ?");
        sqlx::query_as::<_, Ship>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching ship")
    }

    /// Transition to Running with its container handle and expiry.
    pub async fn mark_running(
        &self,
        id: &str,
        container_id: &str,
        endpoint: &str,
        expires_at: DateTime<Utc>,
        warm_pool: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ships
            SET status = 'running', container_id = ?, endpoint = ?,
                expires_at = ?, warm_pool = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(container_id)
        .bind(endpoint)
        .bind(expires_at)
        .bind(warm_pool)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("marking ship running")?;

        Ok(())
    }

    /// Transition to Stopped: container gone, no endpoint, no expiry, out
    /// of the pool. The row (and its data volume) survives for recovery.
    pub async fn mark_stopped(&self, id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ships
            SET status = 'stopped', container_id = NULL, endpoint = NULL,
                expires_at = NULL, warm_pool = 0, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("marking ship stopped")?;

        Ok(())
    }

    /// Monotonic expiry bump: a shorter expiry never replaces a longer one.
    pub async fn extend_expiry(&self, id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ships
            SET expires_at = ?, updated_at = ?
            WHERE id = ? AND status = 'running'
              AND (expires_at IS NULL OR expires_at < ?)
            "#,
        )
        .bind(expires_at)
        .bind(Utc::now())
        .bind(id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .context("extending ship expiry")?;

        Ok(())
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM ships WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("deleting ship")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_active(&self) -> Result<Vec<Ship>> {
        let query = format!(
            "SELECT {SHIP_COLUMNS} FROM ships WHERE status != 'stopped' ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, Ship>(&query)
            .fetch_all(&self.pool)
            .await
            .context("listing active ships")
    }

    pub async fn list_all(&self) -> Result<Vec<Ship>> {
        let query = format!("SELECT {SHIP_COLUMNS} FROM ships ORDER BY created_at DESC");
        sqlx::query_as::<_, Ship>(&query)
            .fetch_all(&self.pool)
            .await
            .context("listing ships")
    }

    /// Count of non-Stopped ships; advisory only, the cap is enforced at
    /// insert time.
    pub async fn count_active(&self) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM ships WHERE status != 'stopped'")
                .fetch_one(&self.pool)
                .await
                .context("counting active ships")?;
        Ok(count.0)
    }

    pub async fn count_by_status(&self, status: ShipStatus) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM ships WHERE status = ?")
            .bind(status.to_string())
            .fetch_one(&self.pool)
            .await
            .context("counting ships by status")?;
        Ok(count.0)
    }

    pub async fn count_warm_pool(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM ships WHERE warm_pool = 1 AND status = 'running'",
        )
        .fetch_one(&self.pool)
        .await
        .context("counting warm pool ships")?;
        Ok(count.0)
    }

    /// Running ships whose expiry has passed.
    pub async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<Ship>> {
        let query = format!(
            r#"
            SELECT {SHIP_COLUMNS} FROM ships
            WHERE status = 'running' AND expires_at IS NOT NULL AND expires_at < ?
            "#
        );
        sqlx::query_as::<_, Ship>(&query)
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .context("listing expired ships")
    }

    /// Oldest pool ships, for eviction when the pool overshoots.
    pub async fn oldest_warm_pool(&self, limit: i64) -> Result<Vec<Ship>> {
        let query = format!(
            r#"
            SELECT {SHIP_COLUMNS} FROM ships
            WHERE warm_pool = 1 AND status = 'running'
            ORDER BY created_at
            LIMIT ?
            "#
        );
        sqlx::query_as::<_, Ship>(&query)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .context("listing oldest warm pool ships")
    }
}
