//! Session table access.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::models::Session;

const SESSION_COLUMNS: &str = r#"
    id, session_id, ship_id, created_at, last_activity, expires_at, initial_ttl
"#;

#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, session_id, ship_id, created_at, last_activity, expires_at, initial_ttl
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.session_id)
        .bind(&session.ship_id)
        .bind(session.created_at)
        .bind(session.last_activity)
        .bind(session.expires_at)
        .bind(session.initial_ttl)
        .execute(&self.pool)
        .await
        .context("creating session")?;

        Ok(())
    }

    pub async fn get_by_session_id(&self, session_id: &str) -> Result<Option<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?");
        sqlx::query_as::<_, Session>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session")
    }

    /// The binding row iff `session_id` is bound to `ship_id`.
    pub async fn get_binding(&self, session_id: &str, ship_id: &str) -> Result<Option<Session>> {
        let query =
            format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ? AND ship_id = ?");
        sqlx::query_as::<_, Session>(&query)
            .bind(session_id)
            .bind(ship_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching session binding")
    }

    pub async fn touch(&self, session_id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET last_activity = ? WHERE session_id = ?")
            .bind(Utc::now())
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("touching session activity")?;
        Ok(())
    }

    /// Re-arm the expiry window (activity refresh or TTL extension).
    /// Monotonic like the ship-side expiry: a shorter window never
    /// replaces a longer one, so the two records cannot drift apart.
    pub async fn refresh_expiry(
        &self,
        session_id: &str,
        expires_at: DateTime<Utc>,
        initial_ttl: Option<i64>,
    ) -> Result<()> {
        match initial_ttl {
            Some(ttl) => {
                sqlx::query(
                    r#"
                    UPDATE sessions
                    SET expires_at = ?, initial_ttl = ?, last_activity = ?
                    WHERE session_id = ?
                      AND (expires_at IS NULL OR expires_at < ?)
                    "#,
                )
                .bind(expires_at)
                .bind(ttl)
                .bind(Utc::now())
                .bind(session_id)
                .bind(expires_at)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE sessions
                    SET expires_at = ?, last_activity = ?
                    WHERE session_id = ?
                      AND (expires_at IS NULL OR expires_at < ?)
                    "#,
                )
                .bind(expires_at)
                .bind(Utc::now())
                .bind(session_id)
                .bind(expires_at)
                .execute(&self.pool)
                .await
            }
        }
        .context("refreshing session expiry")?;
        Ok(())
    }

    /// Expire every session bound to a ship (stopped ships have no live
    /// sessions) without deleting the rows, so recovery keeps the binding.
    pub async fn expire_for_ship(&self, ship_id: &str) -> Result<u64> {
        let result = sqlx::query("UPDATE sessions SET expires_at = ? WHERE ship_id = ?")
            .bind(Utc::now())
            .bind(ship_id)
            .execute(&self.pool)
            .await
            .context("expiring sessions for ship")?;
        Ok(result.rows_affected())
    }

    pub async fn list_all(&self) -> Result<Vec<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC");
        sqlx::query_as::<_, Session>(&query)
            .fetch_all(&self.pool)
            .await
            .context("listing sessions")
    }

    pub async fn list_for_ship(&self, ship_id: &str) -> Result<Vec<Session>> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE ship_id = ?");
        sqlx::query_as::<_, Session>(&query)
            .bind(ship_id)
            .fetch_all(&self.pool)
            .await
            .context("listing sessions for ship")
    }

    pub async fn delete_by_session_id(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("deleting session")?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove every binding to a ship; returns how many went away.
    pub async fn delete_for_ship(&self, ship_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE ship_id = ?")
            .bind(ship_id)
            .execute(&self.pool)
            .await
            .context("deleting sessions for ship")?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .context("counting sessions")?;
        Ok(count.0)
    }

    pub async fn count_active(&self, now: DateTime<Utc>) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sessions WHERE expires_at > ?")
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .context("counting active sessions")?;
        Ok(count.0)
    }
}
