//! Execution history table access.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{AnnotateRequest, ExecType, ExecutionRecord, HistoryQuery};

const HISTORY_COLUMNS: &str = r#"
    id, session_id, ship_id, exec_type, code, success, execution_time_ms,
    output, error, description, tags, notes, created_at
"#;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Clone)]
pub struct HistoryRepository {
    pool: SqlitePool,
}

impl HistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, record: &ExecutionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_history (
                id, session_id, ship_id, exec_type, code, success, execution_time_ms,
                output, error, description, tags, notes, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.session_id)
        .bind(&record.ship_id)
        .bind(record.exec_type.to_string())
        .bind(&record.code)
        .bind(record.success)
        .bind(record.execution_time_ms)
        .bind(&record.output)
        .bind(&record.error)
        .bind(&record.description)
        .bind(&record.tags)
        .bind(&record.notes)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .context("inserting execution record")?;

        Ok(())
    }

    /// Filtered page of a session's history, newest first, plus the total
    /// count under the same filter.
    pub async fn list(
        &self,
        session_id: &str,
        query: &HistoryQuery,
    ) -> Result<(Vec<ExecutionRecord>, i64)> {
        let mut conditions = vec!["session_id = ?".to_string()];
        let mut binds: Vec<String> = vec![session_id.to_string()];

        if let Some(exec_type) = query.exec_type {
            conditions.push("exec_type = ?".to_string());
            binds.push(exec_type.to_string());
        }
        if query.success_only {
            conditions.push("success = 1".to_string());
        }
        if query.has_notes {
            conditions.push("notes IS NOT NULL AND notes != ''".to_string());
        }
        if query.has_description {
            conditions.push("description IS NOT NULL AND description != ''".to_string());
        }
        if let Some(ref tags) = query.tags {
            // Any-tag match over the comma-joined set.
            let mut tag_conditions = Vec::new();
            for tag in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
                tag_conditions
                    .push("(',' || REPLACE(tags, ' ', '') || ',') LIKE ?".to_string());
                binds.push(format!("%,{tag},%"));
            }
            if !tag_conditions.is_empty() {
                conditions.push(format!("({})", tag_conditions.join(" OR ")));
            }
        }

        let where_clause = conditions.join(" AND ");
        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = query.offset.unwrap_or(0).max(0);

        let count_sql = format!("SELECT COUNT(*) FROM execution_history WHERE {where_clause}");
        let mut count_query = sqlx::query_as::<_, (i64,)>(&count_sql);
        for bind in &binds {
            count_query = count_query.bind(bind);
        }
        let (total,) = count_query
            .fetch_one(&self.pool)
            .await
            .context("counting execution records")?;

        let list_sql = format!(
            "SELECT {HISTORY_COLUMNS} FROM execution_history WHERE {where_clause} \
             ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut list_query = sqlx::query_as::<_, ExecutionRecord>(&list_sql);
        for bind in &binds {
            list_query = list_query.bind(bind);
        }
        let entries = list_query
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
            .context("listing execution records")?;

        Ok((entries, total))
    }

    pub async fn get(&self, session_id: &str, id: &str) -> Result<Option<ExecutionRecord>> {
        let query = format!(
            "SELECT {HISTORY_COLUMNS} FROM execution_history WHERE id = ? AND session_id = ?"
        );
        sqlx::query_as::<_, ExecutionRecord>(&query)
            .bind(id)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .context("fetching execution record")
    }

    pub async fn get_last(
        &self,
        session_id: &str,
        exec_type: Option<ExecType>,
    ) -> Result<Option<ExecutionRecord>> {
        let record = match exec_type {
            Some(exec_type) => {
                let query = format!(
                    "SELECT {HISTORY_COLUMNS} FROM execution_history \
                     WHERE session_id = ? AND exec_type = ? \
                     ORDER BY created_at DESC LIMIT 1"
                );
                sqlx::query_as::<_, ExecutionRecord>(&query)
                    .bind(session_id)
                    .bind(exec_type.to_string())
                    .fetch_optional(&self.pool)
                    .await
            }
            None => {
                let query = format!(
                    "SELECT {HISTORY_COLUMNS} FROM execution_history \
                     WHERE session_id = ? ORDER BY created_at DESC LIMIT 1"
                );
                sqlx::query_as::<_, ExecutionRecord>(&query)
                    .bind(session_id)
                    .fetch_optional(&self.pool)
                    .await
            }
        }
        .context("fetching last execution record")?;

        Ok(record)
    }

    /// Update only the metadata fields present in the request; everything
    /// else on the record is immutable. Returns the updated row.
    pub async fn annotate(
        &self,
        session_id: &str,
        id: &str,
        req: &AnnotateRequest,
    ) -> Result<Option<ExecutionRecord>> {
        let mut sets = Vec::new();
        let mut binds: Vec<&str> = Vec::new();

        if let Some(ref description) = req.description {
            sets.push("description = ?");
            binds.push(description);
        }
        if let Some(ref tags) = req.tags {
            sets.push("tags = ?");
            binds.push(tags);
        }
        if let Some(ref notes) = req.notes {
            sets.push("notes = ?");
            binds.push(notes);
        }

        if !sets.is_empty() {
            let sql = format!(
                "UPDATE execution_history SET {} WHERE id = ? AND session_id = ?",
                sets.join(", ")
            );
            let mut update = sqlx::query(&sql);
            for bind in binds {
                update = update.bind(bind);
            }
            update
                .bind(id)
                .bind(session_id)
                .execute(&self.pool)
                .await
                .context("annotating execution record")?;
        }

        self.get(session_id, id).await
    }

    pub async fn delete_for_session(&self, session_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM execution_history WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .context("deleting execution records for session")?;
        Ok(result.rows_affected())
    }
}
