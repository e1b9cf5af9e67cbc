//! Execution history models.
//!
//! One row per ipython/shell execution. Rows are append-only except for the
//! three skill-library metadata fields an agent may annotate afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Kind of execution recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecType {
    Python,
    Shell,
}

impl std::fmt::Display for ExecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecType::Python => write!(f, "python"),
            ExecType::Shell => write!(f, "shell"),
        }
    }
}

impl std::str::FromStr for ExecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(ExecType::Python),
            "shell" => Ok(ExecType::Shell),
            other => Err(format!("unknown exec type: {other}")),
        }
    }
}

impl TryFrom<String> for ExecType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ExecutionRecord {
    pub id: String,
    pub session_id: String,
    pub ship_id: String,
    #[sqlx(try_from = "String")]
    pub exec_type: ExecType,
    /// The executed code or command, verbatim.
    pub code: String,
    pub success: bool,
    pub execution_time_ms: i64,
    pub output: Option<String>,
    pub error: Option<String>,
    pub description: Option<String>,
    /// Comma-joined tag set.
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    pub fn new(
        session_id: &str,
        ship_id: &str,
        exec_type: ExecType,
        code: &str,
        success: bool,
        execution_time_ms: i64,
        output: Option<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            ship_id: ship_id.to_string(),
            exec_type,
            code: code.to_string(),
            success,
            execution_time_ms,
            output,
            error,
            description: None,
            tags: None,
            notes: None,
            created_at: Utc::now(),
        }
    }

    /// Tags as a set-ish list.
    pub fn tag_list(&self) -> Vec<&str> {
        self.tags
            .as_deref()
            .map(|t| t.split(',').map(str::trim).filter(|t| !t.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Filters for listing a session's history.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    pub exec_type: Option<ExecType>,
    #[serde(default)]
    pub success_only: bool,
    /// Comma-separated; a row matches when the tag sets intersect.
    pub tags: Option<String>,
    #[serde(default)]
    pub has_notes: bool,
    #[serde(default)]
    pub has_description: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Body of `PATCH /sessions/{id}/history/{execId}`; only these three fields
/// of a record are ever mutable.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnnotateRequest {
    pub description: Option<String>,
    pub tags: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistoryListResponse {
    pub entries: Vec<ExecutionRecord>,
    pub total: i64,
}
