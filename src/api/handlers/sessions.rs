//! Session and execution-history endpoints.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use serde::Deserialize;

use crate::error::{BayError, BayResult};
use crate::history::models::{
    AnnotateRequest, ExecType, ExecutionRecord, HistoryListResponse, HistoryQuery,
};
use crate::session::models::{SessionListResponse, SessionResponse};

use super::super::state::AppState;

/// `GET /sessions`
pub async fn list_sessions(State(state): State<AppState>) -> BayResult<Json<SessionListResponse>> {
    let sessions = state.ships.sessions().list_all().await?;
    let now = Utc::now();
    let sessions: Vec<_> = sessions
        .into_iter()
        .map(|s| SessionResponse::from_session(s, now))
        .collect();
    let total = sessions.len();
    Ok(Json(SessionListResponse { sessions, total }))
}

/// `GET /sessions/{session_id}`
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> BayResult<Json<SessionResponse>> {
    let session = state
        .ships
        .sessions()
        .get_by_session_id(&session_id)
        .await?
        .ok_or_else(|| BayError::not_found(format!("session not found: {session_id}")))?;
    Ok(Json(SessionResponse::from_session(session, Utc::now())))
}

/// `DELETE /sessions/{session_id}`: drop the binding and its history.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> BayResult<StatusCode> {
    state.ships.delete_session(&session_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /sessions/{session_id}/history` with type, success, tag, and
/// metadata filters.
pub async fn list_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> BayResult<Json<HistoryListResponse>> {
    ensure_session_exists(&state, &session_id).await?;
    let (entries, total) = state.ships.history().list(&session_id, &query).await?;
    Ok(Json(HistoryListResponse { entries, total }))
}

#[derive(Debug, Default, Deserialize)]
pub struct LastQuery {
    pub exec_type: Option<ExecType>,
}

/// `GET /sessions/{session_id}/history/last`
pub async fn last_history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<LastQuery>,
) -> BayResult<Json<ExecutionRecord>> {
    ensure_session_exists(&state, &session_id).await?;
    let record = state
        .ships
        .history()
        .get_last(&session_id, query.exec_type)
        .await?
        .ok_or_else(|| {
            BayError::not_found(format!("no executions recorded for session {session_id}"))
        })?;
    Ok(Json(record))
}

/// `GET /sessions/{session_id}/history/{execution_id}`
pub async fn get_history(
    State(state): State<AppState>,
    Path((session_id, execution_id)): Path<(String, String)>,
) -> BayResult<Json<ExecutionRecord>> {
    let record = state
        .ships
        .history()
        .get(&session_id, &execution_id)
        .await?
        .ok_or_else(|| BayError::not_found(format!("execution not found: {execution_id}")))?;
    Ok(Json(record))
}

/// `PATCH /sessions/{session_id}/history/{execution_id}`: update only the
/// skill-library metadata fields. Idempotent for identical bodies.
pub async fn annotate_history(
    State(state): State<AppState>,
    Path((session_id, execution_id)): Path<(String, String)>,
    Json(request): Json<AnnotateRequest>,
) -> BayResult<Json<ExecutionRecord>> {
    let record = state
        .ships
        .history()
        .annotate(&session_id, &execution_id, &request)
        .await?
        .ok_or_else(|| BayError::not_found(format!("execution not found: {execution_id}")))?;
    Ok(Json(record))
}

/// History routes are scoped by session; a session nobody has ever seen is
/// a 404, not an empty list. History outlives the reaper's removal of the
/// binding, so recorded rows keep the session addressable here.
async fn ensure_session_exists(state: &AppState, session_id: &str) -> BayResult<()> {
    if state
        .ships
        .sessions()
        .get_by_session_id(session_id)
        .await?
        .is_some()
    {
        return Ok(());
    }
    let last = state.ships.history().get_last(session_id, None).await?;
    if last.is_some() {
        return Ok(());
    }
    Err(BayError::not_found(format!(
        "session not found: {session_id}"
    )))
}
