//! Ship endpoints.

use axum::Json;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use crate::error::{BayError, BayResult};
use crate::ship::models::{
    CreateShipRequest, ExecRequest, ExecResponse, ExtendTtlRequest, LogsResponse, ShipResponse,
    StartShipRequest, UploadFileResponse,
};

use super::super::auth::SessionId;
use super::super::state::AppState;

/// `POST /ship`: allocate or retrieve the ship bound to this session.
pub async fn create_ship(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
    Json(request): Json<CreateShipRequest>,
) -> BayResult<(StatusCode, Json<ShipResponse>)> {
    let ship = state.ships.acquire(&session_id, &request).await?;
    Ok((StatusCode::CREATED, Json(ship.into())))
}

/// `GET /ships`: all non-stopped ships.
pub async fn list_ships(State(state): State<AppState>) -> BayResult<Json<Vec<ShipResponse>>> {
    let ships = state.ships.list_active().await?;
    Ok(Json(ships.into_iter().map(ShipResponse::from).collect()))
}

/// `GET /ship/{ship_id}`
pub async fn get_ship(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
) -> BayResult<Json<ShipResponse>> {
    let ship = state.ships.get(&ship_id).await?;
    Ok(Json(ship.into()))
}

/// `DELETE /ship/{ship_id}`: stop, keep the row and the data volume.
pub async fn delete_ship(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
) -> BayResult<StatusCode> {
    state.ships.stop(&ship_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /ship/{ship_id}/permanent`: drop the row and its sessions.
pub async fn delete_ship_permanent(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
) -> BayResult<StatusCode> {
    state.ships.delete_permanent(&ship_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /ship/{ship_id}/exec`: forward into the ship; the response
/// mirrors the ship's own result envelope.
pub async fn execute(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    SessionId(session_id): SessionId,
    Json(request): Json<ExecRequest>,
) -> BayResult<Json<ExecResponse>> {
    let response = state.ships.execute(&ship_id, &session_id, &request).await?;
    Ok(Json(response))
}

/// `POST /ship/{ship_id}/extend-ttl`
pub async fn extend_ttl(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    Json(request): Json<ExtendTtlRequest>,
) -> BayResult<Json<ShipResponse>> {
    let ship = state.ships.extend_ttl(&ship_id, request.ttl).await?;
    Ok(Json(ship.into()))
}

/// `POST /ship/{ship_id}/start`: recover a stopped ship.
pub async fn start_ship(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    SessionId(session_id): SessionId,
    request: Option<Json<StartShipRequest>>,
) -> BayResult<Json<ShipResponse>> {
    let ttl = request.map(|Json(r)| r.ttl).unwrap_or(3600);
    let ship = state.ships.start(&ship_id, &session_id, ttl).await?;
    Ok(Json(ship.into()))
}

#[derive(Debug, Deserialize)]
pub struct LogsParams {
    pub tail: Option<u32>,
}

/// `GET /ship/logs/{ship_id}`: bounded log tail.
pub async fn get_logs(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    Query(params): Query<LogsParams>,
) -> BayResult<Json<LogsResponse>> {
    let logs = state.ships.logs(&ship_id, params.tail).await?;
    Ok(Json(LogsResponse { logs }))
}

/// `POST /ship/{ship_id}/upload`: multipart body with `file` content and
/// a `file_path` destination field.
pub async fn upload_file(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    SessionId(session_id): SessionId,
    mut multipart: Multipart,
) -> BayResult<Json<UploadFileResponse>> {
    let mut content: Option<Vec<u8>> = None;
    let mut file_path: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BayError::invalid(format!("reading multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| BayError::invalid(format!("reading file field: {e}")))?;
                if bytes.len() > state.settings.max_upload_size {
                    return Err(BayError::PayloadTooLarge(format!(
                        "file size ({} bytes) exceeds maximum allowed size ({} bytes)",
                        bytes.len(),
                        state.settings.max_upload_size
                    )));
                }
                content = Some(bytes.to_vec());
            }
            Some("file_path") => {
                file_path = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| BayError::invalid(format!("reading file_path field: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let content = content.ok_or_else(|| BayError::invalid("missing 'file' field"))?;
    let file_path = file_path.ok_or_else(|| BayError::invalid("missing 'file_path' field"))?;

    let response = state
        .ships
        .upload(&ship_id, &session_id, content, &file_path)
        .await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub file_path: String,
}

/// `GET /ship/{ship_id}/download?file_path=...`
pub async fn download_file(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    SessionId(session_id): SessionId,
    Query(params): Query<DownloadParams>,
) -> BayResult<Response> {
    let bytes = state
        .ships
        .download(&ship_id, &session_id, &params.file_path)
        .await?;

    let filename = params
        .file_path
        .rsplit('/')
        .next()
        .unwrap_or(params.file_path.as_str());

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
