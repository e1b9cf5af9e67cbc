//! Terminal WebSocket proxy.
//!
//! Bridges a client WebSocket to the PTY endpoint inside a ship. Frames are
//! forwarded byte-for-byte in both directions, so resize control messages
//! (`{"type":"resize","cols":...,"rows":...}`) pass through untouched.
//! Authentication happens after the upgrade so failures can be reported as
//! WebSocket close codes instead of opaque handshake errors.

use axum::extract::ws::{CloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, warn};

use crate::ship::models::ShipStatus;

use super::state::AppState;

/// Close codes surfaced to terminal clients.
const CLOSE_UNAUTHORIZED: u16 = 4001;
const CLOSE_NO_SESSION: u16 = 4003;
const CLOSE_UNKNOWN_SHIP: u16 = 4004;
const CLOSE_UPSTREAM_FAILED: u16 = 1011;

/// High-water mark for a stalled peer: at most the transport buffer plus
/// one in-flight frame may sit unacknowledged for this long before the
/// connection is dropped instead of queueing further frames.
const SEND_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct TerminalParams {
    pub token: Option<String>,
    pub session_id: Option<String>,
    pub cols: Option<u16>,
    pub rows: Option<u16>,
}

/// `GET /ship/{ship_id}/term` (WebSocket).
pub async fn terminal_proxy(
    State(state): State<AppState>,
    Path(ship_id): Path<String>,
    Query(params): Query<TerminalParams>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_terminal(socket, state, ship_id, params))
}

async fn handle_terminal(
    mut socket: WebSocket,
    state: AppState,
    ship_id: String,
    params: TerminalParams,
) {
    let authorized = params
        .token
        .as_deref()
        .map(|t| state.auth.verify(t))
        .unwrap_or(false);
    if !authorized {
        close_with(&mut socket, CLOSE_UNAUTHORIZED, "unauthorized").await;
        return;
    }

    let Some(session_id) = params.session_id.filter(|s| !s.is_empty()) else {
        close_with(&mut socket, CLOSE_NO_SESSION, "missing session_id").await;
        return;
    };

    let ship = match state.ships.get(&ship_id).await {
        Ok(ship) => ship,
        Err(_) => {
            close_with(&mut socket, CLOSE_UNKNOWN_SHIP, "unknown ship").await;
            return;
        }
    };
    let endpoint = match (&ship.status, &ship.endpoint) {
        (ShipStatus::Running, Some(endpoint)) => endpoint.clone(),
        _ => {
            close_with(&mut socket, CLOSE_UNKNOWN_SHIP, "ship not running").await;
            return;
        }
    };

    let bound = state
        .ships
        .sessions()
        .get_binding(&session_id, &ship_id)
        .await
        .ok()
        .flatten()
        .is_some();
    if !bound {
        close_with(&mut socket, CLOSE_NO_SESSION, "session not bound to ship").await;
        return;
    }

    let cols = params.cols.unwrap_or(80);
    let rows = params.rows.unwrap_or(24);
    let upstream_url = format!("ws://{endpoint}/term?cols={cols}&rows={rows}");

    debug!(ship_id, session_id, upstream = %upstream_url, "opening terminal proxy");
    let (upstream, _) = match connect_async(&upstream_url).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(ship_id, error = %e, "terminal upstream connect failed");
            close_with(&mut socket, CLOSE_UPSTREAM_FAILED, "upstream connect failed").await;
            return;
        }
    };

    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    // Each pump holds at most one frame beyond the peer's transport
    // buffer; a peer that stops draining trips the send timeout and the
    // whole proxy is torn down rather than queueing frames.
    let client_to_upstream = async {
        while let Some(msg) = client_rx.next().await {
            let msg = msg?;
            let forward = match msg {
                AxumMessage::Text(text) => TungsteniteMessage::Text(text.to_string().into()),
                AxumMessage::Binary(data) => TungsteniteMessage::Binary(data),
                AxumMessage::Ping(data) => TungsteniteMessage::Ping(data),
                AxumMessage::Pong(data) => TungsteniteMessage::Pong(data),
                AxumMessage::Close(_) => TungsteniteMessage::Close(None),
            };
            match tokio::time::timeout(SEND_TIMEOUT, upstream_tx.send(forward)).await {
                Ok(result) => result?,
                Err(_) => anyhow::bail!(
                    "upstream stopped draining for {}s, dropping connection",
                    SEND_TIMEOUT.as_secs()
                ),
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    let upstream_to_client = async {
        while let Some(msg) = upstream_rx.next().await {
            let msg = msg?;
            let forward = match msg {
                TungsteniteMessage::Text(text) => AxumMessage::Text(text.to_string().into()),
                TungsteniteMessage::Binary(data) => AxumMessage::Binary(data),
                TungsteniteMessage::Ping(data) => AxumMessage::Ping(data),
                TungsteniteMessage::Pong(data) => AxumMessage::Pong(data),
                TungsteniteMessage::Close(_) => AxumMessage::Close(None),
                TungsteniteMessage::Frame(_) => continue,
            };
            match tokio::time::timeout(SEND_TIMEOUT, client_tx.send(forward)).await {
                Ok(result) => result?,
                Err(_) => anyhow::bail!(
                    "client stopped draining for {}s, dropping connection",
                    SEND_TIMEOUT.as_secs()
                ),
            }
        }
        Ok::<(), anyhow::Error>(())
    };

    // Either side closing (or erroring) tears down the other.
    let result = tokio::select! {
        result = client_to_upstream => result,
        result = upstream_to_client => result,
    };
    if let Err(e) = result {
        debug!(ship_id, error = %e, "terminal proxy closed with error");
    }
}

async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(AxumMessage::Close(Some(CloseFrame {
            code,
            reason: reason.to_string().into(),
        })))
        .await;
}
