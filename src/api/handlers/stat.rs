//! Liveness and fleet statistics.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::Serialize;

use crate::error::BayResult;
use crate::ship::models::ShipStatus;

use super::super::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// `GET /health`: unauthenticated liveness.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
pub struct StatResponse {
    pub total: i64,
    pub creating: i64,
    pub running: i64,
    pub stopped: i64,
}

/// `GET /stat`: ship counts by status.
pub async fn stat(State(state): State<AppState>) -> BayResult<Json<StatResponse>> {
    let ships = state.ships.ships();
    let creating = ships.count_by_status(ShipStatus::Creating).await?;
    let running = ships.count_by_status(ShipStatus::Running).await?;
    let stopped = ships.count_by_status(ShipStatus::Stopped).await?;
    Ok(Json(StatResponse {
        total: creating + running + stopped,
        creating,
        running,
        stopped,
    }))
}

#[derive(Debug, Serialize)]
pub struct CapacityStats {
    pub max_ship_num: i64,
    pub in_use: i64,
    pub available: i64,
}

#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub total: i64,
    pub active: i64,
}

#[derive(Debug, Serialize)]
pub struct StatOverviewResponse {
    pub ships: StatResponse,
    pub capacity: CapacityStats,
    pub warm_pool: i64,
    pub sessions: SessionStats,
}

/// `GET /stat/overview`: counts plus capacity and warm-pool view.
pub async fn stat_overview(
    State(state): State<AppState>,
) -> BayResult<Json<StatOverviewResponse>> {
    let ships = state.ships.ships();
    let creating = ships.count_by_status(ShipStatus::Creating).await?;
    let running = ships.count_by_status(ShipStatus::Running).await?;
    let stopped = ships.count_by_status(ShipStatus::Stopped).await?;
    let in_use = ships.count_active().await?;
    let warm_pool = ships.count_warm_pool().await?;

    let sessions = state.ships.sessions();
    let total_sessions = sessions.count().await?;
    let active_sessions = sessions.count_active(Utc::now()).await?;

    Ok(Json(StatOverviewResponse {
        ships: StatResponse {
            total: creating + running + stopped,
            creating,
            running,
            stopped,
        },
        capacity: CapacityStats {
            max_ship_num: state.settings.max_ship_num,
            in_use,
            available: (state.settings.max_ship_num - in_use).max(0),
        },
        warm_pool,
        sessions: SessionStats {
            total: total_sessions,
            active: active_sessions,
        },
    }))
}
