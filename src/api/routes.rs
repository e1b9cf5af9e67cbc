//! Router assembly.

use axum::extract::DefaultBodyLimit;
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use super::auth::auth_middleware;
use super::handlers::{sessions, ships, stat};
use super::state::AppState;
use super::terminal;

pub fn create_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    // The dashboard and SDK are separate origins; the bearer token is the
    // actual gate.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let auth_state = state.auth.clone();
    // Multipart uploads need headroom over the payload ceiling.
    let body_limit = state.settings.max_upload_size + 1024 * 1024;

    let protected = Router::new()
        .route("/ships", get(ships::list_ships))
        .route("/ship", post(ships::create_ship))
        .route(
            "/ship/{ship_id}",
            get(ships::get_ship).delete(ships::delete_ship),
        )
        .route(
            "/ship/{ship_id}/permanent",
            delete(ships::delete_ship_permanent),
        )
        .route("/ship/{ship_id}/exec", post(ships::execute))
        .route("/ship/{ship_id}/extend-ttl", post(ships::extend_ttl))
        .route("/ship/{ship_id}/start", post(ships::start_ship))
        .route("/ship/logs/{ship_id}", get(ships::get_logs))
        .route("/ship/{ship_id}/upload", post(ships::upload_file))
        .route("/ship/{ship_id}/download", get(ships::download_file))
        .route("/stat", get(stat::stat))
        .route("/stat/overview", get(stat::stat_overview))
        .route("/sessions", get(sessions::list_sessions))
        .route(
            "/sessions/{session_id}",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        .route("/sessions/{session_id}/history", get(sessions::list_history))
        .route(
            "/sessions/{session_id}/history/last",
            get(sessions::last_history),
        )
        .route(
            "/sessions/{session_id}/history/{execution_id}",
            get(sessions::get_history).patch(sessions::annotate_history),
        )
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(middleware::from_fn_with_state(auth_state, auth_middleware))
        .with_state(state.clone());

    let public = Router::new()
        .route("/health", get(stat::health))
        .with_state(state.clone());

    // The terminal proxy authenticates inside the socket so failures become
    // WebSocket close codes rather than failed upgrades.
    let websocket = Router::new()
        .route("/ship/{ship_id}/term", get(terminal::terminal_proxy))
        .with_state(state);

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(websocket)
        .layer(cors)
        .layer(trace_layer)
}
