//! HTTP facade: authenticated REST + WebSocket surface over the services.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod terminal;

pub use auth::{AuthState, SessionId};
pub use routes::create_router;
pub use state::AppState;
