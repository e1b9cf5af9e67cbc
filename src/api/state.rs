//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::Settings;
use crate::ship::ShipService;

use super::auth::AuthState;

/// The service bundle handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub ships: Arc<ShipService>,
    pub auth: AuthState,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(ships: Arc<ShipService>, settings: Arc<Settings>) -> Self {
        let auth = AuthState::new(settings.access_token.clone());
        Self {
            ships,
            auth,
            settings,
        }
    }
}
