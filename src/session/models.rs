//! Session data models.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

/// Binding between an agent-supplied session id and a ship.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Session {
    pub id: String,
    /// Client-supplied identity, unique.
    pub session_id: String,
    pub ship_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// TTL the session was created with; activity refresh re-applies it.
    pub initial_ttl: i64,
}

impl Session {
    pub fn new(session_id: &str, ship_id: &str, ttl: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            ship_id: ship_id.to_string(),
            created_at: now,
            last_activity: now,
            expires_at: now + Duration::seconds(ttl),
            initial_ttl: ttl,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Wire form of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub session_id: String,
    pub ship_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub initial_ttl: i64,
    pub is_active: bool,
}

impl SessionResponse {
    pub fn from_session(session: Session, now: DateTime<Utc>) -> Self {
        let is_active = session.is_active(now);
        Self {
            id: session.id,
            session_id: session.session_id,
            ship_id: session.ship_id,
            created_at: session.created_at,
            last_activity: session.last_activity,
            expires_at: session.expires_at,
            initial_ttl: session.initial_ttl,
            is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: usize,
}
