//! Ship data models and API DTOs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Ship lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShipStatus {
    /// Container requested but not yet ready.
    Creating,
    /// Container up and the readiness probe passed.
    Running,
    /// Container gone; the data volume is retained for recovery.
    Stopped,
}

impl std::fmt::Display for ShipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShipStatus::Creating => write!(f, "creating"),
            ShipStatus::Running => write!(f, "running"),
            ShipStatus::Stopped => write!(f, "stopped"),
        }
    }
}

impl std::str::FromStr for ShipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(ShipStatus::Creating),
            "running" => Ok(ShipStatus::Running),
            "stopped" => Ok(ShipStatus::Stopped),
            other => Err(format!("unknown ship status: {other}")),
        }
    }
}

impl TryFrom<String> for ShipStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Resource request for a ship container.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShipSpec {
    /// Logical cores, fractional allowed.
    pub cpus: Option<f64>,
    /// Size string, e.g. "512m", "1g", or "512Mi" for Kubernetes.
    pub memory: Option<String>,
    /// Optional disk bound; PVC size on Kubernetes.
    pub disk: Option<String>,
}

/// A sandbox container record.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Ship {
    pub id: String,
    #[sqlx(try_from = "String")]
    pub status: ShipStatus,
    pub container_id: Option<String>,
    /// Reachable `host:port` while Running, null otherwise.
    pub endpoint: Option<String>,
    pub cpus: Option<f64>,
    pub memory: Option<String>,
    pub disk: Option<String>,
    pub ttl: i64,
    pub warm_pool: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Ship {
    /// Fresh record in Creating state.
    pub fn new(ttl: i64, spec: &ShipSpec, warm_pool: bool) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            status: ShipStatus::Creating,
            container_id: None,
            endpoint: None,
            cpus: spec.cpus,
            memory: spec.memory.clone(),
            disk: spec.disk.clone(),
            ttl,
            warm_pool,
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }

    pub fn spec(&self) -> ShipSpec {
        ShipSpec {
            cpus: self.cpus,
            memory: self.memory.clone(),
            disk: self.disk.clone(),
        }
    }
}

/// Body of `POST /ship`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateShipRequest {
    /// Time to live in seconds.
    pub ttl: i64,
    #[serde(default)]
    pub spec: Option<ShipSpec>,
    /// Skip all reuse logic and always create a new container.
    #[serde(default)]
    pub force_create: bool,
}

/// Body of `POST /ship/{id}/extend-ttl`.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtendTtlRequest {
    pub ttl: i64,
}

/// Body of `POST /ship/{id}/start`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartShipRequest {
    pub ttl: i64,
}

impl Default for StartShipRequest {
    fn default() -> Self {
        Self { ttl: 3600 }
    }
}

/// Tagged operation forwarded into a ship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Operation type, e.g. "ipython/exec", "shell/exec", "fs/read_file".
    #[serde(rename = "type")]
    pub exec_type: String,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

/// Ship-side result of an exec, plus the history row it produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// History row id, set for ipython/shell executions only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// Wire form of a ship.
#[derive(Debug, Clone, Serialize)]
pub struct ShipResponse {
    pub id: String,
    pub status: ShipStatus,
    pub container_id: Option<String>,
    pub endpoint: Option<String>,
    pub ttl: i64,
    pub warm_pool: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<Ship> for ShipResponse {
    fn from(ship: Ship) -> Self {
        Self {
            id: ship.id,
            status: ship.status,
            container_id: ship.container_id,
            endpoint: ship.endpoint,
            ttl: ship.ttl,
            warm_pool: ship.warm_pool,
            created_at: ship.created_at,
            updated_at: ship.updated_at,
            expires_at: ship.expires_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogsResponse {
    pub logs: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadFileResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
