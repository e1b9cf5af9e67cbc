//! Container drivers.
//!
//! A driver turns a ship record into a running container on one backend and
//! back. Docker and Podman share the CLI-driven implementation (the variant
//! only changes endpoint resolution and volume labels); Kubernetes gets its
//! own driver over the API. Drivers never retry; that is the caller's call.

mod cli;
mod kubernetes;
pub mod spec;

pub use cli::CliDriver;
pub use kubernetes::KubernetesDriver;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{DriverKind, Settings};
use crate::ship::models::ShipSpec;

pub type DriverResult<T> = Result<T, DriverError>;

/// Errors from the container backend.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Container, pod, or volume does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused the resource request.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("image pull failed: {0}")]
    ImagePullFailed(String),

    /// The backend API itself is down or errored.
    #[error("backend unreachable: {0}")]
    BackendUnreachable(String),

    /// The resource spec cannot be expressed on this backend.
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("backend timeout: {0}")]
    Timeout(String),
}

/// What a successful `create` hands back.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub container_id: String,
    /// Reachable address for the ship service, `host:port`.
    pub endpoint: String,
}

/// Capability set every backend implements.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    /// Backend-specific spec validation, run before anything is created.
    fn validate_spec(&self, _spec: &ShipSpec) -> DriverResult<()> {
        Ok(())
    }

    /// Create and start a container for `ship_id`, mounting its persistent
    /// volume, and wait for the backend to report it running. Service-level
    /// readiness is probed separately by the ship client.
    async fn create(&self, ship_id: &str, ttl: i64, spec: &ShipSpec) -> DriverResult<ContainerInfo>;

    /// Graceful stop then remove. Idempotent: a missing container is Ok.
    async fn stop(&self, container_id: &str) -> DriverResult<()>;

    /// Does the persistent volume for this ship hold prior state?
    async fn data_exists(&self, ship_id: &str) -> bool;

    /// Bounded tail of container stdout/stderr.
    async fn logs(&self, container_id: &str, tail: Option<u32>) -> DriverResult<String>;

    /// Backend-level liveness.
    async fn is_running(&self, container_id: &str) -> DriverResult<bool>;
}

/// Build the configured driver.
pub async fn build_driver(settings: &Settings) -> anyhow::Result<Arc<dyn ContainerDriver>> {
    let driver: Arc<dyn ContainerDriver> = match settings.container_driver {
        DriverKind::Docker | DriverKind::DockerHost | DriverKind::Podman | DriverKind::PodmanHost => {
            Arc::new(CliDriver::new(settings))
        }
        DriverKind::Kubernetes => Arc::new(KubernetesDriver::new(settings).await?),
    };
    Ok(driver)
}
