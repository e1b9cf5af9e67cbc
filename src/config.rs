//! Runtime configuration.
//!
//! Every option is settable from the environment (`MAX_SHIP_NUM`,
//! `ACCESS_TOKEN`, `CONTAINER_DRIVER`, ...) and from an optional `bay.toml`
//! file; environment variables win.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// Policy when the global ship cap is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapacityPolicy {
    /// Fail the allocation with 409.
    #[default]
    Reject,
    /// Queue the allocation until a slot frees up or the wait times out.
    Wait,
}

/// Container backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DriverKind {
    /// Docker, Bay running inside the container network.
    Docker,
    /// Docker, Bay running on the host (endpoints are mapped host ports).
    #[default]
    DockerHost,
    /// Podman, container network.
    Podman,
    /// Podman, host mode.
    PodmanHost,
    /// Kubernetes pods with per-ship PVCs.
    Kubernetes,
}

impl DriverKind {
    pub fn is_host_mapped(&self) -> bool {
        matches!(self, DriverKind::DockerHost | DriverKind::PodmanHost)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Server bind address.
    pub host: String,
    /// Server port.
    pub port: u16,

    /// Global cap on non-stopped ships; pool and user ships share it.
    pub max_ship_num: i64,
    /// What to do with an allocation that hits the cap.
    pub behavior_after_max_ship: CapacityPolicy,
    /// Upper bound on a queued allocation, seconds.
    pub ship_wait_timeout: u64,

    /// Shared bearer token protecting every endpoint.
    pub access_token: String,

    /// SQLite database file.
    pub database_path: String,

    /// Container backend.
    pub container_driver: DriverKind,
    /// Ship image for Docker/Podman/Kubernetes.
    pub docker_image: String,
    /// Network the ships join (attached variants).
    pub docker_network: String,
    /// Port the ship service listens on inside the container.
    pub ship_container_port: u16,
    /// Host root for per-ship data volumes.
    pub ship_data_dir: String,

    /// Default TTL for ships created without an explicit request (pool top-up).
    pub default_ship_ttl: i64,
    pub default_ship_cpus: f64,
    pub default_ship_memory: String,

    /// Readiness probe deadline, seconds.
    pub ship_health_check_timeout: u64,
    /// Readiness probe interval, seconds.
    pub ship_health_check_interval: u64,
    /// Forwarded exec timeout, seconds (clamped to [`MAX_EXEC_TIMEOUT`]).
    pub ship_exec_timeout: u64,

    /// Upload size ceiling, bytes.
    pub max_upload_size: usize,

    /// Kubernetes driver settings.
    pub kube_namespace: String,
    pub kube_config_path: Option<String>,
    pub kube_image_pull_policy: String,
    pub kube_pvc_size: String,
    pub kube_storage_class: Option<String>,

    /// Warm pool settings.
    pub warm_pool_enabled: bool,
    pub warm_pool_min_size: i64,
    pub warm_pool_max_size: i64,
    pub warm_pool_replenish_interval: u64,
    /// TTL stamped on pool ships so they rarely expire before being claimed.
    pub warm_pool_ttl: i64,

    /// Reaper sweep interval, seconds.
    pub reaper_interval: u64,
}

/// Ceiling for the forwarded exec timeout, seconds.
pub const MAX_EXEC_TIMEOUT: u64 = 300;

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8156,
            max_ship_num: 10,
            behavior_after_max_ship: CapacityPolicy::Reject,
            ship_wait_timeout: 300,
            access_token: "secret-token".to_string(),
            database_path: "bay.db".to_string(),
            container_driver: DriverKind::DockerHost,
            docker_image: "ship:latest".to_string(),
            docker_network: "shipyard".to_string(),
            ship_container_port: 8123,
            ship_data_dir: "~/ship_data".to_string(),
            default_ship_ttl: 3600,
            default_ship_cpus: 1.0,
            default_ship_memory: "512m".to_string(),
            ship_health_check_timeout: 60,
            ship_health_check_interval: 2,
            ship_exec_timeout: 30,
            max_upload_size: 100 * 1024 * 1024,
            kube_namespace: "default".to_string(),
            kube_config_path: None,
            kube_image_pull_policy: "IfNotPresent".to_string(),
            kube_pvc_size: "1Gi".to_string(),
            kube_storage_class: None,
            warm_pool_enabled: true,
            warm_pool_min_size: 2,
            warm_pool_max_size: 10,
            warm_pool_replenish_interval: 30,
            warm_pool_ttl: 24 * 3600,
            reaper_interval: 10,
        }
    }
}

impl Settings {
    /// Load from `bay.toml` (if present) overlaid with environment variables.
    pub fn load() -> Result<Self> {
        let cfg = Config::builder()
            .add_source(File::new("bay", FileFormat::Toml).required(false))
            .add_source(Environment::default().try_parsing(true))
            .build()
            .context("building configuration")?;

        cfg.try_deserialize().context("deserializing configuration")
    }

    /// Exec timeout with the ceiling applied.
    pub fn exec_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.ship_exec_timeout.min(MAX_EXEC_TIMEOUT))
    }

    /// Expand `~` in `ship_data_dir`.
    pub fn data_dir(&self) -> std::path::PathBuf {
        if let Some(rest) = self.ship_data_dir.strip_prefix("~/")
            && let Ok(home) = std::env::var("HOME")
        {
            return std::path::Path::new(&home).join(rest);
        }
        std::path::PathBuf::from(&self.ship_data_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.max_ship_num, 10);
        assert_eq!(s.behavior_after_max_ship, CapacityPolicy::Reject);
        assert_eq!(s.ship_container_port, 8123);
        assert_eq!(s.ship_health_check_timeout, 60);
        assert_eq!(s.ship_health_check_interval, 2);
        assert_eq!(s.warm_pool_min_size, 2);
        assert_eq!(s.warm_pool_max_size, 10);
    }

    #[test]
    fn exec_timeout_is_clamped() {
        let s = Settings {
            ship_exec_timeout: 100_000,
            ..Settings::default()
        };
        assert_eq!(s.exec_timeout().as_secs(), MAX_EXEC_TIMEOUT);
    }
}
