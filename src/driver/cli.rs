//! Docker/Podman driver over the runtime CLI.
//!
//! One implementation covers all four Docker/Podman variants: the runtime
//! kind picks the binary and SELinux volume labels, and the attachment mode
//! picks how the ship endpoint is resolved (container IP on the configured
//! network vs. an ephemeral host-mapped port on 127.0.0.1).

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{DriverKind, Settings};
use crate::ship::models::ShipSpec;

use super::spec::{disk_bytes, memory_bytes};
use super::{ContainerDriver, ContainerInfo, DriverError, DriverResult};

const STOP_TIMEOUT_SECS: u32 = 10;
const MAX_LOG_TAIL: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuntimeKind {
    Docker,
    Podman,
}

impl RuntimeKind {
    fn binary(&self) -> &'static str {
        match self {
            RuntimeKind::Docker => "docker",
            RuntimeKind::Podman => "podman",
        }
    }

    /// Podman volumes need the `:Z` SELinux relabel suffix.
    fn needs_selinux_labels(&self) -> bool {
        matches!(self, RuntimeKind::Podman)
    }
}

pub struct CliDriver {
    runtime: RuntimeKind,
    host_mapped: bool,
    image: String,
    network: String,
    container_port: u16,
    data_dir: PathBuf,
}

impl CliDriver {
    pub fn new(settings: &Settings) -> Self {
        let runtime = match settings.container_driver {
            DriverKind::Podman | DriverKind::PodmanHost => RuntimeKind::Podman,
            _ => RuntimeKind::Docker,
        };
        Self {
            runtime,
            host_mapped: settings.container_driver.is_host_mapped(),
            image: settings.docker_image.clone(),
            network: settings.docker_network.clone(),
            container_port: settings.ship_container_port,
            data_dir: settings.data_dir(),
        }
    }

    fn container_name(ship_id: &str) -> String {
        format!("ship-{ship_id}")
    }

    fn ship_dirs(&self, ship_id: &str) -> (PathBuf, PathBuf) {
        let base = self.data_dir.join(ship_id);
        (base.join("home"), base.join("metadata"))
    }

    /// Create the per-ship volume directories. The ship container manages
    /// users under /home as root, so the directories must be writable by it.
    fn ensure_ship_dirs(&self, ship_id: &str) -> DriverResult<(PathBuf, PathBuf)> {
        use std::os::unix::fs::PermissionsExt;

        let (home, metadata) = self.ship_dirs(ship_id);
        for dir in [&home, &metadata] {
            std::fs::create_dir_all(dir).map_err(|e| {
                DriverError::BackendUnreachable(format!(
                    "creating ship data dir {}: {e}",
                    dir.display()
                ))
            })?;
            std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o777)).map_err(
                |e| {
                    DriverError::BackendUnreachable(format!(
                        "setting permissions on {}: {e}",
                        dir.display()
                    ))
                },
            )?;
        }
        Ok((home, metadata))
    }

    async fn run(&self, args: &[String]) -> DriverResult<String> {
        let output = Command::new(self.runtime.binary())
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DriverError::BackendUnreachable(format!(
                "{} {}: {e}",
                self.runtime.binary(),
                args.first().map(String::as_str).unwrap_or("")
            )))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(
                args.first().map(String::as_str).unwrap_or(""),
                &stderr,
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn build_run_args(
        &self,
        ship_id: &str,
        ttl: i64,
        spec: &ShipSpec,
        home: &PathBuf,
        metadata: &PathBuf,
        with_disk: bool,
    ) -> DriverResult<Vec<String>> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            Self::container_name(ship_id),
            "--restart".into(),
            "no".into(),
            "--label".into(),
            format!("ship_id={ship_id}"),
            "--label".into(),
            "created_by=bay".into(),
            "-e".into(),
            format!("SHIP_ID={ship_id}"),
            "-e".into(),
            format!("TTL={ttl}"),
        ];

        if !self.network.is_empty() {
            args.push("--network".into());
            args.push(self.network.clone());
        }

        if self.host_mapped {
            // Ephemeral host port; the runtime picks a free one atomically.
            args.push("-p".into());
            args.push(format!("127.0.0.1::{}", self.container_port));
        }

        let suffix = if self.runtime.needs_selinux_labels() {
            ":Z"
        } else {
            ""
        };
        args.push("-v".into());
        args.push(format!("{}:/home{suffix}", home.display()));
        args.push("-v".into());
        args.push(format!("{}:/app/metadata{suffix}", metadata.display()));

        if let Some(cpus) = spec.cpus {
            if cpus <= 0.0 {
                return Err(DriverError::InvalidSpec(format!(
                    "cpus must be positive, got {cpus}"
                )));
            }
            args.push("--cpus".into());
            args.push(cpus.to_string());
        }

        if let Some(ref memory) = spec.memory {
            args.push("--memory".into());
            args.push(memory_bytes(memory)?.to_string());
        }

        if with_disk && let Some(ref disk) = spec.disk {
            // Needs overlay2 on xfs/pquota; retried without when unsupported.
            args.push("--storage-opt".into());
            args.push(format!("size={}", disk_bytes(disk)?));
        }

        args.push(self.image.clone());
        Ok(args)
    }

    /// Resolve the ship endpoint after the container started.
    async fn resolve_endpoint(&self, container_id: &str) -> DriverResult<String> {
        if self.host_mapped {
            let out = self
                .run(&[
                    "port".into(),
                    container_id.to_string(),
                    format!("{}/tcp", self.container_port),
                ])
                .await?;
            // `port` prints lines like "0.0.0.0:49153"; the host port is all
            // that matters, the service is only reachable via loopback.
            let host_port = out
                .lines()
                .filter_map(|line| line.trim().rsplit(':').next())
                .find_map(|p| p.parse::<u16>().ok())
                .ok_or_else(|| {
                    DriverError::BackendUnreachable(format!(
                        "no host port mapping for container {container_id}"
                    ))
                })?;
            return Ok(format!("127.0.0.1:{host_port}"));
        }

        let out = self
            .run(&[
                "inspect".into(),
                "--format".into(),
                "{{json .NetworkSettings}}".into(),
                container_id.to_string(),
            ])
            .await?;
        let settings: serde_json::Value = serde_json::from_str(out.trim()).map_err(|e| {
            DriverError::BackendUnreachable(format!("parsing inspect output: {e}"))
        })?;

        let ip = settings
            .pointer(&format!("/Networks/{}/IPAddress", self.network))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                settings
                    .get("IPAddress")
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
            })
            .ok_or_else(|| {
                DriverError::BackendUnreachable(format!(
                    "container {container_id} has no IP address on network '{}'",
                    self.network
                ))
            })?;

        Ok(format!("{ip}:{}", self.container_port))
    }
}

#[async_trait]
impl ContainerDriver for CliDriver {
    async fn create(&self, ship_id: &str, ttl: i64, spec: &ShipSpec) -> DriverResult<ContainerInfo> {
        validate_container_ref(ship_id)?;
        let (home, metadata) = self.ensure_ship_dirs(ship_id)?;

        // Replace any leftover container from a previous run of this ship.
        let _ = self.stop(&Self::container_name(ship_id)).await;

        let args = self.build_run_args(ship_id, ttl, spec, &home, &metadata, true)?;
        let container_id = match self.run(&args).await {
            Ok(out) => out.trim().to_string(),
            Err(DriverError::QuotaExceeded(msg)) if msg.contains("storage-opt") => {
                warn!(ship_id, "storage quota unsupported by runtime, retrying without disk limit");
                let args = self.build_run_args(ship_id, ttl, spec, &home, &metadata, false)?;
                self.run(&args).await?.trim().to_string()
            }
            Err(e) => return Err(e),
        };

        let endpoint = match self.resolve_endpoint(&container_id).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                // Unusable without an address; tear it back down.
                let _ = self.stop(&container_id).await;
                return Err(e);
            }
        };

        debug!(ship_id, container_id, endpoint, "container created");
        Ok(ContainerInfo {
            container_id,
            endpoint,
        })
    }

    async fn stop(&self, container_id: &str) -> DriverResult<()> {
        validate_container_ref(container_id)?;

        match self
            .run(&[
                "stop".into(),
                "-t".into(),
                STOP_TIMEOUT_SECS.to_string(),
                container_id.to_string(),
            ])
            .await
        {
            Ok(_) => {}
            Err(DriverError::NotFound(_)) => return Ok(()),
            Err(e) => {
                warn!(container_id, error = %e, "container stop failed, forcing removal");
            }
        }

        match self
            .run(&["rm".into(), "-f".into(), container_id.to_string()])
            .await
        {
            Ok(_) | Err(DriverError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn data_exists(&self, ship_id: &str) -> bool {
        let (home, metadata) = self.ship_dirs(ship_id);
        home.exists() && metadata.exists()
    }

    async fn logs(&self, container_id: &str, tail: Option<u32>) -> DriverResult<String> {
        validate_container_ref(container_id)?;
        let tail = tail.unwrap_or(MAX_LOG_TAIL).min(MAX_LOG_TAIL).to_string();

        let output = Command::new(self.runtime.binary())
            .args(["logs", "--tail", tail.as_str(), container_id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DriverError::BackendUnreachable(format!("logs: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure("logs", &stderr));
        }

        // Container stdout and stderr both belong in the tail.
        let mut logs = String::from_utf8_lossy(&output.stdout).to_string();
        logs.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(logs)
    }

    async fn is_running(&self, container_id: &str) -> DriverResult<bool> {
        validate_container_ref(container_id)?;

        let out = match self
            .run(&[
                "inspect".into(),
                "--format".into(),
                "{{.State.Status}}".into(),
                container_id.to_string(),
            ])
            .await
        {
            Ok(out) => out,
            Err(DriverError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        Ok(out.trim().trim_matches('"') == "running")
    }
}

/// Map a CLI failure onto a driver error variant.
fn classify_failure(command: &str, stderr: &str) -> DriverError {
    let lower = stderr.to_lowercase();
    if lower.contains("no such container") || lower.contains("no such object") {
        DriverError::NotFound(stderr.trim().to_string())
    } else if lower.contains("pull access denied")
        || lower.contains("manifest unknown")
        || lower.contains("unable to find image")
        || lower.contains("image not known")
    {
        DriverError::ImagePullFailed(stderr.trim().to_string())
    } else if lower.contains("storage-opt") || lower.contains("quota") || lower.contains("no space")
    {
        DriverError::QuotaExceeded(stderr.trim().to_string())
    } else {
        DriverError::BackendUnreachable(format!("{command}: {}", stderr.trim()))
    }
}

/// Container IDs are hex; names are alphanumeric with `-`/`_`. Everything
/// else is refused before it can reach a shell-adjacent surface.
fn validate_container_ref(id: &str) -> DriverResult<()> {
    if id.is_empty() || id.len() > 128 {
        return Err(DriverError::InvalidSpec(
            "container reference must be 1-128 characters".to_string(),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DriverError::InvalidSpec(format!(
            "container reference '{id}' contains invalid characters"
        )));
    }
    Ok(())
}
