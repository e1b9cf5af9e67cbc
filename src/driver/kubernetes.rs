//! Kubernetes driver: one pod and one PVC per ship.
//!
//! The endpoint is the pod IP plus the ship service port, so Bay must run
//! in-cluster (or on a network routed to the pod CIDR). Persistent state
//! lives in a PVC named after the ship; deleting a ship never deletes it.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimVolumeSource, Pod, PodSpec, ResourceRequirements, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, LogParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::ship::models::ShipSpec;

use super::spec::validate_memory_for_kubernetes;
use super::{ContainerDriver, ContainerInfo, DriverError, DriverResult};

const POD_START_TIMEOUT: Duration = Duration::from_secs(120);
const POD_POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_LOG_TAIL: i64 = 10_000;

pub struct KubernetesDriver {
    client: Client,
    namespace: String,
    image: String,
    container_port: u16,
    pull_policy: String,
    pvc_size: String,
    storage_class: Option<String>,
}

impl KubernetesDriver {
    pub async fn new(settings: &Settings) -> anyhow::Result<Self> {
        let client = match &settings.kube_config_path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)?;
                let config =
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await?;
                Client::try_from(config)?
            }
            None => Client::try_default().await?,
        };

        Ok(Self {
            client,
            namespace: settings.kube_namespace.clone(),
            image: settings.docker_image.clone(),
            container_port: settings.ship_container_port,
            pull_policy: settings.kube_image_pull_policy.clone(),
            pvc_size: settings.kube_pvc_size.clone(),
            storage_class: settings.kube_storage_class.clone(),
        })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pvcs(&self) -> Api<PersistentVolumeClaim> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn object_name(ship_id: &str) -> String {
        format!("ship-{ship_id}")
    }

    fn labels(ship_id: &str) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app".to_string(), "ship".to_string()),
            ("ship_id".to_string(), ship_id.to_string()),
        ])
    }

    fn pvc_manifest(&self, ship_id: &str, spec: &ShipSpec) -> PersistentVolumeClaim {
        let size = spec.disk.clone().unwrap_or_else(|| self.pvc_size.clone());
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(Self::object_name(ship_id)),
                labels: Some(Self::labels(ship_id)),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                access_modes: Some(vec!["ReadWriteOnce".to_string()]),
                resources: Some(VolumeResourceRequirements {
                    requests: Some(BTreeMap::from([(
                        "storage".to_string(),
                        Quantity(size),
                    )])),
                    ..Default::default()
                }),
                storage_class_name: self.storage_class.clone(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn pod_manifest(&self, ship_id: &str, ttl: i64, spec: &ShipSpec) -> Pod {
        let mut requests: BTreeMap<String, Quantity> = BTreeMap::new();
        if let Some(cpus) = spec.cpus {
            requests.insert("cpu".to_string(), Quantity(cpus.to_string()));
        }
        if let Some(ref memory) = spec.memory {
            requests.insert("memory".to_string(), Quantity(memory.clone()));
        }
        let resources = (!requests.is_empty()).then(|| ResourceRequirements {
            limits: Some(requests.clone()),
            requests: Some(requests),
            ..Default::default()
        });

        let container = Container {
            name: "ship".to_string(),
            image: Some(self.image.clone()),
            image_pull_policy: Some(self.pull_policy.clone()),
            ports: Some(vec![ContainerPort {
                container_port: self.container_port as i32,
                ..Default::default()
            }]),
            env: Some(vec![
                EnvVar {
                    name: "SHIP_ID".to_string(),
                    value: Some(ship_id.to_string()),
                    ..Default::default()
                },
                EnvVar {
                    name: "TTL".to_string(),
                    value: Some(ttl.to_string()),
                    ..Default::default()
                },
                EnvVar {
                    name: "PORT".to_string(),
                    value: Some(self.container_port.to_string()),
                    ..Default::default()
                },
            ]),
            resources,
            volume_mounts: Some(vec![VolumeMount {
                name: "workspace".to_string(),
                mount_path: "/home".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(Self::object_name(ship_id)),
                labels: Some(Self::labels(ship_id)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![container],
                restart_policy: Some("Never".to_string()),
                volumes: Some(vec![Volume {
                    name: "workspace".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: Self::object_name(ship_id),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Wait until the pod is Running with an IP, surfacing pull failures.
    async fn wait_for_pod_ip(&self, name: &str) -> DriverResult<String> {
        let pods = self.pods();
        let deadline = tokio::time::Instant::now() + POD_START_TIMEOUT;

        loop {
            let pod = pods.get(name).await.map_err(map_kube_error)?;
            if let Some(status) = &pod.status {
                if let Some(reason) = waiting_reason(status)
                    && (reason == "ErrImagePull" || reason == "ImagePullBackOff")
                {
                    return Err(DriverError::ImagePullFailed(format!(
                        "pod {name}: {reason}"
                    )));
                }
                if status.phase.as_deref() == Some("Running")
                    && let Some(ip) = status.pod_ip.clone()
                {
                    return Ok(ip);
                }
                if matches!(status.phase.as_deref(), Some("Failed") | Some("Succeeded")) {
                    return Err(DriverError::BackendUnreachable(format!(
                        "pod {name} terminated before becoming ready"
                    )));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(DriverError::Timeout(format!(
                    "pod {name} not running after {}s",
                    POD_START_TIMEOUT.as_secs()
                )));
            }
            tokio::time::sleep(POD_POLL_INTERVAL).await;
        }
    }
}

fn waiting_reason(status: &k8s_openapi::api::core::v1::PodStatus) -> Option<String> {
    status
        .container_statuses
        .as_ref()?
        .iter()
        .find_map(|cs| cs.state.as_ref()?.waiting.as_ref()?.reason.clone())
}

fn map_kube_error(err: kube::Error) -> DriverError {
    match err {
        kube::Error::Api(ref resp) if resp.code == 404 => DriverError::NotFound(err.to_string()),
        kube::Error::Api(ref resp) if resp.code == 403 && resp.message.contains("quota") => {
            DriverError::QuotaExceeded(resp.message.clone())
        }
        other => DriverError::BackendUnreachable(other.to_string()),
    }
}

#[async_trait]
impl ContainerDriver for KubernetesDriver {
    fn validate_spec(&self, spec: &ShipSpec) -> DriverResult<()> {
        if let Some(ref memory) = spec.memory {
            validate_memory_for_kubernetes(memory)?;
        }
        if let Some(ref disk) = spec.disk {
            validate_memory_for_kubernetes(disk)?;
        }
        Ok(())
    }

    async fn create(&self, ship_id: &str, ttl: i64, spec: &ShipSpec) -> DriverResult<ContainerInfo> {
        self.validate_spec(spec)?;

        let name = Self::object_name(ship_id);
        let pvcs = self.pvcs();
        match pvcs
            .create(&PostParams::default(), &self.pvc_manifest(ship_id, spec))
            .await
        {
            Ok(_) => debug!(ship_id, "pvc created"),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                debug!(ship_id, "pvc already exists, reusing");
            }
            Err(e) => return Err(map_kube_error(e)),
        }

        let pods = self.pods();
        // A pod may linger from a previous incarnation of this ship.
        match pods.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
                while pods.get(&name).await.is_ok() {
                    if tokio::time::Instant::now() >= deadline {
                        return Err(DriverError::Timeout(format!(
                            "previous pod {name} stuck terminating"
                        )));
                    }
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
            Err(kube::Error::Api(resp)) if resp.code == 404 => {}
            Err(e) => return Err(map_kube_error(e)),
        }

        pods.create(&PostParams::default(), &self.pod_manifest(ship_id, ttl, spec))
            .await
            .map_err(map_kube_error)?;

        let ip = match self.wait_for_pod_ip(&name).await {
            Ok(ip) => ip,
            Err(e) => {
                let _ = pods.delete(&name, &DeleteParams::default()).await;
                return Err(e);
            }
        };

        Ok(ContainerInfo {
            container_id: name,
            endpoint: format!("{ip}:{}", self.container_port),
        })
    }

    async fn stop(&self, container_id: &str) -> DriverResult<()> {
        match self
            .pods()
            .delete(container_id, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => {
                warn!(container_id, error = %e, "pod delete failed");
                Err(map_kube_error(e))
            }
        }
    }

    async fn data_exists(&self, ship_id: &str) -> bool {
        self.pvcs().get(&Self::object_name(ship_id)).await.is_ok()
    }

    async fn logs(&self, container_id: &str, tail: Option<u32>) -> DriverResult<String> {
        let params = LogParams {
            tail_lines: Some(tail.map(i64::from).unwrap_or(MAX_LOG_TAIL).min(MAX_LOG_TAIL)),
            ..Default::default()
        };
        self.pods()
            .logs(container_id, &params)
            .await
            .map_err(map_kube_error)
    }

    async fn is_running(&self, container_id: &str) -> DriverResult<bool> {
        match self.pods().get(container_id).await {
            Ok(pod) => Ok(pod
                .status
                .and_then(|s| s.phase)
                .is_some_and(|phase| phase == "Running")),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(false),
            Err(e) => Err(map_kube_error(e)),
        }
    }
}
