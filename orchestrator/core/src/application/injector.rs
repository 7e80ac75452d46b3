// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Ephemeral Container Injector
//!
//! Adds an exposer container to a running pod we do not own, reusing one that is
//! already running under our naming convention.

use crate::application::readiness::container_phase;
use crate::domain::cluster::ClusterClient;
use crate::domain::error::MountError;
use crate::domain::session::{ephemeral_prefix, ContainerPhase, EphemeralContainerRef};
use crate::domain::transport::TransportKind;
use crate::domain::volume::{claim_volume_name, PodRef};
use crate::infrastructure::workload::{build_ephemeral_container, ExposerSpec};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectOutcome {
    /// A matching container was already running; nothing was patched.
    Reused(String),
    Created(String),
}

impl InjectOutcome {
    pub fn container_name(&self) -> &str {
        match self {
            Self::Reused(name) | Self::Created(name) => name,
        }
    }

    pub fn is_reused(&self) -> bool {
        matches!(self, Self::Reused(_))
    }
}

/// A running exposer together with the literal environment it was injected with.
#[derive(Debug, Clone)]
pub struct RunningExposer {
    pub container: EphemeralContainerRef,
    pub env: BTreeMap<String, String>,
}

/// Literal `env` entries of the ephemeral container `name` in the pod spec.
pub fn injected_env(pod: &Pod, name: &str) -> BTreeMap<String, String> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.ephemeral_containers.as_ref())
        .and_then(|containers| containers.iter().find(|c| c.name == name))
        .and_then(|container| container.env.as_ref())
        .map(|env| {
            env.iter()
                .filter_map(|var| var.value.clone().map(|value| (var.name.clone(), value)))
                .collect()
        })
        .unwrap_or_default()
}

/// Names of our running ephemeral exposers for `transport` in `pod`.
pub fn running_exposers(pod: &Pod, transport: TransportKind) -> Vec<String> {
    let prefix = ephemeral_prefix(transport);
    pod.status
        .as_ref()
        .and_then(|s| s.ephemeral_container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .filter(|s| s.name.starts_with(&prefix))
                .filter(|s| container_phase(pod, &s.name) == ContainerPhase::Running)
                .map(|s| s.name.clone())
                .collect()
        })
        .unwrap_or_default()
}

pub struct EphemeralInjector {
    cluster: Arc<dyn ClusterClient>,
}

impl EphemeralInjector {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    /// First running exposer for `transport` in the host pod, if any.
    pub async fn find_running(
        &self,
        host: &PodRef,
        transport: TransportKind,
    ) -> Result<Option<RunningExposer>, MountError> {
        let pod = self.cluster.get_pod(&host.namespace, &host.name).await?;
        Ok(running_exposers(&pod, transport)
            .into_iter()
            .next()
            .map(|name| RunningExposer {
                env: injected_env(&pod, &name),
                container: EphemeralContainerRef {
                    name,
                    host_pod: host.clone(),
                    state: ContainerPhase::Running,
                },
            }))
    }

    /// Inject `name` into `host`, mounting the pod volume that references `pvc_name`.
    pub async fn inject(
        &self,
        host: &PodRef,
        pvc_name: &str,
        name: &str,
        spec: &ExposerSpec,
    ) -> Result<InjectOutcome, MountError> {
        let pod = self.cluster.get_pod(&host.namespace, &host.name).await?;

        if let Some(existing) = running_exposers(&pod, spec.transport).into_iter().next() {
            info!("Reusing running ephemeral container {} in {}", existing, host);
            return Ok(InjectOutcome::Reused(existing));
        }

        let volume_name = claim_volume_name(&pod, pvc_name).ok_or_else(|| MountError::Patch {
            pod: host.name.clone(),
            reason: format!("no volume in the pod references PVC {}", pvc_name),
        })?;

        let container = build_ephemeral_container(name, &volume_name, spec);
        self.cluster
            .add_ephemeral_container(&host.namespace, &host.name, &container)
            .await
            .map_err(|e| MountError::Patch {
                pod: host.name.clone(),
                reason: e.to_string(),
            })?;
        info!("Injected ephemeral container {} into {}", name, host);
        Ok(InjectOutcome::Created(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::{running_status, terminated_status, workload_pod, FakeCluster};
    use crate::domain::config::ResourceSettings;
    use crate::domain::transport::PrivilegeProfile;
    use crate::infrastructure::workload::ExposerRole;

    fn nfs_spec() -> ExposerSpec {
        ExposerSpec {
            role: ExposerRole::Ephemeral,
            transport: TransportKind::Nfs,
            privilege: PrivilegeProfile::NonRoot,
            image: "exposer:nfs".to_string(),
            public_key: None,
            private_key: None,
            proxy_pod_ip: None,
            resources: ResourceSettings::default(),
            cpu_limit_override: None,
            image_pull_secret: None,
        }
    }

    fn host() -> PodRef {
        PodRef::new("ns1", "worker-1")
    }

    #[tokio::test]
    async fn test_inject_patches_with_resolved_volume() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_pod(workload_pod("worker-1", "data"));
        let injector = EphemeralInjector::new(cluster.clone());

        let outcome = injector
            .inject(&host(), "data", "volume-exposer-nfs-ephemeral-aaaa1111", &nfs_spec())
            .await
            .unwrap();
        assert_eq!(outcome, InjectOutcome::Created("volume-exposer-nfs-ephemeral-aaaa1111".to_string()));

        let patches = cluster.patches.lock();
        assert_eq!(patches.len(), 1);
        let mounts = patches[0].1.volume_mounts.clone().unwrap();
        assert_eq!(mounts[0].name, "storage");
    }

    #[tokio::test]
    async fn test_running_exposer_is_reused_without_patch() {
        let cluster = Arc::new(FakeCluster::default());
        let mut pod = workload_pod("worker-1", "data");
        if let Some(status) = pod.status.as_mut() {
            status.ephemeral_container_statuses = Some(vec![
                terminated_status("volume-exposer-nfs-ephemeral-old00000", "Error"),
                running_status("volume-exposer-nfs-ephemeral-live0000"),
            ]);
        }
        cluster.add_pod(pod);
        let injector = EphemeralInjector::new(cluster.clone());

        let outcome = injector
            .inject(&host(), "data", "volume-exposer-nfs-ephemeral-new00000", &nfs_spec())
            .await
            .unwrap();
        assert!(outcome.is_reused());
        assert_eq!(outcome.container_name(), "volume-exposer-nfs-ephemeral-live0000");
        assert!(cluster.patches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_host_without_claim_is_patch_error() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_pod(workload_pod("worker-1", "other"));
        let err = EphemeralInjector::new(cluster.clone())
            .inject(&host(), "data", "c1", &nfs_spec())
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::Patch { .. }));
        assert!(cluster.patches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_patch_is_patch_error() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_pod(workload_pod("worker-1", "data"));
        *cluster.reject_patch.lock() = true;
        let err = EphemeralInjector::new(cluster)
            .inject(&host(), "data", "c1", &nfs_spec())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PatchError");
    }

    #[tokio::test]
    async fn test_find_running_ignores_other_transport() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.add_pod(workload_pod("worker-1", "data"));
        let mut spec = nfs_spec();
        spec.transport = TransportKind::Ssh;
        spec.private_key = Some("PRIVATE".to_string());
        let injector = EphemeralInjector::new(cluster);
        injector
            .inject(&host(), "data", "volume-exposer-ssh-ephemeral-1a2b3c4d", &spec)
            .await
            .unwrap();

        let ssh = injector.find_running(&host(), TransportKind::Ssh).await.unwrap().unwrap();
        assert_eq!(ssh.container.name, "volume-exposer-ssh-ephemeral-1a2b3c4d");
        assert_eq!(ssh.container.host_pod, host());
        assert_eq!(ssh.container.state, ContainerPhase::Running);
        assert_eq!(ssh.env.get("SSH_PRIVATE_KEY").map(String::as_str), Some("PRIVATE"));
        assert_eq!(ssh.env.get("BACKEND").map(String::as_str), Some("ssh"));

        assert!(injector.find_running(&host(), TransportKind::Nfs).await.unwrap().is_none());
    }
}
