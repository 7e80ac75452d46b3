// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cleanup Orchestrator
//!
//! Undoes a `mount` without any state from that run. Remote resources are
//! rediscovered from the labels `mount` wrote; the local port-forward is found by
//! its command line. Safe to run repeatedly.

use crate::application::injector::running_exposers;
use crate::domain::cluster::ClusterClient;
use crate::domain::config::MounterConfig;
use crate::domain::error::MountError;
use crate::domain::process::ProcessRunner;
use crate::domain::session::{
    EXPOSER_APP_LABEL, LABEL_APP, LABEL_BACKEND, LABEL_ORIGINAL_POD, LABEL_PVC_NAME,
};
use crate::domain::transport::TransportKind;
use crate::domain::volume::claim_volume_name;
use crate::infrastructure::local_mount::LocalMountExecutor;
use crate::infrastructure::tunnel::{port_forward_pattern, TunnelManager};
use k8s_openapi::api::core::v1::Pod;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct CleanRequest {
    pub namespace: String,
    pub pvc_name: String,
    pub mount_path: PathBuf,
    pub transport: TransportKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub unmounted: bool,
    pub deleted_pods: Vec<String>,
    /// `pod/container` pairs whose exposer process was stopped.
    pub stopped_containers: Vec<String>,
    /// Running exposers the remote kill did not reach.
    pub unstopped_containers: Vec<String>,
    pub killed_forwards: usize,
}

impl CleanReport {
    fn found_remote(&self) -> bool {
        !self.deleted_pods.is_empty()
            || !self.stopped_containers.is_empty()
            || !self.unstopped_containers.is_empty()
    }
}

/// Process name the exposer runs for each transport, as matched by `pkill -f`.
fn remote_process_pattern(transport: TransportKind) -> &'static str {
    match transport {
        TransportKind::Ssh => "ssh",
        TransportKind::Nfs => "ganesha.nfsd",
    }
}

/// Selector for the pods `mount` labelled for this claim and transport.
pub fn exposer_selector(pvc_name: &str, transport: TransportKind) -> String {
    let backend = match transport {
        TransportKind::Nfs => format!("{}={}", LABEL_BACKEND, TransportKind::Nfs),
        TransportKind::Ssh => format!("!{}", LABEL_BACKEND),
    };
    format!(
        "{}={},{}={},{}",
        LABEL_APP, EXPOSER_APP_LABEL, LABEL_PVC_NAME, pvc_name, backend
    )
}

fn label<'a>(pod: &'a Pod, key: &str) -> Option<&'a str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(key))
        .map(String::as_str)
}

pub struct CleanupOrchestrator {
    cluster: Arc<dyn ClusterClient>,
    tunnels: TunnelManager,
    local: LocalMountExecutor,
}

impl CleanupOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        runner: Arc<dyn ProcessRunner>,
        config: &MounterConfig,
        debug: bool,
    ) -> Self {
        let timing = &config.spec.timing;
        Self {
            cluster,
            tunnels: TunnelManager::new(runner.clone(), config.spec.tools.kubectl.clone(), debug),
            local: LocalMountExecutor::new(
                runner,
                timing.nfs_mount_attempts,
                timing.nfs_mount_backoff(),
                debug,
            ),
        }
    }

    pub fn with_local_executor(mut self, local: LocalMountExecutor) -> Self {
        self.local = local;
        self
    }

    pub async fn clean(&self, request: &CleanRequest) -> Result<CleanReport, MountError> {
        let namespace = request.namespace.as_str();
        let mut report = CleanReport {
            unmounted: self
                .local
                .unmount(&request.mount_path, request.transport)
                .await?,
            ..Default::default()
        };

        let selector = exposer_selector(&request.pvc_name, request.transport);
        let pods = self.cluster.list_pods(namespace, Some(&selector)).await?;
        debug!("Found {} exposer pod(s) matching '{}'", pods.len(), selector);

        for pod in &pods {
            self.remove_exposer_pod(namespace, pod, request.transport, &mut report)
                .await?;
        }

        if pods.is_empty() && request.transport == TransportKind::Nfs {
            self.stop_in_place_exposers(namespace, &request.pvc_name, &mut report)
                .await?;
        }

        if !report.unstopped_containers.is_empty() {
            return Err(MountError::PartialCleanup {
                namespace: namespace.to_string(),
                pvc: request.pvc_name.clone(),
                containers: report.unstopped_containers,
            });
        }
        if !report.found_remote() {
            return Err(MountError::NoMatchingPod {
                namespace: namespace.to_string(),
                pvc: request.pvc_name.clone(),
            });
        }
        info!(
            "Cleaned up {}/{}: deleted {:?}, stopped {:?}",
            namespace, request.pvc_name, report.deleted_pods, report.stopped_containers
        );
        Ok(report)
    }

    /// Standalone or proxy pod: stop the tunnel container in the original pod if
    /// any, kill the local forward, delete the pod.
    async fn remove_exposer_pod(
        &self,
        namespace: &str,
        pod: &Pod,
        transport: TransportKind,
        report: &mut CleanReport,
    ) -> Result<(), MountError> {
        let Some(name) = pod.metadata.name.as_deref() else {
            return Ok(());
        };

        if let Some(original) = label(pod, LABEL_ORIGINAL_POD) {
            match self.cluster.get_pod(namespace, original).await {
                Ok(host) => {
                    for container in running_exposers(&host, transport) {
                        self.stop_container(namespace, original, &container, transport, report)
                            .await;
                    }
                }
                Err(e) if e.is_not_found() => {
                    warn!("Original pod {}/{} no longer exists", namespace, original)
                }
                Err(e) => return Err(e.into()),
            }
        }

        // Exposer pod names are unique per session; a rejoined session forwards
        // from a different local port than the one labelled.
        self.kill_forward(&port_forward_pattern(namespace, name, None), report)
            .await;

        match self.cluster.delete_pod(namespace, name).await {
            Ok(()) => info!("Deleted pod {}/{}", namespace, name),
            Err(e) if e.is_not_found() => debug!("Pod {}/{} already gone", namespace, name),
            Err(e) => return Err(e.into()),
        }
        report.deleted_pods.push(name.to_string());
        Ok(())
    }

    /// NFS direct-ephemeral case: no pod of ours exists, the exposer lives inside
    /// the workload pod and must be stopped without disturbing it.
    async fn stop_in_place_exposers(
        &self,
        namespace: &str,
        pvc_name: &str,
        report: &mut CleanReport,
    ) -> Result<(), MountError> {
        let pods = self.cluster.list_pods(namespace, None).await?;
        for pod in pods
            .iter()
            .filter(|pod| claim_volume_name(pod, pvc_name).is_some())
        {
            let Some(name) = pod.metadata.name.as_deref() else {
                continue;
            };
            let containers = running_exposers(pod, TransportKind::Nfs);
            if containers.is_empty() {
                continue;
            }
            self.kill_forward(&port_forward_pattern(namespace, name, None), report)
                .await;
            for container in containers {
                self.stop_container(namespace, name, &container, TransportKind::Nfs, report)
                    .await;
            }
        }
        Ok(())
    }

    async fn stop_container(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        transport: TransportKind,
        report: &mut CleanReport,
    ) {
        let entry = format!("{}/{}", pod, container);
        if self
            .tunnels
            .kill_remote(namespace, pod, container, remote_process_pattern(transport))
            .await
        {
            report.stopped_containers.push(entry);
        } else {
            report.unstopped_containers.push(entry);
        }
    }

    async fn kill_forward(&self, pattern: &str, report: &mut CleanReport) {
        match self.tunnels.kill_local(pattern).await {
            Ok(true) => report.killed_forwards += 1,
            Ok(false) => warn!("No local port-forward matched '{}'", pattern),
            Err(e) => warn!("Could not stop local port-forward: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_per_backend() {
        assert_eq!(
            exposer_selector("data", TransportKind::Ssh),
            "app=volume-exposer,pvcName=data,!backend"
        );
        assert_eq!(
            exposer_selector("data", TransportKind::Nfs),
            "app=volume-exposer,pvcName=data,backend=nfs"
        );
    }

    #[test]
    fn test_remote_patterns() {
        assert_eq!(remote_process_pattern(TransportKind::Ssh), "ssh");
        assert_eq!(remote_process_pattern(TransportKind::Nfs), "ganesha.nfsd");
    }
}
