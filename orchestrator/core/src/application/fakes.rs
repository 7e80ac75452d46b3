// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory collaborators for application unit tests.

use crate::domain::cluster::{ClusterClient, ClusterError};
use crate::domain::process::{ChildProcess, CommandOutput, CommandSpec, ProcessError, ProcessRunner};
use crate::domain::transport::{TransportKind, TransportProbe};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateRunning, ContainerStateTerminated, ContainerStatus,
    EphemeralContainer, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeClaimStatus, PersistentVolumeClaimVolumeSource, PersistentVolumeSpec, Pod,
    PodCondition, PodSpec, PodStatus, Volume,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;

pub fn bound_pvc(name: &str, volume: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            volume_name: Some(volume.to_string()),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            phase: Some("Bound".to_string()),
            ..Default::default()
        }),
    }
}

pub fn pv(name: &str, modes: &[&str]) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeSpec {
            access_modes: Some(modes.iter().map(|m| m.to_string()).collect()),
            ..Default::default()
        }),
        status: None,
    }
}

pub fn workload_pod(name: &str, claim: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            volumes: Some(vec![Volume {
                name: "storage".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: claim.to_string(),
                    read_only: None,
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

pub fn running_status(name: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            running: Some(ContainerStateRunning::default()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn terminated_status(name: &str, reason: &str) -> ContainerStatus {
    ContainerStatus {
        name: name.to_string(),
        state: Some(ContainerState {
            terminated: Some(ContainerStateTerminated {
                exit_code: 1,
                reason: Some(reason.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mark_ready(pod: &mut Pod) {
    let status = pod.status.get_or_insert_with(Default::default);
    status.phase = Some("Running".to_string());
    status.pod_ip = Some("10.0.0.7".to_string());
    status.conditions = Some(vec![PodCondition {
        type_: "Ready".to_string(),
        status: "True".to_string(),
        ..Default::default()
    }]);
}

/// Cluster fake. Created pods become Ready immediately; injected ephemeral
/// containers report the configured state.
#[derive(Default)]
pub struct FakeCluster {
    pub pvcs: Mutex<BTreeMap<String, PersistentVolumeClaim>>,
    pub pvs: Mutex<BTreeMap<String, PersistentVolume>>,
    pub pods: Mutex<Vec<Pod>>,
    pub created: Mutex<Vec<Pod>>,
    pub patches: Mutex<Vec<(String, EphemeralContainer)>>,
    pub deleted: Mutex<Vec<String>>,
    /// Reason to report when an injected container terminates instead of running.
    pub terminate_injected: Mutex<Option<String>>,
    pub reject_patch: Mutex<bool>,
}

impl FakeCluster {
    pub fn with_volume(pvc: &str, volume: &str, modes: &[&str]) -> Self {
        let cluster = Self::default();
        cluster.pvcs.lock().insert(pvc.to_string(), bound_pvc(pvc, volume));
        cluster.pvs.lock().insert(volume.to_string(), pv(volume, modes));
        cluster
    }

    pub fn add_pod(&self, pod: Pod) {
        self.pods.lock().push(pod);
    }

    pub fn mutations(&self) -> usize {
        self.created.lock().len() + self.patches.lock().len() + self.deleted.lock().len()
    }
}

fn pod_name(pod: &Pod) -> &str {
    pod.metadata.name.as_deref().unwrap_or_default()
}

fn matches_selector(pod: &Pod, selector: &str) -> bool {
    let labels = pod.metadata.labels.clone().unwrap_or_default();
    selector.split(',').all(|term| {
        if let Some(key) = term.strip_prefix('!') {
            !labels.contains_key(key)
        } else if let Some((key, value)) = term.split_once('=') {
            labels.get(key).map(String::as_str) == Some(value)
        } else {
            labels.contains_key(term)
        }
    })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_pvc(&self, _namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        Ok(self.pvcs.lock().get(name).cloned())
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume, ClusterError> {
        self.pvs.lock().get(name).cloned().ok_or(ClusterError::NotFound {
            kind: "PersistentVolume",
            name: name.to_string(),
        })
    }

    async fn list_pods(&self, _namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>, ClusterError> {
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|pod| label_selector.is_none_or(|s| matches_selector(pod, s)))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, _namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        self.pods
            .lock()
            .iter()
            .find(|pod| pod_name(pod) == name)
            .cloned()
            .ok_or(ClusterError::NotFound {
                kind: "Pod",
                name: name.to_string(),
            })
    }

    async fn create_pod(&self, _namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let mut created = pod.clone();
        mark_ready(&mut created);
        self.created.lock().push(pod.clone());
        self.pods.lock().push(created.clone());
        Ok(created)
    }

    async fn add_ephemeral_container(
        &self,
        _namespace: &str,
        target: &str,
        container: &EphemeralContainer,
    ) -> Result<(), ClusterError> {
        if *self.reject_patch.lock() {
            return Err(ClusterError::Rejected("ephemeral containers disabled".to_string()));
        }
        self.patches
            .lock()
            .push((target.to_string(), container.clone()));
        let status = match self.terminate_injected.lock().clone() {
            Some(reason) => terminated_status(&container.name, &reason),
            None => running_status(&container.name),
        };
        let mut pods = self.pods.lock();
        if let Some(pod) = pods.iter_mut().find(|pod| pod_name(pod) == target) {
            pod.spec
                .get_or_insert_with(Default::default)
                .ephemeral_containers
                .get_or_insert_with(Vec::new)
                .push(container.clone());
            pod.status
                .get_or_insert_with(Default::default)
                .ephemeral_container_statuses
                .get_or_insert_with(Vec::new)
                .push(status);
        }
        Ok(())
    }

    async fn delete_pod(&self, _namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.deleted.lock().push(name.to_string());
        self.pods.lock().retain(|pod| pod_name(pod) != name);
        Ok(())
    }
}

pub struct NoopChild;

impl ChildProcess for NoopChild {
    fn id(&self) -> Option<u32> {
        Some(1)
    }
    fn try_exit_code(&mut self) -> Option<Option<i32>> {
        None
    }
    fn kill(&mut self) {}
    fn release(self: Box<Self>) -> Option<u32> {
        Some(1)
    }
}

/// Records every command; everything succeeds.
#[derive(Default)]
pub struct RecordingRunner {
    pub runs: Mutex<Vec<CommandSpec>>,
    pub spawns: Mutex<Vec<CommandSpec>>,
}

#[async_trait]
impl ProcessRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        self.runs.lock().push(command.clone());
        Ok(CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        })
    }

    fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ChildProcess>, ProcessError> {
        self.spawns.lock().push(command.clone());
        Ok(Box::new(NoopChild))
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        Some(PathBuf::from("/usr/bin").join(program))
    }
}

pub struct StaticProbe(pub bool);

#[async_trait]
impl TransportProbe for StaticProbe {
    async fn probe(&self, _transport: TransportKind, _local_port: u16) -> bool {
        self.0
    }
}
