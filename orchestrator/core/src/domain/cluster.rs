// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Cluster client seam.
//!
//! The orchestrators only ever talk to Kubernetes through [`ClusterClient`]; the
//! kube-backed implementation lives in `infrastructure::kube_client`, tests use
//! in-memory fakes.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EphemeralContainer, PersistentVolume, PersistentVolumeClaim, Pod};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("API request rejected: {0}")]
    Rejected(String),
    #[error("Failed to reach cluster: {0}")]
    Unavailable(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// `Ok(None)` when the claim does not exist.
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError>;
    async fn get_pv(&self, name: &str) -> Result<PersistentVolume, ClusterError>;
    /// Pods in listing order, optionally filtered by a label selector.
    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>, ClusterError>;
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError>;
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError>;
    /// Add one ephemeral container to a running pod.
    async fn add_ephemeral_container(
        &self,
        namespace: &str,
        pod_name: &str,
        container: &EphemeralContainer,
    ) -> Result<(), ClusterError>;
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError>;
}
