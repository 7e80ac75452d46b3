// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! kube-backed [`ClusterClient`]
//!
//! Talks to the cluster with the ambient kubeconfig (or in-cluster config) through
//! `kube::Client::try_default`.

use crate::domain::cluster::{ClusterClient, ClusterError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{EphemeralContainer, PersistentVolume, PersistentVolumeClaim, Pod};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::Client;
use serde_json::json;
use tracing::debug;

pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    pub async fn try_default() -> Result<Self, ClusterError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ClusterError::Unavailable(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn map_err(kind: &'static str, name: &str, err: kube::Error) -> ClusterError {
    match err {
        kube::Error::Api(response) if response.code == 404 => ClusterError::NotFound {
            kind,
            name: name.to_string(),
        },
        kube::Error::Api(response) => ClusterError::Rejected(format!(
            "{} ({}): {}",
            response.reason, response.code, response.message
        )),
        other => ClusterError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>, ClusterError> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| map_err("PersistentVolumeClaim", name, e))
    }

    async fn get_pv(&self, name: &str) -> Result<PersistentVolume, ClusterError> {
        let api: Api<PersistentVolume> = Api::all(self.client.clone());
        api.get(name)
            .await
            .map_err(|e| map_err("PersistentVolume", name, e))
    }

    async fn list_pods(&self, namespace: &str, label_selector: Option<&str>) -> Result<Vec<Pod>, ClusterError> {
        let mut params = ListParams::default();
        if let Some(selector) = label_selector {
            params = params.labels(selector);
        }
        let list = self
            .pods(namespace)
            .list(&params)
            .await
            .map_err(|e| map_err("Pod", namespace, e))?;
        Ok(list.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, ClusterError> {
        self.pods(namespace)
            .get(name)
            .await
            .map_err(|e| map_err("Pod", name, e))
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, ClusterError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        debug!("Creating pod {}/{}", namespace, name);
        self.pods(namespace)
            .create(&PostParams::default(), pod)
            .await
            .map_err(|e| map_err("Pod", &name, e))
    }

    async fn add_ephemeral_container(
        &self,
        namespace: &str,
        pod_name: &str,
        container: &EphemeralContainer,
    ) -> Result<(), ClusterError> {
        debug!(
            "Patching pod {}/{} with ephemeral container {}",
            namespace, pod_name, container.name
        );
        // Strategic merge keyed on container name appends rather than replaces.
        let patch = json!({ "spec": { "ephemeralContainers": [container] } });
        self.pods(namespace)
            .patch_ephemeral_containers(pod_name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .map_err(|e| map_err("Pod", pod_name, e))?;
        Ok(())
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), ClusterError> {
        self.pods(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| map_err("Pod", name, e))?;
        Ok(())
    }
}
