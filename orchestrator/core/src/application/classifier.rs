// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Access Classifier
//!
//! Resolves a claim to its bound volume and decides whether a workload pod
//! currently holds it exclusively.

use crate::domain::cluster::ClusterClient;
use crate::domain::error::MountError;
use crate::domain::volume::{occupancy_from_pods, AccessMode, BoundPhase, Classification, VolumeHandle};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct VolumeAccessClassifier {
    cluster: Arc<dyn ClusterClient>,
}

impl VolumeAccessClassifier {
    pub fn new(cluster: Arc<dyn ClusterClient>) -> Self {
        Self { cluster }
    }

    pub async fn classify(&self, namespace: &str, pvc_name: &str) -> Result<Classification, MountError> {
        let pvc = self
            .cluster
            .get_pvc(namespace, pvc_name)
            .await?
            .ok_or_else(|| MountError::NotFound {
                namespace: namespace.to_string(),
                pvc: pvc_name.to_string(),
            })?;

        let phase = BoundPhase::parse(pvc.status.as_ref().and_then(|s| s.phase.as_deref()));
        let volume_name = pvc.spec.as_ref().and_then(|s| s.volume_name.clone());
        let volume_name = match (phase.clone(), volume_name) {
            (BoundPhase::Bound, Some(name)) if !name.is_empty() => name,
            (phase, _) => {
                return Err(MountError::NotBound {
                    namespace: namespace.to_string(),
                    pvc: pvc_name.to_string(),
                    phase: phase.to_string(),
                })
            }
        };

        let pv = self.cluster.get_pv(&volume_name).await?;
        let access_modes: BTreeSet<AccessMode> = pv
            .spec
            .as_ref()
            .and_then(|s| s.access_modes.as_ref())
            .map(|modes| modes.iter().filter_map(|m| AccessMode::parse(m)).collect())
            .unwrap_or_default();
        debug!(
            "PVC {}/{} bound to {} with access modes {:?}",
            namespace, pvc_name, volume_name, access_modes
        );

        let volume = VolumeHandle {
            namespace: namespace.to_string(),
            pvc_name: pvc_name.to_string(),
            volume_name,
            access_modes,
            phase,
        };

        let pods = if volume.is_shared() {
            Vec::new()
        } else {
            self.cluster.list_pods(namespace, None).await?
        };
        let (occupancy, other_claimants) = occupancy_from_pods(&volume, &pods);

        if !other_claimants.is_empty() {
            warn!(
                "PVC {}/{} is exclusive but referenced by several pods; using {:?}, also referenced by {:?}",
                namespace, pvc_name, occupancy, other_claimants
            );
        }
        info!("PVC {}/{} classified as {:?}", namespace, pvc_name, occupancy);

        Ok(Classification {
            volume,
            occupancy,
            other_claimants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::fakes::{workload_pod, FakeCluster};
    use crate::domain::volume::{OccupancyState, PodRef};
    use k8s_openapi::api::core::v1::PersistentVolumeClaimStatus;

    #[tokio::test]
    async fn test_missing_claim_is_not_found() {
        let cluster = Arc::new(FakeCluster::default());
        let err = VolumeAccessClassifier::new(cluster)
            .classify("ns1", "data")
            .await
            .unwrap_err();
        assert!(matches!(err, MountError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_pending_claim_is_not_bound() {
        let cluster = FakeCluster::with_volume("data", "pv-1", &["ReadWriteOnce"]);
        if let Some(pvc) = cluster.pvcs.lock().get_mut("data") {
            pvc.status = Some(PersistentVolumeClaimStatus {
                phase: Some("Pending".to_string()),
                ..Default::default()
            });
        }
        let err = VolumeAccessClassifier::new(Arc::new(cluster))
            .classify("ns1", "data")
            .await
            .unwrap_err();
        match err {
            MountError::NotBound { phase, .. } => assert_eq!(phase, "Pending"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shared_volume_ignores_pods() {
        let cluster = FakeCluster::with_volume("data", "pv-1", &["ReadWriteMany"]);
        cluster.add_pod(workload_pod("worker-1", "data"));
        let result = VolumeAccessClassifier::new(Arc::new(cluster))
            .classify("ns1", "data")
            .await
            .unwrap();
        assert_eq!(result.occupancy, OccupancyState::Free);
        assert_eq!(result.volume.volume_name, "pv-1");
    }

    #[tokio::test]
    async fn test_exclusive_volume_held_by_first_claimant() {
        let cluster = FakeCluster::with_volume("data", "pv-1", &["ReadWriteOnce"]);
        cluster.add_pod(workload_pod("unrelated", "other"));
        cluster.add_pod(workload_pod("worker-1", "data"));
        cluster.add_pod(workload_pod("worker-2", "data"));
        let result = VolumeAccessClassifier::new(Arc::new(cluster))
            .classify("ns1", "data")
            .await
            .unwrap();
        assert_eq!(result.occupancy, OccupancyState::HeldBy(PodRef::new("ns1", "worker-1")));
        assert_eq!(result.other_claimants, vec!["worker-2".to_string()]);
    }

    #[tokio::test]
    async fn test_unreferenced_exclusive_volume_is_free() {
        let cluster = FakeCluster::with_volume("data", "pv-1", &["ReadWriteOnce"]);
        let result = VolumeAccessClassifier::new(Arc::new(cluster))
            .classify("ns1", "data")
            .await
            .unwrap();
        assert_eq!(result.occupancy, OccupancyState::Free);
    }
}
