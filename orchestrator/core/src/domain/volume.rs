// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume value objects and the occupancy rule.
//!
//! A [`VolumeHandle`] is a read-only snapshot of a PVC and its bound PV, fetched
//! fresh at the start of every run. [`OccupancyState`] is derived from it plus the
//! namespace's pod listing and is never cached across runs.

use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Access mode advertised by a persistent volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadWriteOnce,
    ReadWriteOncePod,
    ReadOnlyMany,
    ReadWriteMany,
}

impl AccessMode {
    /// Parse the Kubernetes wire spelling. Unknown modes yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ReadWriteOnce" => Some(Self::ReadWriteOnce),
            "ReadWriteOncePod" => Some(Self::ReadWriteOncePod),
            "ReadOnlyMany" => Some(Self::ReadOnlyMany),
            "ReadWriteMany" => Some(Self::ReadWriteMany),
            _ => None,
        }
    }
}

/// Phase of a PVC as reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundPhase {
    Bound,
    Pending,
    Lost,
    Other(String),
}

impl BoundPhase {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some("Bound") => Self::Bound,
            Some("Pending") | None => Self::Pending,
            Some("Lost") => Self::Lost,
            Some(other) => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for BoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bound => write!(f, "Bound"),
            Self::Pending => write!(f, "Pending"),
            Self::Lost => write!(f, "Lost"),
            Self::Other(phase) => write!(f, "{}", phase),
        }
    }
}

/// Snapshot of a PVC together with the access modes of its PV.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHandle {
    pub namespace: String,
    pub pvc_name: String,
    pub volume_name: String,
    pub access_modes: BTreeSet<AccessMode>,
    pub phase: BoundPhase,
}

impl VolumeHandle {
    /// Whether several consumers may mount the volume read-write at once.
    ///
    /// Shared volumes are always classified as free, whoever currently uses them.
    pub fn is_shared(&self) -> bool {
        self.access_modes.contains(&AccessMode::ReadWriteMany)
    }
}

/// Reference to a pod by namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PodRef {
    pub namespace: String,
    pub name: String,
}

impl PodRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Whether the volume is free to bind or already held by a workload pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OccupancyState {
    Free,
    HeldBy(PodRef),
}

/// Result of classifying a volume.
#[derive(Debug, Clone)]
pub struct Classification {
    pub volume: VolumeHandle,
    pub occupancy: OccupancyState,
    /// Pods that also reference an exclusive claim beyond the one picked as holder.
    /// Non-empty only in an unhealthy cluster; surfaced to the operator.
    pub other_claimants: Vec<String>,
}

/// Name of the pod volume that mounts `claim_name`, if the pod references the claim.
pub fn claim_volume_name(pod: &Pod, claim_name: &str) -> Option<String> {
    pod.spec
        .as_ref()?
        .volumes
        .as_ref()?
        .iter()
        .find(|volume| {
            volume
                .persistent_volume_claim
                .as_ref()
                .is_some_and(|source| source.claim_name == claim_name)
        })
        .map(|volume| volume.name.clone())
}

/// Derive occupancy from a pod listing.
///
/// Shared volumes are always free. For exclusive volumes the first pod in listing
/// order that references the claim holds it; any further referencing pods are
/// returned separately so the caller can flag them.
pub fn occupancy_from_pods(volume: &VolumeHandle, pods: &[Pod]) -> (OccupancyState, Vec<String>) {
    if volume.is_shared() {
        return (OccupancyState::Free, Vec::new());
    }

    let mut claimants = pods
        .iter()
        .filter(|pod| claim_volume_name(pod, &volume.pvc_name).is_some())
        .filter_map(|pod| pod.metadata.name.clone());

    match claimants.next() {
        Some(holder) => (
            OccupancyState::HeldBy(PodRef::new(volume.namespace.clone(), holder)),
            claimants.collect(),
        ),
        None => (OccupancyState::Free, Vec::new()),
    }
}
