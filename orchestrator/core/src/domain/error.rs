// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::cluster::ClusterError;
use crate::domain::process::ProcessError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Every fatal outcome of a `mount` or `clean` run.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("PersistentVolumeClaim {namespace}/{pvc} not found")]
    NotFound { namespace: String, pvc: String },

    #[error("PersistentVolumeClaim {namespace}/{pvc} is not bound (phase: {phase})")]
    NotBound {
        namespace: String,
        pvc: String,
        phase: String,
    },

    #[error("Failed to create pod {pod}: {reason}")]
    PodCreate { pod: String, reason: String },

    #[error("Failed to inject ephemeral container into pod {pod}: {reason}")]
    Patch { pod: String, reason: String },

    #[error("Timed out after {timeout:?} waiting for {what}")]
    ReadinessTimeout { what: String, timeout: Duration },

    #[error("Ephemeral container {container} in pod {pod} terminated: {reason}")]
    ContainerTerminated {
        pod: String,
        container: String,
        reason: String,
    },

    #[error("An exposer container {container} is already running in pod {pod}; run `clean` first")]
    ExposerAlreadyRunning { pod: String, container: String },

    #[error("Port-forward tunnel failed: {0}")]
    Tunnel(String),

    #[error("Mounting {path} failed after {attempts} attempt(s): {last_error}")]
    MountFailed {
        path: PathBuf,
        attempts: u32,
        last_error: String,
    },

    #[error("Unmounting {path} failed: {reason}")]
    UnmountFailed { path: PathBuf, reason: String },

    #[error("No exposer resources found for PersistentVolumeClaim {namespace}/{pvc}; cleanup was only partial")]
    NoMatchingPod { namespace: String, pvc: String },

    #[error("Cleanup of {namespace}/{pvc} incomplete: could not stop exposer container(s) {}", .containers.join(", "))]
    PartialCleanup {
        namespace: String,
        pvc: String,
        /// `pod/container` pairs still running.
        containers: Vec<String>,
    },

    #[error("Required program '{program}' not found on PATH")]
    MissingDependency { program: String },

    #[error("Local mount path {path} is not usable: {reason}")]
    InvalidMountPath { path: PathBuf, reason: String },

    #[error("Failed to prepare session credentials: {0}")]
    Credential(String),

    #[error("Cluster request failed: {0}")]
    Cluster(#[from] ClusterError),

    #[error("Process error: {0}")]
    Process(#[from] ProcessError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MountError {
    /// Short stable name, used in logs and by the CLI.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFoundError",
            Self::NotBound { .. } => "NotBoundError",
            Self::PodCreate { .. } => "PodCreateError",
            Self::Patch { .. } => "PatchError",
            Self::ReadinessTimeout { .. } | Self::ContainerTerminated { .. } => {
                "ReadinessTimeoutError"
            }
            Self::ExposerAlreadyRunning { .. } => "ExposerAlreadyRunningError",
            Self::Tunnel(_) => "TunnelError",
            Self::MountFailed { .. } => "MountFailed",
            Self::UnmountFailed { .. } => "UnmountFailed",
            Self::NoMatchingPod { .. } => "NoMatchingPodError",
            Self::PartialCleanup { .. } => "PartialCleanupError",
            Self::MissingDependency { .. } => "MissingDependencyError",
            Self::InvalidMountPath { .. } => "InvalidMountPathError",
            Self::Credential(_) => "CredentialError",
            Self::Cluster(_) => "ClusterError",
            Self::Process(_) => "ProcessError",
            Self::Cancelled => "Cancelled",
        }
    }
}
