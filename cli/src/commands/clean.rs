// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `pv-mounter clean`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;

use pv_mounter_core::application::{CleanRequest, CleanupOrchestrator};
use pv_mounter_core::domain::config::MounterConfig;
use pv_mounter_core::domain::transport::TransportKind;
use pv_mounter_core::infrastructure::{KubeClusterClient, TokioProcessRunner};

#[derive(Args, Debug)]
pub struct CleanArgs {
    /// Namespace of the PersistentVolumeClaim
    pub namespace: String,

    /// Name of the PersistentVolumeClaim
    pub pvc_name: String,

    /// Local directory the volume was mounted on
    pub local_mount_point: PathBuf,

    /// Transport the volume was mounted with
    #[arg(long, env = "BACKEND", default_value = "ssh")]
    pub backend: TransportKind,
}

pub async fn execute(args: CleanArgs, config: MounterConfig, debug: bool) -> Result<()> {
    let cluster = KubeClusterClient::try_default()
        .await
        .context("Failed to connect to the Kubernetes cluster")?;
    let cleaner = CleanupOrchestrator::new(
        Arc::new(cluster),
        Arc::new(TokioProcessRunner::new()),
        &config,
        debug,
    );

    let request = CleanRequest {
        namespace: args.namespace,
        pvc_name: args.pvc_name,
        mount_path: args.local_mount_point,
        transport: args.backend,
    };
    let report = cleaner.clean(&request).await?;

    if report.unmounted {
        println!("  Unmounted {}", request.mount_path.display());
    }
    for pod in &report.deleted_pods {
        println!("  Deleted pod {}/{}", request.namespace, pod);
    }
    for container in &report.stopped_containers {
        println!("  Stopped exposer {}", container);
    }
    println!(
        "{}",
        format!("✓ Cleaned up {}/{}", request.namespace, request.pvc_name).green()
    );
    Ok(())
}
