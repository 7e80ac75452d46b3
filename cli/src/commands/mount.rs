// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `pv-mounter mount`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use pv_mounter_core::application::{MountOrchestrator, MountOutcome, MountRequest};
use pv_mounter_core::domain::config::MounterConfig;
use pv_mounter_core::domain::transport::{PrivilegeProfile, TransportKind};
use pv_mounter_core::infrastructure::{
    ForwardRegistry, KubeClusterClient, TcpTransportProbe, TempFileRegistry, TokioProcessRunner,
};

use crate::signals;

#[derive(Args, Debug)]
pub struct MountArgs {
    /// Namespace of the PersistentVolumeClaim
    pub namespace: String,

    /// Name of the PersistentVolumeClaim
    pub pvc_name: String,

    /// Existing local directory to mount on
    pub local_mount_point: PathBuf,

    /// Run exposers as root (needed when files are owned by other users)
    #[arg(long, env = "NEEDS_ROOT")]
    pub needs_root: bool,

    /// Transport used to reach the volume
    #[arg(long, env = "BACKEND", default_value = "ssh")]
    pub backend: TransportKind,

    /// Exposer image, overriding the configured default
    #[arg(long, env = "IMAGE")]
    pub image: Option<String>,

    /// Image pull secret for exposer pods
    #[arg(long, env = "IMAGE_SECRET")]
    pub image_secret: Option<String>,

    /// CPU limit for exposer pods (Kubernetes quantity, e.g. 250m)
    #[arg(long, env = "CPU_LIMIT")]
    pub cpu_limit: Option<String>,
}

impl MountArgs {
    pub fn to_request(&self) -> MountRequest {
        MountRequest {
            namespace: self.namespace.clone(),
            pvc_name: self.pvc_name.clone(),
            mount_path: self.local_mount_point.clone(),
            transport: self.backend,
            privilege: PrivilegeProfile::from_needs_root(self.needs_root),
            image: self.image.clone(),
            image_pull_secret: self.image_secret.clone(),
            cpu_limit: self.cpu_limit.clone(),
        }
    }
}

pub async fn execute(args: MountArgs, config: MounterConfig, debug: bool) -> Result<()> {
    let request = args.to_request();
    let registry = Arc::new(TempFileRegistry::new());
    let forwards = Arc::new(ForwardRegistry::new());
    let cancel = CancellationToken::new();
    let watcher = signals::spawn_watcher(
        cancel.clone(),
        registry.clone(),
        forwards.clone(),
        config.spec.timing.shutdown_grace(),
    );

    let cluster = KubeClusterClient::try_default()
        .await
        .context("Failed to connect to the Kubernetes cluster")?;
    let probe = TcpTransportProbe::new(config.spec.timing.nfs_probe_deadline());
    let orchestrator = MountOrchestrator::new(
        Arc::new(cluster),
        Arc::new(TokioProcessRunner::new()),
        Arc::new(probe),
        registry.clone(),
        config,
        debug,
    )
    .with_forward_registry(forwards);

    let result = orchestrator.mount(&request, &cancel).await;

    let removed = registry.cleanup_all();
    if removed > 0 {
        debug!("Removed {} leftover key file(s)", removed);
    }
    watcher.abort();

    let outcome = result?;
    print_summary(&outcome);
    Ok(())
}

/// Command that undoes a successful mount.
pub fn clean_command(outcome: &MountOutcome) -> String {
    let mut command = format!(
        "pv-mounter clean {} {} {}",
        outcome.namespace,
        outcome.pvc_name,
        outcome.mount_path.display()
    );
    if outcome.session.transport != TransportKind::Ssh {
        command.push_str(&format!(" --backend {}", outcome.session.transport));
    }
    command
}

fn print_summary(outcome: &MountOutcome) {
    let session = &outcome.session;
    println!(
        "{}",
        format!(
            "✓ Mounted {}/{} at {}",
            outcome.namespace,
            outcome.pvc_name,
            outcome.mount_path.display()
        )
        .green()
    );
    println!("  Strategy:   {} ({})", session.strategy, session.transport);
    println!("  Remote pod: {}", session.remote_pod);
    if let Some(container) = &session.ephemeral_container {
        let note = if outcome.reused_container {
            " (reused)"
        } else {
            ""
        };
        println!("  Container:  {}{}", container, note);
    }
    println!("  Local port: {}", session.local_port);

    if !outcome.other_claimants.is_empty() {
        println!(
            "{}",
            format!(
                "⚠ Other pods also reference this exclusive claim: {}",
                outcome.other_claimants.join(", ")
            )
            .yellow()
        );
    }

    println!();
    println!("To unmount and remove the exposer:");
    println!("  {}", clean_command(outcome).bold());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_mounter_core::domain::session::{MountSession, MountStrategy};
    use pv_mounter_core::domain::volume::PodRef;

    fn outcome(transport: TransportKind) -> MountOutcome {
        MountOutcome {
            namespace: "ns1".to_string(),
            pvc_name: "data".to_string(),
            mount_path: PathBuf::from("/mnt/data"),
            session: MountSession {
                strategy: MountStrategy::Standalone,
                transport,
                privilege: PrivilegeProfile::NonRoot,
                remote_pod: PodRef::new("ns1", "volume-exposer-1a2b3c4d"),
                ephemeral_container: None,
                local_port: 40123,
                remote_port: 2137,
                public_key: None,
                key_file: None,
            },
            other_claimants: Vec::new(),
            reused_container: false,
            forward_pid: None,
        }
    }

    #[test]
    fn test_clean_command_mentions_backend_only_for_nfs() {
        assert_eq!(
            clean_command(&outcome(TransportKind::Ssh)),
            "pv-mounter clean ns1 data /mnt/data"
        );
        assert_eq!(
            clean_command(&outcome(TransportKind::Nfs)),
            "pv-mounter clean ns1 data /mnt/data --backend nfs"
        );
    }
}
