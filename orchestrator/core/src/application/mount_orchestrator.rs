// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mount Orchestrator
//!
//! Drives one `mount` run through its phases:
//!
//! ```text
//! Init → Classified → StrategySelected → RemoteReady → TunnelEstablished → Mounted
//!   └──────────────┴──────────────┴─────────────┴───────────────┴──→ Aborted
//! ```
//!
//! Rollback on failure is scoped: the port-forward dies when its [`PortForward`]
//! handle drops and the session key file is released by a guard. Remote resources
//! (created pods, injected containers) are left in place for inspection; `clean`
//! removes them.
//!
//! Re-running `mount` over SSH against a holder pod whose reverse-tunnel container
//! is still running rejoins that session: the surviving proxy pod is forwarded to
//! again with the keypair recovered from the container's environment.
//!
//! [`PortForward`]: crate::infrastructure::tunnel::PortForward

use crate::application::classifier::VolumeAccessClassifier;
use crate::application::cleanup::exposer_selector;
use crate::application::injector::EphemeralInjector;
use crate::application::readiness::{pod_is_ready, ReadinessProber};
use crate::domain::cluster::ClusterClient;
use crate::domain::config::MounterConfig;
use crate::domain::error::MountError;
use crate::domain::process::ProcessRunner;
use crate::domain::session::{
    ephemeral_container_name, exposer_pod_name, proxy_pod_name, select_strategy, session_suffix,
    MountPhase, MountSession, MountStrategy, PhaseTracker, LABEL_ORIGINAL_POD,
};
use crate::domain::transport::{
    PrivilegeProfile, TransportKind, TransportProbe, NFS_PORT, PROXY_TUNNEL_PORT,
};
use crate::domain::volume::{OccupancyState, PodRef};
use crate::infrastructure::credentials::{SessionKeyPair, TempFileRegistry};
use crate::infrastructure::local_mount::{
    required_programs, validate_mount_path, LocalMount, LocalMountExecutor,
};
use crate::infrastructure::tunnel::{pick_local_port, ForwardRegistry, TunnelManager};
use crate::infrastructure::workload::{
    build_exposer_pod, exposer_labels, ExposerRole, ExposerSpec, ENV_SSH_PRIVATE_KEY,
};
use k8s_openapi::api::core::v1::Pod;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

// ============================================================================
// Request / Outcome
// ============================================================================

/// One `mount` invocation.
#[derive(Debug, Clone)]
pub struct MountRequest {
    pub namespace: String,
    pub pvc_name: String,
    pub mount_path: PathBuf,
    pub transport: TransportKind,
    pub privilege: PrivilegeProfile,
    /// Overrides the configured image for every exposer container.
    pub image: Option<String>,
    pub image_pull_secret: Option<String>,
    pub cpu_limit: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MountOutcome {
    pub namespace: String,
    pub pvc_name: String,
    pub mount_path: PathBuf,
    /// `key_file` names a file that no longer exists once the run returns.
    pub session: MountSession,
    /// Pods that also reference an exclusive claim; worth an operator's look.
    pub other_claimants: Vec<String>,
    /// An already running ephemeral exposer was reused instead of injected.
    pub reused_container: bool,
    /// PID of the detached port-forward, kept alive for the mounted filesystem.
    pub forward_pid: Option<u32>,
}

/// Where the tunnel should point once the remote side is ready.
struct RemoteTarget {
    pod: PodRef,
    remote_port: u16,
    ephemeral_container: Option<String>,
    reused: bool,
}

/// A prepared proxy-tunnel session found still running in the cluster.
struct LiveProxySession {
    target: RemoteTarget,
    keys: SessionKeyPair,
}

// ============================================================================
// Orchestrator
// ============================================================================

pub struct MountOrchestrator {
    cluster: Arc<dyn ClusterClient>,
    runner: Arc<dyn ProcessRunner>,
    registry: Arc<TempFileRegistry>,
    config: MounterConfig,
    classifier: VolumeAccessClassifier,
    injector: EphemeralInjector,
    readiness: ReadinessProber,
    tunnels: TunnelManager,
    local: LocalMountExecutor,
}

impl MountOrchestrator {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        runner: Arc<dyn ProcessRunner>,
        probe: Arc<dyn TransportProbe>,
        registry: Arc<TempFileRegistry>,
        config: MounterConfig,
        debug: bool,
    ) -> Self {
        let timing = &config.spec.timing;
        let readiness = ReadinessProber::new(
            cluster.clone(),
            probe,
            timing.poll_interval(),
            timing.ready_timeout(),
            timing.transport_timeout(),
        );
        let tunnels = TunnelManager::new(runner.clone(), config.spec.tools.kubectl.clone(), debug);
        let local = LocalMountExecutor::new(
            runner.clone(),
            timing.nfs_mount_attempts,
            timing.nfs_mount_backoff(),
            debug,
        );
        Self {
            classifier: VolumeAccessClassifier::new(cluster.clone()),
            injector: EphemeralInjector::new(cluster.clone()),
            cluster,
            runner,
            registry,
            config,
            readiness,
            tunnels,
            local,
        }
    }

    /// Track port-forwards in a registry the signal watcher can reach.
    pub fn with_forward_registry(mut self, forwards: Arc<ForwardRegistry>) -> Self {
        self.tunnels = self.tunnels.with_registry(forwards);
        self
    }

    /// Replace the local mount executor (platform selection in tests).
    pub fn with_local_executor(mut self, local: LocalMountExecutor) -> Self {
        self.local = local;
        self
    }

    /// Run the whole mount sequence. On failure the error is returned unchanged
    /// after local rollback.
    pub async fn mount(
        &self,
        request: &MountRequest,
        cancel: &CancellationToken,
    ) -> Result<MountOutcome, MountError> {
        let mut phases = PhaseTracker::new();
        match self.drive(request, &mut phases, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let interrupted = phases.abort();
                error!(
                    phase = %interrupted,
                    kind = e.kind(),
                    "Mount of {}/{} aborted: {}",
                    request.namespace,
                    request.pvc_name,
                    e
                );
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        request: &MountRequest,
        phases: &mut PhaseTracker,
        cancel: &CancellationToken,
    ) -> Result<MountOutcome, MountError> {
        self.check_prerequisites(request.transport)?;
        validate_mount_path(&request.mount_path)?;

        let classification = self
            .classifier
            .classify(&request.namespace, &request.pvc_name)
            .await?;
        phases.advance(MountPhase::Classified);

        let strategy = select_strategy(&classification.occupancy, request.transport);
        phases.advance(MountPhase::StrategySelected);
        info!(
            strategy = %strategy,
            transport = %request.transport,
            "Mounting {}/{} at {}",
            request.namespace,
            request.pvc_name,
            request.mount_path.display()
        );

        let suffix = session_suffix();
        let local_port = pick_local_port(self.config.spec.ports.range());

        let live = match (strategy, &classification.occupancy) {
            (MountStrategy::ProxyTunnel, OccupancyState::HeldBy(holder)) => {
                self.find_live_proxy_session(request, holder).await?
            }
            _ => None,
        };
        let (live_target, keys) = match (live, request.transport) {
            (Some(live), _) => (Some(live.target), Some(live.keys)),
            (None, TransportKind::Ssh) => (None, Some(SessionKeyPair::generate()?)),
            (None, TransportKind::Nfs) => (None, None),
        };
        let key_file = match &keys {
            Some(keys) => Some(self.registry.write_private_key(keys)?),
            None => None,
        };
        let _key_guard = key_file.clone().map(|path| {
            let registry = self.registry.clone();
            scopeguard::guard(path, move |path| registry.release(&path))
        });

        if cancel.is_cancelled() {
            return Err(MountError::Cancelled);
        }

        let target = match (live_target, strategy, &classification.occupancy) {
            (Some(target), _, _) => target,
            (None, MountStrategy::ProxyTunnel, OccupancyState::HeldBy(holder)) => {
                let keys = keys
                    .as_ref()
                    .ok_or_else(|| MountError::Credential("no session key for SSH".to_string()))?;
                self.setup_proxy_tunnel(request, holder, &suffix, local_port, keys, cancel)
                    .await?
            }
            (None, MountStrategy::DirectEphemeral, OccupancyState::HeldBy(holder)) => {
                self.setup_direct_ephemeral(request, holder, &suffix, cancel)
                    .await?
            }
            _ => {
                self.setup_standalone(request, &suffix, local_port, keys.as_ref(), cancel)
                    .await?
            }
        };
        phases.advance(MountPhase::RemoteReady);

        let mut forward = self.tunnels.open(
            &target.pod.namespace,
            &target.pod.name,
            local_port,
            target.remote_port,
        )?;
        self.readiness
            .wait_transport(request.transport, &mut forward, cancel)
            .await?;
        phases.advance(MountPhase::TunnelEstablished);

        let mount = LocalMount {
            transport: request.transport,
            privilege: request.privilege,
            local_port,
            mount_path: request.mount_path.clone(),
            key_file: key_file.clone(),
        };
        self.local.mount(&mount, cancel).await?;
        phases.advance(MountPhase::Mounted);

        // The mounted filesystem keeps using the forward; `clean` stops it.
        let forward_pid = forward.detach();

        Ok(MountOutcome {
            namespace: request.namespace.clone(),
            pvc_name: request.pvc_name.clone(),
            mount_path: request.mount_path.clone(),
            session: MountSession {
                strategy,
                transport: request.transport,
                privilege: request.privilege,
                remote_pod: target.pod,
                ephemeral_container: target.ephemeral_container,
                local_port,
                remote_port: target.remote_port,
                public_key: keys.as_ref().map(|k| k.public_openssh().to_string()),
                key_file,
            },
            other_claimants: classification.other_claimants,
            reused_container: target.reused,
            forward_pid,
        })
    }

    fn check_prerequisites(&self, transport: TransportKind) -> Result<(), MountError> {
        let kubectl = self.config.spec.tools.kubectl.as_str();
        let needed = std::iter::once(kubectl)
            .chain(required_programs(self.local.platform(), transport).iter().copied());
        for program in needed {
            if self.runner.locate(program).is_none() {
                return Err(MountError::MissingDependency {
                    program: program.to_string(),
                });
            }
        }
        Ok(())
    }

    fn exposer_spec(&self, request: &MountRequest, role: ExposerRole, privilege: PrivilegeProfile) -> ExposerSpec {
        let image = request.image.clone().unwrap_or_else(|| {
            self.config
                .spec
                .images
                .for_profile(request.transport, privilege)
                .to_string()
        });
        ExposerSpec {
            role,
            transport: request.transport,
            privilege,
            image,
            public_key: None,
            private_key: None,
            proxy_pod_ip: None,
            resources: self.config.spec.resources.clone(),
            cpu_limit_override: request.cpu_limit.clone(),
            image_pull_secret: request.image_pull_secret.clone(),
        }
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod, MountError> {
        let name = pod.metadata.name.clone().unwrap_or_default();
        self.cluster
            .create_pod(namespace, pod)
            .await
            .map_err(|e| MountError::PodCreate {
                pod: name.clone(),
                reason: e.to_string(),
            })
            .inspect(|_| info!("Created pod {}/{}", namespace, name))
    }

    // ------------------------------------------------------------------------
    // Strategy handlers
    // ------------------------------------------------------------------------

    async fn setup_standalone(
        &self,
        request: &MountRequest,
        suffix: &str,
        local_port: u16,
        keys: Option<&SessionKeyPair>,
        cancel: &CancellationToken,
    ) -> Result<RemoteTarget, MountError> {
        let namespace = request.namespace.as_str();
        let name = exposer_pod_name(suffix);
        let labels = exposer_labels(&request.pvc_name, local_port, request.transport, None);

        let mut spec = self.exposer_spec(request, ExposerRole::Standalone, request.privilege);
        spec.public_key = keys.map(|k| k.public_openssh().to_string());

        let pod = build_exposer_pod(&name, namespace, labels, Some(request.pvc_name.as_str()), &spec);
        self.create_pod(namespace, &pod).await?;
        self.readiness.wait_pod_ready(namespace, &name, cancel).await?;

        Ok(RemoteTarget {
            pod: PodRef::new(namespace, name),
            remote_port: request.transport.service_port(),
            ephemeral_container: None,
            reused: false,
        })
    }

    /// A reverse-tunnel container already running in `holder` together with a
    /// ready proxy pod it points at.
    ///
    /// The container only trusts the key it was injected with, and its tunnel only
    /// reaches the proxy it was given, so both are reused. A running container
    /// whose proxy is gone cannot be rejoined.
    async fn find_live_proxy_session(
        &self,
        request: &MountRequest,
        holder: &PodRef,
    ) -> Result<Option<LiveProxySession>, MountError> {
        let Some(existing) = self.injector.find_running(holder, TransportKind::Ssh).await? else {
            return Ok(None);
        };
        let container = existing.container.name;
        let already_running = || MountError::ExposerAlreadyRunning {
            pod: holder.name.clone(),
            container: container.clone(),
        };

        let selector = format!(
            "{},{}={}",
            exposer_selector(&request.pvc_name, TransportKind::Ssh),
            LABEL_ORIGINAL_POD,
            holder.name
        );
        let proxies = self.cluster.list_pods(&holder.namespace, Some(&selector)).await?;
        let Some(proxy_name) = proxies
            .iter()
            .filter(|pod| pod_is_ready(pod))
            .find_map(|pod| pod.metadata.name.clone())
        else {
            warn!(
                "Container {} in {} is running but no ready proxy pod matches '{}'",
                container, holder, selector
            );
            return Err(already_running());
        };

        let Some(private_key) = existing.env.get(ENV_SSH_PRIVATE_KEY) else {
            warn!("Container {} in {} carries no session key", container, holder);
            return Err(already_running());
        };
        let keys = SessionKeyPair::from_private_openssh(private_key)?;

        info!(
            "Rejoining running session: container {} in {} via proxy {}",
            container, holder, proxy_name
        );
        Ok(Some(LiveProxySession {
            target: RemoteTarget {
                pod: PodRef::new(holder.namespace.clone(), proxy_name),
                remote_port: PROXY_TUNNEL_PORT,
                ephemeral_container: Some(container),
                reused: true,
            },
            keys,
        }))
    }

    async fn setup_proxy_tunnel(
        &self,
        request: &MountRequest,
        holder: &PodRef,
        suffix: &str,
        local_port: u16,
        keys: &SessionKeyPair,
        cancel: &CancellationToken,
    ) -> Result<RemoteTarget, MountError> {
        let namespace = request.namespace.as_str();
        let proxy_name = proxy_pod_name(suffix);
        let labels = exposer_labels(
            &request.pvc_name,
            local_port,
            TransportKind::Ssh,
            Some(holder.name.as_str()),
        );
        let mut proxy_spec = self.exposer_spec(request, ExposerRole::Proxy, PrivilegeProfile::NonRoot);
        proxy_spec.public_key = Some(keys.public_openssh().to_string());

        let proxy = build_exposer_pod(&proxy_name, namespace, labels, None, &proxy_spec);
        self.create_pod(namespace, &proxy).await?;
        let ready = self
            .readiness
            .wait_pod_ready(namespace, &proxy_name, cancel)
            .await?;
        let proxy_ip = ready
            .status
            .and_then(|s| s.pod_ip)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| MountError::PodCreate {
                pod: proxy_name.clone(),
                reason: "proxy pod is ready but has no IP address".to_string(),
            })?;

        let mut spec = self.exposer_spec(request, ExposerRole::Ephemeral, request.privilege);
        spec.public_key = Some(keys.public_openssh().to_string());
        spec.private_key = Some(keys.private_openssh().to_string());
        spec.proxy_pod_ip = Some(proxy_ip);

        let container = ephemeral_container_name(TransportKind::Ssh, suffix);
        let outcome = self
            .injector
            .inject(holder, &request.pvc_name, &container, &spec)
            .await?;
        self.readiness
            .wait_ephemeral_running(namespace, &holder.name, outcome.container_name(), cancel)
            .await?;

        Ok(RemoteTarget {
            pod: PodRef::new(namespace, proxy_name),
            remote_port: PROXY_TUNNEL_PORT,
            ephemeral_container: Some(outcome.container_name().to_string()),
            reused: outcome.is_reused(),
        })
    }

    async fn setup_direct_ephemeral(
        &self,
        request: &MountRequest,
        holder: &PodRef,
        suffix: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteTarget, MountError> {
        let spec = self.exposer_spec(request, ExposerRole::Ephemeral, request.privilege);
        let container = ephemeral_container_name(TransportKind::Nfs, suffix);
        let outcome = self
            .injector
            .inject(holder, &request.pvc_name, &container, &spec)
            .await?;
        self.readiness
            .wait_ephemeral_running(&holder.namespace, &holder.name, outcome.container_name(), cancel)
            .await?;

        Ok(RemoteTarget {
            pod: holder.clone(),
            remote_port: NFS_PORT,
            ephemeral_container: Some(outcome.container_name().to_string()),
            reused: outcome.is_reused(),
        })
    }
}
