// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Readiness Prober
//!
//! Three bounded polling loops: pod Ready condition, named ephemeral container
//! Running, and protocol readiness over a forwarded local port. Each loop polls at
//! a fixed interval, gives up with an error once its deadline passes, and returns
//! [`MountError::Cancelled`] as soon as the run's token fires.

use crate::domain::cluster::ClusterClient;
use crate::domain::error::MountError;
use crate::domain::session::ContainerPhase;
use crate::domain::transport::{TransportKind, TransportProbe};
use crate::infrastructure::tunnel::PortForward;
use k8s_openapi::api::core::v1::Pod;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Last reported state of the ephemeral container `name` in `pod`.
pub fn container_phase(pod: &Pod, name: &str) -> ContainerPhase {
    let Some(status) = pod
        .status
        .as_ref()
        .and_then(|s| s.ephemeral_container_statuses.as_ref())
        .and_then(|statuses| statuses.iter().find(|s| s.name == name))
    else {
        return ContainerPhase::Missing;
    };

    let Some(state) = status.state.as_ref() else {
        return ContainerPhase::Waiting(None);
    };
    if state.running.is_some() {
        ContainerPhase::Running
    } else if let Some(terminated) = &state.terminated {
        let reason = terminated
            .reason
            .clone()
            .or_else(|| terminated.message.clone())
            .unwrap_or_else(|| format!("exit code {}", terminated.exit_code));
        ContainerPhase::Terminated {
            reason,
            exit_code: terminated.exit_code,
        }
    } else {
        ContainerPhase::Waiting(state.waiting.as_ref().and_then(|w| w.reason.clone()))
    }
}

/// `Ready=True` condition present.
pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn pod_failure(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    if status.phase.as_deref() != Some("Failed") {
        return None;
    }
    Some(
        status
            .reason
            .clone()
            .or_else(|| status.message.clone())
            .unwrap_or_else(|| "pod failed".to_string()),
    )
}

pub struct ReadinessProber {
    cluster: Arc<dyn ClusterClient>,
    probe: Arc<dyn TransportProbe>,
    poll_interval: Duration,
    ready_timeout: Duration,
    transport_timeout: Duration,
}

impl ReadinessProber {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        probe: Arc<dyn TransportProbe>,
        poll_interval: Duration,
        ready_timeout: Duration,
        transport_timeout: Duration,
    ) -> Self {
        Self {
            cluster,
            probe,
            poll_interval,
            ready_timeout,
            transport_timeout,
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<(), MountError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(MountError::Cancelled),
            _ = tokio::time::sleep(self.poll_interval) => Ok(()),
        }
    }

    /// Poll until the pod reports `Ready=True`. Returns the ready pod.
    pub async fn wait_pod_ready(
        &self,
        namespace: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Pod, MountError> {
        let deadline = Instant::now() + self.ready_timeout;
        info!("Waiting for pod {}/{} to become ready", namespace, name);
        loop {
            if cancel.is_cancelled() {
                return Err(MountError::Cancelled);
            }
            match self.cluster.get_pod(namespace, name).await {
                Ok(pod) if pod_is_ready(&pod) => {
                    info!("Pod {}/{} is ready", namespace, name);
                    return Ok(pod);
                }
                Ok(pod) => {
                    if let Some(reason) = pod_failure(&pod) {
                        return Err(MountError::ContainerTerminated {
                            pod: name.to_string(),
                            container: "volume-exposer".to_string(),
                            reason,
                        });
                    }
                }
                // Freshly created pods can lag behind the API for a moment.
                Err(e) if e.is_not_found() => debug!("Pod {}/{} not visible yet", namespace, name),
                Err(e) => return Err(e.into()),
            }
            if Instant::now() >= deadline {
                return Err(MountError::ReadinessTimeout {
                    what: format!("pod {}/{}", namespace, name),
                    timeout: self.ready_timeout,
                });
            }
            self.pause(cancel).await?;
        }
    }

    /// Poll until ephemeral container `container` in `pod` is Running.
    /// A terminated container fails immediately.
    pub async fn wait_ephemeral_running(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        cancel: &CancellationToken,
    ) -> Result<(), MountError> {
        let deadline = Instant::now() + self.ready_timeout;
        info!("Waiting for ephemeral container {} in {}/{}", container, namespace, pod);
        loop {
            if cancel.is_cancelled() {
                return Err(MountError::Cancelled);
            }
            let host = self.cluster.get_pod(namespace, pod).await?;
            match container_phase(&host, container) {
                ContainerPhase::Running => {
                    info!("Ephemeral container {} is running", container);
                    return Ok(());
                }
                ContainerPhase::Terminated { reason, exit_code } => {
                    return Err(MountError::ContainerTerminated {
                        pod: pod.to_string(),
                        container: container.to_string(),
                        reason: format!("{} (exit code {})", reason, exit_code),
                    });
                }
                ContainerPhase::Waiting(reason) => {
                    debug!("Ephemeral container {} waiting: {:?}", container, reason)
                }
                ContainerPhase::Missing => debug!("Ephemeral container {} has no status yet", container),
            }
            if Instant::now() >= deadline {
                return Err(MountError::ReadinessTimeout {
                    what: format!("ephemeral container {} in {}/{}", container, namespace, pod),
                    timeout: self.ready_timeout,
                });
            }
            self.pause(cancel).await?;
        }
    }

    /// Probe the forwarded port until the transport answers.
    ///
    /// Fails with a tunnel error if the forward process exits or the deadline passes.
    pub async fn wait_transport(
        &self,
        transport: TransportKind,
        forward: &mut PortForward,
        cancel: &CancellationToken,
    ) -> Result<(), MountError> {
        let deadline = Instant::now() + self.transport_timeout;
        let port = forward.local_port();
        loop {
            if let Some(code) = forward.exited() {
                return Err(MountError::Tunnel(format!(
                    "port-forward to {} exited early (status {:?})",
                    forward.target(),
                    code
                )));
            }
            let ready = tokio::select! {
                _ = cancel.cancelled() => return Err(MountError::Cancelled),
                ready = self.probe.probe(transport, port) => ready,
            };
            if ready {
                info!("{} transport ready on localhost:{}", transport, port);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(MountError::Tunnel(format!(
                    "{} transport on localhost:{} not ready after {:?}",
                    transport, port, self.transport_timeout
                )));
            }
            debug!("{} transport not ready on localhost:{}, retrying", transport, port);
            self.pause(cancel).await?;
        }
    }
}
