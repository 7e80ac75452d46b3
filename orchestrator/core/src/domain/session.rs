// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mount session model
//!
//! Holds the strategy decision table, the orchestration phase machine and the
//! per-run [`MountSession`] record.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure decisions, no I/O

use crate::domain::transport::{PrivilegeProfile, TransportKind};
use crate::domain::volume::{OccupancyState, PodRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Label selector value every exposer pod carries under `app`.
pub const EXPOSER_APP_LABEL: &str = "volume-exposer";
pub const LABEL_APP: &str = "app";
pub const LABEL_PVC_NAME: &str = "pvcName";
pub const LABEL_PORT_NUMBER: &str = "portNumber";
pub const LABEL_BACKEND: &str = "backend";
pub const LABEL_ORIGINAL_POD: &str = "originalPodName";

/// How the remote side of a mount is set up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MountStrategy {
    /// A dedicated exposer pod binds the PVC directly.
    Standalone,
    /// A proxy pod plus a reverse-tunnel ephemeral container in the holder pod.
    ProxyTunnel,
    /// An NFS re-export ephemeral container in the holder pod, forwarded to directly.
    DirectEphemeral,
}

impl fmt::Display for MountStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Standalone => "standalone",
            Self::ProxyTunnel => "proxy-tunnel",
            Self::DirectEphemeral => "direct-ephemeral",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Occupancy {
    Free,
    Held,
}

/// Occupancy × transport → strategy.
const STRATEGY_TABLE: [(Occupancy, TransportKind, MountStrategy); 4] = [
    (Occupancy::Free, TransportKind::Ssh, MountStrategy::Standalone),
    (Occupancy::Free, TransportKind::Nfs, MountStrategy::Standalone),
    (Occupancy::Held, TransportKind::Ssh, MountStrategy::ProxyTunnel),
    (Occupancy::Held, TransportKind::Nfs, MountStrategy::DirectEphemeral),
];

/// Pick the strategy for a classified volume and requested transport.
pub fn select_strategy(occupancy: &OccupancyState, transport: TransportKind) -> MountStrategy {
    let key = match occupancy {
        OccupancyState::Free => Occupancy::Free,
        OccupancyState::HeldBy(_) => Occupancy::Held,
    };
    STRATEGY_TABLE
        .iter()
        .find(|(occ, kind, _)| *occ == key && *kind == transport)
        .map(|(_, _, strategy)| *strategy)
        // The table is total over both enums.
        .unwrap_or(MountStrategy::Standalone)
}

/// Orchestration phases. Every phase may fail into `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MountPhase {
    Init,
    Classified,
    StrategySelected,
    RemoteReady,
    TunnelEstablished,
    Mounted,
    Aborted,
}

impl MountPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Mounted | Self::Aborted)
    }

    fn successor(&self) -> Option<Self> {
        match self {
            Self::Init => Some(Self::Classified),
            Self::Classified => Some(Self::StrategySelected),
            Self::StrategySelected => Some(Self::RemoteReady),
            Self::RemoteReady => Some(Self::TunnelEstablished),
            Self::TunnelEstablished => Some(Self::Mounted),
            Self::Mounted | Self::Aborted => None,
        }
    }
}

impl fmt::Display for MountPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Linear phase tracker for one orchestration run.
#[derive(Debug)]
pub struct PhaseTracker {
    current: MountPhase,
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self {
            current: MountPhase::Init,
        }
    }

    pub fn current(&self) -> MountPhase {
        self.current
    }

    /// Move to the next phase. Returns `false` (and stays put) on an out-of-order
    /// request or from a terminal phase.
    pub fn advance(&mut self, next: MountPhase) -> bool {
        if self.current.successor() == Some(next) {
            tracing::debug!(from = %self.current, to = %next, "mount phase transition");
            self.current = next;
            true
        } else {
            false
        }
    }

    /// Record failure. Returns the phase that was interrupted.
    pub fn abort(&mut self) -> MountPhase {
        let interrupted = self.current;
        if !self.current.is_terminal() {
            self.current = MountPhase::Aborted;
        }
        interrupted
    }
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle state of an ephemeral container, as last reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerPhase {
    Missing,
    Waiting(Option<String>),
    Running,
    Terminated { reason: String, exit_code: i32 },
}

/// An ephemeral container the cluster owns; we only observe it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EphemeralContainerRef {
    pub name: String,
    pub host_pod: PodRef,
    pub state: ContainerPhase,
}

/// Everything one orchestration run set up. Owned by that run only.
#[derive(Debug, Clone)]
pub struct MountSession {
    pub strategy: MountStrategy,
    pub transport: TransportKind,
    pub privilege: PrivilegeProfile,
    /// Pod the port-forward targets: the exposer, the proxy, or the holder pod.
    pub remote_pod: PodRef,
    pub ephemeral_container: Option<String>,
    pub local_port: u16,
    pub remote_port: u16,
    pub public_key: Option<String>,
    pub key_file: Option<PathBuf>,
}

/// Short random suffix shared by the names created in one run.
pub fn session_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

pub fn exposer_pod_name(suffix: &str) -> String {
    format!("volume-exposer-{}", suffix)
}

pub fn proxy_pod_name(suffix: &str) -> String {
    format!("volume-exposer-proxy-{}", suffix)
}

/// Name prefix marking our ephemeral containers for a transport.
pub fn ephemeral_prefix(transport: TransportKind) -> String {
    format!("volume-exposer-{}-ephemeral", transport.as_str())
}

pub fn ephemeral_container_name(transport: TransportKind, suffix: &str) -> String {
    format!("{}-{}", ephemeral_prefix(transport), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_table_is_total() {
        let held = OccupancyState::HeldBy(PodRef::new("ns1", "worker-1"));
        assert_eq!(
            select_strategy(&OccupancyState::Free, TransportKind::Ssh),
            MountStrategy::Standalone
        );
        assert_eq!(
            select_strategy(&OccupancyState::Free, TransportKind::Nfs),
            MountStrategy::Standalone
        );
        assert_eq!(select_strategy(&held, TransportKind::Ssh), MountStrategy::ProxyTunnel);
        assert_eq!(select_strategy(&held, TransportKind::Nfs), MountStrategy::DirectEphemeral);
    }

    #[test]
    fn test_phase_tracker_rejects_skips() {
        let mut tracker = PhaseTracker::new();
        assert!(!tracker.advance(MountPhase::RemoteReady));
        assert!(tracker.advance(MountPhase::Classified));
        assert!(tracker.advance(MountPhase::StrategySelected));
        assert_eq!(tracker.abort(), MountPhase::StrategySelected);
        assert_eq!(tracker.current(), MountPhase::Aborted);
        assert!(!tracker.advance(MountPhase::RemoteReady));
    }

    #[test]
    fn test_names_share_prefix() {
        let name = ephemeral_container_name(TransportKind::Nfs, "abcd1234");
        assert!(name.starts_with(&ephemeral_prefix(TransportKind::Nfs)));
        assert!(!name.starts_with(&ephemeral_prefix(TransportKind::Ssh)));
        assert_eq!(exposer_pod_name("abcd1234"), "volume-exposer-abcd1234");
    }
}
