// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Transport and privilege variants, fixed ports, and the transport probe seam.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Port the exposer's sshd listens on inside its container.
pub const SSH_PORT: u16 = 2137;
/// Port the proxy pod exposes for the reverse tunnel opened by an ephemeral container.
pub const PROXY_TUNNEL_PORT: u16 = 6666;
/// Port the NFS re-export server listens on.
pub const NFS_PORT: u16 = 2049;

/// Network transport used to reach the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Ssh,
    Nfs,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ssh => "ssh",
            Self::Nfs => "nfs",
        }
    }

    /// Port the exposer serves on when the local client connects to it directly.
    pub fn service_port(&self) -> u16 {
        match self {
            Self::Ssh => SSH_PORT,
            Self::Nfs => NFS_PORT,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Self::Ssh),
            "nfs" => Ok(Self::Nfs),
            other => Err(format!("unknown backend '{}' (expected ssh or nfs)", other)),
        }
    }
}

/// Security posture of exposer containers. Strictly two-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PrivilegeProfile {
    Root,
    #[default]
    NonRoot,
}

impl PrivilegeProfile {
    pub fn from_needs_root(needs_root: bool) -> Self {
        if needs_root {
            Self::Root
        } else {
            Self::NonRoot
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }

    /// Remote login used by sshfs for this profile.
    pub fn ssh_user(&self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::NonRoot => "ve",
        }
    }
}

/// Protocol-aware liveness check against a forwarded local port.
#[async_trait]
pub trait TransportProbe: Send + Sync {
    /// One probe attempt. `true` means the remote end is serving the protocol.
    async fn probe(&self, transport: TransportKind, local_port: u16) -> bool;
}
