// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Mounter Configuration Types
//
// Defines the configuration schema for pv-mounter runs:
// - Kubernetes-style manifest format (apiVersion/kind/spec)
// - Exposer images per transport and privilege profile
// - Resource requests/limits for exposer pods
// - Polling, timeout and retry tunables
//
// Every field has a default, so an empty or missing file is a valid configuration.

use crate::domain::transport::{PrivilegeProfile, TransportKind};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "pv-mounter/v1";
pub const KIND: &str = "MounterConfig";
pub const CONFIG_ENV_VAR: &str = "PV_MOUNTER_CONFIG";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MounterConfig {
    /// API version (must be "pv-mounter/v1")
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    /// Resource kind (must be "MounterConfig")
    #[serde(default = "default_kind")]
    pub kind: String,

    #[serde(default)]
    pub spec: MounterSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MounterSpec {
    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub images: ImageConfig,

    #[serde(default)]
    pub resources: ResourceSettings,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub ports: PortRangeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// kubectl binary used for port-forward and remote exec
    #[serde(default = "default_kubectl")]
    pub kubectl: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            kubectl: default_kubectl(),
        }
    }
}

/// Default exposer images. `--image` overrides whichever one would be chosen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_ssh_image")]
    pub ssh: String,
    #[serde(default = "default_ssh_privileged_image")]
    pub ssh_privileged: String,
    #[serde(default = "default_nfs_image")]
    pub nfs: String,
    #[serde(default = "default_nfs_privileged_image")]
    pub nfs_privileged: String,
}

impl ImageConfig {
    pub fn for_profile(&self, transport: TransportKind, privilege: PrivilegeProfile) -> &str {
        match (transport, privilege) {
            (TransportKind::Ssh, PrivilegeProfile::NonRoot) => &self.ssh,
            (TransportKind::Ssh, PrivilegeProfile::Root) => &self.ssh_privileged,
            (TransportKind::Nfs, PrivilegeProfile::NonRoot) => &self.nfs,
            (TransportKind::Nfs, PrivilegeProfile::Root) => &self.nfs_privileged,
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            ssh: default_ssh_image(),
            ssh_privileged: default_ssh_privileged_image(),
            nfs: default_nfs_image(),
            nfs_privileged: default_nfs_privileged_image(),
        }
    }
}

/// Requests and limits applied to exposer and proxy pods (Kubernetes quantity strings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSettings {
    #[serde(default = "default_cpu_request")]
    pub cpu_request: String,
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,
    #[serde(default = "default_memory_request")]
    pub memory_request: String,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    #[serde(default = "default_storage_request")]
    pub ephemeral_storage_request: String,
    #[serde(default = "default_storage_limit")]
    pub ephemeral_storage_limit: String,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            cpu_request: default_cpu_request(),
            cpu_limit: default_cpu_limit(),
            memory_request: default_memory_request(),
            memory_limit: default_memory_limit(),
            ephemeral_storage_request: default_storage_request(),
            ephemeral_storage_limit: default_storage_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Interval between readiness polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Bound on waiting for a pod or ephemeral container to become ready
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Bound on waiting for the forwarded transport to answer
    #[serde(default = "default_transport_timeout")]
    pub transport_timeout_secs: u64,

    /// Read deadline used by the NFS liveness probe
    #[serde(default = "default_nfs_probe_deadline")]
    pub nfs_probe_deadline_ms: u64,

    /// NFS mount attempts before giving up
    #[serde(default = "default_nfs_mount_attempts")]
    pub nfs_mount_attempts: u32,

    /// Fixed delay between NFS mount attempts
    #[serde(default = "default_nfs_mount_backoff")]
    pub nfs_mount_backoff_secs: u64,

    /// How long a cancelled run may spend on rollback before the process exits anyway
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn transport_timeout(&self) -> Duration {
        Duration::from_secs(self.transport_timeout_secs)
    }

    pub fn nfs_probe_deadline(&self) -> Duration {
        Duration::from_millis(self.nfs_probe_deadline_ms)
    }

    pub fn nfs_mount_backoff(&self) -> Duration {
        Duration::from_secs(self.nfs_mount_backoff_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            ready_timeout_secs: default_ready_timeout(),
            transport_timeout_secs: default_transport_timeout(),
            nfs_probe_deadline_ms: default_nfs_probe_deadline(),
            nfs_mount_attempts: default_nfs_mount_attempts(),
            nfs_mount_backoff_secs: default_nfs_mount_backoff(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// Range the per-run local forward port is drawn from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRangeConfig {
    #[serde(default = "default_port_min")]
    pub local_min: u16,
    #[serde(default = "default_port_max")]
    pub local_max: u16,
}

impl PortRangeConfig {
    pub fn range(&self) -> RangeInclusive<u16> {
        self.local_min..=self.local_max
    }
}

impl Default for PortRangeConfig {
    fn default() -> Self {
        Self {
            local_min: default_port_min(),
            local_max: default_port_max(),
        }
    }
}

impl Default for MounterConfig {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            spec: MounterSpec::default(),
        }
    }
}

impl MounterConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Configuration file locations in precedence order, existing or not.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./pv-mounter.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".pv-mounter").join("config.yaml"));
        }
        paths.push(PathBuf::from("/etc/pv-mounter/config.yaml"));
        paths
    }

    /// Discover configuration file using precedence order
    /// 1. PV_MOUNTER_CONFIG environment variable
    /// 2. ./pv-mounter.yaml (working directory)
    /// 3. ~/.pv-mounter/config.yaml (user home)
    /// 4. /etc/pv-mounter/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|path| path.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must load
        if let Some(path) = cli_path {
            tracing::debug!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            config.validate()?;
            return Ok(config);
        }

        let mut config = match Self::discover_config() {
            Some(path) => {
                tracing::debug!("Loading configuration from discovered path: {:?}", path);
                Self::from_yaml_file(&path)
                    .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?
            }
            None => {
                tracing::debug!("No configuration file found, using built-in defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PV_MOUNTER_KUBECTL") {
            if !val.is_empty() {
                tracing::debug!("Environment override: PV_MOUNTER_KUBECTL={}", val);
                self.spec.tools.kubectl = val;
            }
        }

        for (var, target) in [
            (
                "PV_MOUNTER_POLL_INTERVAL_SECS",
                &mut self.spec.timing.poll_interval_secs,
            ),
            (
                "PV_MOUNTER_READY_TIMEOUT_SECS",
                &mut self.spec.timing.ready_timeout_secs,
            ),
        ] {
            if let Ok(val) = std::env::var(var) {
                match val.parse::<u64>() {
                    Ok(secs) => {
                        tracing::debug!("Environment override: {}={}", var, secs);
                        *target = secs;
                    }
                    Err(_) => tracing::warn!(
                        "Invalid value for {}: '{}'. Expected seconds. Ignoring.",
                        var,
                        val
                    ),
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.spec.tools.kubectl.is_empty() {
            anyhow::bail!("spec.tools.kubectl cannot be empty");
        }

        let timing = &self.spec.timing;
        if timing.poll_interval_secs == 0 {
            anyhow::bail!("spec.timing.poll_interval_secs must be greater than zero");
        }
        if timing.ready_timeout_secs < timing.poll_interval_secs {
            anyhow::bail!("spec.timing.ready_timeout_secs must not be shorter than the poll interval");
        }
        if timing.nfs_mount_attempts == 0 {
            anyhow::bail!("spec.timing.nfs_mount_attempts must be at least 1");
        }

        let ports = &self.spec.ports;
        if ports.local_min < 1024 || ports.local_min > ports.local_max {
            anyhow::bail!(
                "spec.ports must satisfy 1024 <= local_min <= local_max (got {}..={})",
                ports.local_min,
                ports.local_max
            );
        }

        Ok(())
    }
}

// Default value functions
fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

fn default_kubectl() -> String {
    "kubectl".to_string()
}

fn default_ssh_image() -> String {
    "docker.io/bfenski/volume-exposer:latest".to_string()
}

fn default_ssh_privileged_image() -> String {
    "docker.io/bfenski/volume-exposer-privileged:latest".to_string()
}

fn default_nfs_image() -> String {
    "docker.io/bfenski/volume-exposer-nfs:latest".to_string()
}

fn default_nfs_privileged_image() -> String {
    "docker.io/bfenski/volume-exposer-nfs-privileged:latest".to_string()
}

fn default_cpu_request() -> String {
    "10m".to_string()
}

fn default_cpu_limit() -> String {
    "100m".to_string()
}

fn default_memory_request() -> String {
    "50Mi".to_string()
}

fn default_memory_limit() -> String {
    "100Mi".to_string()
}

fn default_storage_request() -> String {
    "1Mi".to_string()
}

fn default_storage_limit() -> String {
    "10Mi".to_string()
}

fn default_poll_interval() -> u64 {
    2
}

fn default_ready_timeout() -> u64 {
    120
}

fn default_transport_timeout() -> u64 {
    30
}

fn default_nfs_probe_deadline() -> u64 {
    500
}

fn default_nfs_mount_attempts() -> u32 {
    5
}

fn default_nfs_mount_backoff() -> u64 {
    3
}

fn default_shutdown_grace() -> u64 {
    5
}

/// Start of the IANA dynamic/private range.
fn default_port_min() -> u16 {
    49152
}

fn default_port_max() -> u16 {
    65535
}
