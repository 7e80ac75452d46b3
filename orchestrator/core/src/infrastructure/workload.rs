// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Exposer workload builders
//!
//! Pure functions from an [`ExposerSpec`] to declarative Kubernetes objects: a
//! standalone/proxy [`Pod`] or an [`EphemeralContainer`] for injection into a pod
//! we do not own. The security posture is selected by [`PrivilegeProfile`] and the
//! protocol by [`TransportKind`]; nothing here performs I/O.

use crate::domain::config::ResourceSettings;
use crate::domain::session::{
    EXPOSER_APP_LABEL, LABEL_APP, LABEL_BACKEND, LABEL_ORIGINAL_POD, LABEL_PORT_NUMBER,
    LABEL_PVC_NAME,
};
use crate::domain::transport::{
    PrivilegeProfile, TransportKind, NFS_PORT, PROXY_TUNNEL_PORT, SSH_PORT,
};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, EnvVar, EphemeralContainer, LocalObjectReference,
    PersistentVolumeClaimVolumeSource, Pod, PodSecurityContext, PodSpec, ResourceRequirements,
    SeccompProfile, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Fixed UID/GID the unprivileged exposer runs as.
pub const NON_ROOT_ID: i64 = 2137;
/// Where the volume appears inside every exposer container.
pub const VOLUME_MOUNT_PATH: &str = "/volume";
const POD_VOLUME_NAME: &str = "target-volume";
const CONTAINER_NAME: &str = "volume-exposer";
/// Env var carrying the session private key into a reverse-tunnel container.
pub const ENV_SSH_PRIVATE_KEY: &str = "SSH_PRIVATE_KEY";

const ROOT_CAPABILITIES: [&str; 2] = ["SYS_ADMIN", "SYS_CHROOT"];
/// Minimal set an unprivileged NFS server needs to serve and chown files.
const NFS_CAPABILITIES: [&str; 6] = [
    "CHOWN",
    "DAC_OVERRIDE",
    "DAC_READ_SEARCH",
    "FOWNER",
    "SETGID",
    "SETUID",
];

/// What the exposer container is for. Passed to the image as `ROLE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExposerRole {
    Standalone,
    Proxy,
    Ephemeral,
}

impl ExposerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::Proxy => "proxy",
            Self::Ephemeral => "ephemeral",
        }
    }
}

/// Inputs shared by the pod and the ephemeral container builders.
#[derive(Debug, Clone)]
pub struct ExposerSpec {
    pub role: ExposerRole,
    pub transport: TransportKind,
    pub privilege: PrivilegeProfile,
    pub image: String,
    /// Authorized key installed in the exposer (SSH only).
    pub public_key: Option<String>,
    /// Identity the reverse-tunnel container uses to reach the proxy.
    pub private_key: Option<String>,
    pub proxy_pod_ip: Option<String>,
    pub resources: ResourceSettings,
    pub cpu_limit_override: Option<String>,
    pub image_pull_secret: Option<String>,
}

impl ExposerSpec {
    fn env(&self) -> Vec<EnvVar> {
        let mut vars = vec![
            env_var("ROLE", self.role.as_str()),
            env_var("BACKEND", self.transport.as_str()),
            env_var("NEEDS_ROOT", if self.privilege.is_root() { "true" } else { "false" }),
        ];

        if self.transport == TransportKind::Ssh {
            vars.push(env_var("SSH_PORT", &SSH_PORT.to_string()));
            if matches!(self.role, ExposerRole::Proxy | ExposerRole::Ephemeral) {
                vars.push(env_var("TUNNEL_PORT", &PROXY_TUNNEL_PORT.to_string()));
            }
        }
        if let Some(key) = &self.public_key {
            vars.push(env_var("SSH_KEY", key));
        }
        if let Some(key) = &self.private_key {
            vars.push(env_var(ENV_SSH_PRIVATE_KEY, key));
        }
        if let Some(ip) = &self.proxy_pod_ip {
            vars.push(env_var("PROXY_POD_IP", ip));
        }
        vars
    }

    fn ports(&self) -> Vec<ContainerPort> {
        let numbers: &[u16] = match (self.transport, self.role) {
            (TransportKind::Nfs, _) => &[NFS_PORT],
            (TransportKind::Ssh, ExposerRole::Standalone) => &[SSH_PORT],
            (TransportKind::Ssh, ExposerRole::Proxy) => &[SSH_PORT, PROXY_TUNNEL_PORT],
            // The reverse tunnel is outbound only.
            (TransportKind::Ssh, ExposerRole::Ephemeral) => &[],
        };
        numbers
            .iter()
            .map(|port| ContainerPort {
                container_port: i32::from(*port),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            })
            .collect()
    }

    fn resource_requirements(&self) -> ResourceRequirements {
        let r = &self.resources;
        let cpu_limit = self.cpu_limit_override.as_deref().unwrap_or(&r.cpu_limit);
        ResourceRequirements {
            requests: Some(quantities(&[
                ("cpu", r.cpu_request.as_str()),
                ("memory", r.memory_request.as_str()),
                ("ephemeral-storage", r.ephemeral_storage_request.as_str()),
            ])),
            limits: Some(quantities(&[
                ("cpu", cpu_limit),
                ("memory", r.memory_limit.as_str()),
                ("ephemeral-storage", r.ephemeral_storage_limit.as_str()),
            ])),
            ..Default::default()
        }
    }
}

/// Container security context for a profile.
pub fn security_context(privilege: PrivilegeProfile, transport: TransportKind) -> SecurityContext {
    match privilege {
        PrivilegeProfile::Root => SecurityContext {
            run_as_user: Some(0),
            run_as_group: Some(0),
            run_as_non_root: Some(false),
            capabilities: Some(Capabilities {
                add: Some(ROOT_CAPABILITIES.iter().map(|c| c.to_string()).collect()),
                drop: None,
            }),
            ..Default::default()
        },
        PrivilegeProfile::NonRoot => {
            let add = match transport {
                TransportKind::Nfs => Some(NFS_CAPABILITIES.iter().map(|c| c.to_string()).collect()),
                TransportKind::Ssh => None,
            };
            SecurityContext {
                run_as_user: Some(NON_ROOT_ID),
                run_as_group: Some(NON_ROOT_ID),
                run_as_non_root: Some(true),
                allow_privilege_escalation: Some(false),
                read_only_root_filesystem: Some(true),
                capabilities: Some(Capabilities {
                    add,
                    drop: Some(vec!["ALL".to_string()]),
                }),
                seccomp_profile: Some(runtime_default_seccomp()),
                ..Default::default()
            }
        }
    }
}

fn pod_security_context(privilege: PrivilegeProfile) -> Option<PodSecurityContext> {
    match privilege {
        PrivilegeProfile::Root => None,
        PrivilegeProfile::NonRoot => Some(PodSecurityContext {
            run_as_user: Some(NON_ROOT_ID),
            run_as_group: Some(NON_ROOT_ID),
            fs_group: Some(NON_ROOT_ID),
            run_as_non_root: Some(true),
            seccomp_profile: Some(runtime_default_seccomp()),
            ..Default::default()
        }),
    }
}

fn runtime_default_seccomp() -> SeccompProfile {
    SeccompProfile {
        type_: "RuntimeDefault".to_string(),
        localhost_profile: None,
    }
}

/// Labels `clean` uses to rediscover what `mount` created.
pub fn exposer_labels(
    pvc_name: &str,
    local_port: u16,
    transport: TransportKind,
    original_pod: Option<&str>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (LABEL_APP.to_string(), EXPOSER_APP_LABEL.to_string()),
        (LABEL_PVC_NAME.to_string(), pvc_name.to_string()),
        (LABEL_PORT_NUMBER.to_string(), local_port.to_string()),
    ]);
    if transport == TransportKind::Nfs {
        labels.insert(LABEL_BACKEND.to_string(), transport.as_str().to_string());
    }
    if let Some(pod) = original_pod {
        labels.insert(LABEL_ORIGINAL_POD.to_string(), pod.to_string());
    }
    labels
}

/// Build a standalone exposer or proxy pod. `pvc_name` binds the claim directly;
/// proxies pass `None`.
pub fn build_exposer_pod(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    pvc_name: Option<&str>,
    spec: &ExposerSpec,
) -> Pod {
    let volumes = pvc_name.map(|claim| {
        vec![Volume {
            name: POD_VOLUME_NAME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: claim.to_string(),
                read_only: Some(false),
            }),
            ..Default::default()
        }]
    });
    let volume_mounts = pvc_name.map(|_| {
        vec![VolumeMount {
            name: POD_VOLUME_NAME.to_string(),
            mount_path: VOLUME_MOUNT_PATH.to_string(),
            ..Default::default()
        }]
    });

    let container = Container {
        name: CONTAINER_NAME.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(spec.env()),
        ports: Some(spec.ports()),
        resources: Some(spec.resource_requirements()),
        security_context: Some(security_context(spec.privilege, spec.transport)),
        volume_mounts,
        ..Default::default()
    };

    let image_pull_secrets = spec.image_pull_secret.as_ref().map(|secret| {
        vec![LocalObjectReference {
            name: secret.clone(),
        }]
    });

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![container],
            volumes,
            image_pull_secrets,
            security_context: pod_security_context(spec.privilege),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build an ephemeral exposer that mounts the host pod's existing `volume_name`.
///
/// Ephemeral containers may not declare resources and inherit the host pod's pull
/// secrets, so those `ExposerSpec` fields are ignored here.
pub fn build_ephemeral_container(
    name: &str,
    volume_name: &str,
    spec: &ExposerSpec,
) -> EphemeralContainer {
    EphemeralContainer {
        name: name.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        env: Some(spec.env()),
        ports: Some(spec.ports()),
        security_context: Some(security_context(spec.privilege, spec.transport)),
        volume_mounts: Some(vec![VolumeMount {
            name: volume_name.to_string(),
            mount_path: VOLUME_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn quantities(entries: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), Quantity(value.to_string())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(role: ExposerRole, transport: TransportKind, privilege: PrivilegeProfile) -> ExposerSpec {
        ExposerSpec {
            role,
            transport,
            privilege,
            image: "registry.local/exposer:test".to_string(),
            public_key: Some("ssh-ed25519 AAAA test".to_string()),
            private_key: None,
            proxy_pod_ip: None,
            resources: ResourceSettings::default(),
            cpu_limit_override: None,
            image_pull_secret: None,
        }
    }

    fn env_value(vars: &[EnvVar], name: &str) -> Option<String> {
        vars.iter().find(|v| v.name == name).and_then(|v| v.value.clone())
    }

    #[test]
    fn test_non_root_profile_is_locked_down() {
        let ctx = security_context(PrivilegeProfile::NonRoot, TransportKind::Ssh);
        assert_eq!(ctx.run_as_user, Some(NON_ROOT_ID));
        assert_eq!(ctx.run_as_non_root, Some(true));
        assert_eq!(ctx.read_only_root_filesystem, Some(true));
        assert_eq!(ctx.allow_privilege_escalation, Some(false));
        let caps = ctx.capabilities.unwrap();
        assert_eq!(caps.drop, Some(vec!["ALL".to_string()]));
        assert!(caps.add.is_none());
        assert_eq!(ctx.seccomp_profile.unwrap().type_, "RuntimeDefault");
    }

    #[test]
    fn test_non_root_nfs_adds_minimal_capabilities() {
        let ctx = security_context(PrivilegeProfile::NonRoot, TransportKind::Nfs);
        let caps = ctx.capabilities.unwrap();
        let add = caps.add.unwrap();
        assert!(add.contains(&"CHOWN".to_string()));
        assert!(!add.contains(&"SYS_ADMIN".to_string()));
    }

    #[test]
    fn test_root_profile_grants_admin_capabilities() {
        let ctx = security_context(PrivilegeProfile::Root, TransportKind::Ssh);
        assert_eq!(ctx.run_as_user, Some(0));
        assert_eq!(ctx.run_as_non_root, Some(false));
        let add = ctx.capabilities.unwrap().add.unwrap();
        assert_eq!(add, vec!["SYS_ADMIN".to_string(), "SYS_CHROOT".to_string()]);
    }

    #[test]
    fn test_standalone_pod_binds_claim_and_carries_labels() {
        let labels = exposer_labels("data", 40123, TransportKind::Ssh, None);
        let mut s = spec(ExposerRole::Standalone, TransportKind::Ssh, PrivilegeProfile::NonRoot);
        s.cpu_limit_override = Some("250m".to_string());
        s.image_pull_secret = Some("regcred".to_string());
        let pod = build_exposer_pod("volume-exposer-abc", "ns1", labels, Some("data"), &s);

        let meta_labels = pod.metadata.labels.clone().unwrap();
        assert_eq!(meta_labels.get("app").map(String::as_str), Some("volume-exposer"));
        assert_eq!(meta_labels.get("pvcName").map(String::as_str), Some("data"));
        assert_eq!(meta_labels.get("portNumber").map(String::as_str), Some("40123"));
        assert!(!meta_labels.contains_key("backend"));

        let pod_spec = pod.spec.unwrap();
        let volume = &pod_spec.volumes.unwrap()[0];
        assert_eq!(volume.persistent_volume_claim.as_ref().unwrap().claim_name, "data");
        assert_eq!(pod_spec.image_pull_secrets.unwrap()[0].name, "regcred");

        let container = &pod_spec.containers[0];
        let limits = container.resources.as_ref().unwrap().limits.clone().unwrap();
        assert_eq!(limits.get("cpu"), Some(&Quantity("250m".to_string())));
        assert_eq!(
            container.ports.as_ref().unwrap()[0].container_port,
            i32::from(SSH_PORT)
        );
        let env = container.env.clone().unwrap();
        assert_eq!(env_value(&env, "ROLE").as_deref(), Some("standalone"));
        assert_eq!(env_value(&env, "SSH_KEY").as_deref(), Some("ssh-ed25519 AAAA test"));
    }

    #[test]
    fn test_proxy_pod_has_no_claim_and_names_original() {
        let labels = exposer_labels("data", 40123, TransportKind::Ssh, Some("worker-1"));
        let s = spec(ExposerRole::Proxy, TransportKind::Ssh, PrivilegeProfile::NonRoot);
        let pod = build_exposer_pod("volume-exposer-proxy-abc", "ns1", labels, None, &s);
        assert_eq!(
            pod.metadata.labels.unwrap().get("originalPodName").map(String::as_str),
            Some("worker-1")
        );
        let pod_spec = pod.spec.unwrap();
        assert!(pod_spec.volumes.is_none());
        assert_eq!(pod_spec.containers[0].ports.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_nfs_labels_mark_backend() {
        let labels = exposer_labels("data", 40123, TransportKind::Nfs, None);
        assert_eq!(labels.get("backend").map(String::as_str), Some("nfs"));
    }

    #[test]
    fn test_ephemeral_container_reuses_host_volume() {
        let mut s = spec(ExposerRole::Ephemeral, TransportKind::Ssh, PrivilegeProfile::NonRoot);
        s.private_key = Some("PRIVATE".to_string());
        s.proxy_pod_ip = Some("10.0.0.7".to_string());
        let container = build_ephemeral_container("volume-exposer-ssh-ephemeral-abc", "storage", &s);

        assert!(container.resources.is_none());
        assert!(container.ports.as_ref().unwrap().is_empty());
        let mounts = container.volume_mounts.unwrap();
        assert_eq!(mounts[0].name, "storage");
        assert_eq!(mounts[0].mount_path, VOLUME_MOUNT_PATH);
        let env = container.env.unwrap();
        assert_eq!(env_value(&env, "PROXY_POD_IP").as_deref(), Some("10.0.0.7"));
        assert_eq!(env_value(&env, "SSH_PRIVATE_KEY").as_deref(), Some("PRIVATE"));
        assert_eq!(env_value(&env, "TUNNEL_PORT").as_deref(), Some("6666"));
    }
}
