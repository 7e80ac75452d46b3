// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local Mount Executor
//!
//! Builds and runs the host mount/unmount commands against a forwarded localhost
//! port. SSH gets one attempt; NFS is retried with a fixed backoff because the
//! re-export server can accept connections before its export table is loaded.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** sshfs / mount / umount invocation behind [`ProcessRunner`]

use crate::domain::error::MountError;
use crate::domain::process::{CommandSpec, ProcessRunner};
use crate::domain::transport::{PrivilegeProfile, TransportKind};
use crate::infrastructure::workload::VOLUME_MOUNT_PATH;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Linux,
    MacOs,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else {
            Self::Linux
        }
    }
}

/// One local mount to perform.
#[derive(Debug, Clone)]
pub struct LocalMount {
    pub transport: TransportKind,
    pub privilege: PrivilegeProfile,
    pub local_port: u16,
    pub mount_path: PathBuf,
    /// Identity file for sshfs. Required for SSH.
    pub key_file: Option<PathBuf>,
}

/// Programs the host needs for a transport, beyond kubectl.
pub fn required_programs(platform: Platform, transport: TransportKind) -> &'static [&'static str] {
    match (platform, transport) {
        (_, TransportKind::Ssh) => &["sshfs"],
        (Platform::Linux, TransportKind::Nfs) => &["mount"],
        (Platform::MacOs, TransportKind::Nfs) => &["mount_nfs"],
    }
}

pub fn mount_command(platform: Platform, mount: &LocalMount, debug: bool) -> CommandSpec {
    let target = mount.mount_path.display().to_string();
    let port = mount.local_port;

    match mount.transport {
        TransportKind::Ssh => {
            let key = mount
                .key_file
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_default();
            let mut options = format!(
                "StrictHostKeyChecking=no,UserKnownHostsFile=/dev/null,IdentityFile={},port={}",
                key, port
            );
            if debug {
                options.push_str(",debug,sshfs_debug,loglevel=debug");
            }
            CommandSpec::new("sshfs")
                .args(["-o", options.as_str()])
                .arg(format!(
                    "{}@localhost:{}",
                    mount.privilege.ssh_user(),
                    VOLUME_MOUNT_PATH
                ))
                .arg(target)
                .verbose(debug)
        }
        TransportKind::Nfs => {
            let source = format!("localhost:{}", VOLUME_MOUNT_PATH);
            match platform {
                Platform::Linux => CommandSpec::new("mount")
                    .args(["-t", "nfs", "-o"])
                    .arg(format!(
                        "port={0},mountport={0},nfsvers=4,hard,timeo=600,retrans=3,proto=tcp,sec=sys",
                        port
                    ))
                    .arg(source)
                    .arg(target),
                Platform::MacOs => CommandSpec::new("mount_nfs")
                    .arg("-o")
                    .arg(format!("port={0},mountport={0},vers=4,tcp", port))
                    .arg(source)
                    .arg(target),
            }
        }
    }
}

pub fn unmount_command(platform: Platform, transport: TransportKind, path: &Path) -> CommandSpec {
    let target = path.display().to_string();
    match (platform, transport) {
        (Platform::Linux, TransportKind::Ssh) => CommandSpec::new("fusermount").args(["-u", target.as_str()]),
        _ => CommandSpec::new("umount").arg(target),
    }
}

/// How long a mount-point check may block before the mount is presumed hung.
const MOUNT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// What a mount-point check found at a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    NotMounted,
    Mounted,
    /// `stat` failed for a reason other than absence; typical of a FUSE or NFS
    /// mount whose server went away. Treated as mounted.
    Unreachable(String),
}

impl MountState {
    pub fn is_mounted(&self) -> bool {
        !matches!(self, Self::NotMounted)
    }
}

/// Inspect `path` with `stat`. May block on a hung network mount.
///
/// A mount point has a different device id than its parent; a missing path is
/// never one.
#[cfg(unix)]
pub fn inspect_mount_point(path: &Path) -> MountState {
    use std::os::unix::fs::MetadataExt;

    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return MountState::NotMounted,
        Err(e) => return MountState::Unreachable(e.to_string()),
    };
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        Some(_) => PathBuf::from("."),
        None => return MountState::Mounted,
    };
    match std::fs::metadata(&parent) {
        Ok(parent_meta) if meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino() => {
            MountState::Mounted
        }
        Ok(_) => MountState::NotMounted,
        Err(e) => MountState::Unreachable(e.to_string()),
    }
}

#[cfg(not(unix))]
pub fn inspect_mount_point(_path: &Path) -> MountState {
    MountState::NotMounted
}

/// [`inspect_mount_point`] off the runtime threads, bounded by `timeout`.
pub async fn mount_state(path: &Path, timeout: Duration) -> MountState {
    let owned = path.to_path_buf();
    let check = tokio::task::spawn_blocking(move || inspect_mount_point(&owned));
    match tokio::time::timeout(timeout, check).await {
        Ok(Ok(state)) => state,
        Ok(Err(e)) => MountState::Unreachable(e.to_string()),
        Err(_) => MountState::Unreachable(format!("no response within {:?}", timeout)),
    }
}

/// The mount target must exist, be a directory and not be mounted already.
pub fn validate_mount_path(path: &Path) -> Result<(), MountError> {
    let invalid = |reason: &str| MountError::InvalidMountPath {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };
    let meta = std::fs::metadata(path).map_err(|e| invalid(&e.to_string()))?;
    if !meta.is_dir() {
        return Err(invalid("not a directory"));
    }
    match inspect_mount_point(path) {
        MountState::NotMounted => Ok(()),
        MountState::Mounted => Err(invalid("something is already mounted there")),
        MountState::Unreachable(reason) => Err(invalid(&reason)),
    }
}

pub struct LocalMountExecutor {
    runner: Arc<dyn ProcessRunner>,
    platform: Platform,
    nfs_attempts: u32,
    nfs_backoff: Duration,
    check_timeout: Duration,
    debug: bool,
}

impl LocalMountExecutor {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        nfs_attempts: u32,
        nfs_backoff: Duration,
        debug: bool,
    ) -> Self {
        Self {
            runner,
            platform: Platform::current(),
            nfs_attempts: nfs_attempts.max(1),
            nfs_backoff,
            check_timeout: MOUNT_CHECK_TIMEOUT,
            debug,
        }
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub async fn mount(&self, mount: &LocalMount, cancel: &CancellationToken) -> Result<(), MountError> {
        let command = mount_command(self.platform, mount, self.debug);
        let attempts = match mount.transport {
            TransportKind::Ssh => 1,
            TransportKind::Nfs => self.nfs_attempts,
        };

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(MountError::Cancelled);
            }
            info!(
                "Mounting {} (attempt {}/{})",
                mount.mount_path.display(),
                attempt,
                attempts
            );
            let run = tokio::select! {
                _ = cancel.cancelled() => return Err(MountError::Cancelled),
                run = self.runner.run(&command) => run,
            };
            match run {
                Ok(output) if output.success() => {
                    info!("Mounted at {}", mount.mount_path.display());
                    return Ok(());
                }
                Ok(output) => last_error = output.failure_reason(),
                Err(e) => last_error = e.to_string(),
            }

            if attempt < attempts {
                warn!(
                    "Mount attempt {} failed: {}. Retrying in {:?}",
                    attempt, last_error, self.nfs_backoff
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(MountError::Cancelled),
                    _ = tokio::time::sleep(self.nfs_backoff) => {}
                }
            }
        }

        Err(MountError::MountFailed {
            path: mount.mount_path.clone(),
            attempts,
            last_error,
        })
    }

    /// Unmount `path`. Returns `Ok(false)` if nothing was mounted there.
    ///
    /// A path that cannot be inspected is unmounted anyway.
    pub async fn unmount(&self, path: &Path, transport: TransportKind) -> Result<bool, MountError> {
        match mount_state(path, self.check_timeout).await {
            MountState::NotMounted => {
                info!("{} is not mounted, skipping unmount", path.display());
                return Ok(false);
            }
            MountState::Mounted => {}
            MountState::Unreachable(reason) => {
                warn!("{} looks like a stale mount ({}), unmounting", path.display(), reason)
            }
        }
        let output = self
            .runner
            .run(&unmount_command(self.platform, transport, path))
            .await?;
        if !output.success() {
            return Err(MountError::UnmountFailed {
                path: path.to_path_buf(),
                reason: output.failure_reason(),
            });
        }
        info!("Unmounted {}", path.display());
        Ok(true)
    }
}
