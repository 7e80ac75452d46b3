// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Port-forward tunnels and process termination
//!
//! A tunnel is a supervised `kubectl port-forward` child bound to a random local
//! port. [`PortForward`] kills its child on teardown or drop unless it was detached
//! after a successful mount, in which case `clean` later finds it again by command
//! line pattern.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** kubectl/pkill process plumbing behind [`ProcessRunner`]

use crate::domain::error::MountError;
use crate::domain::process::{ChildProcess, CommandSpec, ProcessRunner};
use parking_lot::Mutex;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info, warn};

type SharedChild = Arc<Mutex<Option<Box<dyn ChildProcess>>>>;

/// Choose a local port uniformly from `range`.
pub fn pick_local_port(range: RangeInclusive<u16>) -> u16 {
    rand::rng().random_range(range)
}

/// Command-line fragment that identifies our port-forward for a pod.
///
/// With a port, matches only the forward bound to that local port.
pub fn port_forward_pattern(namespace: &str, pod: &str, local_port: Option<u16>) -> String {
    match local_port {
        Some(port) => format!("port-forward -n {} pod/{} {}:", namespace, pod, port),
        None => format!("port-forward -n {} pod/{}", namespace, pod),
    }
}

/// Port-forwards the current run still supervises.
///
/// Lets the signal watcher kill them when the process exits without unwinding.
#[derive(Default)]
pub struct ForwardRegistry {
    children: Mutex<Vec<SharedChild>>,
}

impl ForwardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn track(&self, child: SharedChild) {
        let mut children = self.children.lock();
        children.retain(|c| c.lock().is_some());
        children.push(child);
    }

    /// Forwards that are neither torn down nor detached.
    pub fn active(&self) -> usize {
        self.children
            .lock()
            .iter()
            .filter(|c| c.lock().is_some())
            .count()
    }

    /// Kill every supervised forward. Returns how many were killed.
    pub fn kill_all(&self) -> usize {
        let mut children = self.children.lock();
        let mut killed = 0;
        for shared in children.drain(..) {
            if let Some(mut child) = shared.lock().take() {
                child.kill();
                killed += 1;
            }
        }
        killed
    }
}

/// A running port-forward owned by the current run.
pub struct PortForward {
    child: SharedChild,
    target: String,
    local_port: u16,
}

impl PortForward {
    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// `Some(exit_code)` if the forward process already died.
    pub fn exited(&mut self) -> Option<Option<i32>> {
        self.child.lock().as_mut().and_then(|child| child.try_exit_code())
    }

    /// Kill the forward. Idempotent and infallible.
    pub fn teardown(&mut self) {
        if let Some(mut child) = self.child.lock().take() {
            debug!(
                "Terminating port-forward to {} (pid {:?})",
                self.target,
                child.id()
            );
            child.kill();
        }
    }

    /// Leave the forward running past the end of this process.
    pub fn detach(self) -> Option<u32> {
        let child = self.child.lock().take();
        child.and_then(|child| child.release())
    }
}

impl Drop for PortForward {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl std::fmt::Debug for PortForward {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortForward")
            .field("target", &self.target)
            .field("local_port", &self.local_port)
            .field("active", &self.child.lock().is_some())
            .finish()
    }
}

/// Starts port-forwards and terminates local and in-pod processes.
pub struct TunnelManager {
    runner: Arc<dyn ProcessRunner>,
    kubectl: String,
    verbose: bool,
    forwards: Arc<ForwardRegistry>,
}

impl TunnelManager {
    pub fn new(runner: Arc<dyn ProcessRunner>, kubectl: impl Into<String>, verbose: bool) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
            verbose,
            forwards: Arc::new(ForwardRegistry::new()),
        }
    }

    /// Track opened forwards in a registry shared with the signal watcher.
    pub fn with_registry(mut self, forwards: Arc<ForwardRegistry>) -> Self {
        self.forwards = forwards;
        self
    }

    /// Forward `local_port` to `remote_port` on `namespace/pod`.
    pub fn open(
        &self,
        namespace: &str,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<PortForward, MountError> {
        let spec = CommandSpec::new(&self.kubectl)
            .args(["port-forward", "-n", namespace])
            .arg(format!("pod/{}", pod))
            .arg(format!("{}:{}", local_port, remote_port))
            .verbose(self.verbose);

        let child = self
            .runner
            .spawn(&spec)
            .map_err(|e| MountError::Tunnel(e.to_string()))?;
        info!(
            "Port-forward started: localhost:{} -> {}/{}:{}",
            local_port, namespace, pod, remote_port
        );
        let child: SharedChild = Arc::new(Mutex::new(Some(child)));
        self.forwards.track(child.clone());
        Ok(PortForward {
            child,
            target: format!("{}/{}", namespace, pod),
            local_port,
        })
    }

    /// `pkill -f <pattern>` on this host. `Ok(false)` when nothing matched.
    pub async fn kill_local(&self, pattern: &str) -> Result<bool, MountError> {
        let output = self
            .runner
            .run(&CommandSpec::new("pkill").args(["-f", pattern]))
            .await?;
        match output.exit_code {
            Some(0) => {
                debug!("Killed local processes matching '{}'", pattern);
                Ok(true)
            }
            Some(1) => Ok(false),
            _ => Err(MountError::Tunnel(format!(
                "pkill -f '{}' failed: {}",
                pattern,
                output.failure_reason()
            ))),
        }
    }

    /// `pkill -f <pattern>` inside a container via `kubectl exec`.
    ///
    /// Failures are logged and swallowed; the container may already be gone.
    pub async fn kill_remote(&self, namespace: &str, pod: &str, container: &str, pattern: &str) -> bool {
        let spec = CommandSpec::new(&self.kubectl)
            .args(["exec", "-n", namespace, pod, "-c", container, "--"])
            .args(["pkill", "-f", pattern]);
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => {
                info!("Stopped '{}' in {}/{} container {}", pattern, namespace, pod, container);
                true
            }
            Ok(output) => {
                warn!(
                    "Could not stop '{}' in {}/{} container {}: {}",
                    pattern,
                    namespace,
                    pod,
                    container,
                    output.failure_reason()
                );
                false
            }
            Err(e) => {
                warn!("Could not exec into {}/{}: {}", namespace, pod, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::process::{CommandOutput, ProcessError};
    use async_trait::async_trait;
    use std::path::PathBuf;

    #[derive(Default)]
    struct Recorder {
        killed: Arc<Mutex<u32>>,
        commands: Mutex<Vec<CommandSpec>>,
        exit_code: Option<i32>,
    }

    struct FakeChild {
        killed: Arc<Mutex<u32>>,
    }

    impl ChildProcess for FakeChild {
        fn id(&self) -> Option<u32> {
            Some(4242)
        }
        fn try_exit_code(&mut self) -> Option<Option<i32>> {
            None
        }
        fn kill(&mut self) {
            *self.killed.lock() += 1;
        }
        fn release(self: Box<Self>) -> Option<u32> {
            Some(4242)
        }
    }

    #[async_trait]
    impl ProcessRunner for Recorder {
        async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, ProcessError> {
            self.commands.lock().push(command.clone());
            Ok(CommandOutput {
                exit_code: self.exit_code,
                ..Default::default()
            })
        }
        fn spawn(&self, command: &CommandSpec) -> Result<Box<dyn ChildProcess>, ProcessError> {
            self.commands.lock().push(command.clone());
            Ok(Box::new(FakeChild {
                killed: self.killed.clone(),
            }))
        }
        fn locate(&self, _program: &str) -> Option<PathBuf> {
            None
        }
    }

    #[test]
    fn test_port_forward_pattern() {
        assert_eq!(
            port_forward_pattern("ns1", "volume-exposer-abc", Some(40000)),
            "port-forward -n ns1 pod/volume-exposer-abc 40000:"
        );
        assert_eq!(
            port_forward_pattern("ns1", "worker-1", None),
            "port-forward -n ns1 pod/worker-1"
        );
    }

    #[test]
    fn test_pick_local_port_stays_in_range() {
        for _ in 0..100 {
            let port = pick_local_port(30000..=30010);
            assert!((30000..=30010).contains(&port));
        }
    }

    #[test]
    fn test_open_builds_kubectl_command_and_teardown_is_idempotent() {
        let runner = Arc::new(Recorder::default());
        let manager = TunnelManager::new(runner.clone(), "kubectl", false);
        let mut forward = manager.open("ns1", "volume-exposer-abc", 40000, 2137).unwrap();

        let spawned = runner.commands.lock()[0].to_string();
        assert_eq!(
            spawned,
            "kubectl port-forward -n ns1 pod/volume-exposer-abc 40000:2137"
        );
        assert!(spawned.contains(&port_forward_pattern("ns1", "volume-exposer-abc", Some(40000))));

        forward.teardown();
        forward.teardown();
        drop(forward);
        assert_eq!(*runner.killed.lock(), 1);
    }

    #[test]
    fn test_drop_kills_but_detach_does_not() {
        let runner = Arc::new(Recorder::default());
        let manager = TunnelManager::new(runner.clone(), "kubectl", false);

        drop(manager.open("ns1", "a", 40000, 2137).unwrap());
        assert_eq!(*runner.killed.lock(), 1);

        let forward = manager.open("ns1", "b", 40001, 2137).unwrap();
        assert_eq!(forward.detach(), Some(4242));
        assert_eq!(*runner.killed.lock(), 1);
    }

    #[test]
    fn test_registry_kills_only_supervised_forwards() {
        let runner = Arc::new(Recorder::default());
        let forwards = Arc::new(ForwardRegistry::new());
        let manager = TunnelManager::new(runner.clone(), "kubectl", false).with_registry(forwards.clone());

        let mut torn_down = manager.open("ns1", "a", 40000, 2137).unwrap();
        torn_down.teardown();
        let detached = manager.open("ns1", "b", 40001, 2137).unwrap();
        detached.detach();
        let live = manager.open("ns1", "c", 40002, 2137).unwrap();
        assert_eq!(forwards.active(), 1);
        assert_eq!(*runner.killed.lock(), 1);

        assert_eq!(forwards.kill_all(), 1);
        assert_eq!(*runner.killed.lock(), 2);
        assert_eq!(forwards.active(), 0);

        // The handle no longer owns a child once the registry killed it.
        drop(live);
        assert_eq!(*runner.killed.lock(), 2);
    }

    #[tokio::test]
    async fn test_kill_local_distinguishes_no_match() {
        let runner = Arc::new(Recorder {
            exit_code: Some(1),
            ..Default::default()
        });
        let manager = TunnelManager::new(runner.clone(), "kubectl", false);
        assert!(!manager.kill_local("port-forward -n ns1 pod/x").await.unwrap());

        let failing = Arc::new(Recorder {
            exit_code: Some(2),
            ..Default::default()
        });
        let manager = TunnelManager::new(failing, "kubectl", false);
        assert!(manager.kill_local("x").await.is_err());
    }

    #[tokio::test]
    async fn test_kill_remote_uses_exec() {
        let runner = Arc::new(Recorder {
            exit_code: Some(0),
            ..Default::default()
        });
        let manager = TunnelManager::new(runner.clone(), "kubectl", false);
        assert!(manager.kill_remote("ns1", "worker-1", "c1", "ganesha.nfsd").await);
        assert_eq!(
            runner.commands.lock()[0].to_string(),
            "kubectl exec -n ns1 worker-1 -c c1 -- pkill -f ganesha.nfsd"
        );
    }
}
