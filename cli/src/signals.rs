// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Interrupt handling
//!
//! On SIGINT/SIGTERM the run's cancellation token fires so the orchestrator can
//! roll back through its own guards. If rollback has not finished within the grace
//! period, the watcher kills every supervised port-forward, removes every
//! registered key file and exits.

use pv_mounter_core::infrastructure::{ForwardRegistry, TempFileRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

/// Exit status for a run ended by a signal.
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Watch for a shutdown signal for the lifetime of one run.
///
/// Abort the returned handle once the run has finished its own cleanup.
pub fn spawn_watcher(
    cancel: CancellationToken,
    registry: Arc<TempFileRegistry>,
    forwards: Arc<ForwardRegistry>,
    grace: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Interrupted, rolling back");
        cancel.cancel();

        tokio::time::sleep(grace).await;
        let (killed, removed) = force_cleanup(&registry, &forwards);
        error!(
            "Rollback did not finish within {:?}; killed {} port-forward(s), removed {} key file(s) and exiting",
            grace, killed, removed
        );
        std::process::exit(INTERRUPTED_EXIT_CODE);
    })
}

/// Last-resort cleanup before exiting without unwinding.
///
/// Returns the number of port-forwards killed and key files removed.
pub fn force_cleanup(registry: &TempFileRegistry, forwards: &ForwardRegistry) -> (usize, usize) {
    (forwards.kill_all(), registry.cleanup_all())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pv_mounter_core::infrastructure::SessionKeyPair;

    #[test]
    fn test_force_cleanup_removes_key_files() {
        let registry = TempFileRegistry::new();
        let forwards = ForwardRegistry::new();
        let keys = SessionKeyPair::generate().unwrap();
        let path = registry.write_private_key(&keys).unwrap();

        assert_eq!(force_cleanup(&registry, &forwards), (0, 1));
        assert!(!path.exists());
        assert_eq!(force_cleanup(&registry, &forwards), (0, 0));
    }
}
