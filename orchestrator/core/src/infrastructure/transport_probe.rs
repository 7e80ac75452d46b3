// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! TCP probes for the forwarded local port.
//!
//! A bare TCP connect proves nothing: `kubectl port-forward` accepts locally before
//! the remote end answers. The SSH probe therefore waits for the server banner. The
//! NFS server never speaks first, so an open connection that stays silent until the
//! deadline counts as ready while an immediate EOF means the forward could not reach
//! the remote port.

use crate::domain::transport::{TransportKind, TransportProbe};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

const SSH_BANNER_PREFIX: &[u8] = b"SSH-";
const DEFAULT_SSH_BANNER_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct TcpTransportProbe {
    nfs_deadline: Duration,
    ssh_banner_timeout: Duration,
}

impl TcpTransportProbe {
    pub fn new(nfs_deadline: Duration) -> Self {
        Self {
            nfs_deadline,
            ssh_banner_timeout: DEFAULT_SSH_BANNER_TIMEOUT,
        }
    }

    pub fn with_ssh_banner_timeout(mut self, banner_timeout: Duration) -> Self {
        self.ssh_banner_timeout = banner_timeout;
        self
    }

    async fn probe_ssh(&self, stream: &mut TcpStream) -> bool {
        let mut banner = [0u8; 4];
        match timeout(self.ssh_banner_timeout, stream.read_exact(&mut banner)).await {
            Ok(Ok(_)) => banner.as_slice() == SSH_BANNER_PREFIX,
            Ok(Err(e)) => {
                trace!("SSH banner read failed: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    async fn probe_nfs(&self, stream: &mut TcpStream) -> bool {
        let mut buf = [0u8; 1];
        match timeout(self.nfs_deadline, stream.read(&mut buf)).await {
            // Still open and silent.
            Err(_) => true,
            Ok(Ok(0)) => {
                trace!("NFS probe: connection closed by forward");
                false
            }
            Ok(Ok(_)) => false,
            Ok(Err(e)) => {
                trace!("NFS probe read failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl TransportProbe for TcpTransportProbe {
    async fn probe(&self, transport: TransportKind, local_port: u16) -> bool {
        let mut stream = match TcpStream::connect(("127.0.0.1", local_port)).await {
            Ok(stream) => stream,
            Err(e) => {
                trace!("Probe connect to localhost:{} failed: {}", local_port, e);
                return false;
            }
        };
        match transport {
            TransportKind::Ssh => self.probe_ssh(&mut stream).await,
            TransportKind::Nfs => self.probe_nfs(&mut stream).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    fn probe() -> TcpTransportProbe {
        TcpTransportProbe::new(Duration::from_millis(200))
            .with_ssh_banner_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_ssh_ready_on_banner() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });
        assert!(probe().probe(TransportKind::Ssh, port).await);
    }

    #[tokio::test]
    async fn test_ssh_not_ready_on_wrong_banner_or_eof() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HTTP/1.1 400\r\n").await.unwrap();
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        assert!(!probe().probe(TransportKind::Ssh, port).await);
        assert!(!probe().probe(TransportKind::Ssh, port).await);
    }

    #[tokio::test]
    async fn test_nfs_ready_when_connection_stays_silent() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });
        assert!(probe().probe(TransportKind::Nfs, port).await);
    }

    #[tokio::test]
    async fn test_nfs_not_ready_on_immediate_close() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });
        assert!(!probe().probe(TransportKind::Nfs, port).await);
    }

    #[tokio::test]
    async fn test_connect_refused_is_not_ready() {
        let (listener, port) = listener().await;
        drop(listener);
        assert!(!probe().probe(TransportKind::Nfs, port).await);
        assert!(!probe().probe(TransportKind::Ssh, port).await);
    }
}
