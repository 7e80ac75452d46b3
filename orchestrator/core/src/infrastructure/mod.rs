// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod credentials;
pub mod kube_client;
pub mod local_mount;
pub mod process;
pub mod transport_probe;
pub mod tunnel;
pub mod workload;

pub use credentials::{SessionKeyPair, TempFileRegistry};
pub use kube_client::KubeClusterClient;
pub use process::TokioProcessRunner;
pub use transport_probe::TcpTransportProbe;
pub use tunnel::ForwardRegistry;
