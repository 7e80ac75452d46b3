// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod classifier;
pub mod cleanup;
pub mod injector;
pub mod mount_orchestrator;
pub mod readiness;

#[cfg(test)]
pub(crate) mod fakes;

// Re-export use cases for convenience
pub use cleanup::{CleanReport, CleanRequest, CleanupOrchestrator};
pub use mount_orchestrator::{MountOrchestrator, MountOutcome, MountRequest};
