// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the pv-mounter CLI

pub mod clean;
pub mod config;
pub mod mount;

pub use self::clean::CleanArgs;
pub use self::config::ConfigCommand;
pub use self::mount::MountArgs;
