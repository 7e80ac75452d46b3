// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types, decision rules and the traits at every I/O seam.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Volume model, strategy table, errors, configuration

pub mod cluster;
pub mod config;
pub mod error;
pub mod process;
pub mod session;
pub mod transport;
pub mod volume;
