// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Mount orchestration engine for exposing a PersistentVolumeClaim on a local path.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Classify, expose, tunnel, mount and clean up

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
