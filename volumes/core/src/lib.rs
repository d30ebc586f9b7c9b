// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Lib
//!
//! Node-local volume lifecycle management for the AEGIS agent host.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Materializes pod volumes on the host and reverses them,
//!   recovering the mounted set from the on-disk layout after a restart

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
