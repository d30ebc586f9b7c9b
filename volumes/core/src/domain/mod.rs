// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mod
//!
//! Provides the volume domain model.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Volume identity, capabilities and concrete variants

pub mod identity;
pub mod spec;
pub mod volume;
pub mod mount;
pub mod disk;
pub mod host_directory;
pub mod empty_directory;
pub mod persistent_disk;
pub mod node_config;
