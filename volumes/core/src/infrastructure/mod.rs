// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Infrastructure Module
//!
//! Concrete implementations of the mount and disk capabilities.

pub mod disk;
pub mod mock;
pub mod system_mounter;

pub use disk::UnconfiguredDiskAttacher;
pub use mock::{MockDiskAttacher, MockMounter};
pub use system_mounter::SystemMounter;
