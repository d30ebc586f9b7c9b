// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod reconciler;
pub mod volume_factory;

pub use reconciler::{ScanReport, VolumeReconciler};
pub use volume_factory::VolumeFactory;
