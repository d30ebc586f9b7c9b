// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Disk attacher for hosts without a cloud disk provider. Every call fails
//! with [`DiskError::NotConfigured`]; tools that only inspect the volume
//! layout use it to build cleaners.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::disk::{DiskAttacher, DiskError};
use crate::domain::persistent_disk::PersistentDisk;

#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredDiskAttacher;

#[async_trait]
impl DiskAttacher for UnconfiguredDiskAttacher {
    async fn attach_disk(&self, _disk: &PersistentDisk) -> Result<(), DiskError> {
        Err(DiskError::NotConfigured)
    }

    async fn detach_disk(&self, _disk: &PersistentDisk, _device_path: &Path) -> Result<(), DiskError> {
        Err(DiskError::NotConfigured)
    }
}
