// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Disk Attach Capability
//!
//! Attaches and detaches cloud persistent disks to the local host. The cloud
//! API client lives outside this crate; volume variants only see this trait.

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

use crate::domain::persistent_disk::PersistentDisk;

#[async_trait]
pub trait DiskAttacher: Send + Sync {
    /// Attach the disk to the host.
    ///
    /// On success the device is mounted at the disk's global mount path
    /// (see [`PersistentDisk::global_mount_path`]). Attaching a disk that is
    /// already attached must succeed.
    async fn attach_disk(&self, disk: &PersistentDisk) -> Result<(), DiskError>;

    /// Detach the disk backing `device_path` from the host.
    ///
    /// `disk` may have been reconstructed from the directory layout and carry
    /// identity only; implementations resolve the provider disk from
    /// `device_path` in that case.
    async fn detach_disk(&self, disk: &PersistentDisk, device_path: &Path) -> Result<(), DiskError>;
}

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("Failed to attach disk {disk}: {reason}")]
    AttachFailed { disk: String, reason: String },

    #[error("Failed to detach device {device}: {reason}")]
    DetachFailed { device: String, reason: String },

    #[error("No disk provider configured on this host")]
    NotConfigured,

    #[error("Disk provider error: {0}")]
    Provider(String),
}
