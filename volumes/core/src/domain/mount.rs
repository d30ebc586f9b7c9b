// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Mount Capability - Anti-Corruption Layer for the host mount table
//!
//! Wraps OS mount calls so volume variants can be exercised against a fake
//! mount table in tests. Implementations are stateless service handles
//! shared across every volume on the host.

use async_trait::async_trait;
use bitflags::bitflags;
use std::path::{Path, PathBuf};
use thiserror::Error;

bitflags! {
    /// Flags for [`Mounter::mount`]. Backends translate them to their own
    /// representation (`MS_*` on Linux).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MountFlags: u32 {
        const READ_ONLY = 1 << 0;
        const NO_SUID = 1 << 1;
        const NO_DEV = 1 << 2;
        const NO_EXEC = 1 << 3;
        const REMOUNT = 1 << 4;
        const BIND = 1 << 5;
        const RECURSIVE = 1 << 6;
    }
}

bitflags! {
    /// Flags for [`Mounter::unmount`] (`MNT_*` on Linux)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UnmountFlags: u32 {
        const FORCE = 1 << 0;
        const DETACH = 1 << 1;
    }
}

/// Mount capability consumed by volume variants
///
/// `ref_count` is the only source of truth for whether a shared disk is
/// still in use; implementations must read the live mount table on every
/// call and never cache it.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `source` on `target`. `fs_type` and `data` may be empty.
    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: &str,
    ) -> Result<(), MountError>;

    /// Unmount whatever is mounted on `target`
    async fn unmount(&self, target: &Path, flags: UnmountFlags) -> Result<(), MountError>;

    /// Device backing the mount at `path`, and the number of mount table
    /// entries referencing that device.
    async fn ref_count(&self, path: &Path) -> Result<(PathBuf, usize), MountError>;
}

#[derive(Debug, Error)]
pub enum MountError {
    #[error("{operation} of {target} failed: {source}")]
    Syscall {
        operation: &'static str,
        target: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path cannot be passed to the kernel: {0}")]
    InvalidPath(String),

    #[error("Nothing is mounted at {0}")]
    NotMounted(PathBuf),

    #[error("Failed to read mount table: {0}")]
    MountTable(String),

    #[error("Mount backend error: {0}")]
    Backend(String),
}
