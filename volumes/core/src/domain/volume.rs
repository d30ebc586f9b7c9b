// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Capabilities
//!
//! A volume variant exposes its host path through [`Volume`] and may
//! additionally implement [`Builder`] (materialize the path) and/or
//! [`Cleaner`] (reverse it). Both operations must be idempotent: a repeated
//! `set_up` or a `tear_down` of something already gone returns `Ok(())`.
//!
//! Callers serialize operations per volume identity. Idempotence protects
//! against duplicate calls, not against a `set_up` racing a `tear_down`.

use async_trait::async_trait;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::domain::disk::DiskError;
use crate::domain::identity::VolumeKind;
use crate::domain::mount::MountError;

// ============================================================================
// Capability Traits
// ============================================================================

/// A directory used by a pod
pub trait Volume: Send + Sync + std::fmt::Debug {
    /// Kind tag of the variant
    fn kind(&self) -> VolumeKind;

    /// Host path the container runtime binds into the container.
    ///
    /// Pure: computed from identity, performs no I/O.
    fn path(&self) -> PathBuf;
}

/// Capability to set up (mount, create) a volume at its path
#[async_trait]
pub trait Builder: Volume {
    async fn set_up(&self) -> Result<(), VolumeError>;
}

/// Capability to tear down a volume and remove every trace of `set_up`
#[async_trait]
pub trait Cleaner: Volume {
    async fn tear_down(&self) -> Result<(), VolumeError>;
}

// ============================================================================
// Domain Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("Unsupported volume type: {0}")]
    UnsupportedVolumeType(String),

    #[error("Ambiguous volume source, more than one set: {}", .0.join(", "))]
    AmbiguousVolumeSource(Vec<String>),

    #[error("Invalid volume specification: {0}")]
    InvalidSpec(String),

    #[error("Persistent disk {0} has no disk attributes and cannot be set up")]
    MissingDiskAttributes(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Disk operation '{operation}' failed: {source}")]
    Disk {
        operation: &'static str,
        #[source]
        source: DiskError,
    },

    #[error("Mount operation '{operation}' failed: {source}")]
    Mount {
        operation: &'static str,
        #[source]
        source: MountError,
    },

    #[error("Operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}

impl VolumeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    ///
    /// Configuration errors never succeed on retry. Capability errors are
    /// surfaced verbatim and left to the caller's judgement.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Whether the error stems from the specification rather than the host
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedVolumeType(_)
                | Self::AmbiguousVolumeSource(_)
                | Self::InvalidSpec(_)
                | Self::MissingDiskAttributes(_)
        )
    }
}

/// Run an external-capability call under a deadline.
pub(crate) async fn with_deadline<T, F>(
    operation: &'static str,
    timeout: Duration,
    fut: F,
) -> Result<T, VolumeError>
where
    F: Future<Output = Result<T, VolumeError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(VolumeError::Timeout { operation, timeout }),
    }
}

/// Mode of every directory created for a volume
pub const VOLUME_DIR_MODE: u32 = 0o750;

/// Create `path` and any missing parents with [`VOLUME_DIR_MODE`].
/// Succeeds if the directory already exists.
pub(crate) async fn create_volume_dir(path: &Path) -> Result<(), VolumeError> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(VOLUME_DIR_MODE);
    builder
        .create(path)
        .await
        .map_err(|e| VolumeError::io(path, e))
}
