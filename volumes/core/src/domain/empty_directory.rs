// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Empty Directory volume
//!
//! A temporary directory scoped to the pod, created on first set up and
//! removed entirely on tear down. Tear down renames the directory to a
//! unique `<name>.deleting~<suffix>` sibling before removing it, so a reader
//! of the parent never sees a half-deleted tree. A crash between the rename
//! and the removal leaves that sibling behind; directory scans treat it as
//! garbage.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::domain::identity::{VolumeIdentity, VolumeKind};
use crate::domain::volume::{create_volume_dir, Builder, Cleaner, Volume, VolumeError};

/// Marker inserted into the name of a directory awaiting removal
pub const DELETING_SUFFIX: &str = ".deleting~";

/// Whether a directory entry is a leftover of an interrupted tear down
pub fn is_deleting_name(name: &str) -> bool {
    name.contains(DELETING_SUFFIX)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmptyDirectory {
    identity: VolumeIdentity,
}

impl EmptyDirectory {
    pub fn new(identity: VolumeIdentity) -> Self {
        Self { identity }
    }

    pub fn identity(&self) -> &VolumeIdentity {
        &self.identity
    }

    fn deleting_path(&self) -> PathBuf {
        let path = self.path();
        let aside = format!(
            "{}{}{}",
            self.identity.name,
            DELETING_SUFFIX,
            Uuid::new_v4().simple()
        );
        path.with_file_name(aside)
    }
}

impl Volume for EmptyDirectory {
    fn kind(&self) -> VolumeKind {
        VolumeKind::EmptyDirectory
    }

    fn path(&self) -> PathBuf {
        self.identity.path(VolumeKind::EmptyDirectory)
    }
}

#[async_trait]
impl Builder for EmptyDirectory {
    async fn set_up(&self) -> Result<(), VolumeError> {
        create_volume_dir(&self.path()).await
    }
}

#[async_trait]
impl Cleaner for EmptyDirectory {
    async fn tear_down(&self) -> Result<(), VolumeError> {
        match self.move_aside().await? {
            Some(aside) => remove_aside(&aside).await,
            None => Ok(()),
        }
    }
}

impl EmptyDirectory {
    /// First tear down step: rename the volume to a unique deleting sibling.
    /// `None` when there is nothing to remove.
    pub(crate) async fn move_aside(&self) -> Result<Option<PathBuf>, VolumeError> {
        let path = self.path();
        let aside = self.deleting_path();

        match tokio::fs::rename(&path, &aside).await {
            Ok(()) => Ok(Some(aside)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Empty directory {} already removed", path.display());
                Ok(None)
            }
            Err(e) => Err(VolumeError::io(&path, e)),
        }
    }
}

async fn remove_aside(aside: &Path) -> Result<(), VolumeError> {
    tokio::fs::remove_dir_all(aside)
        .await
        .map_err(|e| VolumeError::io(aside, e))
}
