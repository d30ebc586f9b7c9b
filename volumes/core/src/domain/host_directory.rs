// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Host Directory volume: a bare host directory exposed to the container.
//! The directory is managed outside the agent, so set up and tear down do
//! nothing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::identity::VolumeKind;
use crate::domain::volume::{Builder, Cleaner, Volume, VolumeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDirectory {
    name: String,
    path: PathBuf,
}

impl HostDirectory {
    /// `path` must be absolute
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Result<Self, VolumeError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(VolumeError::InvalidSpec(format!(
                "host directory path {} must be absolute",
                path.display()
            )));
        }
        Ok(Self {
            name: name.into(),
            path,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_path(&self) -> &Path {
        &self.path
    }
}

impl Volume for HostDirectory {
    fn kind(&self) -> VolumeKind {
        VolumeKind::HostDirectory
    }

    fn path(&self) -> PathBuf {
        self.path.clone()
    }
}

#[async_trait]
impl Builder for HostDirectory {
    async fn set_up(&self) -> Result<(), VolumeError> {
        Ok(())
    }
}

#[async_trait]
impl Cleaner for HostDirectory {
    async fn tear_down(&self) -> Result<(), VolumeError> {
        Ok(())
    }
}
