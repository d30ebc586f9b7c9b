// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Specification (input)
//!
//! The per-volume record attached to a scheduled pod by the upstream API
//! layer. It carries a name and at most one populated source descriptor.
//! Unknown source keys are kept untyped so they can be reported as
//! unsupported instead of silently dropped.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::volume::VolumeError;

/// Volume declared by a pod
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub name: String,

    /// `None` means the pod declared a name without a source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VolumeSource>,
}

impl VolumeSpec {
    pub fn new(name: impl Into<String>, source: VolumeSource) -> Self {
        Self {
            name: name.into(),
            source: Some(source),
        }
    }
}

/// Source descriptors. Exactly one is expected to be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_dir: Option<HostDirectorySource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirectorySource>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persistent_disk: Option<PersistentDiskSource>,

    /// Source types this agent does not know about
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Bare host directory exposed to the container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDirectorySource {
    pub path: String,
}

/// Temporary directory scoped to the pod
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyDirectorySource {}

/// GCE persistent disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentDiskSource {
    /// Provider-side disk name
    pub pd_name: String,

    /// Filesystem type, empty to let the provider detect it
    #[serde(default)]
    pub fs_type: String,

    /// Partition to mount, `0` for the whole disk
    #[serde(default)]
    pub partition: u32,

    #[serde(default)]
    pub read_only: bool,
}

/// The single source a [`VolumeSource`] resolves to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResolvedSource<'a> {
    HostDirectory(&'a HostDirectorySource),
    EmptyDirectory,
    PersistentDisk(&'a PersistentDiskSource),
}

impl VolumeSource {
    pub fn host_dir(path: impl Into<String>) -> Self {
        Self {
            host_dir: Some(HostDirectorySource { path: path.into() }),
            ..Default::default()
        }
    }

    pub fn empty_dir() -> Self {
        Self {
            empty_dir: Some(EmptyDirectorySource {}),
            ..Default::default()
        }
    }

    pub fn persistent_disk(source: PersistentDiskSource) -> Self {
        Self {
            persistent_disk: Some(source),
            ..Default::default()
        }
    }

    /// Names of every populated descriptor, known or not
    pub fn populated(&self) -> Vec<String> {
        let mut names = Vec::new();
        if self.host_dir.is_some() {
            names.push("hostDir".to_string());
        }
        if self.empty_dir.is_some() {
            names.push("emptyDir".to_string());
        }
        if self.persistent_disk.is_some() {
            names.push("persistentDisk".to_string());
        }
        names.extend(
            self.other
                .iter()
                .filter(|(_, value)| !value.is_null())
                .map(|(key, _)| key.clone()),
        );
        names
    }

    /// Resolve to exactly one known source.
    ///
    /// More than one populated descriptor is rejected rather than resolved
    /// by declaration order.
    pub fn resolve(&self) -> Result<ResolvedSource<'_>, VolumeError> {
        let populated = self.populated();
        if populated.len() > 1 {
            return Err(VolumeError::AmbiguousVolumeSource(populated));
        }

        if let Some(host_dir) = &self.host_dir {
            Ok(ResolvedSource::HostDirectory(host_dir))
        } else if self.empty_dir.is_some() {
            Ok(ResolvedSource::EmptyDirectory)
        } else if let Some(pd) = &self.persistent_disk {
            Ok(ResolvedSource::PersistentDisk(pd))
        } else if let Some(unknown) = populated.into_iter().next() {
            Err(VolumeError::UnsupportedVolumeType(unknown))
        } else {
            Err(VolumeError::UnsupportedVolumeType("no source descriptor set".to_string()))
        }
    }
}
