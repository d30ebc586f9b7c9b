// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Volume Identity and Path Naming
//!
//! Every per-pod volume lives at `root/<pod_id>/volumes/<kind>/<name>`. The
//! layout is the only state persisted by this crate: the reconciler walks it
//! after a restart, so the naming functions here must never change shape.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure mapping from volume identity to host paths

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::domain::empty_directory::DELETING_SUFFIX;
use crate::domain::volume::VolumeError;

/// Directory under each pod directory holding its volumes
pub const VOLUMES_DIR: &str = "volumes";

/// Directory under the root holding host-wide mounts
pub const GLOBAL_DIR: &str = "global";

/// Directory under [`GLOBAL_DIR`] holding persistent disk mounts
pub const GLOBAL_PD_DIR: &str = "pd";

/// Kind tag of a volume, also the directory name under `volumes/`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeKind {
    #[serde(rename = "host")]
    HostDirectory,
    #[serde(rename = "empty")]
    EmptyDirectory,
    #[serde(rename = "gce-pd")]
    GcePersistentDisk,
}

impl VolumeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HostDirectory => "host",
            Self::EmptyDirectory => "empty",
            Self::GcePersistentDisk => "gce-pd",
        }
    }
}

impl FromStr for VolumeKind {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Self::HostDirectory),
            "empty" => Ok(Self::EmptyDirectory),
            "gce-pd" => Ok(Self::GcePersistentDisk),
            other => Err(VolumeError::UnsupportedVolumeType(other.to_string())),
        }
    }
}

impl std::fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a per-pod volume: root directory, owning pod and volume name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeIdentity {
    pub root_dir: PathBuf,
    pub pod_id: String,
    pub name: String,
}

impl VolumeIdentity {
    pub fn new(root_dir: impl Into<PathBuf>, pod_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            root_dir: root_dir.into(),
            pod_id: pod_id.into(),
            name: name.into(),
        }
    }

    /// Canonical path of this identity for the given kind
    pub fn path(&self, kind: VolumeKind) -> PathBuf {
        volume_path(&self.root_dir, &self.pod_id, kind, &self.name)
    }

    /// Key used by the reconciler: `<pod_id>/<name>`
    pub fn key(&self) -> String {
        volume_key(&self.pod_id, &self.name)
    }

    /// Reject pod ids and names that would escape their directory level
    pub fn validate(&self) -> Result<(), VolumeError> {
        validate_component("pod id", &self.pod_id)?;
        validate_component("volume name", &self.name)
    }
}

/// `root/<pod_id>/volumes/<kind>/<name>`
pub fn volume_path(root_dir: &Path, pod_id: &str, kind: VolumeKind, name: &str) -> PathBuf {
    root_dir
        .join(pod_id)
        .join(VOLUMES_DIR)
        .join(kind.as_str())
        .join(name)
}

/// `root/global/pd/<pd_name>`, shared by every pod that uses the disk
pub fn global_pd_path(root_dir: &Path, pd_name: &str) -> PathBuf {
    root_dir.join(GLOBAL_DIR).join(GLOBAL_PD_DIR).join(pd_name)
}

pub fn volume_key(pod_id: &str, name: &str) -> String {
    format!("{}/{}", pod_id, name)
}

/// A single, non-empty path component
pub(crate) fn validate_component(what: &str, value: &str) -> Result<(), VolumeError> {
    if value.is_empty() {
        return Err(VolumeError::InvalidSpec(format!("{} cannot be empty", what)));
    }
    if value == "." || value == ".." || value.contains('/') || value.contains('\0') {
        return Err(VolumeError::InvalidSpec(format!(
            "{} '{}' must be a single path component",
            what, value
        )));
    }
    // Reserved for directories awaiting removal, which scans treat as garbage
    if value.contains(DELETING_SUFFIX) {
        return Err(VolumeError::InvalidSpec(format!(
            "{} '{}' must not contain '{}'",
            what, value, DELETING_SUFFIX
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_path_layout() {
        let path = volume_path(Path::new("/var/lib/aegis"), "pod-a", VolumeKind::EmptyDirectory, "cache");
        assert_eq!(path, PathBuf::from("/var/lib/aegis/pod-a/volumes/empty/cache"));
    }

    #[test]
    fn test_identity_path_matches_free_function() {
        let identity = VolumeIdentity::new("/root", "pod-b", "data");
        for kind in [VolumeKind::HostDirectory, VolumeKind::EmptyDirectory, VolumeKind::GcePersistentDisk] {
            assert_eq!(identity.path(kind), volume_path(Path::new("/root"), "pod-b", kind, "data"));
            // Same input, same output
            assert_eq!(identity.path(kind), identity.clone().path(kind));
        }
    }

    #[test]
    fn test_global_pd_path() {
        assert_eq!(
            global_pd_path(Path::new("/root"), "my-disk"),
            PathBuf::from("/root/global/pd/my-disk")
        );
    }

    #[test]
    fn test_kind_round_trip_through_str() {
        for kind in [VolumeKind::HostDirectory, VolumeKind::EmptyDirectory, VolumeKind::GcePersistentDisk] {
            assert_eq!(kind.as_str().parse::<VolumeKind>().unwrap(), kind);
        }
        assert!(matches!(
            "nfs".parse::<VolumeKind>(),
            Err(VolumeError::UnsupportedVolumeType(kind)) if kind == "nfs"
        ));
    }

    #[test]
    fn test_identity_key() {
        assert_eq!(VolumeIdentity::new("/root", "pod-a", "cache").key(), "pod-a/cache");
    }

    #[test]
    fn test_identity_validation() {
        assert!(VolumeIdentity::new("/root", "pod-a", "cache").validate().is_ok());
        assert!(VolumeIdentity::new("/root", "", "cache").validate().is_err());
        assert!(VolumeIdentity::new("/root", "pod-a", "").validate().is_err());
        assert!(VolumeIdentity::new("/root", "pod-a", "..").validate().is_err());
        assert!(VolumeIdentity::new("/root", "pod/a", "cache").validate().is_err());
        assert!(VolumeIdentity::new("/root", "pod-a", "db.deleting~keep").validate().is_err());
        assert!(VolumeIdentity::new("/root", "pod.deleting~1", "cache").validate().is_err());
    }
}
