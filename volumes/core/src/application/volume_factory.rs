// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Factory
//!
//! Turns a pod's volume specification into the concrete Builder for its
//! source, and a `(kind, name, pod)` triple into a Cleaner when the pod's
//! specification is gone (after an agent restart). Disk and mount
//! capabilities are injected here once and handed to every persistent disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::domain::disk::DiskAttacher;
use crate::domain::empty_directory::EmptyDirectory;
use crate::domain::host_directory::HostDirectory;
use crate::domain::identity::{validate_component, VolumeIdentity, VolumeKind};
use crate::domain::mount::Mounter;
use crate::domain::node_config::VolumeConfigSpec;
use crate::domain::persistent_disk::{DiskAttributes, DiskCapabilities, PersistentDisk};
use crate::domain::spec::{ResolvedSource, VolumeSpec};
use crate::domain::volume::{Builder, Cleaner, VolumeError};

pub struct VolumeFactory {
    root_dir: PathBuf,
    capabilities: DiskCapabilities,
}

impl VolumeFactory {
    pub fn new(root_dir: impl Into<PathBuf>, capabilities: DiskCapabilities) -> Self {
        Self {
            root_dir: root_dir.into(),
            capabilities,
        }
    }

    pub fn from_config(
        config: &VolumeConfigSpec,
        disk_attacher: Arc<dyn DiskAttacher>,
        mounter: Arc<dyn Mounter>,
    ) -> Self {
        let capabilities = DiskCapabilities::new(disk_attacher, mounter)
            .with_operation_timeout(config.operation_timeout);
        Self::new(config.root_dir.clone(), capabilities)
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn identity(&self, pod_id: &str, name: &str) -> Result<VolumeIdentity, VolumeError> {
        let identity = VolumeIdentity::new(self.root_dir.clone(), pod_id, name);
        identity.validate()?;
        Ok(identity)
    }

    /// Builder for the single source set in `spec`.
    ///
    /// A specification without any source yields `Ok(None)`: older pod
    /// manifests declare volumes by name only and expect no volume to be
    /// created for them.
    pub fn create_volume_builder(
        &self,
        spec: &VolumeSpec,
        pod_id: &str,
    ) -> Result<Option<Box<dyn Builder>>, VolumeError> {
        let Some(source) = &spec.source else {
            debug!("Volume '{}' of pod {} has no source, skipping", spec.name, pod_id);
            return Ok(None);
        };

        let identity = self.identity(pod_id, &spec.name)?;
        let builder: Box<dyn Builder> = match source.resolve()? {
            ResolvedSource::HostDirectory(host_dir) => {
                Box::new(HostDirectory::new(spec.name.clone(), &host_dir.path)?)
            }
            ResolvedSource::EmptyDirectory => Box::new(EmptyDirectory::new(identity)),
            ResolvedSource::PersistentDisk(pd) => {
                validate_component("pdName", &pd.pd_name)?;
                Box::new(PersistentDisk::new(
                    identity,
                    DiskAttributes::from(pd),
                    self.capabilities.clone(),
                ))
            }
        };
        Ok(Some(builder))
    }

    /// Cleaner for a volume known only by kind, name and owning pod
    pub fn create_volume_cleaner(
        &self,
        kind: &str,
        name: &str,
        pod_id: &str,
    ) -> Result<Box<dyn Cleaner>, VolumeError> {
        let kind: VolumeKind = kind.parse()?;
        let identity = self.identity(pod_id, name)?;
        match kind {
            VolumeKind::EmptyDirectory => Ok(Box::new(EmptyDirectory::new(identity))),
            VolumeKind::GcePersistentDisk => Ok(Box::new(PersistentDisk::for_tear_down(
                identity,
                self.capabilities.clone(),
            ))),
            // Host directories have no canonical directory to tear down
            VolumeKind::HostDirectory => Err(VolumeError::UnsupportedVolumeType(kind.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::spec::{PersistentDiskSource, VolumeSource};
    use crate::domain::volume::Volume;
    use crate::infrastructure::mock::{MockDiskAttacher, MockMounter};

    fn factory(root: &Path) -> VolumeFactory {
        let mounter = Arc::new(MockMounter::new());
        let attacher = Arc::new(MockDiskAttacher::new(mounter.clone()));
        VolumeFactory::new(root, DiskCapabilities::new(attacher, mounter))
    }

    #[test]
    fn test_no_source_yields_no_volume() {
        let factory = factory(Path::new("/root"));
        let spec = VolumeSpec {
            name: "legacy".to_string(),
            source: None,
        };
        assert!(factory.create_volume_builder(&spec, "pod-a").unwrap().is_none());
    }

    #[test]
    fn test_host_directory_builder() {
        let factory = factory(Path::new("/root"));
        let spec = VolumeSpec::new("logs", VolumeSource::host_dir("/var/log"));

        let builder = factory.create_volume_builder(&spec, "pod-a").unwrap().unwrap();
        assert_eq!(builder.kind(), VolumeKind::HostDirectory);
        assert_eq!(builder.path(), PathBuf::from("/var/log"));
    }

    #[test]
    fn test_empty_directory_builder_path() {
        let factory = factory(Path::new("/root"));
        let spec = VolumeSpec::new("cache", VolumeSource::empty_dir());

        let builder = factory.create_volume_builder(&spec, "pod-a").unwrap().unwrap();
        assert_eq!(builder.kind(), VolumeKind::EmptyDirectory);
        assert_eq!(builder.path(), PathBuf::from("/root/pod-a/volumes/empty/cache"));
    }

    #[test]
    fn test_persistent_disk_builder_path() {
        let factory = factory(Path::new("/root"));
        let spec = VolumeSpec::new(
            "data",
            VolumeSource::persistent_disk(PersistentDiskSource {
                pd_name: "disk-1".to_string(),
                fs_type: "ext4".to_string(),
                partition: 0,
                read_only: true,
            }),
        );

        let builder = factory.create_volume_builder(&spec, "pod-b").unwrap().unwrap();
        assert_eq!(builder.kind(), VolumeKind::GcePersistentDisk);
        assert_eq!(builder.path(), PathBuf::from("/root/pod-b/volumes/gce-pd/data"));
    }

    #[test]
    fn test_builder_and_cleaner_agree_on_path() {
        let factory = factory(Path::new("/root"));
        let spec = VolumeSpec::new("cache", VolumeSource::empty_dir());

        let builder = factory.create_volume_builder(&spec, "pod-a").unwrap().unwrap();
        let cleaner = factory.create_volume_cleaner("empty", "cache", "pod-a").unwrap();
        assert_eq!(builder.path(), cleaner.path());
    }

    #[test]
    fn test_unsupported_source() {
        let factory = factory(Path::new("/root"));
        let spec: VolumeSpec =
            serde_json::from_str(r#"{"name": "share", "source": {"nfs": {"server": "nas"}}}"#).unwrap();
        assert!(matches!(
            factory.create_volume_builder(&spec, "pod-a"),
            Err(VolumeError::UnsupportedVolumeType(_))
        ));
    }

    #[test]
    fn test_ambiguous_source_rejected() {
        let factory = factory(Path::new("/root"));
        let mut source = VolumeSource::empty_dir();
        source.host_dir = VolumeSource::host_dir("/srv").host_dir;
        let spec = VolumeSpec::new("both", source);
        assert!(matches!(
            factory.create_volume_builder(&spec, "pod-a"),
            Err(VolumeError::AmbiguousVolumeSource(_))
        ));
    }

    #[test]
    fn test_invalid_name_rejected() {
        let factory = factory(Path::new("/root"));
        let spec = VolumeSpec::new("../escape", VolumeSource::empty_dir());
        assert!(matches!(
            factory.create_volume_builder(&spec, "pod-a"),
            Err(VolumeError::InvalidSpec(_))
        ));

        let reserved = VolumeSpec::new("db.deleting~keep", VolumeSource::empty_dir());
        assert!(matches!(
            factory.create_volume_builder(&reserved, "pod-a"),
            Err(VolumeError::InvalidSpec(_))
        ));
        assert!(matches!(
            factory.create_volume_cleaner("empty", "db.deleting~keep", "pod-a"),
            Err(VolumeError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_cleaner_kinds() {
        let factory = factory(Path::new("/root"));
        assert_eq!(
            factory.create_volume_cleaner("empty", "cache", "pod-a").unwrap().kind(),
            VolumeKind::EmptyDirectory
        );
        assert_eq!(
            factory.create_volume_cleaner("gce-pd", "data", "pod-a").unwrap().kind(),
            VolumeKind::GcePersistentDisk
        );
        assert!(matches!(
            factory.create_volume_cleaner("unknown", "x", "pod-a"),
            Err(VolumeError::UnsupportedVolumeType(_))
        ));
        assert!(matches!(
            factory.create_volume_cleaner("host", "logs", "pod-a"),
            Err(VolumeError::UnsupportedVolumeType(_))
        ));
    }
}
