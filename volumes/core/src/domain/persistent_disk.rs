// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! GCE Persistent Disk volume
//!
//! A cloud disk attached to the host and mounted once at the global mount
//! point `root/global/pd/<pd_name>`. Each pod using the disk gets a bind
//! mount of that global mount at its canonical volume path, so a disk shared
//! read-only by several pods is attached only once.
//!
//! ```text
//! Unattached --attach--> AttachedGlobal --bind mount--> BindMounted
//! BindMounted --unmount--> AttachedGlobal --detach (last reference)--> Unattached
//! ```
//!
//! Whether the last reference is gone is decided from the live mount table
//! (see [`Mounter::ref_count`]), never from in-memory state, so the decision
//! survives agent restarts. Unmount and detach of a device are serialized
//! through [`DiskLockRegistry`].

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use crate::domain::disk::DiskAttacher;
use crate::domain::identity::{global_pd_path, VolumeIdentity, VolumeKind};
use crate::domain::mount::{MountError, MountFlags, Mounter, UnmountFlags};
use crate::domain::spec::PersistentDiskSource;
use crate::domain::volume::{
    create_volume_dir, with_deadline, Builder, Cleaner, Volume, VolumeError,
};

/// Default deadline for each attach, detach, mount, unmount and ref count call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(120);

/// Provider attributes of a disk. Not recoverable from the directory layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskAttributes {
    pub pd_name: String,
    /// Empty to let the provider detect the filesystem
    pub fs_type: String,
    /// `None` mounts the whole disk
    pub partition: Option<u32>,
    pub read_only: bool,
}

impl DiskAttributes {
    /// Suffix appended to the disk's device path to select the partition
    /// (`-part<N>`), empty for the whole disk
    pub fn partition_suffix(&self) -> String {
        self.partition.map(|p| format!("-part{}", p)).unwrap_or_default()
    }
}

impl From<&PersistentDiskSource> for DiskAttributes {
    fn from(source: &PersistentDiskSource) -> Self {
        Self {
            pd_name: source.pd_name.clone(),
            fs_type: source.fs_type.clone(),
            partition: (source.partition != 0).then_some(source.partition),
            read_only: source.read_only,
        }
    }
}

/// Observed lifecycle state of a persistent disk volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskState {
    Unattached,
    /// Attached and mounted globally, no bind mount for this pod
    AttachedGlobal,
    BindMounted,
}

/// One async lock per backing device
#[derive(Debug, Default)]
pub struct DiskLockRegistry {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl DiskLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, device: &Path) -> OwnedMutexGuard<()> {
        let lock = self.locks.entry(device.to_path_buf()).or_default().clone();
        lock.lock_owned().await
    }
}

/// Shared service handles injected into every persistent disk
#[derive(Clone)]
pub struct DiskCapabilities {
    pub disk_attacher: Arc<dyn DiskAttacher>,
    pub mounter: Arc<dyn Mounter>,
    pub locks: Arc<DiskLockRegistry>,
    pub operation_timeout: Duration,
}

impl DiskCapabilities {
    pub fn new(disk_attacher: Arc<dyn DiskAttacher>, mounter: Arc<dyn Mounter>) -> Self {
        Self {
            disk_attacher,
            mounter,
            locks: Arc::new(DiskLockRegistry::new()),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, operation_timeout: Duration) -> Self {
        self.operation_timeout = operation_timeout;
        self
    }
}

pub struct PersistentDisk {
    identity: VolumeIdentity,
    /// `None` when reconstructed from the directory layout for tear down
    attributes: Option<DiskAttributes>,
    capabilities: DiskCapabilities,
}

impl PersistentDisk {
    pub fn new(identity: VolumeIdentity, attributes: DiskAttributes, capabilities: DiskCapabilities) -> Self {
        Self {
            identity,
            attributes: Some(attributes),
            capabilities,
        }
    }

    /// Identity-only disk, able to tear down but not to set up
    pub fn for_tear_down(identity: VolumeIdentity, capabilities: DiskCapabilities) -> Self {
        Self {
            identity,
            attributes: None,
            capabilities,
        }
    }

    pub fn identity(&self) -> &VolumeIdentity {
        &self.identity
    }

    pub fn attributes(&self) -> Option<&DiskAttributes> {
        self.attributes.as_ref()
    }

    /// Host-wide mount point of the disk, known only with attributes
    pub fn global_mount_path(&self) -> Option<PathBuf> {
        self.attributes
            .as_ref()
            .map(|a| global_pd_path(&self.identity.root_dir, &a.pd_name))
    }

    /// Derive the current state from the filesystem and mount table
    pub async fn observe_state(&self) -> Result<DiskState, VolumeError> {
        let path = self.path();
        if path_exists(&path).await? && self.observe_mount(&path).await?.is_some() {
            return Ok(DiskState::BindMounted);
        }
        match self.global_mount_path() {
            Some(global) if self.observe_mount(&global).await?.is_some() => Ok(DiskState::AttachedGlobal),
            _ => Ok(DiskState::Unattached),
        }
    }

    /// Device and reference count of the mount at `path`, `None` if nothing
    /// is mounted there
    async fn observe_mount(&self, path: &Path) -> Result<Option<(PathBuf, usize)>, VolumeError> {
        let mounter = &self.capabilities.mounter;
        with_deadline("ref_count", self.capabilities.operation_timeout, async {
            match mounter.ref_count(path).await {
                Ok(observed) => Ok(Some(observed)),
                Err(MountError::NotMounted(_)) => Ok(None),
                Err(source) => Err(VolumeError::Mount {
                    operation: "ref_count",
                    source,
                }),
            }
        })
        .await
    }

    async fn attach(&self) -> Result<(), VolumeError> {
        with_deadline("attach_disk", self.capabilities.operation_timeout, async {
            self.capabilities
                .disk_attacher
                .attach_disk(self)
                .await
                .map_err(|source| VolumeError::Disk {
                    operation: "attach_disk",
                    source,
                })
        })
        .await
    }

    async fn detach(&self, device_path: &Path) -> Result<(), VolumeError> {
        with_deadline("detach_disk", self.capabilities.operation_timeout, async {
            self.capabilities
                .disk_attacher
                .detach_disk(self, device_path)
                .await
                .map_err(|source| VolumeError::Disk {
                    operation: "detach_disk",
                    source,
                })
        })
        .await
    }

    async fn bind_mount(&self, global: &Path, path: &Path, read_only: bool) -> Result<(), VolumeError> {
        let mut flags = MountFlags::BIND;
        if read_only {
            flags |= MountFlags::READ_ONLY;
        }
        with_deadline("bind_mount", self.capabilities.operation_timeout, async {
            self.capabilities
                .mounter
                .mount(global, path, "", flags, "")
                .await
                .map_err(|source| VolumeError::Mount {
                    operation: "bind_mount",
                    source,
                })
        })
        .await
    }

    async fn unmount(&self, path: &Path) -> Result<(), VolumeError> {
        with_deadline("unmount", self.capabilities.operation_timeout, async {
            self.capabilities
                .mounter
                .unmount(path, UnmountFlags::empty())
                .await
                .map_err(|source| VolumeError::Mount {
                    operation: "unmount",
                    source,
                })
        })
        .await
    }
}

impl std::fmt::Debug for PersistentDisk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentDisk")
            .field("identity", &self.identity)
            .field("attributes", &self.attributes)
            .field("operation_timeout", &self.capabilities.operation_timeout)
            .finish_non_exhaustive()
    }
}

impl Volume for PersistentDisk {
    fn kind(&self) -> VolumeKind {
        VolumeKind::GcePersistentDisk
    }

    fn path(&self) -> PathBuf {
        self.identity.path(VolumeKind::GcePersistentDisk)
    }
}

#[async_trait]
impl Builder for PersistentDisk {
    async fn set_up(&self) -> Result<(), VolumeError> {
        let path = self.path();
        if path_exists(&path).await? {
            debug!("Persistent disk volume {} already set up", path.display());
            return Ok(());
        }

        let attributes = self
            .attributes
            .as_ref()
            .ok_or_else(|| VolumeError::MissingDiskAttributes(self.identity.key()))?;

        info!(
            "Attaching persistent disk '{}{}' for pod {} (fs_type: '{}', read_only: {})",
            attributes.pd_name,
            attributes.partition_suffix(),
            self.identity.pod_id,
            attributes.fs_type,
            attributes.read_only
        );
        self.attach().await?;

        let global = global_pd_path(&self.identity.root_dir, &attributes.pd_name);
        create_volume_dir(&path).await?;

        if let Err(e) = self.bind_mount(&global, &path, attributes.read_only).await {
            warn!(
                "Bind mount of {} onto {} failed, removing volume directory: {}",
                global.display(),
                path.display(),
                e
            );
            // The disk stays attached; attaching again is idempotent. A timed
            // out mount may still land, so only an empty directory is removed.
            if let Err(cleanup) = tokio::fs::remove_dir(&path).await {
                error!(
                    "Failed to remove volume directory {} after bind mount failure: {}",
                    path.display(),
                    cleanup
                );
            }
            return Err(e);
        }

        info!(
            "Persistent disk '{}' bind mounted at {}",
            attributes.pd_name,
            path.display()
        );
        Ok(())
    }
}

#[async_trait]
impl Cleaner for PersistentDisk {
    async fn tear_down(&self) -> Result<(), VolumeError> {
        let path = self.path();
        if !path_exists(&path).await? {
            debug!("Persistent disk volume {} already torn down", path.display());
            return Ok(());
        }

        let Some((device, _)) = self.observe_mount(&path).await? else {
            // Directory left behind without a mount: nothing to unmount or
            // detach. Removal is non-recursive so an unrecognized live mount
            // point fails instead of losing the disk's contents.
            warn!("No mount found at {}, removing stale volume directory", path.display());
            return remove_mount_point(&path).await;
        };

        let _guard = self.capabilities.locks.lock(&device).await;

        // Count observed under the lock and before the unmount
        let Some((device_path, mut ref_count)) = self.observe_mount(&path).await? else {
            debug!("Mount at {} removed while waiting for device lock", path.display());
            return remove_mount_point(&path).await;
        };

        self.unmount(&path).await?;
        ref_count = ref_count.saturating_sub(1);

        remove_mount_point(&path).await?;

        // Only the global mount left: this pod held the last reference
        if ref_count == 1 {
            info!(
                "Detaching device {} after last reference from pod {} was removed",
                device_path.display(),
                self.identity.pod_id
            );
            self.detach(&device_path).await?;
        } else {
            debug!(
                "Device {} still has {} references, leaving it attached",
                device_path.display(),
                ref_count
            );
        }

        Ok(())
    }
}

async fn path_exists(path: &Path) -> Result<bool, VolumeError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|e| VolumeError::io(path, e))
}

/// Remove an empty mount point directory
async fn remove_mount_point(path: &Path) -> Result<(), VolumeError> {
    match tokio::fs::remove_dir(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(VolumeError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockDiskAttacher, MockMounter};
    use tempfile::TempDir;

    struct Fixture {
        root: TempDir,
        mounter: Arc<MockMounter>,
        attacher: Arc<MockDiskAttacher>,
        capabilities: DiskCapabilities,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_timeout(Duration::from_secs(5))
        }

        fn with_timeout(operation_timeout: Duration) -> Self {
            let root = TempDir::new().unwrap();
            let mounter = Arc::new(MockMounter::new());
            let attacher = Arc::new(MockDiskAttacher::new(mounter.clone()));
            let capabilities = DiskCapabilities::new(attacher.clone(), mounter.clone())
                .with_operation_timeout(operation_timeout);
            Self {
                root,
                mounter,
                attacher,
                capabilities,
            }
        }

        fn disk(&self, pod_id: &str, read_only: bool) -> PersistentDisk {
            PersistentDisk::new(
                VolumeIdentity::new(self.root.path(), pod_id, "data"),
                DiskAttributes {
                    pd_name: "shared-disk".to_string(),
                    fs_type: "ext4".to_string(),
                    partition: None,
                    read_only,
                },
                self.capabilities.clone(),
            )
        }

        fn cleaner(&self, pod_id: &str) -> PersistentDisk {
            PersistentDisk::for_tear_down(
                VolumeIdentity::new(self.root.path(), pod_id, "data"),
                self.capabilities.clone(),
            )
        }
    }

    #[test]
    fn test_partition_zero_means_whole_disk() {
        let whole = DiskAttributes::from(&PersistentDiskSource {
            pd_name: "d".to_string(),
            fs_type: String::new(),
            partition: 0,
            read_only: false,
        });
        assert_eq!(whole.partition, None);
        assert_eq!(whole.partition_suffix(), "");

        let third = DiskAttributes::from(&PersistentDiskSource {
            pd_name: "d".to_string(),
            fs_type: String::new(),
            partition: 3,
            read_only: false,
        });
        assert_eq!(third.partition_suffix(), "-part3");
    }

    #[tokio::test]
    async fn test_set_up_attaches_and_bind_mounts() {
        let fx = Fixture::new();
        let disk = fx.disk("pod-a", true);

        disk.set_up().await.unwrap();

        assert!(disk.path().is_dir());
        assert_eq!(fx.attacher.attach_calls(), 1);
        let bind = fx.mounter.entry_at(&disk.path()).expect("bind mount recorded");
        assert_eq!(bind.source, fx.root.path().join("global/pd/shared-disk"));
        assert!(bind.flags.contains(MountFlags::BIND | MountFlags::READ_ONLY));
        assert_eq!(disk.observe_state().await.unwrap(), DiskState::BindMounted);
    }

    #[tokio::test]
    async fn test_set_up_twice_is_idempotent() {
        let fx = Fixture::new();
        let disk = fx.disk("pod-a", false);

        disk.set_up().await.unwrap();
        disk.set_up().await.unwrap();

        assert_eq!(fx.attacher.attach_calls(), 1);
        assert_eq!(fx.mounter.mount_calls(), 1);
    }

    #[tokio::test]
    async fn test_attach_failure_creates_nothing() {
        let fx = Fixture::new();
        fx.attacher.fail_attach(true);
        let disk = fx.disk("pod-a", false);

        let result = disk.set_up().await;
        assert!(matches!(result, Err(VolumeError::Disk { operation: "attach_disk", .. })));
        assert!(!disk.path().exists());
        assert_eq!(fx.mounter.mount_calls(), 0);
    }

    #[tokio::test]
    async fn test_bind_mount_failure_rolls_back_directory() {
        let fx = Fixture::new();
        fx.mounter.fail_mount(true);
        let disk = fx.disk("pod-a", false);

        let result = disk.set_up().await;
        assert!(matches!(result, Err(VolumeError::Mount { operation: "bind_mount", .. })));
        assert!(!disk.path().exists());
        // Disk is left attached
        assert_eq!(disk.observe_state().await.unwrap(), DiskState::AttachedGlobal);
        assert_eq!(fx.attacher.detach_calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_bind_mount_times_out_and_rolls_back() {
        let fx = Fixture::with_timeout(Duration::from_millis(50));
        fx.mounter.delay_mount(Duration::from_millis(500));
        let disk = fx.disk("pod-a", false);

        let result = disk.set_up().await;
        assert!(matches!(result, Err(VolumeError::Timeout { operation: "bind_mount", .. })));
        assert!(result.unwrap_err().is_retryable());
        assert!(!disk.path().exists());
        assert!(fx.mounter.entry_at(&disk.path()).is_none());
        assert_eq!(disk.observe_state().await.unwrap(), DiskState::AttachedGlobal);
        assert_eq!(fx.attacher.detach_calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_attach_times_out_before_any_mount() {
        let fx = Fixture::with_timeout(Duration::from_millis(50));
        fx.attacher.delay_attach(Duration::from_millis(500));
        let disk = fx.disk("pod-a", false);

        let result = disk.set_up().await;
        assert!(matches!(result, Err(VolumeError::Timeout { operation: "attach_disk", .. })));
        assert!(!disk.path().exists());
        assert_eq!(fx.mounter.mount_calls(), 0);
        assert!(!fx.attacher.is_attached("shared-disk"));
    }

    #[tokio::test]
    async fn test_partition_and_fs_type_reach_the_attacher() {
        let fx = Fixture::new();
        let disk = PersistentDisk::new(
            VolumeIdentity::new(fx.root.path(), "pod-a", "data"),
            DiskAttributes {
                pd_name: "shared-disk".to_string(),
                fs_type: "xfs".to_string(),
                partition: Some(2),
                read_only: false,
            },
            fx.capabilities.clone(),
        );

        disk.set_up().await.unwrap();

        let global = fx
            .mounter
            .entry_at(&fx.root.path().join("global/pd/shared-disk"))
            .expect("global mount recorded");
        assert_eq!(global.device, PathBuf::from("/dev/disk/by-id/google-shared-disk-part2"));
        assert_eq!(global.fs_type, "xfs");
        let (device, _) = fx.mounter.ref_count(&disk.path()).await.unwrap();
        assert_eq!(device, global.device);
    }

    #[tokio::test]
    async fn test_set_up_without_attributes_fails() {
        let fx = Fixture::new();
        let result = fx.cleaner("pod-a").set_up().await;
        assert!(matches!(result, Err(VolumeError::MissingDiskAttributes(_))));
    }

    #[tokio::test]
    async fn test_shared_disk_detached_after_last_reference() {
        let fx = Fixture::new();
        fx.disk("pod-a", true).set_up().await.unwrap();
        fx.disk("pod-b", true).set_up().await.unwrap();

        // Global mount plus two bind mounts share one device
        let (_, count) = fx.mounter.ref_count(&fx.disk("pod-a", true).path()).await.unwrap();
        assert_eq!(count, 3);

        fx.cleaner("pod-a").tear_down().await.unwrap();
        assert_eq!(fx.attacher.detach_calls(), 0);
        assert!(fx.attacher.is_attached("shared-disk"));

        fx.cleaner("pod-b").tear_down().await.unwrap();
        assert_eq!(fx.attacher.detach_calls(), 1);
        assert!(!fx.attacher.is_attached("shared-disk"));
        assert!(!fx.disk("pod-b", true).path().exists());
    }

    #[tokio::test]
    async fn test_unmount_failure_leaves_mount_in_place() {
        let fx = Fixture::new();
        let disk = fx.disk("pod-a", false);
        disk.set_up().await.unwrap();
        fx.mounter.fail_unmount(true);

        let result = fx.cleaner("pod-a").tear_down().await;
        assert!(matches!(result, Err(VolumeError::Mount { operation: "unmount", .. })));
        assert!(disk.path().exists());
        assert_eq!(fx.attacher.detach_calls(), 0);
        assert_eq!(disk.observe_state().await.unwrap(), DiskState::BindMounted);
    }

    #[tokio::test]
    async fn test_tear_down_without_set_up_succeeds() {
        let fx = Fixture::new();
        fx.cleaner("pod-a").tear_down().await.unwrap();
        assert_eq!(fx.mounter.unmount_calls(), 0);
    }

    #[tokio::test]
    async fn test_tear_down_removes_unmounted_directory() {
        let fx = Fixture::new();
        let disk = fx.cleaner("pod-a");
        std::fs::create_dir_all(disk.path()).unwrap();

        disk.tear_down().await.unwrap();

        assert!(!disk.path().exists());
        assert_eq!(fx.mounter.unmount_calls(), 0);
        assert_eq!(fx.attacher.detach_calls(), 0);
    }

    #[tokio::test]
    async fn test_tear_down_keeps_unrecognized_directory_contents() {
        let fx = Fixture::new();
        let disk = fx.cleaner("pod-a");
        std::fs::create_dir_all(disk.path()).unwrap();
        std::fs::write(disk.path().join("table.db"), b"rows").unwrap();

        let result = disk.tear_down().await;

        assert!(matches!(result, Err(VolumeError::Io { .. })));
        assert!(disk.path().join("table.db").exists());
        assert_eq!(fx.mounter.unmount_calls(), 0);
        assert_eq!(fx.attacher.detach_calls(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tear_down_through_symlinked_root_keeps_mounted_data() {
        let fx = Fixture::new();
        let real = fx.root.path().join("real");
        let link = fx.root.path().join("link");
        std::fs::create_dir_all(&real).unwrap();
        std::os::unix::fs::symlink(&real, &link).unwrap();

        // The mount table lists the resolved paths only
        let global = real.join("global/pd/shared-disk");
        let bind = real.join("pod-a/volumes/gce-pd/data");
        fx.mounter.mount_device("/dev/sdb", &global, "ext4");
        fx.mounter
            .mount(&global, &bind, "", MountFlags::BIND, "")
            .await
            .unwrap();
        std::fs::create_dir_all(&bind).unwrap();
        std::fs::write(bind.join("table.db"), b"rows").unwrap();
        let entries = fx.mounter.entries();

        let cleaner = PersistentDisk::for_tear_down(
            VolumeIdentity::new(&link, "pod-a", "data"),
            fx.capabilities.clone(),
        );
        assert!(cleaner.tear_down().await.is_err());

        assert!(bind.join("table.db").exists());
        assert_eq!(fx.mounter.entries(), entries);
        assert_eq!(fx.mounter.unmount_calls(), 0);
        assert_eq!(fx.attacher.detach_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_tear_down_detaches_exactly_once() {
        let fx = Fixture::new();
        fx.disk("pod-a", true).set_up().await.unwrap();
        fx.disk("pod-b", true).set_up().await.unwrap();

        let a = fx.cleaner("pod-a");
        let b = fx.cleaner("pod-b");
        let (ra, rb) = tokio::join!(a.tear_down(), b.tear_down());
        ra.unwrap();
        rb.unwrap();

        assert_eq!(fx.attacher.detach_calls(), 1);
    }

    #[tokio::test]
    async fn test_observe_state_unattached() {
        let fx = Fixture::new();
        assert_eq!(fx.disk("pod-a", false).observe_state().await.unwrap(), DiskState::Unattached);
    }
}
