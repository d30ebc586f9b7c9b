// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-memory mount table and disk attacher for tests
//!
//! `MockMounter` keeps a simulated mount table: every entry records the
//! device it is backed by, so bind mounts of a global disk mount share the
//! device and `ref_count` behaves like the kernel table would.
//! `MockDiskAttacher` mounts the disk device at the global mount path on
//! attach and removes every entry of the device on detach.
//!
//! Both support failure and delay injection; a delay elapses before any
//! state changes, so a call cancelled by a deadline leaves nothing behind.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::domain::disk::{DiskAttacher, DiskError};
use crate::domain::mount::{MountError, MountFlags, Mounter, UnmountFlags};
use crate::domain::persistent_disk::{DiskAttributes, PersistentDisk};

/// One simulated mount table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMountEntry {
    pub device: PathBuf,
    pub source: PathBuf,
    pub target: PathBuf,
    pub fs_type: String,
    pub flags: MountFlags,
}

#[derive(Default)]
pub struct MockMounter {
    entries: Mutex<Vec<MockMountEntry>>,
    mount_calls: AtomicUsize,
    unmount_calls: AtomicUsize,
    fail_mount: AtomicBool,
    fail_unmount: AtomicBool,
    mount_delay: Mutex<Option<Duration>>,
}

impl MockMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `mount` fail
    pub fn fail_mount(&self, fail: bool) {
        self.fail_mount.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `unmount` fail
    pub fn fail_unmount(&self, fail: bool) {
        self.fail_unmount.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `mount` wait `delay` first
    pub fn delay_mount(&self, delay: Duration) {
        *self.mount_delay.lock() = Some(delay);
    }

    pub fn mount_calls(&self) -> usize {
        self.mount_calls.load(Ordering::SeqCst)
    }

    pub fn unmount_calls(&self) -> usize {
        self.unmount_calls.load(Ordering::SeqCst)
    }

    /// Topmost entry mounted at `target`
    pub fn entry_at(&self, target: &Path) -> Option<MockMountEntry> {
        self.entries
            .lock()
            .iter()
            .rev()
            .find(|e| e.target == target)
            .cloned()
    }

    pub fn entries(&self) -> Vec<MockMountEntry> {
        self.entries.lock().clone()
    }

    /// Mount a device directly, as a disk attacher does for the global mount
    pub fn mount_device(&self, device: impl Into<PathBuf>, target: impl Into<PathBuf>, fs_type: &str) {
        let device = device.into();
        self.entries.lock().push(MockMountEntry {
            source: device.clone(),
            device,
            target: target.into(),
            fs_type: fs_type.to_string(),
            flags: MountFlags::empty(),
        });
    }

    /// Drop every entry backed by `device`
    pub fn remove_device(&self, device: &Path) {
        self.entries.lock().retain(|e| e.device != device);
    }
}

#[async_trait]
impl Mounter for MockMounter {
    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        _data: &str,
    ) -> Result<(), MountError> {
        self.mount_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.mount_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_mount.load(Ordering::SeqCst) {
            return Err(MountError::Backend(format!(
                "injected mount failure for {}",
                target.display()
            )));
        }

        let mut entries = self.entries.lock();
        // A bind mount inherits the device of its source mount
        let device = entries
            .iter()
            .rev()
            .find(|e| e.target == source)
            .map(|e| e.device.clone())
            .unwrap_or_else(|| source.to_path_buf());
        entries.push(MockMountEntry {
            device,
            source: source.to_path_buf(),
            target: target.to_path_buf(),
            fs_type: fs_type.to_string(),
            flags,
        });
        Ok(())
    }

    async fn unmount(&self, target: &Path, _flags: UnmountFlags) -> Result<(), MountError> {
        self.unmount_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_unmount.load(Ordering::SeqCst) {
            return Err(MountError::Backend(format!(
                "injected unmount failure for {}",
                target.display()
            )));
        }

        let mut entries = self.entries.lock();
        match entries.iter().rposition(|e| e.target == target) {
            Some(index) => {
                entries.remove(index);
                Ok(())
            }
            None => Err(MountError::NotMounted(target.to_path_buf())),
        }
    }

    async fn ref_count(&self, path: &Path) -> Result<(PathBuf, usize), MountError> {
        let entries = self.entries.lock();
        let device = entries
            .iter()
            .rev()
            .find(|e| e.target == path)
            .map(|e| e.device.clone())
            .ok_or_else(|| MountError::NotMounted(path.to_path_buf()))?;
        let count = entries.iter().filter(|e| e.device == device).count();
        Ok((device, count))
    }
}

pub struct MockDiskAttacher {
    mounter: Arc<MockMounter>,
    /// pd name -> device path
    attached: Mutex<HashMap<String, PathBuf>>,
    attach_calls: AtomicUsize,
    detach_calls: AtomicUsize,
    fail_attach: AtomicBool,
    fail_detach: AtomicBool,
    attach_delay: Mutex<Option<Duration>>,
}

impl MockDiskAttacher {
    pub fn new(mounter: Arc<MockMounter>) -> Self {
        Self {
            mounter,
            attached: Mutex::new(HashMap::new()),
            attach_calls: AtomicUsize::new(0),
            detach_calls: AtomicUsize::new(0),
            fail_attach: AtomicBool::new(false),
            fail_detach: AtomicBool::new(false),
            attach_delay: Mutex::new(None),
        }
    }

    /// Device path the disk (or its partition) appears under once attached
    pub fn device_path(attributes: &DiskAttributes) -> PathBuf {
        PathBuf::from(format!(
            "/dev/disk/by-id/google-{}{}",
            attributes.pd_name,
            attributes.partition_suffix()
        ))
    }

    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn fail_detach(&self, fail: bool) {
        self.fail_detach.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `attach_disk` wait `delay` first
    pub fn delay_attach(&self, delay: Duration) {
        *self.attach_delay.lock() = Some(delay);
    }

    pub fn attach_calls(&self) -> usize {
        self.attach_calls.load(Ordering::SeqCst)
    }

    pub fn detach_calls(&self) -> usize {
        self.detach_calls.load(Ordering::SeqCst)
    }

    pub fn is_attached(&self, pd_name: &str) -> bool {
        self.attached.lock().contains_key(pd_name)
    }
}

#[async_trait]
impl DiskAttacher for MockDiskAttacher {
    async fn attach_disk(&self, disk: &PersistentDisk) -> Result<(), DiskError> {
        self.attach_calls.fetch_add(1, Ordering::SeqCst);
        let attributes = disk
            .attributes()
            .ok_or_else(|| DiskError::Provider("disk attributes required to attach".to_string()))?;
        let delay = *self.attach_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err(DiskError::AttachFailed {
                disk: attributes.pd_name.clone(),
                reason: "injected attach failure".to_string(),
            });
        }

        let mut attached = self.attached.lock();
        if !attached.contains_key(&attributes.pd_name) {
            let device = Self::device_path(attributes);
            if let Some(global) = disk.global_mount_path() {
                self.mounter.mount_device(device.clone(), global, &attributes.fs_type);
            }
            attached.insert(attributes.pd_name.clone(), device);
        }
        Ok(())
    }

    async fn detach_disk(&self, _disk: &PersistentDisk, device_path: &Path) -> Result<(), DiskError> {
        self.detach_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err(DiskError::DetachFailed {
                device: device_path.display().to_string(),
                reason: "injected detach failure".to_string(),
            });
        }

        self.mounter.remove_device(device_path);
        self.attached.lock().retain(|_, device| device != device_path);
        Ok(())
    }
}
