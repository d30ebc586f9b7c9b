// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! System Mounter
//!
//! Linux implementation of [`Mounter`] on top of `mount(2)` and `umount2(2)`
//! through `nix::mount`. Reference counts come from the kernel mount table
//! (`/proc/self/mounts`): a bind mount is listed with the block device of its
//! source, so every per-pod bind mount of a disk and its global mount share
//! one device. The kernel records symlink-resolved mount points, so paths are
//! canonicalized before they are looked up or unmounted.
//!
//! **Limitations:**
//! - Mount and unmount require `CAP_SYS_ADMIN`
//! - On non-Linux hosts mount/unmount return [`MountError::Backend`]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::mount::{MountError, MountFlags, Mounter, UnmountFlags};

/// Default location of the kernel mount table
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountTableEntry {
    pub device: PathBuf,
    pub mount_point: PathBuf,
    pub fs_type: String,
}

pub struct SystemMounter {
    mount_table: PathBuf,
}

impl SystemMounter {
    pub fn new() -> Self {
        Self::with_mount_table(PROC_MOUNTS)
    }

    /// Read reference counts from another table file
    pub fn with_mount_table(mount_table: impl Into<PathBuf>) -> Self {
        Self {
            mount_table: mount_table.into(),
        }
    }

    async fn read_table(&self) -> Result<Vec<MountTableEntry>, MountError> {
        let content = tokio::fs::read_to_string(&self.mount_table)
            .await
            .map_err(|e| MountError::MountTable(format!("{}: {}", self.mount_table.display(), e)))?;
        Ok(parse_mount_table(&content))
    }
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(
        &self,
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: &str,
    ) -> Result<(), MountError> {
        debug!(
            "Mounting {} on {} (fs_type: '{}', flags: {:?})",
            source.display(),
            target.display(),
            fs_type,
            flags
        );
        let source = source.to_path_buf();
        let target = target.to_path_buf();
        let fs_type = fs_type.to_string();
        let data = data.to_string();
        tokio::task::spawn_blocking(move || sys::mount(&source, &target, &fs_type, flags, &data))
            .await
            .map_err(|e| MountError::Backend(format!("mount task failed: {}", e)))?
    }

    async fn unmount(&self, target: &Path, flags: UnmountFlags) -> Result<(), MountError> {
        let target = resolve(target).await;
        debug!("Unmounting {} (flags: {:?})", target.display(), flags);
        tokio::task::spawn_blocking(move || sys::unmount(&target, flags))
            .await
            .map_err(|e| MountError::Backend(format!("unmount task failed: {}", e)))?
    }

    async fn ref_count(&self, path: &Path) -> Result<(PathBuf, usize), MountError> {
        let table = self.read_table().await?;
        ref_count_in(&table, &resolve(path).await)
    }
}

/// `path` with symlinks resolved, as the kernel lists it. Paths that do not
/// exist are returned unchanged.
async fn resolve(path: &Path) -> PathBuf {
    tokio::fs::canonicalize(path)
        .await
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Device backing the mount at `path` and the number of entries using it
pub fn ref_count_in(table: &[MountTableEntry], path: &Path) -> Result<(PathBuf, usize), MountError> {
    // Later entries shadow earlier ones on the same mount point
    let device = table
        .iter()
        .rev()
        .find(|e| e.mount_point == path)
        .map(|e| e.device.clone())
        .ok_or_else(|| MountError::NotMounted(path.to_path_buf()))?;
    let count = table.iter().filter(|e| e.device == device).count();
    Ok((device, count))
}

/// Parse `/proc/mounts` format: `device mount_point fs_type options dump pass`
pub fn parse_mount_table(content: &str) -> Vec<MountTableEntry> {
    content
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            Some(MountTableEntry {
                device: PathBuf::from(unescape(device)),
                mount_point: PathBuf::from(unescape(mount_point)),
                fs_type: fs_type.to_string(),
            })
        })
        .collect()
}

/// Decode the kernel's octal escapes (`\040` space, `\011` tab, `\012`
/// newline, `\134` backslash)
fn unescape(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits.iter().fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(target_os = "linux")]
mod sys {
    use super::*;
    use nix::errno::Errno;
    use nix::mount::{MntFlags, MsFlags};
    use std::os::unix::ffi::OsStrExt;

    pub(super) fn ms_flags(flags: MountFlags) -> MsFlags {
        let mut ms = MsFlags::empty();
        ms.set(MsFlags::MS_RDONLY, flags.contains(MountFlags::READ_ONLY));
        ms.set(MsFlags::MS_NOSUID, flags.contains(MountFlags::NO_SUID));
        ms.set(MsFlags::MS_NODEV, flags.contains(MountFlags::NO_DEV));
        ms.set(MsFlags::MS_NOEXEC, flags.contains(MountFlags::NO_EXEC));
        ms.set(MsFlags::MS_REMOUNT, flags.contains(MountFlags::REMOUNT));
        ms.set(MsFlags::MS_BIND, flags.contains(MountFlags::BIND));
        ms.set(MsFlags::MS_REC, flags.contains(MountFlags::RECURSIVE));
        ms
    }

    pub(super) fn mnt_flags(flags: UnmountFlags) -> MntFlags {
        let mut mnt = MntFlags::empty();
        mnt.set(MntFlags::MNT_FORCE, flags.contains(UnmountFlags::FORCE));
        mnt.set(MntFlags::MNT_DETACH, flags.contains(UnmountFlags::DETACH));
        mnt
    }

    fn check_path(path: &Path) -> Result<(), MountError> {
        if path.as_os_str().as_bytes().contains(&0) {
            return Err(MountError::InvalidPath(path.display().to_string()));
        }
        Ok(())
    }

    fn syscall_error(operation: &'static str, target: &Path, errno: Errno) -> MountError {
        MountError::Syscall {
            operation,
            target: target.to_path_buf(),
            source: std::io::Error::from(errno),
        }
    }

    fn non_empty(value: &str) -> Option<&str> {
        (!value.is_empty()).then_some(value)
    }

    pub(super) fn mount(
        source: &Path,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: &str,
    ) -> Result<(), MountError> {
        check_path(source)?;
        check_path(target)?;

        nix::mount::mount(Some(source), target, non_empty(fs_type), ms_flags(flags), non_empty(data))
            .map_err(|errno| syscall_error("mount", target, errno))?;

        // The kernel ignores MS_RDONLY on the initial bind; it only applies on remount
        if flags.contains(MountFlags::BIND | MountFlags::READ_ONLY) {
            let remount = MountFlags::REMOUNT | MountFlags::BIND | MountFlags::READ_ONLY;
            nix::mount::mount(Some(source), target, None::<&str>, ms_flags(remount), None::<&str>)
                .map_err(|errno| syscall_error("remount", target, errno))?;
        }
        Ok(())
    }

    pub(super) fn unmount(target: &Path, flags: UnmountFlags) -> Result<(), MountError> {
        check_path(target)?;
        match nix::mount::umount2(target, mnt_flags(flags)) {
            Ok(()) => Ok(()),
            Err(Errno::EINVAL) => Err(MountError::NotMounted(target.to_path_buf())),
            Err(errno) => Err(syscall_error("umount2", target, errno)),
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod sys {
    use super::*;

    pub(super) fn mount(
        _source: &Path,
        _target: &Path,
        _fs_type: &str,
        _flags: MountFlags,
        _data: &str,
    ) -> Result<(), MountError> {
        Err(MountError::Backend("mounting is only supported on Linux".to_string()))
    }

    pub(super) fn unmount(_target: &Path, _flags: UnmountFlags) -> Result<(), MountError> {
        Err(MountError::Backend("unmounting is only supported on Linux".to_string()))
    }
}
