// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume Reconciler
//!
//! Rebuilds the set of volumes present on disk after an agent restart by
//! walking `root/<pod_id>/volumes/<kind>/<name>`, producing a Cleaner for
//! every recognized entry. The scan is best-effort: unreadable directories
//! and unknown kinds are logged and skipped, never fatal.
//!
//! Directories renamed aside by an interrupted empty directory tear down
//! (`<name>.deleting~<suffix>` under `volumes/empty/`) are reported as
//! garbage instead of volumes. Only empty directory tear downs rename
//! aside, so such names under any other kind are left alone.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::domain::empty_directory::is_deleting_name;
use crate::domain::identity::{volume_key, VolumeKind, VOLUMES_DIR};
use crate::domain::volume::{Cleaner, Volume};

use super::volume_factory::VolumeFactory;

/// Outcome of one scan of the root directory
#[derive(Debug, Default)]
pub struct ScanReport {
    /// `"<pod_id>/<name>"` -> cleaner
    pub volumes: HashMap<String, Box<dyn Cleaner>>,
    /// Leftover `.deleting~` directories
    pub garbage: Vec<PathBuf>,
}

pub struct VolumeReconciler {
    factory: Arc<VolumeFactory>,
}

impl VolumeReconciler {
    pub fn new(factory: Arc<VolumeFactory>) -> Self {
        Self { factory }
    }

    pub fn root_dir(&self) -> &Path {
        self.factory.root_dir()
    }

    /// Volumes currently on disk, keyed by `"<pod_id>/<name>"`
    pub async fn get_current_volumes(&self) -> HashMap<String, Box<dyn Cleaner>> {
        self.scan().await.volumes
    }

    pub async fn scan(&self) -> ScanReport {
        let mut report = ScanReport::default();
        let root = self.factory.root_dir();

        let pods = match list_subdirectories(root).await {
            Ok(pods) => pods,
            Err(e) => {
                error!("Failed to list pod directories in {}: {}", root.display(), e);
                return report;
            }
        };

        for pod_id in pods {
            let volumes_dir = root.join(&pod_id).join(VOLUMES_DIR);
            let kinds = match list_subdirectories(&volumes_dir).await {
                Ok(kinds) => kinds,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // global/ and any pod that never had a volume
                    debug!("Skipping {}: no {} directory", pod_id, VOLUMES_DIR);
                    continue;
                }
                Err(e) => {
                    error!("Failed to list volume kinds in {}: {}", volumes_dir.display(), e);
                    continue;
                }
            };

            for kind in kinds {
                let kind_dir = volumes_dir.join(&kind);
                let names = match list_subdirectories(&kind_dir).await {
                    Ok(names) => names,
                    Err(e) => {
                        error!("Failed to list volumes in {}: {}", kind_dir.display(), e);
                        continue;
                    }
                };

                for name in names {
                    if is_deleting_name(&name) {
                        let path = kind_dir.join(&name);
                        if kind == VolumeKind::EmptyDirectory.as_str() {
                            debug!("Found interrupted tear down at {}", path.display());
                            report.garbage.push(path);
                        } else {
                            warn!("Ignoring {}: not left by an empty directory tear down", path.display());
                        }
                        continue;
                    }

                    let cleaner = match self.factory.create_volume_cleaner(&kind, &name, &pod_id) {
                        Ok(cleaner) => cleaner,
                        Err(e) => {
                            warn!("Skipping volume {}/{}/{}: {}", pod_id, kind, name, e);
                            continue;
                        }
                    };

                    let key = volume_key(&pod_id, &name);
                    if let Some(previous) = report.volumes.insert(key.clone(), cleaner) {
                        warn!(
                            "Volume {} exists under more than one kind, replacing {} entry",
                            key,
                            previous.kind()
                        );
                    }
                }
            }
        }

        info!(
            "Found {} volumes and {} interrupted tear downs under {}",
            report.volumes.len(),
            report.garbage.len(),
            root.display()
        );
        report
    }

    /// Delete leftover `.deleting~` directories, returning how many were removed
    pub async fn remove_garbage(&self, garbage: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in garbage {
            if !is_garbage_path(self.factory.root_dir(), path) {
                warn!("Refusing to remove {}: not an interrupted tear down", path.display());
                continue;
            }

            match tokio::fs::remove_dir_all(path).await {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => error!("Failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }
}

/// Whether `path` is `root/<pod_id>/volumes/empty/<name>.deleting~<suffix>`
fn is_garbage_path(root: &Path, path: &Path) -> bool {
    let Ok(relative) = path.strip_prefix(root) else {
        return false;
    };
    let components: Vec<_> = relative.components().map(|c| c.as_os_str()).collect();
    match components.as_slice() {
        [pod_id, volumes, kind, name] => {
            *volumes == VOLUMES_DIR
                && *kind == VolumeKind::EmptyDirectory.as_str()
                && pod_id.to_str().is_some_and(|p| p != "." && p != "..")
                && name.to_str().is_some_and(is_deleting_name)
        }
        _ => false,
    }
}

/// Names of the directories directly under `dir`
async fn list_subdirectories(dir: &Path) -> io::Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut names = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let file_type = match entry.file_type().await {
            Ok(file_type) => file_type,
            Err(e) => {
                warn!("Failed to stat {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if !file_type.is_dir() {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => names.push(name),
            Err(name) => warn!("Skipping non UTF-8 entry {:?} in {}", name, dir.display()),
        }
    }
    names.sort();
    Ok(names)
}
