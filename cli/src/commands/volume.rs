// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Volume inspection and maintenance commands
//!
//! Commands: scan, gc, path

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use aegis_volumes_core::application::{ScanReport, VolumeFactory, VolumeReconciler};
use aegis_volumes_core::domain::identity::{VolumeIdentity, VolumeKind};
use aegis_volumes_core::domain::node_config::VolumeConfigManifest;
use aegis_volumes_core::domain::volume::Volume;
use aegis_volumes_core::infrastructure::{SystemMounter, UnconfiguredDiskAttacher};

/// Effective configuration: `--root-dir` wins over the configuration file
pub fn load_config(
    config_override: Option<PathBuf>,
    root_dir_override: Option<PathBuf>,
) -> Result<VolumeConfigManifest> {
    let mut config = VolumeConfigManifest::load_or_default(config_override)
        .context("Failed to load configuration")?;
    if let Some(root_dir) = root_dir_override {
        config.spec.root_dir = root_dir;
    }
    config.validate().context("Configuration validation failed")?;
    Ok(config)
}

/// Reconciler over the real mount table. Cleaners built here are only
/// inspected, so disks are never attached or detached.
fn reconciler(config: &VolumeConfigManifest) -> VolumeReconciler {
    let factory = VolumeFactory::from_config(
        &config.spec,
        Arc::new(UnconfiguredDiskAttacher),
        Arc::new(SystemMounter::new()),
    );
    VolumeReconciler::new(Arc::new(factory))
}

pub async fn scan(config: &VolumeConfigManifest, as_json: bool) -> Result<()> {
    let report = reconciler(config).scan().await;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
        return Ok(());
    }

    let mut keys: Vec<_> = report.volumes.keys().collect();
    keys.sort();

    println!(
        "{}",
        format!("Volumes under {}:", config.spec.root_dir.display()).bold()
    );
    if keys.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for key in keys {
        let cleaner = &report.volumes[key];
        println!(
            "  {} [{}] {}",
            key.bold(),
            cleaner.kind(),
            cleaner.path().display().to_string().dimmed()
        );
    }

    if !report.garbage.is_empty() {
        println!();
        println!(
            "{}",
            format!("{} interrupted tear downs (run `gc` to remove):", report.garbage.len()).yellow()
        );
        for path in &report.garbage {
            println!("  {}", path.display());
        }
    }

    Ok(())
}

fn report_json(report: &ScanReport) -> serde_json::Value {
    let mut volumes: Vec<_> = report
        .volumes
        .iter()
        .map(|(key, cleaner)| {
            json!({
                "key": key,
                "kind": cleaner.kind(),
                "path": cleaner.path(),
            })
        })
        .collect();
    volumes.sort_by(|a, b| a["key"].as_str().cmp(&b["key"].as_str()));

    json!({
        "volumes": volumes,
        "garbage": report.garbage,
    })
}

pub async fn gc(config: &VolumeConfigManifest, dry_run: bool) -> Result<()> {
    let reconciler = reconciler(config);
    let report = reconciler.scan().await;

    if report.garbage.is_empty() {
        println!("{}", "✓ Nothing to remove".green());
        return Ok(());
    }

    if dry_run {
        for path in &report.garbage {
            println!("would remove {}", path.display());
        }
        return Ok(());
    }

    let removed = reconciler.remove_garbage(&report.garbage).await;
    info!("Removed {} of {} leftover directories", removed, report.garbage.len());

    if removed == report.garbage.len() {
        println!("{}", format!("✓ Removed {} directories", removed).green());
        Ok(())
    } else {
        anyhow::bail!(
            "Removed {} of {} directories, see log for failures",
            removed,
            report.garbage.len()
        )
    }
}

pub fn path(config: &VolumeConfigManifest, pod_id: &str, kind: &str, name: &str) -> Result<()> {
    let kind: VolumeKind = kind.parse()?;
    let identity = VolumeIdentity::new(config.spec.root_dir.clone(), pod_id, name);
    identity.validate()?;
    println!("{}", identity.path(kind).display());
    Ok(())
}
