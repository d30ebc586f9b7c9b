// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Volume Configuration Types
//
// Defines the configuration schema for the volume manager of an AEGIS
// Agent Host node:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Root directory of the per-pod volume layout
// - Deadline applied to every disk and mount call

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "VolumeConfig";

/// Top-level Kubernetes-style volume configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfigManifest {
    /// API version (must be "100monkeys.ai/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "VolumeConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: VolumeConfigSpec,
}

/// Manifest metadata (Kubernetes-style)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConfigSpec {
    /// Root of the `<pod_id>/volumes/<kind>/<name>` layout
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Deadline for each attach, detach, mount and unmount call
    #[serde(default = "default_operation_timeout", with = "humantime_serde")]
    pub operation_timeout: Duration,
}

impl Default for VolumeConfigSpec {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            operation_timeout: default_operation_timeout(),
        }
    }
}

impl Default for VolumeConfigManifest {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "node-volumes".to_string(),
                version: None,
                labels: None,
            },
            spec: VolumeConfigSpec::default(),
        }
    }
}

impl VolumeConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. AEGIS_VOLUME_CONFIG environment variable
    /// 2. ./aegis-volumes.yaml (working directory)
    /// 3. ~/.aegis/volumes.yaml (user home)
    /// 4. /etc/aegis/volumes.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("AEGIS_VOLUME_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./aegis-volumes.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".aegis").join("volumes.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/aegis/volumes.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path must exist and parse
        if let Some(path) = cli_path {
            tracing::info!("Loading volume configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load volume config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading volume configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No volume configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("AEGIS_VOLUME_ROOT_DIR") {
            tracing::info!("Environment override: AEGIS_VOLUME_ROOT_DIR={}", val);
            self.spec.root_dir = PathBuf::from(val);
        }

        if let Ok(val) = std::env::var("AEGIS_VOLUME_OPERATION_TIMEOUT") {
            match humantime_serde::re::humantime::parse_duration(&val) {
                Ok(timeout) => {
                    tracing::info!("Environment override: AEGIS_VOLUME_OPERATION_TIMEOUT={}", val);
                    self.spec.operation_timeout = timeout;
                }
                Err(e) => {
                    tracing::warn!(
                        "Invalid value for AEGIS_VOLUME_OPERATION_TIMEOUT: '{}' ({}). Ignoring.",
                        val, e
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version, API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        if !self.spec.root_dir.is_absolute() {
            anyhow::bail!(
                "spec.root_dir must be an absolute path, got {:?}",
                self.spec.root_dir
            );
        }

        if self.spec.operation_timeout.is_zero() {
            anyhow::bail!("spec.operation_timeout must be greater than zero");
        }

        Ok(())
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/var/lib/aegis/pods")
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(120)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_manifest() {
        let manifest = VolumeConfigManifest::default();
        assert_eq!(manifest.api_version, "100monkeys.ai/v1");
        assert_eq!(manifest.kind, "VolumeConfig");
        assert_eq!(manifest.spec.root_dir, PathBuf::from("/var/lib/aegis/pods"));
        assert_eq!(manifest.spec.operation_timeout, Duration::from_secs(120));
        assert!(manifest.validate().is_ok());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
apiVersion: 100monkeys.ai/v1
kind: VolumeConfig
metadata:
  name: edge-node
spec:
  root_dir: /srv/aegis/pods
  operation_timeout: 30s
"#;
        let manifest = VolumeConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.metadata.name, "edge-node");
        assert_eq!(manifest.spec.root_dir, PathBuf::from("/srv/aegis/pods"));
        assert_eq!(manifest.spec.operation_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_spec_defaults_when_omitted() {
        let yaml = "apiVersion: 100monkeys.ai/v1\nkind: VolumeConfig\nmetadata:\n  name: n\n";
        let manifest = VolumeConfigManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(manifest.spec.root_dir, PathBuf::from("/var/lib/aegis/pods"));
    }

    #[test]
    fn test_yaml_file_roundtrip() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("volumes.yaml");

        let mut manifest = VolumeConfigManifest::default();
        manifest.spec.operation_timeout = Duration::from_secs(90);
        manifest.to_yaml_file(&path).unwrap();

        let loaded = VolumeConfigManifest::from_yaml_file(&path).unwrap();
        assert_eq!(loaded.spec.operation_timeout, Duration::from_secs(90));
        assert_eq!(loaded.metadata.name, manifest.metadata.name);
    }

    #[test]
    fn test_load_explicit_missing_path_fails() {
        assert!(VolumeConfigManifest::load_or_default(Some(PathBuf::from("/nonexistent/volumes.yaml"))).is_err());
    }

    #[test]
    fn test_validation() {
        let mut manifest = VolumeConfigManifest::default();

        manifest.api_version = "wrong/v1".to_string();
        assert!(manifest.validate().is_err());
        manifest.api_version = API_VERSION.to_string();

        manifest.kind = "NodeConfig".to_string();
        assert!(manifest.validate().is_err());
        manifest.kind = KIND.to_string();

        manifest.metadata.name = String::new();
        assert!(manifest.validate().is_err());
        manifest.metadata.name = "n".to_string();

        manifest.spec.root_dir = PathBuf::from("relative/root");
        assert!(manifest.validate().is_err());
        manifest.spec.root_dir = PathBuf::from("/root");

        manifest.spec.operation_timeout = Duration::ZERO;
        assert!(manifest.validate().is_err());
    }
}
