/// Launcher configuration loading
/// Defaults match the shipped behavior: port 3000, 2s polling, 2s grace
use crate::config::types::{LaunchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Names the lifecycle uses when laying out extracted resources and
/// building the child environment. Stored in the artifact index so the
/// pack tool, not the launcher, decides them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchProfile {
    /// File name of the extracted runtime binary (platform suffix is appended)
    pub runtime_name: String,
    /// File name of the extracted server script
    pub server_script_name: String,
    /// File name of the extracted project store
    pub store_file_name: String,
    /// Directory the dependency archive is unpacked into
    pub dependency_dir_name: String,
    /// Variable pointing the child at the dependency directory
    pub dependency_env_var: String,
}

impl Default for LaunchProfile {
    fn default() -> Self {
        Self {
            runtime_name: "node".to_string(),
            server_script_name: "dev-server.ts".to_string(),
            store_file_name: "project.db".to_string(),
            dependency_dir_name: "node_modules".to_string(),
            dependency_env_var: "NODE_PATH".to_string(),
        }
    }
}

impl LaunchProfile {
    /// Reject names that would place resources outside the workspace
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("runtime_name", &self.runtime_name),
            ("server_script_name", &self.server_script_name),
            ("store_file_name", &self.store_file_name),
            ("dependency_dir_name", &self.dependency_dir_name),
        ];
        for (field, name) in names {
            let path = Path::new(name.as_str());
            let single = path.components().count() == 1
                && matches!(
                    path.components().next(),
                    Some(std::path::Component::Normal(_))
                );
            if !single {
                return Err(LaunchError::Config(format!(
                    "{} must be a plain file name, got {:?}",
                    field, name
                )));
            }
        }
        if self.dependency_env_var.is_empty() || self.dependency_env_var.contains('=') {
            return Err(LaunchError::Config(format!(
                "invalid dependency_env_var {:?}",
                self.dependency_env_var
            )));
        }
        Ok(())
    }
}

/// Runtime knobs of one launch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Port handed to the child server
    pub port: u16,
    /// Interval between store fingerprint polls
    pub poll_interval_ms: u64,
    /// Time between cooperative termination and forced kill
    pub grace_period_ms: u64,
    /// Where the repacked artifact is written (default: next to the running one)
    pub output: Option<PathBuf>,
    /// Parent directory for the session workspace (default: system temp dir)
    pub workspace_root: Option<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            poll_interval_ms: 2000,
            grace_period_ms: 2000,
            output: None,
            workspace_root: None,
        }
    }
}

impl LauncherConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LaunchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: LauncherConfig = serde_json::from_str(&raw).map_err(|e| {
            LaunchError::Config(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(LaunchError::Config(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.grace_period_ms == 0 {
            return Err(LaunchError::Config(
                "grace_period_ms must be greater than zero".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(LaunchError::Config("port must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root
            .clone()
            .unwrap_or_else(std::env::temp_dir)
    }
}
