//! Configuration management for the koca launcher

pub mod schema;

pub use schema::LauncherConfig;

use crate::error::{LauncherError, LauncherResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Environment variable pointing at an alternative config file
pub const ENV_CONFIG: &str = "KOCA_LAUNCHER_CONFIG";

/// Configuration manager
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Create a config manager honoring `KOCA_LAUNCHER_CONFIG`
    pub fn new() -> Self {
        let config_path = std::env::var_os(ENV_CONFIG)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_config_path);
        Self { config_path }
    }

    /// Create a config manager with a custom path
    pub fn with_path(path: PathBuf) -> Self {
        Self { config_path: path }
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("koca")
            .join("launcher.toml")
    }

    /// Load configuration from file (defaults if absent), then apply
    /// environment overrides
    pub async fn load(&self) -> LauncherResult<LauncherConfig> {
        let mut config = if fs::try_exists(&self.config_path).await.unwrap_or(false) {
            self.load_from_file(&self.config_path).await?
        } else {
            debug!("Config file not found, using defaults");
            LauncherConfig::default()
        };

        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load configuration from a specific file
    pub async fn load_from_file(&self, path: &Path) -> LauncherResult<LauncherConfig> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| LauncherError::io(format!("reading config from {}", path.display()), e))?;

        let invalid = |reason: String| LauncherError::ConfigInvalid {
            path: path.to_path_buf(),
            reason,
        };
        let config: LauncherConfig = toml::from_str(&content).map_err(|e| invalid(e.to_string()))?;
        config.validate().map_err(invalid)?;
        Ok(config)
    }

    /// Get the config file path
    pub fn path(&self) -> &Path {
        &self.config_path
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
