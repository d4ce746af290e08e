//! Configuration management
//!
//! YAML configuration with full defaults: a missing file or any omitted
//! section falls back to the values the original deployment used.

use crate::engine::EngineSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Camera stream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            url: default_camera_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Debounce engine thresholds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_loss_timeout_ms")]
    pub loss_timeout_ms: u64,
    /// Evict per-code state unseen for this long; absent = never evict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evict_idle_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            loss_timeout_ms: default_loss_timeout_ms(),
            evict_idle_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn settings(&self) -> EngineSettings {
        EngineSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            loss_timeout: Duration::from_millis(self.loss_timeout_ms),
            evict_idle: self.evict_idle_ms.map(Duration::from_millis),
        }
    }
}

/// Catalog storage location
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Data directory override; defaults to the platform data dir
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl AppConfig {
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.warn_on_odd_thresholds();
        Ok(config)
    }

    /// Load the file if it exists, otherwise run on defaults.
    pub async fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path).await
        } else {
            warn!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    fn warn_on_odd_thresholds(&self) {
        if self.engine.loss_timeout_ms < self.engine.debounce_ms {
            warn!(
                "loss_timeout_ms ({}) is below debounce_ms ({}); a code may flicker into a second read within a single dwell",
                self.engine.loss_timeout_ms, self.engine.debounce_ms
            );
        }
        if let Some(idle) = self.engine.evict_idle_ms {
            if idle < self.engine.loss_timeout_ms {
                warn!(
                    "evict_idle_ms ({}) is below loss_timeout_ms ({}); state may be evicted before a code is even considered lost",
                    idle, self.engine.loss_timeout_ms
                );
            }
        }
    }
}

fn default_camera_url() -> String {
    "http://192.168.1.244:8080/video".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_loss_timeout_ms() -> u64 {
    1000
}
