//! Data directory resolution
//!
//! The catalog lives in the platform data dir (`%APPDATA%` on Windows,
//! `~/.local/share` on Linux) unless the config overrides it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory name under the platform data dir
const APP_DIR: &str = "scanwatch";

/// Default data directory; falls back to the working directory when the
/// platform has no data dir.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

/// Create the data directory if needed and return it.
pub fn ensure_dir(dir: &Path) -> Result<&Path> {
    if !dir.exists() {
        debug!("Creating data directory: {}", dir.display());
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    }
    Ok(dir)
}

/// The catalog database path inside a data directory.
pub fn catalog_db_path(dir: &Path) -> PathBuf {
    dir.join("catalog.sled")
}
