use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::CpackConfig;
use crate::xdg;

/// Project-level config file name
pub const CONFIG_FILE: &str = "cpack.toml";

/// Discovers cpack configuration by traversing up the directory tree
///
/// Falls back to `$XDG_CONFIG_HOME/cpack/config.toml`.
pub fn discover_config(start_dir: &Path) -> Result<Option<PathBuf>> {
    for dir in start_dir.ancestors() {
        let config_path = dir.join(CONFIG_FILE);
        if config_path.is_file() {
            return Ok(Some(config_path));
        }
    }

    let global_config = xdg::config_dir().join("config.toml");
    if global_config.is_file() {
        return Ok(Some(global_config));
    }

    Ok(None)
}

/// Loads configuration with auto-discovery support
///
/// An explicit path must exist. Without one, the discovered file is used,
/// and `Ok(None)` means nothing was found.
pub fn load_config_with_discovery(explicit_path: Option<&Path>) -> Result<Option<CpackConfig>> {
    if let Some(config_path) = explicit_path {
        return Ok(Some(CpackConfig::from_file(config_path)?));
    }

    let current_dir =
        std::env::current_dir().context("Failed to get current directory for config discovery")?;
    match discover_config(&current_dir)? {
        Some(path) => {
            debug!(path = %path.display(), "Using discovered config");
            Ok(Some(CpackConfig::from_file(&path)?))
        }
        None => Ok(None),
    }
}
