//! XDG Base Directory support for cpack
//!
//! - `$XDG_CACHE_HOME/cpack/` (default: `~/.cache/cpack/`) - hash cache, model store
//! - `$XDG_CONFIG_HOME/cpack/` (default: `~/.config/cpack/`) - global config
//! - `$XDG_DATA_HOME/cpack/workspace/` (default: `~/.local/share/cpack/workspace/`) - installed workspaces

use std::path::PathBuf;

const APP: &str = "cpack";

fn base(var: &str, platform: Option<PathBuf>, home_suffix: &[&str], fallback: &str) -> PathBuf {
    if let Ok(dir) = std::env::var(var) {
        if !dir.is_empty() {
            return PathBuf::from(dir).join(APP);
        }
    }
    if let Some(dir) = platform {
        return dir.join(APP);
    }
    match dirs::home_dir() {
        Some(home) => home_suffix
            .iter()
            .fold(home, |path, part| path.join(part))
            .join(APP),
        None => PathBuf::from(fallback),
    }
}

/// Respects `XDG_CACHE_HOME`
pub fn cache_dir() -> PathBuf {
    base("XDG_CACHE_HOME", dirs::cache_dir(), &[".cache"], ".cpack-cache")
}

/// Respects `XDG_CONFIG_HOME`
pub fn config_dir() -> PathBuf {
    base(
        "XDG_CONFIG_HOME",
        dirs::config_dir(),
        &[".config"],
        ".cpack-config",
    )
}

/// Respects `XDG_DATA_HOME`
pub fn data_dir() -> PathBuf {
    base(
        "XDG_DATA_HOME",
        dirs::data_dir(),
        &[".local", "share"],
        ".cpack-data",
    )
}

/// Root of the archive-keyed workspace cache
pub fn workspace_root() -> PathBuf {
    data_dir().join("workspace")
}
