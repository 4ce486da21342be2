use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::xdg;

/// Default host application repository
pub const HOST_REPO: &str = "https://github.com/comfyanonymous/ComfyUI.git";

/// Complete cpack configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CpackConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub install: InstallConfig,

    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Hash cache and model store location
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    /// Cache directory (default: `$XDG_CACHE_HOME/cpack`)
    pub dir: Option<String>,

    /// Hash cache file (default: `<dir>/model_hashes.json`)
    pub hash_file: Option<String>,
}

/// Host application checkout and server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Git URL cloned into workspaces
    #[serde(default = "default_host_repo")]
    pub repo: String,

    /// Interpreter used outside workspace environments
    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Program providing the synchronous `run` command
    #[serde(default = "default_cli")]
    pub cli: String,

    /// Readiness probe path
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            repo: default_host_repo(),
            python: default_python(),
            listen: default_listen(),
            port: default_port(),
            cli: default_cli(),
            probe_path: default_probe_path(),
            startup_timeout: default_startup_timeout(),
        }
    }
}

/// Environment provisioning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallConfig {
    /// Environment provisioner program
    #[serde(default = "default_uv")]
    pub uv: String,

    /// Packages left out of the frozen requirements
    #[serde(default = "default_requirements_exclude")]
    pub requirements_exclude: Vec<String>,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            uv: default_uv(),
            requirements_exclude: default_requirements_exclude(),
        }
    }
}

/// Workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Per-run timeout
    #[serde(default = "default_run_timeout")]
    pub timeout: String,

    /// How often the watchdog checks the host process
    #[serde(default = "default_watchdog_interval")]
    pub watchdog_interval: String,

    /// Where cached workspaces live (default: `$XDG_DATA_HOME/cpack/workspace`)
    pub workspace_root: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: default_run_timeout(),
            watchdog_interval: default_watchdog_interval(),
            workspace_root: None,
        }
    }
}

fn default_host_repo() -> String {
    HOST_REPO.to_string()
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8188
}

fn default_cli() -> String {
    "comfy".to_string()
}

fn default_probe_path() -> String {
    "/api/customnode/getmappings?mode=nickname".to_string()
}

fn default_startup_timeout() -> String {
    "120s".to_string()
}

fn default_uv() -> String {
    "uv".to_string()
}

fn default_requirements_exclude() -> Vec<String> {
    vec!["bentoml".to_string(), "comfy-pack".to_string()]
}

fn default_run_timeout() -> String {
    "300s".to_string()
}

fn default_watchdog_interval() -> String {
    "1s".to_string()
}

/// Parse `<number><unit>` with unit `s`, `m`, `h` or `d`
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }

    let (num_str, unit) = s.split_at(s.len() - 1);
    let num: u64 = num_str
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let seconds = match unit {
        "s" => num,
        "m" => num * 60,
        "h" => num * 3600,
        "d" => num * 86400,
        _ => return Err(anyhow!("Invalid duration unit: {}. Use: s, m, h, d", unit)),
    };

    Ok(Duration::from_secs(seconds))
}

impl CpackConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: CpackConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate().with_context(|| {
            format!("Invalid config file: {}", path.as_ref().display())
        })?;
        Ok(config)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(xdg::cache_dir)
    }

    pub fn hash_file(&self) -> PathBuf {
        self.cache
            .hash_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.cache_dir().join("model_hashes.json"))
    }

    /// Content-addressed model store under the cache dir
    pub fn model_store_dir(&self) -> PathBuf {
        self.cache_dir().join("models")
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.runner
            .workspace_root
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(xdg::workspace_root)
    }

    pub fn validate(&self) -> Result<()> {
        if matches!(&self.cache.dir, Some(dir) if dir.trim().is_empty()) {
            anyhow::bail!("cache.dir must not be empty");
        }
        if matches!(&self.cache.hash_file, Some(file) if file.trim().is_empty()) {
            anyhow::bail!("cache.hash_file must not be empty");
        }

        if !["https://", "http://", "git@", "file://"]
            .iter()
            .any(|scheme| self.host.repo.starts_with(scheme))
        {
            anyhow::bail!(
                "host.repo must start with https://, http://, git@, or file://: {}",
                self.host.repo
            );
        }
        if self.host.port == 0 {
            anyhow::bail!("host.port must not be 0");
        }
        if !self.host.probe_path.starts_with('/') {
            anyhow::bail!("host.probe_path must start with '/'");
        }

        for (field, value) in [
            ("host.startup_timeout", &self.host.startup_timeout),
            ("runner.timeout", &self.runner.timeout),
            ("runner.watchdog_interval", &self.runner.watchdog_interval),
        ] {
            let duration = parse_duration(value).with_context(|| format!("{} is invalid", field))?;
            if duration.is_zero() {
                anyhow::bail!("{} must be greater than zero", field);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = CpackConfig::default();
        assert_eq!(config.host.repo, HOST_REPO);
        assert_eq!(config.host.port, 8188);
        assert_eq!(config.runner.timeout, "300s");
        assert_eq!(
            config.install.requirements_exclude,
            vec!["bentoml".to_string(), "comfy-pack".to_string()]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: CpackConfig = toml::from_str(
            r#"
            [cache]
            dir = "/var/cache/cpack"

            [host]
            port = 9000
            "#,
        )
        .unwrap();

        assert_eq!(config.host.port, 9000);
        assert_eq!(config.host.cli, "comfy");
        assert_eq!(config.cache_dir(), PathBuf::from("/var/cache/cpack"));
        assert_eq!(
            config.hash_file(),
            PathBuf::from("/var/cache/cpack/model_hashes.json")
        );
        assert_eq!(
            config.model_store_dir(),
            PathBuf::from("/var/cache/cpack/models")
        );
    }

    #[test]
    fn test_invalid_repo_url() {
        let mut config = CpackConfig::default();
        config.host.repo = "ftp://example.com/repo".to_string();
        assert!(config.validate().is_err());

        config.host.repo = "git@github.com:comfyanonymous/ComfyUI.git".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_durations_and_port() {
        let mut config = CpackConfig::default();
        config.runner.timeout = "soon".to_string();
        assert!(config.validate().is_err());

        let mut config = CpackConfig::default();
        config.runner.watchdog_interval = "0s".to_string();
        assert!(config.validate().is_err());

        let mut config = CpackConfig::default();
        config.host.port = 0;
        assert!(config.validate().is_err());

        let mut config = CpackConfig::default();
        config.cache.dir = Some(String::new());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_from_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("cpack.toml");
        fs::write(&path, "[runner]\ntimeout = \"10m\"\n").unwrap();
        let config = CpackConfig::from_file(&path).unwrap();
        assert_eq!(config.runner.timeout, "10m");

        fs::write(&path, "[host]\nport = 0\n").unwrap();
        assert!(CpackConfig::from_file(&path).is_err());
    }
}
