/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// Environment variables are read by clap into the same fields as the CLI
/// flags, so the merge only has to prefer `Some` argument values over the
/// file and fall back to built-in defaults.
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{CommonConfigArgs, RunArgs};
use crate::config::{parse_duration, CpackConfig};
use crate::runner::RunnerOptions;

/// Cache and interpreter settings shared by pack, snapshot, hash and run
#[derive(Debug, Clone)]
pub struct MergedCacheConfig {
    pub cache_dir: PathBuf,
    pub hash_file: PathBuf,
    pub model_store: PathBuf,
    pub python: String,
    pub requirements_exclude: Vec<String>,
}

impl MergedCacheConfig {
    pub fn merge(args: &CommonConfigArgs, file_config: Option<&CpackConfig>) -> Self {
        let default_config = CpackConfig::default();
        let file = file_config.unwrap_or(&default_config);

        let cache_dir = args.cache_dir.clone().unwrap_or_else(|| file.cache_dir());
        let hash_file = file
            .cache
            .hash_file
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| cache_dir.join("model_hashes.json"));

        Self {
            model_store: cache_dir.join("models"),
            hash_file,
            cache_dir,
            python: args
                .python
                .clone()
                .unwrap_or_else(|| file.host.python.clone()),
            requirements_exclude: file.install.requirements_exclude.clone(),
        }
    }
}

/// Settings for installing a package into a workspace (unpack and run)
#[derive(Debug, Clone)]
pub struct MergedInstallConfig {
    pub cache: MergedCacheConfig,
    pub host_repo: String,
    pub uv: String,
    pub verbosity: u8,
}

impl MergedInstallConfig {
    pub fn merge(args: &CommonConfigArgs, file_config: Option<&CpackConfig>, verbosity: u8) -> Self {
        let default_config = CpackConfig::default();
        let file = file_config.unwrap_or(&default_config);
        Self {
            cache: MergedCacheConfig::merge(args, Some(file)),
            host_repo: file.host.repo.clone(),
            uv: file.install.uv.clone(),
            verbosity,
        }
    }
}

/// Everything `run` needs after merging
#[derive(Debug, Clone)]
pub struct MergedRunConfig {
    pub install: MergedInstallConfig,
    pub workspace_root: PathBuf,
    pub timeout: Duration,
    /// Set when the watchdog is enabled
    pub watchdog_interval: Option<Duration>,
    pub runner: RunnerOptions,
}

impl MergedRunConfig {
    /// Precedence: CLI > env (already handled by clap) > config file > defaults
    pub fn merge(args: &RunArgs, file_config: Option<CpackConfig>, verbosity: u8) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let timeout_str = args.timeout.as_deref().unwrap_or(&file.runner.timeout);
        let timeout = parse_duration(timeout_str).context("Invalid run timeout")?;
        if timeout.is_zero() {
            anyhow::bail!("Run timeout must be greater than zero");
        }
        let watchdog_interval = if args.watchdog {
            Some(
                parse_duration(&file.runner.watchdog_interval)
                    .context("Invalid runner.watchdog_interval")?,
            )
        } else {
            None
        };
        let startup_timeout =
            parse_duration(&file.host.startup_timeout).context("Invalid host.startup_timeout")?;

        Ok(Self {
            install: MergedInstallConfig::merge(&args.common, Some(&file), verbosity),
            workspace_root: args
                .workspace_root
                .clone()
                .unwrap_or_else(|| file.workspace_root()),
            timeout,
            watchdog_interval,
            runner: RunnerOptions {
                python: args
                    .common
                    .python
                    .clone()
                    .unwrap_or_else(|| file.host.python.clone()),
                cli: file.host.cli.clone(),
                listen: file.host.listen.clone(),
                port: args.port.unwrap_or(file.host.port),
                probe_path: file.host.probe_path.clone(),
                startup_timeout,
                verbosity,
            },
        })
    }
}
