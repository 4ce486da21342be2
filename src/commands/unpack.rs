/// `cpack unpack` command implementation
///
/// Rebuilds a runnable workspace from an archive: the archive is extracted
/// into a scratch directory and every install stage runs against the
/// target directory. `--extract-only` stops after extraction.
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::UnpackArgs;
use crate::cli_utils::{cpack_prefix, ok_mark};
use crate::config::CpackConfig;
use crate::install::{EnvProvisioner, GitFetcher, Installer, RepoFetcher, UvProvisioner};
use crate::logging::{operations, status};
use crate::merger::MergedInstallConfig;
use crate::package;
use crate::store::ModelStore;

const DEFAULT_WORKSPACE: &str = "workspace";

/// `pkg.cpack.zip` -> `pkg`
fn default_destination(archive: &Path) -> Result<PathBuf> {
    let name = archive
        .file_name()
        .with_context(|| format!("Not a file path: {}", archive.display()))?
        .to_string_lossy();
    let stem = name
        .trim_end_matches(".zip")
        .trim_end_matches(".cpack")
        .to_string();
    if stem.is_empty() {
        anyhow::bail!("Cannot derive a directory name from {}", archive.display());
    }
    Ok(PathBuf::from(stem))
}

/// Unpack into a scratch directory and install every stage into `workspace`
pub fn install_package(archive: &Path, workspace: &Path, config: &MergedInstallConfig) -> Result<()> {
    let fetcher = GitFetcher {
        verbosity: config.verbosity,
    };
    let provisioner = UvProvisioner {
        uv: config.uv.clone(),
        verbosity: config.verbosity,
    };
    install_with(archive, workspace, config, &fetcher, &provisioner)
}

fn install_with(
    archive: &Path,
    workspace: &Path,
    config: &MergedInstallConfig,
    fetcher: &dyn RepoFetcher,
    provisioner: &dyn EnvProvisioner,
) -> Result<()> {
    let scratch = tempfile::TempDir::new().context("Failed to create unpack directory")?;
    let unpacked = package::unpack(archive, scratch.path())?;

    let store = ModelStore::new(&config.cache.model_store);
    let store = store.root().is_dir().then_some(&store);
    let input_dir = unpacked.input_dir();

    Installer::new(
        workspace,
        &config.host_repo,
        &config.cache.python,
        fetcher,
        provisioner,
    )
    .install_all(
        &unpacked.snapshot,
        &unpacked.requirements(),
        input_dir.as_deref(),
        store,
    )
}

pub fn run(args: &UnpackArgs, config: Option<&CpackConfig>, verbosity: u8) -> Result<()> {
    if args.extract_only {
        let dest = match &args.output {
            Some(dir) => dir.clone(),
            None => default_destination(&args.archive)?,
        };
        let unpacked = package::unpack(&args.archive, &dest)?;
        eprintln!(
            "{} {} Unpacked to {} (host commit {}, {} model(s), {} extension(s))",
            cpack_prefix(),
            ok_mark(),
            unpacked.root.display(),
            unpacked.snapshot.host_commit,
            unpacked.snapshot.models.len(),
            unpacked.snapshot.custom_nodes.len()
        );
        return Ok(());
    }

    let merged = MergedInstallConfig::merge(&args.common, config, verbosity);
    let workspace = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_WORKSPACE));

    install_package(&args.archive, &workspace, &merged)?;
    info!(
        operation = operations::INSTALL,
        status = status::INSTALLED,
        path = %workspace.display(),
        "Workspace installed"
    );
    eprintln!(
        "{} {} Workspace ready at {}",
        cpack_prefix(),
        ok_mark(),
        workspace.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::CommonConfigArgs;
    use crate::install::{CUSTOM_NODES_DIR, EXTENSION_SENTINEL, HOST_SENTINEL, VENV_DIR};
    use crate::package::tests::sample_contents;
    use crate::package::{write_archive, InputFile};
    use crate::snapshot::ExtensionRecord;
    use std::cell::Cell;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MarkerFetcher {
        fetches: Cell<usize>,
    }

    impl RepoFetcher for MarkerFetcher {
        fn fetch_pinned(&self, url: &str, commit: &str, dest: &Path) -> Result<()> {
            self.fetches.set(self.fetches.get() + 1);
            fs::create_dir_all(dest)?;
            fs::write(dest.join(format!("{}.txt", commit)), url)?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct MarkerProvisioner {
        provisions: Cell<usize>,
    }

    impl EnvProvisioner for MarkerProvisioner {
        fn provision(&self, _python: &str, venv: &Path, _requirements: &Path) -> Result<()> {
            self.provisions.set(self.provisions.get() + 1);
            fs::create_dir_all(venv.join("bin"))?;
            Ok(())
        }

        fn run_hook(&self, _python: &Path, _extension_dir: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn install_config(temp: &TempDir) -> MergedInstallConfig {
        let common = CommonConfigArgs {
            cache_dir: Some(temp.path().join("cache")),
            ..CommonConfigArgs::default()
        };
        MergedInstallConfig::merge(&common, None, 0)
    }

    #[test]
    fn test_default_destination() {
        assert_eq!(
            default_destination(Path::new("/tmp/flux.cpack.zip")).unwrap(),
            PathBuf::from("flux")
        );
        assert_eq!(
            default_destination(Path::new("pkg.zip")).unwrap(),
            PathBuf::from("pkg")
        );
        assert!(default_destination(Path::new(".zip")).is_err());
    }

    #[test]
    fn test_install_rebuilds_workspace_from_archive() {
        let temp = TempDir::new().unwrap();
        let cat = temp.path().join("cat.png");
        fs::write(&cat, "png").unwrap();

        let mut contents = sample_contents(vec![InputFile {
            archive_path: "input/cat.png".to_string(),
            source: cat,
        }]);
        contents.snapshot.custom_nodes.push(ExtensionRecord {
            url: "https://github.com/someone/my-ext.git".to_string(),
            commit_hash: "e1".to_string(),
            disabled: false,
        });
        let archive = temp.path().join("pkg.cpack.zip");
        write_archive(&archive, &contents).unwrap();

        let workspace = temp.path().join("ws");
        let config = install_config(&temp);
        let fetcher = MarkerFetcher::default();
        let provisioner = MarkerProvisioner::default();
        install_with(&archive, &workspace, &config, &fetcher, &provisioner).unwrap();

        assert_eq!(
            fs::read_to_string(workspace.join(HOST_SENTINEL)).unwrap(),
            "abc123"
        );
        assert!(workspace.join("abc123.txt").exists());
        assert!(workspace.join(VENV_DIR).join("bin").is_dir());
        let extension = workspace.join(CUSTOM_NODES_DIR).join("my-ext");
        assert!(extension.join("e1.txt").exists());
        assert!(extension.join(EXTENSION_SENTINEL).exists());
        assert_eq!(
            fs::read_to_string(workspace.join("input").join("cat.png")).unwrap(),
            "png"
        );
        assert_eq!(fetcher.fetches.get(), 2);
        assert_eq!(provisioner.provisions.get(), 1);
    }

    #[test]
    fn test_reinstall_skips_finished_stages() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pkg.cpack.zip");
        write_archive(&archive, &sample_contents(vec![])).unwrap();

        let workspace = temp.path().join("ws");
        let config = install_config(&temp);
        let fetcher = MarkerFetcher::default();
        let provisioner = MarkerProvisioner::default();
        install_with(&archive, &workspace, &config, &fetcher, &provisioner).unwrap();
        install_with(&archive, &workspace, &config, &fetcher, &provisioner).unwrap();

        assert_eq!(fetcher.fetches.get(), 1);
        assert_eq!(provisioner.provisions.get(), 1);
    }

    #[test]
    fn test_extract_only_leaves_package_layout() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("pkg.cpack.zip");
        write_archive(&archive, &sample_contents(vec![])).unwrap();

        let dest = temp.path().join("out");
        let args = UnpackArgs {
            archive,
            output: Some(dest.clone()),
            extract_only: true,
            common: CommonConfigArgs::default(),
        };
        run(&args, None, 0).unwrap();

        assert!(dest.join(package::SNAPSHOT_FILE).exists());
        assert!(dest.join(package::REQUIREMENTS_FILE).exists());
        assert!(!dest.join(HOST_SENTINEL).exists());
    }
}
