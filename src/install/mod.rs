//! Workspace reconstruction from a snapshot
//!
//! Every unit (host app, dependency environment, each extension) is gated by
//! a [`Sentinel`] holding the pin it was built from. A matching sentinel
//! skips the unit; anything else wipes it and rebuilds from scratch.
//!
//! Stages declare their prerequisites through [`InstallStage`]; running one
//! before its prerequisites completed on the same [`Installer`] fails with
//! [`InstallError::StageOrder`].

mod fetch;
mod sentinel;

pub use fetch::{venv_python, EnvProvisioner, GitFetcher, RepoFetcher, UvProvisioner};
pub use sentinel::Sentinel;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::InstallError;
use crate::snapshot::Snapshot;
use crate::store::ModelStore;

pub const HOST_SENTINEL: &str = ".DONE";
pub const EXTENSION_SENTINEL: &str = ".DONE";
pub const VENV_DIR: &str = ".venv";
pub const VENV_SENTINEL: &str = "DONE";
pub const INPUT_DIR: &str = "input";
pub const CUSTOM_NODES_DIR: &str = "custom_nodes";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InstallStage {
    HostApp,
    Dependencies,
    Extensions,
    Models,
    Inputs,
}

impl InstallStage {
    pub fn prerequisites(&self) -> &'static [InstallStage] {
        match self {
            Self::HostApp => &[],
            Self::Dependencies => &[Self::HostApp],
            // Extension hooks run inside the dependency environment
            Self::Extensions => &[Self::HostApp, Self::Dependencies],
            Self::Models => &[Self::HostApp],
            Self::Inputs => &[Self::HostApp],
        }
    }
}

impl fmt::Display for InstallStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HostApp => "host-app",
            Self::Dependencies => "dependencies",
            Self::Extensions => "extensions",
            Self::Models => "models",
            Self::Inputs => "inputs",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Installed,
    AlreadyInstalled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelLinkReport {
    pub linked: usize,
    pub missing: usize,
    pub skipped: usize,
}

/// `relative` as a path that stays below its base directory
///
/// Absolute paths, `..` and paths without a file name yield `None`.
pub fn enclosed_path(relative: &str) -> Option<PathBuf> {
    let path = Path::new(relative);
    let mut has_name = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => has_name = true,
            Component::CurDir => {}
            _ => return None,
        }
    }
    has_name.then(|| path.to_path_buf())
}

/// Remove `dir` and everything under it; absent is fine
pub fn wipe(dir: &Path) -> Result<()> {
    if dir.symlink_metadata().is_ok() {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to remove directory: {}", dir.display()))?;
    }
    Ok(())
}

/// Pin of the dependency environment: interpreter version plus exact requirements
pub fn requirements_pin(python_version: &str, requirements: &Path) -> Result<String> {
    let content = fs::read(requirements)
        .with_context(|| format!("Failed to read requirements: {}", requirements.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(python_version.as_bytes());
    hasher.update(b"\n");
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

pub struct Installer<'a> {
    workspace: PathBuf,
    host_repo: String,
    system_python: String,
    fetcher: &'a dyn RepoFetcher,
    provisioner: &'a dyn EnvProvisioner,
    completed: HashSet<InstallStage>,
}

impl<'a> Installer<'a> {
    pub fn new(
        workspace: impl Into<PathBuf>,
        host_repo: impl Into<String>,
        system_python: impl Into<String>,
        fetcher: &'a dyn RepoFetcher,
        provisioner: &'a dyn EnvProvisioner,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            host_repo: host_repo.into(),
            system_python: system_python.into(),
            fetcher,
            provisioner,
            completed: HashSet::new(),
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn is_completed(&self, stage: InstallStage) -> bool {
        self.completed.contains(&stage)
    }

    fn begin(&self, stage: InstallStage) -> Result<()> {
        if let Some(missing) = stage
            .prerequisites()
            .iter()
            .find(|p| !self.completed.contains(*p))
        {
            return Err(InstallError::StageOrder {
                stage,
                missing: *missing,
            }
            .into());
        }
        info!(stage = %stage, "Installing");
        Ok(())
    }

    fn finish(&mut self, stage: InstallStage) {
        self.completed.insert(stage);
    }

    /// Host application checkout at the snapshot's commit
    pub fn install_host_app(&mut self, snapshot: &Snapshot) -> Result<StepOutcome> {
        self.begin(InstallStage::HostApp)?;
        let commit = snapshot.host_commit.as_str();
        let sentinel = Sentinel::new(self.workspace.join(HOST_SENTINEL));

        let outcome = if sentinel.matches(commit) {
            info!(stage = "host-app", commit, "Host application already installed");
            StepOutcome::AlreadyInstalled
        } else {
            if commit.is_empty() {
                anyhow::bail!("Snapshot does not pin a host application commit");
            }
            wipe(&self.workspace)?;
            self.fetcher
                .fetch_pinned(&self.host_repo, commit, &self.workspace)
                .context("Failed to install host application")?;
            sentinel.write(commit)?;
            StepOutcome::Installed
        };

        self.finish(InstallStage::HostApp);
        Ok(outcome)
    }

    /// Isolated environment with exactly the frozen requirements
    pub fn install_dependencies(
        &mut self,
        snapshot: &Snapshot,
        requirements: &Path,
    ) -> Result<StepOutcome> {
        self.begin(InstallStage::Dependencies)?;
        let venv = self.workspace.join(VENV_DIR);
        let pin = requirements_pin(&snapshot.python, requirements)?;
        let sentinel = Sentinel::new(venv.join(VENV_SENTINEL));

        let outcome = if sentinel.matches(&pin) {
            info!(stage = "dependencies", "Dependency environment already installed");
            StepOutcome::AlreadyInstalled
        } else {
            // Partial environments cannot be resumed
            wipe(&venv)?;
            self.provisioner
                .provision(&snapshot.python, &venv, requirements)
                .context("Failed to install dependencies")?;
            sentinel.write(&pin)?;
            StepOutcome::Installed
        };

        self.finish(InstallStage::Dependencies);
        Ok(outcome)
    }

    fn hook_python(&self) -> PathBuf {
        let venv = self.workspace.join(VENV_DIR);
        if venv.exists() {
            venv_python(&venv)
        } else {
            PathBuf::from(&self.system_python)
        }
    }

    /// Each extension at its pinned commit, followed by its install hook
    pub fn install_extensions(&mut self, snapshot: &Snapshot) -> Result<Vec<StepOutcome>> {
        self.begin(InstallStage::Extensions)?;
        let root = self.workspace.join(CUSTOM_NODES_DIR);
        let mut outcomes = Vec::with_capacity(snapshot.custom_nodes.len());

        for extension in &snapshot.custom_nodes {
            if extension.url.is_empty() || extension.commit_hash.is_empty() {
                warn!(
                    url = %extension.url,
                    "Skipping extension without a source URL or commit"
                );
                continue;
            }

            let name = extension.dir_name().ok_or_else(|| InstallError::UnsafePath {
                kind: "extension",
                path: extension.url.clone(),
            })?;
            let dir = root.join(name);
            let sentinel = Sentinel::new(dir.join(EXTENSION_SENTINEL));
            if sentinel.matches(&extension.commit_hash) {
                info!(
                    stage = "extensions",
                    path = %dir.display(),
                    "Extension already installed"
                );
                outcomes.push(StepOutcome::AlreadyInstalled);
                continue;
            }

            wipe(&dir)?;
            self.fetcher
                .fetch_pinned(&extension.url, &extension.commit_hash, &dir)
                .with_context(|| format!("Failed to install extension {}", extension.url))?;

            if dir.join("install.py").exists() {
                self.provisioner
                    .run_hook(&self.hook_python(), &dir)
                    .with_context(|| format!("Install hook failed for {}", extension.url))?;
            }

            sentinel.write(&extension.commit_hash)?;
            outcomes.push(StepOutcome::Installed);
        }

        self.finish(InstallStage::Extensions);
        Ok(outcomes)
    }

    /// Link stored model files into the workspace at their recorded paths
    pub fn link_models(
        &mut self,
        snapshot: &Snapshot,
        store: &ModelStore,
    ) -> Result<ModelLinkReport> {
        self.begin(InstallStage::Models)?;
        let mut report = ModelLinkReport::default();

        for model in &snapshot.models {
            if model.disabled {
                report.skipped += 1;
                continue;
            }
            let relative =
                enclosed_path(&model.filename).ok_or_else(|| InstallError::UnsafePath {
                    kind: "model",
                    path: model.filename.clone(),
                })?;
            let dest = self.workspace.join(relative);
            if store.link_into(&model.sha256, &dest)? {
                report.linked += 1;
            } else {
                report.missing += 1;
                if model.model_tag.is_some() {
                    warn!(
                        path = %model.filename,
                        object_id = %model.sha256,
                        "Model missing from local store"
                    );
                }
            }
        }

        info!(
            stage = "models",
            linked = report.linked,
            missing = report.missing,
            "Models linked"
        );
        self.finish(InstallStage::Models);
        Ok(report)
    }

    /// Copy an unpacked `input/` tree into the workspace input directory
    pub fn copy_inputs(&mut self, source: &Path) -> Result<usize> {
        self.begin(InstallStage::Inputs)?;
        let target = self.workspace.join(INPUT_DIR);
        let mut copied = 0;

        if source.is_dir() {
            for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(source)
                    .context("Input file outside the input tree")?;
                let dest = target.join(relative);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create directory: {}", parent.display())
                    })?;
                }
                fs::copy(entry.path(), &dest)
                    .with_context(|| format!("Failed to copy input: {}", relative.display()))?;
                copied += 1;
            }
        }

        self.finish(InstallStage::Inputs);
        Ok(copied)
    }

    /// All stages in dependency order
    pub fn install_all(
        &mut self,
        snapshot: &Snapshot,
        requirements: &Path,
        inputs: Option<&Path>,
        store: Option<&ModelStore>,
    ) -> Result<()> {
        self.install_host_app(snapshot)?;
        self.install_dependencies(snapshot, requirements)?;
        self.install_extensions(snapshot)?;
        if let Some(store) = store {
            self.link_models(snapshot, store)?;
        }
        if let Some(inputs) = inputs {
            self.copy_inputs(inputs)?;
        }
        Ok(())
    }
}
