use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{ExtensionRecord, ModelRecord, Snapshot};
use crate::git;
use crate::hashing::ModelHashCache;
use crate::logging::operations;
use crate::process::{capture, command};
use crate::workflow::WorkflowGraph;

pub const MODELS_DIR: &str = "models";
pub const CUSTOM_NODES_DIR: &str = "custom_nodes";

/// `major.minor` of `python`, or empty when it cannot be run
pub fn python_version(python: &str) -> String {
    let mut cmd = command(
        python,
        &["-c", "import sys; print('%d.%d' % sys.version_info[:2])"],
    );
    capture(&mut cmd).unwrap_or_else(|e| {
        warn!("Could not determine Python version from {}: {:#}", python, e);
        String::new()
    })
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

fn slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Captures the environment of a host checkout
pub struct SnapshotBuilder<'c> {
    host_dir: PathBuf,
    python: String,
    cache: &'c mut ModelHashCache,
}

impl<'c> SnapshotBuilder<'c> {
    pub fn new(
        host_dir: impl Into<PathBuf>,
        python: impl Into<String>,
        cache: &'c mut ModelHashCache,
    ) -> Self {
        Self {
            host_dir: host_dir.into(),
            python: python.into(),
            cache,
        }
    }

    pub fn build(&mut self, graph: &WorkflowGraph) -> Result<Snapshot> {
        let python = python_version(&self.python);
        let host_commit = git::head_commit(&self.host_dir);
        if host_commit.is_empty() {
            warn!(path = %self.host_dir.display(), "Host checkout has no readable commit");
        }

        let models = self.models(graph)?;
        let custom_nodes = self.extensions()?;

        info!(
            operation = operations::SNAPSHOT,
            commit = %host_commit,
            models = models.len(),
            custom_nodes = custom_nodes.len(),
            "Snapshot captured"
        );

        Ok(Snapshot {
            python,
            host_commit,
            models,
            custom_nodes,
        })
    }

    /// Model files outside version control, relative to the host checkout
    fn model_files(&self) -> Vec<PathBuf> {
        let models_dir = self.host_dir.join(MODELS_DIR);
        if !models_dir.is_dir() {
            return Vec::new();
        }

        let mut files = match git::untracked_files(&self.host_dir, Path::new(MODELS_DIR)) {
            Some(files) => files,
            None => {
                debug!("git unavailable for models listing, walking the directory");
                WalkDir::new(&models_dir)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_type().is_file())
                    .filter_map(|e| {
                        e.path()
                            .strip_prefix(&self.host_dir)
                            .ok()
                            .map(Path::to_path_buf)
                    })
                    .collect()
            }
        };

        files.retain(|f| !is_hidden(f));
        files.sort();
        files
    }

    pub fn models(&mut self, graph: &WorkflowGraph) -> Result<Vec<ModelRecord>> {
        let used: HashSet<&str> = graph.string_literals().collect();
        let relative = self.model_files();
        let absolute: Vec<PathBuf> = relative.iter().map(|r| self.host_dir.join(r)).collect();

        let digests = self.cache.hash_many(&absolute)?;

        let mut records = Vec::with_capacity(relative.len());
        for ((rel, abs), digest) in relative.iter().zip(&absolute).zip(digests) {
            let Some(sha256) = digest else {
                warn!(path = %abs.display(), "Skipping model that could not be hashed");
                continue;
            };
            let size = fs::metadata(abs)
                .with_context(|| format!("Failed to stat model: {}", abs.display()))?
                .len();
            let name = rel
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            records.push(ModelRecord {
                filename: slash(rel),
                sha256,
                size,
                explicit: used.contains(name.as_str()),
                model_tag: None,
                disabled: false,
            });
        }
        Ok(records)
    }

    pub fn extensions(&self) -> Result<Vec<ExtensionRecord>> {
        let dir = self.host_dir.join(CUSTOM_NODES_DIR);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut subdirs: Vec<PathBuf> = fs::read_dir(&dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.join(".git").exists())
            .collect();
        subdirs.sort();

        Ok(subdirs
            .iter()
            .map(|subdir| ExtensionRecord {
                url: git::remote_url(subdir),
                commit_hash: git::head_commit(subdir),
                disabled: subdir
                    .file_name()
                    .map(|n| n.to_string_lossy().ends_with(".disabled"))
                    .unwrap_or(false),
            })
            .collect())
    }
}
