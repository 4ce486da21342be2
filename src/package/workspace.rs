//! Cached workspaces keyed by package or snapshot content

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::hashing::sha256_file;
use crate::install::{wipe, StepOutcome};
use crate::logging::status;
use crate::snapshot::Snapshot;

/// Marks a workspace whose installation finished
pub const WORKSPACE_SENTINEL: &str = "DONE";

const ARCHIVE_KEY_LEN: usize = 8;
const BY_SNAPSHOT_DIR: &str = "by-snapshot";

/// SHA-256 of the archive bytes
pub fn archive_checksum(archive: &Path) -> Result<String> {
    let (sha256, _) = sha256_file(archive)
        .with_context(|| format!("Failed to hash package: {}", archive.display()))?;
    Ok(sha256)
}

/// `<root>/<first 8 hex of the archive checksum>`
pub fn archive_workspace(root: &Path, archive: &Path) -> Result<PathBuf> {
    let checksum = archive_checksum(archive)?;
    Ok(root.join(&checksum[..ARCHIVE_KEY_LEN]))
}

/// `<root>/by-snapshot/<snapshot checksum>`
pub fn snapshot_workspace(root: &Path, snapshot: &Snapshot) -> Result<PathBuf> {
    Ok(root.join(BY_SNAPSHOT_DIR).join(snapshot.checksum()?))
}

/// Run `install` into `workspace` unless a previous run completed
///
/// A workspace without the sentinel is partial and is wiped first.
pub fn ensure_workspace<F>(workspace: &Path, install: F) -> Result<StepOutcome>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let sentinel = workspace.join(WORKSPACE_SENTINEL);
    if sentinel.is_file() {
        debug!(path = %workspace.display(), status = status::CACHED, "Workspace ready");
        return Ok(StepOutcome::AlreadyInstalled);
    }
    if workspace.exists() {
        info!(path = %workspace.display(), "Removing incomplete workspace");
        wipe(workspace)?;
    }
    fs::create_dir_all(workspace)
        .with_context(|| format!("Failed to create workspace: {}", workspace.display()))?;

    install(workspace)?;
    write_atomic(&sentinel, WORKSPACE_SENTINEL.as_bytes())?;
    info!(path = %workspace.display(), status = status::INSTALLED, "Workspace ready");
    Ok(StepOutcome::Installed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::tests::write_sample;
    use std::cell::Cell;
    use tempfile::TempDir;

    #[test]
    fn test_archive_workspace_is_content_keyed() {
        let temp = TempDir::new().unwrap();
        let a = temp.path().join("a.zip");
        let b = temp.path().join("b.zip");
        write_sample(&a);
        fs::copy(&a, &b).unwrap();

        let root = temp.path().join("workspace");
        let wa = archive_workspace(&root, &a).unwrap();
        assert_eq!(wa, archive_workspace(&root, &b).unwrap());
        assert_eq!(wa.file_name().unwrap().len(), 8);
        assert!(archive_checksum(&a).unwrap().starts_with(&*wa.file_name().unwrap().to_string_lossy()));
    }

    #[test]
    fn test_snapshot_workspace_layout() {
        let snapshot = Snapshot {
            python: "3.11".to_string(),
            host_commit: "abc".to_string(),
            models: vec![],
            custom_nodes: vec![],
        };
        let path = snapshot_workspace(Path::new("/root"), &snapshot).unwrap();
        assert_eq!(
            path,
            Path::new("/root/by-snapshot").join(snapshot.checksum().unwrap())
        );
    }

    #[test]
    fn test_ensure_workspace_installs_once() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("ws");
        let calls = Cell::new(0);

        let install = |dir: &Path| {
            calls.set(calls.get() + 1);
            fs::write(dir.join("installed.txt"), "yes")?;
            Ok(())
        };
        assert_eq!(ensure_workspace(&ws, install).unwrap(), StepOutcome::Installed);
        assert_eq!(
            ensure_workspace(&ws, install).unwrap(),
            StepOutcome::AlreadyInstalled
        );
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_partial_workspace_is_wiped() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("ws");
        fs::create_dir_all(&ws).unwrap();
        fs::write(ws.join("leftover.txt"), "partial").unwrap();

        ensure_workspace(&ws, |_| Ok(())).unwrap();
        assert!(!ws.join("leftover.txt").exists());
        assert!(ws.join(WORKSPACE_SENTINEL).is_file());
    }

    #[test]
    fn test_failed_install_leaves_no_sentinel() {
        let temp = TempDir::new().unwrap();
        let ws = temp.path().join("ws");

        let result = ensure_workspace(&ws, |_| anyhow::bail!("clone failed"));
        assert!(result.is_err());
        assert!(!ws.join(WORKSPACE_SENTINEL).exists());
    }
}
