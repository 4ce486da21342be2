//! Version-control introspection and pinned clones
//!
//! Introspection helpers never fail: a directory that is not a repository,
//! or one without a remote, reads as empty strings.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::process::{capture, command, run_checked};

const GIT: &str = "git";

fn git_in(dir: &Path, args: &[&str]) -> Option<String> {
    let mut cmd = command(GIT, args);
    cmd.current_dir(dir);
    match capture(&mut cmd) {
        Ok(out) => Some(out),
        Err(e) => {
            debug!(path = %dir.display(), "git {} failed: {:#}", args.join(" "), e);
            None
        }
    }
}

/// `HEAD` commit, or empty when unknown
pub fn head_commit(dir: &Path) -> String {
    git_in(dir, &["rev-parse", "HEAD"]).unwrap_or_default()
}

/// `origin` URL, or empty when unknown
pub fn remote_url(dir: &Path) -> String {
    git_in(dir, &["config", "--get", "remote.origin.url"]).unwrap_or_default()
}

/// Untracked files under `subdir`, relative to `repo`
///
/// `None` when git cannot answer (not a checkout, git missing).
pub fn untracked_files(repo: &Path, subdir: &Path) -> Option<Vec<PathBuf>> {
    let subdir = subdir.to_string_lossy();
    let out = git_in(repo, &["ls-files", "--others", "--", &*subdir])?;
    Some(
        out.lines()
            .filter(|line| !line.is_empty())
            .map(PathBuf::from)
            .collect(),
    )
}

/// Clone `url` into `dest` and check out exactly `commit`
///
/// Uses a blob-filtered clone, then fetches the commit itself so commits
/// that are not on any advertised branch still resolve.
pub fn clone_pinned(url: &str, commit: &str, dest: &Path, verbosity: u8) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let dest_str = dest.to_string_lossy();

    info!(operation = "clone", url, commit, path = %dest.display(), "Cloning");
    run_checked(
        &mut command(
            GIT,
            &[
                "clone",
                "--recurse-submodules",
                "--filter=blob:none",
                url,
                &*dest_str,
            ],
        ),
        verbosity,
    )
    .with_context(|| format!("Failed to clone {}", url))?;

    let in_dest = |args: &[&str]| {
        let mut cmd = command(GIT, args);
        cmd.current_dir(dest);
        run_checked(&mut cmd, verbosity)
    };

    in_dest(&["fetch", "-q", url, commit])
        .with_context(|| format!("Failed to fetch commit {} from {}", commit, url))?;
    in_dest(&["checkout", "-q", "FETCH_HEAD"])
        .with_context(|| format!("Failed to check out {}", commit))?;
    in_dest(&["submodule", "update", "--init", "--recursive"])
        .context("Failed to update submodules")?;

    Ok(())
}
