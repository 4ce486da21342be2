use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::git;
use crate::process::{command, run_checked};

/// Places a repository checkout pinned to one commit at `dest`
///
/// `dest` does not exist when this is called.
pub trait RepoFetcher {
    fn fetch_pinned(&self, url: &str, commit: &str, dest: &Path) -> Result<()>;
}

pub struct GitFetcher {
    pub verbosity: u8,
}

impl RepoFetcher for GitFetcher {
    fn fetch_pinned(&self, url: &str, commit: &str, dest: &Path) -> Result<()> {
        git::clone_pinned(url, commit, dest, self.verbosity)
    }
}

/// Builds the isolated interpreter environment and runs extension hooks
pub trait EnvProvisioner {
    /// Create `venv` for `python_version` and install `requirements` without resolution
    fn provision(&self, python_version: &str, venv: &Path, requirements: &Path) -> Result<()>;

    /// Run `install.py` in `extension_dir` with `python`
    fn run_hook(&self, python: &Path, extension_dir: &Path) -> Result<()>;
}

/// Interpreter inside a virtual environment
pub fn venv_python(venv: &Path) -> PathBuf {
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python")
    }
}

pub struct UvProvisioner {
    pub uv: String,
    pub verbosity: u8,
}

impl EnvProvisioner for UvProvisioner {
    fn provision(&self, python_version: &str, venv: &Path, requirements: &Path) -> Result<()> {
        let venv_str = venv.to_string_lossy();
        let python = venv_python(venv);
        let python_str = python.to_string_lossy();
        let requirements_str = requirements.to_string_lossy();

        if !python_version.is_empty() {
            run_checked(
                &mut command(&self.uv, &["python", "install", python_version]),
                self.verbosity,
            )?;
        }

        let mut create = command(&self.uv, &["venv"]);
        if !python_version.is_empty() {
            create.args(["--python", python_version]);
        }
        create.arg(&*venv_str);
        run_checked(&mut create, self.verbosity)?;

        run_checked(
            &mut command(&self.uv, &["pip", "install", "-p", &*python_str, "pip"]),
            self.verbosity,
        )?;
        run_checked(
            &mut command(
                &self.uv,
                &[
                    "pip",
                    "install",
                    "-p",
                    &*python_str,
                    "-r",
                    &*requirements_str,
                    "--no-deps",
                ],
            ),
            self.verbosity,
        )?;
        Ok(())
    }

    fn run_hook(&self, python: &Path, extension_dir: &Path) -> Result<()> {
        // Bare names go through PATH; relative paths must survive the cwd change
        let python = if python.components().count() > 1 {
            std::path::absolute(python)?
        } else {
            python.to_path_buf()
        };
        let mut cmd = command(&python.to_string_lossy(), &["install.py"]);
        cmd.current_dir(extension_dir);
        run_checked(&mut cmd, self.verbosity)
    }
}
