/// External tool invocation shared by git, installer and packer
///
/// Child output is discarded unless verbosity asks for it: level 1 shows
/// stdout, level 2 also shows stderr.
use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::InstallError;

/// Resolve `program` through PATH, falling back to the bare name
pub fn resolve_program(program: &str) -> PathBuf {
    which::which(program).unwrap_or_else(|e| {
        debug!("Could not find '{}' in PATH: {}. Trying as-is.", program, e);
        PathBuf::from(program)
    })
}

pub fn command<S: AsRef<OsStr>>(program: &str, args: &[S]) -> Command {
    let mut cmd = Command::new(resolve_program(program));
    cmd.args(args);
    cmd
}

fn describe(cmd: &Command) -> String {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|s| s.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn stdout_for(verbosity: u8) -> Stdio {
    if verbosity >= 1 {
        Stdio::inherit()
    } else {
        Stdio::null()
    }
}

pub fn stderr_for(verbosity: u8) -> Stdio {
    if verbosity >= 2 {
        Stdio::inherit()
    } else {
        Stdio::null()
    }
}

/// Run to completion; a non-zero exit is [`InstallError::CommandFailed`]
pub fn run_checked(cmd: &mut Command, verbosity: u8) -> Result<()> {
    let description = describe(cmd);
    debug!(operation = "exec", command = %description, "running");

    let status = cmd
        .stdin(Stdio::null())
        .stdout(stdout_for(verbosity))
        .stderr(stderr_for(verbosity))
        .status()
        .with_context(|| format!("Failed to spawn: {}", description))?;

    if !status.success() {
        return Err(InstallError::CommandFailed {
            command: description,
            code: status.code().unwrap_or(-1),
        }
        .into());
    }
    Ok(())
}

/// Run and return trimmed stdout; a non-zero exit is an error
pub fn capture(cmd: &mut Command) -> Result<String> {
    let description = describe(cmd);
    let output = cmd
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .with_context(|| format!("Failed to spawn: {}", description))?;

    if !output.status.success() {
        debug!(
            command = %description,
            stderr = %String::from_utf8_lossy(&output.stderr).trim(),
            "command failed"
        );
        return Err(InstallError::CommandFailed {
            command: description,
            code: output.status.code().unwrap_or(-1),
        }
        .into());
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
