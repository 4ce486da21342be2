/// `cpack run` command implementation
///
/// Validates the caller's inputs against the package schema, installs (or
/// reuses) the package workspace, then runs the workflow once on a host
/// server and reports the produced file.
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cli::RunArgs;
use crate::cli_utils::{cpack_prefix, ok_mark};
use crate::config::CpackConfig;
use crate::error::ValidationErrors;
use crate::commands::unpack::install_package;
use crate::install::StepOutcome;
use crate::logging::{operations, status};
use crate::merger::MergedRunConfig;
use crate::package::{archive_workspace, ensure_workspace, read_manifest};
use crate::runner::{terminate_self, ServerMode, SessionDirs, WorkflowRunner};
use crate::workflow::{build_schema, parse};

/// Turn `--name value` / `--name=value` pairs into a raw argument map
///
/// Dashes inside names become underscores so `--seed-value` addresses the
/// `seed_value` input.
pub fn parse_input_args(args: &[String]) -> Result<BTreeMap<String, String>, ValidationErrors> {
    let mut values = BTreeMap::new();
    let mut errors = ValidationErrors { errors: vec![] };
    let mut iter = args.iter().peekable();

    while let Some(arg) = iter.next() {
        let Some(stripped) = arg.strip_prefix("--").or_else(|| arg.strip_prefix('-')) else {
            errors.push(arg.clone(), "expected an option name starting with --");
            continue;
        };

        let (name, value) = match stripped.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => {
                let value = match iter.peek() {
                    Some(next) if !next.starts_with("--") => iter.next().cloned(),
                    _ => None,
                };
                (stripped, value)
            }
        };

        let name = name.replace('-', "_");
        if name.is_empty() {
            errors.push(arg.clone(), "empty option name");
            continue;
        }
        match value {
            Some(value) => {
                values.insert(name, value);
            }
            None => errors.push(name, "missing value"),
        }
    }

    if errors.is_empty() {
        Ok(values)
    } else {
        Err(errors)
    }
}

pub async fn run(args: &RunArgs, config: Option<CpackConfig>, verbosity: u8) -> Result<()> {
    let merged = MergedRunConfig::merge(args, config, verbosity)?;

    // Reject bad inputs before anything is installed
    let manifest = read_manifest(&args.archive)?;
    let schema = build_schema(&parse(&manifest.workflow_api))?;
    let raw = parse_input_args(&args.inputs)?;
    let values = schema.validate(&raw)?;

    for (name, value) in &values {
        eprintln!("{} {} = {}", cpack_prefix(), name, value.to_json());
    }

    let workspace = archive_workspace(&merged.workspace_root, &args.archive)?;
    let outcome = ensure_workspace(&workspace, |ws| {
        install_package(&args.archive, ws, &merged.install)
    })?;
    match outcome {
        StepOutcome::AlreadyInstalled => info!(
            operation = operations::INSTALL,
            status = status::CACHED,
            path = %workspace.display(),
            "Reusing installed workspace"
        ),
        StepOutcome::Installed => info!(
            operation = operations::INSTALL,
            status = status::INSTALLED,
            path = %workspace.display(),
            "Workspace installed"
        ),
    }

    let output_dir = std::path::absolute(&args.output_dir).with_context(|| {
        format!("Invalid output directory: {}", args.output_dir.display())
    })?;

    let mut runner = WorkflowRunner::new(
        &workspace,
        SessionDirs::under(&workspace),
        merged.runner.clone(),
        ServerMode::from_env()?,
    );
    if let Some(interval) = merged.watchdog_interval {
        runner = runner.with_watchdog(interval, Arc::new(terminate_self));
    }

    runner.start().await?;
    let result = runner
        .run_workflow(&manifest.workflow_api, &output_dir, &values, merged.timeout)
        .await;
    if let Err(e) = runner.stop().await {
        warn!(operation = operations::STOP, "Failed to stop host cleanly: {:#}", e);
    }

    let produced = result?;
    eprintln!("{} {} Output: {}", cpack_prefix(), ok_mark(), produced.display());
    println!("{}", produced.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pairs_and_equals_form() {
        let parsed = parse_input_args(&strings(&[
            "--prompt",
            "a cat",
            "--seed-value=42",
            "--scale",
            "-1.5",
        ]))
        .unwrap();

        assert_eq!(parsed["prompt"], "a cat");
        assert_eq!(parsed["seed_value"], "42");
        assert_eq!(parsed["scale"], "-1.5");
    }

    #[test]
    fn test_missing_value_is_reported() {
        let err = parse_input_args(&strings(&["--prompt", "--steps", "20"])).unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].field, "prompt");
        assert_eq!(err.errors[0].message, "missing value");
    }

    #[test]
    fn test_bare_value_is_reported() {
        let err = parse_input_args(&strings(&["stray"])).unwrap_err();
        assert_eq!(err.errors[0].field, "stray");
    }

    #[test]
    fn test_empty_args() {
        assert!(parse_input_args(&[]).unwrap().is_empty());
    }
}
