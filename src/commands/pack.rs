/// `cpack pack` command implementation
///
/// Captures the workflow, the host environment and the referenced input
/// files into one archive.
use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use tracing::info;

use crate::cli::PackArgs;
use crate::cli_utils::{cpack_prefix, ok_mark};
use crate::config::CpackConfig;
use crate::hashing::ModelHashCache;
use crate::logging::{operations, status};
use crate::merger::MergedCacheConfig;
use crate::package::{
    collect_inputs, freeze_requirements, store_models, write_archive, PackContents, INPUT_DIR,
};
use crate::snapshot::SnapshotBuilder;
use crate::store::ModelStore;
use crate::workflow::{build_schema, parse, WorkflowGraph};

pub fn run(args: &PackArgs, config: Option<&CpackConfig>) -> Result<()> {
    let merged = MergedCacheConfig::merge(&args.common, config);

    let workflow_api = WorkflowGraph::from_file(&args.workflow_api)?;
    // Unsupported input nodes fail here rather than at run time
    build_schema(&parse(&workflow_api))?;

    let workflow_text = fs::read_to_string(&args.workflow)
        .with_context(|| format!("Failed to read workflow: {}", args.workflow.display()))?;
    let workflow: Value = serde_json::from_str(&workflow_text)
        .with_context(|| format!("Invalid workflow JSON: {}", args.workflow.display()))?;

    let mut cache = ModelHashCache::load(&merged.hash_file);
    let mut snapshot =
        SnapshotBuilder::new(&args.host_dir, &merged.python, &mut cache).build(&workflow_api)?;

    if args.store_models {
        let store = ModelStore::new(&merged.model_store);
        let stored = store_models(&mut snapshot, &args.host_dir, &store)?;
        info!(
            operation = operations::PACK,
            entry_count = stored,
            path = %store.root().display(),
            "Models stored"
        );
    }

    let requirements = freeze_requirements(
        &merged.python,
        &merged.requirements_exclude,
        &args.extra_requirements,
    )?;
    let inputs = collect_inputs(&args.host_dir.join(INPUT_DIR), &workflow_api)?;

    let summary = write_archive(
        &args.output,
        &PackContents {
            requirements,
            snapshot,
            workflow_api,
            workflow,
            inputs,
        },
    )?;

    info!(
        operation = operations::PACK,
        status = status::SUCCESS,
        size_bytes = summary.size_bytes,
        "Pack finished"
    );
    eprintln!(
        "{} {} Package written: {} ({} entries, {} bytes)",
        cpack_prefix(),
        ok_mark(),
        summary.path.display(),
        summary.entry_count,
        summary.size_bytes
    );
    Ok(())
}
