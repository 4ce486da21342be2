/// `cpack snapshot` command implementation
///
/// Prints the snapshot JSON of a host checkout to stdout.
use anyhow::Result;

use crate::cli::SnapshotArgs;
use crate::config::CpackConfig;
use crate::hashing::ModelHashCache;
use crate::merger::MergedCacheConfig;
use crate::snapshot::SnapshotBuilder;
use crate::workflow::WorkflowGraph;

pub fn run(args: &SnapshotArgs, config: Option<&CpackConfig>) -> Result<()> {
    let merged = MergedCacheConfig::merge(&args.common, config);
    let graph = WorkflowGraph::from_file(&args.workflow_api)?;

    let mut cache = ModelHashCache::load(&merged.hash_file);
    let snapshot = SnapshotBuilder::new(&args.host_dir, &merged.python, &mut cache).build(&graph)?;

    println!("{}", snapshot.to_json_pretty()?);
    Ok(())
}
