//! Value injection before a run and output lookup after it

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::catalog::OUTPUT_PREFIX_SLOT;
use super::parser::parse;
use super::schema::{slash_path, InputValue};
use super::WorkflowGraph;
use crate::error::WorkflowError;

/// Prefix an output node writes under for one run
pub fn output_prefix(output_dir: &Path, node_id: &str) -> String {
    let dir = slash_path(output_dir);
    let dir = if dir.len() > 1 {
        dir.trim_end_matches('/')
    } else {
        dir.as_str()
    };
    if dir.ends_with('/') {
        format!("{}{}_", dir, node_id)
    } else {
        format!("{}/{}_", dir, node_id)
    }
}

/// Return a copy of `graph` with `values` injected and output prefixes set
///
/// The template graph is never modified.
pub fn populate(
    graph: &WorkflowGraph,
    output_dir: &Path,
    values: &BTreeMap<String, InputValue>,
) -> Result<WorkflowGraph, WorkflowError> {
    let parsed = parse(graph);
    let mut assignments: Vec<(String, String, Value)> = Vec::with_capacity(values.len());

    for (name, value) in values {
        let Some(port) = parsed.input(name) else {
            return Err(if parsed.output(name).is_some() {
                WorkflowError::WrongNodeKind { name: name.clone() }
            } else {
                WorkflowError::UnknownInput { name: name.clone() }
            });
        };
        let (slot, _) = port.node.first_slot().ok_or_else(|| {
            WorkflowError::MalformedGraph(format!("input node {} has no input slot", port.id))
        })?;
        assignments.push((port.id.to_string(), slot.clone(), value.to_json()));
    }

    let output_ids: Vec<String> = parsed.outputs.iter().map(|p| p.id.to_string()).collect();

    let mut populated = graph.clone();
    for (id, slot, value) in assignments {
        if let Some(node) = populated.get_mut(&id) {
            node.inputs.insert(slot, value);
        }
    }
    for id in output_ids {
        let prefix = output_prefix(output_dir, &id);
        if let Some(node) = populated.get_mut(&id) {
            node.inputs
                .insert(OUTPUT_PREFIX_SLOT.to_string(), Value::String(prefix));
        }
    }

    Ok(populated)
}

/// Locate the file written by the single output node
pub fn retrieve(graph: &WorkflowGraph, output_dir: &Path) -> Result<PathBuf, WorkflowError> {
    let parsed = parse(graph);
    if parsed.outputs.len() != 1 {
        return Err(WorkflowError::OutputCount {
            count: parsed.outputs.len(),
        });
    }
    let node_id = parsed.outputs[0].id;
    let prefix = format!("{}_", node_id);

    let pattern = format!(
        "{}/{}*",
        glob::Pattern::escape(&output_dir.to_string_lossy()),
        glob::Pattern::escape(&prefix)
    );
    let mut matches: Vec<PathBuf> = glob::glob(&pattern)
        .map_err(|e| WorkflowError::MalformedGraph(format!("bad output pattern: {}", e)))?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    matches.sort();

    matches
        .into_iter()
        .next()
        .ok_or_else(|| WorkflowError::OutputNotFound {
            dir: output_dir.to_path_buf(),
            prefix,
        })
}
