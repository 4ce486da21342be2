//! Input/output classification and parameter naming
//!
//! Names are rebuilt on every parse; nothing here is cached across graph
//! edits. For a fixed graph the derived names are always the same.

use std::collections::{BTreeMap, HashSet};

use super::catalog;
use super::graph::{Link, Node, WorkflowGraph};

/// One consumer slot fed by a producer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consumer {
    pub node_id: String,
    pub slot: String,
}

/// Reverse dependency index: `(producer, output index) -> consumers`
#[derive(Debug, Default)]
pub struct LinkIndex {
    edges: BTreeMap<(String, u64), Vec<Consumer>>,
}

impl LinkIndex {
    pub fn build(graph: &WorkflowGraph) -> Self {
        let mut edges: BTreeMap<(String, u64), Vec<Consumer>> = BTreeMap::new();
        for (id, node) in graph.iter() {
            for (slot, value) in &node.inputs {
                if let Some(link) = Link::from_value(value) {
                    edges
                        .entry((link.node_id, link.output_index))
                        .or_default()
                        .push(Consumer {
                            node_id: id.to_string(),
                            slot: slot.clone(),
                        });
                }
            }
        }
        Self { edges }
    }

    pub fn consumers(&self, producer: &str, output_index: u64) -> &[Consumer] {
        self.edges
            .get(&(producer.to_string(), output_index))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Consumers of any output of `producer`, in graph order
    pub fn all_consumers(&self, producer: &str) -> Vec<&Consumer> {
        self.edges
            .iter()
            .filter(|((id, _), _)| id == producer)
            .flat_map(|(_, consumers)| consumers.iter())
            .collect()
    }
}

/// A named parameter boundary node
#[derive(Debug, Clone, Copy)]
pub struct PortSpec<'g> {
    pub id: &'g str,
    pub node: &'g Node,
    name_index: usize,
}

#[derive(Debug, Default)]
pub struct ParsedWorkflow<'g> {
    names: Vec<String>,
    pub inputs: Vec<PortSpec<'g>>,
    pub outputs: Vec<PortSpec<'g>>,
}

impl<'g> ParsedWorkflow<'g> {
    pub fn name(&self, port: &PortSpec<'g>) -> &str {
        &self.names[port.name_index]
    }

    pub fn input(&self, name: &str) -> Option<&PortSpec<'g>> {
        self.inputs.iter().find(|p| self.name(p) == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortSpec<'g>> {
        self.outputs.iter().find(|p| self.name(p) == name)
    }

    pub fn input_names(&self) -> Vec<&str> {
        self.inputs.iter().map(|p| self.name(p)).collect()
    }

    pub fn output_names(&self) -> Vec<&str> {
        self.outputs.iter().map(|p| self.name(p)).collect()
    }

    /// `(name, port)` pairs for inputs, in graph order
    pub fn named_inputs(&self) -> impl Iterator<Item = (&str, &PortSpec<'g>)> {
        self.inputs.iter().map(move |p| (self.name(p), p))
    }

    pub fn named_outputs(&self) -> impl Iterator<Item = (&str, &PortSpec<'g>)> {
        self.outputs.iter().map(move |p| (self.name(p), p))
    }
}

pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Lower-case, collapse non-alphanumeric runs to `_`, strip leading digits
pub fn normalize_name(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_sep = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out.trim_start_matches(|c: char| c.is_ascii_digit() || c == '_')
        .to_string()
}

fn derive_name(id: &str, node: &Node, links: &LinkIndex) -> String {
    let title = node.title();
    if is_identifier(title) {
        return title.to_string();
    }

    let consumers = links.all_consumers(id);
    let distinct: HashSet<&str> = consumers.iter().map(|c| c.node_id.as_str()).collect();
    if distinct.len() == 1 {
        let slot = &consumers[0].slot;
        if is_identifier(slot) {
            return slot.clone();
        }
        let normalized = normalize_name(slot);
        if !normalized.is_empty() {
            return normalized;
        }
    }

    let normalized = normalize_name(title);
    if normalized.is_empty() {
        format!("node_{}", id)
    } else {
        normalized
    }
}

fn claim(taken: &mut HashSet<String>, name: String, id: &str) -> String {
    let mut candidate = name;
    while taken.contains(&candidate) {
        candidate = format!("{}_{}", candidate, id);
    }
    taken.insert(candidate.clone());
    candidate
}

/// Classify boundary nodes and derive their parameter names
///
/// Inputs and outputs are separate namespaces. A collision inside one
/// namespace is resolved by suffixing the later node's id.
pub fn parse(graph: &WorkflowGraph) -> ParsedWorkflow<'_> {
    let links = LinkIndex::build(graph);
    let mut parsed = ParsedWorkflow::default();
    let mut input_names = HashSet::new();
    let mut output_names = HashSet::new();

    for (id, node) in graph.iter() {
        let (taken, ports) = if catalog::is_input_class(&node.class_type) {
            (&mut input_names, &mut parsed.inputs)
        } else if catalog::is_output_class(&node.class_type) {
            (&mut output_names, &mut parsed.outputs)
        } else {
            continue;
        };

        let name = claim(taken, derive_name(id, node, &links), id);
        parsed.names.push(name);
        ports.push(PortSpec {
            id,
            node,
            name_index: parsed.names.len() - 1,
        });
    }

    parsed
}
