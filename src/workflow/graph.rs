//! Serialized workflow graph
//!
//! A graph is a JSON object of node id to node. Input slots hold either a
//! literal or a `[producer_id, output_index]` link pair.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::WorkflowError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub class_type: String,

    #[serde(default)]
    pub inputs: Map<String, Value>,

    #[serde(rename = "_meta", default, skip_serializing_if = "NodeMeta::is_empty")]
    pub meta: NodeMeta,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeMeta {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.extra.is_empty()
    }
}

impl Node {
    /// Display title, falling back to the class tag
    pub fn title(&self) -> &str {
        self.meta.title.as_deref().unwrap_or(&self.class_type)
    }

    /// First input slot; the one an input node exposes as its value
    pub fn first_slot(&self) -> Option<(&String, &Value)> {
        self.inputs.iter().next()
    }

    pub fn literal(&self, slot: &str) -> Option<&Value> {
        self.inputs.get(slot).filter(|v| Link::from_value(v).is_none())
    }
}

/// Reference from a consumer slot to a producer output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub node_id: String,
    pub output_index: u64,
}

impl Link {
    /// Decode a two-element `[id, index]` array; anything else is a literal
    pub fn from_value(value: &Value) -> Option<Self> {
        let pair = value.as_array().filter(|a| a.len() == 2)?;
        let node_id = match &pair[0] {
            Value::String(s) => s.clone(),
            Value::Number(n) if n.is_u64() => n.to_string(),
            _ => return None,
        };
        let output_index = pair[1].as_u64()?;
        Some(Self {
            node_id,
            output_index,
        })
    }
}

/// Orders ids numerically when both are integers, lexically otherwise
fn compare_ids(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

/// Node id wrapper giving graph iteration a stable natural order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub String);

impl Ord for NodeId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_ids(&self.0, &other.0)
    }
}

impl PartialOrd for NodeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowGraph {
    nodes: BTreeMap<NodeId, Node>,
}

impl WorkflowGraph {
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        serde_json::from_str(json).map_err(|e| WorkflowError::MalformedGraph(e.to_string()))
    }

    pub fn from_value(value: Value) -> Result<Self, WorkflowError> {
        serde_json::from_value(value).map_err(|e| WorkflowError::MalformedGraph(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse workflow: {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize workflow")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Node> {
        self.nodes.get(&NodeId(id.to_string()))
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(&NodeId(id.to_string()))
    }

    pub fn insert(&mut self, id: impl Into<String>, node: Node) {
        self.nodes.insert(NodeId(id.into()), node);
    }

    /// Nodes in natural id order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.nodes.iter().map(|(id, node)| (id.0.as_str(), node))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Node)> {
        self.nodes.iter_mut().map(|(id, node)| (id.0.as_str(), node))
    }

    /// Every string literal in any input slot of any node
    pub fn string_literals(&self) -> impl Iterator<Item = &str> {
        self.nodes
            .values()
            .flat_map(|node| node.inputs.values())
            .filter_map(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_link_decoding() {
        assert_eq!(
            Link::from_value(&json!(["4", 0])),
            Some(Link {
                node_id: "4".to_string(),
                output_index: 0
            })
        );
        assert_eq!(
            Link::from_value(&json!([12, 1])).map(|l| l.node_id),
            Some("12".to_string())
        );
        assert_eq!(Link::from_value(&json!(["4", 0, 1])), None);
        assert_eq!(Link::from_value(&json!(["a", "b"])), None);
        assert_eq!(Link::from_value(&json!("4")), None);
    }

    #[test]
    fn test_iteration_uses_natural_id_order() {
        let graph = WorkflowGraph::from_value(json!({
            "10": {"class_type": "A", "inputs": {}},
            "9": {"class_type": "B", "inputs": {}},
            "2": {"class_type": "C", "inputs": {}},
        }))
        .unwrap();

        let ids: Vec<&str> = graph.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["2", "9", "10"]);
    }

    #[test]
    fn test_round_trip_keeps_unknown_fields() {
        let source = json!({
            "1": {
                "class_type": "KSampler",
                "inputs": {"seed": 5, "model": ["4", 0]},
                "_meta": {"title": "Sampler", "color": "red"},
                "is_changed": ["x"]
            }
        });
        let graph = WorkflowGraph::from_value(source.clone()).unwrap();
        let back = serde_json::to_value(&graph).unwrap();
        assert_eq!(back, source);
    }

    #[test]
    fn test_title_falls_back_to_class_type() {
        let graph = WorkflowGraph::from_value(json!({
            "1": {"class_type": "BentoInputString", "inputs": {"value": "x"}}
        }))
        .unwrap();
        assert_eq!(graph.get("1").unwrap().title(), "BentoInputString");
    }

    #[test]
    fn test_malformed_graph() {
        let err = WorkflowGraph::from_json("[1, 2]").unwrap_err();
        assert!(matches!(err, WorkflowError::MalformedGraph(_)));
    }
}
