//! Typed input schema derived from a parsed workflow
//!
//! Used both to validate caller arguments before anything is installed and
//! to render the parameter table shown by `cpack info`.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use super::catalog::{self, SlotType, ValueKind};
use super::graph::Link;
use super::parser::ParsedWorkflow;
use crate::error::{ValidationErrors, WorkflowError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct NumericRange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl NumericRange {
    pub fn is_unbounded(&self) -> bool {
        self.min.is_none() && self.max.is_none()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InputField {
    pub name: String,
    pub kind: ValueKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "NumericRange::is_unbounded")]
    pub range: NumericRange,
    pub node_id: String,
    pub class_type: String,
    pub emits: SlotType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InputSchema {
    pub fields: Vec<InputField>,
}

/// A validated caller value
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    String(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Path(PathBuf),
}

impl InputValue {
    /// JSON literal written into the node slot; paths use forward slashes
    pub fn to_json(&self) -> Value {
        match self {
            Self::String(s) => Value::String(s.clone()),
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Self::Path(p) => Value::String(slash_path(p)),
        }
    }
}

pub fn slash_path(path: &std::path::Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn literal_number(value: Option<&Value>) -> Option<f64> {
    value
        .filter(|v| Link::from_value(v).is_none())
        .and_then(Value::as_f64)
}

/// Derive the schema; an input class outside the table is an error
pub fn build_schema(parsed: &ParsedWorkflow<'_>) -> Result<InputSchema, WorkflowError> {
    let mut fields = Vec::with_capacity(parsed.inputs.len());

    for (name, port) in parsed.named_inputs() {
        let node = port.node;
        let class = catalog::input_class(&node.class_type).ok_or_else(|| {
            WorkflowError::UnsupportedNodeType {
                name: name.to_string(),
                class_type: node.class_type.clone(),
            }
        })?;

        let current = node
            .first_slot()
            .map(|(_, value)| value)
            .filter(|value| Link::from_value(value).is_none());

        let default = match class.kind {
            ValueKind::Path => None,
            _ => current.cloned(),
        };

        let range = if class.kind.is_numeric() {
            NumericRange {
                min: literal_number(node.inputs.get("min")),
                max: literal_number(node.inputs.get("max")),
            }
        } else {
            NumericRange::default()
        };

        fields.push(InputField {
            name: name.to_string(),
            kind: class.kind,
            required: default.is_none(),
            default,
            range,
            node_id: port.id.to_string(),
            class_type: node.class_type.clone(),
            emits: class.emits(),
        });
    }

    Ok(InputSchema { fields })
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn coerce(field: &InputField, raw: &str) -> Result<InputValue, String> {
    let value = match field.kind {
        ValueKind::String => InputValue::String(raw.to_string()),
        ValueKind::Path => {
            if raw.is_empty() {
                return Err("path must not be empty".to_string());
            }
            InputValue::Path(PathBuf::from(raw))
        }
        ValueKind::Boolean => parse_bool(raw)
            .map(InputValue::Bool)
            .ok_or_else(|| format!("invalid boolean: {:?}", raw))?,
        ValueKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(InputValue::Int)
            .map_err(|_| format!("invalid integer: {:?}", raw))?,
        ValueKind::Float => match raw.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => InputValue::Float(f),
            _ => return Err(format!("invalid float: {:?}", raw)),
        },
    };

    let numeric = match value {
        InputValue::Int(i) => Some(i as f64),
        InputValue::Float(f) => Some(f),
        _ => None,
    };
    if let Some(n) = numeric {
        if !field.range.contains(n) {
            return Err(format!(
                "{} is outside the allowed range {}",
                raw.trim(),
                format_range(&field.range)
            ));
        }
    }

    Ok(value)
}

impl InputSchema {
    pub fn field(&self, name: &str) -> Option<&InputField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate raw `name -> text` arguments
    ///
    /// Every problem is collected before returning; the result holds only
    /// the supplied arguments, converted to their field types.
    pub fn validate(
        &self,
        raw: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, InputValue>, ValidationErrors> {
        let mut errors = ValidationErrors { errors: vec![] };
        let mut values = BTreeMap::new();

        for key in raw.keys() {
            if self.field(key).is_none() {
                errors.push(key.clone(), "unknown input");
            }
        }

        for field in &self.fields {
            match raw.get(&field.name) {
                Some(text) => match coerce(field, text) {
                    Ok(value) => {
                        values.insert(field.name.clone(), value);
                    }
                    Err(message) => errors.push(field.name.clone(), message),
                },
                None if field.required => errors.push(field.name.clone(), "field required"),
                None => {}
            }
        }

        if errors.is_empty() {
            Ok(values)
        } else {
            Err(errors)
        }
    }

    /// Plain-text parameter table
    pub fn render_table(&self) -> String {
        let header = ["Input", "Type", "Required", "Default", "Range"];
        let rows: Vec<[String; 5]> = self
            .fields
            .iter()
            .map(|f| {
                [
                    f.name.clone(),
                    f.kind.to_string(),
                    if f.required { "yes" } else { "no" }.to_string(),
                    f.default.as_ref().map(format_default).unwrap_or_default(),
                    format_range(&f.range),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row.iter()) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let mut out = String::new();
        let mut line = |cells: &[&str]| {
            let padded: Vec<String> = cells
                .iter()
                .zip(widths.iter())
                .map(|(cell, width)| format!("{:<width$}", cell, width = width))
                .collect();
            let _ = writeln!(out, "{}", padded.join("  ").trim_end());
        };

        line(&header);
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        line(&rule.iter().map(String::as_str).collect::<Vec<_>>());
        for row in &rows {
            line(&row.iter().map(String::as_str).collect::<Vec<_>>());
        }
        out
    }
}

fn format_default(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn format_range(range: &NumericRange) -> String {
    let bound = |b: Option<f64>| b.map(|v| v.to_string()).unwrap_or_default();
    if range.is_unbounded() {
        String::new()
    } else {
        format!("[{}, {}]", bound(range.min), bound(range.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::graph::WorkflowGraph;
    use crate::workflow::parser::parse;
    use serde_json::json;

    fn graph() -> WorkflowGraph {
        WorkflowGraph::from_value(json!({
            "1": {"class_type": "BentoInputString", "inputs": {"value": "hello"}, "_meta": {"title": "prompt"}},
            "2": {"class_type": "CPackInputInt", "inputs": {"value": 4, "min": 1, "max": 8}, "_meta": {"title": "steps"}},
            "3": {"class_type": "BentoInputBoolean", "inputs": {"value": false}, "_meta": {"title": "upscale"}},
            "4": {"class_type": "BentoInputPath", "inputs": {"path": "ref.png"}, "_meta": {"title": "image"}},
            "5": {"class_type": "BentoInputFloat", "inputs": {"value": 0.5}, "_meta": {"title": "strength"}},
            "6": {"class_type": "BentoOutputPath", "inputs": {"filename": ["9", 0], "filename_prefix": ""}, "_meta": {"title": "result"}}
        }))
        .unwrap()
    }

    fn schema() -> InputSchema {
        let graph = graph();
        build_schema(&parse(&graph)).unwrap()
    }

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_and_required() {
        let schema = schema();
        let prompt = schema.field("prompt").unwrap();
        assert_eq!(prompt.kind, ValueKind::String);
        assert_eq!(prompt.default, Some(json!("hello")));
        assert!(!prompt.required);

        let image = schema.field("image").unwrap();
        assert_eq!(image.kind, ValueKind::Path);
        assert!(image.required);
        assert_eq!(image.default, None);

        let steps = schema.field("steps").unwrap();
        assert_eq!(
            steps.range,
            NumericRange {
                min: Some(1.0),
                max: Some(8.0)
            }
        );
    }

    #[test]
    fn test_unsupported_node_type() {
        let graph = WorkflowGraph::from_value(json!({
            "1": {"class_type": "BentoInputVector", "inputs": {"value": [1, 2, 3]}, "_meta": {"title": "vec"}}
        }))
        .unwrap();

        let err = build_schema(&parse(&graph)).unwrap_err();
        assert_eq!(
            err,
            WorkflowError::UnsupportedNodeType {
                name: "vec".to_string(),
                class_type: "BentoInputVector".to_string()
            }
        );
    }

    #[test]
    fn test_validate_coerces_values() {
        let values = schema()
            .validate(&args(&[
                ("image", "in/cat.png"),
                ("steps", "6"),
                ("upscale", "yes"),
                ("strength", "0.75"),
            ]))
            .unwrap();

        assert_eq!(values["image"], InputValue::Path(PathBuf::from("in/cat.png")));
        assert_eq!(values["steps"], InputValue::Int(6));
        assert_eq!(values["upscale"], InputValue::Bool(true));
        assert_eq!(values["strength"], InputValue::Float(0.75));
        assert!(!values.contains_key("prompt"));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let err = schema()
            .validate(&args(&[("steps", "20"), ("upscale", "maybe"), ("bogus", "1")]))
            .unwrap_err();

        let fields: Vec<&str> = err.errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["bogus", "steps", "upscale", "image"]);
        assert!(err.errors[1].message.contains("outside the allowed range"));
        assert_eq!(err.errors[3].message, "field required");
    }

    #[test]
    fn test_linked_first_slot_is_required() {
        let graph = WorkflowGraph::from_value(json!({
            "1": {"class_type": "CPackInputString", "inputs": {"value": ["7", 0]}, "_meta": {"title": "caption"}}
        }))
        .unwrap();

        let schema = build_schema(&parse(&graph)).unwrap();
        assert!(schema.field("caption").unwrap().required);
    }

    #[test]
    fn test_render_table() {
        let table = schema().render_table();
        let lines: Vec<&str> = table.lines().collect();

        assert!(lines[0].starts_with("Input"));
        assert!(lines[0].contains("Range"));
        assert!(lines[1].starts_with("---"));
        assert!(table.contains("steps"));
        assert!(table.contains("[1, 8]"));
        assert!(table.lines().any(|l| l.starts_with("image") && l.contains("yes")));
    }

    #[test]
    fn test_path_value_uses_forward_slashes() {
        let value = InputValue::Path(PathBuf::from("dir\\sub\\img.png"));
        assert_eq!(value.to_json(), json!("dir/sub/img.png"));
    }
}
