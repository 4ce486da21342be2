//! Closed table of parameter node classes
//!
//! Input nodes are recognized by class prefix; the table decides which value
//! kind each one carries. A prefix match missing from the table is an
//! unsupported node type at schema time.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const INPUT_PREFIXES: &[&str] = &["BentoInput", "CPackInput"];
pub const OUTPUT_PREFIXES: &[&str] = &["BentoOutput", "CPackOutput"];

/// Output-prefixed classes that toggle behavior instead of writing a file
const NON_ARTIFACT_OUTPUTS: &[&str] = &["CPackOutputZipSwitch"];

/// Slot that receives the per-run output prefix
pub const OUTPUT_PREFIX_SLOT: &str = "filename_prefix";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Boolean,
    Integer,
    Float,
    Path,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Path => "path",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type tag on a node output slot
///
/// `Any` is the wildcard: it connects to and from every other tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SlotType {
    Any,
    Named(String),
}

impl SlotType {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "*" | "" => Self::Any,
            other => Self::Named(other.to_ascii_uppercase()),
        }
    }

    /// Whether a producer emitting `self` may feed a slot declared as `other`
    pub fn accepts(&self, other: &SlotType) -> bool {
        match (self, other) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Named(a), Self::Named(b)) => {
                // Hosts allow comma-separated unions on the receiving side
                b.split(',').any(|part| part.trim() == a)
            }
        }
    }
}

impl fmt::Display for SlotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("*"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl Serialize for SlotType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Recognized input class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputClass {
    pub class_type: &'static str,
    pub kind: ValueKind,
    emits: &'static str,
}

impl InputClass {
    pub fn emits(&self) -> SlotType {
        SlotType::parse(self.emits)
    }
}

const INPUT_CLASSES: &[InputClass] = &[
    InputClass {
        class_type: "BentoInputString",
        kind: ValueKind::String,
        emits: "STRING",
    },
    InputClass {
        class_type: "BentoInputBoolean",
        kind: ValueKind::Boolean,
        emits: "BOOLEAN",
    },
    InputClass {
        class_type: "BentoInputInteger",
        kind: ValueKind::Integer,
        emits: "INT",
    },
    InputClass {
        class_type: "BentoInputFloat",
        kind: ValueKind::Float,
        emits: "FLOAT",
    },
    InputClass {
        class_type: "BentoInputPath",
        kind: ValueKind::Path,
        emits: "STRING",
    },
    InputClass {
        class_type: "BentoInputImage",
        kind: ValueKind::Path,
        emits: "IMAGE",
    },
    InputClass {
        class_type: "CPackInputString",
        kind: ValueKind::String,
        emits: "STRING",
    },
    InputClass {
        class_type: "CPackInputInt",
        kind: ValueKind::Integer,
        emits: "INT",
    },
    InputClass {
        class_type: "CPackInputImage",
        kind: ValueKind::Path,
        emits: "IMAGE",
    },
    InputClass {
        class_type: "CPackInputFile",
        kind: ValueKind::Path,
        emits: "*",
    },
    InputClass {
        class_type: "CPackInputAny",
        kind: ValueKind::String,
        emits: "*",
    },
];

pub fn is_input_class(class_type: &str) -> bool {
    INPUT_PREFIXES.iter().any(|p| class_type.starts_with(p))
}

pub fn is_output_class(class_type: &str) -> bool {
    OUTPUT_PREFIXES.iter().any(|p| class_type.starts_with(p))
        && !NON_ARTIFACT_OUTPUTS.contains(&class_type)
}

pub fn input_class(class_type: &str) -> Option<&'static InputClass> {
    INPUT_CLASSES.iter().find(|c| c.class_type == class_type)
}
