//! Typed errors for the packaging and replay pipeline
//!
//! Each enum maps to one bucket of the error taxonomy:
//!
//! - [`WorkflowError`]: configuration errors found while reading a graph
//! - [`ValidationErrors`]: caller-supplied arguments that fail the schema
//! - [`LifecycleError`]: runner methods called in the wrong state
//! - [`RunError`]: the host process failed, timed out or never became ready
//! - [`InstallError`]: installation stages run out of order or a tool failed
//!
//! Application code wraps these in `anyhow::Error`; callers that need to
//! branch on the kind use `downcast_ref`.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::install::InstallStage;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("Unsupported node type: {class_type} (input '{name}')")]
    UnsupportedNodeType { name: String, class_type: String },

    #[error("Exactly one output node is required, found {count}; multiple outputs are not supported")]
    OutputCount { count: usize },

    #[error("Node '{name}' is not an input node")]
    WrongNodeKind { name: String },

    #[error("No input named '{name}' in workflow")]
    UnknownInput { name: String },

    #[error("No output file with prefix '{prefix}' found in {}", dir.display())]
    OutputNotFound { dir: PathBuf, prefix: String },

    #[error("Malformed workflow graph: {0}")]
    MalformedGraph(String),
}

/// A single field that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// All field errors from one validation pass
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid argument(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n- {}: {}", error.field, error.message)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Runner is already started")]
    AlreadyRunning,

    #[error("Runner is not started yet")]
    NotRunning,
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}")]
    NonZeroExit { program: String, code: i32 },

    #[error("Workflow run timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Host application did not become ready: {0}")]
    NotReady(String),
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("Cannot run stage {stage}: prerequisite {missing} has not completed")]
    StageOrder {
        stage: InstallStage,
        missing: InstallStage,
    },

    #[error("Command failed ({code}): {command}")]
    CommandFailed { command: String, code: i32 },

    #[error("Refusing {kind} path outside the workspace: {path:?}")]
    UnsafePath { kind: &'static str, path: String },
}
