// Library interface for cpack
// Integration tests and embedding code use these modules directly

pub mod atomic;
pub mod cli;
pub mod cli_utils;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod error;
pub mod git;
pub mod hashing;
pub mod install;
pub mod logging;
pub mod merger;
pub mod package;
pub mod process;
pub mod runner;
pub mod snapshot;
pub mod store;
pub mod workflow;
pub mod xdg;

// Re-export commonly used types
pub use config::CpackConfig;
pub use error::{RunError, ValidationErrors, WorkflowError};
pub use package::{read_manifest, unpack, write_archive, PackContents};
pub use runner::{ServerMode, SessionDirs, WorkflowRunner};
pub use snapshot::Snapshot;
pub use workflow::{build_schema, parse, InputSchema, InputValue, WorkflowGraph};
