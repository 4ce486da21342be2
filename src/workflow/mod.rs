/// Workflow graph model, boundary-node parsing, schema and population
///
/// Flow for one run:
/// 1. `parser::parse` classifies input/output nodes and names them
/// 2. `schema::build_schema` derives the typed argument schema
/// 3. `populate::populate` injects validated values into a copy
/// 4. `populate::retrieve` finds the artifact after the host ran it
pub mod catalog;
pub mod graph;
pub mod parser;
pub mod populate;
pub mod schema;

pub use graph::{Link, Node, WorkflowGraph};
pub use parser::{parse, ParsedWorkflow, PortSpec};
pub use populate::{populate, retrieve};
pub use schema::{build_schema, InputField, InputSchema, InputValue};
