use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// cpack - package and replay ComfyUI workflows
///
/// Captures a workflow together with the exact environment it ran in, and
/// rebuilds that environment elsewhere to run the workflow with new inputs.
#[derive(Parser, Debug)]
#[command(name = "cpack")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Package and replay ComfyUI workflows", long_about = None)]
pub struct Cli {
    /// Show child process output (-v stdout, -vv stdout and stderr)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path
    #[arg(short = 'c', long, env = "CPACK_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Configuration overrides shared by commands that touch the cache
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Cache directory (hash cache and model store)
    #[arg(long, env = "CPACK_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Interpreter used for freezing requirements and version detection
    #[arg(long, env = "CPACK_PYTHON")]
    pub python: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Package a workflow and its environment into an archive
    Pack(PackArgs),

    /// Install a workspace from an archive
    Unpack(UnpackArgs),

    /// Show the input schema of an archive
    Info(InfoArgs),

    /// Install an archive's environment and run its workflow
    Run(RunArgs),

    /// Print the environment snapshot of a host checkout
    Snapshot(SnapshotArgs),

    /// Hash files through the model hash cache
    Hash(HashArgs),
}

#[derive(Parser, Debug)]
pub struct PackArgs {
    /// Executable graph (API format)
    #[arg(long)]
    pub workflow_api: PathBuf,

    /// Editor document stored alongside the graph
    #[arg(long)]
    pub workflow: PathBuf,

    /// Host application checkout
    #[arg(long)]
    pub host_dir: PathBuf,

    /// Archive path
    #[arg(short, long, default_value = "package.cpack.zip")]
    pub output: PathBuf,

    /// Copy models into the local model store and record their tags
    #[arg(long)]
    pub store_models: bool,

    /// Extra requirement line appended after the frozen list (repeatable)
    #[arg(long = "extra-requirement")]
    pub extra_requirements: Vec<String>,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Parser, Debug)]
pub struct UnpackArgs {
    /// Archive to install
    pub archive: PathBuf,

    /// Workspace directory (default: `workspace`, or the archive name
    /// without extension with --extract-only)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Only extract the archive contents, without installing anything
    #[arg(long)]
    pub extract_only: bool,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Archive to inspect
    pub archive: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Archive to run
    pub archive: PathBuf,

    /// Directory receiving the workflow output
    #[arg(short, long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Run timeout (e.g. "300s", "10m")
    #[arg(long, env = "CPACK_TIMEOUT")]
    pub timeout: Option<String>,

    /// Root of the installed workspace cache
    #[arg(long, env = "CPACK_WORKSPACE_ROOT")]
    pub workspace_root: Option<PathBuf>,

    /// Port for the managed host server
    #[arg(long, env = "CPACK_PORT")]
    pub port: Option<u16>,

    /// Exit if the host process dies while the run is in progress
    #[arg(long)]
    pub watchdog: bool,

    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Workflow inputs as `--name value` pairs (after --)
    #[arg(last = true)]
    pub inputs: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct SnapshotArgs {
    /// Host application checkout
    #[arg(long)]
    pub host_dir: PathBuf,

    /// Graph whose string literals mark models as explicit
    #[arg(long)]
    pub workflow_api: PathBuf,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}

#[derive(Parser, Debug)]
pub struct HashArgs {
    /// Files to hash
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    #[command(flatten)]
    pub common: CommonConfigArgs,
}
