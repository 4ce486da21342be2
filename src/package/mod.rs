//! Package archives
//!
//! A package is a zip archive holding everything needed to replay a
//! workflow elsewhere:
//!
//! ```text
//! requirements.txt    frozen interpreter packages
//! snapshot.json       environment snapshot
//! workflow_api.json   executable graph
//! workflow.json       editor document, carried opaquely
//! input/...           input files the graph references by name
//! ```

pub mod workspace;

use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::logging::{operations, status};
use crate::process::{capture, command};
use crate::snapshot::{model_tag, Snapshot};
use crate::store::ModelStore;
use crate::workflow::WorkflowGraph;

pub use workspace::{archive_checksum, archive_workspace, ensure_workspace, snapshot_workspace};

pub const REQUIREMENTS_FILE: &str = "requirements.txt";
pub const SNAPSHOT_FILE: &str = "snapshot.json";
pub const WORKFLOW_API_FILE: &str = "workflow_api.json";
pub const WORKFLOW_FILE: &str = "workflow.json";
pub const INPUT_DIR: &str = "input";

/// `pip freeze` of `python`, minus editable installs and `excludes`, plus `extras`
pub fn freeze_requirements(python: &str, excludes: &[String], extras: &[String]) -> Result<String> {
    let mut args = vec![
        "-m".to_string(),
        "pip".to_string(),
        "freeze".to_string(),
        "--exclude-editable".to_string(),
    ];
    for package in excludes {
        args.push("--exclude".to_string());
        args.push(package.clone());
    }

    let frozen = capture(&mut command(python, &args))
        .with_context(|| format!("Failed to freeze requirements with {}", python))?;

    let mut requirements = String::new();
    for line in frozen.lines().chain(extras.iter().map(String::as_str)) {
        requirements.push_str(line);
        requirements.push('\n');
    }
    debug!(
        operation = "freeze",
        entry_count = requirements.lines().count(),
        "Requirements frozen"
    );
    Ok(requirements)
}

/// An input file and its name inside the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    /// `input/<relative path>` with forward slashes
    pub archive_path: String,
    pub source: PathBuf,
}

/// Files under `input_dir` whose file name appears as a string literal in `graph`
pub fn collect_inputs(input_dir: &Path, graph: &WorkflowGraph) -> Result<Vec<InputFile>> {
    if !input_dir.is_dir() {
        return Ok(Vec::new());
    }
    let used: HashSet<&str> = graph.string_literals().collect();

    let mut inputs = Vec::new();
    for entry in WalkDir::new(input_dir).sort_by_file_name() {
        let entry = entry
            .with_context(|| format!("Failed to walk input directory: {}", input_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !used.contains(name.as_ref()) {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(input_dir)
            .context("Input file outside input directory")?;
        let relative: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        inputs.push(InputFile {
            archive_path: format!("{}/{}", INPUT_DIR, relative.join("/")),
            source: entry.path().to_path_buf(),
        });
    }
    Ok(inputs)
}

/// Copy every snapshot model into `store` and record its tag
pub fn store_models(snapshot: &mut Snapshot, host_dir: &Path, store: &ModelStore) -> Result<usize> {
    let mut stored = 0;
    for model in &mut snapshot.models {
        let source = host_dir.join(&model.filename);
        store
            .put(&source, &model.sha256)
            .with_context(|| format!("Failed to store model {}", model.filename))?;
        model.model_tag = Some(model_tag(&model.filename, &model.sha256));
        stored += 1;
    }
    Ok(stored)
}

/// Everything that goes into one archive
#[derive(Debug, Clone)]
pub struct PackContents {
    pub requirements: String,
    pub snapshot: Snapshot,
    pub workflow_api: WorkflowGraph,
    pub workflow: Value,
    pub inputs: Vec<InputFile>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackSummary {
    pub path: PathBuf,
    pub entry_count: usize,
    pub size_bytes: u64,
}

/// Write `contents` as a zip archive at `dest`
///
/// The archive is assembled next to `dest` and renamed into place.
pub fn write_archive(dest: &Path, contents: &PackContents) -> Result<PackSummary> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let temp = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temporary archive in {}", parent.display()))?;
    let mut zip = ZipWriter::new(temp.reopen().context("Failed to open temporary archive")?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let documents = [
        (REQUIREMENTS_FILE, contents.requirements.clone()),
        (SNAPSHOT_FILE, contents.snapshot.to_json_pretty()?),
        (WORKFLOW_API_FILE, contents.workflow_api.to_json_pretty()?),
        (
            WORKFLOW_FILE,
            serde_json::to_string_pretty(&contents.workflow)
                .context("Failed to serialize workflow document")?,
        ),
    ];
    for (name, body) in &documents {
        zip.start_file(*name, options)
            .with_context(|| format!("Failed to add {} to archive", name))?;
        zip.write_all(body.as_bytes())
            .with_context(|| format!("Failed to write {} to archive", name))?;
    }

    for input in &contents.inputs {
        zip.start_file(input.archive_path.as_str(), options)
            .with_context(|| format!("Failed to add {} to archive", input.archive_path))?;
        let mut source = File::open(&input.source)
            .with_context(|| format!("Failed to open input file: {}", input.source.display()))?;
        io::copy(&mut source, &mut zip)
            .with_context(|| format!("Failed to write {} to archive", input.archive_path))?;
    }

    let mut file = zip.finish().context("Failed to finalize archive")?;
    file.sync_all().context("Failed to sync archive")?;
    drop(file);

    temp.persist(dest)
        .map_err(|e| anyhow!("Failed to move archive to {}: {}", dest.display(), e.error))?;

    let size_bytes = fs::metadata(dest)
        .with_context(|| format!("Failed to stat archive: {}", dest.display()))?
        .len();
    let entry_count = documents.len() + contents.inputs.len();
    info!(
        operation = operations::PACK,
        status = status::SUCCESS,
        path = %dest.display(),
        entry_count,
        size_bytes,
        "Package written"
    );
    Ok(PackSummary {
        path: dest.to_path_buf(),
        entry_count,
        size_bytes,
    })
}

fn open_archive(archive: &Path) -> Result<ZipArchive<File>> {
    let file = File::open(archive)
        .with_context(|| format!("Failed to open package: {}", archive.display()))?;
    ZipArchive::new(file).with_context(|| format!("{} is not a valid package", archive.display()))
}

fn read_entry(archive: &mut ZipArchive<File>, name: &str) -> Result<String> {
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("{} missing from package", name))?;
    let mut content = String::new();
    entry
        .read_to_string(&mut content)
        .with_context(|| format!("Failed to read {} from package", name))?;
    Ok(content)
}

/// Executable graph and snapshot, read without extracting
#[derive(Debug, Clone)]
pub struct PackageManifest {
    pub snapshot: Snapshot,
    pub workflow_api: WorkflowGraph,
}

pub fn read_manifest(archive: &Path) -> Result<PackageManifest> {
    let mut zip = open_archive(archive)?;
    let workflow_api = WorkflowGraph::from_json(&read_entry(&mut zip, WORKFLOW_API_FILE)?)
        .with_context(|| format!("Invalid {} in {}", WORKFLOW_API_FILE, archive.display()))?;
    let snapshot = Snapshot::from_json(&read_entry(&mut zip, SNAPSHOT_FILE)?)
        .with_context(|| format!("Invalid {} in {}", SNAPSHOT_FILE, archive.display()))?;
    Ok(PackageManifest {
        snapshot,
        workflow_api,
    })
}

/// An extracted package directory
#[derive(Debug, Clone)]
pub struct UnpackedPackage {
    pub root: PathBuf,
    pub snapshot: Snapshot,
    pub workflow_api: WorkflowGraph,
}

impl UnpackedPackage {
    pub fn requirements(&self) -> PathBuf {
        self.root.join(REQUIREMENTS_FILE)
    }

    pub fn input_dir(&self) -> Option<PathBuf> {
        let dir = self.root.join(INPUT_DIR);
        dir.is_dir().then_some(dir)
    }
}

/// Extract `archive` into `dest`
///
/// Entries whose names would escape `dest` are skipped.
pub fn unpack(archive: &Path, dest: &Path) -> Result<UnpackedPackage> {
    let mut zip = open_archive(archive)?;
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create directory: {}", dest.display()))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).context("Failed to read package entry")?;
        let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
            warn!(entry = entry.name(), "Skipping package entry with unsafe path");
            continue;
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create directory: {}", target.display()))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create file: {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {}", target.display()))?;
    }

    let workflow_api = WorkflowGraph::from_file(&dest.join(WORKFLOW_API_FILE))?;
    let snapshot = Snapshot::from_file(&dest.join(SNAPSHOT_FILE))?;
    info!(
        operation = operations::UNPACK,
        status = status::SUCCESS,
        path = %dest.display(),
        entry_count = zip.len(),
        "Package extracted"
    );
    Ok(UnpackedPackage {
        root: dest.to_path_buf(),
        snapshot,
        workflow_api,
    })
}
