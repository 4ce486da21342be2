// Common test utilities shared across acceptance tests
//
// Every command runs with its cache, config and data directories pointed
// into a per-test temp dir, so nothing touches the developer's real
// `~/.cache/cpack` or installed workspaces.

use assert_cmd::Command;
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use cpack::package::{write_archive, PackContents};
use cpack::{Snapshot, WorkflowGraph};

pub struct TestEnv {
    temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.path().join("cache")
    }

    pub fn workspace_root(&self) -> PathBuf {
        self.path().join("workspaces")
    }

    /// `cpack` isolated from user config, cache and any external server
    pub fn cpack(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cpack"));
        cmd.current_dir(self.path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg-config"))
            .env("XDG_DATA_HOME", self.path().join("xdg-data"))
            .env("CPACK_CACHE_DIR", self.cache_dir())
            .env("CPACK_WORKSPACE_ROOT", self.workspace_root())
            .env("NO_COLOR", "1")
            .env_remove("CPACK_CONFIG")
            .env_remove("CPACK_PYTHON")
            .env_remove("CPACK_TIMEOUT")
            .env_remove("CPACK_PORT")
            .env_remove("COMFYUI_SERVER");
        cmd
    }

    /// Write a package with an `image` path input and a bounded `steps` input
    pub fn write_package(&self, name: &str) -> PathBuf {
        let archive = self.path().join(name);
        write_archive(&archive, &sample_contents()).expect("Failed to write package");
        archive
    }
}

pub fn sample_graph() -> WorkflowGraph {
    WorkflowGraph::from_value(json!({
        "1": {
            "class_type": "CPackInputImage",
            "inputs": {"image": "cat.png"},
            "_meta": {"title": "image"}
        },
        "2": {
            "class_type": "CPackInputInt",
            "inputs": {"value": 20, "min": 1, "max": 50},
            "_meta": {"title": "steps"}
        },
        "3": {
            "class_type": "CPackOutputImage",
            "inputs": {"filename_prefix": "out", "images": ["1", 0]},
            "_meta": {"title": "result"}
        }
    }))
    .expect("Invalid sample graph")
}

pub fn sample_contents() -> PackContents {
    PackContents {
        requirements: "torch==2.3.0\n".to_string(),
        snapshot: Snapshot {
            python: "3.11".to_string(),
            host_commit: "abc123".to_string(),
            models: vec![],
            custom_nodes: vec![],
        },
        workflow_api: sample_graph(),
        workflow: json!({"nodes": [], "links": []}),
        inputs: vec![],
    }
}
