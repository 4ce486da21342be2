//! Environment snapshot
//!
//! A snapshot pins everything needed to rebuild an execution environment:
//! interpreter version, host application commit, model files and extension
//! checkouts. It is written once at pack time and never edited.

mod builder;

pub use builder::{python_version, SnapshotBuilder};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    /// Path relative to the host checkout, e.g. `models/checkpoints/x.safetensors`
    pub filename: String,
    pub sha256: String,
    pub size: u64,
    /// Referenced by a string literal in the workflow
    pub explicit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tag: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionRecord {
    pub url: String,
    pub commit_hash: String,
    #[serde(default)]
    pub disabled: bool,
}

impl ExtensionRecord {
    /// Checkout directory name: last URL segment up to the first dot
    ///
    /// `None` when the URL yields no usable single path component.
    pub fn dir_name(&self) -> Option<String> {
        let last = self
            .url
            .trim_end_matches('/')
            .rsplit(|c: char| c == '/' || c == ':')
            .next()
            .unwrap_or_default();
        let base = last.split('.').next().unwrap_or_default();
        if base.is_empty() || base.contains('\\') {
            return None;
        }
        Some(if self.disabled {
            format!("{}.disabled", base)
        } else {
            base.to_string()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// `major.minor`
    pub python: String,
    #[serde(rename = "comfyui")]
    pub host_commit: String,
    #[serde(default)]
    pub models: Vec<ModelRecord>,
    #[serde(default)]
    pub custom_nodes: Vec<ExtensionRecord>,
}

/// Content-store tag for a model file: `<stem>:<first 16 hex of sha256>`
pub fn model_tag(filename: &str, sha256: &str) -> String {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let short = sha256.get(..16).unwrap_or(sha256);
    format!("{}:{}", stem, short)
}

impl Snapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse snapshot")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot: {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid snapshot: {}", path.display()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize snapshot")
    }

    /// SHA-256 of the serialized snapshot; keys the shared workspace cache
    pub fn checksum(&self) -> Result<String> {
        let json = self.to_json_pretty()?;
        Ok(hex::encode(Sha256::digest(json.as_bytes())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Snapshot {
        Snapshot {
            python: "3.11".to_string(),
            host_commit: "abc123".to_string(),
            models: vec![ModelRecord {
                filename: "models/checkpoints/sd15.safetensors".to_string(),
                sha256: "0123456789abcdef0123456789abcdef".to_string(),
                size: 42,
                explicit: true,
                model_tag: None,
                disabled: false,
            }],
            custom_nodes: vec![ExtensionRecord {
                url: "https://github.com/ltdrdata/ComfyUI-Manager.git".to_string(),
                commit_hash: "def456".to_string(),
                disabled: false,
            }],
        }
    }

    #[test]
    fn test_wire_field_names() {
        let json: serde_json::Value =
            serde_json::from_str(&sample().to_json_pretty().unwrap()).unwrap();
        assert_eq!(json["comfyui"], "abc123");
        assert_eq!(json["python"], "3.11");
        assert_eq!(json["custom_nodes"][0]["commit_hash"], "def456");
        assert!(json["models"][0].get("model_tag").is_none());
    }

    #[test]
    fn test_reads_minimal_snapshot() {
        let snapshot = Snapshot::from_json(r#"{"python": "3.10", "comfyui": "c0ffee"}"#).unwrap();
        assert!(snapshot.models.is_empty());
        assert!(snapshot.custom_nodes.is_empty());
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = sample();
        let mut b = sample();
        assert_eq!(a.checksum().unwrap(), b.checksum().unwrap());
        b.host_commit = "other".to_string();
        assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
        assert_eq!(a.checksum().unwrap().len(), 64);
    }

    #[test]
    fn test_extension_dir_name() {
        let mut ext = sample().custom_nodes.remove(0);
        assert_eq!(ext.dir_name().as_deref(), Some("ComfyUI-Manager"));

        ext.url = "git@github.com:someone/comfyui_controlnet_aux".to_string();
        assert_eq!(ext.dir_name().as_deref(), Some("comfyui_controlnet_aux"));

        ext.url = "https://example.com/x/was-node-suite/".to_string();
        ext.disabled = true;
        assert_eq!(ext.dir_name().as_deref(), Some("was-node-suite.disabled"));
    }

    #[test]
    fn test_extension_dir_name_rejects_dot_segments() {
        let mut ext = sample().custom_nodes.remove(0);
        for url in [
            "https://github.com/someone/.hidden",
            "https://github.com/someone/..",
            "https://github.com/someone/.",
            "",
        ] {
            ext.url = url.to_string();
            assert_eq!(ext.dir_name(), None, "{}", url);
        }
    }

    #[test]
    fn test_model_tag() {
        assert_eq!(
            model_tag(
                "models/loras/detail.safetensors",
                "0123456789abcdef0123456789abcdef"
            ),
            "detail:0123456789abcdef"
        );
    }
}
