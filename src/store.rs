//! Local content-addressed model store
//!
//! Layout: `<root>/<sha[0..2]>/<sha>`. Objects are immutable; putting an
//! object that is already present is a no-op.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, sha256: &str) -> PathBuf {
        let shard = sha256.get(..2).unwrap_or(sha256);
        self.root.join(shard).join(sha256)
    }

    pub fn get(&self, sha256: &str) -> Option<PathBuf> {
        let path = self.object_path(sha256);
        path.is_file().then_some(path)
    }

    /// Copy `source` into the store under `sha256`
    pub fn put(&self, source: &Path, sha256: &str) -> Result<PathBuf> {
        let dest = self.object_path(sha256);
        if dest.is_file() {
            debug!(operation = "put", status = "exists", object_id = sha256, "model already stored");
            return Ok(dest);
        }

        let parent = dest
            .parent()
            .with_context(|| format!("Store path has no parent: {}", dest.display()))?;
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

        let temp = parent.join(format!(".{}.tmp.{}", sha256, std::process::id()));
        let stored = fs::copy(source, &temp)
            .with_context(|| format!("Failed to copy {} into store", source.display()))
            .and_then(|_| {
                fs::rename(&temp, &dest).with_context(|| {
                    format!("Failed to move model into store: {}", dest.display())
                })
            });
        if stored.is_err() {
            let _ = fs::remove_file(&temp);
        }
        stored?;

        info!(
            operation = "put",
            status = "success",
            object_id = sha256,
            path = %source.display(),
            "Stored model"
        );
        Ok(dest)
    }

    /// Materialize a stored object at `dest`: symlink on unix, copy elsewhere
    pub fn link_into(&self, sha256: &str, dest: &Path) -> Result<bool> {
        let Some(object) = self.get(sha256) else {
            return Ok(false);
        };
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        if dest.symlink_metadata().is_ok() {
            fs::remove_file(dest)
                .with_context(|| format!("Failed to replace {}", dest.display()))?;
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(&object, dest)
            .with_context(|| format!("Failed to link {}", dest.display()))?;

        #[cfg(not(unix))]
        fs::copy(&object, dest).with_context(|| format!("Failed to copy {}", dest.display()))?;

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn test_put_get_and_link() {
        let temp = TempDir::new().unwrap();
        let store = ModelStore::new(temp.path().join("models"));
        let source = temp.path().join("model.bin");
        fs::write(&source, "hello").unwrap();

        assert!(store.get(SHA).is_none());
        let stored = store.put(&source, SHA).unwrap();
        assert_eq!(stored, temp.path().join("models").join("2c").join(SHA));
        assert_eq!(store.put(&source, SHA).unwrap(), stored);

        let dest = temp.path().join("ws").join("models").join("model.bin");
        assert!(store.link_into(SHA, &dest).unwrap());
        assert_eq!(fs::read_to_string(&dest).unwrap(), "hello");
        // Relinking replaces the previous entry
        assert!(store.link_into(SHA, &dest).unwrap());
    }

    #[test]
    fn test_link_missing_object() {
        let temp = TempDir::new().unwrap();
        let store = ModelStore::new(temp.path());
        assert!(!store.link_into(SHA, &temp.path().join("x")).unwrap());
    }

    #[test]
    fn test_failed_put_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        let store = ModelStore::new(temp.path().join("models"));
        let source = temp.path().join("model.bin");
        fs::write(&source, "hello").unwrap();
        // A directory squatting on the object path makes the final rename fail
        fs::create_dir_all(store.object_path(SHA).join("child")).unwrap();

        assert!(store.put(&source, SHA).is_err());

        let shard = temp.path().join("models").join("2c");
        let leftovers: Vec<_> = fs::read_dir(&shard)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }
}
