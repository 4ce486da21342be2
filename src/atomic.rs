use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::thread;

/// Write `data` to `path` through a sibling temp file and a rename
///
/// Readers either see the previous content or the new one, never a
/// truncated file. The temp name carries PID and thread id so concurrent
/// writers in different processes do not share a temp file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("Path has no file name: {}", path.display()))?;
    let temp_path = parent.join(format!(
        ".{}.tmp.{}.{:?}",
        file_name,
        std::process::id(),
        thread::current().id()
    ));

    let written = write_and_rename(&temp_path, path, data);
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written
}

fn write_and_rename(temp_path: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(temp_path)
        .with_context(|| format!("Failed to create temp file: {}", temp_path.display()))?;
    file.write_all(data).context("Failed to write data")?;
    file.sync_all().context("Failed to sync file")?;
    drop(file);

    fs::rename(temp_path, path)
        .with_context(|| format!("Failed to rename temp file into {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("file.txt");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_rename_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("occupied");
        fs::create_dir_all(path.join("child")).unwrap();

        assert!(write_atomic(&path, b"data").is_err());

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
        assert!(path.join("child").is_dir());
    }
}
