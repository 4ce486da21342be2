use anyhow::Result;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::atomic::write_atomic;

/// Marker file whose content is the pin an install unit was built from
///
/// An unreadable sentinel reads as "not installed".
#[derive(Debug, Clone)]
pub struct Sentinel {
    path: PathBuf,
}

impl Sentinel {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Option<String> {
        match fs::read(&self.path) {
            Ok(bytes) => match String::from_utf8(bytes) {
                Ok(text) => Some(text.trim().to_string()),
                Err(_) => {
                    warn!(path = %self.path.display(), "Ignoring corrupt sentinel");
                    None
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %self.path.display(), "Ignoring unreadable sentinel: {}", e);
                None
            }
        }
    }

    pub fn matches(&self, pin: &str) -> bool {
        !pin.is_empty() && self.read().as_deref() == Some(pin)
    }

    pub fn write(&self, pin: &str) -> Result<()> {
        write_atomic(&self.path, pin.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_sentinel_does_not_match() {
        let temp = TempDir::new().unwrap();
        let sentinel = Sentinel::new(temp.path().join(".DONE"));
        assert_eq!(sentinel.read(), None);
        assert!(!sentinel.matches("abc"));
    }

    #[test]
    fn test_write_then_match() {
        let temp = TempDir::new().unwrap();
        let sentinel = Sentinel::new(temp.path().join(".DONE"));
        sentinel.write("abc").unwrap();

        assert!(sentinel.matches("abc"));
        assert!(!sentinel.matches("def"));
        assert!(!sentinel.matches(""));
    }

    #[test]
    fn test_trailing_newline_is_ignored() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".DONE"), "abc\n").unwrap();
        assert!(Sentinel::new(temp.path().join(".DONE")).matches("abc"));
    }

    #[test]
    fn test_binary_garbage_reads_as_absent() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(".DONE"), [0xff, 0xfe, 0x00]).unwrap();
        assert_eq!(Sentinel::new(temp.path().join(".DONE")).read(), None);
    }
}
