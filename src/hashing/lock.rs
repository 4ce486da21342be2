//! Advisory exclusive lock held around hash cache write-back

use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

/// Guard for `<cache file>.lock`; released on drop
pub struct CacheLock {
    path: PathBuf,
    #[cfg(unix)]
    _guard: nix::fcntl::Flock<File>,
    #[cfg(not(unix))]
    _file: File,
}

impl CacheLock {
    /// Block until the exclusive lock next to `cache_file` is held
    pub fn acquire(cache_file: &Path) -> Result<Self> {
        let path = lock_path(cache_file);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file: {}", path.display()))?;

        #[cfg(unix)]
        {
            use nix::fcntl::{Flock, FlockArg};
            let guard = Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, errno)| {
                anyhow::anyhow!("Failed to lock {}: {}", path.display(), errno)
            })?;
            Ok(Self {
                path,
                _guard: guard,
            })
        }

        #[cfg(not(unix))]
        {
            Ok(Self { path, _file: file })
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn lock_path(cache_file: &Path) -> PathBuf {
    let mut name = cache_file.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}
