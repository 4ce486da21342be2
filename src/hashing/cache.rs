//! Content hash cache for large model files
//!
//! Entries are keyed by absolute path and trusted only while the recorded
//! `(size, birthtime)` pair still matches a fresh `stat()`. Anything else
//! forces a streaming re-hash. The cache file is a pure optimization: if it
//! is missing or unreadable we start cold.
//!
//! Birthtime is the inode change time on unix. An in-place rewrite that
//! keeps the size and does not bump it is not detected.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info, warn};

use super::lock::CacheLock;
use crate::atomic::write_atomic;

/// Read size for streaming hashes
pub const CHUNK_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCacheEntry {
    pub sha256: String,
    pub size: u64,
    pub birthtime: f64,
    pub last_verified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub bytes_hashed: u64,
}

pub struct ModelHashCache {
    cache_file: PathBuf,
    entries: HashMap<String, ModelCacheEntry>,
    stats: CacheStats,
}

/// Identity of a file as seen by the cache
#[derive(Debug, Clone, Copy, PartialEq)]
struct FileIdentity {
    size: u64,
    birthtime: f64,
}

impl FileIdentity {
    fn of(path: &Path) -> std::io::Result<Self> {
        let metadata = fs::metadata(path)?;
        Ok(Self {
            size: metadata.len(),
            birthtime: birthtime(&metadata),
        })
    }
}

#[cfg(unix)]
fn birthtime(metadata: &fs::Metadata) -> f64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ctime() as f64 + metadata.ctime_nsec() as f64 / 1e9
}

#[cfg(not(unix))]
fn birthtime(metadata: &fs::Metadata) -> f64 {
    metadata
        .created()
        .or_else(|_| metadata.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Stream a file through SHA-256; returns the hex digest and byte count
pub fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        total += read as u64;
    }

    Ok((hex::encode(hasher.finalize()), total))
}

fn cache_key(path: &Path) -> String {
    std::path::absolute(path)
        .unwrap_or_else(|_| path.to_path_buf())
        .to_string_lossy()
        .into_owned()
}

fn read_entries(cache_file: &Path) -> HashMap<String, ModelCacheEntry> {
    let content = match fs::read_to_string(cache_file) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(path = %cache_file.display(), "Unreadable hash cache, starting cold: {}", e);
            return HashMap::new();
        }
    };

    match serde_json::from_str(&content) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %cache_file.display(), "Corrupt hash cache, starting cold: {}", e);
            HashMap::new()
        }
    }
}

impl ModelHashCache {
    /// Load the cache from `cache_file`; a missing or corrupt file yields an empty cache
    pub fn load(cache_file: impl Into<PathBuf>) -> Self {
        let cache_file = cache_file.into();
        let entries = read_entries(&cache_file);
        debug!(
            operation = "load",
            path = %cache_file.display(),
            entry_count = entries.len(),
            "Loaded hash cache"
        );
        Self {
            cache_file,
            entries,
            stats: CacheStats::default(),
        }
    }

    pub fn cache_file(&self) -> &Path {
        &self.cache_file
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn entry(&self, path: &Path) -> Option<&ModelCacheEntry> {
        self.entries.get(&cache_key(path))
    }

    fn lookup(&self, key: &str, identity: FileIdentity) -> Option<&ModelCacheEntry> {
        self.entries
            .get(key)
            .filter(|e| e.size == identity.size && e.birthtime == identity.birthtime)
    }

    fn record(&mut self, key: String, identity: FileIdentity, sha256: String) {
        self.entries.insert(
            key,
            ModelCacheEntry {
                sha256,
                size: identity.size,
                birthtime: identity.birthtime,
                last_verified: Utc::now(),
            },
        );
    }

    /// Digest of `path`, re-hashing only when size or birthtime changed
    ///
    /// Updates the in-memory cache; call [`save`](Self::save) to persist.
    pub fn get(&mut self, path: &Path) -> Result<String> {
        let key = cache_key(path);
        let identity = FileIdentity::of(path)
            .with_context(|| format!("Failed to stat file: {}", path.display()))?;

        if let Some(sha256) = self.lookup(&key, identity).map(|e| e.sha256.clone()) {
            self.stats.hits += 1;
            debug!(operation = "get", status = "hit", path = %path.display(), "hash cache hit");
            return Ok(sha256);
        }

        self.stats.misses += 1;
        let (sha256, bytes) = sha256_file(path)?;
        self.stats.bytes_hashed += bytes;
        debug!(
            operation = "get",
            status = "miss",
            path = %path.display(),
            size_bytes = bytes,
            "hashed file"
        );
        self.record(key, identity, sha256.clone());
        Ok(sha256)
    }

    /// Digest from the cache only; `None` when absent or stale
    pub fn get_cached_only(&self, path: &Path) -> Option<String> {
        let identity = FileIdentity::of(path).ok()?;
        self.lookup(&cache_key(path), identity)
            .map(|e| e.sha256.clone())
    }

    /// Hash many files, spreading cache misses over a worker pool
    ///
    /// The result is positional. A file that cannot be stat'ed or read yields
    /// `None` without failing the batch. The cache is saved afterwards.
    pub fn hash_many(&mut self, paths: &[PathBuf]) -> Result<Vec<Option<String>>> {
        let mut results: Vec<Option<String>> = vec![None; paths.len()];
        let mut pending: Vec<(usize, String, FileIdentity)> = Vec::new();

        for (index, path) in paths.iter().enumerate() {
            let identity = match FileIdentity::of(path) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping unreadable file: {}", e);
                    continue;
                }
            };
            let key = cache_key(path);
            if let Some(sha256) = self.lookup(&key, identity).map(|e| e.sha256.clone()) {
                self.stats.hits += 1;
                results[index] = Some(sha256);
            } else {
                pending.push((index, key, identity));
            }
        }

        if !pending.is_empty() {
            let workers = num_cpus::get().saturating_sub(1).max(1).min(pending.len());
            info!(
                operation = "hash_many",
                entry_count = pending.len(),
                workers,
                "Hashing files"
            );

            let (job_tx, job_rx) = crossbeam_channel::unbounded::<(usize, PathBuf)>();
            let (done_tx, done_rx) =
                crossbeam_channel::unbounded::<(usize, Result<(String, u64)>)>();

            for (index, _, _) in &pending {
                // Receiver outlives every send here
                let _ = job_tx.send((*index, paths[*index].clone()));
            }
            drop(job_tx);

            thread::scope(|scope| {
                for _ in 0..workers {
                    let job_rx = job_rx.clone();
                    let done_tx = done_tx.clone();
                    scope.spawn(move || {
                        for (index, path) in job_rx.iter() {
                            let _ = done_tx.send((index, sha256_file(&path)));
                        }
                    });
                }
            });
            drop(done_tx);

            let identities: HashMap<usize, (String, FileIdentity)> = pending
                .into_iter()
                .map(|(index, key, identity)| (index, (key, identity)))
                .collect();

            for (index, outcome) in done_rx.iter() {
                match outcome {
                    Ok((sha256, bytes)) => {
                        self.stats.misses += 1;
                        self.stats.bytes_hashed += bytes;
                        if let Some((key, identity)) = identities.get(&index) {
                            self.record(key.clone(), *identity, sha256.clone());
                        }
                        results[index] = Some(sha256);
                    }
                    Err(e) => {
                        warn!(path = %paths[index].display(), "Failed to hash file: {:#}", e);
                    }
                }
            }
        }

        self.save()?;
        Ok(results)
    }

    /// Persist the cache, merging with whatever another writer saved meanwhile
    ///
    /// Holds the advisory lock only for the read-merge-write window. Our
    /// entries win on conflicting keys.
    pub fn save(&self) -> Result<()> {
        let _lock = CacheLock::acquire(&self.cache_file)?;

        let mut merged = read_entries(&self.cache_file);
        for (key, entry) in &self.entries {
            merged.insert(key.clone(), entry.clone());
        }

        let json = serde_json::to_vec_pretty(&merged).context("Failed to serialize hash cache")?;
        write_atomic(&self.cache_file, &json)?;

        debug!(
            operation = "save",
            path = %self.cache_file.display(),
            entry_count = merged.len(),
            "Saved hash cache"
        );
        Ok(())
    }
}
