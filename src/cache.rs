//! On-disk memo of oracle output, keyed by the SHA-256 of the page artifact.
//!
//! One JSON file per artifact hash. The scope (model id) is stored inside the
//! entry and checked on read, so the store holds a single slot per artifact:
//! writing under a new scope replaces the previous scope's payload.
//!
//! Caching is best-effort. Reads that fail for any reason are misses, writes
//! that fail are logged and dropped.

use crate::util::{ensure_dir, is_hash_hex, now_rfc3339};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub artifact_hash: String,
    pub scope: String,
    pub payload: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub count: u64,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct PageCache {
    dir: PathBuf,
    enabled: bool,
}

impl PageCache {
    pub fn open(dir: &Path) -> Self {
        if let Err(err) = ensure_dir(dir) {
            warn!("cache dir unavailable, writes will be dropped: {err:#}");
        }
        Self {
            dir: dir.to_path_buf(),
            enabled: true,
        }
    }

    /// A cache that never hits and never stores.
    pub fn disabled(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            enabled: false,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn entry_path(&self, artifact_hash: &str) -> PathBuf {
        self.dir.join(format!("{artifact_hash}.json"))
    }

    pub fn get(&self, artifact_hash: &str, scope: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }
        if !is_hash_hex(artifact_hash) {
            warn!("cache get with malformed key {artifact_hash:?}");
            return None;
        }

        let path = self.entry_path(artifact_hash);
        let raw = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                warn!("cache read failed {}: {err}", path.display());
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_slice(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                warn!("cache entry unreadable {}: {err}", path.display());
                return None;
            }
        };

        if entry.artifact_hash != artifact_hash {
            warn!("cache entry {} records a different hash", path.display());
            return None;
        }
        if entry.scope != scope {
            debug!(
                "cache scope mismatch for {artifact_hash}: stored={} requested={scope}",
                entry.scope
            );
            return None;
        }
        Some(entry.payload)
    }

    pub fn put(&self, artifact_hash: &str, scope: &str, payload: &str) {
        if !self.enabled {
            return;
        }
        if let Err(err) = self.try_put(artifact_hash, scope, payload) {
            warn!("cache write failed for {artifact_hash}: {err:#}");
        }
    }

    fn try_put(&self, artifact_hash: &str, scope: &str, payload: &str) -> Result<()> {
        if !is_hash_hex(artifact_hash) {
            anyhow::bail!("malformed cache key {artifact_hash:?}");
        }
        ensure_dir(&self.dir)?;

        let entry = CacheEntry {
            artifact_hash: artifact_hash.to_string(),
            scope: scope.to_string(),
            payload: payload.to_string(),
            created_at: now_rfc3339(),
        };
        let bytes = serde_json::to_vec_pretty(&entry)?;

        let path = self.entry_path(artifact_hash);
        // Unique per call: concurrent pages may share an artifact hash.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!("{artifact_hash}."))
            .suffix(".tmp")
            .tempfile_in(&self.dir)
            .with_context(|| format!("create temp entry in {}", self.dir.display()))?;
        tmp.write_all(&bytes)
            .with_context(|| format!("write {}", tmp.path().display()))?;
        tmp.persist(&path)
            .with_context(|| format!("rename into {}", path.display()))?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for item in std::fs::read_dir(&self.dir)
            .with_context(|| format!("read_dir {}", self.dir.display()))?
        {
            let path = item?.path();
            if is_entry_file(&path) || has_extension(&path, "tmp") {
                std::fs::remove_file(&path)
                    .with_context(|| format!("remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();
        let Ok(items) = std::fs::read_dir(&self.dir) else {
            return stats;
        };
        for item in items.flatten() {
            let path = item.path();
            if !is_entry_file(&path) {
                continue;
            }
            if let Ok(meta) = item.metadata() {
                stats.count += 1;
                stats.total_size_bytes += meta.len();
            }
        }
        stats
    }
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(ext)
}

fn is_entry_file(path: &Path) -> bool {
    has_extension(path, "json")
        && path
            .file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(is_hash_hex)
}
