//! Persistent digest cache.
//!
//! Maps absolute pathnames to the hex digest computed for them, backed by a
//! sled store. Each run carries one staleness timestamp: the store's own
//! last-modified time when it already existed, otherwise the moment it was
//! created. A cached digest is trusted only for files not modified after it.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::DedupError;
use crate::utils::{key_path, path_key};
use crate::Digest;

/// Handle on an open hash cache.
pub struct HashCache {
    db: sled::Db,
    path: PathBuf,
    timestamp: SystemTime,
}

impl HashCache {
    /// Open (or create) the cache store at `path`.
    pub fn open(path: &Path) -> Result<Self, DedupError> {
        // Read before opening: sled touches its files on open.
        let timestamp = store_modified(path).unwrap_or_else(SystemTime::now);

        let db = store_config(path)
            .open()
            .map_err(|source| DedupError::CacheUnavailable {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(
            path = %path.display(),
            entries = db.len(),
            "opened hash cache"
        );

        Ok(Self {
            db,
            path: path.to_path_buf(),
            timestamp,
        })
    }

    /// The staleness timestamp for this run.
    pub fn timestamp(&self) -> SystemTime {
        self.timestamp
    }

    /// Whether a file modified at `modified` must be re-hashed.
    pub fn is_stale(&self, modified: SystemTime) -> bool {
        modified > self.timestamp
    }

    pub fn get(&self, pathname: &Path) -> Result<Option<Digest>, DedupError> {
        let value = self.db.get(path_key(pathname))?;
        Ok(value.and_then(|v| std::str::from_utf8(&v).ok().map(str::to_owned)))
    }

    /// Store `digest` for `pathname`, replacing any earlier value.
    pub fn put(&self, pathname: &Path, digest: &str) -> Result<(), DedupError> {
        self.db.insert(path_key(pathname), digest.as_bytes())?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    /// Flush and release the store.
    pub fn close(self) -> Result<(), DedupError> {
        let bytes = self.db.flush()?;
        tracing::debug!(path = %self.path.display(), bytes, "closed hash cache");
        Ok(())
    }
}

/// Remove every entry whose pathname no longer exists. Returns the number removed.
///
/// Keys come back from the store in sorted order, so the existence checks
/// walk the filesystem one directory at a time.
pub fn clean(path: &Path) -> Result<usize, DedupError> {
    let cache = HashCache::open(path)?;

    let mut dead = Vec::new();
    for entry in cache.db.iter() {
        let (key, _) = entry?;
        let pathname = key_path(&key);
        if fs::symlink_metadata(&pathname).is_err() {
            tracing::debug!(path = %pathname.display(), "dropping dead cache entry");
            dead.push(key);
        }
    }

    for key in &dead {
        cache.db.remove(key)?;
    }

    cache.close()?;
    Ok(dead.len())
}

/// Store settings. sled's background flusher stays on, so digests written
/// during a long scan reach disk without waiting for [`HashCache::close`].
fn store_config(path: &Path) -> sled::Config {
    sled::Config::new().path(path)
}

fn store_modified(path: &Path) -> Option<SystemTime> {
    // sled keeps its pages in `<path>/db`; fall back to the directory itself.
    fs::metadata(path.join("db"))
        .or_else(|_| fs::metadata(path))
        .and_then(|m| m.modified())
        .ok()
}
