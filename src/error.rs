use std::path::PathBuf;

use thiserror::Error;

/// Conditions that stop a dedup run.
///
/// Expected traversal problems (sockets, unreadable entries, cache misses) are
/// reported as [`crate::ScanWarning`]s instead and never surface here.
#[derive(Debug, Error)]
pub enum DedupError {
    /// The hash cache store could not be created or opened read-write.
    #[error("Hash cache unavailable at {path}: {source}")]
    CacheUnavailable {
        path: PathBuf,
        #[source]
        source: sled::Error,
    },

    /// A cache read or write failed after the store was opened.
    #[error("Hash cache error: {0}")]
    Cache(#[from] sled::Error),

    /// A walked path did not start with the lineage of the root it was placed under.
    #[error("Path {path} does not belong under root {root}")]
    PathMismatch { root: PathBuf, path: PathBuf },

    /// Two files share a digest but not a size.
    #[error("Hash collision suspected: {winner} ({winner_size} bytes) and {loser} ({loser_size} bytes) share digest {digest}")]
    HashCollisionSuspected {
        digest: String,
        winner: PathBuf,
        winner_size: u64,
        loser: PathBuf,
        loser_size: u64,
    },

    /// An input root is neither a regular file, a directory, nor a socket.
    #[error("Don't know what this is: {path}")]
    UnrecognizedEntry { path: PathBuf },

    /// Two input roots are the same place, or one lies inside the other.
    #[error("Root {path} overlaps root {earlier}")]
    OverlappingRoots { path: PathBuf, earlier: PathBuf },

    /// A `WEIGHT:PATH` argument with nothing after the colon.
    #[error("Invalid root argument: {arg}")]
    InvalidRootSpec { arg: String },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DedupError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
