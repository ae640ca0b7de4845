pub mod cache;
pub mod error;
pub mod hasher;
pub mod logging;
pub mod resolve;
pub mod scanner;
pub mod script;
pub mod tree;
pub mod utils;

use std::path::PathBuf;

use serde::Serialize;

pub use cache::HashCache;
pub use error::DedupError;
pub use resolve::{resolve, ResolveReport};
pub use scanner::{Scan, Scanner};
pub use script::DeletionPlan;
pub use tree::{Fate, Forest, NodeId};

/// Hex-encoded BLAKE3 digest of a file's bytes or a directory's children.
pub type Digest = String;

/// One positional input: a path plus the weight added to every depth beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSpec {
    /// The path exactly as given on the command line.
    pub label: String,
    pub weight: i64,
}

impl RootSpec {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            weight: 0,
        }
    }

    pub fn weighted(label: impl Into<String>, weight: i64) -> Self {
        Self {
            label: label.into(),
            weight,
        }
    }
}

/// Kind of entry the scan stepped over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    Socket,
    Symlink,
    /// FIFOs and device nodes.
    Special,
    Unreadable,
}

/// Non-fatal problem met while scanning. The run carries on without the entry.
#[derive(Debug, Clone, Serialize)]
pub struct ScanWarning {
    pub path: PathBuf,
    pub kind: WarningKind,
    pub message: String,
}

impl ScanWarning {
    pub fn skipped(path: impl Into<PathBuf>, kind: WarningKind) -> Self {
        let path = path.into();
        let what = match kind {
            WarningKind::Socket => "socket",
            WarningKind::Symlink => "symlink",
            WarningKind::Special => "special file",
            WarningKind::Unreadable => "unreadable entry",
        };
        Self {
            message: format!("skipping {}: {}", what, path.display()),
            path,
            kind,
        }
    }

    pub fn unreadable(path: impl Into<PathBuf>, error: impl std::fmt::Display) -> Self {
        let path = path.into();
        Self {
            message: format!("skipping unreadable {}: {}", path.display(), error),
            path,
            kind: WarningKind::Unreadable,
        }
    }
}
