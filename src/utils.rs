use std::collections::HashSet;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use humansize::{format_size, DECIMAL};

use crate::error::DedupError;
use crate::RootSpec;

/// Names that never count as real content: lock files, thumbnail caches, OS metadata.
pub const DEFAULT_JUNK_NAMES: &[&str] = &[
    ".ds_store",
    "thumbs.db",
    "ehthumbs.db",
    "desktop.ini",
    ".directory",
    ".localized",
    ".picasa.ini",
    ".lock",
    "icon\r",
];

/// Format file size in human-readable format
pub fn format_file_size(size: u64) -> String {
    format_size(size, DECIMAL)
}

/// Case-insensitive set of junk file names.
#[derive(Debug, Clone)]
pub struct IgnoreList {
    names: HashSet<String>,
}

impl IgnoreList {
    /// An empty list: nothing is junk.
    pub fn empty() -> Self {
        Self {
            names: HashSet::new(),
        }
    }

    pub fn add(&mut self, name: &str) {
        self.names.insert(name.to_lowercase());
    }

    pub fn is_junk(&self, name: &OsStr) -> bool {
        self.names.contains(&name.to_string_lossy().to_lowercase())
    }
}

impl Default for IgnoreList {
    fn default() -> Self {
        let mut list = Self::empty();
        for name in DEFAULT_JUNK_NAMES {
            list.add(name);
        }
        list
    }
}

/// Parse a positional root argument: `PATH` or `WEIGHT:PATH`.
///
/// The prefix before the first colon is a weight only if it parses as a signed
/// integer, so `C:\data` stays a plain path.
pub fn parse_root_spec(arg: &str) -> Result<RootSpec, DedupError> {
    if let Some((prefix, rest)) = arg.split_once(':') {
        if let Ok(weight) = prefix.parse::<i64>() {
            if rest.is_empty() {
                return Err(DedupError::InvalidRootSpec {
                    arg: arg.to_string(),
                });
            }
            return Ok(RootSpec {
                label: rest.to_string(),
                weight,
            });
        }
    }

    if arg.is_empty() {
        return Err(DedupError::InvalidRootSpec {
            arg: arg.to_string(),
        });
    }

    Ok(RootSpec {
        label: arg.to_string(),
        weight: 0,
    })
}

/// Absolute form of `path` without resolving symlinks.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read the current directory")?;
    Ok(cwd.join(path))
}

/// Absolute form of `path` with `.` dropped and `..` folded into its parent.
///
/// Purely lexical: nothing is looked up on disk.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in absolute_path(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Quote a path for a POSIX shell.
pub fn shell_quote(path: &Path) -> String {
    let raw = path.to_string_lossy();
    format!("'{}'", raw.replace('\'', r"'\''"))
}

/// Byte key under which a pathname is stored in the cache.
#[cfg(unix)]
pub fn path_key(path: &Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
pub fn path_key(path: &Path) -> Vec<u8> {
    path.to_string_lossy().as_bytes().to_vec()
}

/// Inverse of [`path_key`].
#[cfg(unix)]
pub fn key_path(key: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(key))
}

#[cfg(not(unix))]
pub fn key_path(key: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(key).into_owned())
}
