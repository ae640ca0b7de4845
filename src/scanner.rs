use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::cache::HashCache;
use crate::error::DedupError;
use crate::hasher::hash_file;
use crate::tree::{FileMeta, Forest, NodeId};
use crate::utils::{normalize_path, IgnoreList};
use crate::{RootSpec, ScanWarning, WarningKind};

/// Configuration for building the forest
#[derive(Debug, Clone, Default)]
pub struct ScanConfig {
    /// Offset each root past the depth consumed by the roots before it.
    pub stagger: bool,
    pub ignore: IgnoreList,
    /// Location of the persistent hash cache, if enabled.
    pub cache: Option<PathBuf>,
    pub verbose: bool,
}

/// Everything the scan produced.
#[derive(Debug)]
pub struct Scan {
    pub forest: Forest,
    pub warnings: Vec<ScanWarning>,
    pub files: usize,
    pub directories: usize,
}

/// A file found by the walk, waiting for its digest.
struct FileJob {
    dir: NodeId,
    name: OsString,
    path: PathBuf,
    meta: FileMeta,
    junk: bool,
}

/// Walks input roots and builds the [`Forest`]
pub struct Scanner {
    config: ScanConfig,
}

impl Scanner {
    pub fn new() -> Self {
        Self {
            config: ScanConfig::default(),
        }
    }

    pub fn with_config(config: ScanConfig) -> Self {
        Self { config }
    }

    pub fn set_stagger(&mut self, stagger: bool) {
        self.config.stagger = stagger;
    }

    pub fn set_ignore_list(&mut self, ignore: IgnoreList) {
        self.config.ignore = ignore;
    }

    pub fn set_cache_path(&mut self, path: PathBuf) {
        self.config.cache = Some(path);
    }

    /// Scan every root, hashing files on the way.
    ///
    /// The hash cache, when configured, is opened here and closed before
    /// returning. Roots that repeat or nest inside one another are rejected
    /// before anything is read.
    pub fn scan(&self, roots: &[RootSpec]) -> Result<Scan> {
        check_overlap(roots)?;

        let cache = self
            .config
            .cache
            .as_deref()
            .map(HashCache::open)
            .transpose()?;

        let mut forest = Forest::new();
        let mut warnings = Vec::new();
        let mut files = 0;
        let mut offset = 0i64;

        for spec in roots {
            let weight = spec.weight.saturating_add(offset);
            tracing::info!(root = %spec.label, weight, "scanning root");

            let Some(id) = self.scan_root(&mut forest, spec, weight, cache.as_ref(), &mut warnings, &mut files)?
            else {
                continue;
            };

            if self.config.stagger {
                offset = offset.max(forest.max_depth(id).saturating_add(1));
            }
        }

        if let Some(cache) = cache {
            cache.close()?;
        }

        let directories = forest.len() - files;
        Ok(Scan {
            forest,
            warnings,
            files,
            directories,
        })
    }

    fn scan_root(
        &self,
        forest: &mut Forest,
        spec: &RootSpec,
        weight: i64,
        cache: Option<&HashCache>,
        warnings: &mut Vec<ScanWarning>,
        files: &mut usize,
    ) -> Result<Option<NodeId>> {
        let path = Path::new(&spec.label);
        let metadata = fs::metadata(path).map_err(|_| DedupError::UnrecognizedEntry {
            path: path.to_path_buf(),
        })?;
        let file_type = metadata.file_type();

        if file_type.is_file() {
            let meta = file_meta(&metadata);
            let digest = hash_file(path, meta.size, meta.modified, cache)?;
            let junk = path
                .file_name()
                .is_some_and(|name| self.config.ignore.is_junk(name));
            *files += 1;
            return Ok(Some(forest.add_file_root(&spec.label, weight, meta, digest, junk)));
        }

        if file_type.is_dir() {
            let root = forest.add_directory_root(&spec.label, weight);
            *files += self.walk_directory(forest, root, path, cache, warnings)?;
            return Ok(Some(root));
        }

        if is_socket(&file_type) {
            warnings.push(ScanWarning::skipped(path, WarningKind::Socket));
            return Ok(None);
        }

        Err(DedupError::UnrecognizedEntry {
            path: path.to_path_buf(),
        }
        .into())
    }

    /// Place every directory under `root`, then hash the files found in parallel.
    fn walk_directory(
        &self,
        forest: &mut Forest,
        root: NodeId,
        path: &Path,
        cache: Option<&HashCache>,
        warnings: &mut Vec<ScanWarning>,
    ) -> Result<usize> {
        let mut jobs = Vec::new();

        for entry in WalkDir::new(path).follow_links(false).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    self.note_walk_error(forest, root, err, warnings)?;
                    continue;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_dir() {
                let dir = forest.place_directory(root, entry.path())?;
                if dir != root && self.config.ignore.is_junk(entry.file_name()) {
                    forest.set_ignored(dir);
                }
                continue;
            }

            let parent = entry
                .path()
                .parent()
                .with_context(|| format!("No parent directory for {}", entry.path().display()))?;
            let dir = forest.place_directory(root, parent)?;

            if !file_type.is_file() {
                let kind = if file_type.is_symlink() {
                    WarningKind::Symlink
                } else if is_socket(&file_type) {
                    WarningKind::Socket
                } else {
                    WarningKind::Special
                };
                warnings.push(ScanWarning::skipped(entry.path(), kind));
                forest.guard(dir);
                continue;
            }

            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warnings.push(ScanWarning::unreadable(entry.path(), err));
                    forest.guard(dir);
                    continue;
                }
            };

            jobs.push(FileJob {
                dir,
                junk: self.config.ignore.is_junk(entry.file_name()),
                name: entry.file_name().to_os_string(),
                meta: file_meta(&metadata),
                path: entry.into_path(),
            });
        }

        if self.config.verbose {
            tracing::info!(root = %path.display(), files = jobs.len(), "hashing files");
        }

        let progress = ProgressBar::new(jobs.len() as u64);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
                .progress_chars("##-"),
        );

        let digests: Vec<Result<String>> = jobs
            .par_iter()
            .map(|job| {
                let result = hash_file(&job.path, job.meta.size, job.meta.modified, cache);
                progress.inc(1);
                result
            })
            .collect();

        progress.finish_and_clear();

        let mut placed = 0;
        for (job, digest) in jobs.into_iter().zip(digests) {
            match digest {
                Ok(digest) => {
                    forest.place_file(job.dir, job.name, job.meta, digest, job.junk);
                    placed += 1;
                }
                Err(err) if is_cache_failure(&err) => return Err(err),
                Err(err) => {
                    warnings.push(ScanWarning::unreadable(&job.path, format!("{:#}", err)));
                    forest.guard(job.dir);
                }
            }
        }

        Ok(placed)
    }

    /// Record an entry the walk could not read and protect its directory.
    fn note_walk_error(
        &self,
        forest: &mut Forest,
        root: NodeId,
        err: walkdir::Error,
        warnings: &mut Vec<ScanWarning>,
    ) -> Result<()> {
        let root_path = forest.node(root).pathname().to_path_buf();
        let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root_path.clone());

        let target = match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) if path != root_path => {
                let dir = forest.place_directory(root, parent)?;
                forest.child(dir, name).unwrap_or(dir)
            }
            _ => root,
        };

        forest.guard(target);
        warnings.push(ScanWarning::unreadable(path, err));
        Ok(())
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Fail when one root is another root, or sits inside it.
///
/// Either case puts one physical tree into the forest twice.
fn check_overlap(roots: &[RootSpec]) -> Result<()> {
    let mut seen: Vec<PathBuf> = Vec::with_capacity(roots.len());

    for spec in roots {
        let path = Path::new(&spec.label);
        let resolved = match fs::canonicalize(path) {
            Ok(resolved) => resolved,
            Err(_) => normalize_path(path)?,
        };

        if let Some(earlier) = seen
            .iter()
            .find(|earlier| resolved.starts_with(earlier) || earlier.starts_with(&resolved))
        {
            return Err(DedupError::OverlappingRoots {
                path: resolved,
                earlier: earlier.clone(),
            }
            .into());
        }
        seen.push(resolved);
    }

    Ok(())
}

fn file_meta(metadata: &fs::Metadata) -> FileMeta {
    FileMeta {
        size: metadata.len(),
        modified: metadata.modified().unwrap_or(std::time::UNIX_EPOCH),
        created: metadata.created().ok(),
    }
}

/// Cache failures abort the run; anything else about a single file is skippable.
fn is_cache_failure(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<DedupError>(),
        Some(DedupError::Cache(_) | DedupError::CacheUnavailable { .. })
    )
}

#[cfg(unix)]
fn is_socket(file_type: &fs::FileType) -> bool {
    use std::os::unix::fs::FileTypeExt;
    file_type.is_socket()
}

#[cfg(not(unix))]
fn is_socket(_file_type: &fs::FileType) -> bool {
    false
}
