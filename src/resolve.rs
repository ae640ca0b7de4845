//! Winner/loser resolution over the forest.
//!
//! Every pass recomputes directory digests, resolves duplicate directories in
//! waves of increasing depth, resolves duplicate files in one sweep, then
//! prunes directories left with no content. Passes repeat until one of them
//! deletes nothing.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::DedupError;
use crate::tree::{Forest, NodeId};
use crate::Digest;

/// Which nodes an index groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    Directories,
    Files,
}

/// Live nodes of one class grouped by digest, singletons dropped.
///
/// Rebuilt from the forest whenever it is needed and never updated in place.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    groups: BTreeMap<Digest, Vec<NodeId>>,
}

impl DuplicateIndex {
    pub fn build(forest: &Forest, class: NodeClass) -> Self {
        let want_dirs = class == NodeClass::Directories;
        let mut groups: BTreeMap<Digest, Vec<NodeId>> = BTreeMap::new();

        for id in forest.live_nodes() {
            let node = forest.node(id);
            if node.is_ignored() || node.is_dir() != want_dirs {
                continue;
            }
            if let Some(digest) = node.digest() {
                groups.entry(digest.to_string()).or_default().push(id);
            }
        }

        groups.retain(|_, ids| ids.len() > 1);
        Self { groups }
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[NodeId])> {
        self.groups
            .iter()
            .map(|(digest, ids)| (digest.as_str(), ids.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Distinct depths of every indexed node, ascending.
    pub fn depths(&self, forest: &Forest) -> Vec<i64> {
        let depths: BTreeSet<i64> = self
            .groups
            .values()
            .flatten()
            .map(|&id| forest.node(id).depth())
            .collect();
        depths.into_iter().collect()
    }
}

/// Outcome of one duplicate contest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub winner: NodeId,
    pub losers: Vec<NodeId>,
}

/// Pick a winner among `candidates`.
///
/// Candidates deeper than `depth_ceiling` cannot win. Guarded candidates
/// (earlier winners and their content) can never lose, so when any are
/// eligible only they compete. Per depth the shorter pathname takes the slot
/// (equal lengths compare lexicographically), and the shallowest slot wins.
/// A directory winner that is currently empty leaves the group unresolved.
/// Every other live candidate that is not guarded loses, including those
/// deeper than the ceiling.
pub fn resolve_candidates(
    forest: &Forest,
    candidates: &[NodeId],
    depth_ceiling: Option<i64>,
) -> Option<Resolution> {
    let eligible: Vec<NodeId> = candidates
        .iter()
        .copied()
        .filter(|&id| {
            let node = forest.node(id);
            !node.is_deleted()
                && !node.is_ignored()
                && depth_ceiling.map_or(true, |ceiling| node.depth() <= ceiling)
        })
        .collect();
    let guarded_only = eligible.iter().any(|&id| forest.node(id).is_guarded());

    let mut by_depth: BTreeMap<i64, NodeId> = BTreeMap::new();
    for id in eligible {
        let node = forest.node(id);
        if guarded_only && !node.is_guarded() {
            continue;
        }
        by_depth
            .entry(node.depth())
            .and_modify(|slot| {
                if shorter_path(forest, id, *slot) {
                    *slot = id;
                }
            })
            .or_insert(id);
    }

    let (_, &winner) = by_depth.iter().next()?;
    if forest.node(winner).is_dir() && forest.is_empty_dir(winner) {
        return None;
    }

    let losers = candidates
        .iter()
        .copied()
        .filter(|&id| id != winner)
        .filter(|&id| {
            let node = forest.node(id);
            !node.is_deleted() && !node.is_guarded()
        })
        .collect();

    Some(Resolution { winner, losers })
}

fn shorter_path(forest: &Forest, a: NodeId, b: NodeId) -> bool {
    let pa = forest.node(a).pathname().as_os_str();
    let pb = forest.node(b).pathname().as_os_str();
    (pa.len(), pa) < (pb.len(), pb)
}

/// Deletions made by one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub pass: usize,
    pub directory_groups: usize,
    pub file_groups: usize,
    pub directory_losers: usize,
    pub file_losers: usize,
    pub pruned: usize,
}

impl PassStats {
    pub fn deletions(&self) -> usize {
        self.directory_losers + self.file_losers + self.pruned
    }
}

/// Summary of a full resolution run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolveReport {
    pub passes: Vec<PassStats>,
}

impl ResolveReport {
    pub fn total_deletions(&self) -> usize {
        self.passes.iter().map(PassStats::deletions).sum()
    }
}

/// Run passes until one deletes nothing.
pub fn resolve(forest: &mut Forest) -> Result<ResolveReport, DedupError> {
    let mut report = ResolveReport::default();

    loop {
        let stats = run_pass(forest, report.passes.len() + 1)?;
        tracing::debug!(
            pass = stats.pass,
            directory_losers = stats.directory_losers,
            file_losers = stats.file_losers,
            pruned = stats.pruned,
            "resolution pass finished"
        );

        let settled = stats.deletions() == 0;
        report.passes.push(stats);
        if settled {
            break;
        }
    }

    Ok(report)
}

/// One resolution pass.
pub fn run_pass(forest: &mut Forest, pass: usize) -> Result<PassStats, DedupError> {
    forest.finalize_all();

    let mut stats = PassStats {
        pass,
        ..PassStats::default()
    };

    let directories = DuplicateIndex::build(forest, NodeClass::Directories);
    stats.directory_groups = directories.len();
    for ceiling in directories.depths(forest) {
        for (_, group) in directories.groups() {
            if let Some(resolution) = resolve_candidates(forest, group, Some(ceiling)) {
                stats.directory_losers += apply(forest, &resolution);
            }
        }
    }

    let files = DuplicateIndex::build(forest, NodeClass::Files);
    stats.file_groups = files.len();
    for (digest, group) in files.groups() {
        if let Some(resolution) = resolve_candidates(forest, group, None) {
            check_sizes(forest, digest, &resolution)?;
            stats.file_losers += apply(forest, &resolution);
        }
    }

    stats.pruned = prune_empty_directories(forest);
    Ok(stats)
}

/// Mark every live directory with no remaining content as deleted.
///
/// Runs top-down, so an empty parent is pruned before its children are looked at.
pub fn prune_empty_directories(forest: &mut Forest) -> usize {
    let mut pruned = 0;
    let mut stack: Vec<NodeId> = forest.roots().iter().rev().map(|root| root.id).collect();

    while let Some(id) = stack.pop() {
        let node = forest.node(id);
        if node.is_deleted() {
            continue;
        }
        let Some(children) = node.children() else {
            continue;
        };
        let children: Vec<NodeId> = children.values().rev().copied().collect();

        if forest.is_empty_dir(id) {
            tracing::trace!(path = %forest.node(id).pathname().display(), "pruning empty directory");
            forest.prune(id);
            pruned += 1;
        } else {
            stack.extend(children);
        }
    }

    pruned
}

fn apply(forest: &mut Forest, resolution: &Resolution) -> usize {
    let losers: Vec<NodeId> = resolution
        .losers
        .iter()
        .copied()
        .filter(|&id| {
            let node = forest.node(id);
            !node.is_deleted() && !node.is_guarded()
        })
        .collect();
    if losers.is_empty() {
        return 0;
    }

    forest.keep(resolution.winner);
    for &loser in &losers {
        forest.supersede(loser, resolution.winner);
    }
    losers.len()
}

/// Equal digests with unequal sizes mean a collision or a bug; never continue.
fn check_sizes(forest: &Forest, digest: &str, resolution: &Resolution) -> Result<(), DedupError> {
    let winner = forest.node(resolution.winner);
    let winner_size = winner.size().unwrap_or(0);

    for &id in &resolution.losers {
        let loser = forest.node(id);
        let loser_size = loser.size().unwrap_or(0);
        if loser_size != winner_size {
            return Err(DedupError::HashCollisionSuspected {
                digest: digest.to_string(),
                winner: winner.pathname().to_path_buf(),
                winner_size,
                loser: loser.pathname().to_path_buf(),
                loser_size,
            });
        }
    }
    Ok(())
}
