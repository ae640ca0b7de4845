use std::collections::BTreeMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::tree::{Fate, Forest, NodeId};
use crate::utils::{format_file_size, shell_quote};

/// One path the script removes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Removal {
    pub path: PathBuf,
    pub directory: bool,
    /// Bytes of file content at or below `path`.
    pub bytes: u64,
}

impl Removal {
    fn from_node(forest: &Forest, id: NodeId) -> Self {
        let node = forest.node(id);
        Self {
            path: node.pathname().to_path_buf(),
            directory: node.is_dir(),
            bytes: forest.subtree_bytes(id),
        }
    }

    /// The shell command that removes this path. Safe to run twice.
    pub fn command(&self) -> String {
        if self.directory {
            format!("rm -rf -- {}", shell_quote(&self.path))
        } else {
            format!("rm -f -- {}", shell_quote(&self.path))
        }
    }
}

/// A kept path and the duplicates of it that go.
#[derive(Debug, Clone, Serialize)]
pub struct KeepGroup {
    pub keep: PathBuf,
    pub directory: bool,
    pub remove: Vec<Removal>,
}

/// Everything the resolver decided to delete, grouped for review.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeletionPlan {
    /// Ordered by the kept path.
    pub groups: Vec<KeepGroup>,
    /// Directories removed only because nothing was left in them.
    pub empty_directories: Vec<Removal>,
}

impl DeletionPlan {
    /// Collect the plan from a resolved forest.
    ///
    /// Nodes deleted along with an ancestor are covered by the ancestor's
    /// recursive removal and are not listed on their own.
    pub fn from_forest(forest: &Forest) -> Self {
        let mut by_winner: BTreeMap<PathBuf, (NodeId, Vec<Removal>)> = BTreeMap::new();
        let mut empty_directories = Vec::new();

        for id in forest.ids() {
            match forest.node(id).fate() {
                Fate::Superseded(winner) => {
                    by_winner
                        .entry(forest.node(winner).pathname().to_path_buf())
                        .or_insert_with(|| (winner, Vec::new()))
                        .1
                        .push(Removal::from_node(forest, id));
                }
                Fate::Pruned => empty_directories.push(Removal::from_node(forest, id)),
                Fate::Live | Fate::Cascaded => {}
            }
        }

        let groups = by_winner
            .into_iter()
            .map(|(keep, (winner, mut remove))| {
                remove.sort_by(|a, b| a.path.cmp(&b.path));
                KeepGroup {
                    keep,
                    directory: forest.node(winner).is_dir(),
                    remove,
                }
            })
            .collect();
        empty_directories.sort_by(|a, b| a.path.cmp(&b.path));

        Self {
            groups,
            empty_directories,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.empty_directories.is_empty()
    }

    pub fn removal_count(&self) -> usize {
        self.groups.iter().map(|g| g.remove.len()).sum::<usize>() + self.empty_directories.len()
    }

    /// Bytes freed by running the script. Removals nested inside a removed
    /// directory count once.
    pub fn reclaimable_bytes(&self) -> u64 {
        let dirs: Vec<&Path> = self
            .removals()
            .filter(|r| r.directory)
            .map(|r| r.path.as_path())
            .collect();
        self.removals()
            .filter(|r| !dirs.iter().any(|d| r.path != *d && r.path.starts_with(d)))
            .map(|r| r.bytes)
            .sum()
    }

    /// Every removal in script order.
    pub fn removals(&self) -> impl Iterator<Item = &Removal> {
        self.groups
            .iter()
            .flat_map(|g| g.remove.iter())
            .chain(self.empty_directories.iter())
    }

    /// Whether `path` is removed by an entry of its own.
    pub fn removes(&self, path: &Path) -> bool {
        self.removals().any(|r| r.path == path)
    }

    /// Write the plan as shell commands. Labels and summaries are `#` comments.
    pub fn write_script<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for group in &self.groups {
            writeln!(out)?;
            writeln!(out, "# keep {}", shell_quote(&group.keep))?;
            for removal in &group.remove {
                writeln!(out, "{}", removal.command())?;
            }
        }

        if !self.empty_directories.is_empty() {
            writeln!(out)?;
            writeln!(out, "# empty directories with no duplicate evidence")?;
            for removal in &self.empty_directories {
                writeln!(out, "{}", removal.command())?;
            }
        }

        writeln!(out)?;
        writeln!(
            out,
            "# {} removals, {} reclaimable",
            self.removal_count(),
            format_file_size(self.reclaimable_bytes())
        )?;
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
