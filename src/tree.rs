//! In-memory model of every input root.
//!
//! Nodes live in an arena owned by [`Forest`]. Each directory owns the ids of
//! its children; parent and winner links are plain ids, so there is no shared
//! ownership anywhere in the model.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::error::DedupError;
use crate::hasher::hash_directory;
use crate::Digest;

/// Handle on a node inside a [`Forest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// What happened to a node during resolution. Only moves away from `Live`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fate {
    Live,
    /// Lost a duplicate contest to the given node.
    Superseded(NodeId),
    /// Directory with no remaining content.
    Pruned,
    /// Removed along with a deleted ancestor.
    Cascaded,
}

/// Filesystem facts captured when a file is discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: SystemTime,
    pub created: Option<SystemTime>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    File(FileMeta),
    Directory(BTreeMap<OsString, NodeId>),
}

#[derive(Debug, Clone)]
pub struct Node {
    name: OsString,
    pathname: PathBuf,
    depth: i64,
    parent: Option<NodeId>,
    kind: NodeKind,
    digest: Option<Digest>,
    fate: Fate,
    ignore: bool,
    kept: bool,
    guarded: bool,
}

impl Node {
    pub fn name(&self) -> &OsStr {
        &self.name
    }

    pub fn pathname(&self) -> &Path {
        &self.pathname
    }

    /// Resolution priority: ancestor count plus the root's weight.
    pub fn depth(&self) -> i64 {
        self.depth
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Files always have a digest; directories only after [`Forest::finalize`].
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn fate(&self) -> Fate {
        self.fate
    }

    pub fn is_deleted(&self) -> bool {
        self.fate != Fate::Live
    }

    /// The node that supersedes this one, if it lost a duplicate contest.
    pub fn winner(&self) -> Option<NodeId> {
        match self.fate {
            Fate::Superseded(winner) => Some(winner),
            _ => None,
        }
    }

    /// Junk name or zero-byte file.
    pub fn is_ignored(&self) -> bool {
        self.ignore
    }

    /// Chosen as a winner, or inside a directory that was.
    pub fn is_kept(&self) -> bool {
        self.kept
    }

    /// The subtree holds kept content or entries the scan skipped.
    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, NodeKind::Directory(_))
    }

    pub fn file_meta(&self) -> Option<&FileMeta> {
        match &self.kind {
            NodeKind::File(meta) => Some(meta),
            NodeKind::Directory(_) => None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.file_meta().map(|meta| meta.size)
    }

    pub fn children(&self) -> Option<&BTreeMap<OsString, NodeId>> {
        match &self.kind {
            NodeKind::Directory(children) => Some(children),
            NodeKind::File(_) => None,
        }
    }
}

/// One input root, keyed by the argument it came from.
#[derive(Debug, Clone)]
pub struct Root {
    pub label: String,
    pub id: NodeId,
}

/// Every input root and all nodes beneath them.
#[derive(Debug, Default)]
pub struct Forest {
    nodes: Vec<Node>,
    roots: Vec<Root>,
}

impl Forest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn roots(&self) -> &[Root] {
        &self.roots
    }

    pub fn root(&self, label: &str) -> Option<NodeId> {
        self.roots.iter().find(|r| r.label == label).map(|r| r.id)
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId)
    }

    /// Look up a node by full pathname.
    pub fn find(&self, pathname: &Path) -> Option<NodeId> {
        self.ids().find(|&id| self.node(id).pathname == pathname)
    }

    pub fn add_directory_root(&mut self, label: &str, weight: i64) -> NodeId {
        let id = self.push(Node {
            name: OsString::from(label),
            pathname: PathBuf::from(label),
            depth: weight,
            parent: None,
            kind: NodeKind::Directory(BTreeMap::new()),
            digest: None,
            fate: Fate::Live,
            ignore: false,
            kept: false,
            guarded: false,
        });
        self.roots.push(Root {
            label: label.to_string(),
            id,
        });
        id
    }

    pub fn add_file_root(
        &mut self,
        label: &str,
        weight: i64,
        meta: FileMeta,
        digest: Digest,
        junk: bool,
    ) -> NodeId {
        let id = self.push(Node {
            name: OsString::from(label),
            pathname: PathBuf::from(label),
            depth: weight,
            parent: None,
            kind: NodeKind::File(meta),
            digest: Some(digest),
            fate: Fate::Live,
            ignore: junk || meta.size == 0,
            kept: false,
            guarded: false,
        });
        self.roots.push(Root {
            label: label.to_string(),
            id,
        });
        id
    }

    /// Find or create the directory at `path` under `root`.
    ///
    /// `path` must start with the root's own pathname; anything else means the
    /// walk handed us an entry from somewhere else.
    pub fn place_directory(&mut self, root: NodeId, path: &Path) -> Result<NodeId, DedupError> {
        let root_path = self.nodes[root.0].pathname.clone();
        let mismatch = || DedupError::PathMismatch {
            root: root_path.clone(),
            path: path.to_path_buf(),
        };

        let rest = path.strip_prefix(&root_path).map_err(|_| mismatch())?;
        if !self.nodes[root.0].is_dir() {
            return Err(mismatch());
        }

        let mut current = root;
        for component in rest.components() {
            let Component::Normal(name) = component else {
                return Err(mismatch());
            };
            current = match self.child(current, name) {
                Some(existing) if self.nodes[existing.0].is_dir() => existing,
                Some(_) => return Err(mismatch()),
                None => self.attach(
                    current,
                    name.to_os_string(),
                    NodeKind::Directory(BTreeMap::new()),
                    None,
                    false,
                ),
            };
        }
        Ok(current)
    }

    /// Add a file under `dir`. Zero-byte files are always ignored.
    pub fn place_file(
        &mut self,
        dir: NodeId,
        name: OsString,
        meta: FileMeta,
        digest: Digest,
        junk: bool,
    ) -> NodeId {
        let ignore = junk || meta.size == 0;
        self.attach(dir, name, NodeKind::File(meta), Some(digest), ignore)
    }

    /// Mark a directory as holding a junk name.
    pub fn set_ignored(&mut self, id: NodeId) {
        self.nodes[id.0].ignore = true;
    }

    pub fn child(&self, dir: NodeId, name: &OsStr) -> Option<NodeId> {
        self.nodes[dir.0]
            .children()
            .and_then(|children| children.get(name).copied())
    }

    /// Mark `id` and its ancestors as holding content that must not be deleted
    /// wholesale.
    pub fn guard(&mut self, id: NodeId) {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.nodes[node.0].guarded {
                break;
            }
            self.nodes[node.0].guarded = true;
            current = self.nodes[node.0].parent;
        }
    }

    /// Record `id` as a winner: it and everything below it are kept.
    pub fn keep(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            self.nodes[node.0].kept = true;
            if let Some(children) = self.nodes[node.0].children() {
                stack.extend(children.values().copied());
            }
        }
        // Ancestors may already be guarded for other reasons; walk the whole chain.
        let mut current = Some(id);
        while let Some(node) = current {
            self.nodes[node.0].guarded = true;
            current = self.nodes[node.0].parent;
        }
    }

    /// Recompute the digest of every live directory at or below `id`.
    pub fn finalize(&mut self, id: NodeId) {
        let children: Vec<NodeId> = match &self.nodes[id.0].kind {
            NodeKind::Directory(children) => children.values().copied().collect(),
            NodeKind::File(_) => return,
        };

        for &child in &children {
            if !self.nodes[child.0].is_deleted() {
                self.finalize(child);
            }
        }

        let digest = hash_directory(
            children
                .iter()
                .map(|&child| &self.nodes[child.0])
                .filter(|node| !node.is_deleted())
                .filter_map(|node| node.digest.as_deref()),
        );
        self.nodes[id.0].digest = Some(digest);
    }

    /// Finalize every live root.
    pub fn finalize_all(&mut self) {
        let roots: Vec<NodeId> = self.roots.iter().map(|r| r.id).collect();
        for root in roots {
            if !self.nodes[root.0].is_deleted() {
                self.finalize(root);
            }
        }
    }

    /// A directory is empty when nothing below it is live, unignored content.
    ///
    /// Guarded directories are never empty. Files are never empty.
    pub fn is_empty_dir(&self, id: NodeId) -> bool {
        let node = &self.nodes[id.0];
        let Some(children) = node.children() else {
            return false;
        };
        if node.guarded {
            return false;
        }

        children.values().all(|&child| {
            let child_node = &self.nodes[child.0];
            child_node.is_deleted() || child_node.ignore || self.is_empty_dir(child)
        })
    }

    /// Deepest depth among live descendants of `id`.
    pub fn max_depth(&self, id: NodeId) -> i64 {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::File(_) => node.depth,
            NodeKind::Directory(children) if children.is_empty() => node.depth,
            NodeKind::Directory(children) => children
                .values()
                .filter(|&&child| !self.nodes[child.0].is_deleted())
                .map(|&child| self.max_depth(child))
                .fold(node.depth.saturating_add(1), i64::max),
        }
    }

    /// Mark `loser` as a duplicate of `winner` and delete its subtree.
    pub fn supersede(&mut self, loser: NodeId, winner: NodeId) {
        debug_assert!(!self.nodes[winner.0].is_deleted(), "winner must be live");
        debug_assert!(!self.nodes[loser.0].kept, "kept nodes never lose");
        self.nodes[loser.0].fate = Fate::Superseded(winner);
        self.cascade(loser);
    }

    /// Mark an empty directory deleted with no winner.
    pub fn prune(&mut self, id: NodeId) {
        self.nodes[id.0].fate = Fate::Pruned;
        self.cascade(id);
    }

    fn cascade(&mut self, id: NodeId) {
        let mut stack: Vec<NodeId> = self.nodes[id.0]
            .children()
            .map(|children| children.values().copied().collect())
            .unwrap_or_default();

        while let Some(node) = stack.pop() {
            if self.nodes[node.0].fate == Fate::Live {
                self.nodes[node.0].fate = Fate::Cascaded;
            }
            if let Some(children) = self.nodes[node.0].children() {
                stack.extend(children.values().copied());
            }
        }
    }

    /// Live nodes in pre-order; a deleted directory hides its whole subtree.
    pub fn live_nodes(&self) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.roots.iter().rev().map(|r| r.id).collect();

        while let Some(id) = stack.pop() {
            let node = &self.nodes[id.0];
            if node.is_deleted() {
                continue;
            }
            out.push(id);
            if let Some(children) = node.children() {
                stack.extend(children.values().rev().copied());
            }
        }
        out
    }

    /// Total bytes of every file at or below `id`.
    pub fn subtree_bytes(&self, id: NodeId) -> u64 {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::File(meta) => meta.size,
            NodeKind::Directory(children) => {
                children.values().map(|&child| self.subtree_bytes(child)).sum()
            }
        }
    }

    fn attach(
        &mut self,
        parent: NodeId,
        name: OsString,
        kind: NodeKind,
        digest: Option<Digest>,
        ignore: bool,
    ) -> NodeId {
        let parent_node = &self.nodes[parent.0];
        let node = Node {
            pathname: parent_node.pathname.join(&name),
            depth: parent_node.depth.saturating_add(1),
            parent: Some(parent),
            name: name.clone(),
            kind,
            digest,
            fate: Fate::Live,
            ignore,
            kept: false,
            guarded: false,
        };
        let id = self.push(node);
        if let NodeKind::Directory(children) = &mut self.nodes[parent.0].kind {
            children.insert(name, id);
        }
        id
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }
}
