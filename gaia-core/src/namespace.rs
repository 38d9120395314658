use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::walker::MethodNamePair;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("invalid namespace path: '{0}'")]
    InvalidPath(String),

    #[error("namespace path '{path}' collides with an existing entry at '{at}'")]
    Conflict { path: String, at: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeId(usize);

#[derive(Debug, Clone)]
enum Node<L> {
    Branch(BTreeMap<String, NodeId>),
    Leaf(L),
}

/// Nested namespace keyed by dotted path segments.
///
/// Nodes live in an arena; branches map a segment to a child node. An insert never
/// replaces an existing node, so sibling branches survive any later insert.
#[derive(Debug, Clone)]
pub struct NamespaceTree<L> {
    nodes: Vec<Node<L>>,
}

impl<L> Default for NamespaceTree<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// A read-only view of one branch of a [`NamespaceTree`].
#[derive(Debug)]
pub enum Entry<'a, L> {
    Branch(Namespace<'a, L>),
    Leaf(&'a L),
}

#[derive(Debug)]
pub struct Namespace<'a, L> {
    tree: &'a NamespaceTree<L>,
    id: NodeId,
}

impl<L> Clone for Namespace<'_, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for Namespace<'_, L> {}

fn split_path(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(Error::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

impl<L> NamespaceTree<L> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::Branch(BTreeMap::new())],
        }
    }

    const ROOT: NodeId = NodeId(0);

    /// Place `leaf` at `path`, creating intermediate branches on demand.
    pub fn insert(&mut self, path: &str, leaf: L) -> Result<()> {
        let segments = split_path(path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Err(Error::InvalidPath(path.to_string()));
        };

        let mut current = Self::ROOT;
        for (depth, segment) in parents.iter().enumerate() {
            current = self.child_branch(current, segment).map_err(|()| Error::Conflict {
                path: path.to_string(),
                at: segments[..=depth].join("."),
            })?;
        }

        let leaf_id = NodeId(self.nodes.len());
        let Node::Branch(children) = &mut self.nodes[current.0] else {
            return Err(Error::Conflict {
                path: path.to_string(),
                at: parents.join("."),
            });
        };
        if children.contains_key(*last) {
            return Err(Error::Conflict {
                path: path.to_string(),
                at: path.to_string(),
            });
        }
        children.insert((*last).to_string(), leaf_id);
        self.nodes.push(Node::Leaf(leaf));

        Ok(())
    }

    fn child_branch(&mut self, parent: NodeId, segment: &str) -> std::result::Result<NodeId, ()> {
        let next_id = NodeId(self.nodes.len());
        let Node::Branch(children) = &mut self.nodes[parent.0] else {
            return Err(());
        };

        if let Some(existing) = children.get(segment).copied() {
            return match self.nodes[existing.0] {
                Node::Branch(_) => Ok(existing),
                Node::Leaf(_) => Err(()),
            };
        }

        children.insert(segment.to_string(), next_id);
        self.nodes.push(Node::Branch(BTreeMap::new()));
        Ok(next_id)
    }

    #[must_use]
    pub fn root(&self) -> Namespace<'_, L> {
        Namespace {
            tree: self,
            id: Self::ROOT,
        }
    }

    /// Resolve a dotted path to a branch or leaf.
    #[must_use]
    pub fn lookup(&self, path: &str) -> Option<Entry<'_, L>> {
        let segments = split_path(path).ok()?;
        let mut entry = Entry::Branch(self.root());
        for segment in segments {
            let Entry::Branch(ns) = entry else {
                return None;
            };
            entry = ns.child(segment)?;
        }
        Some(entry)
    }

    /// The leaf at `path`, if `path` names a leaf.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&L> {
        match self.lookup(path)? {
            Entry::Leaf(leaf) => Some(leaf),
            Entry::Branch(_) => None,
        }
    }

    /// All leaves with their dotted paths, depth-first in segment order.
    #[must_use]
    pub fn leaves(&self) -> Vec<(String, &L)> {
        let mut out = Vec::new();
        self.collect_leaves(Self::ROOT, &mut Vec::new(), &mut out);
        out
    }

    fn collect_leaves<'a>(
        &'a self,
        id: NodeId,
        path: &mut Vec<&'a str>,
        out: &mut Vec<(String, &'a L)>,
    ) {
        match &self.nodes[id.0] {
            Node::Leaf(leaf) => out.push((path.join("."), leaf)),
            Node::Branch(children) => {
                for (segment, child) in children {
                    path.push(segment);
                    self.collect_leaves(*child, path, out);
                    path.pop();
                }
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(&self.nodes[Self::ROOT.0], Node::Branch(children) if children.is_empty())
    }
}

impl<'a, L> Namespace<'a, L> {
    #[must_use]
    pub fn child(&self, segment: &str) -> Option<Entry<'a, L>> {
        let Node::Branch(children) = &self.tree.nodes[self.id.0] else {
            return None;
        };
        let id = *children.get(segment)?;
        Some(match &self.tree.nodes[id.0] {
            Node::Branch(_) => Entry::Branch(Namespace {
                tree: self.tree,
                id,
            }),
            Node::Leaf(leaf) => Entry::Leaf(leaf),
        })
    }

    /// Segment names directly below this branch, in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<&'a str> {
        match &self.tree.nodes[self.id.0] {
            Node::Branch(children) => children.keys().map(String::as_str).collect(),
            Node::Leaf(_) => Vec::new(),
        }
    }
}

/// A per-service method table with explicit two-key lookup.
///
/// Aliased methods are stored once; both the transport-safe name and the proto name point
/// at the same `Arc`.
#[derive(Debug)]
pub struct MethodSet<T> {
    entries: Vec<(MethodNamePair, Arc<T>)>,
    index: HashMap<String, usize>,
}

impl<T> Default for MethodSet<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T> MethodSet<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` under `pair.name` only.
    pub fn insert(&mut self, pair: MethodNamePair, value: T) {
        let i = self.entries.len();
        self.index.insert(pair.name.clone(), i);
        self.entries.push((pair, Arc::new(value)));
    }

    /// Register `value` under `pair.name`, and also under `pair.original_name` when they
    /// differ.
    pub fn insert_aliased(&mut self, pair: MethodNamePair, value: T) {
        let i = self.entries.len();
        self.index.insert(pair.name.clone(), i);
        if pair.is_aliased() {
            self.index.insert(pair.original_name.clone(), i);
        }
        self.entries.push((pair, Arc::new(value)));
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arc<T>> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Methods in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&MethodNamePair, &Arc<T>)> {
        self.entries.iter().map(|(pair, value)| (pair, value))
    }

    /// Every registered lookup key, aliases included.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.index.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
