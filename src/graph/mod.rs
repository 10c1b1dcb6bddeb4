//! Dependency graphs and the transformers that resolve version conflicts.
//!
//! Nodes live in an arena and are addressed by [`NodeId`]. A node reachable
//! through several parents is the same node, so per-occurrence bookkeeping
//! (depths, positions) is keyed by id rather than by value.

mod conflict_id;
mod nearest;

use std::collections::{HashMap, HashSet};
use std::fmt;

use thiserror::Error;

use crate::artifact::Artifact;
use crate::version::{Version, VersionConstraint, VersionError};

pub use conflict_id::{ConflictId, ConflictIdSorter, ConflictMarker};
pub use nearest::NearestVersionResolver;

/// Stable identity of a node inside a [`DependencyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One occurrence point of a component in the graph.
#[derive(Debug, Clone)]
pub struct DependencyNode {
    /// `None` for a synthetic root that only aggregates dependencies.
    pub artifact: Option<Artifact>,
    /// The requirement that pulled this node in.
    pub constraint: VersionConstraint,
    /// The version this node stands for.
    pub version: Option<Version>,
    children: Vec<NodeId>,
}

impl DependencyNode {
    /// A node for `artifact`, whose version is parsed from the artifact.
    pub fn new(artifact: Artifact, constraint: VersionConstraint) -> Result<Self, VersionError> {
        let version = Version::parse(&artifact.version)?;
        Ok(Self {
            artifact: Some(artifact),
            constraint,
            version: Some(version),
            children: Vec::new(),
        })
    }

    /// A node without an artifact.
    pub fn root() -> Self {
        Self {
            artifact: None,
            constraint: VersionConstraint::default(),
            version: None,
            children: Vec::new(),
        }
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

impl fmt::Display for DependencyNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.artifact {
            Some(artifact) => write!(f, "{}", artifact),
            None => write!(f, "(root)"),
        }
    }
}

/// Arena of dependency nodes with ordered child edges.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: Vec<DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: DependencyNode) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }

    /// Append `child` to the children of `parent`.
    ///
    /// The same child may be attached to several parents.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.0].children.push(child);
    }

    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut DependencyNode {
        &mut self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0].children
    }

    /// Detach and return the children of `id`, leaving it childless.
    pub(crate) fn take_children(&mut self, id: NodeId) -> Vec<NodeId> {
        std::mem::take(&mut self.nodes[id.0].children)
    }

    pub(crate) fn set_children(&mut self, id: NodeId, children: Vec<NodeId>) {
        self.nodes[id.0].children = children;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes reachable from `root` in depth-first pre-order, each once.
    pub fn reachable(&self, root: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            order.push(id);
            stack.extend(self.children(id).iter().rev().copied());
        }
        order
    }
}

/// State shared between transformers of one resolution run.
///
/// Each field is computed at most once and reused by later transformers.
#[derive(Debug, Clone, Default)]
pub struct TransformContext {
    /// Conflict id of every node that has an artifact.
    pub conflict_ids: Option<HashMap<NodeId, ConflictId>>,
    /// Conflict ids in the order they must be resolved.
    pub sorted_conflict_ids: Option<Vec<ConflictId>>,
    /// Groups of conflict ids that depend on each other cyclically.
    pub cyclic_conflict_ids: Option<Vec<Vec<ConflictId>>>,
}

impl TransformContext {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Could not resolve version conflict among {}", format_constraints(.key, .constraints))]
    UnsolvableVersionConflict {
        key: ConflictId,
        constraints: Vec<String>,
    },

    #[error("Conflict ids have not been computed for this graph")]
    MissingConflictIds,
}

fn format_constraints(key: &ConflictId, constraints: &[String]) -> String {
    if constraints.is_empty() {
        key.to_string()
    } else {
        format!("{} {}", key, constraints.join(", "))
    }
}

/// A step that rewrites a dependency graph in place.
pub trait GraphTransformer {
    /// Transform the graph below `root` and return the (possibly new) root.
    fn transform(
        &self,
        graph: &mut DependencyGraph,
        root: NodeId,
        context: &mut TransformContext,
    ) -> Result<NodeId, ResolveError>;
}
