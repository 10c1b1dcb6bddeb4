//! Nearest-wins version conflict resolution.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};

use super::{
    ConflictId, ConflictIdSorter, DependencyGraph, GraphTransformer, NodeId, ResolveError,
    TransformContext,
};
use crate::version::{Version, VersionConstraint};

/// Resolves each conflict group to the occurrence closest to the root.
///
/// Among occurrences at the same depth under the same parent the higher
/// version wins; otherwise the first occurrence in traversal order keeps
/// the win. Hard constraints collected from every occurrence of a group
/// must all accept the winner, or the whole transform fails.
///
/// Losing occurrences are removed from their parents, so each conflict
/// group keeps a single edge.
#[derive(Debug, Clone, Copy, Default)]
pub struct NearestVersionResolver;

impl GraphTransformer for NearestVersionResolver {
    fn transform(
        &self,
        graph: &mut DependencyGraph,
        root: NodeId,
        context: &mut TransformContext,
    ) -> Result<NodeId, ResolveError> {
        if context.sorted_conflict_ids.is_none() {
            ConflictIdSorter.transform(graph, root, context)?;
        }
        let conflict_ids = context
            .conflict_ids
            .as_ref()
            .ok_or(ResolveError::MissingConflictIds)?;
        let sorted = context
            .sorted_conflict_ids
            .as_ref()
            .ok_or(ResolveError::MissingConflictIds)?;

        for key in sorted {
            let mut group = ConflictGroup::new(key);
            group.select(graph, root, conflict_ids)?;
            group.prune(graph, conflict_ids);
        }

        Ok(root)
    }
}

/// Where an occurrence sits: which parent it hangs off and how deep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Position {
    parent: Option<NodeId>,
    depth: usize,
}

impl Position {
    /// Nearest-wins ordering between two candidates.
    fn is_nearer(&self, version: &Version, other: &Position, other_version: &Version) -> bool {
        if self.depth < other.depth {
            return true;
        }
        self.depth == other.depth && self.parent == other.parent && version > other_version
    }
}

struct Winner {
    node: NodeId,
    position: Position,
    version: Version,
}

struct ConflictGroup<'a> {
    key: &'a ConflictId,
    constraints: Vec<VersionConstraint>,
    positions: Vec<Position>,
    candidates: Vec<(NodeId, Position, Version)>,
    winner: Option<Winner>,
}

impl<'a> ConflictGroup<'a> {
    fn new(key: &'a ConflictId) -> Self {
        Self {
            key,
            constraints: Vec::new(),
            positions: Vec::new(),
            candidates: Vec::new(),
            winner: None,
        }
    }

    fn is_acceptable(&self, version: &Version) -> bool {
        self.constraints.iter().all(|c| c.contains_version(version))
    }

    /// Walk the graph depth-first and pick the winner for this group.
    fn select(
        &mut self,
        graph: &DependencyGraph,
        root: NodeId,
        conflict_ids: &HashMap<NodeId, ConflictId>,
    ) -> Result<(), ResolveError> {
        let mut depths: HashMap<NodeId, usize> = HashMap::new();
        let mut stack: Vec<(NodeId, Option<NodeId>, usize)> = vec![(root, None, 0)];

        while let Some((id, parent, depth)) = stack.pop() {
            match depths.get(&id) {
                Some(&seen) if seen <= depth => continue,
                _ => {
                    depths.insert(id, depth);
                }
            }

            if conflict_ids.get(&id) == Some(self.key) && !self.visit(graph, id, parent, depth)? {
                continue;
            }

            stack.extend(
                graph
                    .children(id)
                    .iter()
                    .rev()
                    .map(|&child| (child, Some(id), depth + 1)),
            );
        }

        match &self.winner {
            Some(winner) => {
                debug!(
                    "Selected {} from {} for {}",
                    self.key,
                    graph.node(winner.node),
                    winner.version
                );
                Ok(())
            }
            None if self.positions.is_empty() => Ok(()),
            None => Err(self.unsolvable()),
        }
    }

    /// Account for one occurrence of this group. Returns whether the
    /// traversal should descend into its children.
    fn visit(
        &mut self,
        graph: &DependencyGraph,
        id: NodeId,
        parent: Option<NodeId>,
        depth: usize,
    ) -> Result<bool, ResolveError> {
        let node = graph.node(id);
        let position = Position { parent, depth };
        if parent.is_some() && !self.positions.contains(&position) {
            self.positions.push(position);
        }

        let hard = node.constraint.is_hard();
        if hard && !self.constraints.contains(&node.constraint) {
            self.constraints.push(node.constraint.clone());
        }

        let Some(version) = node.version.clone() else {
            return Ok(true);
        };

        if !self.is_acceptable(&version) {
            if hard {
                return Err(self.unsolvable());
            }
            return Ok(false);
        }

        match self.candidates.iter_mut().find(|(node, ..)| *node == id) {
            Some(candidate) => candidate.1 = position,
            None => self.candidates.push((id, position, version.clone())),
        }

        let nearer = match &self.winner {
            None => true,
            Some(winner) => position.is_nearer(&version, &winner.position, &winner.version),
        };
        if nearer {
            self.winner = Some(Winner {
                node: id,
                position,
                version,
            });
        }

        if self
            .winner
            .as_ref()
            .is_some_and(|winner| !self.is_acceptable(&winner.version))
        {
            self.reselect()?;
        }

        Ok(true)
    }

    /// Drop candidates the constraints no longer accept and recompute the
    /// winner from the rest.
    fn reselect(&mut self) -> Result<(), ResolveError> {
        let constraints = &self.constraints;
        self.candidates
            .retain(|(_, _, version)| constraints.iter().all(|c| c.contains_version(version)));

        self.winner = None;
        for (node, position, version) in &self.candidates {
            let nearer = match &self.winner {
                None => true,
                Some(winner) => position.is_nearer(version, &winner.position, &winner.version),
            };
            if nearer {
                self.winner = Some(Winner {
                    node: *node,
                    position: *position,
                    version: version.clone(),
                });
            }
        }

        if self.winner.is_none() {
            return Err(self.unsolvable());
        }
        Ok(())
    }

    /// Remove every losing occurrence from the parents it was seen under.
    fn prune(&self, graph: &mut DependencyGraph, conflict_ids: &HashMap<NodeId, ConflictId>) {
        let Some(winner) = &self.winner else {
            return;
        };

        let mut kept = false;
        for position in &self.positions {
            let Some(parent) = position.parent else {
                continue;
            };
            let children = graph.take_children(parent);
            let children = children
                .into_iter()
                .filter(|&child| {
                    if conflict_ids.get(&child) != Some(self.key) {
                        return true;
                    }
                    let matches = !kept
                        && winner.position.depth == position.depth
                        && graph.node(child).version.as_ref() == Some(&winner.version);
                    if matches {
                        kept = true;
                    }
                    matches
                })
                .collect();
            graph.set_children(parent, children);
        }
    }

    fn unsolvable(&self) -> ResolveError {
        let mut seen = HashSet::new();
        let constraints: Vec<String> = self
            .constraints
            .iter()
            .map(ToString::to_string)
            .filter(|c| seen.insert(c.clone()))
            .collect();
        warn!(
            "Could not resolve version conflict for {}: {}",
            self.key,
            constraints.join(", ")
        );
        ResolveError::UnsolvableVersionConflict {
            key: self.key.clone(),
            constraints,
        }
    }
}
