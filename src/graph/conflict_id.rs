//! Conflict ids: which nodes compete with each other, and in what order the
//! competitions are decided.

use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::fmt;

use log::debug;

use super::{DependencyGraph, GraphTransformer, NodeId, ResolveError, TransformContext};

/// Key shared by all nodes that are versions of the same component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConflictId(String);

impl ConflictId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConflictId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Assigns every node with an artifact the conflict id of its versionless
/// artifact key.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictMarker;

impl GraphTransformer for ConflictMarker {
    fn transform(
        &self,
        graph: &mut DependencyGraph,
        root: NodeId,
        context: &mut TransformContext,
    ) -> Result<NodeId, ResolveError> {
        let conflict_ids: HashMap<NodeId, ConflictId> = graph
            .reachable(root)
            .into_iter()
            .filter_map(|id| {
                graph
                    .node(id)
                    .artifact
                    .as_ref()
                    .map(|artifact| (id, ConflictId::new(artifact.versionless_key())))
            })
            .collect();

        debug!("Marked {} nodes with conflict ids", conflict_ids.len());
        context.conflict_ids = Some(conflict_ids);
        Ok(root)
    }
}

/// Orders conflict ids so that an id is resolved before every id it
/// depends on.
///
/// Ids closer to the root come first among those that are free to go.
/// Cycles between ids are broken by releasing the shallowest id, and the
/// members of each broken cycle are recorded in the context.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictIdSorter;

impl GraphTransformer for ConflictIdSorter {
    fn transform(
        &self,
        graph: &mut DependencyGraph,
        root: NodeId,
        context: &mut TransformContext,
    ) -> Result<NodeId, ResolveError> {
        if context.conflict_ids.is_none() {
            ConflictMarker.transform(graph, root, context)?;
        }
        let conflict_ids = context
            .conflict_ids
            .as_ref()
            .ok_or(ResolveError::MissingConflictIds)?;

        let id_graph = IdGraph::build(graph, root, conflict_ids);
        let (sorted, cycles) = id_graph.sort();

        debug!(
            "Sorted {} conflict ids ({} cycles)",
            sorted.len(),
            cycles.len()
        );
        context.sorted_conflict_ids = Some(sorted);
        context.cyclic_conflict_ids = Some(cycles);
        Ok(root)
    }
}

/// Conflict ids as vertices, edges from the id of a parent node to the ids
/// of its children.
struct IdGraph {
    ids: Vec<ConflictId>,
    min_depths: Vec<usize>,
    targets: Vec<BTreeSet<usize>>,
    sources: Vec<BTreeSet<usize>>,
}

impl IdGraph {
    fn build(
        graph: &DependencyGraph,
        root: NodeId,
        conflict_ids: &HashMap<NodeId, ConflictId>,
    ) -> Self {
        let mut id_graph = IdGraph {
            ids: Vec::new(),
            min_depths: Vec::new(),
            targets: Vec::new(),
            sources: Vec::new(),
        };
        let mut index: HashMap<&ConflictId, usize> = HashMap::new();

        // Breadth-first, so the first visit of a node is its shallowest.
        let mut visited = HashSet::from([root]);
        let mut queue = VecDeque::from([(root, 0usize)]);
        while let Some((node, depth)) = queue.pop_front() {
            let source = conflict_ids
                .get(&node)
                .map(|id| id_graph.vertex(&mut index, id, depth));

            for &child in graph.children(node) {
                if let (Some(source), Some(child_id)) = (source, conflict_ids.get(&child)) {
                    let target = id_graph.vertex(&mut index, child_id, depth + 1);
                    if source != target {
                        id_graph.targets[source].insert(target);
                        id_graph.sources[target].insert(source);
                    }
                }
                if visited.insert(child) {
                    queue.push_back((child, depth + 1));
                }
            }
        }

        id_graph
    }

    fn vertex<'a>(
        &mut self,
        index: &mut HashMap<&'a ConflictId, usize>,
        id: &'a ConflictId,
        depth: usize,
    ) -> usize {
        let i = *index.entry(id).or_insert_with(|| {
            self.ids.push(id.clone());
            self.min_depths.push(depth);
            self.targets.push(BTreeSet::new());
            self.sources.push(BTreeSet::new());
            self.ids.len() - 1
        });
        self.min_depths[i] = self.min_depths[i].min(depth);
        i
    }

    /// Topological order plus the cycles that had to be broken.
    fn sort(&self) -> (Vec<ConflictId>, Vec<Vec<ConflictId>>) {
        let n = self.ids.len();
        let mut in_degree: Vec<usize> = self.sources.iter().map(BTreeSet::len).collect();
        let mut done = vec![false; n];
        let mut ready: BinaryHeap<Reverse<(usize, usize)>> = (0..n)
            .filter(|&i| in_degree[i] == 0)
            .map(|i| Reverse((self.min_depths[i], i)))
            .collect();

        let mut sorted = Vec::with_capacity(n);
        let mut cycles = Vec::new();

        while sorted.len() < n {
            let next = match ready.pop() {
                Some(Reverse((_, i))) => i,
                None => {
                    let Some(blocked) = (0..n)
                        .filter(|&i| !done[i])
                        .min_by_key(|&i| (self.min_depths[i], in_degree[i], i))
                    else {
                        break;
                    };
                    let cycle = self.cycle_through(blocked, &done);
                    debug!(
                        "Breaking conflict id cycle at {}: {}",
                        self.ids[blocked],
                        cycle
                            .iter()
                            .map(|&i| self.ids[i].as_str())
                            .collect::<Vec<_>>()
                            .join(" -> ")
                    );
                    cycles.push(cycle.into_iter().map(|i| self.ids[i].clone()).collect());
                    blocked
                }
            };
            if done[next] {
                continue;
            }
            done[next] = true;
            sorted.push(self.ids[next].clone());

            for &target in &self.targets[next] {
                if done[target] {
                    continue;
                }
                in_degree[target] = in_degree[target].saturating_sub(1);
                if in_degree[target] == 0 {
                    ready.push(Reverse((self.min_depths[target], target)));
                }
            }
        }

        (sorted, cycles)
    }

    /// Pending ids on a cycle through `start`, in first-seen order.
    fn cycle_through(&self, start: usize, done: &[bool]) -> Vec<usize> {
        let forward = self.reach(start, done, &self.targets);
        let backward = self.reach(start, done, &self.sources);
        let mut members: Vec<usize> = forward.intersection(&backward).copied().collect();
        members.sort_unstable();
        members
    }

    fn reach(&self, start: usize, done: &[bool], edges: &[BTreeSet<usize>]) -> HashSet<usize> {
        let mut seen = HashSet::from([start]);
        let mut stack = vec![start];
        while let Some(i) = stack.pop() {
            for &next in &edges[i] {
                if !done[next] && seen.insert(next) {
                    stack.push(next);
                }
            }
        }
        seen
    }
}
