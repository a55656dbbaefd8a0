//! Two-way DAG partitioning
//!
//! A partition splits the operations into a dependency-closed set `S` that
//! holds every source, and its complement. Both halves are re-rooted under
//! [`ROOT`] and the edges crossing the cut are dropped, so the second half
//! may start as soon as the scheduler sees fit. This exposes overlap that a
//! single topological chain of the original graph hides.
//!
//! A split is accepted when both halves are acyclic, weakly connected and
//! self-contained: every local source reaches every non-source node of its
//! half. Caller-supplied [`PreservedEdge`]s re-attach dependencies that must
//! survive a cut.
//!
//! The unsplit graph under [`ROOT`] is always the last candidate.

use crate::graph::{DependencyGraph, ROOT};
use crate::scheduler::{schedule_graph, Schedule};
use fusemesh_core::{FusemeshError, PreservedEdge, ResourceCosts, Result, SchedulerConfig};

/// Lexicographic `r`-combinations of `0..n`
struct Combinations {
    n: usize,
    indices: Vec<usize>,
    first: bool,
}

impl Combinations {
    fn new(n: usize, r: usize) -> Self {
        Self {
            n,
            indices: (0..r).collect(),
            first: true,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let r = self.indices.len();
        if r > self.n {
            return None;
        }
        if self.first {
            self.first = false;
            return Some(self.indices.clone());
        }
        let pos = (0..r).rev().find(|&i| self.indices[i] != i + self.n - r)?;
        self.indices[pos] += 1;
        for i in pos + 1..r {
            self.indices[i] = self.indices[i - 1] + 1;
        }
        Some(self.indices.clone())
    }
}

/// Every source reaches all non-source nodes of `graph`
fn is_self_contained(graph: &DependencyGraph) -> bool {
    let sources = graph.source_ids();
    let expected = graph.len() - sources.len();
    sources
        .iter()
        .all(|&s| graph.descendants(s).len() == expected)
}

fn is_valid_half(graph: &DependencyGraph) -> bool {
    graph.is_acyclic() && graph.is_weakly_connected() && is_self_contained(graph)
}

/// Join two halves under a fresh root and apply the preserved edges
fn join(
    first: &DependencyGraph,
    second: &DependencyGraph,
    preserved: &[PreservedEdge],
) -> DependencyGraph {
    let mut joined = DependencyGraph::new();
    joined.add_node(ROOT);
    for half in [first, second] {
        for name in half.names() {
            joined.add_node(name);
        }
    }
    for half in [first, second] {
        for source in half.sources() {
            joined.add_edge(ROOT, source);
        }
    }
    for half in [first, second] {
        for id in 0..half.len() {
            for &to in half.successor_ids(id) {
                joined.add_edge(half.name(id), half.name(to));
            }
        }
    }
    for edge in preserved {
        if first.contains(&edge.first_side) && second.contains(&edge.second_side) {
            joined.add_edge(&edge.second_side, &edge.first_side);
        }
    }
    joined
}

/// Enumerate partition candidates of `graph`, the unsplit graph last
///
/// # Errors
///
/// - [`FusemeshError::MalformedGraph`] if `graph` fails validation or
///   already contains [`ROOT`]
/// - [`FusemeshError::GraphTooLarge`] above `max_nodes` operations
pub fn partitions(
    graph: &DependencyGraph,
    preserved: &[PreservedEdge],
    max_nodes: usize,
) -> Result<Vec<DependencyGraph>> {
    graph.validate()?;
    if graph.contains(ROOT) {
        return Err(FusemeshError::malformed(format!(
            "'{}' is reserved for the scheduling root",
            ROOT
        )));
    }
    if graph.len() > max_nodes {
        return Err(FusemeshError::GraphTooLarge {
            nodes: graph.len(),
            limit: max_nodes,
        });
    }

    let n = graph.len();
    let sources = graph.source_ids();
    let preds = graph.predecessor_ids();
    let candidates: Vec<usize> = (0..n)
        .filter(|&i| !graph.successor_ids(i).is_empty())
        .collect();

    let mut splits = Vec::new();
    let mut rejected = 0usize;

    for r in sources.len().max(1)..=candidates.len() {
        for combo in Combinations::new(candidates.len(), r) {
            let mut in_first = vec![false; n];
            for &c in &combo {
                in_first[candidates[c]] = true;
            }
            if !sources.iter().all(|&s| in_first[s]) {
                continue;
            }
            let closed = (0..n)
                .filter(|&i| in_first[i])
                .all(|i| preds[i].iter().all(|&p| in_first[p]));
            if !closed {
                continue;
            }

            let in_second: Vec<bool> = in_first.iter().map(|&b| !b).collect();
            let first = graph.subgraph(&in_first);
            let second = graph.subgraph(&in_second);
            if !is_valid_half(&first) || !is_valid_half(&second) {
                rejected += 1;
                continue;
            }

            let joined = join(&first, &second, preserved);
            if !joined.is_acyclic() {
                tracing::debug!(
                    first = ?first.names().collect::<Vec<_>>(),
                    "preserved edges close a cycle, split skipped"
                );
                rejected += 1;
                continue;
            }
            splits.push(joined);
        }
    }

    tracing::debug!(
        accepted = splits.len(),
        rejected,
        operations = n,
        "enumerated dag partitions"
    );
    splits.push(graph.with_root());
    Ok(splits)
}

/// Winning candidate of a partition search
#[derive(Debug, Clone)]
pub struct PartitionedSchedule {
    /// Best schedule, synthetic root removed
    pub schedule: Schedule,
    /// Candidate graph the schedule was computed on, root included
    pub graph: DependencyGraph,
    /// Position of `graph` among the evaluated candidates
    pub candidate_index: usize,
    /// Candidates scheduled, the unsplit graph included
    pub candidates_evaluated: usize,
}

impl PartitionedSchedule {
    /// Makespan of the winning schedule
    pub fn makespan(&self) -> f64 {
        self.schedule.makespan()
    }

    /// Whether the winner is the unsplit graph
    pub fn is_unsplit(&self) -> bool {
        self.candidate_index + 1 == self.candidates_evaluated
    }
}

/// Schedule every candidate graph and keep the first minimum makespan
pub fn best_partition_schedule(
    graph: &DependencyGraph,
    costs: &ResourceCosts,
    config: &SchedulerConfig,
) -> Result<PartitionedSchedule> {
    let candidates = if config.partition {
        partitions(graph, &config.preserved_edges, config.max_graph_nodes)?
    } else {
        graph.validate()?;
        vec![graph.with_root()]
    };

    let mut best: Option<(usize, Schedule)> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let schedule = schedule_graph(candidate, costs, config)?;
        tracing::debug!(candidate = index, makespan = schedule.makespan(), "scheduled partition");
        if best
            .as_ref()
            .map_or(true, |(_, b)| schedule.makespan() < b.makespan())
        {
            best = Some((index, schedule));
        }
    }

    let (candidate_index, schedule) = best.ok_or(FusemeshError::EmptyOrderSet)?;
    tracing::info!(
        makespan = schedule.makespan(),
        candidate = candidate_index,
        candidates = candidates.len(),
        "best partition schedule"
    );

    let candidates_evaluated = candidates.len();
    let graph = candidates
        .into_iter()
        .nth(candidate_index)
        .ok_or(FusemeshError::EmptyOrderSet)?;
    Ok(PartitionedSchedule {
        schedule: schedule.without_root(),
        graph,
        candidate_index,
        candidates_evaluated,
    })
}
