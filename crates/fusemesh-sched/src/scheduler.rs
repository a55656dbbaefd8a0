//! Dual-resource list scheduling
//!
//! For a fixed operation order the scheduler keeps one clock per resource.
//! Each operation starts on a resource no earlier than that resource's clock
//! and the latest end time of its predecessors, and goes to whichever
//! resource finishes it first. Ties go to the higher resource index
//! ([`Resource::TwoD`]).
//!
//! Trying every topological order ([`best_schedule`]) compensates for the
//! greedy per-order assignment; [`schedule_graph`] picks exhaustive or
//! annealing order search from a [`SchedulerConfig`].
//!
//! # Example
//!
//! ```
//! use fusemesh_core::{Resource, ResourceCosts};
//! use fusemesh_sched::{schedule, DependencyGraph};
//!
//! let graph = DependencyGraph::from_successors([("A", vec!["B"]), ("B", vec!["C"]), ("C", vec![])]);
//! let costs = ResourceCosts::new()
//!     .with("A", 2.0, 5.0)
//!     .with("B", 3.0, 1.0)
//!     .with("C", 1.0, 4.0);
//!
//! let result = schedule(&["A", "B", "C"], &costs, &graph).unwrap();
//! assert_eq!(result.makespan(), 4.0);
//! assert_eq!(result.get("B").unwrap().resource, Resource::TwoD);
//! ```

use crate::annealing::anneal_order;
use crate::graph::{DependencyGraph, ROOT};
use fusemesh_core::{
    CostPair, FusemeshError, OrderSearch, Resource, ResourceCosts, Result, SchedulerConfig,
};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Placement of one operation
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ScheduleEntry {
    /// Operation name
    pub operation: String,
    /// Mesh it runs on
    pub resource: Resource,
    /// Start time
    pub start: f64,
    /// Completion time
    pub end: f64,
}

impl ScheduleEntry {
    /// `end - start`, the cost on the chosen resource
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Resource assignment and timing for every operation of one graph
///
/// Entries are kept in the order they were scheduled.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
    makespan: f64,
}

impl Schedule {
    /// Completion time of the last operation
    pub fn makespan(&self) -> f64 {
        self.makespan
    }

    /// Entries in scheduling order
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    /// Placement of `operation`
    ///
    /// # Arguments
    ///
    /// * `operation` - Operation name
    ///
    /// # Returns
    ///
    /// `None` for operations the schedule does not cover.
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_core::{Resource, ResourceCosts};
    /// use fusemesh_sched::{schedule, DependencyGraph};
    ///
    /// let graph = DependencyGraph::from_successors([("A", vec!["B"]), ("B", vec!["C"]), ("C", vec![])]);
    /// let costs = ResourceCosts::new()
    ///     .with("A", 2.0, 5.0)
    ///     .with("B", 3.0, 1.0)
    ///     .with("C", 1.0, 4.0);
    /// let result = schedule(&["A", "B", "C"], &costs, &graph)?;
    ///
    /// let b = result.get("B").unwrap();
    /// assert_eq!((b.start, b.end), (2.0, 3.0));
    /// assert_eq!(b.duration(), 1.0);
    /// assert!(result.get("D").is_none());
    /// assert_eq!(result.on(Resource::OneD).count(), 2);
    /// # Ok::<(), fusemesh_core::FusemeshError>(())
    /// ```
    pub fn get(&self, operation: &str) -> Option<&ScheduleEntry> {
        self.entries.iter().find(|e| e.operation == operation)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was scheduled
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Operation names in scheduling order
    pub fn order(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.operation.as_str()).collect()
    }

    /// Entries placed on `resource`
    pub fn on(&self, resource: Resource) -> impl Iterator<Item = &ScheduleEntry> {
        self.entries.iter().filter(move |e| e.resource == resource)
    }

    /// Drop the synthetic root entry
    pub fn without_root(mut self) -> Self {
        self.entries.retain(|e| e.operation != ROOT);
        self
    }

    /// Describe every way this schedule breaks the scheduling invariants
    ///
    /// Checks durations against `costs`, precedence against `graph`, and
    /// serial occupancy per resource. Operations of `graph` that are absent
    /// from the schedule are ignored.
    pub fn violations(&self, graph: &DependencyGraph, costs: &ResourceCosts) -> Vec<String> {
        let mut problems = Vec::new();

        for e in &self.entries {
            let expected = costs.cost(&e.operation, e.resource);
            if (e.duration() - expected).abs() > 1e-9 * expected.abs().max(1.0) {
                problems.push(format!(
                    "{} lasts {} on {} but costs {}",
                    e.operation,
                    e.duration(),
                    e.resource,
                    expected
                ));
            }
        }

        let preds = graph.predecessor_ids();
        for e in &self.entries {
            let Some(id) = graph.id(&e.operation) else {
                continue;
            };
            for &p in &preds[id] {
                if let Some(pe) = self.get(graph.name(p)) {
                    if e.start < pe.end {
                        problems.push(format!(
                            "{} starts at {} before predecessor {} ends at {}",
                            e.operation, e.start, pe.operation, pe.end
                        ));
                    }
                }
            }
        }

        for resource in Resource::ALL {
            let mut placed: Vec<&ScheduleEntry> =
                self.on(resource).filter(|e| e.duration() > 0.0).collect();
            placed.sort_by(|a, b| a.start.total_cmp(&b.start));
            for pair in placed.windows(2) {
                if pair[0].end > pair[1].start {
                    problems.push(format!(
                        "{} and {} overlap on {}",
                        pair[0].operation, pair[1].operation, resource
                    ));
                }
            }
        }

        problems
    }
}

/// List scheduler bound to one graph and cost table
///
/// Predecessor lists and per-node costs are resolved once, so evaluating
/// many orders only pays for the greedy pass.
#[derive(Debug, Clone)]
pub struct ListScheduler<'g> {
    graph: &'g DependencyGraph,
    predecessors: Vec<Vec<usize>>,
    costs: Vec<CostPair>,
}

impl<'g> ListScheduler<'g> {
    /// Operations missing from `costs` are free on both resources
    pub fn new(graph: &'g DependencyGraph, costs: &ResourceCosts) -> Self {
        Self {
            graph,
            predecessors: graph.predecessor_ids(),
            costs: graph.names().map(|n| costs.pair(n)).collect(),
        }
    }

    /// Graph this scheduler was built for
    pub fn graph(&self) -> &'g DependencyGraph {
        self.graph
    }

    /// Greedy pass over `order`, reporting each placement to `place`
    fn run<F>(&self, order: &[usize], mut place: F) -> Result<f64>
    where
        F: FnMut(usize, Resource, f64, f64),
    {
        let n = self.graph.len();
        if order.len() != n {
            return Err(FusemeshError::malformed(format!(
                "order lists {} of {} operations",
                order.len(),
                n
            )));
        }

        let mut clocks = [0.0f64; 2];
        let mut end_time: Vec<Option<f64>> = vec![None; n];

        for &node in order {
            if node >= n || end_time[node].is_some() {
                return Err(FusemeshError::malformed(
                    "order repeats an operation or names one outside the graph",
                ));
            }

            let mut ready = 0.0f64;
            for &p in &self.predecessors[node] {
                match end_time[p] {
                    Some(t) => ready = ready.max(t),
                    None => {
                        return Err(FusemeshError::malformed(format!(
                            "'{}' is ordered before its predecessor '{}'",
                            self.graph.name(node),
                            self.graph.name(p)
                        )))
                    }
                }
            }

            let pair = self.costs[node];
            if !pair.is_schedulable() {
                return Err(FusemeshError::InvalidResource {
                    operation: self.graph.name(node).to_string(),
                });
            }

            let mut best: Option<(Resource, f64, f64)> = None;
            for resource in Resource::ALL {
                let start = clocks[resource.index()].max(ready);
                let end = start + pair.get(resource);
                // `<=` lets the later (higher-index) resource win ties
                if best.map_or(true, |(_, _, e)| end <= e) {
                    best = Some((resource, start, end));
                }
            }
            let Some((resource, start, end)) = best else {
                return Err(FusemeshError::InvalidResource {
                    operation: self.graph.name(node).to_string(),
                });
            };

            clocks[resource.index()] = end;
            end_time[node] = Some(end);
            place(node, resource, start, end);
        }

        Ok(clocks[0].max(clocks[1]))
    }

    /// Makespan of `order` without materializing the schedule
    pub fn makespan_of(&self, order: &[usize]) -> Result<f64> {
        self.run(order, |_, _, _, _| {})
    }

    /// Schedule an order given as node ids
    pub fn schedule_ids(&self, order: &[usize]) -> Result<Schedule> {
        let mut entries = Vec::with_capacity(order.len());
        let makespan = self.run(order, |node, resource, start, end| {
            entries.push(ScheduleEntry {
                operation: self.graph.name(node).to_string(),
                resource,
                start,
                end,
            })
        })?;
        Ok(Schedule { entries, makespan })
    }

    /// Schedule an order given as operation names
    pub fn schedule<S: AsRef<str>>(&self, order: &[S]) -> Result<Schedule> {
        let ids = order
            .iter()
            .map(|name| self.graph.require(name.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        self.schedule_ids(&ids)
    }

    /// Best schedule over `orders`; the first order reaching the minimum wins
    pub fn best_of<I, O>(&self, orders: I) -> Result<Schedule>
    where
        I: IntoIterator<Item = O>,
        O: AsRef<[usize]>,
    {
        let mut best: Option<(Vec<usize>, f64)> = None;
        let mut evaluated = 0usize;

        for order in orders {
            let order = order.as_ref();
            let makespan = self.makespan_of(order)?;
            evaluated += 1;
            if best.as_ref().map_or(true, |(_, m)| makespan < *m) {
                best = Some((order.to_vec(), makespan));
            }
        }

        let (order, makespan) = best.ok_or(FusemeshError::EmptyOrderSet)?;
        tracing::debug!(orders = evaluated, makespan, "evaluated operation orders");
        self.schedule_ids(&order)
    }

    /// Best schedule over every topological order of the graph
    pub fn best_exhaustive(&self) -> Result<Schedule> {
        self.best_of(self.graph.topological_orders())
    }
}

/// Schedule one fixed order
pub fn schedule<S: AsRef<str>>(
    order: &[S],
    costs: &ResourceCosts,
    graph: &DependencyGraph,
) -> Result<Schedule> {
    ListScheduler::new(graph, costs).schedule(order)
}

/// Minimum-makespan schedule over `orders`
///
/// # Errors
///
/// [`FusemeshError::EmptyOrderSet`] if `orders` yields nothing; any error of
/// an individual order is propagated.
pub fn best_schedule<I, O>(orders: I, costs: &ResourceCosts, graph: &DependencyGraph) -> Result<Schedule>
where
    I: IntoIterator<Item = O>,
    O: AsRef<[usize]>,
{
    ListScheduler::new(graph, costs).best_of(orders)
}

/// Schedule `graph` with the order search selected by `config`
///
/// Exhaustive search refuses graphs with more than `max_graph_nodes`
/// operations (the synthetic root is not counted).
pub fn schedule_graph(
    graph: &DependencyGraph,
    costs: &ResourceCosts,
    config: &SchedulerConfig,
) -> Result<Schedule> {
    graph.validate()?;
    let scheduler = ListScheduler::new(graph, costs);
    match &config.order_search {
        OrderSearch::Exhaustive => {
            let nodes = graph.operation_count();
            if nodes > config.max_graph_nodes {
                return Err(FusemeshError::GraphTooLarge {
                    nodes,
                    limit: config.max_graph_nodes,
                });
            }
            scheduler.best_exhaustive()
        }
        OrderSearch::Annealing(params) => anneal_order(&scheduler, params),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (DependencyGraph, ResourceCosts) {
        let graph =
            DependencyGraph::from_successors([("A", vec!["B"]), ("B", vec!["C"]), ("C", vec![])]);
        let costs = ResourceCosts::new()
            .with("A", 2.0, 5.0)
            .with("B", 3.0, 1.0)
            .with("C", 1.0, 4.0);
        (graph, costs)
    }

    #[test]
    fn test_chain_schedule_is_exact() {
        let (graph, costs) = chain();
        let best = best_schedule(graph.topological_orders(), &costs, &graph).unwrap();

        assert_eq!(best.makespan(), 4.0);
        let a = best.get("A").unwrap();
        assert_eq!((a.resource, a.start, a.end), (Resource::OneD, 0.0, 2.0));
        let b = best.get("B").unwrap();
        assert_eq!((b.resource, b.start, b.end), (Resource::TwoD, 2.0, 3.0));
        let c = best.get("C").unwrap();
        assert_eq!((c.resource, c.start, c.end), (Resource::OneD, 3.0, 4.0));
        assert!(best.violations(&graph, &costs).is_empty());
    }

    #[test]
    fn test_tie_prefers_two_d() {
        let graph = DependencyGraph::from_successors([("A", Vec::<&str>::new())]);
        let costs = ResourceCosts::new().with("A", 3.0, 3.0);
        let s = schedule(&["A"], &costs, &graph).unwrap();
        assert_eq!(s.get("A").unwrap().resource, Resource::TwoD);
    }

    #[test]
    fn test_infinite_cost_forbids_resource() {
        let graph = DependencyGraph::from_successors([("A", vec!["B"]), ("B", vec![])]);
        let costs = ResourceCosts::new()
            .with("A", 10.0, f64::INFINITY)
            .with("B", f64::INFINITY, 1.0);
        let s = schedule(&["A", "B"], &costs, &graph).unwrap();
        assert_eq!(s.get("A").unwrap().resource, Resource::OneD);
        assert_eq!(s.get("B").unwrap().start, 10.0);
        assert_eq!(s.makespan(), 11.0);
    }

    #[test]
    fn test_unschedulable_operation_is_an_error() {
        let graph = DependencyGraph::from_successors([("A", Vec::<&str>::new())]);
        let costs = ResourceCosts::new().with("A", f64::INFINITY, f64::INFINITY);
        let err = schedule(&["A"], &costs, &graph).unwrap_err();
        assert!(matches!(err, FusemeshError::InvalidResource { operation } if operation == "A"));
    }

    #[test]
    fn test_missing_cost_is_free() {
        let (graph, costs) = chain();
        let rooted = graph.with_root();
        let s = ListScheduler::new(&rooted, &costs).best_exhaustive().unwrap();
        let root = s.get(ROOT).unwrap();
        assert_eq!((root.start, root.end), (0.0, 0.0));
        assert_eq!(s.makespan(), 4.0);
        assert_eq!(s.clone().without_root().len(), 3);
    }

    #[test]
    fn test_order_must_respect_dependencies() {
        let (graph, costs) = chain();
        assert!(matches!(
            schedule(&["B", "A", "C"], &costs, &graph),
            Err(FusemeshError::MalformedGraph { .. })
        ));
        assert!(matches!(
            schedule(&["A", "B"], &costs, &graph),
            Err(FusemeshError::MalformedGraph { .. })
        ));
        assert!(matches!(
            schedule(&["A", "X", "C"], &costs, &graph),
            Err(FusemeshError::UnknownOperation(_))
        ));
    }

    #[test]
    fn test_empty_order_set() {
        let (graph, costs) = chain();
        let none: Vec<Vec<usize>> = Vec::new();
        assert!(matches!(
            best_schedule(none, &costs, &graph),
            Err(FusemeshError::EmptyOrderSet)
        ));
    }

    #[test]
    fn test_schedule_is_idempotent() {
        let (graph, costs) = chain();
        let first = schedule(&["A", "B", "C"], &costs, &graph).unwrap();
        let second = schedule(&["A", "B", "C"], &costs, &graph).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_independent_ops_overlap() {
        let graph = DependencyGraph::from_successors([("X", Vec::<&str>::new()), ("Y", vec![])]);
        let costs = ResourceCosts::new().with("X", 4.0, 5.0).with("Y", 5.0, 4.0);
        let best = best_schedule(graph.topological_orders(), &costs, &graph).unwrap();
        assert_eq!(best.makespan(), 4.0);
        assert_ne!(best.get("X").unwrap().resource, best.get("Y").unwrap().resource);
    }

    #[test]
    fn test_first_minimum_wins() {
        // Both orders of the diamond reach the same makespan; the first is kept.
        let graph = DependencyGraph::from_successors([
            ("A", vec!["B", "C"]),
            ("B", vec!["D"]),
            ("C", vec!["D"]),
            ("D", vec![]),
        ]);
        let costs = ResourceCosts::new()
            .with("A", 1.0, 1.0)
            .with("B", 1.0, 1.0)
            .with("C", 1.0, 1.0)
            .with("D", 1.0, 1.0);
        let best = best_schedule(graph.topological_orders(), &costs, &graph).unwrap();
        assert_eq!(best.order(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_exhaustive_guard() {
        let (graph, costs) = chain();
        let config = SchedulerConfig::default().with_max_graph_nodes(2);
        assert!(matches!(
            schedule_graph(&graph.with_root(), &costs, &config),
            Err(FusemeshError::GraphTooLarge { nodes: 3, limit: 2 })
        ));
        let config = SchedulerConfig::default().with_max_graph_nodes(3);
        assert_eq!(schedule_graph(&graph.with_root(), &costs, &config).unwrap().makespan(), 4.0);
    }
}
