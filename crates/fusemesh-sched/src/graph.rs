//! Dependency graphs of einsum operations
//!
//! [`DependencyGraph`] is an insertion-ordered adjacency list: node ids are
//! dense indices, edges point from producer to consumer. Insertion order is
//! significant, it fixes the enumeration order of topological orders and
//! therefore which of several equally good schedules is reported.
//!
//! [`EinsumGraph`] pairs a validated dependency graph with the operations it
//! orders.
//!
//! # Example
//!
//! ```
//! use fusemesh_sched::DependencyGraph;
//!
//! // Diamond: A -> {B, C} -> D
//! let graph = DependencyGraph::from_successors([
//!     ("A", vec!["B", "C"]),
//!     ("B", vec!["D"]),
//!     ("C", vec!["D"]),
//!     ("D", vec![]),
//! ]);
//! graph.validate().unwrap();
//!
//! let orders: Vec<Vec<&str>> = graph
//!     .topological_orders()
//!     .map(|order| graph.names_of(&order))
//!     .collect();
//! assert_eq!(orders, vec![vec!["A", "B", "C", "D"], vec!["A", "C", "B", "D"]]);
//! ```

use fusemesh_core::{FusemeshError, Operation, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};

/// Name of the synthetic scheduling anchor
pub const ROOT: &str = "ROOT";

/// Insertion-ordered directed graph over operation names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    successors: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(node, successors)` entries
    ///
    /// Nodes are numbered by first appearance, keys before the successors
    /// they list.
    pub fn from_successors<I, S, J, T>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, J)>,
        S: AsRef<str>,
        J: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let entries: Vec<(String, Vec<String>)> = entries
            .into_iter()
            .map(|(k, succ)| {
                (
                    k.as_ref().to_string(),
                    succ.into_iter().map(|s| s.as_ref().to_string()).collect(),
                )
            })
            .collect();

        let mut graph = Self::new();
        for (node, _) in &entries {
            graph.add_node(node);
        }
        for (node, succ) in &entries {
            for s in succ {
                graph.add_edge(node, s);
            }
        }
        graph
    }

    /// Add a node if absent and return its id
    pub fn add_node(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.names.len();
        self.names.push(name.to_string());
        self.index.insert(name.to_string(), id);
        self.successors.push(Vec::new());
        id
    }

    /// Add `from -> to`, creating missing nodes; duplicate edges are ignored
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let f = self.add_node(from);
        let t = self.add_node(to);
        if !self.successors[f].contains(&t) {
            self.successors[f].push(t);
        }
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no nodes
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Whether a node called `name` exists
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Dense id of `name`
    ///
    /// Ids are assigned in insertion order starting at 0 and never change.
    ///
    /// # Arguments
    ///
    /// * `name` - Operation name to look up
    ///
    /// # Returns
    ///
    /// `None` when no node carries that name.
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_sched::DependencyGraph;
    ///
    /// let mut graph = DependencyGraph::new();
    /// graph.add_edge("QK", "SM");
    /// assert_eq!(graph.id("QK"), Some(0));
    /// assert_eq!(graph.id("SM"), Some(1));
    /// assert_eq!(graph.id("AV"), None);
    /// ```
    pub fn id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Id of `name` or [`FusemeshError::UnknownOperation`]
    pub fn require(&self, name: &str) -> Result<usize> {
        self.id(name)
            .ok_or_else(|| FusemeshError::UnknownOperation(name.to_string()))
    }

    /// Name of node `id`
    ///
    /// # Panics
    ///
    /// Panics if `id >= self.len()`.
    pub fn name(&self, id: usize) -> &str {
        &self.names[id]
    }

    /// All node names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Translate a sequence of ids, such as a topological order, to names
    ///
    /// # Panics
    ///
    /// Panics if any id is out of range.
    pub fn names_of(&self, ids: &[usize]) -> Vec<&str> {
        ids.iter().map(|&i| self.name(i)).collect()
    }

    /// Direct successors of node `id`, in edge insertion order
    ///
    /// # Panics
    ///
    /// Panics if `id >= self.len()`.
    pub fn successor_ids(&self, id: usize) -> &[usize] {
        &self.successors[id]
    }

    /// Direct successors of `name`, in edge insertion order
    ///
    /// An unknown name has no successors rather than being an error; use
    /// [`DependencyGraph::require`] first when absence matters.
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_sched::DependencyGraph;
    ///
    /// let graph = DependencyGraph::from_successors([
    ///     ("Q", vec!["QK"]),
    ///     ("K", vec!["QK"]),
    ///     ("QK", vec!["SM"]),
    ///     ("SM", vec![]),
    /// ]);
    /// assert_eq!(graph.successors("Q"), vec!["QK"]);
    /// assert!(graph.successors("SM").is_empty());
    /// assert!(graph.successors("missing").is_empty());
    /// ```
    pub fn successors(&self, name: &str) -> Vec<&str> {
        match self.id(name) {
            Some(id) => self.names_of(&self.successors[id]),
            None => Vec::new(),
        }
    }

    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.successors.iter().map(Vec::len).sum()
    }

    /// Predecessor lists indexed by node id
    pub fn predecessor_ids(&self) -> Vec<Vec<usize>> {
        let mut preds = vec![Vec::new(); self.len()];
        for (from, succ) in self.successors.iter().enumerate() {
            for &to in succ {
                preds[to].push(from);
            }
        }
        preds
    }

    /// Graph with every edge flipped: the predecessor map
    pub fn reverse(&self) -> DependencyGraph {
        let preds = self.predecessor_ids();
        DependencyGraph {
            names: self.names.clone(),
            index: self.index.clone(),
            successors: preds,
        }
    }

    /// Incoming edge count per node id
    pub fn in_degrees(&self) -> Vec<usize> {
        let mut deg = vec![0; self.len()];
        for succ in &self.successors {
            for &to in succ {
                deg[to] += 1;
            }
        }
        deg
    }

    /// Nodes without incoming edges, in insertion order
    pub fn source_ids(&self) -> Vec<usize> {
        self.in_degrees()
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect()
    }

    /// Nodes without outgoing edges, in insertion order
    pub fn sink_ids(&self) -> Vec<usize> {
        (0..self.len())
            .filter(|&i| self.successors[i].is_empty())
            .collect()
    }

    /// Names of [`DependencyGraph::source_ids`]
    pub fn sources(&self) -> Vec<&str> {
        self.names_of(&self.source_ids())
    }

    /// Names of [`DependencyGraph::sink_ids`]
    pub fn sinks(&self) -> Vec<&str> {
        self.names_of(&self.sink_ids())
    }

    /// The lowest-id-first Kahn order, or `None` when a cycle exists
    pub fn topological_order(&self) -> Option<Vec<usize>> {
        let mut deg = self.in_degrees();
        let mut ready: BinaryHeap<Reverse<usize>> = deg
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(self.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &next in &self.successors[node] {
                deg[next] -= 1;
                if deg[next] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }
        (order.len() == self.len()).then_some(order)
    }

    /// Whether a topological order exists
    pub fn is_acyclic(&self) -> bool {
        self.topological_order().is_some()
    }

    /// Check the structural invariants: non-empty, acyclic, has a source and a sink
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(FusemeshError::malformed("graph has no operations"));
        }
        if self.source_ids().is_empty() {
            return Err(FusemeshError::malformed("graph has no source operation"));
        }
        if self.sink_ids().is_empty() {
            return Err(FusemeshError::malformed("graph has no sink operation"));
        }
        if !self.is_acyclic() {
            return Err(FusemeshError::malformed("dependency cycle detected"));
        }
        Ok(())
    }

    /// Whether `order` lists every node exactly once, after all its predecessors
    pub fn is_linear_extension(&self, order: &[usize]) -> bool {
        if order.len() != self.len() {
            return false;
        }
        let mut position = vec![usize::MAX; self.len()];
        for (pos, &node) in order.iter().enumerate() {
            if node >= self.len() || position[node] != usize::MAX {
                return false;
            }
            position[node] = pos;
        }
        self.successors
            .iter()
            .enumerate()
            .all(|(from, succ)| succ.iter().all(|&to| position[from] < position[to]))
    }

    /// Connected when edge directions are ignored; the empty graph is not
    pub fn is_weakly_connected(&self) -> bool {
        if self.is_empty() {
            return false;
        }
        let preds = self.predecessor_ids();
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::from([0usize]);
        seen[0] = true;
        let mut reached = 1;
        while let Some(node) = queue.pop_front() {
            for &next in self.successors[node].iter().chain(preds[node].iter()) {
                if !seen[next] {
                    seen[next] = true;
                    reached += 1;
                    queue.push_back(next);
                }
            }
        }
        reached == self.len()
    }

    /// Nodes reachable from `id`, excluding `id` itself
    pub fn descendants(&self, id: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut stack = self.successors[id].clone();
        let mut out = Vec::new();
        while let Some(node) = stack.pop() {
            if seen[node] || node == id {
                continue;
            }
            seen[node] = true;
            out.push(node);
            stack.extend(self.successors[node].iter().copied());
        }
        out.sort_unstable();
        out
    }

    /// Induced subgraph on the nodes with `keep[id] == true`, order preserved
    pub fn subgraph(&self, keep: &[bool]) -> DependencyGraph {
        let mut sub = DependencyGraph::new();
        for id in (0..self.len()).filter(|&i| keep[i]) {
            sub.add_node(self.name(id));
        }
        for id in (0..self.len()).filter(|&i| keep[i]) {
            for &to in self.successors[id].iter().filter(|&&t| keep[t]) {
                sub.add_edge(self.name(id), self.name(to));
            }
        }
        sub
    }

    /// Copy with [`ROOT`] prepended, pointing at every source
    pub fn with_root(&self) -> DependencyGraph {
        if self.contains(ROOT) {
            return self.clone();
        }
        let mut rooted = DependencyGraph::new();
        rooted.add_node(ROOT);
        for name in self.names() {
            rooted.add_node(name);
        }
        for source in self.sources() {
            rooted.add_edge(ROOT, source);
        }
        for (from, succ) in self.successors.iter().enumerate() {
            for &to in succ {
                rooted.add_edge(self.name(from), self.name(to));
            }
        }
        rooted
    }

    /// Number of operations, not counting [`ROOT`]
    pub fn operation_count(&self) -> usize {
        self.len() - usize::from(self.contains(ROOT))
    }

    /// Lazily enumerate every topological order
    pub fn topological_orders(&self) -> TopologicalOrders<'_> {
        TopologicalOrders::new(self)
    }
}

/// Depth-first enumeration of all linear extensions
///
/// At each depth the ready nodes are tried in id order, so the first order
/// produced equals [`DependencyGraph::topological_order`]. Re-create the
/// iterator to restart. A cyclic graph yields nothing.
pub struct TopologicalOrders<'a> {
    graph: &'a DependencyGraph,
    in_degree: Vec<usize>,
    placed: Vec<bool>,
    order: Vec<usize>,
    /// Next candidate id to try at each depth
    cursor: Vec<usize>,
    done: bool,
}

impl<'a> TopologicalOrders<'a> {
    fn new(graph: &'a DependencyGraph) -> Self {
        Self {
            graph,
            in_degree: graph.in_degrees(),
            placed: vec![false; graph.len()],
            order: Vec::with_capacity(graph.len()),
            cursor: vec![0],
            done: false,
        }
    }

    fn place(&mut self, node: usize) {
        self.placed[node] = true;
        self.order.push(node);
        for &next in self.graph.successor_ids(node) {
            self.in_degree[next] -= 1;
        }
    }

    fn unplace_last(&mut self) {
        if let Some(node) = self.order.pop() {
            self.placed[node] = false;
            for &next in self.graph.successor_ids(node) {
                self.in_degree[next] += 1;
            }
        }
    }
}

impl Iterator for TopologicalOrders<'_> {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let n = self.graph.len();
        loop {
            if self.done {
                return None;
            }
            let depth = self.order.len();
            if depth == n {
                let complete = self.order.clone();
                if n == 0 {
                    self.done = true;
                } else {
                    self.cursor.pop();
                    self.unplace_last();
                }
                return Some(complete);
            }

            let start = self.cursor[depth];
            let found =
                (start..n).find(|&i| !self.placed[i] && self.in_degree[i] == 0);
            match found {
                Some(node) => {
                    self.cursor[depth] = node + 1;
                    self.place(node);
                    self.cursor.push(0);
                }
                None => {
                    self.cursor.pop();
                    if self.order.is_empty() {
                        self.done = true;
                    } else {
                        self.unplace_last();
                    }
                }
            }
        }
    }
}

/// Validated operations plus the dependency relation among them
#[derive(Debug, Clone)]
pub struct EinsumGraph {
    operations: Vec<Operation>,
    index: HashMap<String, usize>,
    dependencies: DependencyGraph,
}

impl EinsumGraph {
    /// Build and validate
    ///
    /// Nodes follow the order of `operations`; operations absent from
    /// `dependencies` become isolated nodes.
    ///
    /// # Errors
    ///
    /// - [`FusemeshError::MalformedGraph`] on duplicate names, a cycle, or a
    ///   missing source or sink
    /// - [`FusemeshError::UnknownOperation`] when an edge names an undeclared operation
    pub fn build<I, S, J, T>(operations: Vec<Operation>, dependencies: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, J)>,
        S: AsRef<str>,
        J: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut index = HashMap::with_capacity(operations.len());
        let mut graph = DependencyGraph::new();
        for (i, op) in operations.iter().enumerate() {
            if op.name == ROOT {
                return Err(FusemeshError::malformed(format!(
                    "'{}' is reserved for the scheduling root",
                    ROOT
                )));
            }
            if index.insert(op.name.clone(), i).is_some() {
                return Err(FusemeshError::malformed(format!(
                    "operation '{}' declared twice",
                    op.name
                )));
            }
            graph.add_node(&op.name);
        }

        for (from, succ) in dependencies {
            let from = from.as_ref();
            if !index.contains_key(from) {
                return Err(FusemeshError::UnknownOperation(from.to_string()));
            }
            for to in succ {
                let to = to.as_ref();
                if !index.contains_key(to) {
                    return Err(FusemeshError::UnknownOperation(to.to_string()));
                }
                graph.add_edge(from, to);
            }
        }

        graph.validate()?;
        tracing::debug!(
            operations = operations.len(),
            edges = graph.edge_count(),
            "built einsum graph"
        );

        Ok(Self {
            operations,
            index,
            dependencies: graph,
        })
    }

    /// Operations in declaration order; index `i` is node id `i`
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// Look up an operation by name
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_core::Operation;
    /// use fusemesh_sched::EinsumGraph;
    ///
    /// let graph = EinsumGraph::build(
    ///     vec![
    ///         Operation::new("QK", ["M", "P"]).with_input("Q", ["P"]),
    ///         Operation::new("SM", ["M", "P"]).with_input("QK", ["M", "P"]),
    ///     ],
    ///     [("QK", vec!["SM"])],
    /// )?;
    /// assert_eq!(graph.operation("SM").map(|op| op.dims.len()), Some(2));
    /// assert!(graph.operation("AV").is_none());
    /// # Ok::<(), fusemesh_core::FusemeshError>(())
    /// ```
    pub fn operation(&self, name: &str) -> Option<&Operation> {
        self.index.get(name).map(|&i| &self.operations[i])
    }

    /// The validated dependency relation
    pub fn dependencies(&self) -> &DependencyGraph {
        &self.dependencies
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Always false for a built graph
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}
