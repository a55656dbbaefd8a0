//! Monte-Carlo tree search over tiling factors
//!
//! Each candidate assignment becomes a root-to-leaf path with one node per
//! searched dimension (by default B, D, M, P, S at level `L3`); candidates
//! sharing a prefix share the nodes. Nodes live in a flat arena and refer to
//! each other by index.
//!
//! Selection descends by the UCT score
//! `-avg_cost + w * sqrt(ln(parent_visits) / visits)`. A child scores
//! `+inf` while any leaf beneath it has never been evaluated, so a search of
//! at least as many iterations as there are distinct leaves visits every
//! leaf. Equal scores keep the earliest-inserted child.
//!
//! The cost backpropagated is the energy of an [`Observation`]. Iterations
//! run strictly one after another: each selection sees every earlier
//! backpropagation.
//!
//! # Example
//!
//! ```
//! use fusemesh_core::{FactorAssignment, Observation, SearchConfig};
//! use fusemesh_search::SearchTree;
//!
//! let config = SearchConfig::default().with_dimension_order(["P"]);
//! let candidates: Vec<_> = [1, 2, 4]
//!     .iter()
//!     .map(|&p| FactorAssignment::new().with("L3", "P", p).with("DRAM", "P", 4 / p))
//!     .collect();
//!
//! let mut tree = SearchTree::build(candidates, config, None)?;
//! let mut evaluator = |f: &FactorAssignment| -> anyhow::Result<Observation> {
//!     Ok(Observation::new(1.0, (f.get("L3", "P").unwrap_or(0) as f64 - 2.0).abs()))
//! };
//! let outcome = tree.search(&mut evaluator, None, 5)?;
//! assert_eq!(outcome.best.unwrap().factors.get("L3", "P"), Some(2));
//! # Ok::<(), fusemesh_core::FusemeshError>(())
//! ```

use crate::cache::MemoCache;
use fusemesh_core::{
    AssignmentEvaluator, FactorAssignment, FusemeshError, Observation, Result, SearchConfig,
};
use std::collections::HashMap;

/// One tree node; the root has no dimension
#[derive(Debug, Clone)]
struct TreeNode {
    dim: Option<String>,
    value: u64,
    parent: Option<usize>,
    children: Vec<usize>,
    visits: u64,
    total_cost: f64,
    /// Leaves beneath (or equal to) this node never evaluated
    unvisited_leaves: usize,
}

impl TreeNode {
    fn root() -> Self {
        Self {
            dim: None,
            value: 0,
            parent: None,
            children: Vec::new(),
            visits: 0,
            total_cost: 0.0,
            unvisited_leaves: 0,
        }
    }

    fn average_cost(&self) -> f64 {
        if self.visits == 0 {
            f64::INFINITY
        } else {
            self.total_cost / self.visits as f64
        }
    }
}

/// Lowest-energy assignment seen by a tree
#[derive(Debug, Clone, PartialEq)]
pub struct BestAssignment {
    /// Index into [`SearchTree::candidates`]
    pub candidate: usize,
    /// The candidate itself
    pub factors: FactorAssignment,
    /// What it cost when first observed at this energy
    pub observation: Observation,
}

/// One search iteration
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    /// Zero-based iteration within one `search` call
    pub iteration: usize,
    /// Candidate evaluated in this iteration
    pub candidate: usize,
    /// Cost backpropagated for it
    pub observation: Observation,
    /// Served by the memoization cache
    pub cached: bool,
}

/// Result of [`SearchTree::search`]
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    /// Best over the whole tree, cache seeds included
    pub best: Option<BestAssignment>,
    /// Iterations actually run
    pub iterations: usize,
    /// Evaluations that reached the evaluator
    pub oracle_calls: usize,
    /// Evaluations served by the cache
    pub cache_hits: usize,
    /// One record per iteration, in order
    pub history: Vec<SearchRecord>,
}

impl SearchOutcome {
    /// Energy of [`SearchOutcome::best`]
    pub fn best_energy(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.observation.energy)
    }
}

/// Arena-backed search tree over a finite candidate list
#[derive(Debug, Clone)]
pub struct SearchTree {
    nodes: Vec<TreeNode>,
    candidates: Vec<FactorAssignment>,
    /// Candidate evaluated when a leaf is selected; later duplicates win
    leaf_candidate: HashMap<usize, usize>,
    /// Latest observation per candidate
    observations: Vec<Option<Observation>>,
    /// Lowest energy so far; ties keep the earlier observation
    best: Option<BestAssignment>,
    config: SearchConfig,
}

impl SearchTree {
    /// Insert every candidate as a path, seeding statistics from `cache`
    ///
    /// # Errors
    ///
    /// - [`FusemeshError::EmptySearchSpace`] without candidates
    /// - [`FusemeshError::InvalidFactors`] if a candidate lacks a searched
    ///   dimension at the tree level
    pub fn build(
        candidates: Vec<FactorAssignment>,
        config: SearchConfig,
        cache: Option<&MemoCache>,
    ) -> Result<Self> {
        if candidates.is_empty() {
            return Err(FusemeshError::EmptySearchSpace);
        }

        let mut tree = Self {
            nodes: vec![TreeNode::root()],
            observations: vec![None; candidates.len()],
            candidates: Vec::new(),
            leaf_candidate: HashMap::new(),
            best: None,
            config,
        };

        let mut seeded = Vec::new();
        for (index, factors) in candidates.iter().enumerate() {
            let leaf = tree.insert(factors)?;
            tree.leaf_candidate.insert(leaf, index);
            if let Some(observation) = cache.and_then(|c| c.lookup(factors)) {
                tree.backpropagate(leaf, observation.energy);
                seeded.push((index, observation));
            }
        }
        tree.candidates = candidates;
        for (index, observation) in seeded {
            tree.observe(index, observation);
        }

        tracing::debug!(
            candidates = tree.candidates.len(),
            leaves = tree.leaf_candidate.len(),
            nodes = tree.nodes.len(),
            seeded = tree.observations.iter().filter(|o| o.is_some()).count(),
            "built search tree"
        );
        Ok(tree)
    }

    /// Walk or extend the path for `factors`, returning its leaf
    fn insert(&mut self, factors: &FactorAssignment) -> Result<usize> {
        let mut node = 0;
        for dim in &self.config.dimension_order {
            let value = factors.get(&self.config.tree_level, dim).ok_or_else(|| {
                FusemeshError::invalid_factors(format!(
                    "candidate {} has no {}.{}",
                    factors, self.config.tree_level, dim
                ))
            })?;
            let existing = self.nodes[node]
                .children
                .iter()
                .copied()
                .find(|&c| self.nodes[c].value == value);
            node = match existing {
                Some(child) => child,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TreeNode {
                        dim: Some(dim.clone()),
                        value,
                        parent: Some(node),
                        children: Vec::new(),
                        visits: 0,
                        total_cost: 0.0,
                        unvisited_leaves: 0,
                    });
                    self.nodes[node].children.push(child);
                    child
                }
            };
        }

        if self.nodes[node].children.is_empty() && !self.leaf_candidate.contains_key(&node) {
            let mut cursor = Some(node);
            while let Some(id) = cursor {
                self.nodes[id].unvisited_leaves += 1;
                cursor = self.nodes[id].parent;
            }
        }
        Ok(node)
    }

    /// Add one observation of `cost` to `leaf` and every ancestor
    fn backpropagate(&mut self, leaf: usize, cost: f64) {
        let first_visit = self.nodes[leaf].visits == 0;
        let mut cursor = Some(leaf);
        while let Some(id) = cursor {
            let node = &mut self.nodes[id];
            node.visits += 1;
            node.total_cost += cost;
            if first_visit {
                node.unvisited_leaves = node.unvisited_leaves.saturating_sub(1);
            }
            cursor = node.parent;
        }
    }

    /// Selection score of `child` under its parent
    fn uct(&self, child: usize) -> f64 {
        let node = &self.nodes[child];
        if node.visits == 0 || node.unvisited_leaves > 0 {
            return f64::INFINITY;
        }
        let Some(parent) = node.parent else {
            return -node.average_cost();
        };
        let parent_visits = self.nodes[parent].visits as f64;
        -node.average_cost()
            + self.config.exploration_weight * (parent_visits.ln() / node.visits as f64).sqrt()
    }

    /// Descend to a leaf by maximum score
    pub fn select(&self) -> usize {
        let mut node = 0;
        while !self.nodes[node].children.is_empty() {
            let mut best = self.nodes[node].children[0];
            let mut best_score = self.uct(best);
            for &child in &self.nodes[node].children[1..] {
                let score = self.uct(child);
                if score > best_score {
                    best = child;
                    best_score = score;
                }
            }
            node = best;
        }
        node
    }

    /// `dimension -> value` along the path to `leaf`
    pub fn leaf_path(&self, leaf: usize) -> Vec<(String, u64)> {
        let mut path = Vec::new();
        let mut cursor = Some(leaf);
        while let Some(id) = cursor {
            let node = &self.nodes[id];
            if let Some(dim) = &node.dim {
                path.push((dim.clone(), node.value));
            }
            cursor = node.parent;
        }
        path.reverse();
        path
    }

    /// Candidates in the order given to [`SearchTree::build`]
    pub fn candidates(&self) -> &[FactorAssignment] {
        &self.candidates
    }

    /// Distinct root-to-leaf paths
    pub fn leaf_count(&self) -> usize {
        self.leaf_candidate.len()
    }

    /// Visit count of a candidate's leaf
    pub fn visits(&self, candidate: usize) -> u64 {
        self.leaf_candidate
            .iter()
            .find(|(_, &c)| c == candidate)
            .map_or(0, |(&leaf, _)| self.nodes[leaf].visits)
    }

    /// Total visits recorded at the root
    pub fn root_visits(&self) -> u64 {
        self.nodes[0].visits
    }

    /// Record an observation, replacing the best only on strictly lower energy
    fn observe(&mut self, candidate: usize, observation: Observation) {
        self.observations[candidate] = Some(observation);
        let improves = self
            .best
            .as_ref()
            .map_or(true, |b| observation.energy < b.observation.energy);
        if improves {
            self.best = Some(BestAssignment {
                candidate,
                factors: self.candidates[candidate].clone(),
                observation,
            });
        }
    }

    /// Lowest-energy assignment observed so far
    ///
    /// Observations count in the order they arrived: cache seeds in candidate
    /// order during [`SearchTree::build`], then search iterations. Among equal
    /// energies the first one observed is kept.
    pub fn best(&self) -> Option<BestAssignment> {
        self.best.clone()
    }

    /// Run `iterations` rounds of select, evaluate, backpropagate
    ///
    /// With a cache, each evaluation goes through
    /// [`MemoCache::get_or_evaluate`]; without one, `evaluator` is called
    /// every time. An evaluator failure aborts the search before the failed
    /// iteration touches the tree.
    pub fn search<E>(
        &mut self,
        evaluator: &mut E,
        cache: Option<&MemoCache>,
        iterations: usize,
    ) -> Result<SearchOutcome>
    where
        E: AssignmentEvaluator + ?Sized,
    {
        if self.candidates.is_empty() {
            return Err(FusemeshError::EmptySearchSpace);
        }

        let mut history = Vec::with_capacity(iterations);
        let mut oracle_calls = 0;
        let mut cache_hits = 0;

        for iteration in 0..iterations {
            let leaf = self.select();
            let candidate = *self.leaf_candidate.get(&leaf).ok_or_else(|| {
                FusemeshError::invalid_factors(format!("selected node {} is not a candidate leaf", leaf))
            })?;
            let factors = &self.candidates[candidate];

            let (observation, cached) = match cache {
                Some(cache) => cache.get_or_evaluate(factors, evaluator)?,
                None => (
                    evaluator.evaluate(factors).map_err(FusemeshError::Oracle)?,
                    false,
                ),
            };
            if cached {
                cache_hits += 1;
            } else {
                oracle_calls += 1;
            }

            tracing::debug!(
                iteration,
                candidate,
                factors = %factors,
                energy = observation.energy,
                latency = observation.latency,
                cached,
                "search iteration"
            );

            self.backpropagate(leaf, observation.energy);
            self.observe(candidate, observation);
            history.push(SearchRecord {
                iteration,
                candidate,
                observation,
                cached,
            });
        }

        let best = self.best();
        if let Some(b) = &best {
            tracing::info!(
                energy = b.observation.energy,
                latency = b.observation.latency,
                oracle_calls,
                cache_hits,
                "search finished"
            );
        }
        Ok(SearchOutcome {
            best,
            iterations,
            oracle_calls,
            cache_hits,
            history,
        })
    }

    /// [`SearchTree::search`] with the configured iteration budget
    pub fn run<E>(&mut self, evaluator: &mut E, cache: Option<&MemoCache>) -> Result<SearchOutcome>
    where
        E: AssignmentEvaluator + ?Sized,
    {
        let iterations = self.config.iterations;
        self.search(evaluator, cache, iterations)
    }
}
