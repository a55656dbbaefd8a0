//! Configuration for the hardware model, the scheduler and the factor search
//!
//! All configuration types implement `Default` and expose builder-style
//! `with_*` setters, so callers only spell out what they change:
//!
//! ```
//! use fusemesh_core::{ArchConfig, OrderSearch, SchedulerConfig, SearchConfig};
//!
//! let arch = ArchConfig::edge();
//! assert_eq!(arch.mesh_2d, 16);
//!
//! let sched = SchedulerConfig::default()
//!     .with_max_graph_nodes(12)
//!     .with_preserved_edge("SPD", "RD");
//! assert_eq!(sched.order_search, OrderSearch::Exhaustive);
//!
//! let search = SearchConfig::default().with_iterations(50);
//! assert_eq!(search.dimension_order, vec!["B", "D", "M", "P", "S"]);
//! ```

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Two-tier accelerator description
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArchConfig {
    /// Identity used in cache file names
    pub name: String,
    /// Lanes in the 1D mesh
    pub mesh_1d: u64,
    /// Side of the square 2D mesh
    pub mesh_2d: u64,
    /// On-chip buffer capacity in MiB
    pub buffer_mib: u64,
    /// Off-chip bandwidth in GB/s
    pub bandwidth_gbps: u64,
    /// Global clock in Hz
    pub clock_hz: f64,
}

impl ArchConfig {
    /// Datacenter-class configuration
    pub fn cloud() -> Self {
        Self {
            name: "cloud".to_string(),
            mesh_1d: 256,
            mesh_2d: 256,
            buffer_mib: 16,
            bandwidth_gbps: 400,
            clock_hz: 940e6,
        }
    }

    /// Edge-class configuration
    pub fn edge() -> Self {
        Self {
            name: "edge".to_string(),
            mesh_1d: 256,
            mesh_2d: 16,
            buffer_mib: 5,
            bandwidth_gbps: 30,
            clock_hz: 940e6,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_meshes(mut self, mesh_1d: u64, mesh_2d: u64) -> Self {
        self.mesh_1d = mesh_1d;
        self.mesh_2d = mesh_2d;
        self
    }

    pub fn with_buffer_mib(mut self, mib: u64) -> Self {
        self.buffer_mib = mib;
        self
    }

    /// Buffer capacity in bytes
    pub fn buffer_bytes(&self) -> u64 {
        self.buffer_mib * (1 << 20)
    }

    /// Compute units of the 2D mesh
    pub fn mesh_2d_units(&self) -> u64 {
        self.mesh_2d * self.mesh_2d
    }
}

impl Default for ArchConfig {
    fn default() -> Self {
        Self::cloud()
    }
}

/// Dependency re-attached when a partition separates two named operations
///
/// When `first_side` lands in the first (source-holding) half of a split and
/// `second_side` in the second half, the partitioner adds the edge
/// `second_side -> first_side`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PreservedEdge {
    /// Operation expected in the source-holding half
    pub first_side: String,
    /// Operation expected in the other half
    pub second_side: String,
}

impl PreservedEdge {
    pub fn new(first_side: impl Into<String>, second_side: impl Into<String>) -> Self {
        Self {
            first_side: first_side.into(),
            second_side: second_side.into(),
        }
    }
}

/// Parameters of the simulated-annealing order search
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AnnealingParams {
    /// Starting temperature
    pub initial_temp: f64,
    /// Multiplier applied to the temperature after every iteration
    pub cooling_rate: f64,
    /// Number of swap proposals
    pub max_iterations: usize,
    /// RNG seed; equal seeds give equal orders
    pub seed: u64,
}

impl Default for AnnealingParams {
    fn default() -> Self {
        Self {
            initial_temp: 100.0,
            cooling_rate: 0.95,
            max_iterations: 1000,
            seed: 12345,
        }
    }
}

/// How the scheduler explores operation orders
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum OrderSearch {
    /// Every topological order; guarded by `max_graph_nodes`
    Exhaustive,
    /// Swap-based annealing over valid orders; any graph size
    Annealing(AnnealingParams),
}

/// Scheduler and partitioner settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SchedulerConfig {
    /// Largest graph (excluding the synthetic root) enumerated exhaustively
    pub max_graph_nodes: usize,
    /// Order exploration strategy
    pub order_search: OrderSearch,
    /// Explore two-way DAG partitions in addition to the unsplit graph
    pub partition: bool,
    /// Cross-partition dependencies to keep
    pub preserved_edges: Vec<PreservedEdge>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_graph_nodes: 16,
            order_search: OrderSearch::Exhaustive,
            partition: true,
            preserved_edges: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_max_graph_nodes(mut self, limit: usize) -> Self {
        self.max_graph_nodes = limit;
        self
    }

    pub fn with_order_search(mut self, search: OrderSearch) -> Self {
        self.order_search = search;
        self
    }

    pub fn with_partition(mut self, enabled: bool) -> Self {
        self.partition = enabled;
        self
    }

    /// Keep `second_side -> first_side` when a split separates them
    pub fn with_preserved_edge(
        mut self,
        first_side: impl Into<String>,
        second_side: impl Into<String>,
    ) -> Self {
        self.preserved_edges
            .push(PreservedEdge::new(first_side, second_side));
        self
    }
}

/// Monte-Carlo factor search settings
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SearchConfig {
    /// Iteration budget of one `search` call
    pub iterations: usize,
    /// UCT exploration weight
    pub exploration_weight: f64,
    /// Tree depth order: one dimension per level
    pub dimension_order: Vec<String>,
    /// Factor level whose values label the tree nodes
    pub tree_level: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            iterations: 20,
            exploration_weight: 1.4,
            dimension_order: ["B", "D", "M", "P", "S"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tree_level: "L3".to_string(),
        }
    }
}

impl SearchConfig {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_exploration_weight(mut self, weight: f64) -> Self {
        self.exploration_weight = weight;
        self
    }

    /// Replace the tree depth order
    pub fn with_dimension_order<I, S>(mut self, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimension_order = dims.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tree_level(mut self, level: impl Into<String>) -> Self {
        self.tree_level = level.into();
        self
    }
}

/// Retry policy for the cache's scoped file locks
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LockPolicy {
    /// Lock attempts before giving up; 0 behaves as 1
    pub attempts: usize,
    /// Wait of the first attempt; doubled on each retry
    pub base_backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            attempts: 8,
            base_backoff: Duration::from_millis(25),
        }
    }
}

impl LockPolicy {
    /// Wait budget of the given zero-based attempt
    pub fn backoff(&self, attempt: usize) -> Duration {
        let shift = attempt.min(16) as u32;
        self.base_backoff.saturating_mul(1u32 << shift)
    }
}
