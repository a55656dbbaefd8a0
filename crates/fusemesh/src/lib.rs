//! # fusemesh - Layer Fusion on Dual-Mesh Accelerators
//!
//! Schedules the einsums of a transformer layer across a 1D and a 2D compute
//! mesh, and searches the tiling factors that feed them from a small on-chip
//! buffer.
//!
//! This is the **meta crate** that re-exports every fusemesh component.
//!
//! ## Quick Start
//!
//! ```
//! use fusemesh::prelude::*;
//!
//! let graph = LayerGroup::FeedForward(Activation::Relu).graph()?;
//! let costs = ResourceCosts::new()
//!     .with("FFN", 8.0, 2.0)
//!     .with("AR", 1.0, f64::INFINITY)
//!     .with("FFNT", 8.0, 2.0);
//!
//! // Splitting the chain lets the activation overlap the first projection
//! let best = best_partition_schedule(graph.dependencies(), &costs, &SchedulerConfig::default())?;
//! assert_eq!(best.makespan(), 4.0);
//! assert!(!best.is_unsplit());
//! # Ok::<(), FusemeshError>(())
//! ```
//!
//! ## Components
//!
//! ### Vocabulary ([`core`])
//!
//! Operations, resources and cost tables, factor assignments, the cost-oracle
//! contracts, configuration, errors and tracing setup.
//!
//! ### Scheduling ([`sched`])
//!
//! Dependency graphs, the dual-resource list scheduler with exhaustive and
//! annealing order search, two-way DAG partitioning, analytic cost estimates
//! and oracle-driven cost measurement.
//!
//! ```
//! use fusemesh::sched::DependencyGraph;
//!
//! let g = DependencyGraph::from_successors([("A", vec!["B", "C"]), ("B", vec!["D"]), ("C", vec!["D"])]);
//! assert_eq!(g.topological_orders().count(), 2);
//! ```
//!
//! ### Factor Search ([`search`])
//!
//! Candidate enumeration under buffer capacity, Monte-Carlo tree search over
//! factor assignments and the persistent evaluation cache.
//!
//! ### Presets ([`presets`])
//!
//! QKV projection, attention, add-and-norm and feed-forward einsum groups.
//!
//! ## Features
//!
//! - `serde`: Serialize/Deserialize for configuration and data types

#![deny(warnings)]

pub use fusemesh_core as core;
pub use fusemesh_sched as sched;
pub use fusemesh_search as search;

pub mod presets;


pub mod prelude {
    //! Prelude module for convenient imports
    //!
    //! # Example
    //!
    //! ```
    //! use fusemesh::prelude::*;
    //!
    //! let arch = ArchConfig::edge();
    //! assert_eq!(arch.mesh_2d, 16);
    //! ```

    // Vocabulary
    pub use crate::core::{
        ArchConfig, AssignmentEvaluator, CostOracle, Extents, FactorAssignment, FusemeshError,
        Observation, Operation, OracleReport, Primitive, Resource, ResourceCosts,
        SchedulerConfig, SearchConfig,
    };

    // Scheduling
    pub use crate::sched::{
        best_partition_schedule, estimate_costs, measure_costs, measure_scheduled, pinned_costs,
        schedule_graph, DependencyGraph, EinsumGraph, EstimateModel, Schedule,
    };

    // Factor search
    pub use crate::search::{BufferCapacity, CacheIdentity, CandidateSpace, MemoCache, SearchTree};

    // Presets
    pub use crate::presets::{Activation, LayerGroup, LayerShape, LayerStack};
}
