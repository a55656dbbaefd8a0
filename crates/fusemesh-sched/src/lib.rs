//! # fusemesh-sched
//!
//! Scheduling of einsum operations over the two compute meshes.
//!
//! - [`graph`]: dependency graphs, topological-order enumeration, [`EinsumGraph`]
//! - [`scheduler`]: dual-resource list scheduling and best-order search
//! - [`annealing`]: order search for graphs too large to enumerate
//! - [`partition`]: two-way DAG partitions and the best schedule across them
//! - [`estimate`]: analytic cost pairs from compute counts
//! - [`measure`]: cost pairs from the external oracle
//!
//! ## Quick Start
//!
//! ```
//! use fusemesh_core::{ResourceCosts, SchedulerConfig};
//! use fusemesh_sched::{best_partition_schedule, DependencyGraph};
//!
//! let graph = DependencyGraph::from_successors([
//!     ("A", vec!["B"]),
//!     ("B", vec!["C"]),
//!     ("C", vec!["D"]),
//!     ("D", vec![]),
//! ]);
//! let costs = ResourceCosts::new()
//!     .with("A", 1.0, 10.0)
//!     .with("B", 1.0, 10.0)
//!     .with("C", 10.0, 1.0)
//!     .with("D", 10.0, 1.0);
//!
//! let best = best_partition_schedule(&graph, &costs, &SchedulerConfig::default())?;
//! assert_eq!(best.makespan(), 2.0);
//! # Ok::<(), fusemesh_core::FusemeshError>(())
//! ```

pub mod annealing;
pub mod estimate;
pub mod graph;
pub mod measure;
pub mod partition;
pub mod scheduler;


pub use annealing::anneal_order;
pub use estimate::{estimate_costs, estimate_operation, EstimateModel};
pub use graph::{DependencyGraph, EinsumGraph, TopologicalOrders, ROOT};
pub use measure::{
    measure_costs, measure_costs_parallel, measure_scheduled, pinned_costs, MeasuredSchedule,
};
pub use partition::{best_partition_schedule, partitions, PartitionedSchedule};
pub use scheduler::{
    best_schedule, schedule, schedule_graph, ListScheduler, Schedule, ScheduleEntry,
};
