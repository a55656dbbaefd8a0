//! # fusemesh-core
//!
//! Shared vocabulary for mapping transformer-layer einsums onto a two-tier
//! accelerator: a pair of compute meshes ("1D" and "2D") fed by a
//! capacity-limited on-chip buffer and off-chip memory.
//!
//! - **Operations** ([`Operation`]): named einsums with index dimensions,
//!   operands and compute-cost weights
//! - **Resources** ([`Resource`], [`ResourceCosts`]): the two mesh types and the
//!   per-operation cost pair the scheduler consumes
//! - **Factor assignments** ([`FactorAssignment`]): per-level tiling factors
//! - **Oracle contracts** ([`CostOracle`], [`AssignmentEvaluator`]): the seam to
//!   the external performance/energy simulator
//! - **Configuration** ([`ArchConfig`], [`SchedulerConfig`], [`SearchConfig`])
//! - **Errors** ([`FusemeshError`])
//!
//! ## Quick Start
//!
//! ```
//! use fusemesh_core::{FactorAssignment, Operation, Primitive, Resource, ResourceCosts};
//!
//! let op = Operation::new("AR", ["B", "S", "P"])
//!     .with_input("FFN", ["B", "S", "P"])
//!     .with_cost(Primitive::Max, 1);
//! assert!(op.is_nonlinear());
//!
//! let costs = ResourceCosts::new().with("AR", 4.0, f64::INFINITY);
//! assert_eq!(costs.cost("AR", Resource::OneD), 4.0);
//!
//! let factors = FactorAssignment::new().with("L3", "P", 4).with("DRAM", "P", 8);
//! assert_eq!(factors.product("P"), 32);
//! ```
//!
//! ## Features
//!
//! - `serde`: Serialize/Deserialize for configuration and data types

pub mod config;
pub mod error;
pub mod factors;
pub mod operation;
pub mod oracle;
pub mod resource;
pub mod tracing_support;

#[cfg(test)]
mod property_tests;

pub use config::{
    AnnealingParams, ArchConfig, LockPolicy, OrderSearch, PreservedEdge, SchedulerConfig,
    SearchConfig,
};
pub use error::{FusemeshError, Result};
pub use factors::FactorAssignment;
pub use operation::{ComputeCost, Extents, Operand, Operation, Primitive, BYTES_PER_ELEMENT};
pub use oracle::{AssignmentEvaluator, CostOracle, Observation, OracleReport};
pub use resource::{CostPair, Resource, ResourceCosts};
