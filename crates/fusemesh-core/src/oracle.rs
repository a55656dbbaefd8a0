//! Contracts with the external cost oracle
//!
//! The oracle is an accelerator performance/energy simulator. fusemesh never
//! computes cycles, energy or traffic itself; it only consumes these numbers.
//! Two seams exist:
//!
//! - [`CostOracle`]: one operation on one resource under one factor assignment,
//!   used to fill the scheduler's cost table
//! - [`AssignmentEvaluator`]: one complete factor assignment for the whole
//!   layer, used by the factor search
//!
//! Both are treated as pure (deterministic for identical inputs) but slow.
//! Failures are returned as `anyhow::Error` and surfaced without retry.

use crate::factors::FactorAssignment;
use crate::operation::Operation;
use crate::resource::Resource;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Raw numbers returned for one operation evaluation
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OracleReport {
    /// Cycles spent computing
    pub compute_latency: f64,
    /// Cycles spent moving data
    pub memory_latency: f64,
    /// Energy in the oracle's units
    pub energy: f64,
    /// Bytes moved across the memory hierarchy
    pub memory_traffic: f64,
    /// Compute units doing useful work
    pub utilized_compute_units: u64,
    /// Compute units available on the resource
    pub total_compute_units: u64,
}

impl OracleReport {
    /// Effective latency: compute and memory overlap, the slower one dominates
    pub fn latency(&self) -> f64 {
        self.compute_latency.max(self.memory_latency)
    }

    /// Fraction of compute units doing useful work
    pub fn utilization(&self) -> f64 {
        if self.total_compute_units == 0 {
            0.0
        } else {
            self.utilized_compute_units as f64 / self.total_compute_units as f64
        }
    }
}

/// Observed cost of a complete factor assignment
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Observation {
    /// Summed latency across operations
    pub latency: f64,
    /// Summed energy; the search minimizes this
    pub energy: f64,
}

impl Observation {
    /// Observation from raw totals
    pub fn new(latency: f64, energy: f64) -> Self {
        Self { latency, energy }
    }
}

/// Per-operation cost oracle
pub trait CostOracle {
    /// Evaluate `operation` on `resource` with its tiling fixed by `factors`
    fn evaluate(
        &self,
        operation: &Operation,
        resource: Resource,
        factors: &FactorAssignment,
    ) -> anyhow::Result<OracleReport>;
}

impl<F> CostOracle for F
where
    F: Fn(&Operation, Resource, &FactorAssignment) -> anyhow::Result<OracleReport>,
{
    fn evaluate(
        &self,
        operation: &Operation,
        resource: Resource,
        factors: &FactorAssignment,
    ) -> anyhow::Result<OracleReport> {
        self(operation, resource, factors)
    }
}

/// Whole-layer evaluator driven by the factor search
pub trait AssignmentEvaluator {
    fn evaluate(&mut self, factors: &FactorAssignment) -> anyhow::Result<Observation>;
}

impl<F> AssignmentEvaluator for F
where
    F: FnMut(&FactorAssignment) -> anyhow::Result<Observation>,
{
    fn evaluate(&mut self, factors: &FactorAssignment) -> anyhow::Result<Observation> {
        self(factors)
    }
}
