//! Einsum operations and their compute-cost weights
//!
//! An [`Operation`] is immutable once built: it names the tensor it produces,
//! the index dimensions of that tensor, its input operands and how many of each
//! arithmetic primitive one output point costs.
//!
//! # Examples
//!
//! ```
//! use fusemesh_core::{Extents, Operation, Primitive};
//!
//! let qk = Operation::new("QK", ["B", "H", "M", "N", "P"])
//!     .with_input("Q", ["B", "E", "H", "P"])
//!     .with_input("BK", ["B", "E", "H", "M", "N"])
//!     .with_cost(Primitive::Mac, 1);
//!
//! let extents: Extents = [("B", 1), ("E", 64), ("H", 16), ("M", 4), ("N", 256), ("P", 1024)]
//!     .into_iter()
//!     .map(|(d, v)| (d.to_string(), v))
//!     .collect();
//!
//! assert_eq!(qk.all_dims(), vec!["B", "H", "M", "N", "P", "E"]);
//! assert_eq!(qk.compute_count(&extents).unwrap(), 16 * 4 * 256 * 1024 * 64);
//! ```

use crate::error::{FusemeshError, Result};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Problem extent of every index dimension, keyed by dimension name
pub type Extents = BTreeMap<String, u64>;

/// Bytes per tensor element held in the on-chip buffer (16-bit values)
pub const BYTES_PER_ELEMENT: u64 = 2;

/// Arithmetic primitive counted by the compute-cost weights
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Primitive {
    /// Multiply-accumulate
    Mac,
    /// Running maximum
    Max,
    /// Addition
    Add,
    /// Division
    Divide,
}

impl Primitive {
    /// Primitives the 2D mesh cannot execute
    pub fn is_nonlinear(self) -> bool {
        matches!(self, Primitive::Max | Primitive::Divide)
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Primitive::Mac => "mac",
            Primitive::Max => "max",
            Primitive::Add => "add",
            Primitive::Divide => "divide",
        };
        f.write_str(s)
    }
}

/// Compute-cost weight vector of one operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ComputeCost {
    weights: BTreeMap<Primitive, u64>,
}

impl ComputeCost {
    /// Cost with no primitives
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: set the weight of one primitive
    pub fn with(mut self, primitive: Primitive, weight: u64) -> Self {
        self.weights.insert(primitive, weight);
        self
    }

    /// Weight of `primitive`, 0 when unused
    pub fn weight(&self, primitive: Primitive) -> u64 {
        self.weights.get(&primitive).copied().unwrap_or(0)
    }

    /// Sum of all weights
    pub fn total(&self) -> u64 {
        self.weights.values().sum()
    }

    /// Whether `primitive` has an entry, even one of weight 0
    pub fn uses(&self, primitive: Primitive) -> bool {
        self.weights.contains_key(&primitive)
    }

    /// Whether any primitive rules out the 2D mesh
    pub fn is_nonlinear(&self) -> bool {
        self.weights.keys().any(|p| p.is_nonlinear())
    }

    pub fn iter(&self) -> impl Iterator<Item = (Primitive, u64)> + '_ {
        self.weights.iter().map(|(p, w)| (*p, *w))
    }
}

/// Named input tensor of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Operand {
    /// Tensor name, usually the producing operation
    pub name: String,
    /// Index dimensions of the tensor
    pub dims: Vec<String>,
}

impl Operand {
    /// Operand from a name and its dimensions
    pub fn new<I, S>(name: impl Into<String>, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            dims: dims.into_iter().map(Into::into).collect(),
        }
    }
}

/// A named einsum with explicit index dimensions
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Operation {
    /// Operation (and output tensor) name
    pub name: String,
    /// Dimensions of the produced tensor
    pub dims: Vec<String>,
    /// Input operands
    pub inputs: Vec<Operand>,
    /// Per-output-point primitive counts
    pub compute_cost: ComputeCost,
}

impl Operation {
    /// Operation producing `name` over `dims`, with no inputs and no cost
    ///
    /// # Arguments
    ///
    /// * `name` - Operation and output tensor name
    /// * `dims` - Output dimensions, in order
    pub fn new<I, S>(name: impl Into<String>, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            dims: dims.into_iter().map(Into::into).collect(),
            inputs: Vec::new(),
            compute_cost: ComputeCost::new(),
        }
    }

    /// Builder: append an input operand
    pub fn with_input<I, S>(mut self, name: impl Into<String>, dims: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs.push(Operand::new(name, dims));
        self
    }

    /// Builder: set the weight of one primitive
    pub fn with_cost(mut self, primitive: Primitive, weight: u64) -> Self {
        self.compute_cost = self.compute_cost.with(primitive, weight);
        self
    }

    /// Builder: replace the whole cost vector
    pub fn with_compute_cost(mut self, cost: ComputeCost) -> Self {
        self.compute_cost = cost;
        self
    }

    /// Output dimensions followed by input-only dimensions, first occurrence wins
    pub fn all_dims(&self) -> Vec<&str> {
        let mut dims: Vec<&str> = Vec::new();
        let all = self
            .dims
            .iter()
            .chain(self.inputs.iter().flat_map(|i| i.dims.iter()));
        for d in all {
            if !dims.contains(&d.as_str()) {
                dims.push(d.as_str());
            }
        }
        dims
    }

    /// Whether the operation must run on the 1D mesh
    pub fn is_nonlinear(&self) -> bool {
        self.compute_cost.is_nonlinear()
    }

    /// Primitive operations needed to evaluate the whole einsum
    ///
    /// The product of the extents of [`Operation::all_dims`] times the summed
    /// primitive weights. Saturates instead of overflowing.
    ///
    /// # Errors
    ///
    /// [`FusemeshError::InvalidFactors`] when `extents` lacks a dimension the
    /// operation touches.
    pub fn compute_count(&self, extents: &Extents) -> Result<u64> {
        let mut points: u64 = 1;
        for d in self.all_dims() {
            let extent = extents.get(d).ok_or_else(|| {
                FusemeshError::invalid_factors(format!(
                    "no extent for dimension '{}' of operation '{}'",
                    d, self.name
                ))
            })?;
            points = points.saturating_mul(*extent);
        }
        Ok(points.saturating_mul(self.compute_cost.total()))
    }

    /// Buffer bytes occupied by the output and every input under one level's tile
    ///
    /// Dimensions absent from `level_factors` count as 1.
    pub fn footprint(&self, level_factors: &BTreeMap<String, u64>) -> u64 {
        let tile = |dims: &[String]| -> u64 {
            dims.iter()
                .map(|d| level_factors.get(d).copied().unwrap_or(1))
                .product()
        };
        let elements: u64 = tile(&self.dims) + self.inputs.iter().map(|i| tile(&i.dims)).sum::<u64>();
        elements * BYTES_PER_ELEMENT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extents(pairs: &[(&str, u64)]) -> Extents {
        pairs.iter().map(|(d, v)| (d.to_string(), *v)).collect()
    }

    #[test]
    fn test_all_dims_order() {
        let op = Operation::new("SLNV", ["B", "F", "H", "M", "P"])
            .with_input("BV", ["B", "F", "H", "M", "N"])
            .with_input("SLN", ["B", "H", "M", "N", "P"]);
        assert_eq!(op.all_dims(), vec!["B", "F", "H", "M", "P", "N"]);
    }

    #[test]
    fn test_compute_count_sums_weights() {
        let op = Operation::new("PRM", ["B", "H", "M", "P"])
            .with_input("RM", ["B", "H", "M", "P"])
            .with_cost(Primitive::Mac, 6)
            .with_cost(Primitive::Add, 1);
        let e = extents(&[("B", 2), ("H", 3), ("M", 4), ("P", 5)]);
        assert_eq!(op.compute_count(&e).unwrap(), 2 * 3 * 4 * 5 * 7);
    }

    #[test]
    fn test_compute_count_missing_extent() {
        let op = Operation::new("X", ["Z"]).with_cost(Primitive::Add, 1);
        assert!(op.compute_count(&Extents::new()).is_err());
    }

    #[test]
    fn test_nonlinear_detection() {
        let lm = Operation::new("LM", ["P"]).with_cost(Primitive::Max, 1);
        let qk = Operation::new("QK", ["P"]).with_cost(Primitive::Mac, 1);
        assert!(lm.is_nonlinear());
        assert!(!qk.is_nonlinear());
        assert!(Primitive::Divide.is_nonlinear());
        assert_eq!(Primitive::Divide.to_string(), "divide");
    }

    #[test]
    fn test_footprint() {
        let op = Operation::new("AR", ["B", "S"]).with_input("FFN", ["B", "S", "P"]);
        let tile = extents(&[("B", 2), ("S", 4), ("P", 8)]);
        // (2*4 + 2*4*8) elements * 2 bytes
        assert_eq!(op.footprint(&tile), (8 + 64) * 2);
        // missing dims count as one
        assert_eq!(op.footprint(&Extents::new()), 2 * 2);
    }
}
