//! Compute resources and per-resource operation costs
//!
//! The hardware model exposes exactly two compute-array types. Every operation
//! carries one cost per type; `f64::INFINITY` marks a resource the operation
//! cannot use.
//!
//! # Examples
//!
//! ```
//! use fusemesh_core::{Resource, ResourceCosts};
//!
//! let costs = ResourceCosts::new()
//!     .with("QK", 4.0, 1.0)
//!     .with("SM", 2.0, f64::INFINITY);
//! costs.validate()?;
//! assert_eq!(costs.cost("QK", Resource::TwoD), 1.0);
//! assert!(costs.cost("SM", Resource::TwoD).is_infinite());
//! # Ok::<(), fusemesh_core::FusemeshError>(())
//! ```

use crate::error::{FusemeshError, Result};
use std::collections::HashMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Compute-array type an operation can be assigned to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Resource {
    /// Vector-style 1D mesh
    OneD,
    /// Systolic-style 2D mesh
    TwoD,
}

impl Resource {
    /// All resources, in index order
    pub const ALL: [Resource; 2] = [Resource::OneD, Resource::TwoD];

    /// Position of this resource in a cost pair
    pub fn index(self) -> usize {
        match self {
            Resource::OneD => 0,
            Resource::TwoD => 1,
        }
    }

    /// Inverse of [`Resource::index`]
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Resource::OneD),
            1 => Some(Resource::TwoD),
            _ => None,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::OneD => write!(f, "1d"),
            Resource::TwoD => write!(f, "2d"),
        }
    }
}

/// Cost of one operation on each resource
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CostPair {
    /// Latency on the 1D mesh
    pub one_d: f64,
    /// Latency on the 2D mesh
    pub two_d: f64,
}

impl CostPair {
    /// Pair from explicit per-resource costs
    pub fn new(one_d: f64, two_d: f64) -> Self {
        Self { one_d, two_d }
    }

    /// Zero cost on both resources (synthetic root, glue operations)
    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Cost pair allowing only `resource`
    pub fn only(resource: Resource, cost: f64) -> Self {
        match resource {
            Resource::OneD => Self::new(cost, f64::INFINITY),
            Resource::TwoD => Self::new(f64::INFINITY, cost),
        }
    }

    /// Cost on `resource`
    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::OneD => self.one_d,
            Resource::TwoD => self.two_d,
        }
    }

    /// Overwrite the cost on `resource`
    pub fn set(&mut self, resource: Resource, cost: f64) {
        match resource {
            Resource::OneD => self.one_d = cost,
            Resource::TwoD => self.two_d = cost,
        }
    }

    /// At least one resource can run the operation
    pub fn is_schedulable(&self) -> bool {
        self.one_d.is_finite() || self.two_d.is_finite()
    }
}

/// Table of per-resource costs keyed by operation name
///
/// Operations missing from the table are treated as free on both resources,
/// matching how the synthetic scheduling root is handled.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResourceCosts {
    costs: HashMap<String, CostPair>,
}

impl ResourceCosts {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(name, cost_1d, cost_2d)` triples
    pub fn from_pairs<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, f64, f64)>,
        S: Into<String>,
    {
        let costs = entries
            .into_iter()
            .map(|(name, a, b)| (name.into(), CostPair::new(a, b)))
            .collect();
        Self { costs }
    }

    /// Insert or replace the cost pair of `name`
    pub fn insert(&mut self, name: impl Into<String>, pair: CostPair) {
        self.costs.insert(name.into(), pair);
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, one_d: f64, two_d: f64) -> Self {
        self.insert(name, CostPair::new(one_d, two_d));
        self
    }

    /// Cost pair of `name`, zero when absent
    ///
    /// The synthetic root and glue nodes have no entry, so they cost nothing
    /// on either mesh.
    ///
    /// # Arguments
    ///
    /// * `name` - Operation name
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_core::{CostPair, ResourceCosts};
    ///
    /// let costs = ResourceCosts::new().with("FFN", 8.0, 2.0);
    /// assert_eq!(costs.pair("FFN"), CostPair::new(8.0, 2.0));
    /// assert_eq!(costs.pair("ROOT"), CostPair::zero());
    /// ```
    pub fn pair(&self, name: &str) -> CostPair {
        self.costs.get(name).copied().unwrap_or_else(CostPair::zero)
    }

    /// Cost of `name` on `resource`, zero when absent
    ///
    /// # Arguments
    ///
    /// * `name` - Operation name
    /// * `resource` - Mesh to look up
    pub fn cost(&self, name: &str, resource: Resource) -> f64 {
        self.pair(name).get(resource)
    }

    /// Whether `name` has an explicit entry
    pub fn contains(&self, name: &str) -> bool {
        self.costs.contains_key(name)
    }

    /// Number of explicit entries
    pub fn len(&self) -> usize {
        self.costs.len()
    }

    /// Whether the table has no entries
    pub fn is_empty(&self) -> bool {
        self.costs.is_empty()
    }

    /// Entries in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CostPair)> {
        self.costs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Fail with [`FusemeshError::InvalidResource`] on the first entry no resource can run
    pub fn validate(&self) -> Result<()> {
        let mut names: Vec<&String> = self.costs.keys().collect();
        names.sort();
        for name in names {
            if !self.costs[name].is_schedulable() {
                return Err(FusemeshError::InvalidResource {
                    operation: name.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_index_roundtrip() {
        for r in Resource::ALL {
            assert_eq!(Resource::from_index(r.index()), Some(r));
        }
        assert_eq!(Resource::from_index(2), None);
        assert_eq!(Resource::TwoD.to_string(), "2d");
    }

    #[test]
    fn test_cost_pair_only() {
        let pair = CostPair::only(Resource::OneD, 3.0);
        assert_eq!(pair.get(Resource::OneD), 3.0);
        assert!(pair.get(Resource::TwoD).is_infinite());
        assert!(pair.is_schedulable());
        assert!(!CostPair::new(f64::INFINITY, f64::INFINITY).is_schedulable());
    }

    #[test]
    fn test_missing_entries_are_free() {
        let costs = ResourceCosts::new().with("A", 2.0, 5.0);
        assert_eq!(costs.cost("A", Resource::TwoD), 5.0);
        assert_eq!(costs.cost("ROOT", Resource::OneD), 0.0);
        assert!(!costs.contains("ROOT"));
    }

    #[test]
    fn test_validate_rejects_unschedulable() {
        let costs = ResourceCosts::from_pairs([("A", 1.0, 1.0), ("B", f64::INFINITY, f64::INFINITY)]);
        match costs.validate() {
            Err(FusemeshError::InvalidResource { operation }) => assert_eq!(operation, "B"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
