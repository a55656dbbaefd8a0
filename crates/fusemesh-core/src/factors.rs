//! Tiling-factor assignments
//!
//! A [`FactorAssignment`] maps a storage/compute level ("DRAM", "L3", "PE", ...)
//! to per-dimension tile factors. For every dimension, the product of its
//! factors across all levels reconstructs the problem extent.
//!
//! Levels and dimensions are kept in sorted maps so that [`FactorAssignment::flatten`]
//! is canonical: two equal assignments always flatten to the same key, which is
//! what the persistent memoization cache matches on.
//!
//! # Examples
//!
//! ```
//! use fusemesh_core::{Extents, FactorAssignment};
//!
//! let factors = FactorAssignment::new()
//!     .with("DRAM", "P", 4)
//!     .with("L3", "P", 8)
//!     .with("PE", "P", 32);
//!
//! let extents: Extents = [("P".to_string(), 1024)].into_iter().collect();
//! factors.validate(&extents)?;
//! assert_eq!(factors.product("P"), 1024);
//! assert_eq!(factors.to_string(), "{DRAM.P=4, L3.P=8, PE.P=32}");
//! # Ok::<(), fusemesh_core::FusemeshError>(())
//! ```

use crate::error::{FusemeshError, Result};
use crate::operation::Extents;
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-level, per-dimension tile factors
///
/// # Design
///
/// - Levels and dimensions live in nested `BTreeMap`s, so iteration order,
///   equality and hashing do not depend on insertion order
/// - A dimension missing from a level contributes a factor of 1
/// - Nothing is checked on insertion; [`FactorAssignment::validate`] checks
///   the whole assignment against the problem extents
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FactorAssignment {
    levels: BTreeMap<String, BTreeMap<String, u64>>,
}

impl FactorAssignment {
    /// Create an assignment with no levels
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one factor, replacing any previous value
    pub fn set(&mut self, level: impl Into<String>, dim: impl Into<String>, factor: u64) {
        self.levels
            .entry(level.into())
            .or_default()
            .insert(dim.into(), factor);
    }

    /// Builder-style [`FactorAssignment::set`]
    pub fn with(mut self, level: impl Into<String>, dim: impl Into<String>, factor: u64) -> Self {
        self.set(level, dim, factor);
        self
    }

    /// Replace a whole level
    pub fn with_level(mut self, level: impl Into<String>, factors: BTreeMap<String, u64>) -> Self {
        self.levels.insert(level.into(), factors);
        self
    }

    /// Factor of `dim` at `level`
    ///
    /// # Arguments
    ///
    /// * `level` - Storage or compute level, e.g. `"L3"`
    /// * `dim` - Index dimension, e.g. `"P"`
    ///
    /// # Returns
    ///
    /// `None` when the level does not exist or does not tile `dim`. Callers
    /// that want the implicit factor of 1 should use `unwrap_or(1)`.
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_core::FactorAssignment;
    ///
    /// let factors = FactorAssignment::new().with("L3", "P", 8);
    /// assert_eq!(factors.get("L3", "P"), Some(8));
    /// assert_eq!(factors.get("L3", "B"), None);
    /// assert_eq!(factors.get("PE", "P"), None);
    /// ```
    pub fn get(&self, level: &str, dim: &str) -> Option<u64> {
        self.levels.get(level).and_then(|l| l.get(dim)).copied()
    }

    /// All factors of one level, keyed by dimension
    pub fn level(&self, level: &str) -> Option<&BTreeMap<String, u64>> {
        self.levels.get(level)
    }

    /// Level names in sorted order
    pub fn level_names(&self) -> impl Iterator<Item = &str> {
        self.levels.keys().map(String::as_str)
    }

    /// Whether no level holds any factor
    pub fn is_empty(&self) -> bool {
        self.levels.values().all(BTreeMap::is_empty)
    }

    /// Every dimension mentioned at any level
    pub fn dims(&self) -> Vec<&str> {
        let mut dims: Vec<&str> = self
            .levels
            .values()
            .flat_map(|l| l.keys().map(String::as_str))
            .collect();
        dims.sort_unstable();
        dims.dedup();
        dims
    }

    /// Product of a dimension's factors across all levels
    pub fn product(&self, dim: &str) -> u64 {
        self.levels
            .values()
            .filter_map(|l| l.get(dim))
            .product()
    }

    /// Per-dimension product of the listed levels only
    ///
    /// This is the tile a buffer sees when it sits below several levels.
    /// Unknown level names are skipped.
    ///
    /// # Arguments
    ///
    /// * `levels` - Levels whose factors are multiplied together
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_core::FactorAssignment;
    ///
    /// let factors = FactorAssignment::new()
    ///     .with("L3", "P", 8)
    ///     .with("PE", "P", 32)
    ///     .with("PE", "B", 2);
    /// let tile = factors.combined(&["L3", "PE", "L1"]);
    /// assert_eq!(tile["P"], 256);
    /// assert_eq!(tile["B"], 2);
    /// ```
    pub fn combined(&self, levels: &[&str]) -> BTreeMap<String, u64> {
        let mut out: BTreeMap<String, u64> = BTreeMap::new();
        for name in levels {
            if let Some(level) = self.levels.get(*name) {
                for (d, f) in level {
                    *out.entry(d.clone()).or_insert(1) *= f;
                }
            }
        }
        out
    }

    /// Copy keeping only the given dimensions, dropping levels left empty
    pub fn restrict(&self, dims: &[&str]) -> Self {
        let levels = self
            .levels
            .iter()
            .map(|(name, level)| {
                let kept: BTreeMap<String, u64> = level
                    .iter()
                    .filter(|(d, _)| dims.contains(&d.as_str()))
                    .map(|(d, f)| (d.clone(), *f))
                    .collect();
                (name.clone(), kept)
            })
            .filter(|(_, level)| !level.is_empty())
            .collect();
        Self { levels }
    }

    /// Canonical `level.dim -> factor` flattening, sorted by level then dimension
    pub fn flatten(&self) -> Vec<(String, u64)> {
        self.levels
            .iter()
            .flat_map(|(level, dims)| {
                dims.iter()
                    .map(move |(d, f)| (format!("{}.{}", level, d), *f))
            })
            .collect()
    }

    /// Inverse of [`FactorAssignment::flatten`]
    pub fn from_flat<I, S>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u64)>,
        S: AsRef<str>,
    {
        let mut out = Self::new();
        for (key, factor) in entries {
            let key = key.as_ref();
            let (level, dim) = key.split_once('.').ok_or_else(|| {
                FusemeshError::invalid_factors(format!("key '{}' is not of the form level.dim", key))
            })?;
            out.set(level, dim, factor);
        }
        Ok(out)
    }

    /// Check positivity and the extent-product invariant
    ///
    /// # Arguments
    ///
    /// * `extents` - Problem extent of every dimension
    ///
    /// # Errors
    ///
    /// [`FusemeshError::InvalidFactors`] when
    ///
    /// - any factor is zero
    /// - a factor names a dimension absent from `extents`
    /// - the factors of some dimension do not multiply to its extent
    pub fn validate(&self, extents: &Extents) -> Result<()> {
        for (level, dims) in &self.levels {
            for (d, f) in dims {
                if *f == 0 {
                    return Err(FusemeshError::invalid_factors(format!(
                        "{}.{} is zero",
                        level, d
                    )));
                }
                if !extents.contains_key(d) {
                    return Err(FusemeshError::invalid_factors(format!(
                        "{}.{} names an unknown dimension",
                        level, d
                    )));
                }
            }
        }
        for (d, extent) in extents {
            let product = self.product(d);
            if product != *extent {
                return Err(FusemeshError::invalid_factors(format!(
                    "factors of '{}' multiply to {} but the extent is {}",
                    d, product, extent
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for FactorAssignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .flatten()
            .into_iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FactorAssignment {
        FactorAssignment::new()
            .with("DRAM", "P", 4)
            .with("L3", "P", 8)
            .with("PE", "P", 32)
            .with("DRAM", "B", 1)
            .with("L3", "B", 2)
    }

    #[test]
    fn test_flatten_is_sorted() {
        let flat = sample().flatten();
        let keys: Vec<&str> = flat.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["DRAM.B", "DRAM.P", "L3.B", "L3.P", "PE.P"]);
    }

    #[test]
    fn test_from_flat_roundtrip() {
        let a = sample();
        let b = FactorAssignment::from_flat(a.flatten()).unwrap();
        assert_eq!(a, b);
        assert!(FactorAssignment::from_flat([("nodot", 1u64)]).is_err());
    }

    #[test]
    fn test_validate_products() {
        let a = sample();
        let extents: Extents = [("P".to_string(), 1024), ("B".to_string(), 2)].into();
        assert!(a.validate(&extents).is_ok());

        let wrong: Extents = [("P".to_string(), 512), ("B".to_string(), 2)].into();
        assert!(a.validate(&wrong).is_err());

        let zero = a.clone().with("PE", "B", 0);
        assert!(zero.validate(&extents).is_err());
    }

    #[test]
    fn test_restrict_and_combined() {
        let a = sample();
        let only_p = a.restrict(&["P"]);
        assert_eq!(only_p.dims(), vec!["P"]);
        assert_eq!(only_p.get("L3", "B"), None);

        let inner = a.combined(&["L3", "PE"]);
        assert_eq!(inner["P"], 256);
        assert_eq!(inner["B"], 2);
    }

    #[test]
    fn test_display() {
        let a = FactorAssignment::new().with("L3", "B", 2);
        assert_eq!(a.to_string(), "{L3.B=2}");
    }
}
