//! Enumeration of complete factor assignments
//!
//! A [`CandidateSpace`] fixes some levels up front (typically the per-mesh
//! compute array) and splits what remains of each extent into an ordered
//! `(outer, inner)` divisor pair. Every combination over all dimensions is
//! one candidate; a caller predicate such as [`BufferCapacity::fits`] keeps
//! only the feasible ones.

use fusemesh_core::{ArchConfig, Extents, FactorAssignment, FusemeshError, Operation, Result};
use std::collections::BTreeMap;

/// Divisors of `n` in ascending order
pub fn divisors(n: u64) -> Vec<u64> {
    let mut small = Vec::new();
    let mut large = Vec::new();
    let mut d = 1;
    while d * d <= n {
        if n % d == 0 {
            small.push(d);
            if d != n / d {
                large.push(n / d);
            }
        }
        d += 1;
    }
    small.extend(large.into_iter().rev());
    small
}

/// Search space of two-level splits under fixed pinned factors
#[derive(Debug, Clone)]
pub struct CandidateSpace {
    extents: Extents,
    outer_level: String,
    inner_level: String,
    pinned: BTreeMap<String, BTreeMap<String, u64>>,
}

impl CandidateSpace {
    /// Split between `DRAM` and `L3` with nothing pinned
    pub fn new(extents: Extents) -> Self {
        Self {
            extents,
            outer_level: "DRAM".to_string(),
            inner_level: "L3".to_string(),
            pinned: BTreeMap::new(),
        }
    }

    /// Search `outer` and `inner` instead of `DRAM` and `L3`
    pub fn with_levels(mut self, outer: impl Into<String>, inner: impl Into<String>) -> Self {
        self.outer_level = outer.into();
        self.inner_level = inner.into();
        self
    }

    /// Fix `level.dim` to `factor` in every candidate
    pub fn with_pinned(mut self, level: impl Into<String>, dim: impl Into<String>, factor: u64) -> Self {
        self.pinned
            .entry(level.into())
            .or_default()
            .insert(dim.into(), factor);
        self
    }

    /// Problem extents the candidates reconstruct
    pub fn extents(&self) -> &Extents {
        &self.extents
    }

    /// Level holding the inner half of each split
    pub fn inner_level(&self) -> &str {
        &self.inner_level
    }

    /// Extent left for the two searched levels, per dimension
    fn remaining(&self) -> Result<Vec<(String, u64)>> {
        for (level, dims) in &self.pinned {
            if *level == self.outer_level || *level == self.inner_level {
                return Err(FusemeshError::invalid_factors(format!(
                    "level '{}' is both pinned and searched",
                    level
                )));
            }
            for (d, f) in dims {
                if !self.extents.contains_key(d) {
                    return Err(FusemeshError::invalid_factors(format!(
                        "{}.{} names an unknown dimension",
                        level, d
                    )));
                }
                if *f == 0 {
                    return Err(FusemeshError::invalid_factors(format!("{}.{} is zero", level, d)));
                }
            }
        }

        self.extents
            .iter()
            .map(|(d, &extent)| {
                let pinned: u64 = self.pinned.values().filter_map(|l| l.get(d)).product();
                if extent == 0 || extent % pinned != 0 {
                    return Err(FusemeshError::invalid_factors(format!(
                        "pinned factors of '{}' ({}) do not divide its extent {}",
                        d, pinned, extent
                    )));
                }
                Ok((d.clone(), extent / pinned))
            })
            .collect()
    }

    /// Number of assignments before filtering
    pub fn size(&self) -> Result<usize> {
        Ok(self
            .remaining()?
            .iter()
            .map(|(_, r)| divisors(*r).len())
            .product())
    }

    /// Every assignment accepted by `accept`, in lexicographic divisor order
    ///
    /// Dimensions vary slowest-first in extent-name order; within a dimension
    /// the inner factor ascends.
    pub fn enumerate<F>(&self, mut accept: F) -> Result<Vec<FactorAssignment>>
    where
        F: FnMut(&FactorAssignment) -> bool,
    {
        let remaining = self.remaining()?;
        let choices: Vec<Vec<u64>> = remaining.iter().map(|(_, r)| divisors(*r)).collect();

        let mut base = FactorAssignment::new();
        for (level, dims) in &self.pinned {
            for (d, f) in dims {
                base.set(level.clone(), d.clone(), *f);
            }
        }

        let mut out = Vec::new();
        let mut considered = 0usize;
        let mut odometer = vec![0usize; choices.len()];
        loop {
            let mut candidate = base.clone();
            for (i, (d, r)) in remaining.iter().enumerate() {
                let inner = choices[i][odometer[i]];
                candidate.set(self.inner_level.clone(), d.clone(), inner);
                candidate.set(self.outer_level.clone(), d.clone(), r / inner);
            }
            considered += 1;
            if accept(&candidate) {
                out.push(candidate);
            }

            // Advance the last dimension fastest
            let mut pos = choices.len();
            loop {
                if pos == 0 {
                    tracing::debug!(considered, accepted = out.len(), "enumerated factor candidates");
                    return Ok(out);
                }
                pos -= 1;
                odometer[pos] += 1;
                if odometer[pos] < choices[pos].len() {
                    break;
                }
                odometer[pos] = 0;
            }
        }
    }
}

/// Buffer-capacity feasibility of an assignment
///
/// The buffered tile of an operation is the per-dimension product of the
/// listed levels' factors. An assignment fits when the largest
/// [`Operation::footprint`] over all operations is within capacity.
#[derive(Debug, Clone)]
pub struct BufferCapacity<'a> {
    operations: &'a [Operation],
    levels: Vec<String>,
    capacity_bytes: u64,
}

impl<'a> BufferCapacity<'a> {
    /// Check `operations` against an explicit byte budget
    ///
    /// # Arguments
    ///
    /// * `operations` - Every operation sharing the buffer
    /// * `levels` - Levels whose factors make up the buffered tile
    /// * `capacity_bytes` - Buffer size
    pub fn new<I, S>(operations: &'a [Operation], levels: I, capacity_bytes: u64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            operations,
            levels: levels.into_iter().map(Into::into).collect(),
            capacity_bytes,
        }
    }

    /// Capacity taken from the architecture's on-chip buffer
    pub fn for_arch<I, S>(operations: &'a [Operation], levels: I, arch: &ArchConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(operations, levels, arch.buffer_bytes())
    }

    /// Byte budget
    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Largest footprint over all operations
    pub fn footprint(&self, factors: &FactorAssignment) -> u64 {
        let levels: Vec<&str> = self.levels.iter().map(String::as_str).collect();
        let tile = factors.combined(&levels);
        self.operations
            .iter()
            .map(|op| op.footprint(&tile))
            .max()
            .unwrap_or(0)
    }

    /// Whether [`BufferCapacity::footprint`] is within the budget
    ///
    /// # Examples
    ///
    /// ```
    /// use fusemesh_core::{FactorAssignment, Operation};
    /// use fusemesh_search::BufferCapacity;
    ///
    /// let ops = [Operation::new("Y", ["P"]).with_input("X", ["P"])];
    /// let capacity = BufferCapacity::new(&ops, ["L3"], 256);
    ///
    /// // Two 64-element tiles of 2 bytes each
    /// let small = FactorAssignment::new().with("L3", "P", 64).with("DRAM", "P", 2);
    /// assert_eq!(capacity.footprint(&small), 256);
    /// assert!(capacity.fits(&small));
    ///
    /// let large = FactorAssignment::new().with("L3", "P", 128);
    /// assert!(!capacity.fits(&large));
    /// ```
    pub fn fits(&self, factors: &FactorAssignment) -> bool {
        self.footprint(factors) <= self.capacity_bytes
    }
}
