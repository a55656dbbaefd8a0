//! # fusemesh-search
//!
//! Design-space search over tiling factors.
//!
//! - [`candidates`]: complete factor assignments under pinned levels and a
//!   buffer-capacity predicate
//! - [`mcts`]: arena-backed Monte-Carlo tree search driven by an
//!   [`AssignmentEvaluator`](fusemesh_core::AssignmentEvaluator)
//! - [`cache`]: persistent CSV memoization of evaluations with scoped locks
//!
//! ## Quick Start
//!
//! ```
//! use fusemesh_core::{Extents, FactorAssignment, Observation, SearchConfig};
//! use fusemesh_search::{CandidateSpace, SearchTree};
//!
//! let extents: Extents = [("P".to_string(), 8)].into();
//! let candidates = CandidateSpace::new(extents).enumerate(|_| true)?;
//! assert_eq!(candidates.len(), 4);
//!
//! let config = SearchConfig::default().with_dimension_order(["P"]).with_iterations(4);
//! let mut tree = SearchTree::build(candidates, config, None)?;
//! let mut evaluator = |f: &FactorAssignment| -> anyhow::Result<Observation> {
//!     Ok(Observation::new(1.0, f.get("L3", "P").unwrap_or(0) as f64))
//! };
//! let outcome = tree.run(&mut evaluator, None)?;
//! assert_eq!(outcome.best_energy(), Some(1.0));
//! # Ok::<(), fusemesh_core::FusemeshError>(())
//! ```

pub mod cache;
pub mod candidates;
pub mod mcts;

#[cfg(test)]
mod property_tests;

pub use cache::{CacheIdentity, CacheRecord, CacheStats, MemoCache};
pub use candidates::{divisors, BufferCapacity, CandidateSpace};
pub use mcts::{BestAssignment, SearchOutcome, SearchRecord, SearchTree};
