//! Error taxonomy shared by every fusemesh crate
//!
//! # Design
//!
//! - **Graph errors**: malformed or oversized dependency graphs are fatal and never retried
//! - **Search errors**: an empty candidate list fails before the first iteration
//! - **Resource errors**: an operation no resource can execute is surfaced, not dropped
//! - **Cache errors**: lock timeouts and malformed rows fail loudly; plain read
//!   failures are downgraded to cache misses by the cache itself
//! - **Oracle errors**: wrapped as-is and surfaced to the caller
//!
//! # Examples
//!
//! ```
//! use fusemesh_core::error::{FusemeshError, Result};
//!
//! fn require_nodes(count: usize) -> Result<()> {
//!     if count == 0 {
//!         return Err(FusemeshError::malformed("graph has no operations"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(require_nodes(0).is_err());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, FusemeshError>;

/// Top-level error type for scheduling and design-space search
#[derive(Error, Debug)]
pub enum FusemeshError {
    /// Cycle detected, missing source/sink, or duplicated operation
    #[error("Malformed graph: {reason}")]
    MalformedGraph { reason: String },

    /// An edge or cost entry names an operation that was never declared
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),

    /// Exhaustive enumeration refused for a graph above the configured guard
    #[error("Graph too large for exhaustive enumeration: {nodes} operations (limit {limit})")]
    GraphTooLarge { nodes: usize, limit: usize },

    /// `best_schedule` received no operation order
    #[error("No operation order to schedule")]
    EmptyOrderSet,

    /// The factor search received no candidates
    #[error("Empty search space: no factor candidates to explore")]
    EmptySearchSpace,

    /// Both resource costs are infinite
    #[error("Operation '{operation}' cannot run on any resource")]
    InvalidResource { operation: String },

    /// A factor assignment violates its structural invariants
    #[error("Invalid factor assignment: {reason}")]
    InvalidFactors { reason: String },

    /// The scoped cache lock could not be acquired within the retry budget
    #[error("Could not lock cache file {path:?} after {attempts} attempts")]
    CacheLockTimeout { path: PathBuf, attempts: usize },

    /// A persisted cache row could not be parsed
    #[error("Malformed cache file {path:?} at line {line}: {reason}")]
    CacheFormat {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    /// A record's key columns disagree with the cache file header
    #[error("Cache file {path:?} header does not match the factor key columns")]
    CacheSchemaMismatch { path: PathBuf },

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The external cost oracle failed
    #[error("Cost oracle failed: {0}")]
    Oracle(#[source] anyhow::Error),
}

impl FusemeshError {
    /// Shorthand for [`FusemeshError::MalformedGraph`]
    pub fn malformed(reason: impl Into<String>) -> Self {
        FusemeshError::MalformedGraph {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`FusemeshError::InvalidFactors`]
    pub fn invalid_factors(reason: impl Into<String>) -> Self {
        FusemeshError::InvalidFactors {
            reason: reason.into(),
        }
    }

    /// Whether this error came from the cost oracle
    pub fn is_oracle(&self) -> bool {
        matches!(self, FusemeshError::Oracle(_))
    }
}
