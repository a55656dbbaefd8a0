//! Analytic per-resource cost estimates
//!
//! Before any oracle call the scheduler needs a cost pair for every
//! operation. The estimate assumes perfect utilization of whatever part of
//! each mesh an operation can occupy, chosen by an [`EstimateModel`]:
//!
//! | model | operation | 1D divisor | 2D divisor |
//! |-------|-----------|------------|------------|
//! | any | default | `mesh_1d` | `mesh_2d²` |
//! | [`EstimateModel::Attention`] | no `N` dimension | `pe_p · pe_h` | `mesh_2d · h` |
//! | [`EstimateModel::Normalization`] | lacks `H` or `F` | `min(mesh_1d, mesh_2d)` | `mesh_2d` |
//!
//! Here `h` is the head parallelism, `pe_p = min(mesh_1d, mesh_2d)` and
//! `pe_h = min(mesh_1d / pe_p, h)`. Attention operations without the inner
//! key dimension `N` only spread over the query rows (and up to `h` heads);
//! normalization reductions over `B, P` only fill one mesh row.
//!
//! Nonlinear operations (max, divide) cannot run on the 2D mesh under any
//! model.

use crate::graph::EinsumGraph;
use fusemesh_core::{ArchConfig, CostPair, Extents, FusemeshError, Operation, ResourceCosts, Result};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How an einsum group maps onto the two meshes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EstimateModel {
    /// Every operation fills the whole mesh
    #[default]
    Uniform,
    /// Multi-head attention; `head_parallelism` heads run side by side on
    /// operations without the `N` dimension
    Attention { head_parallelism: u64 },
    /// Residual add and layer normalisation
    Normalization,
}

impl EstimateModel {
    /// Attention with one head at a time
    pub fn attention() -> Self {
        EstimateModel::Attention { head_parallelism: 1 }
    }

    /// Operations per cycle on `(1D, 2D)` for `operation`
    ///
    /// # Errors
    ///
    /// [`FusemeshError::InvalidFactors`] if the head parallelism is zero.
    pub fn throughput(&self, operation: &Operation, arch: &ArchConfig) -> Result<(u64, u64)> {
        let dims = operation.all_dims();
        let has = |d: &str| dims.contains(&d);
        let uniform = (arch.mesh_1d, arch.mesh_2d_units());

        match *self {
            EstimateModel::Uniform => Ok(uniform),
            EstimateModel::Attention { head_parallelism: 0 } => Err(FusemeshError::invalid_factors(
                "attention head parallelism must be at least 1",
            )),
            EstimateModel::Attention { .. } if has("N") => Ok(uniform),
            EstimateModel::Attention { head_parallelism } => {
                let pe_p = arch.mesh_1d.min(arch.mesh_2d);
                let pe_h = (arch.mesh_1d / pe_p).min(head_parallelism);
                Ok((pe_p * pe_h, arch.mesh_2d * head_parallelism))
            }
            EstimateModel::Normalization if has("H") && has("F") => Ok(uniform),
            EstimateModel::Normalization => Ok((arch.mesh_1d.min(arch.mesh_2d), arch.mesh_2d)),
        }
    }
}

/// Ideal-throughput latency of `operation` on each mesh, in seconds
///
/// # Arguments
///
/// * `operation` - The einsum to estimate
/// * `extents` - Problem size of every dimension the einsum touches
/// * `arch` - Mesh sizes and clock
/// * `model` - How the einsum's group maps onto the meshes
///
/// # Errors
///
/// [`FusemeshError::InvalidFactors`] for an empty mesh, a missing clock, a
/// zero head parallelism or a dimension without an extent.
///
/// # Examples
///
/// ```
/// use fusemesh_core::{ArchConfig, Operation, Primitive};
/// use fusemesh_sched::{estimate_operation, EstimateModel};
///
/// let rm = Operation::new("RM", ["B", "P"]).with_cost(Primitive::Max, 1);
/// let extents: fusemesh_core::Extents = [("B".to_string(), 1), ("P".to_string(), 940)].into();
/// let pair = estimate_operation(&rm, &extents, &ArchConfig::edge(), EstimateModel::attention())?;
/// assert!((pair.one_d - 940.0 / 16.0 / 940e6).abs() < 1e-18);
/// assert!(pair.two_d.is_infinite());
/// # Ok::<(), fusemesh_core::FusemeshError>(())
/// ```
pub fn estimate_operation(
    operation: &Operation,
    extents: &Extents,
    arch: &ArchConfig,
    model: EstimateModel,
) -> Result<CostPair> {
    if arch.mesh_1d == 0 || arch.mesh_2d == 0 || arch.clock_hz <= 0.0 {
        return Err(FusemeshError::invalid_factors(format!(
            "architecture '{}' has an empty mesh or no clock",
            arch.name
        )));
    }
    let (lanes_1d, lanes_2d) = model.throughput(operation, arch)?;
    let count = operation.compute_count(extents)? as f64;
    let one_d = count / lanes_1d as f64 / arch.clock_hz;
    let two_d = if operation.is_nonlinear() {
        f64::INFINITY
    } else {
        count / lanes_2d as f64 / arch.clock_hz
    };
    Ok(CostPair::new(one_d, two_d))
}

/// Estimated cost table for every operation of `graph`
pub fn estimate_costs(
    graph: &EinsumGraph,
    extents: &Extents,
    arch: &ArchConfig,
    model: EstimateModel,
) -> Result<ResourceCosts> {
    let mut costs = ResourceCosts::new();
    for op in graph.operations() {
        costs.insert(op.name.clone(), estimate_operation(op, extents, arch, model)?);
    }
    tracing::debug!(operations = costs.len(), arch = %arch.name, ?model, "estimated resource costs");
    Ok(costs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusemesh_core::Primitive;

    const CLOCK: f64 = 940e6;

    fn extents() -> Extents {
        [
            ("B".to_string(), 2),
            ("E".to_string(), 64),
            ("F".to_string(), 4),
            ("H".to_string(), 2),
            ("M".to_string(), 4),
            ("N".to_string(), 16),
            ("P".to_string(), 1024),
        ]
        .into()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() <= 1e-12 * b.abs()
    }

    #[test]
    fn test_linear_operation() {
        let op = Operation::new("Q", ["B", "P", "E"]).with_cost(Primitive::Mac, 1);
        let arch = ArchConfig::cloud();
        let pair = estimate_operation(&op, &extents(), &arch, EstimateModel::Uniform).unwrap();
        let count = 2.0 * 1024.0 * 64.0;
        assert!(close(pair.one_d, count / 256.0 / CLOCK));
        assert!(close(pair.two_d, count / 65536.0 / CLOCK));
        assert!(pair.two_d < pair.one_d);
    }

    #[test]
    fn test_nonlinear_forbids_two_d() {
        let op = Operation::new("SLD", ["B", "P"]).with_cost(Primitive::Divide, 1);
        for model in [EstimateModel::Uniform, EstimateModel::attention(), EstimateModel::Normalization] {
            let pair = estimate_operation(&op, &extents(), &ArchConfig::edge(), model).unwrap();
            assert!(pair.one_d.is_finite());
            assert!(pair.two_d.is_infinite());
        }
    }

    #[test]
    fn test_attention_without_inner_key_dim() {
        // PRM over B, H, M, P: 2 * 2 * 4 * 1024 elements, 7 primitives each
        let prm = Operation::new("PRM", ["B", "H", "M", "P"])
            .with_input("RM", ["B", "H", "M", "P"])
            .with_cost(Primitive::Mac, 6)
            .with_cost(Primitive::Add, 1);
        let count = 16384.0 * 7.0;

        // edge: pe_p = 16, pe_h = min(256 / 16, h)
        let edge = ArchConfig::edge();
        let one = estimate_operation(&prm, &extents(), &edge, EstimateModel::attention()).unwrap();
        assert!(close(one.one_d, count / 16.0 / CLOCK));
        assert!(close(one.two_d, count / 16.0 / CLOCK));

        let four = EstimateModel::Attention { head_parallelism: 4 };
        let pair = estimate_operation(&prm, &extents(), &edge, four).unwrap();
        assert!(close(pair.one_d, count / 64.0 / CLOCK));
        assert!(close(pair.two_d, count / 64.0 / CLOCK));

        // cloud: pe_p = 256 leaves no room for extra heads on 1D
        let cloud = ArchConfig::cloud();
        let pair = estimate_operation(&prm, &extents(), &cloud, four).unwrap();
        assert!(close(pair.one_d, count / 256.0 / CLOCK));
        assert!(close(pair.two_d, count / 1024.0 / CLOCK));
    }

    #[test]
    fn test_attention_with_inner_key_dim_is_uniform() {
        let qk = Operation::new("QK", ["B", "H", "M", "N", "P"]).with_cost(Primitive::Mac, 1);
        let arch = ArchConfig::edge();
        assert_eq!(
            estimate_operation(&qk, &extents(), &arch, EstimateModel::attention()).unwrap(),
            estimate_operation(&qk, &extents(), &arch, EstimateModel::Uniform).unwrap()
        );
        // N reached through an input also counts
        let lm = Operation::new("LM", ["B", "H", "M", "P"])
            .with_input("QK", ["B", "H", "M", "N", "P"])
            .with_cost(Primitive::Max, 1);
        let pair = estimate_operation(&lm, &extents(), &arch, EstimateModel::attention()).unwrap();
        assert!(close(pair.one_d, 2.0 * 2.0 * 4.0 * 1024.0 * 16.0 / 256.0 / CLOCK));
    }

    #[test]
    fn test_normalization_branches() {
        let arch = ArchConfig::edge();
        // MAV over B, P: one mesh row on either side
        let mav = Operation::new("MAV", ["B", "P"])
            .with_input("SAV", ["B", "P"])
            .with_cost(Primitive::Mac, 1);
        let pair = estimate_operation(&mav, &extents(), &arch, EstimateModel::Normalization).unwrap();
        assert!(close(pair.one_d, 2048.0 / 16.0 / CLOCK));
        assert!(close(pair.two_d, 2048.0 / 16.0 / CLOCK));

        // SAV reads IAV over B, F, H, P and so fills the meshes
        let sav = Operation::new("SAV", ["B", "P"])
            .with_input("IAV", ["B", "F", "H", "P"])
            .with_cost(Primitive::Add, 1);
        let pair = estimate_operation(&sav, &extents(), &arch, EstimateModel::Normalization).unwrap();
        assert!(close(pair.one_d, 16384.0 / 256.0 / CLOCK));
        assert!(close(pair.two_d, 16384.0 / 256.0 / CLOCK));
    }

    #[test]
    fn test_zero_head_parallelism_rejected() {
        let op = Operation::new("RD", ["B", "P"]).with_cost(Primitive::Add, 1);
        let model = EstimateModel::Attention { head_parallelism: 0 };
        assert!(matches!(
            estimate_operation(&op, &extents(), &ArchConfig::edge(), model),
            Err(FusemeshError::InvalidFactors { .. })
        ));
    }

    #[test]
    fn test_missing_extent_propagates() {
        let op = Operation::new("X", ["Z"]).with_cost(Primitive::Add, 1);
        assert!(estimate_operation(&op, &extents(), &ArchConfig::cloud(), EstimateModel::Uniform).is_err());
    }

    #[test]
    fn test_degenerate_arch_rejected() {
        let op = Operation::new("Q", ["B"]).with_cost(Primitive::Mac, 1);
        let arch = ArchConfig::cloud().with_meshes(0, 16);
        assert!(estimate_operation(&op, &extents(), &arch, EstimateModel::Uniform).is_err());
    }

    #[test]
    fn test_graph_costs() {
        let graph = EinsumGraph::build(
            vec![
                Operation::new("A", ["B", "P"]).with_cost(Primitive::Mac, 1),
                Operation::new("M", ["B", "P"]).with_cost(Primitive::Max, 1),
            ],
            [("A", vec!["M"])],
        )
        .unwrap();
        let costs = estimate_costs(&graph, &extents(), &ArchConfig::cloud(), EstimateModel::Uniform).unwrap();
        assert_eq!(costs.len(), 2);
        assert!(costs.pair("M").two_d.is_infinite());
        assert!(costs.validate().is_ok());

        // The same graph read as attention spreads over query rows only
        let attention = estimate_costs(&graph, &extents(), &ArchConfig::edge(), EstimateModel::attention()).unwrap();
        assert!(close(attention.cost("A", fusemesh_core::Resource::OneD), 2048.0 / 16.0 / CLOCK));
    }
}
