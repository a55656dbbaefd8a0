//! Property-based tests for factor assignments and operations

#[cfg(test)]
mod tests {
    use crate::{Extents, FactorAssignment, Operation, Primitive};
    use proptest::prelude::*;

    /// Split `extent` into three ordered factors using the chosen divisors
    fn split3(extent: u64, a: usize, b: usize) -> (u64, u64, u64) {
        let divisors: Vec<u64> = (1..=extent).filter(|d| extent % d == 0).collect();
        let first = divisors[a % divisors.len()];
        let rest = extent / first;
        let divisors: Vec<u64> = (1..=rest).filter(|d| rest % d == 0).collect();
        let second = divisors[b % divisors.len()];
        (first, second, rest / second)
    }

    proptest! {
        /// Any three-level divisor split satisfies the product invariant
        #[test]
        fn prop_divisor_splits_validate(
            extent_p in 1u64..=512,
            extent_s in 1u64..=256,
            a in 0usize..16,
            b in 0usize..16,
        ) {
            let (dp, lp, pp) = split3(extent_p, a, b);
            let (ds, ls, ps) = split3(extent_s, b, a);
            let factors = FactorAssignment::new()
                .with("DRAM", "P", dp).with("L3", "P", lp).with("PE", "P", pp)
                .with("DRAM", "S", ds).with("L3", "S", ls).with("PE", "S", ps);
            let extents: Extents = [("P".to_string(), extent_p), ("S".to_string(), extent_s)].into();

            prop_assert!(factors.validate(&extents).is_ok());
            prop_assert_eq!(factors.product("P"), extent_p);
        }

        /// Perturbing one factor always breaks the invariant
        #[test]
        fn prop_perturbed_factor_rejected(extent in 2u64..=1024, bump in 1u64..=7) {
            let factors = FactorAssignment::new()
                .with("DRAM", "M", 1)
                .with("L3", "M", extent + bump);
            let extents: Extents = [("M".to_string(), extent)].into();
            prop_assert!(factors.validate(&extents).is_err());
        }

        /// Compute count scales linearly with the primitive weight
        #[test]
        fn prop_compute_count_linear_in_weight(
            b in 1u64..=8,
            p in 1u64..=64,
            weight in 1u64..=10,
        ) {
            let extents: Extents = [("B".to_string(), b), ("P".to_string(), p)].into();
            let unit = Operation::new("X", ["B", "P"]).with_cost(Primitive::Add, 1);
            let heavy = Operation::new("X", ["B", "P"]).with_cost(Primitive::Add, weight);
            prop_assert_eq!(
                heavy.compute_count(&extents).unwrap(),
                unit.compute_count(&extents).unwrap() * weight
            );
        }
    }
}
