//! Property-based tests for candidate enumeration, the search tree and the cache

#[cfg(test)]
mod tests {
    use crate::{divisors, CacheIdentity, CandidateSpace, MemoCache, SearchTree};
    use fusemesh_core::{Extents, FactorAssignment, LockPolicy, Observation, SearchConfig};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unique_dir() -> std::path::PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let dir = std::env::temp_dir().join(format!(
            "fusemesh_prop_cache_{}_{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    proptest! {
        #[test]
        fn prop_divisors_divide(n in 1u64..=5000) {
            let ds = divisors(n);
            prop_assert!(ds.iter().all(|d| n % d == 0));
            prop_assert!(ds.windows(2).all(|w| w[0] < w[1]));
            prop_assert_eq!(ds.first().copied(), Some(1));
            prop_assert_eq!(ds.last().copied(), Some(n));
        }

        #[test]
        fn prop_candidates_respect_extents(
            b in 1u64..=8,
            p in 1u64..=96,
            pe in prop::sample::select(vec![1u64, 2, 4]),
        ) {
            let extents: Extents = [("B".to_string(), b), ("P".to_string(), p * pe)].into();
            let space = CandidateSpace::new(extents.clone()).with_pinned("PE", "P", pe);
            let all = space.enumerate(|_| true).unwrap();
            prop_assert_eq!(all.len(), space.size().unwrap());
            for c in &all {
                prop_assert!(c.validate(&extents).is_ok());
            }
        }

        /// Enough iterations visit every distinct leaf; the best is minimal
        #[test]
        fn prop_search_covers_every_candidate(
            energies in prop::collection::vec(0.0f64..1000.0, 1..12),
            extra in 0usize..5,
        ) {
            let candidates: Vec<FactorAssignment> = (0..energies.len())
                .map(|i| FactorAssignment::new().with("L3", "P", i as u64 + 1).with("L3", "S", 1))
                .collect();
            let n = candidates.len();
            let config = SearchConfig::default().with_dimension_order(["P", "S"]);
            let mut tree = SearchTree::build(candidates, config, None).unwrap();
            let mut evaluator = |f: &FactorAssignment| -> anyhow::Result<Observation> {
                let i = f.get("L3", "P").unwrap_or(1) as usize - 1;
                Ok(Observation::new(0.0, energies[i]))
            };

            let outcome = tree.search(&mut evaluator, None, n + extra).unwrap();
            for c in 0..n {
                prop_assert!(tree.visits(c) >= 1);
            }
            let best = outcome.best.unwrap();
            let min = energies.iter().cloned().fold(f64::INFINITY, f64::min);
            prop_assert_eq!(best.observation.energy, min);
            prop_assert!(outcome.history.iter().all(|r| best.observation.energy <= r.observation.energy));
        }

        #[test]
        fn prop_cache_round_trip(
            latency in 0.0f64..1e6,
            energy in 0.0f64..1e12,
            p in 1u64..=64,
        ) {
            let dir = unique_dir();
            let cache = MemoCache::open(&dir, CacheIdentity::new("cloud", "bert", "1K"), LockPolicy::default()).unwrap();
            let key = FactorAssignment::new().with("L3", "P", p).with("DRAM", "P", 1);
            prop_assert_eq!(cache.lookup(&key), None);
            cache.store(&key, Observation::new(latency, energy)).unwrap();
            prop_assert_eq!(cache.lookup(&key), Some(Observation::new(latency, energy)));
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}
