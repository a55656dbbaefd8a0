//! A worker process that dies while evaluating must not wedge the cache

use anyhow::Result;
use fusemesh_core::{FactorAssignment, LockPolicy, Observation};
use fusemesh_search::{CacheIdentity, MemoCache};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

const WORKER_DIR_VAR: &str = "FUSEMESH_CRASHING_WORKER_DIR";

fn identity() -> CacheIdentity {
    CacheIdentity::new("cloud", "bert", "1K")
}

fn key(p: u64) -> FactorAssignment {
    FactorAssignment::new().with("DRAM", "P", 64 / p).with("L3", "P", p)
}

/// Runs only when spawned by `test_cache_survives_crashed_worker`
#[test]
fn crashing_worker() -> Result<()> {
    let Ok(dir) = std::env::var(WORKER_DIR_VAR) else {
        return Ok(());
    };
    let cache = MemoCache::open(dir, identity(), LockPolicy::default())?;
    let mut evaluator = |_: &FactorAssignment| -> anyhow::Result<Observation> { std::process::abort() };
    cache.get_or_evaluate(&key(4), &mut evaluator)?;
    Ok(())
}

#[test]
fn test_cache_survives_crashed_worker() -> Result<()> {
    let dir: PathBuf = std::env::temp_dir().join(format!("fusemesh_crashed_worker_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir)?;

    let status = Command::new(std::env::current_exe()?)
        .args(["crashing_worker", "--exact", "--test-threads=1", "--nocapture"])
        .env(WORKER_DIR_VAR, &dir)
        .status()?;
    assert!(!status.success(), "worker should have died: {status}");

    let policy = LockPolicy {
        attempts: 4,
        base_backoff: Duration::from_millis(1),
    };
    let cache = MemoCache::open(&dir, identity(), policy)?;
    cache.store(&key(2), Observation::new(1.0, 2.0))?;

    let mut evaluator = |_: &FactorAssignment| -> anyhow::Result<Observation> { Ok(Observation::new(3.0, 4.0)) };
    let (observation, hit) = cache.get_or_evaluate(&key(4), &mut evaluator)?;
    assert!(!hit);
    assert_eq!(observation, Observation::new(3.0, 4.0));
    assert_eq!(cache.stats().lock_retries, 0);
    assert_eq!(cache.records()?.len(), 2);

    let _ = std::fs::remove_dir_all(&dir);
    Ok(())
}
