//! Cost tables measured with the external oracle
//!
//! [`measure_costs`] asks the oracle for every operation on every resource it
//! can run on; [`measure_costs_parallel`] spreads those calls over scoped
//! worker threads. [`measure_scheduled`] measures each operation only on the
//! resource a schedule already assigned it, and [`pinned_costs`] turns such
//! measurements into a table the scheduler can re-run on.
//!
//! Oracle failures are wrapped in [`FusemeshError::Oracle`] and never retried.

use crate::graph::EinsumGraph;
use crate::scheduler::Schedule;
use fusemesh_core::{
    CostOracle, CostPair, FactorAssignment, FusemeshError, Operation, OracleReport, Resource,
    ResourceCosts, Result,
};
use std::collections::BTreeMap;
use std::thread;

/// One oracle call to make
struct Job<'a> {
    operation: &'a Operation,
    resource: Resource,
}

/// Resources worth asking the oracle about; nonlinear work never goes to 2D
fn jobs(graph: &EinsumGraph) -> Vec<Job<'_>> {
    graph
        .operations()
        .iter()
        .flat_map(|op| {
            Resource::ALL
                .into_iter()
                .filter(move |&r| !(r == Resource::TwoD && op.is_nonlinear()))
                .map(move |resource| Job {
                    operation: op,
                    resource,
                })
        })
        .collect()
}

fn run_job<O, F>(job: &Job<'_>, oracle: &O, factors_for: &F) -> Result<OracleReport>
where
    O: CostOracle + ?Sized,
    F: Fn(&Operation, Resource) -> FactorAssignment,
{
    let factors = factors_for(job.operation, job.resource);
    let report = oracle
        .evaluate(job.operation, job.resource, &factors)
        .map_err(FusemeshError::Oracle)?;
    tracing::debug!(
        operation = %job.operation.name,
        resource = %job.resource,
        latency = report.latency(),
        energy = report.energy,
        "oracle evaluation"
    );
    Ok(report)
}

/// Table with infinity everywhere, filled in by measurements
fn unmeasured(graph: &EinsumGraph) -> ResourceCosts {
    let mut costs = ResourceCosts::new();
    for op in graph.operations() {
        costs.insert(op.name.clone(), CostPair::new(f64::INFINITY, f64::INFINITY));
    }
    costs
}

fn record(costs: &mut ResourceCosts, job: &Job<'_>, report: &OracleReport) {
    let mut pair = costs.pair(&job.operation.name);
    pair.set(job.resource, report.latency());
    costs.insert(job.operation.name.clone(), pair);
}

/// Measure every operation on each resource, one oracle call at a time
///
/// `factors_for` supplies the tiling handed to the oracle for an operation on
/// a resource. Latency is `max(compute, memory)`.
pub fn measure_costs<O, F>(graph: &EinsumGraph, oracle: &O, factors_for: F) -> Result<ResourceCosts>
where
    O: CostOracle + ?Sized,
    F: Fn(&Operation, Resource) -> FactorAssignment,
{
    let mut costs = unmeasured(graph);
    for job in jobs(graph) {
        let report = run_job(&job, oracle, &factors_for)?;
        record(&mut costs, &job, &report);
    }
    Ok(costs)
}

/// [`measure_costs`] on up to `workers` scoped threads
///
/// `workers == 0` uses the available parallelism. The first failure in job
/// order is returned.
pub fn measure_costs_parallel<O, F>(
    graph: &EinsumGraph,
    oracle: &O,
    factors_for: F,
    workers: usize,
) -> Result<ResourceCosts>
where
    O: CostOracle + Sync + ?Sized,
    F: Fn(&Operation, Resource) -> FactorAssignment + Sync,
{
    let jobs = jobs(graph);
    let workers = if workers == 0 {
        thread::available_parallelism().map_or(1, |n| n.get())
    } else {
        workers
    };
    let chunk = jobs.len().div_ceil(workers.max(1)).max(1);
    tracing::debug!(jobs = jobs.len(), workers, "measuring costs in parallel");

    let factors_for = &factors_for;
    let outcomes: Vec<Result<Vec<OracleReport>>> = thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .chunks(chunk)
            .map(|batch| {
                scope.spawn(move || {
                    batch
                        .iter()
                        .map(|job| run_job(job, oracle, factors_for))
                        .collect::<Result<Vec<_>>>()
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(FusemeshError::Oracle(anyhow::anyhow!(
                        "measurement worker panicked"
                    )))
                })
            })
            .collect()
    });

    let mut costs = unmeasured(graph);
    for (batch, outcome) in jobs.chunks(chunk).zip(outcomes) {
        for (job, report) in batch.iter().zip(outcome?) {
            record(&mut costs, job, &report);
        }
    }
    Ok(costs)
}

/// Oracle results for operations evaluated on their scheduled resource
#[derive(Debug, Clone, Default)]
pub struct MeasuredSchedule {
    /// Each operation's measured latency, other resource infinite
    pub costs: ResourceCosts,
    /// Raw oracle output per operation
    pub reports: BTreeMap<String, OracleReport>,
}

impl MeasuredSchedule {
    /// Summed energy of every measured operation
    pub fn total_energy(&self) -> f64 {
        self.reports.values().map(|r| r.energy).sum()
    }
}

/// Measure every operation of `graph` on the resource `schedule` gave it
///
/// # Errors
///
/// [`FusemeshError::UnknownOperation`] when an operation is missing from the
/// schedule; oracle failures as [`FusemeshError::Oracle`].
pub fn measure_scheduled<O, F>(
    graph: &EinsumGraph,
    schedule: &Schedule,
    oracle: &O,
    factors_for: F,
) -> Result<MeasuredSchedule>
where
    O: CostOracle + ?Sized,
    F: Fn(&Operation, Resource) -> FactorAssignment,
{
    let mut measured = MeasuredSchedule::default();
    for operation in graph.operations() {
        let entry = schedule
            .get(&operation.name)
            .ok_or_else(|| FusemeshError::UnknownOperation(operation.name.clone()))?;
        let job = Job {
            operation,
            resource: entry.resource,
        };
        let report = run_job(&job, oracle, &factors_for)?;
        measured
            .costs
            .insert(operation.name.clone(), CostPair::only(entry.resource, report.latency()));
        measured.reports.insert(operation.name.clone(), report);
    }
    Ok(measured)
}

/// Force every scheduled operation onto its assigned resource
///
/// The cost on the assigned resource is taken from `measured`; the other
/// resource becomes infinite.
pub fn pinned_costs(schedule: &Schedule, measured: &ResourceCosts) -> ResourceCosts {
    let mut pinned = ResourceCosts::new();
    for entry in schedule.entries() {
        let cost = measured.cost(&entry.operation, entry.resource);
        pinned.insert(entry.operation.clone(), CostPair::only(entry.resource, cost));
    }
    pinned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::DependencyGraph;
    use crate::scheduler::ListScheduler;
    use fusemesh_core::Primitive;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn graph() -> EinsumGraph {
        EinsumGraph::build(
            vec![
                Operation::new("FFN", ["B", "P"]).with_cost(Primitive::Mac, 1),
                Operation::new("AR", ["B", "P"]).with_cost(Primitive::Max, 1),
                Operation::new("FFNT", ["B", "P"]).with_cost(Primitive::Mac, 1),
            ],
            [("FFN", vec!["AR"]), ("AR", vec!["FFNT"])],
        )
        .unwrap()
    }

    /// Latency 10 on 1D and 2 on 2D; memory bound at 3 for 2D
    fn oracle(op: &Operation, resource: Resource, _: &FactorAssignment) -> anyhow::Result<OracleReport> {
        let (compute, memory) = match resource {
            Resource::OneD => (10.0, 1.0),
            Resource::TwoD => (2.0, 3.0),
        };
        Ok(OracleReport {
            compute_latency: compute,
            memory_latency: memory,
            energy: op.name.len() as f64,
            ..OracleReport::default()
        })
    }

    fn no_factors(_: &Operation, _: Resource) -> FactorAssignment {
        FactorAssignment::new()
    }

    #[test]
    fn test_measure_costs() {
        let costs = measure_costs(&graph(), &oracle, no_factors).unwrap();
        assert_eq!(costs.pair("FFN"), CostPair::new(10.0, 3.0));
        assert_eq!(costs.pair("AR"), CostPair::new(10.0, f64::INFINITY));
    }

    #[test]
    fn test_parallel_matches_serial() {
        let serial = measure_costs(&graph(), &oracle, no_factors).unwrap();
        for workers in [0, 1, 2, 7] {
            let parallel = measure_costs_parallel(&graph(), &oracle, no_factors, workers).unwrap();
            assert_eq!(parallel, serial);
        }
    }

    #[test]
    fn test_nonlinear_never_sent_to_two_d() {
        let calls = AtomicUsize::new(0);
        let counting = |op: &Operation, r: Resource, f: &FactorAssignment| {
            assert!(!(op.is_nonlinear() && r == Resource::TwoD));
            calls.fetch_add(1, Ordering::SeqCst);
            oracle(op, r, f)
        };
        measure_costs_parallel(&graph(), &counting, no_factors, 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_oracle_failure_surfaces() {
        let failing = |op: &Operation, _: Resource, _: &FactorAssignment| -> anyhow::Result<OracleReport> {
            anyhow::bail!("simulator crashed on {}", op.name)
        };
        let err = measure_costs(&graph(), &failing, no_factors).unwrap_err();
        assert!(err.is_oracle());
        let err = measure_costs_parallel(&graph(), &failing, no_factors, 3).unwrap_err();
        assert!(err.is_oracle());
    }

    #[test]
    fn test_measure_scheduled_and_pin() {
        let g = graph();
        let costs = measure_costs(&g, &oracle, no_factors).unwrap();
        let schedule = ListScheduler::new(g.dependencies(), &costs).best_exhaustive().unwrap();
        assert_eq!(schedule.get("FFN").unwrap().resource, Resource::TwoD);

        let measured = measure_scheduled(&g, &schedule, &oracle, no_factors).unwrap();
        assert_eq!(measured.costs.pair("FFN"), CostPair::new(f64::INFINITY, 3.0));
        assert_eq!(measured.costs.pair("AR"), CostPair::new(10.0, f64::INFINITY));
        assert_eq!(measured.total_energy(), 3.0 + 2.0 + 4.0);

        let pinned = pinned_costs(&schedule, &costs);
        assert_eq!(pinned, measured.costs);
        let rerun = ListScheduler::new(g.dependencies(), &pinned).best_exhaustive().unwrap();
        assert_eq!(rerun.makespan(), schedule.makespan());
    }

    #[test]
    fn test_measure_scheduled_requires_every_operation() {
        let g = graph();
        let partial = DependencyGraph::from_successors([("FFN", Vec::<&str>::new())]);
        let costs = ResourceCosts::new().with("FFN", 1.0, 1.0);
        let schedule = ListScheduler::new(&partial, &costs).best_exhaustive().unwrap();
        assert!(matches!(
            measure_scheduled(&g, &schedule, &oracle, no_factors),
            Err(FusemeshError::UnknownOperation(name)) if name == "AR"
        ));
    }
}
