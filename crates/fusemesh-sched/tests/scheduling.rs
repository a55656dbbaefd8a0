//! Integration tests for order enumeration, list scheduling and partitioning

use anyhow::Result;
use fusemesh_core::{
    AnnealingParams, ArchConfig, Extents, FusemeshError, Operation, OrderSearch, Primitive,
    Resource, ResourceCosts, SchedulerConfig,
};
use fusemesh_sched::{
    best_partition_schedule, best_schedule, estimate_costs, partitions, schedule_graph,
    DependencyGraph, EinsumGraph, EstimateModel, ROOT,
};

fn diamond() -> DependencyGraph {
    DependencyGraph::from_successors([
        ("A", vec!["B", "C"]),
        ("B", vec!["D"]),
        ("C", vec!["D"]),
        ("D", vec![]),
    ])
}

/// Attention-shaped graph with two parallel reduction branches
fn attention() -> DependencyGraph {
    DependencyGraph::from_successors([
        ("QK", vec!["LM"]),
        ("LM", vec!["RM"]),
        ("RM", vec!["SLN", "PRM"]),
        ("SLN", vec!["SLD", "SLNV"]),
        ("PRM", vec!["SPD", "SPNV"]),
        ("SLD", vec!["RD"]),
        ("SPD", vec!["RD"]),
        ("SLNV", vec!["RNV"]),
        ("SPNV", vec!["RNV"]),
        ("RD", vec!["AV"]),
        ("RNV", vec!["AV"]),
        ("AV", vec![]),
    ])
}

#[test]
fn test_chain_scenario() -> Result<()> {
    let graph = DependencyGraph::from_successors([("A", vec!["B"]), ("B", vec!["C"]), ("C", vec![])]);
    let costs = ResourceCosts::new()
        .with("A", 2.0, 5.0)
        .with("B", 3.0, 1.0)
        .with("C", 1.0, 4.0);

    let orders: Vec<_> = graph.topological_orders().collect();
    assert_eq!(orders.len(), 1);

    let best = best_schedule(orders, &costs, &graph)?;
    let placements: Vec<_> = best
        .entries()
        .iter()
        .map(|e| (e.operation.as_str(), e.resource, e.start, e.end))
        .collect();
    assert_eq!(
        placements,
        vec![
            ("A", Resource::OneD, 0.0, 2.0),
            ("B", Resource::TwoD, 2.0, 3.0),
            ("C", Resource::OneD, 3.0, 4.0),
        ]
    );
    assert_eq!(best.makespan(), 4.0);
    Ok(())
}

#[test]
fn test_diamond_orders() {
    let graph = diamond();
    let names: Vec<Vec<&str>> = graph
        .topological_orders()
        .map(|o| graph.names_of(&o))
        .collect();
    assert_eq!(names, vec![vec!["A", "B", "C", "D"], vec!["A", "C", "B", "D"]]);
}

#[test]
fn test_attention_partitions() -> Result<()> {
    let graph = attention();
    graph.validate()?;

    let parts = partitions(&graph, &[], 16)?;
    assert!(parts.len() > 1);
    for part in &parts {
        assert!(part.is_acyclic());
        assert_eq!(part.operation_count(), graph.len());
        assert_eq!(part.sources(), vec![ROOT]);
    }

    let uniform = ResourceCosts::from_pairs(graph.names().map(|n| (n, 1.0, 1.0)));
    let best = best_partition_schedule(&graph, &uniform, &SchedulerConfig::default())?;
    let unsplit = best_partition_schedule(
        &graph,
        &uniform,
        &SchedulerConfig::default().with_partition(false),
    )?;
    assert!(best.makespan() <= unsplit.makespan());
    assert!(best.schedule.violations(&best.graph, &uniform).is_empty());
    assert_eq!(best.schedule.len(), graph.len());
    Ok(())
}

#[test]
fn test_preserved_edges_keep_hazards() -> Result<()> {
    let graph = attention();
    let config = SchedulerConfig::default()
        .with_preserved_edge("SPD", "RD")
        .with_preserved_edge("SPNV", "RNV");
    let parts = partitions(&graph, &config.preserved_edges, config.max_graph_nodes)?;

    let mut reattached = 0;
    for part in &parts {
        if part.successors("RD").contains(&"SPD") {
            reattached += 1;
            let spd = part.id("SPD").unwrap_or_default();
            let rd = part.id("RD").unwrap_or_default();
            for order in part.topological_orders().take(50) {
                let pos = |id| order.iter().position(|&x| x == id);
                assert!(pos(rd) < pos(spd));
            }
        }
    }
    assert!(reattached > 0);
    Ok(())
}

#[test]
fn test_annealing_config_handles_large_graph() -> Result<()> {
    // 20-node chain of pairs: above the exhaustive guard
    let mut graph = DependencyGraph::new();
    for i in 0..10 {
        let (a, b) = (format!("A{}", i), format!("B{}", i));
        graph.add_node(&a);
        graph.add_node(&b);
        if i > 0 {
            graph.add_edge(&format!("A{}", i - 1), &a);
            graph.add_edge(&format!("B{}", i - 1), &b);
        }
    }
    let costs = ResourceCosts::from_pairs(graph.names().map(|n| {
        if n.starts_with('A') {
            (n, 1.0, 3.0)
        } else {
            (n, 3.0, 1.0)
        }
    }));

    let exhaustive = SchedulerConfig::default();
    assert!(matches!(
        schedule_graph(&graph.with_root(), &costs, &exhaustive),
        Err(FusemeshError::GraphTooLarge { nodes: 20, limit: 16 })
    ));

    let annealing = exhaustive.with_order_search(OrderSearch::Annealing(AnnealingParams::default()));
    let schedule = schedule_graph(&graph.with_root(), &costs, &annealing)?;
    assert!(schedule.violations(&graph.with_root(), &costs).is_empty());
    assert!(schedule.makespan() <= 20.0);
    Ok(())
}

#[test]
fn test_estimated_costs_schedule() -> Result<()> {
    let ops = vec![
        Operation::new("FFN", ["B", "P", "F"]).with_input("INP", ["B", "P", "E"]).with_cost(Primitive::Mac, 1),
        Operation::new("AR", ["B", "P", "F"]).with_cost(Primitive::Max, 1),
        Operation::new("FFNT", ["B", "P", "E"]).with_input("W", ["E", "F"]).with_cost(Primitive::Mac, 1),
    ];
    let graph = EinsumGraph::build(ops, [("FFN", vec!["AR"]), ("AR", vec!["FFNT"])])?;
    let extents: Extents = [
        ("B".to_string(), 1),
        ("P".to_string(), 1024),
        ("E".to_string(), 64),
        ("F".to_string(), 256),
    ]
    .into();

    let costs = estimate_costs(&graph, &extents, &ArchConfig::cloud(), EstimateModel::Uniform)?;
    let best = best_partition_schedule(graph.dependencies(), &costs, &SchedulerConfig::default())?;
    assert_eq!(best.schedule.get("AR").map(|e| e.resource), Some(Resource::OneD));
    assert_eq!(best.schedule.get("FFN").map(|e| e.resource), Some(Resource::TwoD));
    Ok(())
}
