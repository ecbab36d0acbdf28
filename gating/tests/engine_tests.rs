//! Gating engine test suite
//!
//! Exercises the engine end to end over synthetic three-population data: the
//! rectangle and polygon scenarios, agreement between the specialized and generic
//! rectangle loops and between table widths, and the guarantees cluster-centroid gating
//! makes about determinism, seeds, and parent flags.
//!
//! Run with: `cargo test --test engine_tests`

use flow_events::{EventTable, NumericWidth};
use flow_gates::{Gate, GateDimension, GateId, GateTrees, GatingMethod, RectangleBound, winding_number};
use flow_gating::{DafiConfig, GatingCache, GatingEngine, GatingError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const NAMES: [&str; 4] = ["FSC-A", "SSC-A", "CD3", "CD4"];

/// Three well separated populations in four parameters
fn synthetic_columns(n: usize) -> Vec<Vec<f64>> {
    let centers = [
        [200.0, 300.0, 50.0, 900.0],
        [800.0, 700.0, 600.0, 100.0],
        [500.0, 150.0, 900.0, 500.0],
    ];
    let mut rng = StdRng::seed_from_u64(42);
    let mut columns = vec![Vec::with_capacity(n); NAMES.len()];
    for event in 0..n {
        let center = centers[event % centers.len()];
        for (column, mid) in columns.iter_mut().zip(center) {
            column.push(mid + rng.random_range(-60.0..60.0));
        }
    }
    columns
}

fn synthetic_events(n: usize, width: NumericWidth) -> EventTable {
    let columns = synthetic_columns(n);
    match width {
        NumericWidth::Double => EventTable::from_columns(NAMES, columns).unwrap(),
        NumericWidth::Float => EventTable::from_columns(
            NAMES,
            columns
                .into_iter()
                .map(|c| c.into_iter().map(|v| v as f32).collect())
                .collect(),
        )
        .unwrap(),
    }
}

fn rectangle(bounds: &[(&str, Option<f64>, Option<f64>)]) -> Gate {
    Gate::rectangle(
        bounds.iter().map(|(name, _, _)| GateDimension::new(*name)).collect(),
        bounds.iter().map(|(_, min, max)| RectangleBound::new(*min, *max)).collect(),
    )
    .unwrap()
}

/// A scatter root with a manual child and two clustered grandchildren
fn hierarchy() -> (GateTrees, Vec<GateId>) {
    let mut trees = GateTrees::new();
    let cells = trees
        .add_root_gate(rectangle(&[("FSC-A", Some(100.0), None), ("SSC-A", None, Some(800.0))]).with_name("Cells"))
        .unwrap();
    let bright = trees
        .add_child_gate(cells, rectangle(&[("CD3", Some(400.0), None)]).with_name("CD3+"))
        .unwrap();
    let clustered = trees
        .add_child_gate(
            bright,
            Gate::polygon(
                GateDimension::new("CD3"),
                GateDimension::new("CD4"),
                vec![(700.0, 300.0), (1100.0, 300.0), (1100.0, 700.0), (700.0, 700.0)],
            )
            .unwrap()
            .with_name("CD4 mid")
            .with_method(GatingMethod::ClusterCentroid)
            .with_clustering_parameters(vec![GateDimension::new("FSC-A")]),
        )
        .unwrap();
    let low = trees
        .add_child_gate(
            cells,
            rectangle(&[("CD4", None, Some(300.0))])
                .with_name("CD4 low")
                .with_method(GatingMethod::ClusterCentroid),
        )
        .unwrap();
    (trees, vec![cells, bright, clustered, low])
}

fn small_config() -> DafiConfig {
    DafiConfig {
        cluster_count: 12,
        iterations: 6,
        seed: 7,
    }
}

fn gate_hierarchy(width: NumericWidth) -> (GatingCache, Vec<GateId>) {
    let (trees, ids) = hierarchy();
    let mut cache = GatingCache::new(synthetic_events(900, width), trees).unwrap();
    GatingEngine::with_config(&mut cache, small_config())
        .unwrap()
        .gate_all()
        .unwrap();
    (cache, ids)
}

fn all_flags(cache: &GatingCache) -> Vec<Vec<u8>> {
    cache.states().iter().map(|s| s.flags().to_vec()).collect()
}

#[test]
fn test_rectangle_scenario() {
    for width in [NumericWidth::Float, NumericWidth::Double] {
        let events = match width {
            NumericWidth::Float => EventTable::from_columns(["X"], vec![vec![0.0f32, 5.0, 10.0, 15.0, 20.0]]),
            NumericWidth::Double => EventTable::from_columns(["X"], vec![vec![0.0f64, 5.0, 10.0, 15.0, 20.0]]),
        }
        .unwrap();
        let mut trees = GateTrees::new();
        let root = trees.add_root_gate(rectangle(&[("X", Some(4.0), Some(16.0))])).unwrap();
        let mut cache = GatingCache::new(events, trees).unwrap();
        GatingEngine::new(&mut cache).unwrap().gate_all().unwrap();
        assert_eq!(cache.state(root).unwrap().flags(), &[0, 1, 1, 1, 0], "{width}");
    }
}

#[test]
fn test_polygon_scenario() {
    let square = vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)];
    let events = EventTable::from_columns(["X", "Y"], vec![vec![5.0f32, 15.0, 10.0], vec![5.0, 5.0, 10.0]]).unwrap();
    let mut trees = GateTrees::new();
    let root = trees
        .add_root_gate(Gate::polygon(GateDimension::new("X"), GateDimension::new("Y"), square).unwrap())
        .unwrap();
    let mut cache = GatingCache::new(events, trees).unwrap();
    GatingEngine::new(&mut cache).unwrap().gate_all().unwrap();

    let corner = u8::from(winding_number((10.0f32, 10.0), &[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]) != 0);
    assert_eq!(cache.state(root).unwrap().flags(), &[1, 0, corner]);
}

#[test]
fn test_rectangle_dimensionality_agrees() {
    let events = || synthetic_events(600, NumericWidth::Float);
    let gates = [
        rectangle(&[("CD3", Some(300.0), Some(950.0))]),
        rectangle(&[("CD3", Some(300.0), Some(950.0)), ("CD4", None, None)]),
        rectangle(&[("CD3", Some(300.0), Some(950.0)), ("CD4", None, None), ("FSC-A", None, None)]),
    ];
    let flags: Vec<Vec<u8>> = gates
        .into_iter()
        .map(|gate| {
            let mut trees = GateTrees::new();
            let root = trees.add_root_gate(gate).unwrap();
            let mut cache = GatingCache::new(events(), trees).unwrap();
            GatingEngine::new(&mut cache).unwrap().gate_all().unwrap();
            cache.state(root).unwrap().flags().to_vec()
        })
        .collect();
    assert_eq!(flags[0], flags[1]);
    assert_eq!(flags[1], flags[2]);
    assert!(flags[0].contains(&1) && flags[0].contains(&0));
}

#[test]
fn test_widths_agree_for_event_value_gates() {
    let run = |width| {
        let mut trees = GateTrees::new();
        let root = trees
            .add_root_gate(rectangle(&[("FSC-A", Some(450.5), None), ("CD4", Some(60.25), Some(640.75))]))
            .unwrap();
        let mut cache = GatingCache::new(synthetic_events(600, width), trees).unwrap();
        GatingEngine::new(&mut cache).unwrap().gate_all().unwrap();
        cache.state(root).unwrap().flags().to_vec()
    };
    // values are random, so no event sits within f32 rounding of a bound
    assert_eq!(run(NumericWidth::Float), run(NumericWidth::Double));
}

#[test]
fn test_children_never_exceed_parents() {
    for width in [NumericWidth::Float, NumericWidth::Double] {
        let (cache, _) = gate_hierarchy(width);
        let trees = cache.trees();
        for id in trees.find_descendant_gates() {
            let Some(parent) = trees.parent(id) else { continue };
            let child = cache.state(id).unwrap().flags();
            let parent = cache.state(parent).unwrap().flags();
            assert!(child.iter().zip(parent).all(|(c, p)| c <= p), "gate {id}");
        }
    }
}

#[test]
fn test_clustering_is_deterministic() {
    let (first, _) = gate_hierarchy(NumericWidth::Double);
    let (second, _) = gate_hierarchy(NumericWidth::Double);
    assert_eq!(all_flags(&first), all_flags(&second));

    for threads in [1, 3] {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().unwrap();
        let (pooled, _) = pool.install(|| gate_hierarchy(NumericWidth::Double));
        assert_eq!(all_flags(&pooled), all_flags(&first), "{threads} threads");
    }
}

#[test]
fn test_seeds_do_not_depend_on_tree_shape() {
    let (reference, ids) = gate_hierarchy(NumericWidth::Float);
    let low = ids[3];

    // the same clustered gate with extra siblings inserted ahead of it
    let mut trees = GateTrees::new();
    let cells = trees
        .add_root_gate(rectangle(&[("FSC-A", Some(100.0), None), ("SSC-A", None, Some(800.0))]))
        .unwrap();
    trees
        .add_child_gate(
            cells,
            rectangle(&[("SSC-A", Some(500.0), None)]).with_method(GatingMethod::ClusterCentroid),
        )
        .unwrap();
    trees
        .add_child_gate(cells, rectangle(&[("CD3", None, Some(100.0))]))
        .unwrap();
    let moved = trees
        .add_child_gate(
            cells,
            rectangle(&[("CD4", None, Some(300.0))]).with_method(GatingMethod::ClusterCentroid),
        )
        .unwrap();
    let mut cache = GatingCache::new(synthetic_events(900, NumericWidth::Float), trees).unwrap();
    GatingEngine::with_config(&mut cache, small_config())
        .unwrap()
        .gate_all()
        .unwrap();

    assert_eq!(
        cache.state(moved).unwrap().flags(),
        reference.state(low).unwrap().flags()
    );
}

#[test]
fn test_gating_twice_changes_nothing() {
    let (trees, ids) = hierarchy();
    let mut cache = GatingCache::new(synthetic_events(300, NumericWidth::Float), trees).unwrap();
    let mut engine = GatingEngine::with_config(&mut cache, small_config()).unwrap();
    engine.gate_all().unwrap();
    let before = all_flags(engine.cache());
    engine.gate_all().unwrap();
    engine.gate(ids[2]).unwrap();
    assert_eq!(all_flags(engine.cache()), before);
}

#[test]
fn test_single_cluster_classifies_all_members_alike() {
    let mut trees = GateTrees::new();
    let cells = trees
        .add_root_gate(rectangle(&[("FSC-A", Some(100.0), Some(900.0))]))
        .unwrap();
    let gate = trees
        .add_child_gate(
            cells,
            rectangle(&[("CD3", Some(0.0), Some(1000.0)), ("CD4", Some(0.0), Some(1000.0))])
                .with_method(GatingMethod::ClusterCentroid),
        )
        .unwrap();
    let mut cache = GatingCache::new(synthetic_events(300, NumericWidth::Double), trees).unwrap();
    let config = DafiConfig {
        cluster_count: 1,
        ..small_config()
    };
    GatingEngine::with_config(&mut cache, config).unwrap().gate_all().unwrap();

    // one cluster holds every parent-included event, and its mean lies inside the gate
    let parent = cache.state(cells).unwrap().flags().to_vec();
    assert_eq!(cache.state(gate).unwrap().flags(), parent.as_slice());
}

#[test]
fn test_cancel_between_gates() {
    let (trees, ids) = hierarchy();
    let mut cache = GatingCache::new(synthetic_events(300, NumericWidth::Float), trees).unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    let mut engine = GatingEngine::with_config(&mut cache, small_config()).unwrap();
    engine.set_cancel_flag(Arc::clone(&cancel));

    let result = engine.gate_all_with_progress(|_, done, _| {
        if done == 1 {
            cancel.store(true, Ordering::Relaxed);
        }
    });
    assert!(matches!(result, Err(GatingError::Cancelled)));
    assert!(cache.state(ids[0]).unwrap().is_applied());
    assert!(cache.states()[1..].iter().all(|s| !s.is_applied()));
}
