//! Storage buffer behavior on a feeder too small for its outlets.

mod common;

use ev_site_sim::devices::StorageBuffer;
use ev_site_sim::sim::engine::Engine;
use ev_site_sim::sim::policy::PolicyKind;
use ev_site_sim::sim::tree::CapacityTree;

use common::{TOL_KW, outlet_kw};

/// Feeder(10) -> branch(22) -> two 11 kW outlets, with a 20 kWh / 6 kW
/// buffer on the feeder holding 10 kWh.
fn buffered_site() -> CapacityTree {
    let mut builder = CapacityTree::builder("feeder", 10.0, 0.0);
    let root = builder.root();
    let branch = builder.branch(root, "cs", 22.0, 0.0);
    builder.outlet(branch, "a", 11.0, 0.0);
    builder.outlet(branch, "b", 11.0, 0.0);
    let tree = builder.build().unwrap();
    let buffer = StorageBuffer::new(20.0, 6.0, 10.0, 1.0).unwrap();
    tree.with_storage(root, buffer).unwrap()
}

#[test]
fn buffer_covers_demand_above_feeder_limit() {
    let tree = buffered_site();
    let ev = common::flat_vehicle(11.0, 0.0);
    let sessions = vec![
        common::session(0, &ev, 0, 60, 0.1, 1.0),
        common::session(1, &ev, 1, 60, 0.1, 1.0),
    ];
    let scenario = common::scenario(
        tree.clone(),
        common::quarter_hours(1),
        sessions,
        PolicyKind::Fcfs,
    );
    let report = Engine::new(scenario).unwrap().run().unwrap();

    let record = &report.records[0];
    assert!((outlet_kw(&tree, record, "a") - 11.0).abs() < TOL_KW);
    assert!((outlet_kw(&tree, record, "b") - 5.0).abs() < TOL_KW);
    assert!((record.storage_kw + 6.0).abs() < TOL_KW);
    assert!((record.storage_soe_kwh - 8.5).abs() < 1e-3);
}

#[test]
fn buffer_charges_from_spare_feeder_headroom() {
    let tree = buffered_site();
    let ev = common::flat_vehicle(4.0, 0.0);
    let sessions = vec![common::session(0, &ev, 0, 60, 0.1, 1.0)];
    let scenario = common::scenario(
        tree.clone(),
        common::quarter_hours(1),
        sessions,
        PolicyKind::Optimal,
    );
    let report = Engine::new(scenario).unwrap().run().unwrap();

    let record = &report.records[0];
    assert!((outlet_kw(&tree, record, "a") - 4.0).abs() < TOL_KW);
    assert!((record.storage_kw - 6.0).abs() < TOL_KW);
    assert!((record.storage_soe_kwh - 11.5).abs() < 1e-3);
}

#[test]
fn idle_site_fills_buffer_until_full() {
    let tree = buffered_site();
    let scenario = common::scenario(
        tree,
        common::quarter_hours(12),
        Vec::new(),
        PolicyKind::Fcfs,
    );
    let report = Engine::new(scenario).unwrap().run().unwrap();

    // 6 kW for a quarter hour stores 1.5 kWh; 10 kWh of room fills in 7 steps.
    let soe: Vec<f32> = report.records.iter().map(|r| r.storage_soe_kwh).collect();
    assert!(soe.windows(2).all(|w| w[1] + 1e-4 >= w[0]));
    assert!((soe[soe.len() - 1] - 20.0).abs() < 1e-3);
    assert_eq!(report.records[11].storage_kw, 0.0);
}

#[test]
fn uncontrolled_never_touches_buffer() {
    let tree = buffered_site();
    let ev = common::flat_vehicle(11.0, 0.0);
    let sessions = vec![
        common::session(0, &ev, 0, 60, 0.1, 1.0),
        common::session(1, &ev, 1, 60, 0.1, 1.0),
    ];
    let scenario = common::scenario(
        tree,
        common::quarter_hours(2),
        sessions,
        PolicyKind::Uncontrolled,
    );
    let report = Engine::new(scenario).unwrap().run().unwrap();

    for record in &report.records {
        assert!((record.total_outlet_kw() - 22.0).abs() < TOL_KW);
        assert_eq!(record.storage_kw, 0.0);
        assert_eq!(record.storage_soe_kwh, 10.0);
    }
}
