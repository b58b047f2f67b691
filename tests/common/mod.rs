//! Shared test fixtures for integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use ev_site_sim::devices::VehicleType;
use ev_site_sim::sim::policy::PolicyKind;
use ev_site_sim::sim::scenario::Scenario;
use ev_site_sim::sim::session::{ChargingSession, SessionId};
use ev_site_sim::sim::tree::{CapacityTree, NodeKind};
use ev_site_sim::sim::types::{RunWindow, StepRecord};

/// Slack allowed on every power comparison (kW).
pub const TOL_KW: f32 = 1e-3;

/// Start of every fixture run: 2024-01-01 08:00.
pub fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(8, 0, 0)
        .unwrap()
}

/// A run of `steps` quarter-hour steps starting at [`t0`].
pub fn quarter_hours(steps: i64) -> RunWindow {
    RunWindow::new(t0(), t0() + TimeDelta::minutes(15 * steps), TimeDelta::minutes(15)).unwrap()
}

/// Reference site: feeder 100/10 kW, branches `cs1` and `cs2` at 10/1 kW,
/// outlets `cp1`..`cp4` at 5/0.5 kW.
pub fn reference_tree() -> CapacityTree {
    two_branch_tree(100.0, 10.0, 5.0)
}

/// Same shape as [`reference_tree`] with outlets rated `outlet_kw`.
pub fn two_branch_tree(feeder_kw: f32, feeder_min_kw: f32, outlet_kw: f32) -> CapacityTree {
    let mut builder = CapacityTree::builder("grid", feeder_kw, feeder_min_kw);
    let root = builder.root();
    for b in 1..=2 {
        let branch = builder.branch(root, format!("cs{b}"), 10.0, 1.0);
        for o in 1..=2 {
            builder.outlet(branch, format!("cp{}", 2 * (b - 1) + o), outlet_kw, 0.5);
        }
    }
    builder.build().unwrap()
}

/// Vehicle with a battery large enough that demand stays flat over a short run.
pub fn flat_vehicle(max_kw: f32, min_kw: f32) -> Arc<VehicleType> {
    Arc::new(VehicleType::new("flat", 1000.0, min_kw, max_kw, 1.0).unwrap())
}

/// A small car with a derating knee at 80% SOC.
pub fn compact_vehicle() -> Arc<VehicleType> {
    Arc::new(
        VehicleType::new("compact", 40.0, 1.0, 11.0, 0.9)
            .unwrap()
            .with_derating(0.8, 0.25)
            .unwrap(),
    )
}

/// A van that never derates.
pub fn van_vehicle() -> Arc<VehicleType> {
    Arc::new(VehicleType::new("van", 75.0, 1.4, 7.4, 0.92).unwrap())
}

/// Session arriving `arrival_min` minutes after [`t0`] and parking `parking_min`.
pub fn session(
    id: u32,
    vehicle: &Arc<VehicleType>,
    arrival_min: i64,
    parking_min: i64,
    soc_arrival: f32,
    soc_target: f32,
) -> ChargingSession {
    ChargingSession::new(
        SessionId(id),
        Arc::clone(vehicle),
        t0() + TimeDelta::minutes(arrival_min),
        TimeDelta::minutes(parking_min),
        soc_arrival,
        soc_target,
    )
    .unwrap()
}

pub fn scenario(
    tree: CapacityTree,
    window: RunWindow,
    sessions: Vec<ChargingSession>,
    policy: PolicyKind,
) -> Scenario {
    Scenario::new(policy.as_str(), tree, window)
        .with_sessions(sessions)
        .with_policy(policy)
}

/// Power assigned to the outlet called `name` in `record`.
pub fn outlet_kw(tree: &CapacityTree, record: &StepRecord, name: &str) -> f32 {
    let id = tree.find(name).unwrap();
    record.outlet_power_kw[&id]
}

/// Random sessions arriving inside `window`, drawn from `vehicles`.
pub fn random_sessions(
    rng: &mut StdRng,
    count: u32,
    window: &RunWindow,
    vehicles: &[Arc<VehicleType>],
) -> Vec<ChargingSession> {
    let run_minutes = (window.end - window.start).num_minutes();
    (0..count)
        .map(|id| {
            let vehicle = &vehicles[rng.random_range(0..vehicles.len())];
            let soc_arrival: f32 = rng.random_range(0.0..0.9);
            let soc_target: f32 = rng.random_range(soc_arrival..=1.0);
            ChargingSession::new(
                SessionId(id),
                Arc::clone(vehicle),
                window.start + TimeDelta::minutes(rng.random_range(0..run_minutes)),
                TimeDelta::minutes(rng.random_range(15..=240)),
                soc_arrival,
                soc_target,
            )
            .unwrap()
        })
        .collect()
}

pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

/// Asserts every ceiling on a site with a storage buffer.
///
/// The buffer's node passes `through + storage_kw` upward, so its children
/// may draw up to its ceiling plus whatever the buffer delivered.
pub fn assert_buffered_ceilings(tree: &CapacityTree, record: &StepRecord) {
    let storage = tree.storage().map(|s| (s.node, s.buffer.max_power_kw));
    assert!(
        storage.is_none_or(|(_, max)| record.storage_kw.abs() <= max + TOL_KW),
        "step {}: buffer moved {} kW",
        record.step,
        record.storage_kw
    );

    let mut flow = vec![0.0_f32; tree.len()];
    for id in tree.depth_first().iter().rev() {
        let node = tree.node(*id);
        let through: f32 = if node.kind == NodeKind::Outlet {
            record.outlet_power_kw[id]
        } else {
            node.children().iter().map(|c| flow[c.index()]).sum()
        };
        flow[id.index()] = match storage {
            Some((buffer_node, _)) if buffer_node == *id => through + record.storage_kw,
            _ => through,
        };
        assert!(
            flow[id.index()] <= node.max_power_kw + TOL_KW,
            "step {}: {} passes {} kW over its {} kW ceiling",
            record.step,
            node.name,
            flow[id.index()],
            node.max_power_kw
        );
        assert!(flow[id.index()] >= -TOL_KW, "step {}: {} runs backwards", record.step, node.name);
    }
}

/// Asserts every ceiling, and every floor a drawing node must reach.
pub fn assert_tree_bounds(tree: &CapacityTree, record: &StepRecord) {
    for id in tree.depth_first() {
        let node = tree.node(*id);
        if node.kind == NodeKind::Outlet {
            continue;
        }
        let drawn: f32 = tree
            .outlets_under(*id)
            .iter()
            .map(|o| record.outlet_power_kw[o])
            .sum();
        assert!(
            drawn <= node.max_power_kw + TOL_KW,
            "step {}: {} draws {drawn} kW over its {} kW ceiling",
            record.step,
            node.name,
            node.max_power_kw
        );
        assert!(
            drawn <= TOL_KW || drawn + TOL_KW >= node.min_power_kw,
            "step {}: {} draws {drawn} kW under its {} kW floor",
            record.step,
            node.name,
            node.min_power_kw
        );
    }
}
