//! Admission, queueing, and departure seen through full engine runs.

mod common;

use std::sync::Arc;

use chrono::{NaiveTime, TimeDelta};

use ev_site_sim::devices::VehicleType;
use ev_site_sim::sim::engine::Engine;
use ev_site_sim::sim::policy::PolicyKind;
use ev_site_sim::sim::session::{RejectReason, SessionId, SessionStatus};
use ev_site_sim::sim::tree::CapacityTree;
use ev_site_sim::sim::types::OperatingHours;

use common::t0;

fn one_outlet() -> CapacityTree {
    CapacityTree::wallbox(1, 11.0, 1, None, None).unwrap()
}

fn status(engine: &Engine, id: u32) -> SessionStatus {
    engine.registry().get(SessionId(id)).status()
}

#[test]
fn full_queue_rejects_later_arrivals() {
    let ev = common::flat_vehicle(11.0, 0.0);
    let sessions = vec![
        common::session(0, &ev, 0, 240, 0.1, 1.0),
        common::session(1, &ev, 2, 240, 0.1, 1.0),
        common::session(2, &ev, 4, 240, 0.1, 1.0),
    ];
    let scenario = common::scenario(
        one_outlet(),
        common::quarter_hours(2),
        sessions,
        PolicyKind::Fcfs,
    )
    .with_queue_length(1);
    let mut engine = Engine::new(scenario).unwrap();
    engine.run().unwrap();

    assert_eq!(status(&engine, 0), SessionStatus::Connected);
    assert_eq!(status(&engine, 1), SessionStatus::Queued);
    assert_eq!(status(&engine, 2), SessionStatus::Rejected(RejectReason::QueueFull));
    assert_eq!(engine.lifecycle().queue().len(), 1);
}

#[test]
fn queued_session_gives_up_at_its_leave_time() {
    let ev = common::flat_vehicle(11.0, 0.0);
    let sessions = vec![
        common::session(0, &ev, 0, 120, 0.1, 1.0),
        common::session(1, &ev, 0, 30, 0.1, 1.0),
    ];
    let scenario = common::scenario(
        one_outlet(),
        common::quarter_hours(4),
        sessions,
        PolicyKind::Fcfs,
    )
    .with_queue_length(2);
    let report = Engine::new(scenario).unwrap().run().unwrap();

    let waiting = &report.outcomes[1];
    assert_eq!(waiting.status, SessionStatus::Rejected(RejectReason::LeftQueue));
    assert_eq!(waiting.connected_at, None);
    assert_eq!(waiting.ended_at, Some(t0() + TimeDelta::minutes(30)));
    assert_eq!(waiting.soc_final, waiting.soc_arrival);
}

#[test]
fn departure_hands_outlet_to_queue_head() {
    let ev = common::flat_vehicle(11.0, 0.0);
    let sessions = vec![
        common::session(0, &ev, 0, 30, 0.1, 1.0),
        common::session(1, &ev, 5, 120, 0.1, 1.0),
    ];
    let scenario = common::scenario(
        one_outlet(),
        common::quarter_hours(4),
        sessions,
        PolicyKind::Optimal,
    )
    .with_queue_length(1);
    let report = Engine::new(scenario).unwrap().run().unwrap();

    assert_eq!(report.outcomes[0].status, SessionStatus::Departed);
    assert_eq!(report.outcomes[1].status, SessionStatus::Connected);
    assert_eq!(report.outcomes[1].connected_at, Some(t0() + TimeDelta::minutes(30)));
    // One vehicle on the outlet in every step.
    for record in &report.records {
        assert!((record.total_outlet_kw() - 11.0).abs() < common::TOL_KW);
    }
}

#[test]
fn closing_time_disconnects_and_turns_away() {
    let ev = common::flat_vehicle(11.0, 0.0);
    let sessions = vec![
        common::session(0, &ev, 0, 240, 0.1, 1.0),
        common::session(1, &ev, 40, 60, 0.1, 1.0),
    ];
    let hours = OperatingHours::new(
        NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(8, 30, 0).unwrap(),
    )
    .unwrap();
    let scenario = common::scenario(
        one_outlet(),
        common::quarter_hours(4),
        sessions,
        PolicyKind::Fcfs,
    )
    .with_operating_hours(hours);
    let report = Engine::new(scenario).unwrap().run().unwrap();

    assert_eq!(report.outcomes[0].status, SessionStatus::Departed);
    assert_eq!(report.outcomes[0].ended_at, Some(t0() + TimeDelta::minutes(30)));
    assert_eq!(
        report.outcomes[1].status,
        SessionStatus::Rejected(RejectReason::SiteClosed)
    );
    for record in &report.records[2..] {
        assert_eq!(record.total_outlet_kw(), 0.0);
    }
}

#[test]
fn reaching_target_frees_outlet_when_not_leaving_by_time() {
    let small = Arc::new(VehicleType::new("small", 10.0, 0.0, 11.0, 1.0).unwrap());
    let sessions = vec![common::session(0, &small, 0, 240, 0.5, 0.8)];

    let early = common::scenario(
        one_outlet(),
        common::quarter_hours(4),
        sessions.clone(),
        PolicyKind::Fcfs,
    )
    .with_disconnect_by_time(false);
    let report = Engine::new(early).unwrap().run().unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, SessionStatus::Departed);
    assert!(outcome.ended_at.unwrap() <= t0() + TimeDelta::minutes(30));
    assert!(outcome.soc_final >= 0.8);

    let by_time = common::scenario(
        one_outlet(),
        common::quarter_hours(4),
        sessions,
        PolicyKind::Fcfs,
    );
    let report = Engine::new(by_time).unwrap().run().unwrap();
    assert_eq!(report.outcomes[0].status, SessionStatus::Connected);
    assert!((report.outcomes[0].soc_final - 1.0).abs() < 1e-4);
}

#[test]
fn arrival_outside_run_is_rejected_up_front() {
    let ev = common::flat_vehicle(11.0, 0.0);
    let sessions = vec![common::session(0, &ev, 90, 30, 0.1, 1.0)];
    let scenario = common::scenario(
        one_outlet(),
        common::quarter_hours(4),
        sessions,
        PolicyKind::Fcfs,
    );
    assert!(Engine::new(scenario).is_err());
}
