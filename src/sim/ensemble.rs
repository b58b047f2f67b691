//! Independent runs executed in parallel.

use rayon::prelude::*;
use tracing::info;

use crate::error::SimError;

use super::engine::Engine;
use super::scenario::Scenario;
use super::types::RunReport;

/// Runs every scenario to completion on the rayon pool.
///
/// Runs share no mutable state, so each one produces exactly what it would
/// produce alone. Results come back in input order; one failing scenario
/// does not stop the others.
pub fn run_ensemble(scenarios: Vec<Scenario>) -> Vec<Result<RunReport, SimError>> {
    info!(runs = scenarios.len(), "ensemble start");
    scenarios
        .into_par_iter()
        .map(|scenario| Engine::new(scenario)?.run())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::VehicleType;
    use crate::sim::policy::PolicyKind;
    use crate::sim::session::{ChargingSession, SessionId};
    use crate::sim::tree::CapacityTree;
    use crate::sim::types::RunWindow;
    use chrono::{NaiveDate, TimeDelta};
    use std::sync::Arc;

    fn scenario(policy: PolicyKind, turn_length: usize) -> Scenario {
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let window =
            RunWindow::new(t0, t0 + TimeDelta::hours(2), TimeDelta::minutes(30)).unwrap();
        let tree = CapacityTree::wallbox(2, 11.0, 2, Some(10.0), None).unwrap();
        let ev = Arc::new(VehicleType::new("ev", 60.0, 0.0, 8.0, 1.0).unwrap());
        let sessions = (0..2)
            .map(|i| {
                let ev = Arc::clone(&ev);
                ChargingSession::new(SessionId(i), ev, t0, TimeDelta::hours(2), 0.2, 0.9).unwrap()
            })
            .collect();
        Scenario::new(policy.as_str(), tree, window)
            .with_sessions(sessions)
            .with_policy(policy)
            .with_turn_length(turn_length)
    }

    #[test]
    fn results_match_sequential_runs_in_order() {
        let scenarios: Vec<Scenario> = PolicyKind::NAMES
            .iter()
            .map(|name| scenario(name.parse().unwrap(), 1))
            .collect();
        let expected: Vec<RunReport> = scenarios
            .iter()
            .map(|s| Engine::new(s.clone()).unwrap().run().unwrap())
            .collect();

        let results = run_ensemble(scenarios);
        assert_eq!(results.len(), expected.len());
        for (result, want) in results.into_iter().zip(expected) {
            assert_eq!(result.unwrap(), want);
        }
    }

    #[test]
    fn one_bad_scenario_does_not_stop_others() {
        let results = run_ensemble(vec![
            scenario(PolicyKind::Fcfs, 1),
            scenario(PolicyKind::DiscriminationFree, 0),
        ]);
        assert!(results[0].is_ok());
        assert!(results[1].is_err());
    }
}
