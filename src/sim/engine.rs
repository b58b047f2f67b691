//! Step driver: runs lifecycle, allocation, and energy updates in order and
//! records the result of every step.

use tracing::{info, trace};

use crate::error::SimError;

use super::clock::SimulationClock;
use super::lifecycle::LifecycleController;
use super::policy::{AllocationEngine, AllocationPolicy, Policy, SessionDemand};
use super::registry::SessionRegistry;
use super::scenario::Scenario;
use super::session::SessionOutcome;
use super::tree::CapacityTree;
use super::types::{RunReport, StepRecord};

/// Simulation engine owning the site, the sessions, and the policy state.
///
/// Generic over `P: AllocationPolicy` for static dispatch; [`Engine::new`]
/// builds the policy named in the scenario.
///
/// Steps are strictly sequential. A run can be stopped between any two calls
/// to [`Engine::step`], leaving a truncated but consistent record.
pub struct Engine<P: AllocationPolicy = Policy> {
    name: String,
    tree: CapacityTree,
    clock: SimulationClock,
    registry: SessionRegistry,
    lifecycle: LifecycleController,
    allocator: AllocationEngine<P>,
    records: Vec<StepRecord>,
}

impl Engine<Policy> {
    /// Creates an engine running the scenario's own policy.
    ///
    /// # Errors
    ///
    /// Returns `SimError` for a zero turn length, duplicate session ids, or a
    /// session arriving outside the run window.
    pub fn new(scenario: Scenario) -> Result<Self, SimError> {
        let policy = Policy::new(scenario.policy, scenario.turn_length)?;
        Self::with_policy(scenario, policy)
    }
}

impl<P: AllocationPolicy> Engine<P> {
    /// Creates an engine with a caller-supplied policy, ignoring the
    /// scenario's policy selection.
    ///
    /// # Errors
    ///
    /// Returns `SimError` for duplicate session ids or a session arriving
    /// outside the run window.
    pub fn with_policy(scenario: Scenario, policy: P) -> Result<Self, SimError> {
        scenario.validate()?;

        let registry = SessionRegistry::new(scenario.sessions)?;
        let lifecycle = LifecycleController::new(
            scenario.queue_length,
            scenario.disconnect_by_time,
            scenario.operating_hours,
        );
        let allocator = AllocationEngine::new(policy, scenario.tree.storage());
        let clock = SimulationClock::new(scenario.window);

        Ok(Self {
            name: scenario.name,
            records: Vec::with_capacity(clock.total()),
            tree: scenario.tree,
            clock,
            registry,
            lifecycle,
            allocator,
        })
    }

    /// Executes one full step and returns its record, or `None` once the run
    /// window is exhausted.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Domain` if a session's state of charge left `[0, 1]`.
    ///
    /// # Panics
    ///
    /// Panics if the allocation breaks a tree bound (see [`AllocationEngine::allocate`]).
    pub fn step(&mut self) -> Result<Option<&StepRecord>, SimError> {
        let Some((step, start)) = self.clock.tick() else {
            return Ok(None);
        };
        let window = *self.clock.window();
        let end = start + window.resolution;
        let dt_hours = window.dt_hours();

        // 1. Lifecycle
        self.lifecycle
            .begin_step(&mut self.registry, &self.tree, start, end);

        // 2. Allocation
        let demands = self.demands(dt_hours)?;
        let allocation = self.allocator.allocate(&self.tree, &demands, dt_hours);

        // 3. Energy update
        for d in &demands {
            let kw = allocation.outlet_power_kw.get(&d.outlet).copied().unwrap_or(0.0);
            self.registry.get_mut(d.session).charge(kw, dt_hours);
        }

        // 4. Departures at the end of the window
        self.lifecycle.end_step(&mut self.registry, end);

        trace!(
            step,
            connected = demands.len(),
            queued = self.lifecycle.queue().len(),
            "step committed"
        );
        self.records.push(StepRecord {
            step,
            time: start,
            outlet_power_kw: allocation.outlet_power_kw,
            storage_kw: allocation.storage_kw,
            storage_soe_kwh: allocation.storage_soe_kwh,
        });
        Ok(self.records.last())
    }

    /// What every connected session asks for, in service order.
    fn demands(&self, dt_hours: f32) -> Result<Vec<SessionDemand>, SimError> {
        let mut demands = Vec::new();
        for session in self.registry.connected() {
            let Some(outlet) = session.outlet() else {
                continue;
            };
            let node = self.tree.node(outlet);
            demands.push(SessionDemand {
                session: session.id,
                outlet,
                arrival_time: session.arrival_time,
                tree_rank: self.tree.tree_rank(outlet),
                desired_kw: session.desired_power_kw(node.max_power_kw, dt_hours)?,
                floor_kw: node.min_power_kw.max(session.vehicle.min_charge_power_kw),
            });
        }
        demands.sort_by_key(SessionDemand::order_key);
        Ok(demands)
    }

    /// Runs all remaining steps.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step; see [`Engine::step`].
    pub fn run(&mut self) -> Result<RunReport, SimError> {
        self.run_with_progress(|_| {})
    }

    /// Runs all remaining steps, reporting whole percentages as they change.
    ///
    /// Percentages never decrease and the last call reports 100.
    ///
    /// # Errors
    ///
    /// Stops at the first failing step; see [`Engine::step`].
    pub fn run_with_progress(
        &mut self,
        mut progress: impl FnMut(u8),
    ) -> Result<RunReport, SimError> {
        if self.clock.elapsed() == 0 {
            info!(
                scenario = %self.name,
                policy = self.allocator.policy().name(),
                steps = self.clock.total(),
                sessions = self.registry.len(),
                queue_capacity = self.lifecycle.queue().capacity(),
                "run start"
            );
        }

        let mut last = None;
        while self.step()?.is_some() {
            let pct = self.clock.percent_complete();
            if last != Some(pct) {
                progress(pct);
                last = Some(pct);
            }
        }
        if last != Some(100) {
            progress(100);
        }

        let counts = self.registry.status_counts();
        info!(
            scenario = %self.name,
            outcomes = ?counts,
            still_on_site = self.registry.active_count(),
            "run complete"
        );
        Ok(self.report())
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Current outcome of every session, ordered by arrival.
    pub fn outcomes(&self) -> Vec<SessionOutcome> {
        self.registry.outcomes()
    }

    /// Snapshot of the records and outcomes so far.
    pub fn report(&self) -> RunReport {
        RunReport {
            records: self.records.clone(),
            outcomes: self.outcomes(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn tree(&self) -> &CapacityTree {
        &self.tree
    }

    pub fn is_finished(&self) -> bool {
        self.clock.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::VehicleType;
    use crate::sim::policy::PolicyKind;
    use crate::sim::session::{ChargingSession, SessionId, SessionStatus};
    use crate::sim::types::RunWindow;
    use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
    use std::sync::Arc;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn scenario(policy: PolicyKind, steps: i64) -> Scenario {
        let window =
            RunWindow::new(t0(), t0() + TimeDelta::hours(steps), TimeDelta::hours(1)).unwrap();
        let tree = CapacityTree::wallbox(2, 11.0, 2, Some(10.0), None).unwrap();
        let ev = Arc::new(VehicleType::new("ev", 100.0, 0.0, 8.0, 1.0).unwrap());
        let sessions = (0..2)
            .map(|i| {
                let ev = Arc::clone(&ev);
                ChargingSession::new(SessionId(i), ev, t0(), TimeDelta::hours(3), 0.1, 1.0).unwrap()
            })
            .collect();
        Scenario::new("engine", tree, window)
            .with_sessions(sessions)
            .with_policy(policy)
    }

    #[test]
    fn records_one_entry_per_step() {
        let mut engine = Engine::new(scenario(PolicyKind::Fcfs, 4)).unwrap();
        let report = engine.run().unwrap();
        assert_eq!(report.records.len(), 4);
        assert!(engine.is_finished());
        assert!(engine.step().unwrap().is_none());
        for record in &report.records {
            assert_eq!(record.outlet_power_kw.len(), 2);
        }
    }

    #[test]
    fn energy_update_follows_assignment() {
        let mut engine = Engine::new(scenario(PolicyKind::Fcfs, 4)).unwrap();
        engine.step().unwrap();
        // 8 kW for one hour into 100 kWh.
        let first = engine.registry().get(SessionId(0));
        assert!((first.soc() - 0.18).abs() < 1e-5);
        let second = engine.registry().get(SessionId(1));
        assert!((second.soc() - 0.12).abs() < 1e-5);
    }

    #[test]
    fn sessions_depart_after_parking() {
        let mut engine = Engine::new(scenario(PolicyKind::Fcfs, 4)).unwrap();
        let report = engine.run().unwrap();
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.status == SessionStatus::Departed));
        assert_eq!(report.records[3].total_outlet_kw(), 0.0);
        assert_eq!(
            report.outcomes[0].ended_at,
            Some(t0() + TimeDelta::hours(3))
        );
    }

    #[test]
    fn progress_is_monotone_and_ends_at_100() {
        let mut engine = Engine::new(scenario(PolicyKind::Optimal, 3)).unwrap();
        let mut seen = Vec::new();
        engine.run_with_progress(|p| seen.push(p)).unwrap();
        assert_eq!(seen, vec![33, 66, 100]);
    }

    #[test]
    fn abort_between_steps_keeps_consistent_prefix() {
        let mut engine = Engine::new(scenario(PolicyKind::DiscriminationFree, 4)).unwrap();
        engine.step().unwrap();
        engine.step().unwrap();
        assert_eq!(engine.records().len(), 2);
        assert_eq!(engine.records()[1].step, 1);
        assert!(!engine.is_finished());
    }
}
