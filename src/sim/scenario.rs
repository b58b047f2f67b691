//! The immutable input of one run.

use std::sync::Arc;

use crate::devices::VehicleType;
use crate::error::{DomainError, SimError};

use super::policy::PolicyKind;
use super::session::ChargingSession;
use super::tree::CapacityTree;
use super::types::{OperatingHours, RunWindow};

/// Everything the engine needs to run: the site, the sessions, and the rules.
///
/// Sessions are pre-sampled; the engine never generates arrivals itself.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    /// Capacity tree, including the storage attachment if any.
    pub tree: CapacityTree,
    pub vehicle_types: Vec<Arc<VehicleType>>,
    pub sessions: Vec<ChargingSession>,
    pub policy: PolicyKind,
    /// Steps per discrimination-free turn.
    pub turn_length: usize,
    pub queue_length: usize,
    pub disconnect_by_time: bool,
    pub operating_hours: Option<OperatingHours>,
    pub window: RunWindow,
}

impl Scenario {
    /// A scenario with no sessions, FCFS allocation, no queue, and
    /// time-based disconnects.
    pub fn new(name: impl Into<String>, tree: CapacityTree, window: RunWindow) -> Self {
        Self {
            name: name.into(),
            tree,
            vehicle_types: Vec::new(),
            sessions: Vec::new(),
            policy: PolicyKind::Fcfs,
            turn_length: 1,
            queue_length: 0,
            disconnect_by_time: true,
            operating_hours: None,
            window,
        }
    }

    pub fn with_sessions(mut self, sessions: Vec<ChargingSession>) -> Self {
        for session in &sessions {
            if !self
                .vehicle_types
                .iter()
                .any(|v| Arc::ptr_eq(v, &session.vehicle))
            {
                self.vehicle_types.push(Arc::clone(&session.vehicle));
            }
        }
        self.sessions = sessions;
        self
    }

    pub fn with_policy(mut self, policy: PolicyKind) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_turn_length(mut self, turn_length: usize) -> Self {
        self.turn_length = turn_length;
        self
    }

    pub fn with_queue_length(mut self, queue_length: usize) -> Self {
        self.queue_length = queue_length;
        self
    }

    pub fn with_disconnect_by_time(mut self, by_time: bool) -> Self {
        self.disconnect_by_time = by_time;
        self
    }

    pub fn with_operating_hours(mut self, hours: OperatingHours) -> Self {
        self.operating_hours = Some(hours);
        self
    }

    /// Checks that every session arrives inside the run window.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ArrivalOutsideRun` for the first offending session.
    pub fn validate(&self) -> Result<(), SimError> {
        if let Some(session) = self
            .sessions
            .iter()
            .find(|s| !self.window.contains(s.arrival_time))
        {
            return Err(DomainError::ArrivalOutsideRun {
                session: session.id.0,
                arrival: session.arrival_time,
            }
            .into());
        }
        Ok(())
    }
}
