//! Session registry: owns every session of a run and the outlet occupancy map.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;

use crate::error::ConfigurationError;

use super::session::{ChargingSession, RejectReason, SessionId, SessionOutcome, SessionStatus};
use super::tree::{CapacityTree, NodeId};

/// Owner of all sessions for the lifetime of a run.
///
/// Sessions are kept sorted by arrival time (ties by id), so arrivals can be
/// consumed with a cursor as the clock advances.
#[derive(Debug, Clone)]
pub struct SessionRegistry {
    sessions: Vec<ChargingSession>,
    index: HashMap<SessionId, usize>,
    occupancy: BTreeMap<NodeId, SessionId>,
    next_arrival: usize,
}

impl SessionRegistry {
    /// Takes ownership of `sessions`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::DuplicateSession` if two sessions share an id.
    pub fn new(mut sessions: Vec<ChargingSession>) -> Result<Self, ConfigurationError> {
        sessions.sort_by_key(|s| (s.arrival_time, s.id));

        let mut index = HashMap::with_capacity(sessions.len());
        for (i, session) in sessions.iter().enumerate() {
            if index.insert(session.id, i).is_some() {
                return Err(ConfigurationError::DuplicateSession(session.id.0));
            }
        }

        Ok(Self {
            sessions,
            index,
            occupancy: BTreeMap::new(),
            next_arrival: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `id` is not registered.
    pub fn get(&self, id: SessionId) -> &ChargingSession {
        &self.sessions[self.index[&id]]
    }

    pub(crate) fn get_mut(&mut self, id: SessionId) -> &mut ChargingSession {
        let i = self.index[&id];
        &mut self.sessions[i]
    }

    /// All sessions, ordered by arrival.
    pub fn iter(&self) -> impl Iterator<Item = &ChargingSession> {
        self.sessions.iter()
    }

    /// Takes the ids of pending sessions arriving before `until`, in arrival order.
    pub(crate) fn take_arrivals(&mut self, until: NaiveDateTime) -> Vec<SessionId> {
        let mut arrived = Vec::new();
        while let Some(session) = self.sessions.get(self.next_arrival) {
            if session.arrival_time >= until {
                break;
            }
            arrived.push(session.id);
            self.next_arrival += 1;
        }
        arrived
    }

    /// Connected sessions, ordered by arrival.
    pub fn connected(&self) -> impl Iterator<Item = &ChargingSession> {
        self.sessions.iter().filter(|s| s.is_connected())
    }

    /// Session currently plugged into `outlet`.
    pub fn occupant(&self, outlet: NodeId) -> Option<SessionId> {
        self.occupancy.get(&outlet).copied()
    }

    /// Lowest-tree-order outlet with no session plugged in.
    pub fn first_free_outlet(&self, tree: &CapacityTree) -> Option<NodeId> {
        tree.outlets()
            .iter()
            .copied()
            .find(|o| !self.occupancy.contains_key(o))
    }

    pub(crate) fn connect(&mut self, id: SessionId, outlet: NodeId, at: NaiveDateTime) {
        debug_assert!(!self.occupancy.contains_key(&outlet), "outlet {outlet} is occupied");
        self.occupancy.insert(outlet, id);
        self.get_mut(id).mark_connected(outlet, at);
    }

    pub(crate) fn disconnect(&mut self, id: SessionId, at: NaiveDateTime) {
        if let Some(outlet) = self.get(id).outlet() {
            self.occupancy.remove(&outlet);
        }
        self.get_mut(id).mark_departed(at);
    }

    pub(crate) fn enqueue(&mut self, id: SessionId) {
        self.get_mut(id).mark_queued();
    }

    pub(crate) fn reject(&mut self, id: SessionId, reason: RejectReason, at: NaiveDateTime) {
        self.get_mut(id).mark_rejected(reason, at);
    }

    /// Number of sessions per status, keyed by the status label.
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for s in &self.sessions {
            *counts.entry(s.status().to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Final outcome of every session, ordered by arrival.
    pub fn outcomes(&self) -> Vec<SessionOutcome> {
        self.sessions.iter().map(ChargingSession::outcome).collect()
    }

    /// Sessions still waiting or connected.
    pub fn active_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| matches!(s.status(), SessionStatus::Queued | SessionStatus::Connected))
            .count()
    }
}
