//! Charging sessions: one vehicle visit from arrival to departure.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDateTime, TimeDelta};

use crate::devices::VehicleType;
use crate::error::DomainError;

use super::tree::NodeId;

/// Identity of a charging session, unique within a scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u32);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Why a session never got (or lost) its place at the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No outlet was free and the waiting queue was full.
    QueueFull,
    /// The site was closed on arrival, or closed while the session waited.
    SiteClosed,
    /// The scheduled leave time passed before an outlet became free.
    LeftQueue,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Not yet arrived.
    Pending,
    Queued,
    Connected,
    Departed,
    Rejected(RejectReason),
}

impl SessionStatus {
    /// Whether the session can no longer change state.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Departed | Self::Rejected(_))
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Connected => "connected",
            Self::Departed => "departed",
            Self::Rejected(RejectReason::QueueFull) => "rejected_queue_full",
            Self::Rejected(RejectReason::SiteClosed) => "rejected_site_closed",
            Self::Rejected(RejectReason::LeftQueue) => "rejected_left_queue",
        };
        f.write_str(label)
    }
}

/// One vehicle visit.
///
/// The static attributes are sampled up front; `soc`, `status`, and the
/// outlet reference change as the run progresses.
#[derive(Debug, Clone)]
pub struct ChargingSession {
    pub id: SessionId,
    pub vehicle: Arc<VehicleType>,
    pub arrival_time: NaiveDateTime,
    pub parking_duration: TimeDelta,
    pub soc_arrival: f32,
    pub soc_target: f32,
    soc: f32,
    status: SessionStatus,
    outlet: Option<NodeId>,
    connected_at: Option<NaiveDateTime>,
    ended_at: Option<NaiveDateTime>,
}

impl ChargingSession {
    /// Creates a pending session.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SocOutOfRange` if either SOC lies outside `[0, 1]`
    /// and `DomainError::NonPositiveParking` for a zero or negative stay.
    pub fn new(
        id: SessionId,
        vehicle: Arc<VehicleType>,
        arrival_time: NaiveDateTime,
        parking_duration: TimeDelta,
        soc_arrival: f32,
        soc_target: f32,
    ) -> Result<Self, DomainError> {
        for soc in [soc_arrival, soc_target] {
            if !(0.0..=1.0).contains(&soc) {
                return Err(DomainError::SocOutOfRange(soc));
            }
        }
        if parking_duration <= TimeDelta::zero() {
            return Err(DomainError::NonPositiveParking(id.0));
        }

        Ok(Self {
            id,
            vehicle,
            arrival_time,
            parking_duration,
            soc_arrival,
            soc_target,
            soc: soc_arrival,
            status: SessionStatus::Pending,
            outlet: None,
            connected_at: None,
            ended_at: None,
        })
    }

    pub fn scheduled_leave_time(&self) -> NaiveDateTime {
        self.arrival_time + self.parking_duration
    }

    /// Current state of charge.
    pub fn soc(&self) -> f32 {
        self.soc
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Outlet occupied while connected; kept after departure for reporting.
    pub fn outlet(&self) -> Option<NodeId> {
        self.outlet
    }

    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    pub fn target_reached(&self) -> bool {
        self.soc >= self.soc_target
    }

    /// Power the vehicle would draw this step if nothing else constrained it.
    ///
    /// The charge curve at the current SOC, capped by the outlet ceiling and by
    /// the power that fills the battery within one step.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SocOutOfRange` if the SOC left `[0, 1]`.
    pub fn desired_power_kw(&self, outlet_max_kw: f32, dt_hours: f32) -> Result<f32, DomainError> {
        let curve_kw = self.vehicle.instantaneous_max_power_kw(self.soc)?;
        let to_full_kw = self.vehicle.power_to_full_kw(self.soc, dt_hours);
        Ok(curve_kw.min(outlet_max_kw).min(to_full_kw).max(0.0))
    }

    pub(crate) fn mark_queued(&mut self) {
        self.status = SessionStatus::Queued;
    }

    pub(crate) fn mark_connected(&mut self, outlet: NodeId, at: NaiveDateTime) {
        self.status = SessionStatus::Connected;
        self.outlet = Some(outlet);
        self.connected_at = Some(at);
    }

    pub(crate) fn mark_departed(&mut self, at: NaiveDateTime) {
        self.status = SessionStatus::Departed;
        self.ended_at = Some(at);
    }

    pub(crate) fn mark_rejected(&mut self, reason: RejectReason, at: NaiveDateTime) {
        self.status = SessionStatus::Rejected(reason);
        self.ended_at = Some(at);
    }

    /// Applies one step of charging at `power_kw`.
    pub(crate) fn charge(&mut self, power_kw: f32, dt_hours: f32) {
        self.soc = self.vehicle.charged_soc(self.soc, power_kw, dt_hours);
    }

    /// Final view of the session for reporting.
    pub fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            id: self.id,
            vehicle: self.vehicle.name.clone(),
            status: self.status,
            outlet: self.outlet,
            arrival_time: self.arrival_time,
            connected_at: self.connected_at,
            ended_at: self.ended_at,
            soc_arrival: self.soc_arrival,
            soc_final: self.soc,
        }
    }
}

/// What happened to one session over a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub id: SessionId,
    pub vehicle: String,
    pub status: SessionStatus,
    pub outlet: Option<NodeId>,
    pub arrival_time: NaiveDateTime,
    pub connected_at: Option<NaiveDateTime>,
    /// Realized departure time, or the time of rejection.
    pub ended_at: Option<NaiveDateTime>,
    pub soc_arrival: f32,
    pub soc_final: f32,
}
