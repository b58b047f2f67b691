//! Error taxonomy shared by the tree, fleet, and engine modules.

use chrono::NaiveDateTime;

/// Invalid scenario input, detected before the first step runs.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("node `{node}`: min_power {min_kw} kW exceeds max_power {max_kw} kW")]
    FloorAboveCeiling {
        node: String,
        min_kw: f32,
        max_kw: f32,
    },

    #[error("node `{node}`: power limits must be finite and non-negative")]
    InvalidLimit { node: String },

    #[error("outlet `{0}` cannot have children")]
    OutletWithChildren(String),

    #[error("the capacity tree needs exactly one feeder as its root")]
    MissingFeeder,

    #[error("feeder `{0}` must be the only root of the capacity tree")]
    DuplicateFeeder(String),

    #[error("duplicate node name `{0}`")]
    DuplicateNode(String),

    #[error("unknown node `{0}`")]
    UnknownNode(String),

    #[error("the capacity tree has no outlets")]
    NoOutlets,

    #[error("storage cannot be attached to outlet `{0}`")]
    StorageOnOutlet(String),

    #[error("invalid storage buffer: {0}")]
    InvalidStorage(String),

    #[error("wallbox site: {outlets} outlets do not split into branches of {per_branch}")]
    UnevenWallbox { outlets: usize, per_branch: usize },

    #[error("run end {end} is not after start {start}")]
    EmptyRun {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },

    #[error("step resolution must be positive")]
    NonPositiveResolution,

    #[error("run length of {run_secs}s is not a multiple of the {step_secs}s step")]
    RunLengthNotDivisible { run_secs: i64, step_secs: i64 },

    #[error("vehicle type `{name}`: {reason}")]
    InvalidVehicleType { name: String, reason: String },

    #[error("unknown vehicle type `{0}`")]
    UnknownVehicleType(String),

    #[error("discrimination-free turn length must be at least one step")]
    ZeroTurnLength,

    #[error("operating hours open and close at the same time")]
    EmptyOperatingHours,

    #[error("duplicate session id {0}")]
    DuplicateSession(u32),

    #[error("invalid date or time `{0}`")]
    InvalidTimestamp(String),

    #[error("unknown allocation policy `{0}`")]
    UnknownPolicy(String),
}

/// A state-of-charge or time value outside its valid range.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    #[error("state of charge {0} is outside [0, 1]")]
    SocOutOfRange(f32),

    #[error("session {session}: arrival {arrival} is outside the run window")]
    ArrivalOutsideRun { session: u32, arrival: NaiveDateTime },

    #[error("session {0}: parking duration must be positive")]
    NonPositiveParking(u32),
}

/// Any failure a run can report to its caller.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

/// An allocation that broke a capacity-tree bound.
///
/// Produced only by the engine's own verification pass. Seeing one means the
/// allocation code is wrong, not the input, so the engine panics with it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("allocation invariant violated at node `{node}`: {detail}")]
pub struct AllocationInvariantViolation {
    pub node: String,
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_wraps_into_sim_error() {
        let err: SimError = ConfigurationError::ZeroTurnLength.into();
        assert!(matches!(err, SimError::Configuration(_)));
        assert_eq!(
            err.to_string(),
            "discrimination-free turn length must be at least one step"
        );
    }

    #[test]
    fn domain_error_message_names_value() {
        let err = DomainError::SocOutOfRange(1.5);
        assert!(err.to_string().contains("1.5"));
    }
}
