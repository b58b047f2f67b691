//! TOML-based scenario configuration and preset definitions.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};
use serde::Deserialize;

use crate::devices::{StorageBuffer, VehicleType};
use crate::error::{ConfigurationError, SimError};
use crate::sim::policy::PolicyKind;
use crate::sim::scenario::Scenario;
use crate::sim::session::{ChargingSession, SessionId};
use crate::sim::tree::{CapacityTree, NodeId, NodeKind, TreeBuilder};
use crate::sim::types::{OperatingHours, RunWindow};

/// Top-level scenario configuration parsed from TOML.
///
/// Load from TOML with [`ScenarioConfig::from_toml_file`] or start from a
/// built-in preset with [`ScenarioConfig::from_preset`]. Call
/// [`ScenarioConfig::validate`] to collect every field error, then
/// [`ScenarioConfig::into_scenario`] to build the engine input.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Run window and allocation rules.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Daily opening window; the site is always open when absent.
    #[serde(default)]
    pub operating_hours: Option<OperatingHoursConfig>,
    /// The capacity tree.
    pub infrastructure: InfrastructureConfig,
    /// Optional storage buffer.
    #[serde(default)]
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub vehicle_types: Vec<VehicleTypeConfig>,
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

/// Run window and allocation rules.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Scenario label used in logs.
    pub name: String,
    /// First instant of the run (`YYYY-MM-DDTHH:MM:SS`).
    pub start: String,
    /// End of the run, exclusive.
    pub end: String,
    /// Step length in minutes (must divide the run length).
    pub resolution_minutes: i64,
    /// One of `"uncontrolled"`, `"fcfs"`, `"discrimination_free"`, `"optimal"`.
    pub policy: String,
    /// Steps per discrimination-free turn.
    pub turn_length: usize,
    /// Waiting-queue capacity; 0 disables queueing.
    pub queue_length: usize,
    /// Disconnect at the scheduled leave time (`true`) or once the SOC target
    /// is reached (`false`).
    pub disconnect_by_time: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            name: "scenario".to_string(),
            start: "2024-01-01T00:00:00".to_string(),
            end: "2024-01-02T00:00:00".to_string(),
            resolution_minutes: 15,
            policy: "fcfs".to_string(),
            turn_length: 1,
            queue_length: 0,
            disconnect_by_time: true,
        }
    }
}

/// Daily opening window. `close` before `open` wraps past midnight.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OperatingHoursConfig {
    /// Opening time (`HH:MM:SS`).
    pub open: String,
    /// Closing time (`HH:MM:SS`).
    pub close: String,
}

/// The capacity tree, either spelled out node by node or as a uniform
/// wallbox site. Exactly one of the two must be given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InfrastructureConfig {
    /// Root nodes; must hold exactly one feeder.
    pub feeders: Vec<NodeConfig>,
    /// Uniform feeder, branch, and outlet layout.
    pub wallbox: Option<WallboxConfig>,
}

/// One node of the capacity tree. Leaves are outlets, inner nodes branches.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    pub name: String,
    pub max_power_kw: f32,
    #[serde(default)]
    pub min_power_kw: f32,
    #[serde(default)]
    pub children: Vec<NodeConfig>,
}

/// Parameters of [`CapacityTree::wallbox`].
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WallboxConfig {
    pub outlets: usize,
    pub outlet_power_kw: f32,
    pub outlets_per_branch: usize,
    /// Defaults to the sum of the outlets beneath.
    #[serde(default)]
    pub branch_power_kw: Option<f32>,
    /// Defaults to the sum of all outlets.
    #[serde(default)]
    pub feeder_power_kw: Option<f32>,
}

/// Storage buffer parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Name of the feeder or branch the buffer sits on.
    pub node: String,
    pub capacity_kwh: f32,
    /// Charge and discharge power ceiling (kW).
    pub max_power_kw: f32,
    #[serde(default)]
    pub initial_energy_kwh: f32,
    #[serde(default = "unit_efficiency")]
    pub efficiency: f32,
}

/// A vehicle model referenced by name from sessions.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleTypeConfig {
    pub name: String,
    pub battery_capacity_kwh: f32,
    #[serde(default)]
    pub min_charge_power_kw: f32,
    pub max_charge_power_kw: f32,
    #[serde(default = "unit_efficiency")]
    pub efficiency: f32,
    /// SOC where the charge curve starts tapering.
    #[serde(default)]
    pub derate_start_soc: Option<f32>,
    /// Fraction of max power left at 100% SOC.
    #[serde(default)]
    pub derate_floor_fraction: Option<f32>,
}

/// One pre-sampled charging session. Session ids follow list order.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    pub vehicle: String,
    /// Arrival time (`YYYY-MM-DDTHH:MM:SS`).
    pub arrival: String,
    pub parking_minutes: i64,
    pub soc_arrival: f32,
    pub soc_target: f32,
}

fn unit_efficiency() -> f32 {
    1.0
}

/// Configuration error with field path and constraint description.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"simulation.resolution_minutes"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl ConfigError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn parse_datetime(s: &str) -> Result<NaiveDateTime, ConfigurationError> {
    s.parse()
        .map_err(|_| ConfigurationError::InvalidTimestamp(s.to_string()))
}

fn parse_time(s: &str) -> Result<NaiveTime, ConfigurationError> {
    s.parse()
        .map_err(|_| ConfigurationError::InvalidTimestamp(s.to_string()))
}

fn node(name: &str, max_power_kw: f32, min_power_kw: f32, children: Vec<NodeConfig>) -> NodeConfig {
    NodeConfig {
        name: name.to_string(),
        max_power_kw,
        min_power_kw,
        children,
    }
}

fn session(
    vehicle: &str,
    arrival: &str,
    parking_minutes: i64,
    soc_arrival: f32,
    soc_target: f32,
) -> SessionConfig {
    SessionConfig {
        vehicle: vehicle.to_string(),
        arrival: arrival.to_string(),
        parking_minutes,
        soc_arrival,
        soc_target,
    }
}

fn compact_car() -> VehicleTypeConfig {
    VehicleTypeConfig {
        name: "compact".to_string(),
        battery_capacity_kwh: 40.0,
        min_charge_power_kw: 1.0,
        max_charge_power_kw: 11.0,
        efficiency: 0.9,
        derate_start_soc: Some(0.8),
        derate_floor_fraction: Some(0.25),
    }
}

fn delivery_van() -> VehicleTypeConfig {
    VehicleTypeConfig {
        name: "van".to_string(),
        battery_capacity_kwh: 75.0,
        min_charge_power_kw: 1.4,
        max_charge_power_kw: 7.4,
        efficiency: 0.92,
        derate_start_soc: None,
        derate_floor_fraction: None,
    }
}

impl ScenarioConfig {
    /// Returns the two-branch reference site: a 100/10 kW feeder, two 10/1 kW
    /// branches, and four 5/0.5 kW outlets, with enough sessions to fill the
    /// outlets, queue two vehicles, and turn one away.
    pub fn two_branch() -> Self {
        let outlet = |name: &str| node(name, 5.0, 0.5, Vec::new());
        Self {
            simulation: SimulationConfig {
                name: "two_branch".to_string(),
                start: "2024-01-01T08:00:00".to_string(),
                end: "2024-01-01T14:00:00".to_string(),
                resolution_minutes: 15,
                policy: "fcfs".to_string(),
                turn_length: 4,
                queue_length: 2,
                disconnect_by_time: true,
            },
            operating_hours: None,
            infrastructure: InfrastructureConfig {
                feeders: vec![node(
                    "grid",
                    100.0,
                    10.0,
                    vec![
                        node("cs1", 10.0, 1.0, vec![outlet("cp1"), outlet("cp2")]),
                        node("cs2", 10.0, 1.0, vec![outlet("cp3"), outlet("cp4")]),
                    ],
                )],
                wallbox: None,
            },
            storage: None,
            vehicle_types: vec![compact_car(), delivery_van()],
            sessions: vec![
                session("compact", "2024-01-01T08:00:00", 180, 0.2, 0.8),
                session("van", "2024-01-01T08:00:00", 240, 0.1, 0.9),
                session("compact", "2024-01-01T08:15:00", 120, 0.3, 0.8),
                session("van", "2024-01-01T08:30:00", 180, 0.25, 0.9),
                session("compact", "2024-01-01T08:45:00", 150, 0.4, 0.9),
                session("van", "2024-01-01T09:00:00", 240, 0.2, 0.7),
                session("compact", "2024-01-01T09:00:00", 60, 0.5, 0.9),
                session("van", "2024-01-01T11:30:00", 120, 0.3, 0.8),
            ],
        }
    }

    /// Returns a uniform wallbox depot: eight 11 kW outlets on two 22 kW
    /// branches behind a 40 kW feeder, a storage buffer on the feeder, and
    /// opening hours from 06:00 to 22:00.
    pub fn wallbox() -> Self {
        let suv = VehicleTypeConfig {
            name: "suv".to_string(),
            battery_capacity_kwh: 90.0,
            min_charge_power_kw: 1.4,
            max_charge_power_kw: 11.0,
            efficiency: 0.92,
            derate_start_soc: Some(0.7),
            derate_floor_fraction: Some(0.3),
        };
        Self {
            simulation: SimulationConfig {
                name: "wallbox".to_string(),
                start: "2024-01-01T06:00:00".to_string(),
                end: "2024-01-02T00:00:00".to_string(),
                resolution_minutes: 15,
                policy: "optimal".to_string(),
                turn_length: 2,
                queue_length: 4,
                disconnect_by_time: true,
            },
            operating_hours: Some(OperatingHoursConfig {
                open: "06:00:00".to_string(),
                close: "22:00:00".to_string(),
            }),
            infrastructure: InfrastructureConfig {
                feeders: Vec::new(),
                wallbox: Some(WallboxConfig {
                    outlets: 8,
                    outlet_power_kw: 11.0,
                    outlets_per_branch: 4,
                    branch_power_kw: Some(22.0),
                    feeder_power_kw: Some(40.0),
                }),
            },
            storage: Some(StorageConfig {
                node: "feeder".to_string(),
                capacity_kwh: 30.0,
                max_power_kw: 15.0,
                initial_energy_kwh: 15.0,
                efficiency: 0.95,
            }),
            vehicle_types: vec![compact_car(), suv],
            sessions: vec![
                session("compact", "2024-01-01T06:30:00", 240, 0.2, 0.8),
                session("suv", "2024-01-01T07:00:00", 300, 0.15, 0.9),
                session("suv", "2024-01-01T07:00:00", 480, 0.3, 0.8),
                session("compact", "2024-01-01T07:15:00", 180, 0.1, 0.9),
                session("suv", "2024-01-01T07:45:00", 360, 0.25, 0.8),
                session("compact", "2024-01-01T08:00:00", 120, 0.4, 0.9),
                session("suv", "2024-01-01T08:00:00", 240, 0.2, 0.9),
                session("compact", "2024-01-01T08:30:00", 300, 0.35, 0.8),
                session("suv", "2024-01-01T09:00:00", 180, 0.1, 0.7),
                session("compact", "2024-01-01T09:00:00", 90, 0.5, 0.9),
                session("suv", "2024-01-01T12:00:00", 240, 0.2, 0.8),
                session("compact", "2024-01-01T17:30:00", 360, 0.3, 0.9),
                session("suv", "2024-01-01T18:00:00", 300, 0.15, 0.8),
                session("compact", "2024-01-01T22:30:00", 60, 0.4, 0.8),
            ],
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["two_branch", "wallbox"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "two_branch" => Ok(Self::two_branch()),
            "wallbox" => Ok(Self::wallbox()),
            _ => Err(ConfigError::new(
                "preset",
                format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            )),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| {
            ConfigError::new("scenario", format!("cannot read \"{}\": {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError::new("toml", e.to_string()))
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let window = self.validate_simulation(&mut errors);

        if let Some(hours) = &self.operating_hours {
            let open = parse_time(&hours.open);
            let close = parse_time(&hours.close);
            if open.is_err() {
                errors.push(ConfigError::new("operating_hours.open", "expected HH:MM:SS"));
            }
            if close.is_err() {
                errors.push(ConfigError::new("operating_hours.close", "expected HH:MM:SS"));
            }
            if let (Ok(open), Ok(close)) = (open, close) {
                if open == close {
                    errors.push(ConfigError::new(
                        "operating_hours.close",
                        "must differ from operating_hours.open",
                    ));
                }
            }
        }

        let infra_errors = errors.len();
        self.validate_infrastructure(&mut errors);
        if errors.len() == infra_errors {
            match self.infrastructure.build_tree() {
                Ok(tree) => self.validate_storage(&tree, &mut errors),
                Err(e) => errors.push(ConfigError::new("infrastructure", e.to_string())),
            }
        }

        self.validate_vehicle_types(&mut errors);
        self.validate_sessions(window, &mut errors);
        errors
    }

    fn validate_simulation(
        &self,
        errors: &mut Vec<ConfigError>,
    ) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let s = &self.simulation;
        let start = parse_datetime(&s.start);
        let end = parse_datetime(&s.end);
        if start.is_err() {
            errors.push(ConfigError::new(
                "simulation.start",
                "expected a date-time such as 2024-01-01T08:00:00",
            ));
        }
        if end.is_err() {
            errors.push(ConfigError::new(
                "simulation.end",
                "expected a date-time such as 2024-01-01T08:00:00",
            ));
        }

        let mut window = None;
        if let (Ok(start), Ok(end)) = (start, end) {
            if end <= start {
                errors.push(ConfigError::new("simulation.end", "must be after simulation.start"));
            } else {
                window = Some((start, end));
            }
        }

        if s.resolution_minutes <= 0 {
            errors.push(ConfigError::new("simulation.resolution_minutes", "must be > 0"));
        } else if let Some((start, end)) = window {
            if (end - start).num_minutes() % s.resolution_minutes != 0 {
                errors.push(ConfigError::new(
                    "simulation.resolution_minutes",
                    "must divide the run length",
                ));
            }
        }

        if s.policy.parse::<PolicyKind>().is_err() {
            errors.push(ConfigError::new(
                "simulation.policy",
                format!(
                    "must be one of {}, got \"{}\"",
                    PolicyKind::NAMES.join(", "),
                    s.policy
                ),
            ));
        }
        if s.turn_length == 0 {
            errors.push(ConfigError::new("simulation.turn_length", "must be > 0"));
        }
        window
    }

    fn validate_infrastructure(&self, errors: &mut Vec<ConfigError>) {
        let infra = &self.infrastructure;
        match (infra.feeders.len(), &infra.wallbox) {
            (0, None) => errors.push(ConfigError::new(
                "infrastructure.feeders",
                "exactly one feeder is required",
            )),
            (0, Some(wallbox)) => {
                if wallbox.outlets == 0 {
                    errors.push(ConfigError::new("infrastructure.wallbox.outlets", "must be > 0"));
                }
                if wallbox.outlets_per_branch == 0 {
                    errors.push(ConfigError::new(
                        "infrastructure.wallbox.outlets_per_branch",
                        "must be > 0",
                    ));
                } else if wallbox.outlets % wallbox.outlets_per_branch != 0 {
                    errors.push(ConfigError::new(
                        "infrastructure.wallbox.outlets",
                        "must be a multiple of outlets_per_branch",
                    ));
                }
                let limits = [
                    ("outlet_power_kw", Some(wallbox.outlet_power_kw)),
                    ("branch_power_kw", wallbox.branch_power_kw),
                    ("feeder_power_kw", wallbox.feeder_power_kw),
                ];
                for (field, value) in limits {
                    if value.is_some_and(|kw| !(kw.is_finite() && kw >= 0.0)) {
                        errors.push(ConfigError::new(
                            format!("infrastructure.wallbox.{field}"),
                            "must be >= 0",
                        ));
                    }
                }
            }
            (_, Some(_)) => errors.push(ConfigError::new(
                "infrastructure",
                "give either feeders or wallbox, not both",
            )),
            (1, None) => {
                let mut names = BTreeSet::new();
                validate_node(
                    &infra.feeders[0],
                    "infrastructure.feeders[0]".to_string(),
                    &mut names,
                    errors,
                );
                if infra.feeders[0].children.is_empty() {
                    errors.push(ConfigError::new(
                        "infrastructure.feeders[0].children",
                        "the feeder needs at least one outlet",
                    ));
                }
            }
            (n, None) => errors.push(ConfigError::new(
                "infrastructure.feeders",
                format!("exactly one feeder is allowed, got {n}"),
            )),
        }
    }

    fn validate_storage(&self, tree: &CapacityTree, errors: &mut Vec<ConfigError>) {
        let Some(storage) = &self.storage else {
            return;
        };
        match tree.find(&storage.node) {
            None => errors.push(ConfigError::new(
                "storage.node",
                format!("unknown node \"{}\"", storage.node),
            )),
            Some(id) if tree.node(id).kind == NodeKind::Outlet => errors.push(ConfigError::new(
                "storage.node",
                "must be a feeder or branch, not an outlet",
            )),
            Some(_) => {}
        }
        if !(storage.capacity_kwh.is_finite() && storage.capacity_kwh >= 0.0) {
            errors.push(ConfigError::new("storage.capacity_kwh", "must be >= 0"));
        }
        if !(storage.max_power_kw.is_finite() && storage.max_power_kw >= 0.0) {
            errors.push(ConfigError::new("storage.max_power_kw", "must be >= 0"));
        }
        if !(0.0..=storage.capacity_kwh).contains(&storage.initial_energy_kwh) {
            errors.push(ConfigError::new(
                "storage.initial_energy_kwh",
                "must be in [0.0, storage.capacity_kwh]",
            ));
        }
        if !(storage.efficiency > 0.0 && storage.efficiency <= 1.0) {
            errors.push(ConfigError::new("storage.efficiency", "must be in (0.0, 1.0]"));
        }
    }

    fn validate_vehicle_types(&self, errors: &mut Vec<ConfigError>) {
        let mut names = BTreeSet::new();
        for (i, v) in self.vehicle_types.iter().enumerate() {
            let field = |name: &str| format!("vehicle_types[{i}].{name}");
            if !names.insert(v.name.as_str()) {
                errors.push(ConfigError::new(
                    field("name"),
                    format!("duplicate vehicle type \"{}\"", v.name),
                ));
            }
            if !(v.battery_capacity_kwh.is_finite() && v.battery_capacity_kwh > 0.0) {
                errors.push(ConfigError::new(field("battery_capacity_kwh"), "must be > 0"));
            }
            if !(v.min_charge_power_kw.is_finite() && v.min_charge_power_kw >= 0.0) {
                errors.push(ConfigError::new(field("min_charge_power_kw"), "must be >= 0"));
            }
            if !(v.max_charge_power_kw.is_finite() && v.max_charge_power_kw > 0.0) {
                errors.push(ConfigError::new(field("max_charge_power_kw"), "must be > 0"));
            } else if v.min_charge_power_kw > v.max_charge_power_kw {
                errors.push(ConfigError::new(
                    field("min_charge_power_kw"),
                    "must be <= max_charge_power_kw",
                ));
            }
            if !(v.efficiency > 0.0 && v.efficiency <= 1.0) {
                errors.push(ConfigError::new(field("efficiency"), "must be in (0.0, 1.0]"));
            }
            match (v.derate_start_soc, v.derate_floor_fraction) {
                (None, None) => {}
                (Some(start), Some(fraction)) => {
                    if !(0.0..1.0).contains(&start) {
                        errors.push(ConfigError::new(
                            field("derate_start_soc"),
                            "must be in [0.0, 1.0)",
                        ));
                    }
                    if !(0.0..=1.0).contains(&fraction) {
                        errors.push(ConfigError::new(
                            field("derate_floor_fraction"),
                            "must be in [0.0, 1.0]",
                        ));
                    }
                }
                _ => errors.push(ConfigError::new(
                    field("derate_start_soc"),
                    "derate_start_soc and derate_floor_fraction go together",
                )),
            }
        }
    }

    fn validate_sessions(
        &self,
        window: Option<(NaiveDateTime, NaiveDateTime)>,
        errors: &mut Vec<ConfigError>,
    ) {
        for (i, s) in self.sessions.iter().enumerate() {
            let field = |name: &str| format!("sessions[{i}].{name}");
            if !self.vehicle_types.iter().any(|v| v.name == s.vehicle) {
                errors.push(ConfigError::new(
                    field("vehicle"),
                    format!("unknown vehicle type \"{}\"", s.vehicle),
                ));
            }
            match parse_datetime(&s.arrival) {
                Err(_) => errors.push(ConfigError::new(
                    field("arrival"),
                    "expected a date-time such as 2024-01-01T08:00:00",
                )),
                Ok(arrival) => {
                    let inside = window.is_none_or(|(start, end)| (start..end).contains(&arrival));
                    if !inside {
                        errors.push(ConfigError::new(
                            field("arrival"),
                            "must lie in [simulation.start, simulation.end)",
                        ));
                    }
                }
            }
            if s.parking_minutes <= 0 {
                errors.push(ConfigError::new(field("parking_minutes"), "must be > 0"));
            }
            if !(0.0..=1.0).contains(&s.soc_arrival) {
                errors.push(ConfigError::new(field("soc_arrival"), "must be in [0.0, 1.0]"));
            }
            if !(0.0..=1.0).contains(&s.soc_target) {
                errors.push(ConfigError::new(field("soc_target"), "must be in [0.0, 1.0]"));
            }
        }
    }

    /// Builds the engine input.
    ///
    /// Intended for configs that passed [`ScenarioConfig::validate`]; anything
    /// it missed is still caught by the model constructors.
    ///
    /// # Errors
    ///
    /// Returns `SimError::Configuration` for an invalid tree, run window,
    /// vehicle type, or storage settings, and `SimError::Domain` for a session
    /// with out-of-range values.
    pub fn into_scenario(&self) -> Result<Scenario, SimError> {
        let s = &self.simulation;
        let window = RunWindow::new(
            parse_datetime(&s.start)?,
            parse_datetime(&s.end)?,
            TimeDelta::minutes(s.resolution_minutes),
        )?;
        let policy: PolicyKind = s
            .policy
            .parse()
            .map_err(|_| ConfigurationError::UnknownPolicy(s.policy.clone()))?;

        let mut tree = self.infrastructure.build_tree()?;
        if let Some(storage) = &self.storage {
            let node = tree
                .find(&storage.node)
                .ok_or_else(|| ConfigurationError::UnknownNode(storage.node.clone()))?;
            let buffer = StorageBuffer::new(
                storage.capacity_kwh,
                storage.max_power_kw,
                storage.initial_energy_kwh,
                storage.efficiency,
            )?;
            tree = tree.with_storage(node, buffer)?;
        }

        let vehicle_types = self
            .vehicle_types
            .iter()
            .map(|v| v.build().map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        let mut sessions = Vec::with_capacity(self.sessions.len());
        for (i, cfg) in self.sessions.iter().enumerate() {
            let vehicle = vehicle_types
                .iter()
                .find(|v| v.name == cfg.vehicle)
                .ok_or_else(|| ConfigurationError::UnknownVehicleType(cfg.vehicle.clone()))?;
            sessions.push(ChargingSession::new(
                SessionId(i as u32),
                Arc::clone(vehicle),
                parse_datetime(&cfg.arrival)?,
                TimeDelta::minutes(cfg.parking_minutes),
                cfg.soc_arrival,
                cfg.soc_target,
            )?);
        }

        let mut scenario = Scenario::new(s.name.clone(), tree, window)
            .with_sessions(sessions)
            .with_policy(policy)
            .with_turn_length(s.turn_length)
            .with_queue_length(s.queue_length)
            .with_disconnect_by_time(s.disconnect_by_time);
        scenario.vehicle_types = vehicle_types;
        if let Some(hours) = &self.operating_hours {
            let hours = OperatingHours::new(parse_time(&hours.open)?, parse_time(&hours.close)?)?;
            scenario = scenario.with_operating_hours(hours);
        }

        scenario.validate()?;
        Ok(scenario)
    }
}

impl InfrastructureConfig {
    /// Builds the capacity tree without storage.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::MissingFeeder` or `DuplicateFeeder` unless
    /// exactly one feeder (or one wallbox layout) is given, and the tree
    /// builder's errors for inconsistent nodes.
    pub fn build_tree(&self) -> Result<CapacityTree, ConfigurationError> {
        match (self.feeders.as_slice(), &self.wallbox) {
            ([], Some(w)) => CapacityTree::wallbox(
                w.outlets,
                w.outlet_power_kw,
                w.outlets_per_branch,
                w.branch_power_kw,
                w.feeder_power_kw,
            ),
            ([], None) => Err(ConfigurationError::MissingFeeder),
            ([feeder], None) => {
                let mut builder =
                    CapacityTree::builder(&feeder.name, feeder.max_power_kw, feeder.min_power_kw);
                let root = builder.root();
                add_children(&mut builder, root, &feeder.children);
                builder.build()
            }
            ([first, ..], Some(_)) => {
                Err(ConfigurationError::DuplicateFeeder(first.name.clone()))
            }
            ([_, second, ..], None) => {
                Err(ConfigurationError::DuplicateFeeder(second.name.clone()))
            }
        }
    }
}

fn add_children(builder: &mut TreeBuilder, parent: NodeId, children: &[NodeConfig]) {
    for child in children {
        if child.children.is_empty() {
            builder.outlet(parent, &child.name, child.max_power_kw, child.min_power_kw);
        } else {
            let branch =
                builder.branch(parent, &child.name, child.max_power_kw, child.min_power_kw);
            add_children(builder, branch, &child.children);
        }
    }
}

fn validate_node<'a>(
    node: &'a NodeConfig,
    path: String,
    names: &mut BTreeSet<&'a str>,
    errors: &mut Vec<ConfigError>,
) {
    if node.name.is_empty() {
        errors.push(ConfigError::new(format!("{path}.name"), "must not be empty"));
    } else if !names.insert(node.name.as_str()) {
        errors.push(ConfigError::new(
            format!("{path}.name"),
            format!("duplicate node name \"{}\"", node.name),
        ));
    }
    if !(node.max_power_kw.is_finite() && node.max_power_kw >= 0.0) {
        errors.push(ConfigError::new(format!("{path}.max_power_kw"), "must be >= 0"));
    }
    if !(node.min_power_kw.is_finite() && node.min_power_kw >= 0.0) {
        errors.push(ConfigError::new(format!("{path}.min_power_kw"), "must be >= 0"));
    } else if node.min_power_kw > node.max_power_kw {
        errors.push(ConfigError::new(
            format!("{path}.min_power_kw"),
            "must be <= max_power_kw",
        ));
    }
    for (i, child) in node.children.iter().enumerate() {
        validate_node(child, format!("{path}.children[{i}]"), names, errors);
    }
}

impl VehicleTypeConfig {
    fn build(&self) -> Result<VehicleType, ConfigurationError> {
        let vehicle = VehicleType::new(
            &self.name,
            self.battery_capacity_kwh,
            self.min_charge_power_kw,
            self.max_charge_power_kw,
            self.efficiency,
        )?;
        match (self.derate_start_soc, self.derate_floor_fraction) {
            (Some(start), Some(fraction)) => vehicle.with_derating(start, fraction),
            (None, None) => Ok(vehicle),
            _ => Err(ConfigurationError::InvalidVehicleType {
                name: self.name.clone(),
                reason: "derate_start_soc and derate_floor_fraction go together".to_string(),
            }),
        }
    }
}
