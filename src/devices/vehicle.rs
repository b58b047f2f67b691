use crate::error::{ConfigurationError, DomainError};

/// Linear ramp-down of charge power near a full battery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Derating {
    /// State of charge at which the ramp begins (0.0 to 1.0, exclusive of 1.0).
    pub start_soc: f32,
    /// Fraction of `max_charge_power_kw` still accepted at 100% SOC.
    pub floor_fraction: f32,
}

/// Charging characteristics shared by every vehicle of one model.
///
/// Immutable once built; sessions hold it behind an `Arc`.
///
/// # Examples
///
/// ```
/// use ev_site_sim::devices::VehicleType;
///
/// let ev = VehicleType::new("compact", 40.0, 1.0, 11.0, 0.9)
///     .unwrap()
///     .with_derating(0.8, 0.25)
///     .unwrap();
/// assert_eq!(ev.instantaneous_max_power_kw(0.5).unwrap(), 11.0);
/// assert!((ev.instantaneous_max_power_kw(1.0).unwrap() - 2.75).abs() < 1e-5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleType {
    /// Model name, used to reference the type from sessions.
    pub name: String,
    /// Usable battery capacity in kilowatt-hours.
    pub battery_capacity_kwh: f32,
    /// Smallest nonzero power the on-board charger accepts (kW).
    pub min_charge_power_kw: f32,
    /// Largest power the on-board charger accepts below the derating knee (kW).
    pub max_charge_power_kw: f32,
    /// Grid-to-battery efficiency (0..1.0].
    pub efficiency: f32,
    /// Optional taper near full charge.
    pub derating: Option<Derating>,
}

impl VehicleType {
    /// Creates a vehicle type without derating.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidVehicleType` if the capacity is not
    /// positive, the power range is empty or negative, or the efficiency is
    /// outside `(0, 1]`.
    pub fn new(
        name: impl Into<String>,
        battery_capacity_kwh: f32,
        min_charge_power_kw: f32,
        max_charge_power_kw: f32,
        efficiency: f32,
    ) -> Result<Self, ConfigurationError> {
        let name = name.into();
        let invalid = |reason: &str| ConfigurationError::InvalidVehicleType {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if !(battery_capacity_kwh.is_finite() && battery_capacity_kwh > 0.0) {
            return Err(invalid("battery capacity must be positive"));
        }
        if !(min_charge_power_kw.is_finite() && min_charge_power_kw >= 0.0) {
            return Err(invalid("min charge power must be non-negative"));
        }
        if !(max_charge_power_kw.is_finite() && max_charge_power_kw > 0.0) {
            return Err(invalid("max charge power must be positive"));
        }
        if min_charge_power_kw > max_charge_power_kw {
            return Err(invalid("min charge power exceeds max charge power"));
        }
        if !(efficiency > 0.0 && efficiency <= 1.0) {
            return Err(invalid("efficiency must be in (0, 1]"));
        }

        Ok(Self {
            name,
            battery_capacity_kwh,
            min_charge_power_kw,
            max_charge_power_kw,
            efficiency,
            derating: None,
        })
    }

    /// Adds a linear taper from `start_soc` down to `floor_fraction` of the
    /// maximum power at 100% SOC.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidVehicleType` if `start_soc` is not in
    /// `[0, 1)` or `floor_fraction` is not in `[0, 1]`.
    pub fn with_derating(
        mut self,
        start_soc: f32,
        floor_fraction: f32,
    ) -> Result<Self, ConfigurationError> {
        if !(0.0..1.0).contains(&start_soc) {
            return Err(ConfigurationError::InvalidVehicleType {
                name: self.name,
                reason: "derate start SOC must be in [0, 1)".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&floor_fraction) {
            return Err(ConfigurationError::InvalidVehicleType {
                name: self.name,
                reason: "derate floor fraction must be in [0, 1]".to_string(),
            });
        }
        self.derating = Some(Derating {
            start_soc,
            floor_fraction,
        });
        Ok(self)
    }

    /// Maximum power the vehicle accepts at the given state of charge.
    ///
    /// Flat at `max_charge_power_kw` up to the derating knee, then linear down
    /// to `max_charge_power_kw * floor_fraction` at `soc = 1.0`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::SocOutOfRange` if `soc` is outside `[0, 1]`.
    pub fn instantaneous_max_power_kw(&self, soc: f32) -> Result<f32, DomainError> {
        if !(0.0..=1.0).contains(&soc) {
            return Err(DomainError::SocOutOfRange(soc));
        }

        let Some(derating) = self.derating else {
            return Ok(self.max_charge_power_kw);
        };
        if soc < derating.start_soc {
            return Ok(self.max_charge_power_kw);
        }

        let progress = (soc - derating.start_soc) / (1.0 - derating.start_soc);
        let fraction = 1.0 - progress * (1.0 - derating.floor_fraction);
        Ok(self.max_charge_power_kw * fraction)
    }

    /// Grid power that would bring the battery from `soc` to 100% in `dt_hours`.
    pub fn power_to_full_kw(&self, soc: f32, dt_hours: f32) -> f32 {
        let missing_kwh = (1.0 - soc).max(0.0) * self.battery_capacity_kwh;
        missing_kwh / (dt_hours * self.efficiency)
    }

    /// SOC after drawing `power_kw` from the grid for `dt_hours`, clipped to `[0, 1]`.
    pub fn charged_soc(&self, soc: f32, power_kw: f32, dt_hours: f32) -> f32 {
        let stored_kwh = power_kw * dt_hours * self.efficiency;
        (soc + stored_kwh / self.battery_capacity_kwh).clamp(0.0, 1.0)
    }
}

/// Free-function form of [`VehicleType::instantaneous_max_power_kw`].
///
/// # Errors
///
/// Returns `DomainError::SocOutOfRange` if `soc` is outside `[0, 1]`.
pub fn instantaneous_max_power(vehicle: &VehicleType, soc: f32) -> Result<f32, DomainError> {
    vehicle.instantaneous_max_power_kw(soc)
}
