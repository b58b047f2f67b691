use crate::error::ConfigurationError;

/// A stationary storage buffer attached to one internal node of the site.
///
/// `StorageBuffer` tracks its state of energy and enforces its power and
/// energy limits when given a setpoint. Only the allocation engine drives it.
///
/// # Power Flow Convention (Node)
/// - Positive power: Charging (extra load on the attachment node)
/// - Negative power: Discharging (supplies demand beneath the attachment node)
#[derive(Debug, Clone, PartialEq)]
pub struct StorageBuffer {
    /// Energy capacity in kilowatt-hours.
    pub capacity_kwh: f32,

    /// Charge and discharge power ceiling in kilowatts (positive value).
    pub max_power_kw: f32,

    /// Efficiency applied on both charge and discharge (0..1.0].
    pub efficiency: f32,

    /// Stored energy in kilowatt-hours, within `[0, capacity_kwh]`.
    energy_kwh: f32,
}

impl StorageBuffer {
    /// Creates a buffer holding `initial_energy_kwh`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidStorage` for a negative capacity or
    /// power, an initial energy outside `[0, capacity_kwh]`, or an efficiency
    /// outside `(0, 1]`.
    pub fn new(
        capacity_kwh: f32,
        max_power_kw: f32,
        initial_energy_kwh: f32,
        efficiency: f32,
    ) -> Result<Self, ConfigurationError> {
        if !(capacity_kwh.is_finite() && capacity_kwh >= 0.0) {
            return Err(ConfigurationError::InvalidStorage(
                "capacity must be non-negative".to_string(),
            ));
        }
        if !(max_power_kw.is_finite() && max_power_kw >= 0.0) {
            return Err(ConfigurationError::InvalidStorage(
                "max power must be non-negative".to_string(),
            ));
        }
        if !(0.0..=capacity_kwh).contains(&initial_energy_kwh) {
            return Err(ConfigurationError::InvalidStorage(format!(
                "initial energy {initial_energy_kwh} kWh is outside [0, {capacity_kwh}]"
            )));
        }
        if !(efficiency > 0.0 && efficiency <= 1.0) {
            return Err(ConfigurationError::InvalidStorage(
                "efficiency must be in (0, 1]".to_string(),
            ));
        }

        Ok(Self {
            capacity_kwh,
            max_power_kw,
            efficiency,
            energy_kwh: initial_energy_kwh,
        })
    }

    /// Current state of energy in kWh.
    pub fn state_of_energy_kwh(&self) -> f32 {
        self.energy_kwh
    }

    /// Largest power the buffer can deliver for a whole step of `dt_hours`.
    pub fn discharge_limit_kw(&self, dt_hours: f32) -> f32 {
        let energy_limited_kw = self.energy_kwh * self.efficiency / dt_hours;
        self.max_power_kw.min(energy_limited_kw).max(0.0)
    }

    /// Largest power the buffer can absorb for a whole step of `dt_hours`.
    pub fn charge_limit_kw(&self, dt_hours: f32) -> f32 {
        let space_kwh = self.capacity_kwh - self.energy_kwh;
        let space_limited_kw = space_kwh / (dt_hours * self.efficiency);
        self.max_power_kw.min(space_limited_kw).max(0.0)
    }

    /// Applies a setpoint for one step and returns the power actually moved.
    pub fn apply(&mut self, setpoint_kw: f32, dt_hours: f32) -> f32 {
        if setpoint_kw > 0.0 {
            let actual_kw = setpoint_kw.min(self.charge_limit_kw(dt_hours));
            self.energy_kwh += actual_kw * dt_hours * self.efficiency;
            self.energy_kwh = self.energy_kwh.clamp(0.0, self.capacity_kwh);
            actual_kw
        } else if setpoint_kw < 0.0 {
            let actual_abs_kw = (-setpoint_kw).min(self.discharge_limit_kw(dt_hours));
            self.energy_kwh -= actual_abs_kw * dt_hours / self.efficiency;
            self.energy_kwh = self.energy_kwh.clamp(0.0, self.capacity_kwh);
            -actual_abs_kw
        } else {
            0.0
        }
    }
}
