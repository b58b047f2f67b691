//! Core simulation types: run window, operating hours, and per-step records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

use crate::error::ConfigurationError;

use super::session::SessionOutcome;
use super::tree::NodeId;

/// Simulated period and step resolution.
///
/// All timing in the engine derives from this struct, including `dt_hours`.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, TimeDelta};
/// use ev_site_sim::sim::types::RunWindow;
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let end = start + TimeDelta::hours(24);
/// let window = RunWindow::new(start, end, TimeDelta::minutes(15)).unwrap();
/// assert_eq!(window.total_steps(), 96);
/// assert_eq!(window.dt_hours(), 0.25);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    pub resolution: TimeDelta,
}

impl RunWindow {
    /// Creates a run window.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::EmptyRun` if `end <= start`,
    /// `NonPositiveResolution` for a zero or negative step, and
    /// `RunLengthNotDivisible` if the run is not a whole number of steps.
    pub fn new(
        start: NaiveDateTime,
        end: NaiveDateTime,
        resolution: TimeDelta,
    ) -> Result<Self, ConfigurationError> {
        if end <= start {
            return Err(ConfigurationError::EmptyRun { start, end });
        }
        if resolution <= TimeDelta::zero() {
            return Err(ConfigurationError::NonPositiveResolution);
        }

        let run_secs = (end - start).num_seconds();
        let step_secs = resolution.num_seconds();
        if step_secs == 0 || run_secs % step_secs != 0 || (end - start).subsec_nanos() != 0 {
            return Err(ConfigurationError::RunLengthNotDivisible {
                run_secs,
                step_secs,
            });
        }

        Ok(Self {
            start,
            end,
            resolution,
        })
    }

    /// Number of steps between `start` and `end`.
    pub fn total_steps(&self) -> usize {
        ((self.end - self.start).num_seconds() / self.resolution.num_seconds()) as usize
    }

    /// Duration of one step in hours.
    pub fn dt_hours(&self) -> f32 {
        self.resolution.num_seconds() as f32 / 3600.0
    }

    /// Start time of step `step`.
    pub fn step_start(&self, step: usize) -> NaiveDateTime {
        self.start + self.resolution * step as i32
    }

    /// Whether `t` lies in `[start, end)`.
    pub fn contains(&self, t: NaiveDateTime) -> bool {
        t >= self.start && t < self.end
    }
}

/// Daily opening interval of the site.
///
/// `close < open` describes a site that stays open across midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OperatingHours {
    /// # Errors
    ///
    /// Returns `ConfigurationError::EmptyOperatingHours` if `open == close`.
    pub fn new(open: NaiveTime, close: NaiveTime) -> Result<Self, ConfigurationError> {
        if open == close {
            return Err(ConfigurationError::EmptyOperatingHours);
        }
        Ok(Self { open, close })
    }

    /// Whether the site accepts and serves vehicles at `t`.
    pub fn is_open(&self, t: NaiveDateTime) -> bool {
        let time = t.time();
        if self.open < self.close {
            time >= self.open && time < self.close
        } else {
            time >= self.open || time < self.close
        }
    }
}

/// What the step driver recorded for one committed step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    /// Step index.
    pub step: usize,
    /// Start of the step window.
    pub time: NaiveDateTime,
    /// Assigned power for every outlet (kW, 0 when idle).
    pub outlet_power_kw: BTreeMap<NodeId, f32>,
    /// Storage buffer power (kW; positive=charge, negative=discharge, 0 without a buffer).
    pub storage_kw: f32,
    /// Buffer state of energy after the step (kWh, 0 without a buffer).
    pub storage_soe_kwh: f32,
}

impl StepRecord {
    /// Total power drawn by all outlets (kW).
    pub fn total_outlet_kw(&self) -> f32 {
        self.outlet_power_kw.values().sum()
    }
}

impl fmt::Display for StepRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={:>4} ({}) | outlets={:>7.2} kW |",
            self.step,
            self.time.format("%Y-%m-%d %H:%M"),
            self.total_outlet_kw(),
        )?;
        for kw in self.outlet_power_kw.values() {
            write!(f, " {kw:>5.2}")?;
        }
        write!(
            f,
            " | storage={:>6.2} kW (SoE={:.2} kWh)",
            self.storage_kw, self.storage_soe_kwh
        )
    }
}

/// Everything a finished (or aborted) run hands to reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub records: Vec<StepRecord>,
    pub outcomes: Vec<SessionOutcome>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn run_window_basic() {
        let w = RunWindow::new(at(0, 0), at(6, 0), TimeDelta::minutes(30)).unwrap();
        assert_eq!(w.total_steps(), 12);
        assert_eq!(w.dt_hours(), 0.5);
        assert_eq!(w.step_start(3), at(1, 30));
        assert!(w.contains(at(5, 59)));
        assert!(!w.contains(at(6, 0)));
    }

    #[test]
    fn run_window_rejects_remainder() {
        let err = RunWindow::new(at(0, 0), at(1, 10), TimeDelta::minutes(15)).unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::RunLengthNotDivisible {
                run_secs: 4200,
                step_secs: 900
            }
        );
    }

    #[test]
    fn run_window_rejects_empty_and_zero_step() {
        assert!(matches!(
            RunWindow::new(at(1, 0), at(1, 0), TimeDelta::minutes(15)),
            Err(ConfigurationError::EmptyRun { .. })
        ));
        assert_eq!(
            RunWindow::new(at(0, 0), at(1, 0), TimeDelta::zero()),
            Err(ConfigurationError::NonPositiveResolution)
        );
    }

    #[test]
    fn operating_hours_day_and_overnight() {
        let day = OperatingHours::new(
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        )
        .unwrap();
        assert!(day.is_open(at(8, 0)));
        assert!(!day.is_open(at(18, 0)));
        assert!(!day.is_open(at(7, 59)));

        let night = OperatingHours::new(
            NaiveTime::from_hms_opt(20, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        )
        .unwrap();
        assert!(night.is_open(at(23, 0)));
        assert!(night.is_open(at(5, 0)));
        assert!(!night.is_open(at(12, 0)));

        let same = NaiveTime::from_hms_opt(8, 0, 0).unwrap();
        assert!(OperatingHours::new(same, same).is_err());
    }

    #[test]
    fn step_record_display_does_not_panic() {
        let tree = crate::sim::tree::CapacityTree::wallbox(2, 11.0, 1, None, None).unwrap();
        let record = StepRecord {
            step: 0,
            time: at(0, 0),
            outlet_power_kw: tree.outlets().iter().map(|o| (*o, 3.5)).collect(),
            storage_kw: -1.0,
            storage_soe_kwh: 4.0,
        };
        assert_eq!(record.total_outlet_kw(), 7.0);
        assert!(!format!("{record}").is_empty());
    }
}
