use chrono::NaiveDateTime;

use super::types::RunWindow;

/// A simulation clock that walks a [`RunWindow`] one step at a time.
///
/// The `SimulationClock` provides methods to advance time step-by-step or run
/// a function at each step until the window is exhausted.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, TimeDelta};
/// use ev_site_sim::sim::clock::SimulationClock;
/// use ev_site_sim::sim::types::RunWindow;
///
/// let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
/// let window = RunWindow::new(start, start + TimeDelta::hours(3), TimeDelta::hours(1)).unwrap();
/// let mut clock = SimulationClock::new(window);
/// let mut steps = Vec::new();
///
/// clock.run(|step, _| steps.push(step));
/// assert_eq!(steps, vec![0, 1, 2]);
/// ```
#[derive(Debug, Clone)]
pub struct SimulationClock {
    window: RunWindow,
    /// Next step to hand out
    current: usize,
    /// Total steps in the window
    total: usize,
}

impl SimulationClock {
    /// Creates a clock positioned at the start of `window`.
    pub fn new(window: RunWindow) -> Self {
        Self {
            window,
            current: 0,
            total: window.total_steps(),
        }
    }

    /// Advances the clock by one step.
    ///
    /// # Returns
    ///
    /// * `Some((step, start))` - The step index and its start time, before advancing
    /// * `None` - If the clock has reached the end of the window
    pub fn tick(&mut self) -> Option<(usize, NaiveDateTime)> {
        if self.current < self.total {
            let step = self.current;
            self.current += 1;
            Some((step, self.window.step_start(step)))
        } else {
            None
        }
    }

    /// Runs a function for each remaining step.
    ///
    /// # Arguments
    ///
    /// * `f` - A function that takes the step index and its start time
    pub fn run(&mut self, mut f: impl FnMut(usize, NaiveDateTime)) {
        while let Some((step, at)) = self.tick() {
            f(step, at);
        }
    }

    /// Steps handed out so far.
    pub fn elapsed(&self) -> usize {
        self.current
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_finished(&self) -> bool {
        self.current >= self.total
    }

    pub fn window(&self) -> &RunWindow {
        &self.window
    }

    /// Whole percentage of steps completed, 0 through 100.
    pub fn percent_complete(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.current * 100) / self.total) as u8
    }
}
