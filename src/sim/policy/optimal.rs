use crate::sim::ledger::{FlowLedger, POWER_TOLERANCE_KW};

use super::{AllocationPolicy, SessionDemand};

/// Max-min fair water-filling over every ceiling in the tree.
///
/// All unfrozen sessions rise together to a common level; the highest
/// feasible level is found by bisection. Sessions that hit their own demand
/// or sit behind a saturated node are frozen at that level, and the rest
/// keep rising. A session whose share would fall below its floor drops out
/// (lowest priority first). Without a storage buffer and floors this also
/// maximizes total power.
#[derive(Debug, Clone)]
pub struct Optimal {
    /// Bisection rounds per filling level.
    pub iterations: usize,
}

impl Default for Optimal {
    fn default() -> Self {
        Self { iterations: 48 }
    }
}

impl Optimal {
    /// Commits every rising session at `level` into a copy of `base`, or
    /// returns `None` if some session no longer fits.
    fn try_level<'t>(
        demands: &[SessionDemand],
        rising: &[usize],
        base: &FlowLedger<'t>,
        level: f32,
    ) -> Option<FlowLedger<'t>> {
        let mut trial = base.clone();
        for &i in rising {
            let d = &demands[i];
            let kw = d.desired_kw.min(level);
            if trial.headroom_kw(d.outlet) < kw {
                return None;
            }
            trial.commit(d.outlet, kw);
        }
        Some(trial)
    }
}

impl AllocationPolicy for Optimal {
    fn allocate(&mut self, demands: &[SessionDemand], ledger: &mut FlowLedger<'_>) -> Vec<f32> {
        let mut rising: Vec<usize> = (0..demands.len())
            .filter(|i| demands[*i].accepts(demands[*i].desired_kw))
            .collect();
        let mut eligible: Vec<f32> = demands
            .iter()
            .enumerate()
            .map(|(i, d)| if rising.contains(&i) { d.desired_kw } else { 0.0 })
            .collect();

        let mut level = 0.0_f32;
        while !rising.is_empty() {
            let top = rising
                .iter()
                .map(|i| demands[*i].desired_kw)
                .fold(0.0_f32, f32::max);

            let (mut lo, mut hi) = (level, top);
            if Self::try_level(demands, &rising, ledger, hi).is_some() {
                lo = hi;
            } else {
                for _ in 0..self.iterations {
                    let mid = 0.5 * (lo + hi);
                    if Self::try_level(demands, &rising, ledger, mid).is_some() {
                        lo = mid;
                    } else {
                        hi = mid;
                    }
                }
            }
            level = lo;

            let Some(filled) = Self::try_level(demands, &rising, ledger, level) else {
                break;
            };
            let mut frozen: Vec<usize> = rising
                .iter()
                .copied()
                .filter(|i| {
                    let d = &demands[*i];
                    d.desired_kw <= level + POWER_TOLERANCE_KW
                        || filled.headroom_kw(d.outlet) <= POWER_TOLERANCE_KW
                })
                .collect();
            if frozen.is_empty() {
                frozen = rising.clone();
            }

            // A share below the session's floor cannot be drawn. Give it up
            // for the lowest-priority such session and fill again without it.
            let starved = frozen.iter().rev().copied().find(|i| {
                let d = &demands[*i];
                !d.accepts(d.desired_kw.min(level))
            });
            if let Some(drop) = starved {
                eligible[drop] = 0.0;
                rising.retain(|i| *i != drop);
                continue;
            }

            for i in &frozen {
                let d = &demands[*i];
                ledger.commit(d.outlet, d.desired_kw.min(level));
            }
            rising.retain(|i| !frozen.contains(i));
        }

        eligible
    }

    fn name(&self) -> &'static str {
        "optimal"
    }
}
