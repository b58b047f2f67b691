use crate::sim::ledger::{FlowLedger, POWER_TOLERANCE_KW};

use super::{AllocationPolicy, SessionDemand, step_floors};

/// First come, first served.
///
/// Sessions are served greedily in arrival order (tree order on ties). Each
/// gets the smaller of its desired power and the headroom left on its path.
/// The session is skipped for this step instead, and reported as ineligible,
/// if that share is below its own floor, or if it would open an idle
/// ancestor that can no longer reach its floor. The headroom a skipped
/// session leaves stays free for later arrivals.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstComeFirstServed;

impl FirstComeFirstServed {
    /// Whether serving `kw` to `demands[i]` starts an idle ancestor that
    /// cannot reach its floor even if every later session beneath it is
    /// served as far as the tree allows right now.
    fn strands_idle_ancestor(
        demands: &[SessionDemand],
        i: usize,
        kw: f32,
        floors: &[f32],
        ledger: &FlowLedger<'_>,
    ) -> bool {
        let tree = ledger.tree();
        tree.ancestors(demands[i].outlet).any(|node| {
            let floor = floors[node.index()];
            if ledger.through_kw(node) > POWER_TOLERANCE_KW || kw + POWER_TOLERANCE_KW >= floor {
                return false;
            }
            let beneath: f32 = demands[i..]
                .iter()
                .filter(|d| tree.ancestors(d.outlet).any(|a| a == node))
                .map(|d| d.desired_kw.min(ledger.headroom_kw(d.outlet)))
                .sum();
            beneath.min(ledger.headroom_kw(node)) + POWER_TOLERANCE_KW < floor
        })
    }
}

impl AllocationPolicy for FirstComeFirstServed {
    fn allocate(&mut self, demands: &[SessionDemand], ledger: &mut FlowLedger<'_>) -> Vec<f32> {
        let desired: Vec<f32> = demands.iter().map(|d| d.desired_kw).collect();
        let floors = step_floors(ledger.tree(), ledger.port(), demands, &desired);

        let mut eligible = vec![0.0; demands.len()];
        for (i, d) in demands.iter().enumerate() {
            let kw = d.desired_kw.min(ledger.headroom_kw(d.outlet));
            if d.accepts(kw) && !Self::strands_idle_ancestor(demands, i, kw, &floors, ledger) {
                ledger.commit(d.outlet, kw);
                eligible[i] = d.desired_kw;
            }
        }
        eligible
    }

    fn name(&self) -> &'static str {
        "fcfs"
    }
}
