use crate::sim::ledger::FlowLedger;

use super::{AllocationPolicy, SessionDemand};

/// Every session draws what it wants, limited only by its outlet.
///
/// Branch and feeder overflow is left in place: the result measures
/// unconstrained demand rather than a feasible schedule.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uncontrolled;

impl AllocationPolicy for Uncontrolled {
    fn allocate(&mut self, demands: &[SessionDemand], ledger: &mut FlowLedger<'_>) -> Vec<f32> {
        for d in demands {
            let outlet_max_kw = ledger.tree().node(d.outlet).max_power_kw;
            ledger.commit(d.outlet, d.desired_kw.min(outlet_max_kw));
        }
        demands.iter().map(|d| d.desired_kw).collect()
    }

    fn enforces_tree(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "uncontrolled"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::session::SessionId;
    use crate::sim::tree::CapacityTree;
    use chrono::NaiveDate;

    #[test]
    fn ignores_branch_limits() {
        let tree = CapacityTree::wallbox(2, 11.0, 2, Some(10.0), None).unwrap();
        let t0 = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let demands: Vec<SessionDemand> = tree
            .outlets()
            .iter()
            .enumerate()
            .map(|(i, o)| SessionDemand {
                session: SessionId(i as u32),
                outlet: *o,
                arrival_time: t0,
                tree_rank: tree.tree_rank(*o),
                desired_kw: 8.0,
                floor_kw: 0.0,
            })
            .collect();

        let mut ledger = FlowLedger::new(&tree, None);
        Uncontrolled.allocate(&demands, &mut ledger);

        assert_eq!(ledger.flow_kw(tree.find("cs1").unwrap()), 16.0);
        for o in tree.outlets() {
            assert_eq!(ledger.assigned_kw(*o), 8.0);
        }
    }
}
