//! Allocation policies and the engine that applies them each step.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use tracing::trace;

use crate::devices::StorageBuffer;
use crate::error::ConfigurationError;

use super::ledger::{self, BufferPort, FlowLedger, POWER_TOLERANCE_KW};
use super::session::SessionId;
use super::tree::{CapacityTree, NodeId, StorageAttachment};

pub mod discrimination_free;
pub mod fcfs;
pub mod optimal;
pub mod uncontrolled;

pub use discrimination_free::DiscriminationFree;
pub use fcfs::FirstComeFirstServed;
pub use optimal::Optimal;
pub use uncontrolled::Uncontrolled;

/// What one connected session asks for in the current step.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDemand {
    pub session: SessionId,
    pub outlet: NodeId,
    pub arrival_time: NaiveDateTime,
    /// Depth-first position of the outlet; breaks arrival ties.
    pub tree_rank: usize,
    /// Charge curve at the current SOC, capped by the outlet and a full battery (kW).
    pub desired_kw: f32,
    /// Smallest nonzero power the session may receive (kW).
    pub floor_kw: f32,
}

impl SessionDemand {
    /// Service order: arrival time, then tree order.
    pub fn order_key(&self) -> (NaiveDateTime, usize) {
        (self.arrival_time, self.tree_rank)
    }

    /// Whether `kw` is a power the session can actually draw.
    pub(crate) fn accepts(&self, kw: f32) -> bool {
        kw > POWER_TOLERANCE_KW && kw + POWER_TOLERANCE_KW >= self.floor_kw
    }
}

/// Trait defining how power is shared among connected sessions.
///
/// Implementations commit outlet assignments into the step's [`FlowLedger`],
/// using its headroom queries to respect the tree. Any state carried between
/// steps lives in the implementing value itself.
pub trait AllocationPolicy {
    /// Assigns power for one step.
    ///
    /// # Arguments
    ///
    /// * `demands` - Connected sessions, sorted by arrival time then tree order
    /// * `ledger` - Empty ledger for this step; assignments are committed into it
    ///
    /// # Returns
    ///
    /// The demand each session was eligible to receive this step, parallel to
    /// `demands`, with 0 for sessions the policy chose not to serve. Node
    /// floors are capped against these values.
    fn allocate(&mut self, demands: &[SessionDemand], ledger: &mut FlowLedger<'_>) -> Vec<f32>;

    /// Whether branch and feeder limits (and the storage buffer) apply.
    fn enforces_tree(&self) -> bool {
        true
    }

    /// Short machine name of the policy.
    fn name(&self) -> &'static str;
}

/// Policy selector, as written in scenario files and on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    Uncontrolled,
    Fcfs,
    DiscriminationFree,
    Optimal,
}

impl PolicyKind {
    pub const NAMES: &[&str] = &["uncontrolled", "fcfs", "discrimination_free", "optimal"];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uncontrolled => "uncontrolled",
            Self::Fcfs => "fcfs",
            Self::DiscriminationFree => "discrimination_free",
            Self::Optimal => "optimal",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uncontrolled" => Ok(Self::Uncontrolled),
            "fcfs" => Ok(Self::Fcfs),
            "discrimination_free" => Ok(Self::DiscriminationFree),
            "optimal" => Ok(Self::Optimal),
            other => Err(format!(
                "unknown policy \"{other}\", available: {}",
                Self::NAMES.join(", ")
            )),
        }
    }
}

/// The four built-in policies behind one type.
#[derive(Debug, Clone)]
pub enum Policy {
    Uncontrolled(Uncontrolled),
    Fcfs(FirstComeFirstServed),
    DiscriminationFree(DiscriminationFree),
    Optimal(Optimal),
}

impl Policy {
    /// Builds the policy named by `kind`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::ZeroTurnLength` for a discrimination-free
    /// policy with `turn_length == 0`.
    pub fn new(kind: PolicyKind, turn_length: usize) -> Result<Self, ConfigurationError> {
        Ok(match kind {
            PolicyKind::Uncontrolled => Self::Uncontrolled(Uncontrolled),
            PolicyKind::Fcfs => Self::Fcfs(FirstComeFirstServed),
            PolicyKind::DiscriminationFree => {
                Self::DiscriminationFree(DiscriminationFree::new(turn_length)?)
            }
            PolicyKind::Optimal => Self::Optimal(Optimal::default()),
        })
    }
}

impl AllocationPolicy for Policy {
    fn allocate(&mut self, demands: &[SessionDemand], ledger: &mut FlowLedger<'_>) -> Vec<f32> {
        match self {
            Self::Uncontrolled(p) => p.allocate(demands, ledger),
            Self::Fcfs(p) => p.allocate(demands, ledger),
            Self::DiscriminationFree(p) => p.allocate(demands, ledger),
            Self::Optimal(p) => p.allocate(demands, ledger),
        }
    }

    fn enforces_tree(&self) -> bool {
        match self {
            Self::Uncontrolled(p) => p.enforces_tree(),
            Self::Fcfs(p) => p.enforces_tree(),
            Self::DiscriminationFree(p) => p.enforces_tree(),
            Self::Optimal(p) => p.enforces_tree(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Uncontrolled(p) => p.name(),
            Self::Fcfs(p) => p.name(),
            Self::DiscriminationFree(p) => p.name(),
            Self::Optimal(p) => p.name(),
        }
    }
}

/// Effective floor of every node for one step.
///
/// `eligible` is parallel to `demands`; idle outlets keep their own floor and
/// count as drawing nothing.
pub(crate) fn step_floors(
    tree: &CapacityTree,
    port: Option<BufferPort>,
    demands: &[SessionDemand],
    eligible: &[f32],
) -> Vec<f32> {
    let mut eligible_kw = vec![0.0; tree.len()];
    let mut outlet_floor_kw = vec![0.0; tree.len()];
    for outlet in tree.outlets() {
        outlet_floor_kw[outlet.index()] = tree.node(*outlet).min_power_kw;
    }
    for (demand, kw) in demands.iter().zip(eligible) {
        eligible_kw[demand.outlet.index()] = *kw;
        outlet_floor_kw[demand.outlet.index()] = demand.floor_kw;
    }
    ledger::effective_floors(tree, port, &eligible_kw, &outlet_floor_kw)
}

/// Result of one step's allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct StepAllocation {
    /// Power for every outlet, idle outlets at zero (kW).
    pub outlet_power_kw: BTreeMap<NodeId, f32>,
    /// Buffer power actually moved (kW; positive=charge, negative=discharge).
    pub storage_kw: f32,
    /// Buffer state of energy after the step (kWh).
    pub storage_soe_kwh: f32,
}

/// Runs a policy against the tree each step and owns the storage buffer state.
///
/// Generic over `P: AllocationPolicy` for static dispatch; defaults to the
/// [`Policy`] enum.
#[derive(Debug, Clone)]
pub struct AllocationEngine<P: AllocationPolicy = Policy> {
    policy: P,
    storage: Option<(NodeId, StorageBuffer)>,
}

impl<P: AllocationPolicy> AllocationEngine<P> {
    /// Creates an engine; the buffer starts from the attachment's initial state.
    pub fn new(policy: P, storage: Option<&StorageAttachment>) -> Self {
        Self {
            policy,
            storage: storage.map(|s| (s.node, s.buffer.clone())),
        }
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Current buffer state, if the site has one.
    pub fn storage(&self) -> Option<&StorageBuffer> {
        self.storage.as_ref().map(|(_, buffer)| buffer)
    }

    /// Allocates one step and updates the buffer.
    ///
    /// The policy assigns power first; floors are then enforced, the buffer
    /// charges from whatever headroom is left if it did not discharge, and
    /// the result is verified against every bound of the tree.
    ///
    /// # Panics
    ///
    /// Panics with an [`AllocationInvariantViolation`](crate::error::AllocationInvariantViolation)
    /// if the final assignment breaks a bound. That is a bug in the policy,
    /// never a property of the input.
    pub fn allocate(
        &mut self,
        tree: &CapacityTree,
        demands: &[SessionDemand],
        dt_hours: f32,
    ) -> StepAllocation {
        let enforce = self.policy.enforces_tree();
        let port = match &self.storage {
            Some((node, buffer)) if enforce => Some(BufferPort {
                node: *node,
                discharge_limit_kw: buffer.discharge_limit_kw(dt_hours),
            }),
            _ => None,
        };

        let mut flows = FlowLedger::new(tree, port);
        let eligible = self.policy.allocate(demands, &mut flows);

        let floors = step_floors(tree, port, demands, &eligible);

        if enforce {
            let switched_off = ledger::enforce_floors(&mut flows, &floors);
            if switched_off > 0 {
                trace!(switched_off, "outlets shut below floor");
            }
            if let Some((_, buffer)) = &self.storage {
                let charge_kw = flows.charge_room_kw(buffer.charge_limit_kw(dt_hours));
                if charge_kw > 0.0 {
                    flows.set_charge(charge_kw);
                }
            }
        }

        if let Err(violation) = ledger::verify(&flows, &floors, enforce) {
            panic!("{violation}");
        }

        let setpoint_kw = flows.storage_kw();
        let (storage_kw, storage_soe_kwh) = match &mut self.storage {
            Some((_, buffer)) => {
                let moved = buffer.apply(setpoint_kw, dt_hours);
                (moved, buffer.state_of_energy_kwh())
            }
            None => (0.0, 0.0),
        };

        let outlet_power_kw = flows.assignments();
        trace!(
            policy = self.policy.name(),
            sessions = demands.len(),
            total_kw = outlet_power_kw.values().sum::<f32>(),
            storage_kw,
            storage_soe_kwh,
            "allocated"
        );

        StepAllocation {
            outlet_power_kw,
            storage_kw,
            storage_soe_kwh,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    /// Feeder(12) -> branch(8) -> two 11 kW outlets.
    fn tight() -> CapacityTree {
        let mut b = CapacityTree::builder("feeder", 12.0, 0.0);
        let root = b.root();
        let branch = b.branch(root, "cs", 8.0, 0.0);
        b.outlet(branch, "a", 11.0, 0.0);
        b.outlet(branch, "b", 11.0, 0.0);
        b.build().unwrap()
    }

    fn demand(tree: &CapacityTree, id: u32, outlet: &str, desired_kw: f32) -> SessionDemand {
        let outlet = tree.find(outlet).unwrap();
        SessionDemand {
            session: SessionId(id),
            outlet,
            arrival_time: t0(),
            tree_rank: tree.tree_rank(outlet),
            desired_kw,
            floor_kw: 0.0,
        }
    }

    #[test]
    fn policy_kind_round_trips_names() {
        for name in PolicyKind::NAMES {
            let kind: PolicyKind = name.parse().unwrap();
            assert_eq!(kind.as_str(), *name);
        }
        assert!("greedy".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn zero_turn_length_is_rejected() {
        assert_eq!(
            Policy::new(PolicyKind::DiscriminationFree, 0).unwrap_err(),
            ConfigurationError::ZeroTurnLength
        );
        assert!(Policy::new(PolicyKind::DiscriminationFree, 2).is_ok());
    }

    #[test]
    fn buffer_discharges_to_cover_branch_deficit() {
        let tree = tight();
        let cs = tree.find("cs").unwrap();
        let buffer = StorageBuffer::new(10.0, 4.0, 10.0, 1.0).unwrap();
        let tree = tree.with_storage(cs, buffer).unwrap();
        let policy = Policy::new(PolicyKind::Fcfs, 1).unwrap();
        let mut engine = AllocationEngine::new(policy, tree.storage());

        let demands = vec![demand(&tree, 1, "a", 11.0)];
        let step = engine.allocate(&tree, &demands, 1.0);

        assert_eq!(step.outlet_power_kw[&tree.find("a").unwrap()], 11.0);
        assert_eq!(step.storage_kw, -3.0);
        assert!((step.storage_soe_kwh - 7.0).abs() < 1e-5);
    }

    #[test]
    fn buffer_charges_from_spare_headroom() {
        let tree = tight();
        let cs = tree.find("cs").unwrap();
        let buffer = StorageBuffer::new(10.0, 4.0, 0.0, 1.0).unwrap();
        let tree = tree.with_storage(cs, buffer).unwrap();
        let policy = Policy::new(PolicyKind::Fcfs, 1).unwrap();
        let mut engine = AllocationEngine::new(policy, tree.storage());

        let demands = vec![demand(&tree, 1, "a", 6.0)];
        let step = engine.allocate(&tree, &demands, 1.0);

        assert_eq!(step.outlet_power_kw[&tree.find("a").unwrap()], 6.0);
        assert_eq!(step.storage_kw, 2.0);
        assert!((step.storage_soe_kwh - 2.0).abs() < 1e-5);
    }

    #[test]
    fn uncontrolled_leaves_buffer_idle() {
        let tree = tight();
        let cs = tree.find("cs").unwrap();
        let buffer = StorageBuffer::new(10.0, 4.0, 5.0, 1.0).unwrap();
        let tree = tree.with_storage(cs, buffer).unwrap();
        let policy = Policy::new(PolicyKind::Uncontrolled, 1).unwrap();
        let mut engine = AllocationEngine::new(policy, tree.storage());

        let demands = vec![demand(&tree, 1, "a", 11.0), demand(&tree, 2, "b", 11.0)];
        let step = engine.allocate(&tree, &demands, 1.0);

        assert_eq!(step.outlet_power_kw.values().sum::<f32>(), 22.0);
        assert_eq!(step.storage_kw, 0.0);
        assert_eq!(step.storage_soe_kwh, 5.0);
    }

    #[test]
    fn fcfs_hands_stranded_branch_headroom_to_later_session() {
        let mut b = CapacityTree::builder("feeder", 7.0, 0.0);
        let root = b.root();
        let cs1 = b.branch(root, "cs1", 10.0, 4.0);
        b.outlet(cs1, "b", 5.0, 0.0);
        let cs2 = b.branch(root, "cs2", 10.0, 0.0);
        b.outlet(cs2, "a", 5.0, 0.0);
        b.outlet(cs2, "c", 5.0, 0.0);
        let tree = b.build().unwrap();
        let mut engine = AllocationEngine::new(Policy::new(PolicyKind::Fcfs, 1).unwrap(), None);

        let demands = vec![
            demand(&tree, 1, "a", 5.0),
            demand(&tree, 2, "b", 5.0),
            demand(&tree, 3, "c", 5.0),
        ];
        let step = engine.allocate(&tree, &demands, 0.25);

        let kw = |name: &str| step.outlet_power_kw[&tree.find(name).unwrap()];
        assert_eq!(kw("a"), 5.0);
        assert_eq!(kw("b"), 0.0);
        assert_eq!(kw("c"), 2.0);
    }
}
