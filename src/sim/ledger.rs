//! Per-step power bookkeeping over the capacity tree.
//!
//! A [`FlowLedger`] tracks how much power each node carries while a policy
//! commits outlet assignments one at a time. It answers headroom queries
//! along an outlet's ancestor chain, applies the storage buffer's discharge
//! at its attachment node, and checks every ceiling and floor afterwards.
//!
//! Flow convention: `through` is the sum of what a node's children draw;
//! `flow` is what the node itself draws from its parent. They differ only at
//! the buffer's node, where discharge covers demand above the node's ceiling
//! and charging adds load.

use std::collections::BTreeMap;

use crate::error::AllocationInvariantViolation;

use super::tree::{CapacityTree, NodeId, NodeKind};

/// Slack allowed when comparing powers, absorbing `f32` rounding.
pub const POWER_TOLERANCE_KW: f32 = 1e-3;

/// The storage buffer as seen by one step's allocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferPort {
    /// Node the buffer hangs from.
    pub node: NodeId,
    /// Most the buffer can deliver this step (kW).
    pub discharge_limit_kw: f32,
}

/// Running totals of committed power for one step.
#[derive(Debug, Clone)]
pub struct FlowLedger<'t> {
    tree: &'t CapacityTree,
    through_kw: Vec<f32>,
    port: Option<BufferPort>,
    charge_kw: f32,
}

impl<'t> FlowLedger<'t> {
    /// Creates an empty ledger: every node at zero.
    pub fn new(tree: &'t CapacityTree, port: Option<BufferPort>) -> Self {
        Self {
            tree,
            through_kw: vec![0.0; tree.len()],
            port,
            charge_kw: 0.0,
        }
    }

    pub fn tree(&self) -> &'t CapacityTree {
        self.tree
    }

    pub fn port(&self) -> Option<BufferPort> {
        self.port
    }

    /// Power committed to an outlet.
    pub fn assigned_kw(&self, outlet: NodeId) -> f32 {
        self.through_kw[outlet.index()]
    }

    /// Sum of what the node's children draw.
    pub fn through_kw(&self, node: NodeId) -> f32 {
        self.through_kw[node.index()]
    }

    /// Power the node draws from its parent.
    pub fn flow_kw(&self, node: NodeId) -> f32 {
        let through = self.through_kw[node.index()];
        match self.port {
            Some(port) if port.node == node => {
                buffered(through, self.tree.node(node).max_power_kw, port.discharge_limit_kw)
                    + self.charge_kw
            }
            _ => through,
        }
    }

    /// Power the buffer must deliver to keep its node under its ceiling.
    pub fn discharge_kw(&self) -> f32 {
        self.port.map_or(0.0, |port| {
            let through = self.through_kw[port.node.index()];
            let max = self.tree.node(port.node).max_power_kw;
            (through - max).clamp(0.0, port.discharge_limit_kw)
        })
    }

    pub fn charge_kw(&self) -> f32 {
        self.charge_kw
    }

    /// Signed buffer power (positive=charge, negative=discharge).
    pub fn storage_kw(&self) -> f32 {
        self.charge_kw - self.discharge_kw()
    }

    /// Largest extra power `node` (usually an outlet) could take without
    /// breaking a ceiling on its path to the feeder.
    ///
    /// Above the buffer's node only the part of an increment the buffer does
    /// not absorb travels upward, so a full ancestor does not bound an outlet
    /// whose increment the buffer can cover.
    pub fn headroom_kw(&self, node: NodeId) -> f32 {
        let mut bound = f32::INFINITY;
        let mut pass = f32::INFINITY;

        for id in self.tree.path_to_root(node) {
            let node = self.tree.node(id);
            let through = self.through_kw[id.index()];
            let ceiling = match self.port {
                Some(port) if port.node == id => node.max_power_kw + port.discharge_limit_kw,
                _ => node.max_power_kw,
            };
            let room = (ceiling - through).max(0.0);
            if pass > room {
                bound = bound.min(room);
            }
            if self.port.is_some_and(|p| p.node == id) {
                pass = pass.min((node.max_power_kw - through).max(0.0));
            }
        }
        bound
    }

    /// Adds `delta_kw` (may be negative) at `outlet` and propagates it upward.
    pub fn commit(&mut self, outlet: NodeId, delta_kw: f32) {
        let tree = self.tree;
        let mut delta = delta_kw;
        for id in tree.path_to_root(outlet) {
            let old = self.through_kw[id.index()];
            let new = old + delta;
            self.through_kw[id.index()] = new;
            if let Some(port) = self.port.filter(|p| p.node == id) {
                let max = tree.node(id).max_power_kw;
                delta = buffered(new, max, port.discharge_limit_kw)
                    - buffered(old, max, port.discharge_limit_kw);
            }
        }
    }

    /// Replaces the outlet's assignment with `kw`.
    pub fn set(&mut self, outlet: NodeId, kw: f32) {
        let delta = kw - self.assigned_kw(outlet);
        if delta != 0.0 {
            self.commit(outlet, delta);
        }
    }

    /// Adds opportunistic buffer charging at the buffer's node.
    pub fn set_charge(&mut self, kw: f32) {
        self.charge_kw = kw.max(0.0);
        self.rebuild();
    }

    /// Recomputes every internal node from the outlet assignments.
    pub fn rebuild(&mut self) {
        let tree = self.tree;
        for id in tree.depth_first() {
            if tree.node(*id).kind != NodeKind::Outlet {
                self.through_kw[id.index()] = 0.0;
            }
        }
        for id in tree.depth_first().iter().rev() {
            if let Some(parent) = tree.node(*id).parent() {
                let flow = self.flow_kw(*id);
                self.through_kw[parent.index()] += flow;
            }
        }
    }

    /// Outlet assignments in outlet order, including idle outlets at zero.
    pub fn assignments(&self) -> BTreeMap<NodeId, f32> {
        self.tree
            .outlets()
            .iter()
            .map(|o| (*o, self.assigned_kw(*o)))
            .collect()
    }

    /// Most charging the buffer's node and its ancestors can absorb now.
    ///
    /// Zero if the buffer is discharging, or if the charge would leave some
    /// node on the path above zero but below its floor.
    pub fn charge_room_kw(&self, limit_kw: f32) -> f32 {
        let Some(port) = self.port else {
            return 0.0;
        };
        if self.discharge_kw() > POWER_TOLERANCE_KW {
            return 0.0;
        }

        let room = self
            .tree
            .path_to_root(port.node)
            .map(|id| self.tree.node(id).max_power_kw - self.flow_kw(id))
            .fold(limit_kw, f32::min)
            .max(0.0);
        if room <= POWER_TOLERANCE_KW {
            return 0.0;
        }

        let floors_hold = self.tree.path_to_root(port.node).all(|id| {
            let after = self.flow_kw(id) + room;
            after + POWER_TOLERANCE_KW >= self.tree.node(id).min_power_kw
        });
        if floors_hold { room } else { 0.0 }
    }
}

/// Flow a buffered node draws upstream when its children draw `through`.
fn buffered(through: f32, max: f32, discharge_limit: f32) -> f32 {
    through - (through - max).clamp(0.0, discharge_limit)
}

/// Effective activation floor of every node for one step, indexed by arena
/// position.
///
/// Outlets take the given per-outlet floor. An internal node's floor is capped
/// at the most power its subtree could draw this step (its ceilings, the
/// buffer, and the eligible demand beneath it), so a floor never demands power
/// that cannot be drawn.
///
/// # Arguments
///
/// * `eligible_kw` - Demand that may be served at each outlet (0 elsewhere)
/// * `outlet_floor_kw` - Smallest nonzero power each outlet may carry
pub fn effective_floors(
    tree: &CapacityTree,
    port: Option<BufferPort>,
    eligible_kw: &[f32],
    outlet_floor_kw: &[f32],
) -> Vec<f32> {
    let mut capability = vec![0.0_f32; tree.len()];
    let mut floors = vec![0.0_f32; tree.len()];

    for id in tree.depth_first().iter().rev() {
        let i = id.index();
        let node = tree.node(*id);
        if node.kind == NodeKind::Outlet {
            let cap = node.max_power_kw.min(eligible_kw[i]).max(0.0);
            capability[i] = if cap + POWER_TOLERANCE_KW >= outlet_floor_kw[i] { cap } else { 0.0 };
            floors[i] = outlet_floor_kw[i];
            continue;
        }

        let children: f32 = node.children().iter().map(|c| capability[c.index()]).sum();
        capability[i] = match port {
            Some(p) if p.node == *id => children
                .min(node.max_power_kw + p.discharge_limit_kw)
                .min(node.max_power_kw),
            _ => children.min(node.max_power_kw),
        };
        floors[i] = node.min_power_kw.min(capability[i]);
    }
    floors
}

/// Shuts down anything running below its floor.
///
/// Outlets below their floor are zeroed first; then nodes are visited
/// children-first and the whole subtree of a node running in
/// `(0, floor)` is zeroed. Returns how many outlets were switched off.
pub fn enforce_floors(ledger: &mut FlowLedger<'_>, floors: &[f32]) -> usize {
    let tree = ledger.tree();
    let mut switched_off = 0;

    for outlet in tree.outlets() {
        let kw = ledger.assigned_kw(*outlet);
        if below_floor(kw, floors[outlet.index()]) {
            ledger.set(*outlet, 0.0);
            switched_off += 1;
        }
    }

    for id in tree.depth_first().iter().rev() {
        if tree.node(*id).kind == NodeKind::Outlet {
            continue;
        }
        if below_floor(ledger.flow_kw(*id), floors[id.index()]) {
            for outlet in tree.outlets_under(*id) {
                if ledger.assigned_kw(outlet) > 0.0 {
                    ledger.set(outlet, 0.0);
                    switched_off += 1;
                }
            }
        }
    }
    switched_off
}

fn below_floor(kw: f32, floor: f32) -> bool {
    kw > POWER_TOLERANCE_KW && kw < floor - POWER_TOLERANCE_KW
}

/// Checks a finished step against every bound of the tree.
///
/// With `enforce_tree` false only outlet ceilings are checked, which is all an
/// uncontrolled site promises.
///
/// # Errors
///
/// Returns the first broken bound as an `AllocationInvariantViolation`.
pub fn verify(
    ledger: &FlowLedger<'_>,
    floors: &[f32],
    enforce_tree: bool,
) -> Result<(), AllocationInvariantViolation> {
    let tree = ledger.tree();
    let mut fresh = ledger.clone();
    fresh.rebuild();

    let violation = |id: NodeId, detail: String| AllocationInvariantViolation {
        node: tree.node(id).name.clone(),
        detail,
    };

    for id in tree.depth_first() {
        let node = tree.node(*id);
        let flow = fresh.flow_kw(*id);

        if flow < -POWER_TOLERANCE_KW {
            return Err(violation(*id, format!("negative flow {flow} kW")));
        }
        if node.kind != NodeKind::Outlet && !enforce_tree {
            continue;
        }
        if flow > node.max_power_kw + POWER_TOLERANCE_KW {
            return Err(violation(
                *id,
                format!("flow {flow} kW above ceiling {} kW", node.max_power_kw),
            ));
        }
        if enforce_tree && below_floor(flow, floors[id.index()]) {
            return Err(violation(
                *id,
                format!("flow {flow} kW below floor {} kW", floors[id.index()]),
            ));
        }
    }

    if let Some(port) = fresh.port() {
        let through = fresh.through_kw(port.node);
        let max = tree.node(port.node).max_power_kw;
        if enforce_tree && through > max + port.discharge_limit_kw + POWER_TOLERANCE_KW {
            return Err(violation(
                port.node,
                format!("demand {through} kW exceeds ceiling plus buffer output"),
            ));
        }
    }
    Ok(())
}
