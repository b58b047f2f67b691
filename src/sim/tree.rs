//! Capacity tree: feeder, distribution branches, and charging outlets.
//!
//! Nodes live in an arena indexed by [`NodeId`]. Parents always precede their
//! children in the arena, so the tree is acyclic by construction and an
//! ancestor chain is a walk over parent indices.

use std::collections::BTreeSet;
use std::fmt;

use crate::devices::StorageBuffer;
use crate::error::ConfigurationError;

/// Stable index of a node within its [`CapacityTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// Arena index of the node.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tier of a node in the capacity tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Grid connection at the root.
    Feeder,
    /// Intermediate distribution point.
    Branch,
    /// Individual charge point; always a leaf.
    Outlet,
}

/// One node of the capacity tree.
///
/// `min_power_kw` is an activation floor: it only binds while the node
/// carries nonzero flow.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerNode {
    pub name: String,
    pub kind: NodeKind,
    pub max_power_kw: f32,
    pub min_power_kw: f32,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

impl PowerNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }
}

/// A storage buffer and the node it hangs from.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageAttachment {
    pub node: NodeId,
    pub buffer: StorageBuffer,
}

/// Validated, immutable description of the site's power hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityTree {
    nodes: Vec<PowerNode>,
    /// Depth-first pre-order of all nodes.
    order: Vec<NodeId>,
    /// Position of each node in `order`, indexed by arena index.
    rank: Vec<usize>,
    /// Outlets in depth-first order.
    outlets: Vec<NodeId>,
    storage: Option<StorageAttachment>,
}

impl CapacityTree {
    /// Starts a tree rooted at a feeder.
    ///
    /// # Examples
    ///
    /// ```
    /// use ev_site_sim::sim::tree::CapacityTree;
    ///
    /// let mut builder = CapacityTree::builder("grid", 100.0, 10.0);
    /// let root = builder.root();
    /// let branch = builder.branch(root, "cs1", 10.0, 1.0);
    /// builder.outlet(branch, "cp1", 5.0, 0.5);
    /// let tree = builder.build().unwrap();
    /// assert_eq!(tree.outlets().len(), 1);
    /// ```
    pub fn builder(feeder: impl Into<String>, max_power_kw: f32, min_power_kw: f32) -> TreeBuilder {
        TreeBuilder::new(feeder, max_power_kw, min_power_kw)
    }

    /// Builds a uniform wallbox site: one feeder, `outlets / outlets_per_branch`
    /// branches, `outlets_per_branch` outlets each.
    ///
    /// Missing ceilings default to the sum of the outlets beneath; floors are 0.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::UnevenWallbox` if `outlets` is not a
    /// positive multiple of `outlets_per_branch`, and the usual validation
    /// errors for inconsistent limits.
    pub fn wallbox(
        outlets: usize,
        outlet_power_kw: f32,
        outlets_per_branch: usize,
        branch_power_kw: Option<f32>,
        feeder_power_kw: Option<f32>,
    ) -> Result<Self, ConfigurationError> {
        if outlets == 0 || outlets_per_branch == 0 || outlets % outlets_per_branch != 0 {
            return Err(ConfigurationError::UnevenWallbox {
                outlets,
                per_branch: outlets_per_branch,
            });
        }

        let branches = outlets / outlets_per_branch;
        let branch_kw = branch_power_kw.unwrap_or(outlet_power_kw * outlets_per_branch as f32);
        let feeder_kw = feeder_power_kw.unwrap_or(outlet_power_kw * outlets as f32);

        let mut builder = Self::builder("feeder", feeder_kw, 0.0);
        let root = builder.root();
        for b in 0..branches {
            let branch = builder.branch(root, format!("cs{}", b + 1), branch_kw, 0.0);
            for o in 0..outlets_per_branch {
                let n = b * outlets_per_branch + o + 1;
                builder.outlet(branch, format!("cp{n}"), outlet_power_kw, 0.0);
            }
        }
        builder.build()
    }

    /// Returns the node behind `id`.
    pub fn node(&self, id: NodeId) -> &PowerNode {
        &self.nodes[id.0]
    }

    /// The feeder.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes in depth-first pre-order.
    pub fn depth_first(&self) -> &[NodeId] {
        &self.order
    }

    /// Position of `id` in depth-first order; the tie-break key for policies.
    pub fn tree_rank(&self, id: NodeId) -> usize {
        self.rank[id.0]
    }

    /// Outlets in depth-first order.
    pub fn outlets(&self) -> &[NodeId] {
        &self.outlets
    }

    /// Strict ancestors of `id`, nearest first, ending at the feeder.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.node(id).parent, |n| self.node(*n).parent)
    }

    /// `id` followed by its ancestors.
    pub fn path_to_root(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), |n| self.node(*n).parent)
    }

    /// Outlets inside the subtree rooted at `id`, in depth-first order.
    pub fn outlets_under(&self, id: NodeId) -> Vec<NodeId> {
        self.outlets
            .iter()
            .copied()
            .filter(|o| self.path_to_root(*o).any(|n| n == id))
            .collect()
    }

    /// Looks a node up by name.
    pub fn find(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().position(|n| n.name == name).map(NodeId)
    }

    /// The storage buffer and its attachment node, if any.
    pub fn storage(&self) -> Option<&StorageAttachment> {
        self.storage.as_ref()
    }

    /// Returns a copy of this tree with `buffer` attached to `node`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::StorageOnOutlet` if `node` is an outlet.
    pub fn with_storage(
        mut self,
        node: NodeId,
        buffer: StorageBuffer,
    ) -> Result<Self, ConfigurationError> {
        let target = self.node(node);
        if target.kind == NodeKind::Outlet {
            return Err(ConfigurationError::StorageOnOutlet(target.name.clone()));
        }
        self.storage = Some(StorageAttachment { node, buffer });
        Ok(self)
    }
}

/// Incremental construction of a [`CapacityTree`]; validated by [`TreeBuilder::build`].
#[derive(Debug, Clone)]
pub struct TreeBuilder {
    nodes: Vec<PowerNode>,
}

impl TreeBuilder {
    fn new(feeder: impl Into<String>, max_power_kw: f32, min_power_kw: f32) -> Self {
        Self {
            nodes: vec![PowerNode {
                name: feeder.into(),
                kind: NodeKind::Feeder,
                max_power_kw,
                min_power_kw,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// The feeder node.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Adds a distribution branch under `parent`.
    pub fn branch(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        max_power_kw: f32,
        min_power_kw: f32,
    ) -> NodeId {
        self.push(parent, name.into(), NodeKind::Branch, max_power_kw, min_power_kw)
    }

    /// Adds a charging outlet under `parent`.
    pub fn outlet(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        max_power_kw: f32,
        min_power_kw: f32,
    ) -> NodeId {
        self.push(parent, name.into(), NodeKind::Outlet, max_power_kw, min_power_kw)
    }

    fn push(
        &mut self,
        parent: NodeId,
        name: String,
        kind: NodeKind,
        max_power_kw: f32,
        min_power_kw: f32,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(PowerNode {
            name,
            kind,
            max_power_kw,
            min_power_kw,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Validates limits and shape and freezes the tree.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` for negative or non-finite limits, a floor
    /// above its ceiling, an outlet with children, a duplicate name, or a site
    /// without outlets.
    pub fn build(self) -> Result<CapacityTree, ConfigurationError> {
        let mut names = BTreeSet::new();
        for node in &self.nodes {
            if !names.insert(node.name.as_str()) {
                return Err(ConfigurationError::DuplicateNode(node.name.clone()));
            }
            let finite = node.max_power_kw.is_finite() && node.min_power_kw.is_finite();
            if !finite || node.max_power_kw < 0.0 || node.min_power_kw < 0.0 {
                return Err(ConfigurationError::InvalidLimit {
                    node: node.name.clone(),
                });
            }
            if node.min_power_kw > node.max_power_kw {
                return Err(ConfigurationError::FloorAboveCeiling {
                    node: node.name.clone(),
                    min_kw: node.min_power_kw,
                    max_kw: node.max_power_kw,
                });
            }
            if node.kind == NodeKind::Outlet && !node.children.is_empty() {
                return Err(ConfigurationError::OutletWithChildren(node.name.clone()));
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![NodeId(0)];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }

        let mut rank = vec![0; self.nodes.len()];
        for (position, id) in order.iter().enumerate() {
            rank[id.0] = position;
        }

        let outlets: Vec<NodeId> = order
            .iter()
            .copied()
            .filter(|id| self.nodes[id.0].kind == NodeKind::Outlet)
            .collect();
        if outlets.is_empty() {
            return Err(ConfigurationError::NoOutlets);
        }

        Ok(CapacityTree {
            nodes: self.nodes,
            order,
            rank,
            outlets,
            storage: None,
        })
    }
}
