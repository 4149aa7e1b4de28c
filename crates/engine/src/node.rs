//! Node state: value, formula, trigger policy and tree linkage.
//!
//! Nodes live in the `Tree` arena and refer to each other by `NodeId`.
//! A symlink node aliases a real node at a second tree position; every
//! observable read on a symlink (name, value, flags) resolves to the
//! target, while its parent/children linkage is its own.

use std::collections::BTreeMap;

use cairn_core::Series;

use crate::formula::validate::CompiledFormula;
use crate::node_id::NodeId;

/// How many dirty, trigger-eligible children are required before a
/// parent recomputes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TriggerType {
    /// One dirty trigger-eligible child is enough.
    #[default]
    Any,
    /// Every trigger-eligible child must be dirty and unlocked;
    /// a partial update never recomputes the parent.
    All,
}

/// Construction options for a real node. Only `name` is required.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    pub name: String,
    pub desc: String,
    pub value: Series,
    /// Raw formula text; compiled lazily on first calculate, or eagerly
    /// via `Tree::set_formula`. Empty means "no computed value".
    pub formula: String,
    pub trigger_type: TriggerType,
    pub is_trigger_event: bool,
    pub is_deferred: bool,
    pub read_only: bool,
    /// Suppress dirty/propagation when an incoming value is
    /// pointwise-equal to the current one.
    pub check_equal: bool,
    pub parent: Option<NodeId>,
    /// Existing nodes to attach under the new node, in order.
    pub children: Vec<NodeId>,
}

impl Default for NodeSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            desc: String::new(),
            value: Series::new(),
            formula: String::new(),
            trigger_type: TriggerType::Any,
            is_trigger_event: true,
            is_deferred: false,
            read_only: false,
            check_equal: true,
            parent: None,
            children: Vec::new(),
        }
    }
}

impl NodeSpec {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub name: String,
    /// Per-node metadata. Deliberately not proxied through symlinks:
    /// each alias site carries its own description.
    pub desc: String,
    pub parent: Option<NodeId>,
    /// Ordered; order is significant for formula binding.
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

#[derive(Debug, Clone)]
pub(crate) enum NodeKind {
    Real(RealState),
    Symlink(SymlinkState),
}

#[derive(Debug, Clone)]
pub(crate) struct RealState {
    pub value: Series,
    pub formula: String,
    /// Never stale relative to `formula`: cleared on reassignment,
    /// repopulated on compile.
    pub compiled: Option<CompiledFormula>,
    pub trigger_type: TriggerType,
    pub is_trigger_event: bool,
    pub is_deferred: bool,
    pub is_locked: bool,
    /// Monotonic: set on every material value change, cleared only by
    /// an explicit host call.
    pub is_dirty: bool,
    /// Meaningful at a root: freezes attach/detach in the whole tree.
    pub read_only: bool,
    pub check_equal: bool,
    /// Absolute alias path -> symlink node, for every alias of this
    /// node. Fan-out target of the propagation step.
    pub registry: BTreeMap<String, NodeId>,
}

#[derive(Debug, Clone)]
pub(crate) struct SymlinkState {
    pub target: NodeId,
    /// Cached at attach, consumed at detach; the registry key.
    pub abs_path: Option<String>,
}

impl Node {
    pub(crate) fn real(spec: NodeSpec) -> Self {
        Self {
            name: spec.name,
            desc: spec.desc,
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Real(RealState {
                value: spec.value,
                formula: spec.formula,
                compiled: None,
                trigger_type: spec.trigger_type,
                is_trigger_event: spec.is_trigger_event,
                is_deferred: spec.is_deferred,
                is_locked: false,
                is_dirty: false,
                read_only: spec.read_only,
                check_equal: spec.check_equal,
                registry: BTreeMap::new(),
            }),
        }
    }

    pub(crate) fn symlink(name: String, target: NodeId) -> Self {
        Self {
            name,
            desc: String::new(),
            parent: None,
            children: Vec::new(),
            kind: NodeKind::Symlink(SymlinkState {
                target,
                abs_path: None,
            }),
        }
    }

    pub(crate) fn is_symlink(&self) -> bool {
        matches!(self.kind, NodeKind::Symlink(_))
    }
}
