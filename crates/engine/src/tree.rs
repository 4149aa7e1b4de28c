//! Node arena, tree structure, and the propagation engine.
//!
//! `Tree` owns every node and wires them together by `NodeId`, so parent
//! and alias back-references never form ownership cycles. All mutation
//! goes through `&mut self`: the engine is single-writer by construction
//! and every value assignment runs its full upward and sideways
//! propagation to completion before returning.
//!
//! # Propagation
//!
//! When a node's value materially changes it is marked dirty, then:
//!
//! 1. if the trigger predicate holds for the node against its parent,
//!    the parent recomputes (synchronously, recursively);
//! 2. for every symlink alias registered against the node, the same
//!    predicate is evaluated with the alias standing in as the child,
//!    and the alias's parent recomputes.
//!
//! Each branch is independent: an error aborts that branch only, and
//! branches already run remain in effect.

use cairn_core::Series;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::formula::eval::{self, Bindings, EvalValue};
use crate::formula::functions::FunctionRegistry;
use crate::formula::validate::{self, SELF_KEYWORD};
use crate::node::{Node, NodeKind, NodeSpec, RealState, TriggerType};
use crate::node_id::NodeId;

/// Propagation deeper than this fails with `EngineError::Cycle` rather
/// than exhausting the call stack on a cyclic formula graph.
pub const MAX_RECALC_DEPTH: usize = 64;

/// Separator for absolute alias paths.
const PATH_SEPARATOR: &str = "/";

pub struct Tree {
    nodes: FxHashMap<NodeId, Node>,
    /// Next ID to assign. Monotonically increasing, never reused.
    next_id: u64,
    functions: FunctionRegistry,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// Create an empty tree with the default function registry.
    pub fn new() -> Self {
        Self::with_functions(FunctionRegistry::new())
    }

    /// Create an empty tree with a host-supplied function registry.
    pub fn with_functions(functions: FunctionRegistry) -> Self {
        Self {
            nodes: FxHashMap::default(),
            next_id: 1,
            functions,
        }
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    /// Register an extra formula function. Formulas compiled earlier are
    /// unaffected; the registry is consulted at compile time.
    pub fn register_function(
        &mut self,
        name: impl Into<String>,
        func: crate::formula::functions::FunctionImpl,
    ) {
        self.functions.register(name, func);
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a real node. A formula given here is compiled lazily on
    /// first calculate; use `set_formula` for eager validation.
    pub fn add_node(&mut self, mut spec: NodeSpec) -> Result<NodeId, EngineError> {
        if spec.name.is_empty() {
            return Err(EngineError::Structure("node name must not be empty".into()));
        }
        let parent = spec.parent;
        let children = std::mem::take(&mut spec.children);
        let id = self.insert(Node::real(spec));
        if let Err(err) = self.link_new(id, parent, &children) {
            for &child in &children {
                if matches!(self.node(child), Ok(n) if n.parent == Some(id)) {
                    let _ = self.detach_unchecked(child);
                }
            }
            self.nodes.remove(&id);
            return Err(err);
        }
        Ok(id)
    }

    fn link_new(
        &mut self,
        id: NodeId,
        parent: Option<NodeId>,
        children: &[NodeId],
    ) -> Result<(), EngineError> {
        if let Some(parent) = parent {
            self.attach(id, parent)?;
        }
        for &child in children {
            self.attach(child, id)?;
        }
        Ok(())
    }

    /// Create a symlink aliasing `target` at a second tree position.
    ///
    /// The alias proxies the target's name, value and flags; only its
    /// tree linkage and description are its own. Aliasing an alias
    /// resolves to the underlying real node, so chains never form.
    pub fn create_symlink(
        &mut self,
        target: NodeId,
        parent: Option<NodeId>,
    ) -> Result<NodeId, EngineError> {
        let target = self.resolve(target)?;
        let name = self.node(target)?.name.clone();
        let id = self.insert(Node::symlink(name, target));
        if let Some(parent) = parent {
            if let Err(err) = self.attach(id, parent) {
                self.nodes.remove(&id);
                return Err(err);
            }
        }
        Ok(id)
    }

    fn insert(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(id, node);
        id
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    /// Attach `child` under `parent`. A node already attached elsewhere
    /// is detached first. Gated by the read-only flag of both trees'
    /// roots, looked up by walking to the root at mutation time.
    pub fn attach(&mut self, child: NodeId, parent: NodeId) -> Result<(), EngineError> {
        self.ensure_exists(child)?;
        self.ensure_exists(parent)?;

        if child == parent || self.is_ancestor(child, parent)? {
            return Err(EngineError::Structure(format!(
                "cannot attach '{}' under its own subtree",
                self.node(child)?.name
            )));
        }
        if self.root_read_only(parent)? || self.root_read_only(child)? {
            return Err(EngineError::ReadOnly);
        }

        // Names are unique within a parent; formula binding depends on it.
        let child_name = self.node(child)?.name.clone();
        for &sibling in &self.node(parent)?.children {
            if self.node(sibling)?.name == child_name {
                return Err(EngineError::Structure(format!(
                    "parent '{}' already has a child named '{}'",
                    self.node(parent)?.name,
                    child_name
                )));
            }
        }

        if self.node(child)?.parent.is_some() {
            self.detach_unchecked(child)?;
        }
        self.node_mut(child)?.parent = Some(parent);
        self.node_mut(parent)?.children.push(child);
        self.post_attach(child)
    }

    /// Detach `child` from its parent, leaving it a root. Gated by the
    /// read-only flag of the owning tree's root.
    pub fn detach(&mut self, child: NodeId) -> Result<(), EngineError> {
        self.ensure_exists(child)?;
        if self.node(child)?.parent.is_none() {
            return Err(EngineError::Structure(format!(
                "'{}' is a root and cannot be detached",
                self.node(child)?.name
            )));
        }
        if self.root_read_only(child)? {
            return Err(EngineError::ReadOnly);
        }
        self.detach_unchecked(child)
    }

    fn detach_unchecked(&mut self, child: NodeId) -> Result<(), EngineError> {
        let Some(parent) = self.node(child)?.parent else {
            return Ok(());
        };
        self.node_mut(parent)?.children.retain(|&c| c != child);
        self.node_mut(child)?.parent = None;
        self.post_detach(child)
    }

    /// Symlink attach hook: cache the absolute path and register the
    /// alias against the target. Exactly one registration per attach.
    fn post_attach(&mut self, id: NodeId) -> Result<(), EngineError> {
        let target = match &self.node(id)?.kind {
            NodeKind::Symlink(s) => s.target,
            NodeKind::Real(_) => return Ok(()),
        };
        let path = self.abs_path_of(id)?;
        if let NodeKind::Symlink(s) = &mut self.node_mut(id)?.kind {
            s.abs_path = Some(path.clone());
        }
        let prev = self.real_state_mut(target)?.registry.insert(path, id);
        debug_assert!(prev.is_none(), "symlink registered twice under one path");
        Ok(())
    }

    /// Symlink detach hook: deregistration must correspond 1:1 to a
    /// prior registration.
    fn post_detach(&mut self, id: NodeId) -> Result<(), EngineError> {
        let (target, path) = match &mut self.node_mut(id)?.kind {
            NodeKind::Symlink(s) => {
                let Some(path) = s.abs_path.take() else {
                    debug_assert!(false, "symlink detached without a cached path");
                    return Ok(());
                };
                (s.target, path)
            }
            NodeKind::Real(_) => return Ok(()),
        };
        let removed = self.real_state_mut(target)?.registry.remove(&path);
        debug_assert!(removed.is_some(), "symlink detach without prior registration");
        Ok(())
    }

    /// Remove a detached subtree from the arena. Symlinks inside the
    /// subtree are deregistered from their targets; a real node still
    /// aliased from outside the subtree cannot be removed.
    pub fn remove(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.ensure_exists(id)?;
        if self.node(id)?.parent.is_some() {
            return Err(EngineError::Structure(
                "detach a subtree before removing it".into(),
            ));
        }

        let mut subtree = Vec::new();
        let mut stack = vec![id];
        while let Some(n) = stack.pop() {
            subtree.push(n);
            stack.extend(self.node(n)?.children.iter().copied());
        }

        for &n in &subtree {
            if let NodeKind::Real(state) = &self.node(n)?.kind {
                if state.registry.values().any(|link| !subtree.contains(link)) {
                    return Err(EngineError::Structure(format!(
                        "'{}' still has registered aliases",
                        self.node(n)?.name
                    )));
                }
            }
        }
        for &n in &subtree {
            // A detached symlink root has already deregistered itself
            if matches!(&self.node(n)?.kind, NodeKind::Symlink(s) if s.abs_path.is_some()) {
                self.post_detach(n)?;
            }
        }
        for n in subtree {
            self.nodes.remove(&n);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Value and formula
    // ------------------------------------------------------------------

    /// Replace a node's value. With equal-checking on (the default), a
    /// pointwise-equal replacement is a complete no-op: no dirty flag,
    /// no propagation. Otherwise the value is stored, the node marked
    /// dirty, and propagation runs to completion before returning.
    pub fn set_value(&mut self, id: NodeId, value: Series) -> Result<(), EngineError> {
        self.set_value_at(id, value, 0)
    }

    fn set_value_at(
        &mut self,
        id: NodeId,
        value: Series,
        depth: usize,
    ) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        {
            let state = self.real_state_mut(id)?;
            if state.check_equal && state.value.pointwise_eq(&value) {
                return Ok(());
            }
            state.value = value;
            state.is_dirty = true;
        }
        self.propagate(id, depth)
    }

    /// Reassign a node's formula. All-or-nothing: parse and validation
    /// failures leave the previous formula and compiled form intact.
    pub fn set_formula(&mut self, id: NodeId, source: &str) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        let child_names = self.child_names(id)?;
        let compiled = validate::compile(source, &child_names, &self.functions)?;
        let state = self.real_state_mut(id)?;
        state.formula = source.to_string();
        state.compiled = Some(compiled);
        Ok(())
    }

    /// Recompute this node's value from its children.
    ///
    /// Fails with `Formula` when the node has no children, whatever the
    /// formula text. An empty formula is not an error: it emits a
    /// warning and leaves the value unchanged. The computed result goes
    /// through `set_value`, so a recompute cascades further propagation.
    pub fn calculate(&mut self, id: NodeId) -> Result<(), EngineError> {
        self.calculate_at(id, 0)
    }

    fn calculate_at(&mut self, id: NodeId, depth: usize) -> Result<(), EngineError> {
        if depth > MAX_RECALC_DEPTH {
            return Err(EngineError::Cycle(MAX_RECALC_DEPTH));
        }
        let id = self.resolve(id)?;
        let children = self.node(id)?.children.clone();
        if children.is_empty() {
            return Err(EngineError::Formula(format!(
                "'{}' has no children to evaluate over",
                self.node(id)?.name
            )));
        }
        let formula = self.real_state(id)?.formula.clone();
        if formula.is_empty() {
            warn!("'{}' has no formula to evaluate", self.node(id)?.name);
            return Ok(());
        }

        let compiled = match self.real_state(id)?.compiled.clone() {
            Some(compiled) => compiled,
            None => {
                let child_names = self.child_names(id)?;
                let compiled = validate::compile(&formula, &child_names, &self.functions)?;
                self.real_state_mut(id)?.compiled = Some(compiled.clone());
                compiled
            }
        };

        // Bind child i's name to child i's current value, aliases
        // resolving to their targets, plus the self-reference.
        let mut bindings = Bindings::default();
        for &child in &children {
            let real = self.resolve(child)?;
            bindings.insert(
                self.node(real)?.name.clone(),
                self.real_state(real)?.value.clone(),
            );
        }
        bindings.insert(
            SELF_KEYWORD.to_string(),
            self.real_state(id)?.value.clone(),
        );

        let result = eval::eval(&compiled.expr, &bindings, &self.functions)?;
        let series = match result {
            EvalValue::Series(series) => series,
            EvalValue::Number(n) => {
                return Err(EngineError::Value(format!(
                    "formula '{}' produced the scalar {}; node values are series",
                    formula, n
                )))
            }
        };
        self.set_value_at(id, series, depth)
    }

    // ------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------

    /// Whether this node, having just gone dirty, may push its parent
    /// into a recompute. Evaluated from the child's perspective; for a
    /// symlink the flags come from the target and the parent from the
    /// alias position.
    pub fn can_trigger_parent(&self, child: NodeId) -> Result<bool, EngineError> {
        let Some(parent_id) = self.node(child)?.parent else {
            return Ok(false);
        };
        let parent = self.real_state(self.resolve(parent_id)?)?;
        if parent.is_deferred || parent.is_locked {
            return Ok(false);
        }
        let state = self.real_state(self.resolve(child)?)?;
        match parent.trigger_type {
            TriggerType::Any => Ok(state.is_dirty && state.is_trigger_event && !state.is_locked),
            TriggerType::All => {
                if !state.is_dirty || state.is_locked {
                    return Ok(false);
                }
                // Fail-closed: every trigger-eligible sibling must be
                // dirty and unlocked before the parent may recompute.
                for &sibling in &self.node(parent_id)?.children {
                    if sibling == child {
                        continue;
                    }
                    let s = self.real_state(self.resolve(sibling)?)?;
                    if !s.is_trigger_event {
                        continue;
                    }
                    if !s.is_dirty || s.is_locked {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    fn propagate(&mut self, id: NodeId, depth: usize) -> Result<(), EngineError> {
        if let Some(parent) = self.node(id)?.parent {
            if self.can_trigger_parent(id)? {
                debug!(
                    "'{}' is triggered by the node '{}'",
                    self.node(parent)?.name,
                    self.node(id)?.name
                );
                self.calculate_at(parent, depth + 1)?;
            }
        }

        // Alias fan-out: one recompute per alias parent. Snapshot the
        // registry first; recomputes may touch the tree.
        let aliases: Vec<NodeId> = self.real_state(id)?.registry.values().copied().collect();
        for link in aliases {
            let Some(parent) = self.node(link)?.parent else {
                continue;
            };
            if self.can_trigger_parent(link)? {
                debug!(
                    "'{}' is triggered by the symlink '{}'",
                    self.node(parent)?.name,
                    self.node(link)?.name
                );
                self.calculate_at(parent, depth + 1)?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn name(&self, id: NodeId) -> Result<&str, EngineError> {
        Ok(&self.node(id)?.name)
    }

    /// Per-node description. Not proxied through symlinks: each alias
    /// site carries its own metadata.
    pub fn desc(&self, id: NodeId) -> Result<&str, EngineError> {
        Ok(&self.node(id)?.desc)
    }

    pub fn set_desc(&mut self, id: NodeId, desc: impl Into<String>) -> Result<(), EngineError> {
        self.node_mut(id)?.desc = desc.into();
        Ok(())
    }

    pub fn value(&self, id: NodeId) -> Result<&Series, EngineError> {
        Ok(&self.real_state(self.resolve(id)?)?.value)
    }

    pub fn formula(&self, id: NodeId) -> Result<&str, EngineError> {
        Ok(&self.real_state(self.resolve(id)?)?.formula)
    }

    pub fn is_dirty(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.real_state(self.resolve(id)?)?.is_dirty)
    }

    /// Dirty flags are monotonic; the engine never clears them on its
    /// own, not even after an ALL-triggered recompute.
    pub fn clear_dirty(&mut self, id: NodeId) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        self.real_state_mut(id)?.is_dirty = false;
        Ok(())
    }

    pub fn is_locked(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.real_state(self.resolve(id)?)?.is_locked)
    }

    pub fn set_locked(&mut self, id: NodeId, locked: bool) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        self.real_state_mut(id)?.is_locked = locked;
        Ok(())
    }

    pub fn is_deferred(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.real_state(self.resolve(id)?)?.is_deferred)
    }

    pub fn set_deferred(&mut self, id: NodeId, deferred: bool) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        self.real_state_mut(id)?.is_deferred = deferred;
        Ok(())
    }

    pub fn trigger_type(&self, id: NodeId) -> Result<TriggerType, EngineError> {
        Ok(self.real_state(self.resolve(id)?)?.trigger_type)
    }

    pub fn set_trigger_type(
        &mut self,
        id: NodeId,
        trigger_type: TriggerType,
    ) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        self.real_state_mut(id)?.trigger_type = trigger_type;
        Ok(())
    }

    pub fn is_trigger_event(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.real_state(self.resolve(id)?)?.is_trigger_event)
    }

    pub fn set_trigger_event(&mut self, id: NodeId, flag: bool) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        self.real_state_mut(id)?.is_trigger_event = flag;
        Ok(())
    }

    pub fn set_check_equal(&mut self, id: NodeId, flag: bool) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        self.real_state_mut(id)?.check_equal = flag;
        Ok(())
    }

    pub fn read_only(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.real_state(self.resolve(id)?)?.read_only)
    }

    pub fn set_read_only(&mut self, id: NodeId, flag: bool) -> Result<(), EngineError> {
        let id = self.resolve(id)?;
        self.real_state_mut(id)?.read_only = flag;
        Ok(())
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, EngineError> {
        Ok(self.node(id)?.parent)
    }

    /// Ordered children at this node's own tree position (a symlink's
    /// own linkage, not its target's).
    pub fn children(&self, id: NodeId) -> Result<&[NodeId], EngineError> {
        Ok(&self.node(id)?.children)
    }

    pub fn is_leaf(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.node(id)?.children.is_empty())
    }

    pub fn is_root(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.node(id)?.parent.is_none())
    }

    pub fn is_symlink(&self, id: NodeId) -> Result<bool, EngineError> {
        Ok(self.node(id)?.is_symlink())
    }

    pub fn root_of(&self, id: NodeId) -> Result<NodeId, EngineError> {
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            current = parent;
        }
        Ok(current)
    }

    /// Ancestor names from the root down to this node, joined with `/`.
    pub fn abs_path_of(&self, id: NodeId) -> Result<String, EngineError> {
        let mut names = vec![self.node(id)?.name.as_str()];
        let mut current = id;
        while let Some(parent) = self.node(current)?.parent {
            names.push(self.node(parent)?.name.as_str());
            current = parent;
        }
        names.reverse();
        Ok(names.join(PATH_SEPARATOR))
    }

    /// The aliases registered against this node: (absolute path,
    /// symlink id), in path order.
    pub fn aliases(&self, id: NodeId) -> Result<Vec<(String, NodeId)>, EngineError> {
        Ok(self
            .real_state(self.resolve(id)?)?
            .registry
            .iter()
            .map(|(path, link)| (path.clone(), *link))
            .collect())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn node(&self, id: NodeId) -> Result<&Node, EngineError> {
        self.nodes.get(&id).ok_or(EngineError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, EngineError> {
        self.nodes.get_mut(&id).ok_or(EngineError::UnknownNode(id))
    }

    fn ensure_exists(&self, id: NodeId) -> Result<(), EngineError> {
        self.node(id).map(|_| ())
    }

    /// Resolve a symlink to its target; real nodes resolve to themselves.
    fn resolve(&self, id: NodeId) -> Result<NodeId, EngineError> {
        match &self.node(id)?.kind {
            NodeKind::Real(_) => Ok(id),
            NodeKind::Symlink(s) => Ok(s.target),
        }
    }

    fn real_state(&self, id: NodeId) -> Result<&RealState, EngineError> {
        match &self.node(id)?.kind {
            NodeKind::Real(state) => Ok(state),
            NodeKind::Symlink(_) => Err(EngineError::Structure(format!(
                "expected a real node at {}",
                id
            ))),
        }
    }

    fn real_state_mut(&mut self, id: NodeId) -> Result<&mut RealState, EngineError> {
        match &mut self.node_mut(id)?.kind {
            NodeKind::Real(state) => Ok(state),
            NodeKind::Symlink(_) => Err(EngineError::Structure(format!(
                "expected a real node at {}",
                id
            ))),
        }
    }

    fn root_read_only(&self, id: NodeId) -> Result<bool, EngineError> {
        let root = self.root_of(id)?;
        Ok(self.real_state(self.resolve(root)?)?.read_only)
    }

    /// Is `a` an ancestor of `b`?
    fn is_ancestor(&self, a: NodeId, b: NodeId) -> Result<bool, EngineError> {
        let mut current = self.node(b)?.parent;
        while let Some(parent) = current {
            if parent == a {
                return Ok(true);
            }
            current = self.node(parent)?.parent;
        }
        Ok(false)
    }

    fn child_names(&self, id: NodeId) -> Result<Vec<String>, EngineError> {
        let mut names = Vec::new();
        for &child in &self.node(id)?.children {
            names.push(self.node(self.resolve(child)?)?.name.clone());
        }
        Ok(names)
    }
}
