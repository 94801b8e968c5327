//! Unification-family operations on feature structures
//!
//! All binary operations leave their argument untouched. `unify` and
//! `is_unifiable` do not modify the receiver either; `priority_union`,
//! `union` and `subtract` mutate it in place. Every graph walk carries a
//! visited memo so cyclic structures terminate, and nodes shared in either
//! input stay shared in the output.

use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;

use crate::bindings::VariableBindings;
use crate::feature_struct::{FeatureStruct, Node, NodeId, ROOT, extract};
use crate::feature_system::{Defaults, FeatureId};

/// Bookkeeping features that [`FeatureStruct::anti_feature_struct`] copies
/// verbatim instead of negating
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InternalFeatures {
    features: FxHashSet<FeatureId>,
}

impl InternalFeatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: FeatureId) {
        self.features.insert(feature);
    }

    pub fn contains(&self, feature: FeatureId) -> bool {
        self.features.contains(&feature)
    }
}

impl FromIterator<FeatureId> for InternalFeatures {
    fn from_iter<I: IntoIterator<Item = FeatureId>>(iter: I) -> Self {
        Self {
            features: iter.into_iter().collect(),
        }
    }
}

/// Union-find unification over the disjoint union of two arenas
///
/// Ids below `left.len()` belong to the receiver; the rest are the
/// argument's ids shifted by `left.len()`. Touched nodes are copied into
/// `overlay` so neither input is modified.
struct Unifier<'a> {
    left: &'a [Node],
    right: &'a [Node],
    overlay: FxHashMap<NodeId, Node>,
    parent: FxHashMap<NodeId, NodeId>,
    bindings: VariableBindings,
}

impl<'a> Unifier<'a> {
    fn new(left: &'a FeatureStruct, right: &'a FeatureStruct, bindings: VariableBindings) -> Self {
        Self {
            left: &left.nodes,
            right: &right.nodes,
            overlay: FxHashMap::default(),
            parent: FxHashMap::default(),
            bindings,
        }
    }

    fn base(left: &[Node], right: &[Node], id: NodeId) -> Node {
        if id < left.len() {
            return left[id].clone();
        }
        let offset = left.len();
        match &right[id - offset] {
            Node::Complex(children) => {
                Node::Complex(children.iter().map(|(f, c)| (*f, c + offset)).collect())
            }
            leaf => leaf.clone(),
        }
    }

    fn load(&mut self, id: NodeId) -> &mut Node {
        let (left, right) = (self.left, self.right);
        self.overlay
            .entry(id)
            .or_insert_with(|| Self::base(left, right, id))
    }

    fn find(&self, mut id: NodeId) -> NodeId {
        while let Some(&next) = self.parent.get(&id) {
            id = next;
        }
        id
    }

    fn run(&mut self) -> bool {
        let mut stack = vec![(ROOT, self.left.len() + ROOT)];
        while let Some((x, y)) = stack.pop() {
            let x = self.find(x);
            let y = self.find(y);
            if x == y {
                continue;
            }
            let other = self.load(y).clone();
            let (overlay, bindings) = (&mut self.overlay, &mut self.bindings);
            let (left, right) = (self.left, self.right);
            let this = overlay
                .entry(x)
                .or_insert_with(|| Self::base(left, right, x));
            match (this, other) {
                (Node::Complex(this), Node::Complex(other)) => {
                    for (f, yc) in other {
                        match this.get(&f) {
                            Some(&xc) => stack.push((xc, yc)),
                            None => {
                                this.insert(f, yc);
                            }
                        }
                    }
                }
                (Node::Symbolic(this), Node::Symbolic(other)) => {
                    if !this.unify(&other, bindings) {
                        return false;
                    }
                }
                _ => return false,
            }
            self.parent.insert(y, x);
        }
        true
    }

    fn materialize(mut self) -> (FeatureStruct, VariableBindings) {
        let root = self.find(ROOT);
        let nodes = extract(root, |id| match self.load(id).clone() {
            Node::Complex(children) => Node::Complex(
                children
                    .into_iter()
                    .map(|(f, c)| (f, self.find(c)))
                    .collect(),
            ),
            leaf => leaf,
        });
        (FeatureStruct::from_nodes(nodes), self.bindings)
    }
}

impl FeatureStruct {
    // ===== Unification =====

    /// Most general structure consistent with both, or `None`
    pub fn unify(&self, other: &FeatureStruct) -> Option<FeatureStruct> {
        self.unify_with_bindings(other, &mut VariableBindings::new())
    }

    /// Unify, recording variable bindings; `bindings` changes only on success
    pub fn unify_with_bindings(
        &self,
        other: &FeatureStruct,
        bindings: &mut VariableBindings,
    ) -> Option<FeatureStruct> {
        let mut unifier = Unifier::new(self, other, bindings.clone());
        if !unifier.run() {
            return None;
        }
        let (result, new_bindings) = unifier.materialize();
        bindings.replace(new_bindings);
        Some(result)
    }

    /// Same test as [`unify`](Self::unify) without building the result
    pub fn is_unifiable(&self, other: &FeatureStruct) -> bool {
        self.is_unifiable_with_bindings(other, &mut VariableBindings::new())
    }

    pub fn is_unifiable_with_bindings(&self, other: &FeatureStruct, bindings: &mut VariableBindings) -> bool {
        let mut unifier = Unifier::new(self, other, bindings.clone());
        if unifier.run() {
            bindings.replace(unifier.bindings);
            true
        } else {
            false
        }
    }

    // ===== Subsumption =====

    /// True if everything `self` asserts is implied by `other`
    pub fn subsumes(&self, other: &FeatureStruct) -> bool {
        self.subsumes_with(other, None, &mut VariableBindings::new())
    }

    /// Subsumption consulting `defaults` for root features absent from
    /// `other`
    pub fn subsumes_with(
        &self,
        other: &FeatureStruct,
        defaults: Option<&Defaults>,
        bindings: &mut VariableBindings,
    ) -> bool {
        let mut scratch = bindings.clone();
        let mut visited: FxHashSet<(NodeId, NodeId)> = FxHashSet::default();
        // a shared pattern leaf must meet equal data values on every path
        let mut leaves: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut stack = vec![(ROOT, ROOT)];
        while let Some((a, b)) = stack.pop() {
            if !visited.insert((a, b)) {
                continue;
            }
            let (Some(this), Some(that)) = (self.children(a), other.children(b)) else {
                return false;
            };
            let root_defaults = defaults.filter(|_| b == ROOT);
            for (f, &child) in this {
                match (that.get(f), &self.nodes[child]) {
                    (Some(&oc), Node::Complex(_)) => stack.push((child, oc)),
                    (Some(&oc), Node::Symbolic(value)) => match &other.nodes[oc] {
                        Node::Symbolic(ov) => {
                            let first = *leaves.entry(child).or_insert(oc);
                            if first != oc && other.nodes[first] != other.nodes[oc] {
                                return false;
                            }
                            if !value.subsumes(ov, &mut scratch) {
                                return false;
                            }
                        }
                        Node::Complex(_) => return false,
                    },
                    (None, Node::Symbolic(value)) => match root_defaults.and_then(|d| d.get(*f)) {
                        Some(default) => {
                            if !value.subsumes(default, &mut scratch) {
                                return false;
                            }
                        }
                        None => return false,
                    },
                    (None, Node::Complex(_)) => return false,
                }
            }
        }
        bindings.replace(scratch);
        true
    }

    // ===== Priority union =====

    /// Overlay `other` onto `self`: the argument's leaf values replace the
    /// receiver's on shared paths and fill in absent ones, and the
    /// argument's re-entrancy is copied onto the receiver
    pub fn priority_union(&mut self, other: &FeatureStruct) {
        self.priority_union_with_bindings(other, &VariableBindings::new());
    }

    /// Priority union resolving the argument's bound variables
    pub fn priority_union_with_bindings(&mut self, other: &FeatureStruct, bindings: &VariableBindings) {
        self.check_frozen();
        let mut copies: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        self.priority_union_impl(ROOT, other, ROOT, bindings, &mut copies);
        self.compact();
    }

    fn priority_union_impl(
        &mut self,
        this: NodeId,
        other: &FeatureStruct,
        that: NodeId,
        bindings: &VariableBindings,
        copies: &mut FxHashMap<NodeId, NodeId>,
    ) {
        copies.insert(that, this);
        let (Some(this_children), Some(that_children)) = (self.children(this).cloned(), other.children(that))
        else {
            return;
        };

        for (f, &child) in &this_children {
            if let Some(&oc) = that_children.get(f)
                && other.children(oc).is_some()
                && !copies.contains_key(&oc)
                && self.children(child).is_some()
            {
                self.priority_union_impl(child, other, oc, bindings, copies);
            }
        }

        for (f, &oc) in that_children {
            let replacement = match this_children.get(f) {
                Some(&child) => match &other.nodes[oc] {
                    Node::Complex(_) => {
                        if self.children(child).is_some() {
                            copies.get(&oc).copied()
                        } else {
                            Some(self.copy_from(other, oc, copies))
                        }
                    }
                    Node::Symbolic(value) => match value.var().and_then(|v| {
                        bindings.get(&v.name).map(|b| b.variable_value(v.agree))
                    }) {
                        Some(resolved) => Some(self.push(Node::Symbolic(resolved))),
                        None => Some(self.copy_from(other, oc, copies)),
                    },
                },
                None => Some(self.copy_from(other, oc, copies)),
            };
            if let Some(id) = replacement
                && let Node::Complex(children) = &mut self.nodes[this]
            {
                children.insert(*f, id);
            }
        }
    }

    /// Copy `other`'s subgraph at `id` into this arena, reusing `copies`
    fn copy_from(&mut self, other: &FeatureStruct, id: NodeId, copies: &mut FxHashMap<NodeId, NodeId>) -> NodeId {
        if let Some(&copy) = copies.get(&id) {
            return copy;
        }
        let copy = self.push(Node::empty());
        copies.insert(id, copy);
        let mut pending = vec![(id, copy)];
        while let Some((src, dst)) = pending.pop() {
            let node = match &other.nodes[src] {
                Node::Complex(children) => {
                    let mut mapped = BTreeMap::new();
                    for (f, &c) in children {
                        let target = match copies.get(&c) {
                            Some(&t) => t,
                            None => {
                                let t = self.push(Node::empty());
                                copies.insert(c, t);
                                pending.push((c, t));
                                t
                            }
                        };
                        mapped.insert(*f, target);
                    }
                    Node::Complex(mapped)
                }
                leaf => leaf.clone(),
            };
            self.nodes[dst] = node;
        }
        copy
    }

    // ===== Union =====

    /// Per-path symbol-set union; paths present on only one side are dropped
    pub fn union(&mut self, other: &FeatureStruct) {
        self.union_with_bindings(other, &mut VariableBindings::new());
    }

    pub fn union_with_bindings(&mut self, other: &FeatureStruct, bindings: &mut VariableBindings) {
        self.check_frozen();
        let mut visited = FxHashSet::default();
        self.union_impl(ROOT, other, ROOT, bindings, &mut visited);
        self.compact();
    }

    fn union_impl(
        &mut self,
        this: NodeId,
        other: &FeatureStruct,
        that: NodeId,
        bindings: &mut VariableBindings,
        visited: &mut FxHashSet<(NodeId, NodeId)>,
    ) -> bool {
        if let Some(that_children) = other.children(that)
            && visited.insert((this, that))
        {
            for (f, &oc) in that_children {
                let Some(child) = self.children(this).and_then(|c| c.get(f).copied()) else {
                    continue;
                };
                let keep = if self.children(child).is_some() {
                    other.children(oc).is_some() && self.union_impl(child, other, oc, bindings, visited)
                } else {
                    match (&mut self.nodes[child], &other.nodes[oc]) {
                        (Node::Symbolic(value), Node::Symbolic(ov)) => value.merge(ov, bindings),
                        _ => false,
                    }
                };
                if !keep && let Node::Complex(children) = &mut self.nodes[this] {
                    children.remove(f);
                }
            }
            if let Node::Complex(children) = &mut self.nodes[this] {
                children.retain(|f, _| that_children.contains_key(f));
            }
        }
        self.children(this).is_some_and(|c| !c.is_empty())
    }

    // ===== Subtraction =====

    /// Remove from `self` whatever `other` asserts
    pub fn subtract(&mut self, other: &FeatureStruct) {
        self.subtract_with_bindings(other, &VariableBindings::new());
    }

    pub fn subtract_with_bindings(&mut self, other: &FeatureStruct, bindings: &VariableBindings) {
        self.check_frozen();
        let mut visited = FxHashSet::default();
        self.subtract_impl(ROOT, other, ROOT, bindings, &mut visited);
        self.compact();
    }

    fn subtract_impl(
        &mut self,
        this: NodeId,
        other: &FeatureStruct,
        that: NodeId,
        bindings: &VariableBindings,
        visited: &mut FxHashSet<(NodeId, NodeId)>,
    ) -> bool {
        if let Some(that_children) = other.children(that)
            && visited.insert((this, that))
        {
            for (f, &oc) in that_children {
                let Some(child) = self.children(this).and_then(|c| c.get(f).copied()) else {
                    continue;
                };
                let keep = if self.children(child).is_some() {
                    other.children(oc).is_none() || self.subtract_impl(child, other, oc, bindings, visited)
                } else {
                    match (&mut self.nodes[child], &other.nodes[oc]) {
                        (Node::Symbolic(value), Node::Symbolic(ov)) => value.subtract(ov, bindings),
                        _ => true,
                    }
                };
                if !keep && let Node::Complex(children) = &mut self.nodes[this] {
                    children.remove(f);
                }
            }
        }
        self.children(this).is_some_and(|c| !c.is_empty())
    }

    // ===== Negation =====

    /// Feature-wise complement: leaves are negated and complex values are
    /// complemented recursively, except `internal` features which are
    /// copied unchanged
    ///
    /// The result fails to unify with `self` only if `self` asserts some
    /// leaf; `[cx:ANY]` unifies with its own complement.
    pub fn anti_feature_struct(&self, internal: &InternalFeatures) -> FeatureStruct {
        // the high bit marks nodes copied verbatim, so a node reached both
        // ways gets one negated and one verbatim copy
        const VERBATIM: NodeId = 1 << (usize::BITS - 1);
        let nodes = extract(ROOT, |key| {
            let copy = key & VERBATIM != 0;
            match &self.nodes[key & !VERBATIM] {
                Node::Symbolic(value) if !copy => Node::Symbolic(value.negation()),
                Node::Complex(children) => Node::Complex(
                    children
                        .iter()
                        .map(|(f, &c)| {
                            let verbatim = copy || internal.contains(*f);
                            (*f, if verbatim { c | VERBATIM } else { c })
                        })
                        .collect(),
                ),
                leaf => leaf.clone(),
            }
        });
        FeatureStruct::from_nodes(nodes)
    }

    // ===== Variables =====

    /// Substitute every bound variable with its value
    pub fn replace_variables(&mut self, bindings: &VariableBindings) {
        self.check_frozen();
        for node in &mut self.nodes {
            if let Node::Symbolic(value) = node {
                value.resolve(bindings);
            }
        }
    }

    /// Drop every leaf that is still an unresolved variable
    pub fn remove_variables(&mut self) {
        self.check_frozen();
        for i in 0..self.nodes.len() {
            let vars: Vec<FeatureId> = match &self.nodes[i] {
                Node::Complex(children) => children
                    .iter()
                    .filter(|(_, c)| matches!(&self.nodes[**c], Node::Symbolic(v) if v.is_variable()))
                    .map(|(f, _)| *f)
                    .collect(),
                Node::Symbolic(_) => continue,
            };
            if let Node::Complex(children) = &mut self.nodes[i] {
                for f in vars {
                    children.remove(&f);
                }
            }
        }
        self.compact();
    }
}
