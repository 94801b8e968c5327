//! Feature structures
//!
//! A [`FeatureStruct`] is a rooted graph stored in an arena: every node has
//! an integer identity, complex nodes map features to child nodes, and
//! symbolic leaves hold a [`SymbolicValue`]. Two paths that lead to the same
//! node are re-entrant; cycles are allowed. Cloning copies the arena, so
//! sharing among reachable nodes is preserved and shared nodes are never
//! duplicated.
//!
//! Structures start mutable and may be frozen once. Frozen structures cache
//! a structural hash that respects re-entrancy and panic on mutation.

use rustc_hash::{FxHashMap, FxHashSet, FxHasher};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::error::FeatureError;
use crate::feature_system::{Defaults, FeatureId, FeatureSystem};
use crate::symbolic::SymbolicValue;

/// Index of a node within one structure's arena
pub type NodeId = usize;

pub(crate) const ROOT: NodeId = 0;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Complex(BTreeMap<FeatureId, NodeId>),
    Symbolic(SymbolicValue),
}

impl Node {
    pub(crate) fn empty() -> Self {
        Node::Complex(BTreeMap::new())
    }
}

/// Copy the subgraph reachable from `root` into a fresh arena
///
/// `fetch` returns each node with child ids expressed in the source id
/// space; the result is numbered in breadth-first discovery order with
/// `root` at 0.
pub(crate) fn extract(root: NodeId, mut fetch: impl FnMut(NodeId) -> Node) -> Vec<Node> {
    let mut ids: FxHashMap<NodeId, NodeId> = FxHashMap::default();
    ids.insert(root, 0);
    let mut order = vec![root];
    let mut out = Vec::new();
    let mut i = 0;
    while i < order.len() {
        let node = match fetch(order[i]) {
            Node::Complex(children) => Node::Complex(
                children
                    .into_iter()
                    .map(|(f, c)| {
                        let next = ids.len();
                        let id = *ids.entry(c).or_insert_with(|| {
                            order.push(c);
                            next
                        });
                        (f, id)
                    })
                    .collect(),
            ),
            leaf => leaf,
        };
        out.push(node);
        i += 1;
    }
    out
}

#[derive(Debug, Clone)]
pub struct FeatureStruct {
    pub(crate) nodes: Vec<Node>,
    frozen: bool,
    hash: u64,
}

impl Default for FeatureStruct {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureStruct {
    /// Create an empty, mutable structure (printed as `ANY`)
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::empty()],
            frozen: false,
            hash: 0,
        }
    }

    pub(crate) fn from_nodes(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            frozen: false,
            hash: 0,
        }
    }

    pub fn builder(system: &FeatureSystem) -> FeatureStructBuilder<'_> {
        FeatureStructBuilder::new(system)
    }

    // ===== Freezing =====

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Make the structure immutable and cache its hash
    pub fn freeze(&mut self) {
        if !self.frozen {
            self.compact();
            self.hash = self.compute_hash();
            self.frozen = true;
        }
    }

    pub fn into_frozen(mut self) -> Self {
        self.freeze();
        self
    }

    /// Mutable copy with the same sharing
    pub fn deep_clone(&self) -> Self {
        Self::from_nodes(self.nodes.clone())
    }

    pub(crate) fn check_frozen(&self) {
        assert!(!self.frozen, "cannot modify a frozen feature structure");
    }

    // ===== Inspection =====

    pub(crate) fn children(&self, id: NodeId) -> Option<&BTreeMap<FeatureId, NodeId>> {
        match &self.nodes[id] {
            Node::Complex(children) => Some(children),
            Node::Symbolic(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of features at the root
    pub fn len(&self) -> usize {
        self.children(ROOT).map_or(0, |c| c.len())
    }

    pub fn features(&self) -> impl Iterator<Item = FeatureId> + '_ {
        self.children(ROOT).into_iter().flat_map(|c| c.keys().copied())
    }

    pub fn contains(&self, feature: FeatureId) -> bool {
        self.children(ROOT).is_some_and(|c| c.contains_key(&feature))
    }

    /// Node reached by following `path` from the root
    pub fn node_at(&self, path: &[FeatureId]) -> Option<NodeId> {
        let mut id = ROOT;
        for feature in path {
            id = *self.children(id)?.get(feature)?;
        }
        Some(id)
    }

    /// Symbolic value at the end of `path`
    pub fn symbolic_at(&self, path: &[FeatureId]) -> Option<&SymbolicValue> {
        match &self.nodes[self.node_at(path)?] {
            Node::Symbolic(value) => Some(value),
            Node::Complex(_) => None,
        }
    }

    /// Symbolic value of a root feature
    pub fn get(&self, feature: FeatureId) -> Option<&SymbolicValue> {
        self.symbolic_at(&[feature])
    }

    /// True if any reachable leaf is an unresolved variable
    pub fn has_variables(&self) -> bool {
        self.first_variable_feature().is_some()
    }

    /// Feature of the first reachable variable leaf, in feature order
    pub fn first_variable_feature(&self) -> Option<FeatureId> {
        let mut visited = FxHashSet::default();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            match &self.nodes[id] {
                Node::Symbolic(value) if value.is_variable() => return Some(value.feature()),
                Node::Symbolic(_) => {}
                Node::Complex(children) => stack.extend(children.values().rev().copied()),
            }
        }
        None
    }

    // ===== Mutation =====

    /// Set a root symbolic feature, replacing any previous value
    pub fn set_value(&mut self, value: SymbolicValue) {
        self.check_frozen();
        let feature = value.feature();
        let leaf = self.push(Node::Symbolic(value));
        if let Node::Complex(children) = &mut self.nodes[ROOT] {
            children.insert(feature, leaf);
        }
        self.compact();
    }

    /// Remove a root feature; returns true if it was present
    pub fn remove(&mut self, feature: FeatureId) -> bool {
        self.check_frozen();
        let removed = match &mut self.nodes[ROOT] {
            Node::Complex(children) => children.remove(&feature).is_some(),
            Node::Symbolic(_) => false,
        };
        if removed {
            self.compact();
        }
        removed
    }

    /// Fill in default values for absent root symbolic features
    pub fn add_defaults(&mut self, defaults: &Defaults) {
        self.check_frozen();
        let missing: Vec<SymbolicValue> = defaults
            .iter()
            .filter(|(f, _)| !self.contains(*f))
            .map(|(_, v)| v.clone())
            .collect();
        for value in missing {
            self.set_value(value);
        }
    }

    pub(crate) fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    /// Drop unreachable nodes and renumber the arena
    pub(crate) fn compact(&mut self) {
        let nodes = std::mem::take(&mut self.nodes);
        self.nodes = extract(ROOT, |id| nodes[id].clone());
    }

    // ===== Equality and hashing =====

    /// Graph isomorphism from the roots, including the sharing pattern
    pub fn value_equals(&self, other: &FeatureStruct) -> bool {
        let mut forward: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut backward: FxHashMap<NodeId, NodeId> = FxHashMap::default();
        let mut stack = vec![(ROOT, ROOT)];
        while let Some((a, b)) = stack.pop() {
            match (forward.get(&a), backward.get(&b)) {
                (Some(&mapped), _) => {
                    if mapped != b {
                        return false;
                    }
                    continue;
                }
                (None, Some(_)) => return false,
                (None, None) => {
                    forward.insert(a, b);
                    backward.insert(b, a);
                }
            }
            match (&self.nodes[a], &other.nodes[b]) {
                (Node::Complex(ca), Node::Complex(cb)) => {
                    if ca.len() != cb.len() {
                        return false;
                    }
                    for ((fa, xa), (fb, xb)) in ca.iter().zip(cb.iter()) {
                        if fa != fb {
                            return false;
                        }
                        stack.push((*xa, *xb));
                    }
                }
                (Node::Symbolic(va), Node::Symbolic(vb)) => {
                    if va != vb {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        true
    }

    fn compute_hash(&self) -> u64 {
        let mut hasher = FxHasher::default();
        let mut seen: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut stack: Vec<(Option<FeatureId>, NodeId)> = vec![(None, ROOT)];
        while let Some((feature, id)) = stack.pop() {
            feature.hash(&mut hasher);
            if let Some(n) = seen.get(&id) {
                1u8.hash(&mut hasher);
                n.hash(&mut hasher);
                continue;
            }
            seen.insert(id, seen.len());
            match &self.nodes[id] {
                Node::Complex(children) => {
                    2u8.hash(&mut hasher);
                    children.len().hash(&mut hasher);
                    for (f, c) in children.iter().rev() {
                        stack.push((Some(*f), *c));
                    }
                }
                Node::Symbolic(value) => {
                    3u8.hash(&mut hasher);
                    value.hash(&mut hasher);
                }
            }
        }
        hasher.finish()
    }

    /// Re-entrancy-respecting structural hash (cached once frozen)
    pub fn structural_hash(&self) -> u64 {
        if self.frozen { self.hash } else { self.compute_hash() }
    }

    // ===== Display =====

    /// Render in `[feat:value, ...]` notation using names from `system`
    pub fn display<'a>(&'a self, system: &'a FeatureSystem) -> FeatureStructDisplay<'a> {
        FeatureStructDisplay { fs: self, system }
    }
}

impl PartialEq for FeatureStruct {
    fn eq(&self, other: &Self) -> bool {
        if self.frozen && other.frozen && self.hash != other.hash {
            return false;
        }
        self.value_equals(other)
    }
}

impl Eq for FeatureStruct {}

impl Hash for FeatureStruct {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.structural_hash());
    }
}

pub struct FeatureStructDisplay<'a> {
    fs: &'a FeatureStruct,
    system: &'a FeatureSystem,
}

struct DisplayState {
    shared: FxHashSet<NodeId>,
    printed: FxHashSet<NodeId>,
    ids: FxHashMap<NodeId, usize>,
}

impl FeatureStructDisplay<'_> {
    fn shared_nodes(&self) -> FxHashSet<NodeId> {
        let mut counts: FxHashMap<NodeId, usize> = FxHashMap::default();
        let mut stack = vec![ROOT];
        while let Some(id) = stack.pop() {
            if let Node::Complex(children) = &self.fs.nodes[id] {
                for &c in children.values() {
                    let count = counts.entry(c).or_insert(0);
                    *count += 1;
                    if *count == 1 {
                        stack.push(c);
                    }
                }
            }
        }
        counts.into_iter().filter(|(_, n)| *n > 1).map(|(id, _)| id).collect()
    }

    fn write_leaf(&self, f: &mut fmt::Formatter<'_>, value: &SymbolicValue) -> fmt::Result {
        if let Some(var) = value.var() {
            let neg = if var.agree { "" } else { "!" };
            return write!(f, "{}${}", neg, var.name);
        }
        let mut names: Vec<&str> = value
            .indices()
            .filter_map(|i| self.system.symbol_name(value.feature(), i))
            .collect();
        names.sort_unstable();
        if names.len() == 1 {
            write!(f, "{}", names[0])
        } else {
            write!(f, "{{{}}}", names.join(", "))
        }
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, state: &mut DisplayState) -> fmt::Result {
        if state.printed.contains(&id) {
            return write!(f, "<{}>", state.ids.get(&id).copied().unwrap_or(0));
        }
        state.printed.insert(id);
        if state.shared.contains(&id) {
            let n = state.ids.len() + 1;
            state.ids.insert(id, n);
            write!(f, "{}=", n)?;
        }
        match &self.fs.nodes[id] {
            Node::Symbolic(value) => self.write_leaf(f, value),
            Node::Complex(children) if children.is_empty() => write!(f, "ANY"),
            Node::Complex(children) => {
                let mut entries: Vec<(&str, NodeId)> = children
                    .iter()
                    .map(|(feat, c)| (self.system.feature(*feat).name.as_str(), *c))
                    .collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                write!(f, "[")?;
                for (i, (name, child)) in entries.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}:", name)?;
                    self.write_node(f, child, state)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl fmt::Display for FeatureStructDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut state = DisplayState {
            shared: self.shared_nodes(),
            printed: FxHashSet::default(),
            ids: FxHashMap::default(),
        };
        self.write_node(f, ROOT, &mut state)
    }
}

/// Fluent construction of feature structures against a catalog
///
/// Errors (unknown names, kind mismatches, dangling re-entrancy ids) are
/// deferred and reported by [`build`](FeatureStructBuilder::build).
pub struct FeatureStructBuilder<'s> {
    system: &'s FeatureSystem,
    nodes: Vec<Node>,
    current: NodeId,
    tags: FxHashMap<u32, NodeId>,
    refs: Vec<(NodeId, FeatureId, u32)>,
    error: Option<FeatureError>,
}

impl<'s> FeatureStructBuilder<'s> {
    fn new(system: &'s FeatureSystem) -> Self {
        Self {
            system,
            nodes: vec![Node::empty()],
            current: ROOT,
            tags: FxHashMap::default(),
            refs: Vec::new(),
            error: None,
        }
    }

    fn fail(mut self, error: FeatureError) -> Self {
        if self.error.is_none() {
            self.error = Some(error);
        }
        self
    }

    fn attach(&mut self, feature: FeatureId, node: Node) -> NodeId {
        self.nodes.push(node);
        let id = self.nodes.len() - 1;
        if let Node::Complex(children) = &mut self.nodes[self.current] {
            children.insert(feature, id);
        }
        id
    }

    fn leaf(mut self, tag: Option<u32>, value: Result<SymbolicValue, FeatureError>) -> Self {
        match value {
            Ok(value) => {
                let id = self.attach(value.feature(), Node::Symbolic(value));
                if let Some(tag) = tag {
                    self.tags.insert(tag, id);
                }
                self
            }
            Err(e) => self.fail(e),
        }
    }

    /// Add a single symbol; its feature is implied by the symbol name
    pub fn symbol(self, name: &str) -> Self {
        let value = self.system.value_of(&[name]);
        self.leaf(None, value)
    }

    /// Add a disjunction of symbols of one feature
    pub fn symbols(self, names: &[&str]) -> Self {
        let value = self.system.value_of(names);
        self.leaf(None, value)
    }

    /// Add a symbol disjunction that later paths may refer to by `tag`
    pub fn tagged_symbols(self, tag: u32, names: &[&str]) -> Self {
        let value = self.system.value_of(names);
        self.leaf(Some(tag), value)
    }

    /// Add every symbol of `feature` except those named
    pub fn not_symbols(self, names: &[&str]) -> Self {
        let value = self.system.value_of(names).map(|v| v.negation());
        self.leaf(None, value)
    }

    /// Add an unresolved variable on a symbolic feature
    pub fn variable(self, feature: &str, name: &str, agree: bool) -> Self {
        let value = self.system.variable(feature, name, agree);
        self.leaf(None, value)
    }

    /// Add a complex feature whose contents are built by `f`
    pub fn complex(self, feature: &str, f: impl FnOnce(Self) -> Self) -> Self {
        self.complex_impl(feature, None, f)
    }

    /// Add a complex feature that later paths may refer to by `tag`
    pub fn tagged_complex(self, feature: &str, tag: u32, f: impl FnOnce(Self) -> Self) -> Self {
        self.complex_impl(feature, Some(tag), f)
    }

    fn complex_impl(mut self, feature: &str, tag: Option<u32>, f: impl FnOnce(Self) -> Self) -> Self {
        let system = self.system;
        let feat = match system.feature_by_name(feature) {
            Ok(feat) if !feat.is_symbolic() => feat.id,
            Ok(_) => return self.fail(FeatureError::NotComplex(feature.to_string())),
            Err(e) => return self.fail(e),
        };
        let child = self.attach(feat, Node::empty());
        if let Some(tag) = tag {
            self.tags.insert(tag, child);
        }
        let parent = self.current;
        self.current = child;
        let mut builder = f(self);
        builder.current = parent;
        builder
    }

    /// Make `feature` share the node tagged `tag`
    pub fn reference(mut self, feature: &str, tag: u32) -> Self {
        let system = self.system;
        match system.feature_by_name(feature) {
            Ok(feat) => {
                let id = feat.id;
                self.refs.push((self.current, id, tag));
                self
            }
            Err(e) => self.fail(e),
        }
    }

    /// Finish as a mutable structure
    pub fn build(mut self) -> Result<FeatureStruct, FeatureError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        for (parent, feature, tag) in std::mem::take(&mut self.refs) {
            let target = *self
                .tags
                .get(&tag)
                .ok_or(FeatureError::UndefinedReentrancy(tag))?;
            if let Node::Complex(children) = &mut self.nodes[parent] {
                children.insert(feature, target);
            }
        }
        let mut fs = FeatureStruct::from_nodes(self.nodes);
        fs.compact();
        Ok(fs)
    }

    /// Finish as a frozen structure
    pub fn frozen(self) -> Result<FeatureStruct, FeatureError> {
        self.build().map(FeatureStruct::into_frozen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> FeatureSystem {
        let mut sys = FeatureSystem::new();
        sys.add_complex("cx1").unwrap();
        sys.add_symbolic("a", &["a1", "a2", "a3"]).unwrap();
        sys.add_complex("cx2").unwrap();
        sys.add_symbolic("b", &["b1", "b2"]).unwrap();
        sys.freeze();
        sys
    }

    fn id(sys: &FeatureSystem, name: &str) -> FeatureId {
        sys.feature_by_name(name).unwrap().id
    }

    // ===== Builder =====

    #[test]
    fn test_builder_simple() {
        let sys = system();
        let fs = FeatureStruct::builder(&sys)
            .symbols(&["a1", "a2"])
            .symbol("b1")
            .build()
            .unwrap();
        assert_eq!(fs.len(), 2);
        assert_eq!(fs.get(id(&sys, "a")).unwrap().bits(), 0b011);
        assert_eq!(fs.display(&sys).to_string(), "[a:{a1, a2}, b:b1]");
    }

    #[test]
    fn test_builder_reentrancy() {
        let sys = system();
        let fs = FeatureStruct::builder(&sys)
            .tagged_complex("cx1", 1, |b| b.symbol("a1"))
            .reference("cx2", 1)
            .build()
            .unwrap();
        let cx1 = id(&sys, "cx1");
        let cx2 = id(&sys, "cx2");
        assert_eq!(fs.node_at(&[cx1]), fs.node_at(&[cx2]));
        assert_eq!(fs.display(&sys).to_string(), "[cx1:1=[a:a1], cx2:<1>]");
    }

    #[test]
    fn test_builder_leaf_reentrancy() {
        let sys = system();
        let fs = FeatureStruct::builder(&sys)
            .complex("cx1", |b| b.tagged_symbols(1, &["a1"]))
            .complex("cx2", |b| b.reference("a", 1))
            .build()
            .unwrap();
        let a = id(&sys, "a");
        assert_eq!(
            fs.node_at(&[id(&sys, "cx1"), a]),
            fs.node_at(&[id(&sys, "cx2"), a])
        );
    }

    #[test]
    fn test_builder_errors() {
        let sys = system();
        assert!(matches!(
            FeatureStruct::builder(&sys).symbol("zz").build(),
            Err(FeatureError::UnknownSymbol(_))
        ));
        assert!(matches!(
            FeatureStruct::builder(&sys).complex("a", |b| b).build(),
            Err(FeatureError::NotComplex(_))
        ));
        assert!(matches!(
            FeatureStruct::builder(&sys).reference("cx1", 7).build(),
            Err(FeatureError::UndefinedReentrancy(7))
        ));
    }

    #[test]
    fn test_empty_is_any() {
        let sys = system();
        assert_eq!(FeatureStruct::new().display(&sys).to_string(), "ANY");
        let fs = FeatureStruct::builder(&sys).complex("cx1", |b| b).build().unwrap();
        assert_eq!(fs.display(&sys).to_string(), "[cx1:ANY]");
    }

    // ===== Equality =====

    #[test]
    fn test_equality_respects_sharing() {
        let sys = system();
        let shared = FeatureStruct::builder(&sys)
            .tagged_complex("cx1", 1, |b| b.symbol("a1"))
            .reference("cx2", 1)
            .frozen()
            .unwrap();
        let copies = FeatureStruct::builder(&sys)
            .complex("cx1", |b| b.symbol("a1"))
            .complex("cx2", |b| b.symbol("a1"))
            .frozen()
            .unwrap();
        assert_ne!(shared, copies);
        assert_eq!(shared, shared.clone());
        assert_eq!(shared, shared.deep_clone());
        assert_ne!(shared.structural_hash(), copies.structural_hash());
    }

    #[test]
    fn test_clone_preserves_cycles() {
        let sys = system();
        let fs = FeatureStruct::builder(&sys)
            .tagged_complex("cx1", 1, |b| b.symbol("a2").reference("cx2", 1))
            .build()
            .unwrap();
        let copy = fs.deep_clone();
        let cx1 = id(&sys, "cx1");
        let cx2 = id(&sys, "cx2");
        assert_eq!(copy.node_at(&[cx1]), copy.node_at(&[cx1, cx2, cx2]));
        assert_eq!(copy.display(&sys).to_string(), "[cx1:1=[a:a2, cx2:<1>]]");
        assert_eq!(fs, copy);
    }

    #[test]
    fn test_hash_matches_equality() {
        let sys = system();
        let a = FeatureStruct::builder(&sys).symbol("a1").symbol("b2").frozen().unwrap();
        let b = FeatureStruct::builder(&sys).symbol("b2").symbol("a1").frozen().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.structural_hash(), b.structural_hash());
    }

    // ===== Mutation =====

    #[test]
    fn test_set_and_remove() {
        let sys = system();
        let mut fs = FeatureStruct::new();
        fs.set_value(sys.value_of(&["a3"]).unwrap());
        assert_eq!(fs.display(&sys).to_string(), "[a:a3]");
        assert!(fs.remove(id(&sys, "a")));
        assert!(!fs.remove(id(&sys, "a")));
        assert!(fs.is_empty());
        assert_eq!(fs.nodes.len(), 1);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn test_frozen_rejects_mutation() {
        let sys = system();
        let mut fs = FeatureStruct::new().into_frozen();
        fs.set_value(sys.value_of(&["a1"]).unwrap());
    }

    #[test]
    fn test_variables() {
        let sys = system();
        let fs = FeatureStruct::builder(&sys)
            .complex("cx1", |b| b.variable("a", "x", false))
            .build()
            .unwrap();
        assert!(fs.has_variables());
        assert_eq!(fs.first_variable_feature(), Some(id(&sys, "a")));
        assert_eq!(fs.display(&sys).to_string(), "[cx1:[a:!$x]]");
    }

    #[test]
    fn test_add_defaults() {
        let mut sys = FeatureSystem::new();
        let a = sys.add_symbolic_with_default("a", &["a+", "a-"], "a-").unwrap();
        let b = sys.add_symbolic_with_default("b", &["b+", "b-"], "b-").unwrap();
        sys.freeze();
        let mut fs = FeatureStruct::builder(&sys).symbol("a+").build().unwrap();
        fs.add_defaults(&sys.defaults());
        assert_eq!(fs.get(a), Some(&sys.value_of(&["a+"]).unwrap()));
        assert_eq!(fs.get(b), Some(&sys.value_of(&["b-"]).unwrap()));
    }
}
