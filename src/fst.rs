//! Finite-state automaton over feature-structure conditions
//!
//! States carry prioritized arcs. An arc either consumes one annotation
//! whose feature structure satisfies a condition, or is an epsilon arc.
//! Group captures are tags on arcs: an open tag starts a group and every
//! annotation consumed while it is open extends its span. Accepting states
//! list the accept ids that can finish there, each ranked among the
//! state's arcs so that stopping and consuming more are explored in arc
//! priority order.
//!
//! The compiler builds an epsilon-laden automaton; [`Fst::epsilon_removal`]
//! folds epsilon paths (and their tags) into the following consuming arcs,
//! and [`Fst::minimize`] merges states with identical behavior.
//! [`Fst::transduce`] runs an explicit-stack depth-first search from one
//! start position, trying arcs in priority order, so results come out the
//! way a backtracking matcher would find them.

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::trace;

use crate::annotation::{AnnotatedData, Range, ScanOrder};
use crate::bindings::VariableBindings;
use crate::feature_struct::FeatureStruct;
use crate::feature_system::Defaults;

pub type StateId = usize;

/// Order in which competing arcs are explored (`High` first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum ArcPriority {
    High,
    #[default]
    Medium,
    Low,
}

/// Capture register command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Open(usize),
    Close(usize),
}

/// How arc conditions are tested against annotation feature structures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MatchingMethod {
    /// The condition must subsume the data
    #[default]
    Subsumption,
    /// The condition must unify with the data
    Unification,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Arc {
    /// Index of the condition, `None` for epsilon
    pub input: Option<usize>,
    pub target: StateId,
    pub priority: ArcPriority,
    /// Executed before the arc's annotation is consumed
    pub tags: Vec<Tag>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Final {
    pub accept: usize,
    pub tags: Vec<Tag>,
    /// Number of the state's arcs preferred over stopping here
    pub before: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct State {
    pub arcs: Vec<Arc>,
    pub finals: Vec<Final>,
}

impl State {
    pub fn is_accepting(&self) -> bool {
        !self.finals.is_empty()
    }
}

/// Settings for one traversal
#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalSettings<'a> {
    pub method: MatchingMethod,
    /// Consulted for features absent from annotations
    pub defaults: Option<&'a Defaults>,
    /// Only accept paths that consume through the last scan position
    pub anchored_to_end: bool,
    /// Stop at the best result instead of collecting every one
    pub first_only: bool,
}

/// One accepting path found by [`Fst::transduce`]
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalResult {
    pub accept: usize,
    /// Span of each capture group, `None` if nothing was captured
    pub spans: Vec<Option<Range>>,
    pub bindings: VariableBindings,
    /// Number of annotations consumed
    pub depth: usize,
    /// Scan position where the traversal started
    pub start: usize,
    /// Scan position following the last consumed annotation
    pub next: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Instance {
    state: StateId,
    position: usize,
    spans: Vec<Option<Range>>,
    open: Vec<bool>,
    bindings: VariableBindings,
    depth: usize,
}

impl Instance {
    fn apply(&mut self, tags: &[Tag]) {
        for tag in tags {
            match *tag {
                Tag::Open(g) => {
                    self.open[g] = true;
                    self.spans[g] = None;
                }
                Tag::Close(g) => self.open[g] = false,
            }
        }
    }

    fn consume(&mut self, range: Range) {
        for (span, _) in self.spans.iter_mut().zip(&self.open).filter(|(_, open)| **open) {
            *span = Some(span.map_or(range, |s| s.cover(&range)));
        }
        self.depth += 1;
    }
}

#[derive(Debug, Clone)]
pub struct Fst {
    states: Vec<State>,
    conditions: Vec<FeatureStruct>,
    condition_ids: FxHashMap<FeatureStruct, usize>,
    start: StateId,
    groups: usize,
}

impl Default for Fst {
    fn default() -> Self {
        Self::new()
    }
}

impl Fst {
    /// Automaton with a single start state and one capture group
    pub fn new() -> Self {
        Self {
            states: vec![State::default()],
            conditions: Vec::new(),
            condition_ids: FxHashMap::default(),
            start: 0,
            groups: 1,
        }
    }

    // ===== Construction =====

    pub fn add_state(&mut self) -> StateId {
        self.states.push(State::default());
        self.states.len() - 1
    }

    /// Reserve capture group registers
    pub fn set_groups(&mut self, groups: usize) {
        self.groups = groups.max(1);
    }

    pub fn add_epsilon(&mut self, from: StateId, to: StateId, priority: ArcPriority) {
        self.states[from].arcs.push(Arc {
            input: None,
            target: to,
            priority,
            tags: Vec::new(),
        });
    }

    pub fn add_tag(&mut self, from: StateId, to: StateId, tag: Tag) {
        self.states[from].arcs.push(Arc {
            input: None,
            target: to,
            priority: ArcPriority::Medium,
            tags: vec![tag],
        });
    }

    /// Add a consuming arc; equal conditions share one entry
    pub fn add_condition(&mut self, from: StateId, to: StateId, condition: FeatureStruct) {
        let condition = condition.into_frozen();
        let next = self.conditions.len();
        let index = *self.condition_ids.entry(condition.clone()).or_insert(next);
        if index == next {
            self.conditions.push(condition);
        }
        self.states[from].arcs.push(Arc {
            input: Some(index),
            target: to,
            priority: ArcPriority::Medium,
            tags: Vec::new(),
        });
    }

    pub fn add_final(&mut self, state: StateId, accept: usize) {
        self.states[state].finals.push(Final {
            accept,
            tags: Vec::new(),
            before: 0,
        });
    }

    // ===== Inspection =====

    pub fn start(&self) -> StateId {
        self.start
    }

    pub fn groups(&self) -> usize {
        self.groups
    }

    pub fn state(&self, id: StateId) -> &State {
        &self.states[id]
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn arc_count(&self) -> usize {
        self.states.iter().map(|s| s.arcs.len()).sum()
    }

    pub fn condition(&self, index: usize) -> &FeatureStruct {
        &self.conditions[index]
    }

    pub fn has_epsilons(&self) -> bool {
        self.states.iter().flat_map(|s| &s.arcs).any(|a| a.input.is_none())
    }

    /// Arc indices of `state` in exploration order
    fn ordered_arcs(&self, state: StateId) -> Vec<usize> {
        let arcs = &self.states[state].arcs;
        let mut order: Vec<usize> = (0..arcs.len()).collect();
        order.sort_by_key(|&i| arcs[i].priority);
        order
    }

    // ===== Transformations =====

    /// Equivalent automaton without epsilon arcs
    ///
    /// Each state's epsilon closure is explored in priority order; the
    /// first path to reach a state wins, and its tags are prepended to the
    /// consuming arcs and finals found there. A final found after `k`
    /// consuming arcs ranks behind them.
    pub fn epsilon_removal(&self) -> Fst {
        let mut states = Vec::with_capacity(self.states.len());
        for id in 0..self.states.len() {
            let mut arcs = Vec::new();
            let mut finals: Vec<Final> = self.states[id].finals.clone();
            let mut visited = FxHashSet::default();
            visited.insert(id);
            let mut stack: Vec<(StateId, Vec<Tag>, Vec<usize>, usize)> =
                vec![(id, Vec::new(), self.ordered_arcs(id), 0)];

            while let Some(top) = stack.last_mut() {
                let Some(&index) = top.2.get(top.3) else {
                    stack.pop();
                    continue;
                };
                top.3 += 1;
                let arc = &self.states[top.0].arcs[index];
                let mut tags = top.1.clone();
                tags.extend_from_slice(&arc.tags);
                match arc.input {
                    Some(_) => arcs.push(Arc {
                        tags,
                        ..arc.clone()
                    }),
                    None if visited.insert(arc.target) => {
                        let before = arcs.len();
                        finals.extend(self.states[arc.target].finals.iter().map(|f| Final {
                            accept: f.accept,
                            tags: tags.iter().chain(&f.tags).copied().collect(),
                            before,
                        }));
                        let order = self.ordered_arcs(arc.target);
                        stack.push((arc.target, tags, order, 0));
                    }
                    None => {}
                }
            }

            states.push(State { arcs, finals });
        }

        let fst = Fst {
            states,
            conditions: self.conditions.clone(),
            condition_ids: self.condition_ids.clone(),
            start: self.start,
            groups: self.groups,
        };
        fst.trim()
    }

    /// Drop states unreachable from the start and renumber
    fn trim(&self) -> Fst {
        let mut ids: FxHashMap<StateId, StateId> = FxHashMap::default();
        let mut order = vec![self.start];
        ids.insert(self.start, 0);
        let mut i = 0;
        while i < order.len() {
            for arc in &self.states[order[i]].arcs {
                let next = ids.len();
                ids.entry(arc.target).or_insert_with(|| {
                    order.push(arc.target);
                    next
                });
            }
            i += 1;
        }

        let states = order
            .iter()
            .map(|&old| {
                let state = &self.states[old];
                State {
                    arcs: state
                        .arcs
                        .iter()
                        .map(|a| Arc {
                            target: ids[&a.target],
                            ..a.clone()
                        })
                        .collect(),
                    finals: state.finals.clone(),
                }
            })
            .collect();
        Fst {
            states,
            conditions: self.conditions.clone(),
            condition_ids: self.condition_ids.clone(),
            start: 0,
            groups: self.groups,
        }
    }

    /// Merge states whose finals and arcs (up to the classes of their
    /// targets) coincide, by partition refinement
    pub fn minimize(&self) -> Fst {
        type Signature = (usize, Vec<Final>, Vec<(Option<usize>, Vec<Tag>, usize)>);

        let mut class: Vec<usize> = vec![0; self.states.len()];
        let mut count = 1;
        loop {
            let mut ids: FxHashMap<Signature, usize> = FxHashMap::default();
            let next: Vec<usize> = self
                .states
                .iter()
                .enumerate()
                .map(|(id, state)| {
                    let signature = (
                        class[id],
                        state.finals.clone(),
                        state
                            .arcs
                            .iter()
                            .map(|a| (a.input, a.tags.clone(), class[a.target]))
                            .collect(),
                    );
                    let n = ids.len();
                    *ids.entry(signature).or_insert(n)
                })
                .collect();
            let stable = ids.len() == count;
            count = ids.len();
            class = next;
            if stable {
                break;
            }
        }

        let mut states: Vec<Option<State>> = vec![None; count];
        for (id, state) in self.states.iter().enumerate() {
            if states[class[id]].is_none() {
                states[class[id]] = Some(State {
                    arcs: state
                        .arcs
                        .iter()
                        .map(|a| Arc {
                            target: class[a.target],
                            ..a.clone()
                        })
                        .collect(),
                    finals: state.finals.clone(),
                });
            }
        }
        Fst {
            states: states.into_iter().flatten().collect(),
            conditions: self.conditions.clone(),
            condition_ids: self.condition_ids.clone(),
            start: class[self.start],
            groups: self.groups,
        }
        .trim()
    }

    // ===== Traversal =====

    fn test(
        &self,
        condition: usize,
        data: &FeatureStruct,
        settings: &TraversalSettings<'_>,
        bindings: &mut VariableBindings,
    ) -> bool {
        let condition = &self.conditions[condition];
        match settings.method {
            MatchingMethod::Subsumption => condition.subsumes_with(data, settings.defaults, bindings),
            MatchingMethod::Unification => match settings.defaults {
                Some(defaults) => {
                    let mut data = data.deep_clone();
                    data.add_defaults(defaults);
                    data.is_unifiable_with_bindings(condition, bindings)
                }
                None => data.is_unifiable_with_bindings(condition, bindings),
            },
        }
    }

    /// Every accepting path starting at scan position `start`, best first
    ///
    /// Results are ordered by accept id, then in the order a backtracking
    /// search following arc priorities finds them. Skipping an optional
    /// annotation ranks after the state's arcs. `acceptable` vetoes
    /// individual results. With `first_only` at most the best result is
    /// returned, and the search stops once nothing better can follow.
    ///
    /// Search instances identical to one already visited are skipped, so
    /// ambiguous paths that converge are explored once.
    pub fn transduce(
        &self,
        data: &AnnotatedData,
        order: &ScanOrder,
        start: usize,
        bindings: &VariableBindings,
        settings: &TraversalSettings<'_>,
        mut acceptable: impl FnMut(&TraversalResult) -> bool,
    ) -> Vec<TraversalResult> {
        let lowest = self.states.iter().flat_map(|s| &s.finals).map(|f| f.accept).min();
        let mut seen: FxHashSet<Instance> = FxHashSet::default();
        let mut results: Vec<TraversalResult> = Vec::new();
        let mut stack = vec![Frame::Visit(Instance {
            state: self.start,
            position: start,
            spans: vec![None; self.groups],
            open: vec![false; self.groups],
            bindings: bindings.clone(),
            depth: 0,
        })];

        while let Some(frame) = stack.pop() {
            let inst = match frame {
                Frame::Accept(result) => {
                    if !settings.first_only {
                        if acceptable(&result) {
                            results.push(result);
                        }
                        continue;
                    }
                    let beaten = results.first().is_some_and(|best| best.accept <= result.accept);
                    if beaten || !acceptable(&result) {
                        continue;
                    }
                    let done = Some(result.accept) == lowest;
                    results.clear();
                    results.push(result);
                    if done {
                        break;
                    }
                    continue;
                }
                Frame::Visit(inst) => inst,
            };
            if !seen.insert(inst.clone()) {
                continue;
            }
            let state = &self.states[inst.state];
            let position = order.position(inst.position);

            // branches per arc, then optional skips in the last slot
            let mut slots: Vec<Vec<Instance>> = vec![Vec::new(); state.arcs.len() + 1];
            if let Some(position) = position {
                for (arc, slot) in state.arcs.iter().zip(slots.iter_mut()) {
                    let Some(condition) = arc.input else {
                        continue;
                    };
                    for &index in &position.annotations {
                        let Some(annotation) = data.get(index) else {
                            continue;
                        };
                        let mut bindings = inst.bindings.clone();
                        if !self.test(condition, &annotation.fs, settings, &mut bindings) {
                            continue;
                        }
                        let mut next = inst.clone();
                        next.bindings = bindings;
                        next.state = arc.target;
                        next.apply(&arc.tags);
                        next.consume(annotation.range);
                        next.position = order.next_after(inst.position, annotation.range);
                        slot.push(next);
                    }
                }
                for &index in &position.annotations {
                    if let Some(annotation) = data.get(index)
                        && annotation.optional
                    {
                        let mut next = inst.clone();
                        next.position = order.next_after(inst.position, annotation.range);
                        slots[state.arcs.len()].push(next);
                    }
                }
            }

            let at_end = !settings.anchored_to_end || inst.position >= order.len();
            let last = state.arcs.len();
            let mut frames = Vec::new();
            for (k, slot) in slots.into_iter().enumerate() {
                if at_end && k < last {
                    frames.extend(accepts(state, &inst, start, move |before| before == k));
                }
                frames.extend(slot.into_iter().map(Frame::Visit));
            }
            if at_end {
                frames.extend(accepts(state, &inst, start, move |before| before >= last));
            }
            stack.extend(frames.into_iter().rev());
        }

        // stable, so search order breaks the remaining ties
        results.sort_by_key(|r| r.accept);
        trace!(start, results = results.len(), "transduce");
        results
    }
}

/// Results for the finals of `state` whose rank passes `rank`
fn accepts<'s>(
    state: &'s State,
    inst: &'s Instance,
    start: usize,
    rank: impl Fn(usize) -> bool + 's,
) -> impl Iterator<Item = Frame> + 's {
    state.finals.iter().filter(move |f| rank(f.before)).map(move |fin| {
        let mut done = inst.clone();
        done.apply(&fin.tags);
        Frame::Accept(TraversalResult {
            accept: fin.accept,
            spans: done.spans,
            bindings: done.bindings,
            depth: done.depth,
            start,
            next: done.position,
        })
    })
}

#[derive(Debug)]
enum Frame {
    Visit(Instance),
    Accept(TraversalResult),
}
