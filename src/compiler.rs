//! Pattern compilation to finite-state automata
//!
//! Each leaf pattern (one whose children are nodes rather than sub-patterns)
//! becomes a path from the shared start state, bracketed by the tags of
//! the entire-match group and ending in its own accepting state. Accept ids
//! follow declaration order, so earlier patterns win ties.
//!
//! Right-to-left patterns compile their sequences mirrored, so the
//! automaton always reads in scan order.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::annotation::Direction;
use crate::fst::{ArcPriority, Fst, StateId, Tag};
use crate::pattern::{Acceptable, INFINITE, Pattern, PatternNode};

/// Name of the group spanning the whole match
pub const ENTIRE_MATCH: &str = "*entire*";

/// What an accepting state reports
#[derive(Clone)]
pub struct AcceptInfo {
    /// Names of the patterns from the root to the accepting leaf
    pub path: Vec<String>,
    /// Postconditions inherited along the path, outermost first
    pub acceptables: Vec<Acceptable>,
}

impl std::fmt::Debug for AcceptInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptInfo")
            .field("path", &self.path)
            .field("acceptables", &self.acceptables.len())
            .finish()
    }
}

/// Epsilon automaton for a pattern, before epsilon removal
#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub fst: Fst,
    /// Capture group names by register; register 0 is [`ENTIRE_MATCH`]
    pub groups: Vec<String>,
    /// Indexed by accept id
    pub accepts: Vec<AcceptInfo>,
    pub has_variables: bool,
}

/// Compile a pattern for scanning in `direction`
pub fn compile(pattern: &Pattern, direction: Direction) -> CompiledPattern {
    let mut compiler = Compiler {
        fst: Fst::new(),
        direction,
        groups: vec![ENTIRE_MATCH.to_string()],
        group_ids: FxHashMap::default(),
        accepts: Vec::new(),
    };
    compiler.group_ids.insert(ENTIRE_MATCH.to_string(), 0);

    let start = compiler.fst.start();
    compiler.pattern(start, pattern, &[], &[]);

    let Compiler {
        mut fst,
        groups,
        accepts,
        ..
    } = compiler;
    fst.set_groups(groups.len());
    debug!(
        states = fst.state_count(),
        arcs = fst.arc_count(),
        accepts = accepts.len(),
        groups = groups.len(),
        "compiled pattern"
    );
    CompiledPattern {
        fst,
        groups,
        accepts,
        has_variables: pattern.has_variables(),
    }
}

struct Compiler {
    fst: Fst,
    direction: Direction,
    groups: Vec<String>,
    group_ids: FxHashMap<String, usize>,
    accepts: Vec<AcceptInfo>,
}

impl Compiler {
    /// Groups with the same name share one register
    fn group_id(&mut self, name: &str) -> usize {
        if let Some(&id) = self.group_ids.get(name) {
            return id;
        }
        let id = self.groups.len();
        self.groups.push(name.to_string());
        self.group_ids.insert(name.to_string(), id);
        id
    }

    fn pattern(
        &mut self,
        start: StateId,
        pattern: &Pattern,
        path: &[String],
        acceptables: &[Acceptable],
    ) {
        let mut path = path.to_vec();
        path.extend(pattern.name().map(str::to_string));
        let mut acceptables = acceptables.to_vec();
        acceptables.extend(pattern.acceptable().cloned());

        if !pattern.patterns().is_empty() {
            for sub in pattern.patterns() {
                self.pattern(start, sub, &path, &acceptables);
            }
            return;
        }

        let open = self.fst.add_state();
        self.fst.add_tag(start, open, Tag::Open(0));
        let end = self.sequence(open, pattern.nodes());
        let close = self.fst.add_state();
        self.fst.add_tag(end, close, Tag::Close(0));

        let accept = self.accepts.len();
        self.accepts.push(AcceptInfo { path, acceptables });
        self.fst.add_final(close, accept);
    }

    fn sequence(&mut self, start: StateId, nodes: &[PatternNode]) -> StateId {
        match self.direction {
            Direction::LeftToRight => nodes.iter().fold(start, |s, n| self.node(s, n)),
            Direction::RightToLeft => nodes.iter().rev().fold(start, |s, n| self.node(s, n)),
        }
    }

    fn node(&mut self, start: StateId, node: &PatternNode) -> StateId {
        match node {
            PatternNode::Constraint(fs) => {
                let end = self.fst.add_state();
                self.fst.add_condition(start, end, fs.clone());
                end
            }
            PatternNode::Group { children, .. } if children.is_empty() => start,
            PatternNode::Group { name: None, children } => self.sequence(start, children),
            PatternNode::Group {
                name: Some(name),
                children,
            } => {
                let id = self.group_id(name);
                let open = self.fst.add_state();
                self.fst.add_tag(start, open, Tag::Open(id));
                let end = self.sequence(open, children);
                let close = self.fst.add_state();
                self.fst.add_tag(end, close, Tag::Close(id));
                close
            }
            PatternNode::Alternation(children) => {
                let end = self.fst.add_state();
                for child in children {
                    let entry = self.entry(start);
                    let child_end = self.node(entry, child);
                    self.fst.add_epsilon(child_end, end, ArcPriority::Medium);
                }
                end
            }
            PatternNode::Quantifier {
                min,
                max,
                greedy,
                child,
            } => self.quantifier(start, *min, *max, *greedy, child),
        }
    }

    /// Fresh state reached from `from` by a neutral epsilon, so loops back
    /// to it cannot re-enter earlier nodes
    fn entry(&mut self, from: StateId) -> StateId {
        let entry = self.fst.add_state();
        self.fst.add_epsilon(from, entry, ArcPriority::Medium);
        entry
    }

    fn quantifier(
        &mut self,
        start: StateId,
        min: usize,
        max: usize,
        greedy: bool,
        child: &PatternNode,
    ) -> StateId {
        if max == 0 {
            return start;
        }
        let priority = if greedy {
            ArcPriority::High
        } else {
            ArcPriority::Low
        };
        let start = self.entry(start);

        // states that may skip straight to the end
        let mut skips = Vec::new();
        let mut current = start;
        let mut end;
        if min == 0 {
            let body = self.fst.add_state();
            self.fst.add_epsilon(start, body, priority);
            end = self.node(body, child);
            skips.push(start);
        } else {
            end = start;
            for _ in 0..min {
                current = end;
                end = self.node(current, child);
            }
        }

        if max == INFINITE {
            self.fst.add_epsilon(end, current, priority);
            if min == 0 {
                end = self.fst.add_state();
            }
        } else {
            let copies = max - min - usize::from(min == 0);
            for _ in 0..copies {
                skips.push(end);
                let body = self.fst.add_state();
                self.fst.add_epsilon(end, body, priority);
                end = self.node(body, child);
            }
        }

        for skip in skips {
            self.fst.add_epsilon(skip, end, ArcPriority::Medium);
        }
        end
    }
}
