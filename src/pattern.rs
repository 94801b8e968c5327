//! Pattern representation
//!
//! A [`Pattern`] is either a sequence of [`PatternNode`]s or an ordered list
//! of sub-patterns, each of which becomes a separately accepting
//! alternative. Nodes are constraints, capture groups, alternations and
//! quantifiers. Patterns are frozen before they are compiled.

use std::fmt;
use std::sync::Arc;

use crate::annotation::AnnotatedData;
use crate::feature_struct::FeatureStruct;
use crate::matcher::Match;

/// Unbounded maximum for [`PatternNode::Quantifier`]
pub const INFINITE: usize = usize::MAX;

/// Postcondition checked against a complete match
pub type Acceptable = Arc<dyn Fn(&AnnotatedData, &Match) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum PatternNode {
    /// Matches one annotation whose feature structure satisfies the condition
    Constraint(FeatureStruct),
    /// Sequence of nodes; named groups are reported in matches
    Group {
        name: Option<String>,
        children: Vec<PatternNode>,
    },
    /// Exactly one child, earlier children preferred
    Alternation(Vec<PatternNode>),
    Quantifier {
        min: usize,
        max: usize,
        greedy: bool,
        child: Box<PatternNode>,
    },
}

impl PatternNode {
    pub fn constraint(fs: FeatureStruct) -> Self {
        PatternNode::Constraint(fs.into_frozen())
    }

    pub fn group(name: &str, children: Vec<PatternNode>) -> Self {
        PatternNode::Group {
            name: Some(name.to_string()),
            children,
        }
    }

    pub fn anonymous_group(children: Vec<PatternNode>) -> Self {
        PatternNode::Group { name: None, children }
    }

    pub fn alternation(children: Vec<PatternNode>) -> Self {
        PatternNode::Alternation(children)
    }

    /// Greedy repetition between `min` and `max` times
    pub fn quantifier(min: usize, max: usize, child: PatternNode) -> Self {
        assert!(min <= max, "quantifier minimum {} exceeds maximum {}", min, max);
        PatternNode::Quantifier {
            min,
            max,
            greedy: true,
            child: Box::new(child),
        }
    }

    pub fn zero_or_more(child: PatternNode) -> Self {
        Self::quantifier(0, INFINITE, child)
    }

    pub fn one_or_more(child: PatternNode) -> Self {
        Self::quantifier(1, INFINITE, child)
    }

    pub fn optional(child: PatternNode) -> Self {
        Self::quantifier(0, 1, child)
    }

    /// Make a quantifier prefer fewer repetitions
    pub fn lazy(self) -> Self {
        match self {
            PatternNode::Quantifier { min, max, child, .. } => PatternNode::Quantifier {
                min,
                max,
                greedy: false,
                child,
            },
            _ => panic!("only quantifiers can be lazy"),
        }
    }

    /// True if any constraint below contains an unresolved variable
    pub fn has_variables(&self) -> bool {
        match self {
            PatternNode::Constraint(fs) => fs.has_variables(),
            PatternNode::Group { children, .. } | PatternNode::Alternation(children) => {
                children.iter().any(PatternNode::has_variables)
            }
            PatternNode::Quantifier { child, .. } => child.has_variables(),
        }
    }
}

#[derive(Clone, Default)]
enum Children {
    #[default]
    Empty,
    Nodes(Vec<PatternNode>),
    Patterns(Vec<Pattern>),
}

/// A named sequence of nodes, or a list of alternative sub-patterns
#[derive(Clone, Default)]
pub struct Pattern {
    name: Option<String>,
    children: Children,
    acceptable: Option<Acceptable>,
    frozen: bool,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn check_frozen(&self) {
        assert!(!self.frozen, "cannot modify a frozen pattern");
    }

    /// Append a node to the sequence
    ///
    /// Panics if the pattern is frozen or already holds sub-patterns.
    pub fn add(&mut self, node: PatternNode) {
        self.check_frozen();
        match &mut self.children {
            Children::Empty => self.children = Children::Nodes(vec![node]),
            Children::Nodes(nodes) => nodes.push(node),
            Children::Patterns(_) => panic!("cannot mix pattern nodes with sub-patterns"),
        }
    }

    /// Append an alternative sub-pattern
    ///
    /// Panics if the pattern is frozen or already holds nodes.
    pub fn add_pattern(&mut self, pattern: Pattern) {
        self.check_frozen();
        match &mut self.children {
            Children::Empty => self.children = Children::Patterns(vec![pattern]),
            Children::Patterns(patterns) => patterns.push(pattern),
            Children::Nodes(_) => panic!("cannot mix sub-patterns with pattern nodes"),
        }
    }

    pub fn with(mut self, node: PatternNode) -> Self {
        self.add(node);
        self
    }

    pub fn with_pattern(mut self, pattern: Pattern) -> Self {
        self.add_pattern(pattern);
        self
    }

    /// Attach a postcondition checked against every complete match
    pub fn with_acceptable(
        mut self,
        acceptable: impl Fn(&AnnotatedData, &Match) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.check_frozen();
        self.acceptable = Some(Arc::new(acceptable));
        self
    }

    pub fn acceptable(&self) -> Option<&Acceptable> {
        self.acceptable.as_ref()
    }

    pub fn nodes(&self) -> &[PatternNode] {
        match &self.children {
            Children::Nodes(nodes) => nodes,
            _ => &[],
        }
    }

    pub fn patterns(&self) -> &[Pattern] {
        match &self.children {
            Children::Patterns(patterns) => patterns,
            _ => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.children, Children::Empty)
    }

    pub fn has_variables(&self) -> bool {
        self.nodes().iter().any(PatternNode::has_variables)
            || self.patterns().iter().any(Pattern::has_variables)
    }

    pub fn freeze(&mut self) {
        if let Children::Patterns(patterns) = &mut self.children {
            patterns.iter_mut().for_each(Pattern::freeze);
        }
        self.frozen = true;
    }

    pub fn into_frozen(mut self) -> Self {
        self.freeze();
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pattern")
            .field("name", &self.name)
            .field("nodes", &self.nodes())
            .field("patterns", &self.patterns())
            .field("acceptable", &self.acceptable.is_some())
            .field("frozen", &self.frozen)
            .finish()
    }
}
