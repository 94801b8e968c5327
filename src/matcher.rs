//! Pattern matching over annotated data
//!
//! A [`Matcher`] compiles a frozen [`Pattern`] once and can then be queried
//! any number of times. Queries scan start positions in the configured
//! direction and report the best match at the first position that has
//! one; [`Matcher::all_matches`] keeps going and reports everything.
//!
//! A failed query is a [`Match`] with `success == false`, never an error.

use std::fmt;
use std::ops::Index;

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::annotation::{AnnotatedData, AnnotationFilter, Direction, Range, ScanOrder};
use crate::bindings::VariableBindings;
use crate::compiler::{AcceptInfo, compile};
use crate::feature_system::Defaults;
use crate::fst::{Fst, MatchingMethod, TraversalResult, TraversalSettings};
use crate::pattern::Pattern;

/// Matcher configuration, fixed once the matcher is built
#[derive(Clone, Default)]
pub struct MatcherSettings {
    pub direction: Direction,
    /// Annotations rejected by the filter are invisible to the matcher
    pub filter: Option<AnnotationFilter>,
    /// Treat features missing from the data as their declared defaults
    pub use_defaults: bool,
    /// Consulted when `use_defaults` is set, usually `FeatureSystem::defaults`
    pub defaults: Defaults,
    /// Skip minimization of the automaton
    pub nondeterministic: bool,
    /// Only try the first start position
    pub anchored_to_start: bool,
    /// Only accept matches running through the last position
    pub anchored_to_end: bool,
    /// Report every accepting path from [`Matcher::all_matches`],
    /// duplicates included
    pub all_submatches: bool,
    pub matching_method: MatchingMethod,
}

impl fmt::Debug for MatcherSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatcherSettings")
            .field("direction", &self.direction)
            .field("filter", &self.filter.is_some())
            .field("use_defaults", &self.use_defaults)
            .field("nondeterministic", &self.nondeterministic)
            .field("anchored_to_start", &self.anchored_to_start)
            .field("anchored_to_end", &self.anchored_to_end)
            .field("all_submatches", &self.all_submatches)
            .field("matching_method", &self.matching_method)
            .finish()
    }
}

/// Span captured by a named group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCapture {
    pub name: String,
    /// `None` if the group did not take part in the match
    pub range: Option<Range>,
}

impl GroupCapture {
    pub fn success(&self) -> bool {
        self.range.is_some()
    }
}

/// Outcome of a query
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub success: bool,
    /// `None` on failure; an empty range for a match that consumed nothing
    pub range: Option<Range>,
    /// One capture per named group of the pattern
    pub groups: Vec<GroupCapture>,
    /// Names of the patterns leading to the one that accepted
    pub pattern_path: Vec<String>,
    pub bindings: VariableBindings,
    /// Scan position where the next non-overlapping search starts
    next: Option<usize>,
}

impl Match {
    fn failure() -> Self {
        Self {
            success: false,
            range: None,
            groups: Vec::new(),
            pattern_path: Vec::new(),
            bindings: VariableBindings::new(),
            next: None,
        }
    }

    pub fn group(&self, name: &str) -> Option<&GroupCapture> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// The next match after this one on the same data
    pub fn next_match(
        &self,
        matcher: &Matcher,
        data: &AnnotatedData,
        bindings: &VariableBindings,
    ) -> Match {
        let Some(next) = self.next.filter(|_| self.success) else {
            return Match::failure();
        };
        let order = matcher.scan_order(data);
        matcher.first_match(data, &order, next, bindings)
    }
}

impl Index<&str> for Match {
    type Output = GroupCapture;

    fn index(&self, name: &str) -> &GroupCapture {
        self.group(name)
            .unwrap_or_else(|| panic!("no group named {}", name))
    }
}

/// Compiled pattern, reusable and shareable across threads
#[derive(Debug)]
pub struct Matcher {
    fst: Fst,
    groups: Vec<String>,
    accepts: Vec<AcceptInfo>,
    settings: MatcherSettings,
}

impl Matcher {
    /// Compile `pattern`
    ///
    /// The automaton is minimized unless the settings ask for a
    /// nondeterministic matcher or every submatch, or the pattern has
    /// variables that must be resolved along each path.
    ///
    /// Panics if the pattern is not frozen.
    pub fn new(pattern: &Pattern, settings: MatcherSettings) -> Self {
        assert!(pattern.is_frozen(), "a pattern must be frozen before it is compiled");
        let compiled = compile(pattern, settings.direction);
        let nfa_states = compiled.fst.state_count();
        let mut fst = compiled.fst.epsilon_removal();
        let minimize = !settings.nondeterministic && !compiled.has_variables && !settings.all_submatches;
        if minimize {
            fst = fst.minimize();
        }
        debug!(
            nfa_states,
            states = fst.state_count(),
            arcs = fst.arc_count(),
            minimized = minimize,
            "built matcher"
        );
        Self {
            fst,
            groups: compiled.groups,
            accepts: compiled.accepts,
            settings,
        }
    }

    pub fn settings(&self) -> &MatcherSettings {
        &self.settings
    }

    pub fn direction(&self) -> Direction {
        self.settings.direction
    }

    /// Names of the capture groups, excluding the entire match
    pub fn group_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.groups.iter().skip(1).map(String::as_str)
    }

    fn scan_order(&self, data: &AnnotatedData) -> ScanOrder {
        data.scan_order(self.settings.direction, self.settings.filter.as_ref())
    }

    fn first_position(&self, order: &ScanOrder, offset: Option<usize>) -> usize {
        offset.map_or(0, |offset| order.first_from(offset))
    }

    // ===== Queries =====

    pub fn is_match(&self, data: &AnnotatedData) -> bool {
        self.find(data).success
    }

    pub fn is_match_from(&self, data: &AnnotatedData, offset: usize) -> bool {
        self.find_from(data, offset).success
    }

    /// First match scanning from the start of the data
    pub fn find(&self, data: &AnnotatedData) -> Match {
        self.find_with(data, None, &VariableBindings::new())
    }

    /// First match at or after `offset` in scan direction
    pub fn find_from(&self, data: &AnnotatedData, offset: usize) -> Match {
        self.find_with(data, Some(offset), &VariableBindings::new())
    }

    /// First match starting from `offset` (the data's start if `None`),
    /// with variables pre-bound by `bindings`
    pub fn find_with(
        &self,
        data: &AnnotatedData,
        offset: Option<usize>,
        bindings: &VariableBindings,
    ) -> Match {
        let order = self.scan_order(data);
        let first = self.first_position(&order, offset);
        self.first_match(data, &order, first, bindings)
    }

    /// Non-overlapping matches, each search resuming after the last match
    pub fn matches<'a>(&'a self, data: &'a AnnotatedData) -> Matches<'a> {
        self.matches_with(data, None, &VariableBindings::new())
    }

    pub fn matches_with<'a>(
        &'a self,
        data: &'a AnnotatedData,
        offset: Option<usize>,
        bindings: &VariableBindings,
    ) -> Matches<'a> {
        let order = self.scan_order(data);
        let next = Some(self.first_position(&order, offset));
        Matches {
            matcher: self,
            data,
            order,
            bindings: bindings.clone(),
            next,
        }
    }

    /// Every match from every start position, overlapping ones included
    pub fn all_matches(&self, data: &AnnotatedData) -> Vec<Match> {
        self.all_matches_with(data, None, &VariableBindings::new())
    }

    /// Unless `all_submatches` is set, matches with the same range and
    /// pattern path are reported once.
    pub fn all_matches_with(
        &self,
        data: &AnnotatedData,
        offset: Option<usize>,
        bindings: &VariableBindings,
    ) -> Vec<Match> {
        let order = self.scan_order(data);
        let first = self.first_position(&order, offset);
        let matches = self.search(data, &order, first, bindings, true);
        if self.settings.all_submatches {
            return matches;
        }
        let mut seen = FxHashSet::default();
        matches
            .into_iter()
            .filter(|m| seen.insert((m.range, m.pattern_path.clone())))
            .collect()
    }

    // ===== Search =====

    fn first_match(
        &self,
        data: &AnnotatedData,
        order: &ScanOrder,
        first: usize,
        bindings: &VariableBindings,
    ) -> Match {
        self.search(data, order, first, bindings, false)
            .into_iter()
            .next()
            .unwrap_or_else(Match::failure)
    }

    fn search(
        &self,
        data: &AnnotatedData,
        order: &ScanOrder,
        first: usize,
        bindings: &VariableBindings,
        all: bool,
    ) -> Vec<Match> {
        let traversal = TraversalSettings {
            method: self.settings.matching_method,
            defaults: self.settings.use_defaults.then_some(&self.settings.defaults),
            anchored_to_end: self.settings.anchored_to_end,
            first_only: !all,
        };

        let mut found = Vec::new();
        for start in first..order.len() {
            let results = self.fst.transduce(data, order, start, bindings, &traversal, |r| {
                self.acceptable(data, order, r)
            });
            if !results.is_empty() {
                found.extend(results.into_iter().map(|r| self.build_match(order, r)));
                if !all {
                    break;
                }
            }
            if self.settings.anchored_to_start {
                break;
            }
        }
        found
    }

    fn acceptable(&self, data: &AnnotatedData, order: &ScanOrder, result: &TraversalResult) -> bool {
        let acceptables = &self.accepts[result.accept].acceptables;
        if acceptables.is_empty() {
            return true;
        }
        let candidate = self.build_match(order, result.clone());
        acceptables.iter().all(|acceptable| acceptable(data, &candidate))
    }

    fn build_match(&self, order: &ScanOrder, result: TraversalResult) -> Match {
        let offset = order.position(result.start).map_or(0, |p| p.offset);
        let range = result.spans[0].unwrap_or(Range::empty_at(offset));
        let groups = self
            .groups
            .iter()
            .zip(&result.spans)
            .skip(1)
            .map(|(name, span)| GroupCapture {
                name: name.clone(),
                range: span.filter(|s| !s.is_empty() && range.contains(s)),
            })
            .collect();
        Match {
            success: true,
            range: Some(range),
            groups,
            pattern_path: self.accepts[result.accept].path.clone(),
            bindings: result.bindings,
            next: Some(result.next.max(result.start + 1)),
        }
    }
}

/// Iterator returned by [`Matcher::matches`]
pub struct Matches<'a> {
    matcher: &'a Matcher,
    data: &'a AnnotatedData,
    order: ScanOrder,
    bindings: VariableBindings,
    next: Option<usize>,
}

impl Iterator for Matches<'_> {
    type Item = Match;

    fn next(&mut self) -> Option<Match> {
        let start = self.next.take()?;
        let found = self
            .matcher
            .first_match(self.data, &self.order, start, &self.bindings);
        if !found.success {
            return None;
        }
        self.next = found.next;
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::Annotation;
    use crate::feature_struct::FeatureStruct;
    use crate::feature_system::FeatureSystem;
    use crate::pattern::PatternNode;
    use std::sync::Arc;

    fn system() -> FeatureSystem {
        let mut sys = FeatureSystem::new();
        sys.add_symbolic("seg", &["a", "b", "c"]).unwrap();
        sys.add_symbolic_with_default("stress", &["str+", "str-"], "str-")
            .unwrap();
        sys.freeze();
        sys
    }

    fn fs(sys: &FeatureSystem, symbols: &[&str]) -> FeatureStruct {
        symbols
            .iter()
            .fold(FeatureStruct::builder(sys), |b, s| b.symbol(s))
            .build()
            .unwrap()
    }

    fn word(sys: &FeatureSystem, text: &str) -> AnnotatedData {
        AnnotatedData::from_segments(text.split_whitespace().map(|s| fs(sys, &[s])))
    }

    fn seg(sys: &FeatureSystem, symbol: &str) -> PatternNode {
        PatternNode::constraint(fs(sys, &[symbol]))
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn matcher(pattern: Pattern) -> Matcher {
        Matcher::new(&pattern.into_frozen(), MatcherSettings::default())
    }

    fn anchored() -> MatcherSettings {
        MatcherSettings {
            anchored_to_start: true,
            anchored_to_end: true,
            ..Default::default()
        }
    }

    // ===== Basic matching =====

    #[test]
    fn test_sequence() {
        init_tracing();
        let sys = system();
        let m = matcher(Pattern::new().with(seg(&sys, "a")).with(seg(&sys, "b")));
        let found = m.find(&word(&sys, "c a b a"));
        assert!(found.success);
        assert_eq!(found.range, Some(Range::new(1, 3)));
        assert!(found.pattern_path.is_empty());
    }

    #[test]
    fn test_failure_is_a_value() {
        let sys = system();
        let m = matcher(Pattern::new().with(seg(&sys, "a")).with(seg(&sys, "c")));
        let found = m.find(&word(&sys, "a b"));
        assert!(!found.success);
        assert_eq!(found.range, None);
        assert!(!m.is_match(&word(&sys, "a b")));
        assert!(!m.is_match(&AnnotatedData::new()));
    }

    #[test]
    fn test_find_from_offset() {
        let sys = system();
        let m = matcher(Pattern::new().with(seg(&sys, "a")));
        let data = word(&sys, "a b a");
        assert_eq!(m.find_from(&data, 1).range, Some(Range::new(2, 3)));
        assert!(!m.is_match_from(&data, 3));
    }

    // ===== Quantifiers =====

    #[test]
    fn test_zero_or_more_matches_empty() {
        let sys = system();
        let m = matcher(Pattern::new().with(PatternNode::zero_or_more(seg(&sys, "a"))));
        let found = m.find(&word(&sys, "b"));
        assert!(found.success);
        assert_eq!(found.range, Some(Range::new(0, 0)));
        assert_eq!(m.find(&word(&sys, "a a b")).range, Some(Range::new(0, 2)));
    }

    #[test]
    fn test_exact_repetition() {
        let sys = system();
        let pattern = Pattern::new()
            .with(PatternNode::quantifier(2, 2, seg(&sys, "a")))
            .into_frozen();
        let m = Matcher::new(&pattern, anchored());
        assert!(!m.is_match(&word(&sys, "a")));
        assert!(m.is_match(&word(&sys, "a a")));
        assert!(!m.is_match(&word(&sys, "a a a")));

        let unanchored = Matcher::new(&pattern, MatcherSettings::default());
        assert_eq!(
            unanchored.find(&word(&sys, "a a a")).range,
            Some(Range::new(0, 2))
        );
    }

    #[test]
    fn test_greedy_and_lazy_bounds() {
        let sys = system();
        let data = word(&sys, "a a a a");
        let greedy = matcher(Pattern::new().with(PatternNode::quantifier(1, 3, seg(&sys, "a"))));
        assert_eq!(greedy.find(&data).range, Some(Range::new(0, 3)));
        let lazy = matcher(
            Pattern::new().with(PatternNode::quantifier(1, 3, seg(&sys, "a")).lazy()),
        );
        assert_eq!(lazy.find(&data).range, Some(Range::new(0, 1)));
    }

    #[test]
    fn test_adjacent_quantifiers_do_not_reenter() {
        let sys = system();
        let m = Matcher::new(
            &Pattern::new()
                .with(PatternNode::one_or_more(seg(&sys, "a")))
                .with(PatternNode::zero_or_more(seg(&sys, "b")))
                .into_frozen(),
            anchored(),
        );
        assert!(m.is_match(&word(&sys, "a a b b")));
        assert!(!m.is_match(&word(&sys, "a b a")));
    }

    #[test]
    fn test_optional_node() {
        let sys = system();
        let m = matcher(
            Pattern::new()
                .with(seg(&sys, "a"))
                .with(PatternNode::optional(seg(&sys, "b")))
                .with(seg(&sys, "c")),
        );
        assert_eq!(m.find(&word(&sys, "a c")).range, Some(Range::new(0, 2)));
        assert_eq!(m.find(&word(&sys, "a b c")).range, Some(Range::new(0, 3)));
        assert!(!m.is_match(&word(&sys, "a b b c")));
    }

    // ===== Groups and alternation =====

    #[test]
    fn test_group_captures() {
        let sys = system();
        let m = matcher(
            Pattern::new()
                .with(PatternNode::group("first", vec![seg(&sys, "a")]))
                .with(PatternNode::group(
                    "maybe",
                    vec![PatternNode::zero_or_more(seg(&sys, "c"))],
                ))
                .with(PatternNode::group(
                    "rest",
                    vec![PatternNode::one_or_more(seg(&sys, "b"))],
                )),
        );
        let found = m.find(&word(&sys, "a b b c"));
        assert!(found.success);
        assert_eq!(found.range, Some(Range::new(0, 3)));
        assert_eq!(found["first"].range, Some(Range::new(0, 1)));
        assert!(!found["maybe"].success());
        assert_eq!(found["rest"].range, Some(Range::new(1, 3)));
        assert_eq!(
            m.group_names().collect::<Vec<_>>(),
            vec!["first", "maybe", "rest"]
        );
    }

    #[test]
    fn test_repeated_group_captures_last_iteration() {
        let sys = system();
        let m = matcher(Pattern::new().with(PatternNode::one_or_more(PatternNode::group(
            "g",
            vec![seg(&sys, "a"), seg(&sys, "b")],
        ))));
        let found = m.find(&word(&sys, "a b a b"));
        assert_eq!(found.range, Some(Range::new(0, 4)));
        assert_eq!(found["g"].range, Some(Range::new(2, 4)));
    }

    #[test]
    fn test_alternation_prefers_first() {
        let sys = system();
        let m = matcher(Pattern::new().with(PatternNode::group(
            "alt",
            vec![PatternNode::alternation(vec![
                seg(&sys, "a"),
                PatternNode::anonymous_group(vec![seg(&sys, "a"), seg(&sys, "b")]),
            ])],
        )));
        assert_eq!(m.find(&word(&sys, "a b")).range, Some(Range::new(0, 1)));

        let whole = Matcher::new(
            &Pattern::new()
                .with(PatternNode::alternation(vec![
                    seg(&sys, "a"),
                    PatternNode::anonymous_group(vec![seg(&sys, "a"), seg(&sys, "b")]),
                ]))
                .into_frozen(),
            anchored(),
        );
        assert_eq!(whole.find(&word(&sys, "a b")).range, Some(Range::new(0, 2)));
    }

    // ===== Sub-patterns =====

    #[test]
    fn test_pattern_path_and_priority() {
        let sys = system();
        let m = matcher(
            Pattern::named("rules")
                .with_pattern(Pattern::named("long").with(seg(&sys, "a")).with(seg(&sys, "b")))
                .with_pattern(Pattern::named("short").with(seg(&sys, "a"))),
        );
        let found = m.find(&word(&sys, "a b"));
        assert_eq!(found.pattern_path, vec!["rules", "long"]);
        assert_eq!(found.range, Some(Range::new(0, 2)));

        let found = m.find(&word(&sys, "a c"));
        assert_eq!(found.pattern_path, vec!["rules", "short"]);
    }

    #[test]
    fn test_acceptable_vetoes_match() {
        let sys = system();
        let m = matcher(
            Pattern::new()
                .with_acceptable(|_, m| m.range.is_some_and(|r| r.start > 0))
                .with(seg(&sys, "a")),
        );
        assert_eq!(m.find(&word(&sys, "a b a")).range, Some(Range::new(2, 3)));
    }

    // ===== Iteration =====

    #[test]
    fn test_matches_do_not_overlap() {
        let sys = system();
        let m = matcher(Pattern::new().with(seg(&sys, "a")).with(seg(&sys, "a")));
        let ranges: Vec<_> = m
            .matches(&word(&sys, "a a a a a"))
            .filter_map(|m| m.range)
            .collect();
        assert_eq!(ranges, vec![Range::new(0, 2), Range::new(2, 4)]);
    }

    #[test]
    fn test_next_match_continues() {
        let sys = system();
        let m = matcher(Pattern::new().with(seg(&sys, "b")));
        let data = word(&sys, "b a b");
        let first = m.find(&data);
        let second = first.next_match(&m, &data, &VariableBindings::new());
        assert_eq!(second.range, Some(Range::new(2, 3)));
        let third = second.next_match(&m, &data, &VariableBindings::new());
        assert!(!third.success);
    }

    #[test]
    fn test_all_matches_overlap() {
        let sys = system();
        let m = matcher(Pattern::new().with(seg(&sys, "a")).with(seg(&sys, "a")));
        let ranges: Vec<_> = m
            .all_matches(&word(&sys, "a a a"))
            .into_iter()
            .filter_map(|m| m.range)
            .collect();
        assert_eq!(ranges, vec![Range::new(0, 2), Range::new(1, 3)]);
    }

    #[test]
    fn test_all_matches_deduplicates() {
        let sys = system();
        let pattern = Pattern::new()
            .with(PatternNode::alternation(vec![
                seg(&sys, "a"),
                PatternNode::constraint(FeatureStruct::new()),
            ]))
            .into_frozen();
        let data = word(&sys, "a");
        let m = Matcher::new(&pattern, MatcherSettings::default());
        assert_eq!(m.all_matches(&data).len(), 1);

        let every = Matcher::new(
            &pattern,
            MatcherSettings {
                all_submatches: true,
                ..Default::default()
            },
        );
        assert_eq!(every.all_matches(&data).len(), 2);
    }

    #[test]
    fn test_ambiguous_captures_under_star() {
        init_tracing();
        let sys = system();
        let star = || {
            PatternNode::zero_or_more(PatternNode::alternation(vec![
                PatternNode::group("g", vec![seg(&sys, "a")]),
                seg(&sys, "a"),
            ]))
        };
        let data = word(&sys, &vec!["a"; 40].join(" "));

        let m = matcher(Pattern::new().with(star()));
        let found = m.find(&data);
        assert_eq!(found.range, Some(Range::new(0, 40)));
        assert_eq!(found["g"].range, Some(Range::new(39, 40)));

        // no match anywhere: converging paths are searched once
        let m = matcher(Pattern::new().with(star()).with(seg(&sys, "b")));
        assert!(!m.is_match(&data));
        assert_eq!(m.matches(&data).count(), 0);
    }

    #[test]
    #[should_panic(expected = "frozen")]
    fn test_unfrozen_pattern_rejected() {
        let sys = system();
        let pattern = Pattern::new().with(seg(&sys, "a"));
        Matcher::new(&pattern, MatcherSettings::default());
    }

    // ===== Settings =====

    #[test]
    fn test_minimization_does_not_change_results() {
        init_tracing();
        let sys = system();
        let pattern = Pattern::new()
            .with(PatternNode::group(
                "g",
                vec![PatternNode::zero_or_more(seg(&sys, "a"))],
            ))
            .with(PatternNode::alternation(vec![seg(&sys, "b"), seg(&sys, "c")]))
            .with(PatternNode::quantifier(0, 2, seg(&sys, "a")).lazy())
            .into_frozen();
        let minimized = Matcher::new(&pattern, MatcherSettings::default());
        let plain = Matcher::new(
            &pattern,
            MatcherSettings {
                nondeterministic: true,
                ..Default::default()
            },
        );
        for text in ["a a b a", "c", "b a a", "a c c", "a a"] {
            let data = word(&sys, text);
            assert_eq!(minimized.find(&data), plain.find(&data), "{}", text);
            assert_eq!(minimized.all_matches(&data), plain.all_matches(&data), "{}", text);
        }
    }

    #[test]
    fn test_right_to_left() {
        let sys = system();
        let pattern = Pattern::new()
            .with(PatternNode::group("first", vec![seg(&sys, "a")]))
            .with(seg(&sys, "b"))
            .into_frozen();
        let m = Matcher::new(
            &pattern,
            MatcherSettings {
                direction: Direction::RightToLeft,
                ..Default::default()
            },
        );
        let found = m.find(&word(&sys, "a b c a b"));
        assert_eq!(found.range, Some(Range::new(3, 5)));
        assert_eq!(found["first"].range, Some(Range::new(3, 4)));
        let ranges: Vec<_> = m
            .matches(&word(&sys, "a b c a b"))
            .filter_map(|m| m.range)
            .collect();
        assert_eq!(ranges, vec![Range::new(3, 5), Range::new(0, 2)]);
    }

    #[test]
    fn test_anchored_to_start() {
        let sys = system();
        let pattern = Pattern::new().with(seg(&sys, "b")).into_frozen();
        let m = Matcher::new(
            &pattern,
            MatcherSettings {
                anchored_to_start: true,
                ..Default::default()
            },
        );
        assert!(!m.is_match(&word(&sys, "a b")));
        assert!(m.is_match(&word(&sys, "b a")));
    }

    #[test]
    fn test_filter_hides_annotations() {
        let sys = system();
        let mut data = word(&sys, "a b");
        data.push(Annotation::new(Range::new(1, 2), fs(&sys, &["c"])).optional());
        let pattern = Pattern::new()
            .with(seg(&sys, "a"))
            .with(seg(&sys, "c"))
            .into_frozen();
        assert!(Matcher::new(&pattern, MatcherSettings::default()).is_match(&data));

        let filter: AnnotationFilter = Arc::new(|a: &Annotation| !a.optional);
        let filtered = Matcher::new(
            &pattern,
            MatcherSettings {
                filter: Some(filter),
                ..Default::default()
            },
        );
        assert!(!filtered.is_match(&data));
    }

    #[test]
    fn test_optional_annotation_can_be_skipped() {
        let sys = system();
        let mut data = word(&sys, "a");
        data.push(Annotation::new(Range::new(1, 2), fs(&sys, &["c"])).optional());
        data.push(Annotation::new(Range::new(2, 3), fs(&sys, &["b"])));
        let m = matcher(Pattern::new().with(seg(&sys, "a")).with(seg(&sys, "b")));
        assert_eq!(m.find(&data).range, Some(Range::new(0, 3)));
    }

    #[test]
    fn test_use_defaults() {
        let sys = system();
        let pattern = Pattern::new()
            .with(PatternNode::constraint(fs(&sys, &["a", "str-"])))
            .into_frozen();
        let data = word(&sys, "a");
        assert!(!Matcher::new(&pattern, MatcherSettings::default()).is_match(&data));

        let settings = MatcherSettings {
            use_defaults: true,
            defaults: sys.defaults(),
            ..Default::default()
        };
        assert!(Matcher::new(&pattern, settings).is_match(&data));
    }

    #[test]
    fn test_unification_method() {
        let sys = system();
        let pattern = Pattern::new()
            .with(PatternNode::constraint(fs(&sys, &["a", "str+"])))
            .into_frozen();
        let data = word(&sys, "a");
        assert!(!Matcher::new(&pattern, MatcherSettings::default()).is_match(&data));

        let settings = MatcherSettings {
            matching_method: MatchingMethod::Unification,
            ..Default::default()
        };
        let m = Matcher::new(&pattern, settings);
        assert!(m.is_match(&data));
        assert!(!m.is_match(&word(&sys, "b")));
    }

    // ===== Variables =====

    #[test]
    fn test_variables_agree_across_positions() {
        let sys = system();
        let var = FeatureStruct::builder(&sys)
            .variable("seg", "x", true)
            .build()
            .unwrap();
        let pattern = Pattern::new()
            .with(PatternNode::constraint(var.clone()))
            .with(PatternNode::constraint(var))
            .into_frozen();
        let m = Matcher::new(&pattern, MatcherSettings::default());
        let found = m.find(&word(&sys, "a b b"));
        assert_eq!(found.range, Some(Range::new(1, 3)));
        assert!(found.bindings.contains("x"));
        assert!(!m.is_match(&word(&sys, "a b c")));
    }

    #[test]
    fn test_prebound_variables() {
        let sys = system();
        let var = FeatureStruct::builder(&sys)
            .variable("seg", "x", true)
            .build()
            .unwrap();
        let pattern = Pattern::new().with(PatternNode::constraint(var)).into_frozen();
        let m = Matcher::new(&pattern, MatcherSettings::default());
        let mut bindings = VariableBindings::new();
        bindings.bind("x", sys.value_of(&["c"]).unwrap());
        let found = m.find_with(&word(&sys, "a b c"), None, &bindings);
        assert_eq!(found.range, Some(Range::new(2, 3)));
    }
}
