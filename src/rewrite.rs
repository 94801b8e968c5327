//! Rewrite rules
//!
//! A rule `lhs -> rhs / left _ right` finds a target annotation matching
//! `lhs` between the `left` and `right` environments and overlays `rhs`
//! onto it with [`FeatureStruct::priority_union`]. Without an `lhs` the
//! rule inserts `rhs` as a new segment between the environments.
//!
//! Variables bound while matching are substituted into `rhs`. Applications
//! that would leave the target unchanged are rejected by the rule's
//! pattern, so a rule applied to its own output finds nothing to do.

use tracing::{debug, warn};

use crate::annotation::{AnnotatedData, Direction, Range};
use crate::bindings::VariableBindings;
use crate::error::RewriteError;
use crate::feature_struct::FeatureStruct;
use crate::feature_system::FeatureSystem;
use crate::fst::MatchingMethod;
use crate::matcher::{Match, Matcher, MatcherSettings};
use crate::pattern::{Pattern, PatternNode};

const LEFT: &str = "left";
const TARGET: &str = "target";
const RIGHT: &str = "right";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewriteSettings {
    pub direction: Direction,
    /// Data may not grow beyond this many annotations
    pub max_positions: usize,
    pub matching_method: MatchingMethod,
}

impl Default for RewriteSettings {
    fn default() -> Self {
        Self {
            direction: Direction::LeftToRight,
            max_positions: 256,
            matching_method: MatchingMethod::Subsumption,
        }
    }
}

#[derive(Debug)]
pub struct RewriteRule {
    inserts: bool,
    rhs: FeatureStruct,
    settings: RewriteSettings,
    matcher: Matcher,
}

impl RewriteRule {
    /// Feature-changing rule `lhs -> rhs / left _ right`
    pub fn new(
        lhs: FeatureStruct,
        rhs: FeatureStruct,
        left: Vec<PatternNode>,
        right: Vec<PatternNode>,
        settings: RewriteSettings,
    ) -> Self {
        Self::build(Some(lhs), rhs, left, right, settings)
    }

    /// Insertion rule `0 -> rhs / left _ right`
    pub fn insertion(
        rhs: FeatureStruct,
        left: Vec<PatternNode>,
        right: Vec<PatternNode>,
        settings: RewriteSettings,
    ) -> Self {
        Self::build(None, rhs, left, right, settings)
    }

    fn build(
        lhs: Option<FeatureStruct>,
        rhs: FeatureStruct,
        left: Vec<PatternNode>,
        right: Vec<PatternNode>,
        settings: RewriteSettings,
    ) -> Self {
        let rhs = rhs.into_frozen();
        let inserts = lhs.is_none();
        let mut pattern = Pattern::new().with(PatternNode::group(LEFT, left));
        if let Some(lhs) = lhs {
            pattern.add(PatternNode::group(TARGET, vec![PatternNode::constraint(lhs)]));
        }
        pattern.add(PatternNode::group(RIGHT, right));

        let overlay = rhs.clone();
        let pattern = pattern
            .with_acceptable(move |data, found| !is_vacuous(&overlay, data, found))
            .into_frozen();
        let matcher = Matcher::new(
            &pattern,
            MatcherSettings {
                direction: settings.direction,
                matching_method: settings.matching_method,
                ..Default::default()
            },
        );
        Self {
            inserts,
            rhs,
            settings,
            matcher,
        }
    }

    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    pub fn settings(&self) -> &RewriteSettings {
        &self.settings
    }

    /// Apply the rule iteratively in its direction, returning the number
    /// of applications
    pub fn apply(&self, system: &FeatureSystem, data: &mut AnnotatedData) -> Result<usize, RewriteError> {
        let limit = self.settings.max_positions;
        let mut count = 0;
        let mut offset = None;
        loop {
            let found = self.matcher.find_with(data, offset, &VariableBindings::new());
            if !found.success {
                break;
            }
            offset = Some(self.apply_match(system, data, &found)?);
            count += 1;
            if data.len() > limit {
                warn!(limit, applications = count, "rewrite rule does not terminate");
                return Err(RewriteError::InfiniteLoop { limit });
            }
        }
        debug!(applications = count, "applied rewrite rule");
        Ok(count)
    }

    /// Rewrite one match; returns the offset where scanning resumes
    fn apply_match(
        &self,
        system: &FeatureSystem,
        data: &mut AnnotatedData,
        found: &Match,
    ) -> Result<usize, RewriteError> {
        let direction = self.settings.direction;
        let range = found.range.unwrap_or(Range::empty_at(0));

        if self.inserts {
            let at = found
                .group(LEFT)
                .and_then(|g| g.range)
                .map(|r| r.end)
                .or_else(|| found.group(RIGHT).and_then(|g| g.range).map(|r| r.start))
                .unwrap_or(range.start);
            let segment = resolve(system, self.rhs.deep_clone(), &found.bindings)?;
            data.insert_segment(at, segment);
            return Ok(match direction {
                Direction::LeftToRight => at + 1,
                Direction::RightToLeft => at,
            });
        }

        let Some(target) = found.group(TARGET).and_then(|g| g.range) else {
            return Ok(range.end_in(direction));
        };
        let Some(index) = (0..data.len()).find(|&i| data.get(i).is_some_and(|a| a.range == target))
        else {
            return Ok(target.end_in(direction));
        };
        if let Some(annotation) = data.get(index) {
            let mut fs = annotation.fs.deep_clone();
            fs.priority_union_with_bindings(&self.rhs, &found.bindings);
            let fs = resolve(system, fs, &found.bindings)?;
            data.set_fs(index, fs);
        }
        Ok(target.end_in(direction))
    }
}

/// Substitute bound variables, failing on any left unbound
fn resolve(
    system: &FeatureSystem,
    mut fs: FeatureStruct,
    bindings: &VariableBindings,
) -> Result<FeatureStruct, RewriteError> {
    fs.replace_variables(bindings);
    match fs.first_variable_feature() {
        Some(feature) => Err(RewriteError::UninstantiatedVariable {
            feature: system.feature(feature).name.clone(),
        }),
        None => Ok(fs),
    }
}

/// True if overlaying `rhs` would leave the matched target unchanged
fn is_vacuous(rhs: &FeatureStruct, data: &AnnotatedData, found: &Match) -> bool {
    let Some(target) = found.group(TARGET).and_then(|g| g.range) else {
        return false;
    };
    let Some(annotation) = data.iter().find(|a| a.range == target) else {
        return false;
    };
    let mut fs = annotation.fs.deep_clone();
    fs.priority_union_with_bindings(rhs, &found.bindings);
    fs.replace_variables(&found.bindings);
    !fs.has_variables() && fs == annotation.fs
}
