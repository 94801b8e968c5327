//! Featmatch: feature-structure unification and pattern matching
//!
//! Phonological and morphological rules describe segments as feature
//! structures and match them against annotated words. This crate provides
//! the unification engine and a pattern matcher that compiles patterns to
//! finite-state automata.

// Feature structures
pub mod bindings; // Variable bindings shared across a unification episode
pub mod feature_struct; // Arena-backed feature structure graphs
pub mod feature_system; // Feature and symbol catalog
pub mod notation; // Bracketed text notation parser
pub mod symbolic; // Symbol-set leaf values and variables
pub mod unification; // Unify, subsume, union, subtract

// Matching
pub mod annotation; // Annotated data consumed by the matcher
pub mod compiler; // Pattern compilation to automata
pub mod fst; // Automaton, epsilon removal, minimization, traversal
pub mod matcher; // Compiled matcher and match results
pub mod pattern; // Pattern tree
pub mod rewrite; // Rewrite rules applied through the matcher

pub mod error;

// Re-exports for convenience
pub use annotation::{AnnotatedData, Annotation, AnnotationFilter, Direction, Range};
pub use bindings::VariableBindings;
pub use error::{FeatureError, NotationError, RewriteError};
pub use feature_struct::FeatureStruct;
pub use feature_system::{FeatureId, FeatureSystem};
pub use fst::MatchingMethod;
pub use matcher::{GroupCapture, Match, Matcher, MatcherSettings};
pub use notation::parse_feature_struct;
pub use pattern::{INFINITE, Pattern, PatternNode};
pub use rewrite::{RewriteRule, RewriteSettings};
pub use symbolic::SymbolicValue;
pub use unification::InternalFeatures;
