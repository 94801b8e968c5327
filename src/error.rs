//! Error types
//!
//! Unification and matching failures are ordinary values (`bool`,
//! `Option`, unsuccessful [`Match`](crate::matcher::Match)). Only catalog
//! misuse, notation parsing and rule application produce errors.

use thiserror::Error;

use crate::notation::Rule;

/// Errors raised while declaring or looking up features and symbols
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("Feature error: unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Feature error: unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Feature error: duplicate name: {0}")]
    DuplicateName(String),

    #[error("Feature error: feature {feature} declares {count} symbols (at most {max} allowed)")]
    TooManySymbols {
        feature: String,
        count: usize,
        max: usize,
    },

    #[error("Feature error: feature system is frozen")]
    SystemFrozen,

    #[error("Feature error: symbols {0} and {1} belong to different features")]
    MixedFeatures(String, String),

    #[error("Feature error: feature {0} is not a symbolic feature")]
    NotSymbolic(String),

    #[error("Feature error: feature {0} is not a complex feature")]
    NotComplex(String),

    #[error("Feature error: undefined re-entrancy id {0}")]
    UndefinedReentrancy(u32),
}

/// Errors raised while parsing feature-structure notation
#[derive(Debug, Error)]
pub enum NotationError {
    #[error("Notation error: {0}")]
    Parse(#[from] Box<pest::error::Error<Rule>>),

    #[error("Notation error: {0}")]
    Feature(#[from] FeatureError),

    #[error("Notation error: {0}")]
    Malformed(String),
}

/// Errors that abort a single rewrite rule application
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RewriteError {
    #[error("Rewrite error: variable on feature {feature} was never instantiated")]
    UninstantiatedVariable { feature: String },

    #[error("Rewrite error: rule application exceeded {limit} positions (infinite loop)")]
    InfiniteLoop { limit: usize },
}
