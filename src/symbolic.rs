//! Symbolic feature values
//!
//! A [`SymbolicValue`] is either a disjunctive set of admissible symbols,
//! stored as a bitset over the feature's symbols, or an unresolved
//! variable with an agreement flag. Binary set operations take `not` flags
//! for either operand so that negated variable bindings can be consulted
//! without materializing the complement.

use crate::bindings::VariableBindings;
use crate::feature_system::FeatureId;

/// Maximum number of symbols per symbolic feature
pub const MAX_SYMBOLS: usize = 128;

/// A named variable; `agree == false` denotes the negated variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Variable {
    pub name: String,
    pub agree: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolicValue {
    feature: FeatureId,
    width: u8,
    bits: u128,
    var: Option<Variable>,
}

impl SymbolicValue {
    pub(crate) fn from_bits(feature: FeatureId, width: usize, bits: u128) -> Self {
        let mut value = Self {
            feature,
            width: width as u8,
            bits: 0,
            var: None,
        };
        value.bits = bits & value.mask();
        value
    }

    pub(crate) fn variable(feature: FeatureId, width: usize, name: &str, agree: bool) -> Self {
        Self {
            feature,
            width: width as u8,
            bits: 0,
            var: Some(Variable {
                name: name.to_string(),
                agree,
            }),
        }
    }

    pub fn feature(&self) -> FeatureId {
        self.feature
    }

    pub fn bits(&self) -> u128 {
        self.bits
    }

    pub fn var(&self) -> Option<&Variable> {
        self.var.as_ref()
    }

    pub fn is_variable(&self) -> bool {
        self.var.is_some()
    }

    /// Bit positions of the admissible symbols
    pub fn indices(&self) -> impl Iterator<Item = u8> + '_ {
        (0..self.width).filter(move |i| self.bits & (1u128 << i) != 0)
    }

    fn mask(&self) -> u128 {
        if self.width as usize >= MAX_SYMBOLS {
            u128::MAX
        } else {
            (1u128 << self.width) - 1
        }
    }

    fn flags(&self, not: bool) -> u128 {
        if not { !self.bits & self.mask() } else { self.bits }
    }

    pub fn overlaps(&self, not: bool, other: &SymbolicValue, not_other: bool) -> bool {
        self.flags(not) & other.flags(not_other) != 0
    }

    pub fn intersect_with(&mut self, not: bool, other: &SymbolicValue, not_other: bool) {
        self.bits = self.flags(not) & other.flags(not_other);
    }

    pub fn union_with(&mut self, not: bool, other: &SymbolicValue, not_other: bool) {
        self.bits = self.flags(not) | other.flags(not_other);
    }

    pub fn except_with(&mut self, not: bool, other: &SymbolicValue, not_other: bool) {
        self.bits = self.flags(not) & !other.flags(not_other) & self.mask();
    }

    pub fn is_superset_of(&self, not: bool, other: &SymbolicValue, not_other: bool) -> bool {
        let o = other.flags(not_other);
        self.flags(not) & o == o
    }

    /// Variables flip their agreement flag; sets are complemented within the feature
    pub fn negation(&self) -> SymbolicValue {
        match &self.var {
            Some(var) => Self {
                var: Some(Variable {
                    name: var.name.clone(),
                    agree: !var.agree,
                }),
                ..self.clone()
            },
            None => Self {
                bits: self.flags(true),
                ..self.clone()
            },
        }
    }

    /// The value a variable bound to `self` takes under the given agreement
    pub fn variable_value(&self, agree: bool) -> SymbolicValue {
        if agree { self.clone() } else { self.negation() }
    }

    pub fn is_satisfiable(&self) -> bool {
        self.var.is_some() || self.bits != 0
    }

    /// True if every symbol is admissible, i.e. the value constrains nothing
    pub fn is_uninstantiated(&self) -> bool {
        self.var.is_none() && self.bits == self.mask()
    }

    /// Destructive unification against `other`; may record bindings
    pub(crate) fn unify(&mut self, other: &SymbolicValue, bindings: &mut VariableBindings) -> bool {
        match (&self.var, &other.var) {
            (None, None) => {
                if !self.overlaps(false, other, false) {
                    return false;
                }
                self.intersect_with(false, other, false);
            }
            (Some(var), None) => {
                let var = var.clone();
                match bindings.get(&var.name).cloned() {
                    Some(binding) => {
                        if !binding.overlaps(!var.agree, other, false) {
                            return false;
                        }
                        self.union_with(false, &binding, !var.agree);
                        self.intersect_with(false, other, false);
                    }
                    None => {
                        self.union_with(false, other, false);
                        bindings.bind(&var.name, other.variable_value(var.agree));
                    }
                }
                self.var = None;
            }
            (None, Some(other_var)) => match bindings.get(&other_var.name).cloned() {
                Some(binding) => {
                    if !self.overlaps(false, &binding, !other_var.agree) {
                        return false;
                    }
                    self.intersect_with(false, &binding, !other_var.agree);
                }
                None => {
                    bindings.bind(&other_var.name, self.variable_value(other_var.agree));
                }
            },
            (Some(var), Some(other_var)) => {
                if var != other_var {
                    return false;
                }
            }
        }
        true
    }

    /// Union used by [`FeatureStruct::union`](crate::FeatureStruct::union);
    /// returns false when the result no longer constrains anything
    pub(crate) fn merge(&mut self, other: &SymbolicValue, bindings: &mut VariableBindings) -> bool {
        match (&self.var, &other.var) {
            (None, None) => self.union_with(false, other, false),
            (Some(var), None) => {
                let var = var.clone();
                match bindings.get(&var.name).cloned() {
                    Some(binding) => {
                        self.union_with(false, &binding, !var.agree);
                        self.union_with(false, other, false);
                    }
                    None => {
                        self.union_with(false, other, false);
                        bindings.bind(&var.name, other.variable_value(var.agree));
                    }
                }
                self.var = None;
            }
            (None, Some(other_var)) => match bindings.get(&other_var.name).cloned() {
                Some(binding) => self.union_with(false, &binding, !other_var.agree),
                None => bindings.bind(&other_var.name, self.variable_value(other_var.agree)),
            },
            // a disjunction of two different variables is unconstrained
            (Some(var), Some(other_var)) => return var == other_var,
        }
        !self.is_uninstantiated()
    }

    /// Remove what `other` asserts; returns false when nothing admissible is left
    pub(crate) fn subtract(&mut self, other: &SymbolicValue, bindings: &VariableBindings) -> bool {
        match (&self.var, &other.var) {
            (None, None) => self.except_with(false, other, false),
            (Some(var), None) => {
                if let Some(binding) = bindings.get(&var.name).cloned() {
                    let agree = var.agree;
                    self.union_with(false, &binding, !agree);
                    self.except_with(false, other, false);
                    self.var = None;
                }
            }
            (None, Some(other_var)) => {
                if let Some(binding) = bindings.get(&other_var.name) {
                    self.except_with(false, binding, !other_var.agree);
                }
            }
            (Some(_), Some(_)) => {}
        }
        self.is_satisfiable()
    }

    /// True if every symbol admissible in `other` is admissible in `self`
    pub(crate) fn subsumes(&self, other: &SymbolicValue, bindings: &mut VariableBindings) -> bool {
        match (&self.var, &other.var) {
            (None, None) => self.is_superset_of(false, other, false),
            (Some(var), None) => match bindings.get(&var.name) {
                Some(binding) => binding.is_superset_of(!var.agree, other, false),
                None => {
                    bindings.bind(&var.name, other.variable_value(var.agree));
                    true
                }
            },
            (None, Some(other_var)) => match bindings.get(&other_var.name) {
                Some(binding) => self.is_superset_of(false, binding, !other_var.agree),
                None => false,
            },
            (Some(var), Some(other_var)) => var == other_var,
        }
    }

    /// Resolve a bound variable in place; returns true if it was resolved
    pub(crate) fn resolve(&mut self, bindings: &VariableBindings) -> bool {
        let resolved = match &self.var {
            Some(var) => bindings.get(&var.name).map(|b| b.variable_value(var.agree)),
            None => None,
        };
        match resolved {
            Some(value) => {
                *self = value;
                true
            }
            None => false,
        }
    }
}
