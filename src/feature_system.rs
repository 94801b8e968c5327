//! Feature catalog
//!
//! A [`FeatureSystem`] declares the symbolic and complex features a grammar
//! may use. Symbol names are global: `"cons+"` identifies both the symbol
//! and the feature it belongs to. The catalog is built once and frozen.

use rustc_hash::FxHashMap;

use crate::error::FeatureError;
use crate::symbolic::{MAX_SYMBOLS, SymbolicValue};

/// Index of a feature within its system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId(pub(crate) u32);

impl FeatureId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a symbol within its system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub(crate) u32);

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureKind {
    /// Enumerated feature; `symbols` are in declaration order
    Symbolic {
        symbols: Vec<SymbolId>,
        default: Option<SymbolicValue>,
    },
    /// Feature whose value is a nested feature structure
    Complex,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub id: FeatureId,
    pub name: String,
    pub kind: FeatureKind,
}

impl Feature {
    pub fn is_symbolic(&self) -> bool {
        matches!(self.kind, FeatureKind::Symbolic { .. })
    }

    /// Number of symbols (0 for complex features)
    pub fn width(&self) -> usize {
        match &self.kind {
            FeatureKind::Symbolic { symbols, .. } => symbols.len(),
            FeatureKind::Complex => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub id: SymbolId,
    pub name: String,
    /// Owning feature
    pub feature: FeatureId,
    /// Bit position within the owning feature
    pub index: u8,
}

/// Default values of symbolic features, consulted when matching with defaults
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defaults {
    values: FxHashMap<FeatureId, SymbolicValue>,
}

impl Defaults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, feature: FeatureId) -> Option<&SymbolicValue> {
        self.values.get(&feature)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &SymbolicValue)> + '_ {
        self.values.iter().map(|(f, v)| (*f, v))
    }
}

/// Catalog of features and symbols
#[derive(Debug, Clone, Default)]
pub struct FeatureSystem {
    features: Vec<Feature>,
    symbols: Vec<Symbol>,
    feature_names: FxHashMap<String, FeatureId>,
    symbol_names: FxHashMap<String, SymbolId>,
    frozen: bool,
}

impl FeatureSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a symbolic feature with its admissible symbols
    pub fn add_symbolic(&mut self, name: &str, symbols: &[&str]) -> Result<FeatureId, FeatureError> {
        self.add_symbolic_impl(name, symbols, None)
    }

    /// Declare a symbolic feature whose value defaults to `default` when absent
    pub fn add_symbolic_with_default(
        &mut self,
        name: &str,
        symbols: &[&str],
        default: &str,
    ) -> Result<FeatureId, FeatureError> {
        self.add_symbolic_impl(name, symbols, Some(default))
    }

    fn add_symbolic_impl(
        &mut self,
        name: &str,
        symbols: &[&str],
        default: Option<&str>,
    ) -> Result<FeatureId, FeatureError> {
        self.check_name(name)?;
        if symbols.len() > MAX_SYMBOLS {
            return Err(FeatureError::TooManySymbols {
                feature: name.to_string(),
                count: symbols.len(),
                max: MAX_SYMBOLS,
            });
        }
        for (i, sym) in symbols.iter().enumerate() {
            if self.symbol_names.contains_key(*sym) || symbols[..i].contains(sym) {
                return Err(FeatureError::DuplicateName(sym.to_string()));
            }
        }

        let id = FeatureId(self.features.len() as u32);
        let mut ids = Vec::with_capacity(symbols.len());
        for (index, sym) in symbols.iter().enumerate() {
            let sym_id = SymbolId(self.symbols.len() as u32);
            self.symbols.push(Symbol {
                id: sym_id,
                name: sym.to_string(),
                feature: id,
                index: index as u8,
            });
            self.symbol_names.insert(sym.to_string(), sym_id);
            ids.push(sym_id);
        }

        let default = match default {
            Some(sym) => {
                let index = symbols
                    .iter()
                    .position(|s| s == &sym)
                    .ok_or_else(|| FeatureError::UnknownSymbol(sym.to_string()))?;
                Some(SymbolicValue::from_bits(id, symbols.len(), 1u128 << index))
            }
            None => None,
        };

        self.features.push(Feature {
            id,
            name: name.to_string(),
            kind: FeatureKind::Symbolic {
                symbols: ids,
                default,
            },
        });
        self.feature_names.insert(name.to_string(), id);
        Ok(id)
    }

    /// Declare a complex feature
    pub fn add_complex(&mut self, name: &str) -> Result<FeatureId, FeatureError> {
        self.check_name(name)?;
        let id = FeatureId(self.features.len() as u32);
        self.features.push(Feature {
            id,
            name: name.to_string(),
            kind: FeatureKind::Complex,
        });
        self.feature_names.insert(name.to_string(), id);
        Ok(id)
    }

    fn check_name(&self, name: &str) -> Result<(), FeatureError> {
        if self.frozen {
            return Err(FeatureError::SystemFrozen);
        }
        if self.feature_names.contains_key(name) {
            return Err(FeatureError::DuplicateName(name.to_string()));
        }
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn feature(&self, id: FeatureId) -> &Feature {
        &self.features[id.index()]
    }

    pub fn features(&self) -> impl Iterator<Item = &Feature> + '_ {
        self.features.iter()
    }

    pub fn feature_by_name(&self, name: &str) -> Result<&Feature, FeatureError> {
        self.feature_names
            .get(name)
            .map(|id| &self.features[id.index()])
            .ok_or_else(|| FeatureError::UnknownFeature(name.to_string()))
    }

    pub fn symbol_by_name(&self, name: &str) -> Result<&Symbol, FeatureError> {
        self.symbol_names
            .get(name)
            .map(|id| &self.symbols[id.0 as usize])
            .ok_or_else(|| FeatureError::UnknownSymbol(name.to_string()))
    }

    /// Name of the symbol at bit `index` of `feature`
    pub fn symbol_name(&self, feature: FeatureId, index: u8) -> Option<&str> {
        match &self.feature(feature).kind {
            FeatureKind::Symbolic { symbols, .. } => symbols
                .get(index as usize)
                .map(|id| self.symbols[id.0 as usize].name.as_str()),
            FeatureKind::Complex => None,
        }
    }

    /// Build a symbol-set value from symbol names, all of one feature
    pub fn value_of(&self, names: &[&str]) -> Result<SymbolicValue, FeatureError> {
        let mut feature: Option<(FeatureId, &str)> = None;
        let mut bits = 0u128;
        for name in names {
            let sym = self.symbol_by_name(name)?;
            match feature {
                Some((f, first)) if f != sym.feature => {
                    return Err(FeatureError::MixedFeatures(first.to_string(), name.to_string()));
                }
                None => feature = Some((sym.feature, name)),
                _ => {}
            }
            bits |= 1u128 << sym.index;
        }
        let (feature, _) = feature.ok_or_else(|| FeatureError::UnknownSymbol(String::new()))?;
        Ok(SymbolicValue::from_bits(feature, self.feature(feature).width(), bits))
    }

    /// Build an unresolved variable on a symbolic feature
    pub fn variable(&self, feature: &str, name: &str, agree: bool) -> Result<SymbolicValue, FeatureError> {
        let feat = self.feature_by_name(feature)?;
        if !feat.is_symbolic() {
            return Err(FeatureError::NotSymbolic(feature.to_string()));
        }
        Ok(SymbolicValue::variable(feat.id, feat.width(), name, agree))
    }

    /// Collect declared default values
    pub fn defaults(&self) -> Defaults {
        let values = self
            .features
            .iter()
            .filter_map(|f| match &f.kind {
                FeatureKind::Symbolic {
                    default: Some(value),
                    ..
                } => Some((f.id, value.clone())),
                _ => None,
            })
            .collect();
        Defaults { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declare_and_lookup() {
        let mut sys = FeatureSystem::new();
        let voice = sys.add_symbolic("voice", &["voice+", "voice-"]).unwrap();
        let cx = sys.add_complex("head").unwrap();
        sys.freeze();

        assert_eq!(sys.feature_by_name("voice").unwrap().id, voice);
        assert_eq!(sys.feature_by_name("head").unwrap().id, cx);
        let sym = sys.symbol_by_name("voice-").unwrap();
        assert_eq!(sym.feature, voice);
        assert_eq!(sym.index, 1);
        assert_eq!(sys.symbol_name(voice, 0), Some("voice+"));
        assert_eq!(sys.feature(voice).width(), 2);
        assert_eq!(sys.feature(cx).width(), 0);
    }

    #[test]
    fn test_frozen_rejects_declarations() {
        let mut sys = FeatureSystem::new();
        sys.add_complex("cx").unwrap();
        sys.freeze();
        assert_eq!(sys.add_complex("cx2"), Err(FeatureError::SystemFrozen));
    }

    #[test]
    fn test_duplicate_names() {
        let mut sys = FeatureSystem::new();
        sys.add_symbolic("a", &["a1", "a2"]).unwrap();
        assert!(matches!(sys.add_symbolic("a", &["x"]), Err(FeatureError::DuplicateName(_))));
        assert!(matches!(sys.add_symbolic("b", &["a1"]), Err(FeatureError::DuplicateName(_))));
        assert!(matches!(
            sys.add_symbolic("c", &["c1", "c1"]),
            Err(FeatureError::DuplicateName(_))
        ));
    }

    #[test]
    fn test_value_of_mixed_features() {
        let mut sys = FeatureSystem::new();
        sys.add_symbolic("a", &["a1", "a2"]).unwrap();
        sys.add_symbolic("b", &["b1", "b2"]).unwrap();
        assert!(sys.value_of(&["a1", "a2"]).is_ok());
        assert!(matches!(
            sys.value_of(&["a1", "b1"]),
            Err(FeatureError::MixedFeatures(_, _))
        ));
        assert!(matches!(sys.value_of(&["zz"]), Err(FeatureError::UnknownSymbol(_))));
    }

    #[test]
    fn test_defaults() {
        let mut sys = FeatureSystem::new();
        let a = sys.add_symbolic_with_default("a", &["a+", "a-"], "a-").unwrap();
        sys.add_symbolic("b", &["b+", "b-"]).unwrap();
        let defaults = sys.defaults();
        assert_eq!(defaults.iter().count(), 1);
        assert_eq!(defaults.get(a), Some(&sys.value_of(&["a-"]).unwrap()));
    }
}
