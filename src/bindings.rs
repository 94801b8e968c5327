//! Variable bindings threaded through one unification or matching episode

use std::hash::{Hash, Hasher};

use rustc_hash::FxHashMap;

use crate::symbolic::SymbolicValue;

/// Map from variable name to the concrete value it was bound to
///
/// A name is bound at most once per episode; operations that may fail work
/// on a clone and [`replace`](VariableBindings::replace) the original on
/// success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableBindings {
    values: FxHashMap<String, SymbolicValue>,
}

// hashed in name order, so equal maps hash alike
impl Hash for VariableBindings {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut entries: Vec<_> = self.values.iter().collect();
        entries.sort_unstable_by_key(|(name, _)| *name);
        entries.hash(state);
    }
}

impl VariableBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&SymbolicValue> {
        self.values.get(name)
    }

    /// Value a variable with this name takes under the given agreement
    pub fn get_value(&self, name: &str, agree: bool) -> Option<SymbolicValue> {
        self.values.get(name).map(|v| v.variable_value(agree))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Bind `name`; an existing binding is left untouched
    pub fn bind(&mut self, name: &str, value: SymbolicValue) {
        self.values.entry(name.to_string()).or_insert(value);
    }

    /// Overwrite every binding with those of `other`
    pub fn replace(&mut self, other: VariableBindings) {
        self.values = other.values;
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SymbolicValue)> + '_ {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_system::FeatureSystem;

    #[test]
    fn test_equal_bindings_hash_alike() {
        use rustc_hash::FxHashSet;
        let mut sys = FeatureSystem::new();
        sys.add_symbolic("a", &["a+", "a-"]).unwrap();
        sys.add_symbolic("b", &["b+", "b-"]).unwrap();
        let a = sys.value_of(&["a+"]).unwrap();
        let b = sys.value_of(&["b-"]).unwrap();

        let mut first = VariableBindings::new();
        first.bind("x", a.clone());
        first.bind("y", b.clone());
        let mut second = VariableBindings::new();
        second.bind("y", b);
        second.bind("x", a);

        let mut set = FxHashSet::default();
        set.insert(first);
        assert!(!set.insert(second));
    }

    #[test]
    fn test_bind_is_write_once() {
        let mut sys = FeatureSystem::new();
        sys.add_symbolic("a", &["a+", "a-"]).unwrap();
        let plus = sys.value_of(&["a+"]).unwrap();
        let minus = sys.value_of(&["a-"]).unwrap();

        let mut bindings = VariableBindings::new();
        assert!(bindings.is_empty());
        bindings.bind("x", plus.clone());
        bindings.bind("x", minus.clone());
        assert_eq!(bindings.get("x"), Some(&plus));
        assert_eq!(bindings.get_value("x", false), Some(minus.clone()));
        assert_eq!(bindings.len(), 1);
        assert!(bindings.contains("x"));
        assert!(!bindings.contains("y"));
    }

    #[test]
    fn test_replace() {
        let mut sys = FeatureSystem::new();
        sys.add_symbolic("a", &["a+", "a-"]).unwrap();
        let mut bindings = VariableBindings::new();
        let mut scratch = bindings.clone();
        scratch.bind("x", sys.value_of(&["a-"]).unwrap());
        assert!(bindings.is_empty());
        bindings.replace(scratch);
        assert_eq!(bindings.iter().count(), 1);
    }
}
