//! Feature-structure notation parser
//!
//! Reads the bracketed notation printed by [`FeatureStruct::display`], so
//! structures can be written as text in rule definitions and tests:
//!
//! ```text
//! [cons:cons+, place:{lab, cor}, head:1=[agr:$a], spec:<1>]
//! ```
//!
//! `N=` tags the following value and `<N>` re-enters it; `$x` and `!$x` are
//! agreeing and negated variables; `ANY` is the empty structure.

use pest::Parser;
use pest::iterators::Pair;
use pest_derive::Parser;
use rustc_hash::FxHashMap;

use crate::error::{FeatureError, NotationError};
use crate::feature_struct::{FeatureStruct, Node, NodeId};
use crate::feature_system::{Feature, FeatureId, FeatureSystem};

#[derive(Parser)]
#[grammar = "notation.pest"]
struct NotationParser;

/// Parse a feature structure written against `system`
pub fn parse_feature_struct(system: &FeatureSystem, input: &str) -> Result<FeatureStruct, NotationError> {
    let mut pairs = NotationParser::parse(Rule::feature_struct, input).map_err(Box::new)?;
    let Some(top) = pairs.next() else {
        return Err(malformed("empty input"));
    };
    let Some(root) = top.into_inner().next() else {
        return Err(malformed("expected a feature structure"));
    };

    let mut reader = Reader {
        system,
        nodes: Vec::new(),
        tags: FxHashMap::default(),
        refs: Vec::new(),
    };
    reader.structure(root)?;

    for (parent, feature, tag) in std::mem::take(&mut reader.refs) {
        let target = *reader
            .tags
            .get(&tag)
            .ok_or(FeatureError::UndefinedReentrancy(tag))?;
        if let Node::Complex(children) = &mut reader.nodes[parent] {
            children.insert(feature, target);
        }
    }

    let mut fs = FeatureStruct::from_nodes(reader.nodes);
    fs.compact();
    Ok(fs)
}

fn malformed(message: &str) -> NotationError {
    NotationError::Malformed(message.to_string())
}

struct Reader<'s> {
    system: &'s FeatureSystem,
    nodes: Vec<Node>,
    tags: FxHashMap<u32, NodeId>,
    refs: Vec<(NodeId, FeatureId, u32)>,
}

impl Reader<'_> {
    fn push(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn structure(&mut self, pair: Pair<'_, Rule>) -> Result<NodeId, NotationError> {
        let id = self.push(Node::empty());
        for entry in pair.into_inner().filter(|p| p.as_rule() == Rule::entry) {
            let mut inner = entry.into_inner();
            let (Some(name), Some(value)) = (inner.next(), inner.next()) else {
                return Err(malformed("expected feature:value"));
            };
            let system = self.system;
            let feature = system.feature_by_name(name.as_str())?;

            let Some(value) = value.into_inner().next() else {
                return Err(malformed("expected a value"));
            };
            let child = match value.as_rule() {
                Rule::reference => {
                    let tag = parse_tag(value.into_inner().next())?;
                    self.refs.push((id, feature.id, tag));
                    continue;
                }
                Rule::tagged => {
                    let mut inner = value.into_inner();
                    let tag = parse_tag(inner.next())?;
                    let Some(body) = inner.next() else {
                        return Err(malformed("expected a value after tag"));
                    };
                    let child = self.body(feature, body)?;
                    self.tags.insert(tag, child);
                    child
                }
                _ => self.body(feature, value)?,
            };
            if let Node::Complex(children) = &mut self.nodes[id] {
                children.insert(feature.id, child);
            }
        }
        Ok(id)
    }

    fn body(&mut self, feature: &Feature, pair: Pair<'_, Rule>) -> Result<NodeId, NotationError> {
        let Some(inner) = pair.into_inner().next() else {
            return Err(malformed("expected a value"));
        };
        match inner.as_rule() {
            Rule::structure => {
                if feature.is_symbolic() {
                    return Err(FeatureError::NotComplex(feature.name.clone()).into());
                }
                self.structure(inner)
            }
            Rule::set => {
                let names: Vec<&str> = inner.into_inner().map(|p| p.as_str()).collect();
                self.symbols(feature, &names)
            }
            Rule::variable => {
                let mut agree = true;
                let mut var = None;
                for part in inner.into_inner() {
                    match part.as_rule() {
                        Rule::negation => agree = false,
                        _ => var = Some(part.as_str()),
                    }
                }
                let Some(var) = var else {
                    return Err(malformed("expected a variable name"));
                };
                let value = self.system.variable(&feature.name, var, agree)?;
                Ok(self.push(Node::Symbolic(value)))
            }
            _ => self.symbols(feature, &[inner.as_str()]),
        }
    }

    fn symbols(&mut self, feature: &Feature, names: &[&str]) -> Result<NodeId, NotationError> {
        if !feature.is_symbolic() {
            return Err(FeatureError::NotSymbolic(feature.name.clone()).into());
        }
        let value = self.system.value_of(names)?;
        if value.feature() != feature.id {
            return Err(FeatureError::MixedFeatures(feature.name.clone(), names[0].to_string()).into());
        }
        Ok(self.push(Node::Symbolic(value)))
    }
}

fn parse_tag(pair: Option<Pair<'_, Rule>>) -> Result<u32, NotationError> {
    pair.and_then(|p| p.as_str().parse().ok())
        .ok_or_else(|| malformed("expected a numeric tag"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> FeatureSystem {
        let mut sys = FeatureSystem::new();
        sys.add_complex("cx1").unwrap();
        sys.add_complex("cx2").unwrap();
        sys.add_symbolic("a", &["a1", "a2", "a3"]).unwrap();
        sys.add_symbolic("b", &["b+", "b-"]).unwrap();
        sys.freeze();
        sys
    }

    fn round_trip(sys: &FeatureSystem, text: &str) {
        let fs = parse_feature_struct(sys, text).unwrap();
        assert_eq!(fs.display(sys).to_string(), text);
    }

    // ===== Round trips =====

    #[test]
    fn test_parse_flat() {
        let sys = system();
        round_trip(&sys, "ANY");
        round_trip(&sys, "[a:a1]");
        round_trip(&sys, "[a:{a1, a3}, b:b-]");
    }

    #[test]
    fn test_parse_reentrancy() {
        let sys = system();
        round_trip(&sys, "[cx1:1=[a:a1], cx2:<1>]");
        round_trip(&sys, "[cx1:1=[a:a2, cx2:<1>]]");
        round_trip(&sys, "[cx1:[a:1=a1], cx2:[a:<1>]]");

        let fs = parse_feature_struct(&sys, "[cx1:1=[a:a1], cx2:<1>]").unwrap();
        let cx1 = sys.feature_by_name("cx1").unwrap().id;
        let cx2 = sys.feature_by_name("cx2").unwrap().id;
        assert_eq!(fs.node_at(&[cx1]), fs.node_at(&[cx2]));
    }

    #[test]
    fn test_parse_variables() {
        let sys = system();
        round_trip(&sys, "[a:!$x, b:$y]");
        let fs = parse_feature_struct(&sys, "[b:$y]").unwrap();
        assert!(fs.has_variables());
    }

    #[test]
    fn test_parse_whitespace_and_empty_complex() {
        let sys = system();
        let fs = parse_feature_struct(&sys, "  [ cx1 : ANY ,a : { a2 , a1 } ] ").unwrap();
        assert_eq!(fs.display(&sys).to_string(), "[a:{a1, a2}, cx1:ANY]");
    }

    #[test]
    fn test_parse_equals_builder() {
        let sys = system();
        let parsed = parse_feature_struct(&sys, "[cx1:1=[a:a1], cx2:<1>]").unwrap();
        let built = FeatureStruct::builder(&sys)
            .tagged_complex("cx1", 1, |b| b.symbol("a1"))
            .reference("cx2", 1)
            .build()
            .unwrap();
        assert_eq!(parsed, built);
    }

    // ===== Errors =====

    #[test]
    fn test_parse_errors() {
        let sys = system();
        assert!(matches!(
            parse_feature_struct(&sys, "[a:a1"),
            Err(NotationError::Parse(_))
        ));
        assert!(matches!(
            parse_feature_struct(&sys, "[zz:a1]"),
            Err(NotationError::Feature(FeatureError::UnknownFeature(_)))
        ));
        assert!(matches!(
            parse_feature_struct(&sys, "[a:zz]"),
            Err(NotationError::Feature(FeatureError::UnknownSymbol(_)))
        ));
        assert!(matches!(
            parse_feature_struct(&sys, "[a:b+]"),
            Err(NotationError::Feature(FeatureError::MixedFeatures(_, _)))
        ));
        assert!(matches!(
            parse_feature_struct(&sys, "[a:[b:b+]]"),
            Err(NotationError::Feature(FeatureError::NotComplex(_)))
        ));
        assert!(matches!(
            parse_feature_struct(&sys, "[cx1:a1]"),
            Err(NotationError::Feature(FeatureError::NotSymbolic(_)))
        ));
        assert!(matches!(
            parse_feature_struct(&sys, "[cx1:<3>]"),
            Err(NotationError::Feature(FeatureError::UndefinedReentrancy(3)))
        ));
    }
}
