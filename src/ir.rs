//! Intermediate representation shared by the compiler and the DAG layer.
//!
//! A [`Primitive`] is a leaf predicate over one event field. Primitives are
//! deduplicated globally by content during compilation, so a predicate reused
//! by many rules is represented (and later evaluated) exactly once.

use std::collections::HashMap;

/// Dense identifier assigned to a deduplicated primitive in allocation order.
pub type PrimitiveId = u32;

/// Dense identifier assigned to a compiled rule in allocation order.
pub type RuleId = u32;

/// A leaf field-matching predicate.
///
/// Two primitives are equal iff `field`, `match_type`, `values` and
/// `modifiers` are all equal; that equality is the unit of deduplication.
/// Multiple `values` are ORed by the matcher.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Primitive {
    /// Dotted path of the event field this predicate reads.
    pub field: String,
    /// Match-type name resolved against the matcher registry (`equals`,
    /// `contains`, `regex`, ...).
    pub match_type: String,
    /// Values to match against, ORed together.
    pub values: Vec<String>,
    /// Ordered modifier names applied to the field value before matching.
    pub modifiers: Vec<String>,
}

impl Primitive {
    pub fn new(
        field: String,
        match_type: String,
        values: Vec<String>,
        modifiers: Vec<String>,
    ) -> Self {
        Self {
            field,
            match_type,
            values,
            modifiers,
        }
    }

    /// Convenience constructor from string slices, used heavily in tests.
    pub fn from_strs(field: &str, match_type: &str, values: &[&str], modifiers: &[&str]) -> Self {
        Self {
            field: field.to_string(),
            match_type: match_type.to_string(),
            values: values.iter().map(|&v| v.to_string()).collect(),
            modifiers: modifiers.iter().map(|&m| m.to_string()).collect(),
        }
    }

    /// Canonical dedup key: the four attributes joined with `|`.
    ///
    /// Equivalent to the derived equality; kept for diagnostics and for
    /// callers that want a stable string form.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.field,
            self.match_type,
            self.values.join("|"),
            self.modifiers.join("|")
        )
    }
}

/// One successfully compiled rule: its selections, condition and metadata.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Dense engine-assigned identifier.
    pub rule_id: RuleId,
    /// The `id:` string from the rule document, if any.
    pub source_id: Option<String>,
    /// The `title:` string from the rule document.
    pub title: String,
    /// Selection name to the ordered primitive IDs that selection produced.
    pub selections: HashMap<String, Vec<PrimitiveId>>,
    /// The raw condition expression.
    pub condition: String,
}

/// The output of compilation: deduplicated primitives plus per-rule data.
#[derive(Debug, Clone, Default)]
pub struct CompiledRuleset {
    /// All unique primitives, indexable by `PrimitiveId`.
    pub primitives: Vec<Primitive>,
    /// Reverse map used for dedup lookups.
    pub primitive_map: HashMap<Primitive, PrimitiveId>,
    /// Successfully compiled rules in `RuleId` order.
    pub rules: Vec<CompiledRule>,
}

impl CompiledRuleset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn get_primitive(&self, id: PrimitiveId) -> Option<&Primitive> {
        self.primitives.get(id as usize)
    }

    pub fn get_rule(&self, id: RuleId) -> Option<&CompiledRule> {
        self.rules.get(id as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_equality_is_content_based() {
        let a = Primitive::from_strs("EventID", "equals", &["4624"], &[]);
        let b = Primitive::from_strs("EventID", "equals", &["4624"], &[]);
        let c = Primitive::from_strs("EventID", "equals", &["4625"], &[]);
        let d = Primitive::from_strs("EventID", "equals", &["4624"], &["lowercase"]);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let mut map = HashMap::new();
        map.insert(a.clone(), 0u32);
        map.insert(b.clone(), 1u32);
        map.insert(c.clone(), 2u32);
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&a), Some(&1));
    }

    #[test]
    fn test_primitive_value_order_matters() {
        let a = Primitive::from_strs("User", "equals", &["root", "admin"], &[]);
        let b = Primitive::from_strs("User", "equals", &["admin", "root"], &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_primitive_key() {
        let p = Primitive::from_strs("CommandLine", "contains", &["curl", "wget"], &["lowercase"]);
        assert_eq!(p.key(), "CommandLine|contains|curl|wget|lowercase");
    }

    #[test]
    fn test_ruleset_lookup() {
        let mut ruleset = CompiledRuleset::new();
        let prim = Primitive::from_strs("EventID", "equals", &["1"], &[]);
        ruleset.primitive_map.insert(prim.clone(), 0);
        ruleset.primitives.push(prim.clone());
        ruleset.rules.push(CompiledRule {
            rule_id: 0,
            source_id: Some("aaaa-bbbb".to_string()),
            title: "Process Creation".to_string(),
            selections: HashMap::from([("sel".to_string(), vec![0])]),
            condition: "sel".to_string(),
        });

        assert_eq!(ruleset.primitive_count(), 1);
        assert_eq!(ruleset.rule_count(), 1);
        assert_eq!(ruleset.get_primitive(0), Some(&prim));
        assert!(ruleset.get_primitive(1).is_none());
        assert_eq!(ruleset.get_rule(0).unwrap().title, "Process Creation");
        assert!(ruleset.get_rule(1).is_none());
    }
}
