//! Literal prefiltering.
//!
//! At build time the prefilter collects the literal values of every
//! string-matching primitive. At evaluation time it checks whether the
//! event contains at least one of those literals; if not, no primitive of a
//! literal match type can be true and the whole evaluation is skipped.
//!
//! The prefilter only claims soundness when every primitive contributed a
//! pattern: one unrepresentable primitive (regex, cidr, transforms applied
//! before matching) yields an empty prefilter, which callers treat as
//! disabled.

use crate::error::{Result, SigmaError};
use crate::ir::Primitive;
use aho_corasick::AhoCorasick;
use serde_json::Value;

/// Below this many patterns a linear scan beats automaton construction.
const AHO_CORASICK_THRESHOLD: usize = 8;

/// Modifier names that only flag matcher behavior and leave the value as it
/// appears in the event.
const FLAG_MODIFIERS: &[&str] = &["case_sensitive"];

#[derive(Debug)]
enum MatchStrategy {
    /// Multi-pattern automaton for large pattern sets.
    Automaton(AhoCorasick),
    /// Lowercased patterns scanned one by one.
    SimpleSet(Vec<String>),
}

/// Summary of what the prefilter covers.
#[derive(Debug, Clone, Default)]
pub struct PrefilterStats {
    pub pattern_count: usize,
    /// Primitives that contributed at least one pattern.
    pub covered_primitives: usize,
    pub total_primitives: usize,
    pub strategy: &'static str,
}

impl PrefilterStats {
    /// The prefilter is only usable when it represents every primitive.
    pub fn is_complete(&self) -> bool {
        self.pattern_count > 0 && self.covered_primitives == self.total_primitives
    }
}

/// Compile-time literal gate over a set of primitives.
#[derive(Debug)]
pub struct LiteralPrefilter {
    strategy: MatchStrategy,
    stats: PrefilterStats,
}

impl LiteralPrefilter {
    /// Build from the ruleset's primitives.
    ///
    /// Emits zero patterns (callers then skip prefiltering) unless every
    /// primitive has a literal representation in the raw event.
    pub fn from_primitives(primitives: &[Primitive]) -> Result<Self> {
        let mut patterns: Vec<String> = Vec::new();
        let mut covered = 0usize;

        for primitive in primitives {
            match Self::literal_patterns(primitive) {
                Some(literals) if !literals.is_empty() => {
                    covered += 1;
                    for literal in literals {
                        let lowered = literal.to_ascii_lowercase();
                        if !patterns.contains(&lowered) {
                            patterns.push(lowered);
                        }
                    }
                }
                _ => {}
            }
        }

        let complete = covered == primitives.len();
        if !complete {
            patterns.clear();
        }

        let stats = PrefilterStats {
            pattern_count: patterns.len(),
            covered_primitives: covered,
            total_primitives: primitives.len(),
            strategy: if patterns.len() >= AHO_CORASICK_THRESHOLD {
                "aho-corasick"
            } else {
                "simple-set"
            },
        };

        let strategy = if patterns.len() >= AHO_CORASICK_THRESHOLD {
            let automaton = AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(&patterns)
                .map_err(|e| {
                    SigmaError::CompilationError(format!("Prefilter construction failed: {e}"))
                })?;
            MatchStrategy::Automaton(automaton)
        } else {
            MatchStrategy::SimpleSet(patterns)
        };

        Ok(Self { strategy, stats })
    }

    /// Literal substrings guaranteed to appear in a matching event for this
    /// primitive, or `None` when the match type or modifiers defeat that
    /// guarantee.
    fn literal_patterns(primitive: &Primitive) -> Option<Vec<String>> {
        let transforms_value = primitive
            .modifiers
            .iter()
            .any(|m| !FLAG_MODIFIERS.contains(&m.as_str()));
        if transforms_value {
            return None;
        }
        match primitive.match_type.as_str() {
            "equals" | "contains" | "startswith" | "endswith" => Some(
                primitive
                    .values
                    .iter()
                    .filter(|v| !v.is_empty())
                    .cloned()
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn stats(&self) -> &PrefilterStats {
        &self.stats
    }

    pub fn pattern_count(&self) -> usize {
        self.stats.pattern_count
    }

    /// Whether any pattern occurs in any string or scalar of the event.
    pub fn matches(&self, event: &Value) -> Result<bool> {
        if self.stats.pattern_count == 0 {
            return Ok(true);
        }
        Ok(self.search_value(event))
    }

    /// Zero-copy variant: search the undecoded JSON text itself.
    pub fn matches_raw(&self, json: &str) -> Result<bool> {
        if self.stats.pattern_count == 0 {
            return Ok(true);
        }
        Ok(self.search_text(json))
    }

    fn search_value(&self, value: &Value) -> bool {
        match value {
            Value::String(s) => self.search_text(s),
            Value::Number(n) => self.search_text(&n.to_string()),
            Value::Bool(b) => self.search_text(if *b { "true" } else { "false" }),
            Value::Null => false,
            Value::Array(items) => items.iter().any(|item| self.search_value(item)),
            Value::Object(map) => map.values().any(|item| self.search_value(item)),
        }
    }

    fn search_text(&self, text: &str) -> bool {
        match &self.strategy {
            MatchStrategy::Automaton(automaton) => automaton.is_match(text),
            MatchStrategy::SimpleSet(patterns) => {
                let haystack = text.to_ascii_lowercase();
                patterns.iter().any(|pattern| haystack.contains(pattern))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn literal(field: &str, value: &str) -> Primitive {
        Primitive::from_strs(field, "equals", &[value], &[])
    }

    #[test]
    fn test_literal_collection() {
        let primitives = [
            literal("EventID", "4624"),
            Primitive::from_strs("CommandLine", "contains", &["mimikatz"], &[]),
        ];
        let prefilter = LiteralPrefilter::from_primitives(&primitives).unwrap();
        assert_eq!(prefilter.pattern_count(), 2);
        assert!(prefilter.stats().is_complete());
    }

    #[test]
    fn test_incomplete_coverage_disables_patterns() {
        let primitives = [
            literal("EventID", "4624"),
            Primitive::from_strs("Hash", "regex", &["[a-f0-9]{32}"], &[]),
        ];
        let prefilter = LiteralPrefilter::from_primitives(&primitives).unwrap();
        assert_eq!(prefilter.pattern_count(), 0);
        assert!(!prefilter.stats().is_complete());
        // With no patterns, everything passes through.
        assert!(prefilter.matches(&json!({"x": "y"})).unwrap());
    }

    #[test]
    fn test_transforming_modifiers_defeat_literals() {
        let primitives = [Primitive::from_strs(
            "Data",
            "contains",
            &["payload"],
            &["base64_decode"],
        )];
        let prefilter = LiteralPrefilter::from_primitives(&primitives).unwrap();
        assert_eq!(prefilter.pattern_count(), 0);
    }

    #[test]
    fn test_flag_modifiers_keep_literals() {
        let primitives = [Primitive::from_strs(
            "User",
            "equals",
            &["Admin"],
            &["case_sensitive"],
        )];
        let prefilter = LiteralPrefilter::from_primitives(&primitives).unwrap();
        assert_eq!(prefilter.pattern_count(), 1);
    }

    #[test]
    fn test_event_matching() {
        let primitives = [literal("EventID", "4624"), literal("User", "admin")];
        let prefilter = LiteralPrefilter::from_primitives(&primitives).unwrap();

        assert!(prefilter.matches(&json!({"EventID": "4624"})).unwrap());
        // Numbers are searched through their textual form.
        assert!(prefilter.matches(&json!({"EventID": 4624})).unwrap());
        // Case-insensitive.
        assert!(prefilter.matches(&json!({"User": "ADMIN"})).unwrap());
        // Nested and array values are searched.
        assert!(prefilter
            .matches(&json!({"a": {"b": ["x", "admin"]}}))
            .unwrap());
        assert!(!prefilter.matches(&json!({"EventID": "1111"})).unwrap());
    }

    #[test]
    fn test_raw_matching() {
        let primitives = [literal("User", "admin")];
        let prefilter = LiteralPrefilter::from_primitives(&primitives).unwrap();
        assert!(prefilter.matches_raw(r#"{"User": "ADMIN"}"#).unwrap());
        assert!(!prefilter.matches_raw(r#"{"User": "guest"}"#).unwrap());
    }

    #[test]
    fn test_automaton_strategy_above_threshold() {
        let primitives: Vec<Primitive> = (0..10)
            .map(|i| literal("F", &format!("pattern_value_{i}")))
            .collect();
        let prefilter = LiteralPrefilter::from_primitives(&primitives).unwrap();
        assert_eq!(prefilter.stats().strategy, "aho-corasick");
        assert!(prefilter
            .matches(&json!({"F": "xx pattern_value_7 yy"}))
            .unwrap());
        assert!(!prefilter.matches(&json!({"F": "nothing here"})).unwrap());
    }

    #[test]
    fn test_empty_primitives() {
        let prefilter = LiteralPrefilter::from_primitives(&[]).unwrap();
        assert_eq!(prefilter.pattern_count(), 0);
        assert!(prefilter.matches(&json!({"any": "event"})).unwrap());
    }
}
