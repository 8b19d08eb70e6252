//! SIGMA rule compiler.
//!
//! Turns rule documents into a [`CompiledRuleset`]: deduplicated primitives,
//! per-rule selection maps and validated condition strings. Compilation is
//! batch-friendly: one malformed rule is recorded in the result envelope and
//! skipped, the rest of the batch proceeds.
//!
//! Sub-modules:
//! - [`parser`] - condition tokenization and parsing
//! - [`field_mapping`] - field name normalization and taxonomy presets

pub mod field_mapping;
pub mod parser;

pub use field_mapping::FieldMapping;

use crate::config::EngineConfig;
use crate::error::{Result, SigmaError};
use crate::ir::{CompiledRule, CompiledRuleset, Primitive, PrimitiveId, RuleId};
use parser::{parse_condition, selection_matches_pattern, ConditionAst};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Deserialized shape of a SIGMA rule document.
///
/// Every field is optional at the serde level so that structural validation
/// (missing title, missing condition) produces engine errors instead of
/// opaque deserialization failures.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SigmaRule {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub modified: Option<String>,
    pub level: Option<String>,
    pub tags: Vec<String>,
    pub references: Vec<String>,
    pub logsource: Option<Value>,
    pub detection: Option<Value>,
    pub fields: Vec<String>,
    pub falsepositives: Vec<String>,
}

/// Compiler behavior switches, a subset of [`EngineConfig`].
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    pub enable_field_mapping: bool,
    pub enable_primitive_deduplication: bool,
    pub case_sensitive_fields: bool,
    /// Rules emitting more primitives than this get a warning, never an error.
    pub max_rule_complexity: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            enable_field_mapping: true,
            enable_primitive_deduplication: true,
            case_sensitive_fields: false,
            max_rule_complexity: 100,
        }
    }
}

impl From<&EngineConfig> for CompilerConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            enable_field_mapping: config.enable_field_mapping,
            enable_primitive_deduplication: config.enable_primitive_deduplication,
            case_sensitive_fields: config.case_sensitive_fields,
            max_rule_complexity: config.max_rule_complexity,
        }
    }
}

/// Aggregate counters for one compilation batch.
#[derive(Debug, Clone, Default)]
pub struct CompilationStatistics {
    pub total_rules: usize,
    pub successful_rules: usize,
    pub failed_rules: usize,
    /// Primitive references before deduplication.
    pub total_primitives: usize,
    /// Primitives actually allocated.
    pub unique_primitives: usize,
    pub duplicated_primitives: usize,
    pub total_selections: usize,
    pub complex_conditions: usize,
    pub average_complexity: f64,
    pub compilation_time_ms: u64,
}

/// A per-rule compilation failure in a batch result.
#[derive(Debug, Clone)]
pub struct CompilationError {
    /// The document's `id:` string, if present.
    pub rule_id: Option<String>,
    pub rule_title: String,
    /// Error discriminant, e.g. `"yaml"` or `"compilation"`.
    pub kind: String,
    pub message: String,
    pub field: Option<String>,
    pub line: Option<usize>,
}

/// A non-fatal observation made while compiling a rule.
#[derive(Debug, Clone)]
pub struct CompilationWarning {
    pub rule_id: Option<String>,
    pub rule_title: String,
    pub kind: String,
    pub message: String,
    pub field: Option<String>,
}

/// Result envelope of [`Compiler::compile_ruleset`].
#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub ruleset: CompiledRuleset,
    pub statistics: CompilationStatistics,
    pub errors: Vec<CompilationError>,
    pub warnings: Vec<CompilationWarning>,
}

/// The SIGMA rule compiler.
///
/// Holds the global primitive table so equal predicates from different rules
/// resolve to one `PrimitiveId`.
///
/// # Examples
///
/// ```
/// use sigma_dag::Compiler;
///
/// let mut compiler = Compiler::new();
/// let rule = r#"
/// title: Successful Logon
/// detection:
///     selection:
///         EventID: 4624
///     condition: selection
/// "#;
/// let rule_id = compiler.compile_rule(rule).unwrap();
/// assert_eq!(rule_id, 0);
/// assert_eq!(compiler.primitive_count(), 1);
/// ```
#[derive(Debug)]
pub struct Compiler {
    primitive_map: HashMap<Primitive, PrimitiveId>,
    primitives: Vec<Primitive>,
    rules: Vec<CompiledRule>,
    field_mapping: FieldMapping,
    config: CompilerConfig,
    /// Primitive references emitted before dedup, for statistics.
    primitive_refs: usize,
    selection_count: usize,
    complex_conditions: usize,
    warnings: Vec<CompilationWarning>,
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_config(CompilerConfig::default())
    }

    pub fn with_config(config: CompilerConfig) -> Self {
        let mut field_mapping = FieldMapping::new();
        field_mapping.set_case_sensitive(config.case_sensitive_fields);
        Self {
            primitive_map: HashMap::new(),
            primitives: Vec::new(),
            rules: Vec::new(),
            field_mapping,
            config,
            primitive_refs: 0,
            selection_count: 0,
            complex_conditions: 0,
            warnings: Vec::new(),
        }
    }

    pub fn with_field_mapping(field_mapping: FieldMapping) -> Self {
        let mut compiler = Self::new();
        compiler.set_field_mapping(field_mapping);
        compiler
    }

    pub fn set_field_mapping(&mut self, mut field_mapping: FieldMapping) {
        field_mapping.set_case_sensitive(self.config.case_sensitive_fields);
        self.field_mapping = field_mapping;
    }

    pub fn field_mapping(&self) -> &FieldMapping {
        &self.field_mapping
    }

    pub fn field_mapping_mut(&mut self) -> &mut FieldMapping {
        &mut self.field_mapping
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Compile one rule document, registering its primitives globally.
    ///
    /// Returns the dense `RuleId` assigned to the rule. A failed rule
    /// interns nothing; only warnings it produced before failing remain.
    pub fn compile_rule(&mut self, rule_yaml: &str) -> Result<RuleId> {
        let rule: SigmaRule = serde_yaml::from_str(rule_yaml)?;
        self.compile_parsed_rule(rule)
    }

    /// Compile an already-deserialized rule document.
    pub fn compile_parsed_rule(&mut self, rule: SigmaRule) -> Result<RuleId> {
        let title = rule
            .title
            .clone()
            .ok_or_else(|| SigmaError::CompilationError("Missing rule title".to_string()))?;

        let detection = rule.detection.as_ref().ok_or_else(|| {
            SigmaError::CompilationError("Missing detection section".to_string())
        })?;

        let detection_map = match detection {
            Value::Mapping(map) => map,
            _ => {
                return Err(SigmaError::CompilationError(
                    "Detection section must be a mapping".to_string(),
                ))
            }
        };

        let condition = Self::extract_condition(detection_map)?;

        // Stage every selection's primitives first; nothing is interned
        // until the whole rule validates, so a failed rule leaves the
        // global primitive table untouched.
        let mut staged: Vec<(String, Vec<Primitive>)> = Vec::new();
        for (key, value) in detection_map {
            let name = match key.as_str() {
                Some(name) => name,
                None => {
                    return Err(SigmaError::CompilationError(
                        "Selection names must be strings".to_string(),
                    ))
                }
            };
            if name == "condition" {
                continue;
            }
            let primitives = self.compile_selection(name, value, &rule, &title)?;
            staged.push((name.to_string(), primitives));
        }

        // Provisional IDs are enough for condition validation; only names
        // and arities matter to the parser.
        let provisional: HashMap<String, Vec<PrimitiveId>> = staged
            .iter()
            .map(|(name, primitives)| {
                (name.clone(), (0..primitives.len() as PrimitiveId).collect())
            })
            .collect();
        let ast = parse_condition(&condition, &provisional)?;
        self.validate_quantifiers(&ast, &provisional)?;
        Self::validate_regex_values(&staged)?;

        self.selection_count += staged.len();
        if Self::is_complex_condition(&ast) {
            self.complex_conditions += 1;
        }

        let rule_primitive_refs: usize =
            staged.iter().map(|(_, primitives)| primitives.len()).sum();
        if rule_primitive_refs > self.config.max_rule_complexity {
            self.warnings.push(CompilationWarning {
                rule_id: rule.id.clone(),
                rule_title: title.clone(),
                kind: "complexity".to_string(),
                message: format!(
                    "Rule emits {rule_primitive_refs} primitives, above the configured limit of {}",
                    self.config.max_rule_complexity
                ),
                field: None,
            });
        }

        let mut selections: HashMap<String, Vec<PrimitiveId>> = HashMap::new();
        for (name, primitives) in staged {
            let ids = primitives
                .into_iter()
                .map(|primitive| self.intern_primitive(primitive))
                .collect();
            selections.insert(name, ids);
        }

        let rule_id = self.rules.len() as RuleId;
        self.rules.push(CompiledRule {
            rule_id,
            source_id: rule.id,
            title,
            selections,
            condition,
        });

        Ok(rule_id)
    }

    /// Compile a batch of rules, collecting per-rule failures instead of
    /// aborting.
    pub fn compile_ruleset(&mut self, rule_yamls: &[&str]) -> CompilationResult {
        let started = Instant::now();
        let mut errors = Vec::new();
        let mut successful = 0usize;

        for rule_yaml in rule_yamls {
            // Pre-parse just enough metadata to label failures.
            let parsed: std::result::Result<SigmaRule, _> = serde_yaml::from_str(rule_yaml);
            match parsed {
                Ok(rule) => {
                    let source_id = rule.id.clone();
                    let title = rule.title.clone().unwrap_or_default();
                    match self.compile_parsed_rule(rule) {
                        Ok(_) => successful += 1,
                        Err(err) => errors.push(CompilationError {
                            rule_id: source_id,
                            rule_title: title,
                            kind: error_kind(&err).to_string(),
                            message: err.to_string(),
                            field: None,
                            line: None,
                        }),
                    }
                }
                Err(err) => errors.push(CompilationError {
                    rule_id: None,
                    rule_title: String::new(),
                    kind: "yaml".to_string(),
                    message: err.to_string(),
                    field: None,
                    line: err.location().map(|loc| loc.line()),
                }),
            }
        }

        let total_rules = rule_yamls.len();
        let unique = self.primitives.len();
        let statistics = CompilationStatistics {
            total_rules,
            successful_rules: successful,
            failed_rules: total_rules - successful,
            total_primitives: self.primitive_refs,
            unique_primitives: unique,
            duplicated_primitives: self.primitive_refs.saturating_sub(unique),
            total_selections: self.selection_count,
            complex_conditions: self.complex_conditions,
            average_complexity: if total_rules > 0 {
                self.complex_conditions as f64 / total_rules as f64
            } else {
                0.0
            },
            compilation_time_ms: started.elapsed().as_millis() as u64,
        };

        CompilationResult {
            ruleset: CompiledRuleset {
                primitives: self.primitives.clone(),
                primitive_map: self.primitive_map.clone(),
                rules: self.rules.clone(),
            },
            statistics,
            errors,
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    /// Consume the compiler, yielding the accumulated ruleset.
    pub fn into_ruleset(self) -> CompiledRuleset {
        CompiledRuleset {
            primitives: self.primitives,
            primitive_map: self.primitive_map,
            rules: self.rules,
        }
    }

    fn extract_condition(detection: &serde_yaml::Mapping) -> Result<String> {
        match detection.get(Value::from("condition")) {
            Some(Value::String(condition)) => Ok(condition.clone()),
            Some(_) => Err(SigmaError::CompilationError(
                "Condition must be a string".to_string(),
            )),
            None => Err(SigmaError::CompilationError(
                "Missing detection condition".to_string(),
            )),
        }
    }

    /// Stage one selection block as primitives. Fields inside a selection
    /// are ANDed by the DAG builder; multiple values of one field are ORed
    /// inside a single primitive.
    fn compile_selection(
        &mut self,
        selection_name: &str,
        selection_value: &Value,
        rule: &SigmaRule,
        title: &str,
    ) -> Result<Vec<Primitive>> {
        let selection_map = match selection_value {
            Value::Mapping(map) => map,
            _ => {
                return Err(SigmaError::CompilationError(format!(
                    "Selection '{selection_name}' must be a mapping"
                )))
            }
        };

        let mut primitives = Vec::new();
        for (field_key, field_value) in selection_map {
            let field_spec = field_key.as_str().ok_or_else(|| {
                SigmaError::CompilationError(format!(
                    "Field names in selection '{selection_name}' must be strings"
                ))
            })?;

            let (base_field, match_type, modifiers) = Self::parse_field_spec(field_spec);
            let field = if self.config.enable_field_mapping {
                self.field_mapping.normalize_field(&base_field)
            } else {
                base_field
            };

            match field_value {
                Value::Mapping(operators) => {
                    // Operator form: each `operator|modifiers` key emits one
                    // primitive over the same field.
                    for (op_key, op_value) in operators {
                        let op_spec = op_key.as_str().ok_or_else(|| {
                            SigmaError::CompilationError(format!(
                                "Operator keys for field '{field_spec}' must be strings"
                            ))
                        })?;
                        let (op_match_type, op_modifiers) =
                            self.parse_operator_spec(op_spec, rule, title, &field);
                        let values = Self::collect_values(op_value, field_spec)?;
                        if values.is_empty() {
                            continue;
                        }
                        let mut combined = modifiers.clone();
                        combined.extend(op_modifiers);
                        primitives.push(Primitive::new(
                            field.clone(),
                            op_match_type,
                            values,
                            combined,
                        ));
                    }
                }
                _ => {
                    let values = Self::collect_values(field_value, field_spec)?;
                    if values.is_empty() {
                        continue;
                    }
                    primitives.push(Primitive::new(field, match_type, values, modifiers));
                }
            }
        }

        Ok(primitives)
    }

    /// Flatten a scalar or sequence-of-scalars into value strings.
    fn collect_values(value: &Value, field_spec: &str) -> Result<Vec<String>> {
        match value {
            Value::String(s) => Ok(vec![s.clone()]),
            Value::Number(n) => Ok(vec![n.to_string()]),
            Value::Bool(b) => Ok(vec![b.to_string()]),
            Value::Null => Ok(Vec::new()),
            Value::Sequence(seq) => {
                let mut values = Vec::with_capacity(seq.len());
                for item in seq {
                    match item {
                        Value::String(s) => values.push(s.clone()),
                        Value::Number(n) => values.push(n.to_string()),
                        Value::Bool(b) => values.push(b.to_string()),
                        _ => {
                            return Err(SigmaError::CompilationError(format!(
                                "Unsupported value in sequence for field '{field_spec}'"
                            )))
                        }
                    }
                }
                Ok(values)
            }
            Value::Mapping(_) | Value::Tagged(_) => Err(SigmaError::CompilationError(format!(
                "Unsupported value type for field '{field_spec}'"
            ))),
        }
    }

    fn intern_primitive(&mut self, primitive: Primitive) -> PrimitiveId {
        self.primitive_refs += 1;
        if self.config.enable_primitive_deduplication {
            if let Some(&existing) = self.primitive_map.get(&primitive) {
                return existing;
            }
        }
        let id = self.primitives.len() as PrimitiveId;
        self.primitive_map.insert(primitive.clone(), id);
        self.primitives.push(primitive);
        id
    }

    /// Split `Field|operator|modifier|...` into its parts.
    ///
    /// - `Image` -> `("Image", "equals", [])`
    /// - `CommandLine|contains` -> `("CommandLine", "contains", [])`
    /// - `Data|contains|base64` -> `("Data", "contains", ["base64_decode"])`
    /// - `User|cased` -> `("User", "equals", ["case_sensitive"])`
    fn parse_field_spec(field_spec: &str) -> (String, String, Vec<String>) {
        let mut parts = field_spec.split('|');
        let field = parts.next().unwrap_or_default().to_string();
        let mut match_type = "equals".to_string();
        let mut modifiers = Vec::new();

        for part in parts {
            match part {
                "contains" => match_type = "contains".to_string(),
                "startswith" => match_type = "startswith".to_string(),
                "endswith" => match_type = "endswith".to_string(),
                "re" => match_type = "regex".to_string(),
                "glob" => match_type = "glob".to_string(),
                "cidr" => match_type = "cidr".to_string(),
                "range" => match_type = "range".to_string(),
                "fuzzy" => match_type = "fuzzy".to_string(),
                "length" => match_type = "length".to_string(),
                "cased" => modifiers.push("case_sensitive".to_string()),
                "base64" => modifiers.push("base64_decode".to_string()),
                "base64offset" => modifiers.push("base64_offset_decode".to_string()),
                "utf16" => modifiers.push("utf16_decode".to_string()),
                "utf16le" => modifiers.push("utf16le_decode".to_string()),
                "utf16be" => modifiers.push("utf16be_decode".to_string()),
                "wide" => modifiers.push("wide_decode".to_string()),
                other => modifiers.push(other.to_string()),
            }
        }

        (field, match_type, modifiers)
    }

    /// Parse an operator key (`contains|base64`). Unknown operators demote to
    /// `equals` with a warning, never an error.
    fn parse_operator_spec(
        &mut self,
        op_spec: &str,
        rule: &SigmaRule,
        title: &str,
        field: &str,
    ) -> (String, Vec<String>) {
        let mut parts = op_spec.split('|');
        let operator = parts.next().unwrap_or_default();
        let mut modifiers = Vec::new();
        for part in parts {
            let (_, _, mut parsed) = Self::parse_field_spec(&format!("_|{part}"));
            modifiers.append(&mut parsed);
        }

        let match_type = match operator {
            "equals" | "contains" | "startswith" | "endswith" | "regex" | "glob" | "cidr"
            | "range" | "fuzzy" | "length" => operator.to_string(),
            "re" => "regex".to_string(),
            unknown => {
                self.warnings.push(CompilationWarning {
                    rule_id: rule.id.clone(),
                    rule_title: title.to_string(),
                    kind: "unknown_operator".to_string(),
                    message: format!(
                        "Unknown operator '{unknown}' on field '{field}', defaulting to equals"
                    ),
                    field: Some(field.to_string()),
                });
                "equals".to_string()
            }
        };

        (match_type, modifiers)
    }

    /// Reject quantifier patterns that can never be satisfied.
    fn validate_quantifiers(
        &self,
        ast: &ConditionAst,
        selections: &HashMap<String, Vec<PrimitiveId>>,
    ) -> Result<()> {
        match ast {
            ConditionAst::And(l, r) | ConditionAst::Or(l, r) => {
                self.validate_quantifiers(l, selections)?;
                self.validate_quantifiers(r, selections)
            }
            ConditionAst::Not(x) => self.validate_quantifiers(x, selections),
            ConditionAst::OneOfThem | ConditionAst::AllOfThem => {
                if selections.values().all(|ids| ids.is_empty()) {
                    return Err(SigmaError::CompilationError(
                        "Quantifier over 'them' requires at least one selection".to_string(),
                    ));
                }
                Ok(())
            }
            ConditionAst::OneOfPattern(pattern) | ConditionAst::AllOfPattern(pattern) => {
                if Self::matching_selections(pattern, selections) == 0 {
                    return Err(SigmaError::CompilationError(format!(
                        "No selections match pattern '{pattern}'"
                    )));
                }
                Ok(())
            }
            ConditionAst::CountOfPattern(count, pattern) => {
                let matching = Self::matching_selections(pattern, selections);
                if matching == 0 {
                    return Err(SigmaError::CompilationError(format!(
                        "No selections match pattern '{pattern}'"
                    )));
                }
                if *count as usize > matching {
                    return Err(SigmaError::InvalidThreshold(format!(
                        "{count} of {pattern} (only {matching} selections match)"
                    )));
                }
                Ok(())
            }
            ConditionAst::Identifier(_) => Ok(()),
        }
    }

    /// Compile the rule's regex values eagerly so a broken pattern fails
    /// this rule instead of poisoning engine construction later.
    fn validate_regex_values(staged: &[(String, Vec<Primitive>)]) -> Result<()> {
        for (_, primitives) in staged {
            for primitive in primitives {
                if primitive.match_type == "regex" {
                    for pattern in &primitive.values {
                        crate::matcher::cache::global_regex_cache().get_or_compile(pattern)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn matching_selections(
        pattern: &str,
        selections: &HashMap<String, Vec<PrimitiveId>>,
    ) -> usize {
        selections
            .keys()
            .filter(|name| selection_matches_pattern(pattern, name))
            .count()
    }

    /// A condition counts as complex when it nests beyond a couple of
    /// operators or uses quantifiers.
    fn is_complex_condition(ast: &ConditionAst) -> bool {
        fn weight(ast: &ConditionAst) -> usize {
            match ast {
                ConditionAst::Identifier(_) => 1,
                ConditionAst::And(l, r) | ConditionAst::Or(l, r) => 1 + weight(l) + weight(r),
                ConditionAst::Not(x) => 1 + weight(x),
                ConditionAst::OneOfThem | ConditionAst::AllOfThem => 3,
                ConditionAst::OneOfPattern(_)
                | ConditionAst::AllOfPattern(_)
                | ConditionAst::CountOfPattern(..) => 3,
            }
        }
        weight(ast) > 5
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

/// Map an engine error onto a stable kind discriminant for result envelopes.
fn error_kind(err: &SigmaError) -> &'static str {
    match err {
        SigmaError::YamlError(_) => "yaml",
        SigmaError::InvalidThreshold(_) => "invalid_threshold",
        SigmaError::InvalidRegex(_) => "invalid_regex",
        SigmaError::DangerousRegexPattern(_) => "dangerous_regex",
        SigmaError::IoError(_) => "io",
        _ => "compilation",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGON_RULE: &str = r#"
title: Successful Logon
id: 3e50f50b-7247-4a41-bcaf-31e2c4c3b3a4
detection:
    selection:
        EventID: 4624
    condition: selection
"#;

    #[test]
    fn test_compile_single_rule() {
        let mut compiler = Compiler::new();
        let rule_id = compiler
            .compile_rule(
                r#"
title: Successful Logon
detection:
    selection:
        EventID: 4624
    condition: selection
"#,
            )
            .unwrap();
        assert_eq!(rule_id, 0);
        assert_eq!(compiler.primitive_count(), 1);
        assert_eq!(compiler.rule_count(), 1);

        let ruleset = compiler.into_ruleset();
        let rule = &ruleset.rules[0];
        assert_eq!(rule.title, "Successful Logon");
        assert_eq!(rule.selections["selection"], vec![0]);
        assert_eq!(ruleset.primitives[0].field, "EventID");
        assert_eq!(ruleset.primitives[0].values, vec!["4624"]);
    }

    #[test]
    fn test_missing_title_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler
            .compile_rule("detection:\n    selection:\n        A: 1\n    condition: selection\n")
            .unwrap_err();
        assert!(err.to_string().contains("Missing rule title"));
    }

    #[test]
    fn test_missing_condition_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler
            .compile_rule("title: T\ndetection:\n    selection:\n        A: 1\n")
            .unwrap_err();
        assert!(err.to_string().contains("Missing detection condition"));
    }

    #[test]
    fn test_missing_detection_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler.compile_rule("title: T\n").unwrap_err();
        assert!(err.to_string().contains("Missing detection section"));
    }

    #[test]
    fn test_primitive_dedup_across_rules() {
        let mut compiler = Compiler::new();
        let rule_a = r#"
title: A
detection:
    selection:
        EventID: 4624
    condition: selection
"#;
        let rule_b = r#"
title: B
detection:
    sel:
        EventID: 4624
    condition: sel
"#;
        compiler.compile_rule(rule_a).unwrap();
        compiler.compile_rule(rule_b).unwrap();
        // Same predicate in both rules interns to one primitive.
        assert_eq!(compiler.primitive_count(), 1);
    }

    #[test]
    fn test_dedup_disabled() {
        let config = CompilerConfig {
            enable_primitive_deduplication: false,
            ..CompilerConfig::default()
        };
        let mut compiler = Compiler::with_config(config);
        compiler.compile_rule(LOGON_RULE).unwrap();
        compiler
            .compile_rule(
                "title: B\ndetection:\n    sel:\n        EventID: 4624\n    condition: sel\n",
            )
            .unwrap();
        assert_eq!(compiler.primitive_count(), 2);
    }

    #[test]
    fn test_sequence_values_become_one_primitive() {
        let mut compiler = Compiler::new();
        compiler
            .compile_rule(
                r#"
title: Multi
detection:
    selection:
        EventID:
            - 4624
            - 4625
    condition: selection
"#,
            )
            .unwrap();
        assert_eq!(compiler.primitive_count(), 1);
        assert_eq!(compiler.primitives()[0].values, vec!["4624", "4625"]);
    }

    #[test]
    fn test_field_modifier_suffixes() {
        let mut compiler = Compiler::new();
        compiler
            .compile_rule(
                r#"
title: Mods
detection:
    selection:
        CommandLine|contains|base64: payload
    condition: selection
"#,
            )
            .unwrap();
        let prim = &compiler.primitives()[0];
        assert_eq!(prim.field, "CommandLine");
        assert_eq!(prim.match_type, "contains");
        assert_eq!(prim.modifiers, vec!["base64_decode"]);
    }

    #[test]
    fn test_operator_mapping_form() {
        let mut compiler = Compiler::new();
        compiler
            .compile_rule(
                r#"
title: Operators
detection:
    selection:
        CommandLine:
            contains|base64: payload
            startswith: cmd
    condition: selection
"#,
            )
            .unwrap();
        assert_eq!(compiler.primitive_count(), 2);
        let types: Vec<&str> = compiler
            .primitives()
            .iter()
            .map(|p| p.match_type.as_str())
            .collect();
        assert!(types.contains(&"contains"));
        assert!(types.contains(&"startswith"));
    }

    #[test]
    fn test_unknown_operator_demotes_to_equals_with_warning() {
        let mut compiler = Compiler::new();
        let result = compiler.compile_ruleset(&[r#"
title: Odd
detection:
    selection:
        Field:
            frobnicate: value
    condition: selection
"#]);
        assert_eq!(result.statistics.successful_rules, 1);
        assert_eq!(result.ruleset.primitives[0].match_type, "equals");
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, "unknown_operator");
    }

    #[test]
    fn test_field_mapping_applied() {
        let mut mapping = FieldMapping::new();
        mapping.add_mapping("Event_ID".to_string(), "EventID".to_string());
        let mut compiler = Compiler::with_field_mapping(mapping);
        compiler
            .compile_rule(
                "title: T\ndetection:\n    sel:\n        Event_ID: 1\n    condition: sel\n",
            )
            .unwrap();
        assert_eq!(compiler.primitives()[0].field, "EventID");
    }

    #[test]
    fn test_field_mapping_disabled() {
        let config = CompilerConfig {
            enable_field_mapping: false,
            ..CompilerConfig::default()
        };
        let mut compiler = Compiler::with_config(config);
        compiler
            .field_mapping_mut()
            .add_mapping("Event_ID".to_string(), "EventID".to_string());
        compiler
            .compile_rule(
                "title: T\ndetection:\n    sel:\n        Event_ID: 1\n    condition: sel\n",
            )
            .unwrap();
        assert_eq!(compiler.primitives()[0].field, "Event_ID");
    }

    #[test]
    fn test_unknown_condition_identifier_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler
            .compile_rule(
                "title: T\ndetection:\n    sel:\n        A: 1\n    condition: other\n",
            )
            .unwrap_err();
        assert!(err.to_string().contains("other"));
    }

    #[test]
    fn test_pattern_matching_zero_selections_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler
            .compile_rule(
                "title: T\ndetection:\n    sel:\n        A: 1\n    condition: 1 of web_*\n",
            )
            .unwrap_err();
        assert!(err.to_string().contains("web_*"));
    }

    #[test]
    fn test_count_above_matching_selections_rejected() {
        let mut compiler = Compiler::new();
        let err = compiler
            .compile_rule(
                r#"
title: T
detection:
    s1:
        A: 1
    s2:
        B: 2
    condition: 3 of s*
"#,
            )
            .unwrap_err();
        assert!(matches!(err, SigmaError::InvalidThreshold(_)));
    }

    #[test]
    fn test_invalid_regex_value_fails_only_its_rule() {
        let mut compiler = Compiler::new();
        let good = "title: Good\ndetection:\n    sel:\n        A: 1\n    condition: sel\n";
        let bad_regex =
            "title: BadRe\ndetection:\n    sel:\n        Hash|re: '['\n    condition: sel\n";
        let dangerous =
            "title: Redos\ndetection:\n    sel:\n        Hash|re: '(a+)+'\n    condition: sel\n";

        let result = compiler.compile_ruleset(&[good, bad_regex, dangerous]);
        assert_eq!(result.statistics.successful_rules, 1);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].kind, "invalid_regex");
        assert_eq!(result.errors[1].kind, "dangerous_regex");
    }

    #[test]
    fn test_compile_ruleset_collects_errors() {
        let mut compiler = Compiler::new();
        let good = "title: Good\ndetection:\n    sel:\n        A: 1\n    condition: sel\n";
        let bad = "title: Bad\ndetection:\n    sel:\n        A: 1\n    condition: missing\n";
        let worse = "title: [unclosed\n";

        let result = compiler.compile_ruleset(&[good, bad, worse]);
        assert_eq!(result.statistics.total_rules, 3);
        assert_eq!(result.statistics.successful_rules, 1);
        assert_eq!(result.statistics.failed_rules, 2);
        assert_eq!(result.errors.len(), 2);
        assert_eq!(result.errors[0].rule_title, "Bad");
        assert_eq!(result.errors[0].kind, "compilation");
        assert_eq!(result.errors[1].kind, "yaml");
        assert_eq!(result.ruleset.rule_count(), 1);
    }

    #[test]
    fn test_statistics_dedup_counts() {
        let mut compiler = Compiler::new();
        let rule_a = "title: A\ndetection:\n    sel:\n        EventID: 4624\n    condition: sel\n";
        let rule_b = "title: B\ndetection:\n    sel:\n        EventID: 4624\n    condition: sel\n";
        let result = compiler.compile_ruleset(&[rule_a, rule_b]);
        assert_eq!(result.statistics.total_primitives, 2);
        assert_eq!(result.statistics.unique_primitives, 1);
        assert_eq!(result.statistics.duplicated_primitives, 1);
        assert_eq!(result.statistics.total_selections, 2);
    }

    #[test]
    fn test_complex_condition_counted() {
        let mut compiler = Compiler::new();
        let complex = r#"
title: Complex
detection:
    s1:
        A: 1
    s2:
        B: 2
    s3:
        C: 3
    condition: (s1 and s2) or (s2 and s3) or not s1
"#;
        let result = compiler.compile_ruleset(&[complex]);
        assert_eq!(result.statistics.complex_conditions, 1);
        assert!(result.statistics.average_complexity > 0.0);
    }

    #[test]
    fn test_parse_field_spec() {
        assert_eq!(
            Compiler::parse_field_spec("Image"),
            ("Image".to_string(), "equals".to_string(), vec![])
        );
        assert_eq!(
            Compiler::parse_field_spec("Hash|re"),
            ("Hash".to_string(), "regex".to_string(), vec![])
        );
        assert_eq!(
            Compiler::parse_field_spec("User|cased"),
            (
                "User".to_string(),
                "equals".to_string(),
                vec!["case_sensitive".to_string()]
            )
        );
        assert_eq!(
            Compiler::parse_field_spec("Data|contains|base64|cased"),
            (
                "Data".to_string(),
                "contains".to_string(),
                vec!["base64_decode".to_string(), "case_sensitive".to_string()]
            )
        );
    }
}
