//! Matcher registry and primitive compilation.

use super::advanced::{
    create_cidr_match, create_fuzzy_match, create_length_match, create_range_match,
};
use super::cache::global_regex_cache;
use super::compiled::CompiledPrimitive;
use super::defaults::{
    create_contains_match, create_endswith_match, create_exact_match, create_glob_match,
    create_regex_match, create_startswith_match,
};
use super::modifiers::register_default_modifiers;
use super::types::{FieldExtractorFn, MatchFn, ModifierFn};
use super::EventContext;
use crate::error::{Result, SigmaError};
use crate::ir::{Primitive, PrimitiveId};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of match-type and modifier implementations, and the compiler
/// from [`Primitive`]s to [`CompiledPrimitive`]s.
///
/// The registries are consulted only during [`compile`](Self::compile);
/// compiled primitives hold `Arc` snapshots of the functions they use, so
/// concurrent evaluation never reads mutable registry state.
///
/// # Example
/// ```
/// use sigma_dag::matcher::MatcherBuilder;
/// use sigma_dag::ir::Primitive;
///
/// let mut builder = MatcherBuilder::new();
/// builder.register_match("always", |_, _, _| Ok(true));
///
/// let primitives = [Primitive::from_strs("F", "always", &["x"], &[])];
/// let compiled = builder.compile(&primitives).unwrap();
/// assert_eq!(compiled.len(), 1);
/// ```
pub struct MatcherBuilder {
    match_registry: HashMap<String, MatchFn>,
    modifier_registry: HashMap<String, ModifierFn>,
    field_extractor: Option<FieldExtractorFn>,
}

impl MatcherBuilder {
    /// A builder preloaded with the default match types
    /// (equals/contains/startswith/endswith/regex/glob/cidr/range/fuzzy/length)
    /// and the default modifier library.
    pub fn new() -> Self {
        let mut builder = Self {
            match_registry: HashMap::new(),
            modifier_registry: HashMap::new(),
            field_extractor: None,
        };
        builder.register_default_matchers();
        register_default_modifiers(&mut builder.modifier_registry);
        builder
    }

    /// An empty builder for embedders that want full control.
    pub fn empty() -> Self {
        Self {
            match_registry: HashMap::new(),
            modifier_registry: HashMap::new(),
            field_extractor: None,
        }
    }

    fn register_default_matchers(&mut self) {
        self.match_registry
            .insert("equals".to_string(), create_exact_match());
        self.match_registry
            .insert("contains".to_string(), create_contains_match());
        self.match_registry
            .insert("startswith".to_string(), create_startswith_match());
        self.match_registry
            .insert("endswith".to_string(), create_endswith_match());
        self.match_registry
            .insert("regex".to_string(), create_regex_match());
        self.match_registry
            .insert("glob".to_string(), create_glob_match());
        self.match_registry
            .insert("cidr".to_string(), create_cidr_match());
        self.match_registry
            .insert("range".to_string(), create_range_match());
        self.match_registry
            .insert("fuzzy".to_string(), create_fuzzy_match());
        self.match_registry
            .insert("length".to_string(), create_length_match());
    }

    /// Register (or replace) a match-type implementation.
    pub fn register_match<F>(&mut self, match_type: &str, func: F) -> &mut Self
    where
        F: Fn(&str, &[&str], &[&str]) -> Result<bool> + Send + Sync + 'static,
    {
        self.match_registry
            .insert(match_type.to_string(), Arc::new(func));
        self
    }

    /// Register (or replace) a modifier implementation.
    pub fn register_modifier<F>(&mut self, modifier: &str, func: F) -> &mut Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        self.modifier_registry
            .insert(modifier.to_string(), Arc::new(func));
        self
    }

    /// Install a custom field extractor used by every compiled primitive.
    pub fn with_field_extractor<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&EventContext, &str) -> Result<Option<Vec<String>>> + Send + Sync + 'static,
    {
        self.field_extractor = Some(Arc::new(extractor));
        self
    }

    pub fn has_match_type(&self, match_type: &str) -> bool {
        self.match_registry.contains_key(match_type)
    }

    pub fn has_modifier(&self, modifier: &str) -> bool {
        self.modifier_registry.contains_key(modifier)
    }

    /// Compile primitives into their evaluable form, keyed by allocation
    /// order (`PrimitiveId`).
    ///
    /// Fails with `UnsupportedMatchType` for unregistered match types.
    /// Regex patterns are pre-compiled here so invalid or dangerous
    /// patterns surface at compile time rather than mid-evaluation.
    /// Modifier names without a registered transform (e.g. the
    /// `case_sensitive` flag) stay visible to match functions through the
    /// primitive's raw modifier list.
    pub fn compile(
        &self,
        primitives: &[Primitive],
    ) -> Result<HashMap<PrimitiveId, CompiledPrimitive>> {
        let mut compiled = HashMap::with_capacity(primitives.len());
        for (index, primitive) in primitives.iter().enumerate() {
            compiled.insert(index as PrimitiveId, self.compile_primitive(primitive)?);
        }
        Ok(compiled)
    }

    fn compile_primitive(&self, primitive: &Primitive) -> Result<CompiledPrimitive> {
        let match_fn = self
            .match_registry
            .get(&primitive.match_type)
            .cloned()
            .ok_or_else(|| SigmaError::UnsupportedMatchType(primitive.match_type.clone()))?;

        if primitive.match_type == "regex" {
            for pattern in &primitive.values {
                global_regex_cache().get_or_compile(pattern)?;
            }
        }

        let modifier_chain: Vec<ModifierFn> = primitive
            .modifiers
            .iter()
            .filter_map(|name| self.modifier_registry.get(name).cloned())
            .collect();

        let field_path: Vec<String> =
            primitive.field.split('.').map(str::to_string).collect();

        Ok(CompiledPrimitive::new(
            field_path,
            primitive.match_type.clone(),
            match_fn,
            modifier_chain,
            primitive.values.clone(),
            primitive.modifiers.clone(),
            self.field_extractor.clone(),
        ))
    }
}

impl Default for MatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
