//! Pre-compiled primitives.

use super::types::{FieldExtractorFn, MatchFn, ModifierFn};
use super::EventContext;
use crate::error::Result;
use std::sync::Arc;

/// A primitive compiled for evaluation: resolved match function, resolved
/// modifier chain, pre-split field path.
///
/// Evaluation applies the modifier chain to each candidate field value and
/// hands the transformed value to the match function; the primitive matches
/// if any candidate does. A missing field is a plain `false`.
#[derive(Clone)]
pub struct CompiledPrimitive {
    /// Pre-split dotted path of the source field.
    pub field_path: Arc<[String]>,
    /// The match-type name this primitive was compiled from.
    pub match_type: Arc<str>,
    match_fn: MatchFn,
    modifier_chain: Arc<[ModifierFn]>,
    pub values: Arc<[String]>,
    /// Raw modifier names, passed to the match function as flags.
    pub raw_modifiers: Arc<[String]>,
    field_extractor: Option<FieldExtractorFn>,
}

impl CompiledPrimitive {
    pub fn new(
        field_path: Vec<String>,
        match_type: String,
        match_fn: MatchFn,
        modifier_chain: Vec<ModifierFn>,
        values: Vec<String>,
        raw_modifiers: Vec<String>,
        field_extractor: Option<FieldExtractorFn>,
    ) -> Self {
        Self {
            field_path: field_path.into(),
            match_type: match_type.into(),
            match_fn,
            modifier_chain: modifier_chain.into(),
            values: values.into(),
            raw_modifiers: raw_modifiers.into(),
            field_extractor,
        }
    }

    pub fn field_path_string(&self) -> String {
        self.field_path.join(".")
    }

    pub fn has_modifiers(&self) -> bool {
        !self.modifier_chain.is_empty()
    }

    pub fn is_regex(&self) -> bool {
        &*self.match_type == "regex"
    }

    /// Evaluate against one event.
    ///
    /// Modifier failures and matcher errors propagate; an absent field is a
    /// normal non-match.
    pub fn evaluate(&self, context: &EventContext) -> Result<bool> {
        let field = self.field_path_string();
        let candidates = match &self.field_extractor {
            Some(extractor) => extractor(context, &field)?,
            None => context.get_field_values(&field)?,
        };
        let Some(candidates) = candidates else {
            return Ok(false);
        };

        let value_refs: Vec<&str> = self.values.iter().map(String::as_str).collect();
        let modifier_refs: Vec<&str> = self.raw_modifiers.iter().map(String::as_str).collect();

        for candidate in candidates {
            let mut transformed = candidate;
            for modifier in self.modifier_chain.iter() {
                transformed = modifier(&transformed)?;
            }
            if (self.match_fn)(&transformed, &value_refs, &modifier_refs)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl std::fmt::Debug for CompiledPrimitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPrimitive")
            .field("field_path", &self.field_path_string())
            .field("match_type", &self.match_type)
            .field("values", &self.values)
            .field("raw_modifiers", &self.raw_modifiers)
            .field("modifier_count", &self.modifier_chain.len())
            .finish()
    }
}
