//! Primitive matching: registries, compiled primitives and field access.
//!
//! Compilation and evaluation are strictly separated. The
//! [`MatcherBuilder`] registry resolves match types and modifiers once,
//! producing [`CompiledPrimitive`]s that carry everything they need as
//! shared immutable state; per-event work happens against an
//! [`EventContext`] that caches extracted field values.

pub mod advanced;
pub mod builder;
pub mod cache;
pub mod compiled;
pub mod context;
pub mod defaults;
pub mod modifiers;
pub mod types;

pub use builder::MatcherBuilder;
pub use cache::{global_regex_cache, init_global_regex_cache, GlobalRegexCache, RegexCacheStats};
pub use compiled::CompiledPrimitive;
pub use context::EventContext;
pub use types::{FieldExtractorFn, MatchFn, ModifierFn};
