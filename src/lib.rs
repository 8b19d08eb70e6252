//! # SIGMA DAG engine
//!
//! A detection-rule engine for the SIGMA rule language. Rules are compiled
//! into one shared data-flow graph and evaluated against structured events,
//! reporting the identifiers of the rules whose conditions hold.
//!
//! ## Pipeline
//!
//! 1. **Compiler** - deserializes rule documents, extracts deduplicated
//!    [`ir::Primitive`]s and validates condition expressions.
//! 2. **DAG builder** - lowers each rule onto the shared [`dag::CompiledDag`].
//! 3. **Optimizer** - constant folding, CSE, DCE and selectivity-aware
//!    execution ordering.
//! 4. **Evaluator** - executes the frozen graph per event, with a literal
//!    prefilter gate and optional parallel rule partitioning.
//!
//! ## Usage
//!
//! ```
//! use sigma_dag::SigmaEngine;
//! use serde_json::json;
//!
//! let rule = r#"
//! title: Suspicious Encoded Command
//! detection:
//!     selection:
//!         CommandLine|contains: '-EncodedCommand'
//!     condition: selection
//! "#;
//!
//! let mut engine = SigmaEngine::from_rules(&[rule]).unwrap();
//! let event = json!({"CommandLine": "powershell -EncodedCommand SQBFAFgA"});
//! let result = engine.evaluate(&event).unwrap();
//! assert_eq!(result.matched_rules, vec![0]);
//! ```

pub mod compiler;
pub mod config;
pub mod dag;
pub mod engine;
pub mod error;
pub mod ir;
pub mod matcher;

pub use compiler::{
    CompilationError, CompilationResult, CompilationStatistics, CompilationWarning, Compiler,
    CompilerConfig, FieldMapping, SigmaRule,
};
pub use config::{EngineConfig, ParallelConfig, RegexCacheConfig};
pub use dag::{
    CompiledDag, DagBuilder, DagEvaluationResult, DagEvaluator, DagOptimizer, DagStatistics,
    EvaluatorConfig, LiteralPrefilter, ParallelDagEvaluator,
};
pub use engine::{SigmaEngine, SigmaEngineBuilder};
pub use error::{Result, SigmaError};
pub use ir::{CompiledRule, CompiledRuleset, Primitive, PrimitiveId, RuleId};
pub use matcher::{CompiledPrimitive, EventContext, MatcherBuilder};
