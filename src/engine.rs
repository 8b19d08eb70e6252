//! Engine facade tying the pipeline together: compile rules, build and
//! optimize the shared DAG, compile matchers, evaluate events.

use crate::compiler::parser::{parse_condition, ConditionAst};
use crate::compiler::{CompilationResult, Compiler, CompilerConfig, FieldMapping};
use crate::config::EngineConfig;
use crate::dag::{
    CompiledDag, DagBuilder, DagEvaluationResult, DagEvaluator, DagOptimizer, DagStatistics,
    EvaluatorConfig, LiteralPrefilter, ParallelDagEvaluator,
};
use crate::error::Result;
use crate::ir::PrimitiveId;
use crate::matcher::{init_global_regex_cache, CompiledPrimitive, MatcherBuilder};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Compiled SIGMA engine.
///
/// Construction runs the full pipeline once; the resulting DAG is frozen
/// and shared. Evaluation state lives inside the engine's evaluators, so an
/// engine is `&mut` per event but the underlying DAG can be shared across
/// engines cheaply.
///
/// # Example
/// ```
/// use sigma_dag::SigmaEngine;
/// use serde_json::json;
///
/// let rule = r#"
/// title: Successful Logon
/// detection:
///     selection:
///         EventID: 4624
///     condition: selection
/// "#;
/// let mut engine = SigmaEngine::from_rules(&[rule]).unwrap();
/// let result = engine.evaluate(&json!({"EventID": "4624"})).unwrap();
/// assert_eq!(result.matched_rules, vec![0]);
/// ```
pub struct SigmaEngine {
    dag: Arc<CompiledDag>,
    prefilter: Option<Arc<LiteralPrefilter>>,
    config: EngineConfig,
    compilation: CompilationResult,
    evaluator: DagEvaluator,
    parallel: Option<ParallelDagEvaluator>,
}

impl SigmaEngine {
    /// Compile rules with the default configuration.
    pub fn from_rules(rule_yamls: &[&str]) -> Result<Self> {
        Self::builder().build(rule_yamls)
    }

    /// Compile rules with a custom configuration.
    pub fn from_rules_with_config(rule_yamls: &[&str], config: EngineConfig) -> Result<Self> {
        Self::builder().with_config(config).build(rule_yamls)
    }

    pub fn builder() -> SigmaEngineBuilder {
        SigmaEngineBuilder::new()
    }

    /// Evaluate one event, returning the matching rule IDs and evaluation
    /// counters.
    pub fn evaluate(&mut self, event: &Value) -> Result<DagEvaluationResult> {
        match &mut self.parallel {
            Some(parallel) => parallel.evaluate(event),
            None => self.evaluator.evaluate(event),
        }
    }

    /// Evaluate a raw JSON string, prefiltering before parsing.
    pub fn evaluate_raw(&mut self, json: &str) -> Result<DagEvaluationResult> {
        self.evaluator.evaluate_raw(json)
    }

    /// Evaluate a batch of events; results line up with the input order.
    pub fn evaluate_batch(&mut self, events: &[Value]) -> Result<Vec<DagEvaluationResult>> {
        match &mut self.parallel {
            Some(parallel) => parallel.evaluate_batch(events),
            None => self.evaluator.evaluate_batch(events),
        }
    }

    /// Evaluate from an externally computed primitive truth vector, indexed
    /// by `PrimitiveId`.
    pub fn evaluate_with_primitive_results(
        &mut self,
        primitive_results: &[bool],
    ) -> Result<DagEvaluationResult> {
        self.evaluator
            .evaluate_with_primitive_results(primitive_results)
    }

    /// Statistics, per-rule errors and warnings from compilation.
    pub fn compilation(&self) -> &CompilationResult {
        &self.compilation
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn rule_count(&self) -> usize {
        self.dag.rule_results.len()
    }

    pub fn primitive_count(&self) -> usize {
        self.compilation.ruleset.primitive_count()
    }

    pub fn dag_statistics(&self) -> DagStatistics {
        self.dag.statistics()
    }

    pub fn prefilter_enabled(&self) -> bool {
        self.prefilter.is_some()
    }
}

/// Configures and builds a [`SigmaEngine`].
pub struct SigmaEngineBuilder {
    config: EngineConfig,
    field_mapping: Option<FieldMapping>,
    matcher: Option<MatcherBuilder>,
    evaluator_config: EvaluatorConfig,
}

impl SigmaEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            field_mapping: None,
            matcher: None,
            evaluator_config: EvaluatorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_field_mapping(mut self, field_mapping: FieldMapping) -> Self {
        self.field_mapping = Some(field_mapping);
        self
    }

    /// Use a custom matcher registry instead of the defaults.
    pub fn with_matcher(mut self, matcher: MatcherBuilder) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_evaluator_config(mut self, evaluator_config: EvaluatorConfig) -> Self {
        self.evaluator_config = evaluator_config;
        self
    }

    /// Run the pipeline: compile -> codegen -> optimize -> matcher compile.
    ///
    /// Per-rule compilation failures do not fail the build; they are
    /// collected in the engine's [`CompilationResult`]. Structural failures
    /// (unsupported match type, invalid regex value) do fail it.
    pub fn build(self, rule_yamls: &[&str]) -> Result<SigmaEngine> {
        init_global_regex_cache(self.config.regex_cache.clone());

        let mut compiler = Compiler::with_config(CompilerConfig::from(&self.config));
        if let Some(field_mapping) = self.field_mapping {
            compiler.set_field_mapping(field_mapping);
        }
        let compilation = compiler.compile_ruleset(rule_yamls);
        let ruleset = &compilation.ruleset;

        // Negations invert the "event must contain a literal" assumption,
        // so any rule using `not` disables the prefilter.
        let prefilter_safe = !ruleset.rules.iter().any(|rule| {
            parse_condition(&rule.condition, &rule.selections)
                .map(|ast| contains_not(&ast))
                .unwrap_or(true)
        });

        let (dag, prefilter) = DagBuilder::new()
            .with_prefilter(self.config.enable_prefilter && prefilter_safe)
            .from_ruleset(ruleset)?
            .build()?;

        let dag = if self.config.enable_optimization && self.config.optimization_level > 0 {
            DagOptimizer::with_level(self.config.optimization_level).optimize(&dag)?
        } else {
            dag
        };
        let dag = Arc::new(dag);

        let matcher = self.matcher.unwrap_or_default();
        let primitives: HashMap<PrimitiveId, CompiledPrimitive> =
            matcher.compile(&ruleset.primitives)?;

        let prefilter = prefilter
            .filter(|p| p.stats().is_complete())
            .map(Arc::new);

        let evaluator = DagEvaluator::new(Arc::clone(&dag), primitives.clone())
            .with_prefilter(prefilter.clone())
            .with_config(self.evaluator_config.clone());

        let parallel = if self.config.enable_parallel_processing {
            Some(ParallelDagEvaluator::new(
                Arc::clone(&dag),
                primitives,
                prefilter.clone(),
                self.config.parallel.clone(),
            ))
        } else {
            None
        };

        Ok(SigmaEngine {
            dag,
            prefilter,
            config: self.config,
            compilation,
            evaluator,
            parallel,
        })
    }
}

impl Default for SigmaEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn contains_not(ast: &ConditionAst) -> bool {
    match ast {
        ConditionAst::Not(_) => true,
        ConditionAst::And(l, r) | ConditionAst::Or(l, r) => contains_not(l) || contains_not(r),
        _ => false,
    }
}
