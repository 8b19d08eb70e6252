//! DAG evaluation against single events and batches.

use super::prefilter::LiteralPrefilter;
use super::types::{CompiledDag, DagNode, LogicalOp, NodeId, NodeType};
use crate::error::{Result, SigmaError};
use crate::ir::{PrimitiveId, RuleId};
use crate::matcher::{CompiledPrimitive, EventContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// DAGs at or below this node count use the dense result vector; larger
/// DAGs use the sparse map so the scratch buffer stays proportional to the
/// touched nodes.
pub(crate) const DENSE_NODE_LIMIT: usize = 32;

/// How many primitive evaluations between wall-clock checks. The counter is
/// cheap; the clock is not.
const TIMEOUT_CHECK_INTERVAL: usize = 1024;

/// Evaluation budgets; all disabled by default.
#[derive(Debug, Clone, Default)]
pub struct EvaluatorConfig {
    /// Cap on node evaluations per event.
    pub max_operations: Option<u64>,
    /// Cap on regex primitive evaluations per event.
    pub max_regex_operations: Option<u64>,
    /// Wall-clock limit per event, polled every 1024 primitive evaluations.
    pub timeout: Option<Duration>,
}

/// Per-event evaluation outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagEvaluationResult {
    /// Rules whose Result node evaluated true, ascending.
    pub matched_rules: Vec<RuleId>,
    pub nodes_evaluated: usize,
    pub primitive_evaluations: usize,
}

/// Executes a frozen [`CompiledDag`] against events.
///
/// The DAG, primitives and prefilter are shared immutable state; all
/// mutable scratch lives in the evaluator, so one evaluator per thread
/// suffices for parallel evaluation of a shared DAG.
pub struct DagEvaluator {
    dag: Arc<CompiledDag>,
    primitives: HashMap<PrimitiveId, CompiledPrimitive>,
    prefilter: Option<Arc<LiteralPrefilter>>,
    config: EvaluatorConfig,

    /// Dense per-node results for small DAGs.
    fast_results: Vec<bool>,
    /// Sparse per-node results for large DAGs.
    node_results: HashMap<NodeId, bool>,

    nodes_evaluated: usize,
    primitive_evaluations: usize,
    regex_operations: u64,
    deadline: Option<Instant>,

    prefilter_hits: usize,
    prefilter_misses: usize,
}

impl DagEvaluator {
    pub fn new(dag: Arc<CompiledDag>, primitives: HashMap<PrimitiveId, CompiledPrimitive>) -> Self {
        let buffer_size = dag.result_buffer_size.max(dag.nodes.len());
        Self {
            dag,
            primitives,
            prefilter: None,
            config: EvaluatorConfig::default(),
            fast_results: vec![false; buffer_size],
            node_results: HashMap::new(),
            nodes_evaluated: 0,
            primitive_evaluations: 0,
            regex_operations: 0,
            deadline: None,
            prefilter_hits: 0,
            prefilter_misses: 0,
        }
    }

    pub fn with_prefilter(mut self, prefilter: Option<Arc<LiteralPrefilter>>) -> Self {
        self.prefilter = prefilter;
        self
    }

    pub fn with_config(mut self, config: EvaluatorConfig) -> Self {
        self.config = config;
        self
    }

    /// Evaluate one event.
    pub fn evaluate(&mut self, event: &Value) -> Result<DagEvaluationResult> {
        if let Some(prefilter) = &self.prefilter {
            if !prefilter.matches(event)? {
                self.prefilter_misses += 1;
                return Ok(DagEvaluationResult {
                    matched_rules: Vec::new(),
                    nodes_evaluated: 1,
                    primitive_evaluations: 0,
                });
            }
            self.prefilter_hits += 1;
        }
        self.evaluate_unfiltered(event)
    }

    /// Evaluate a raw JSON event string, prefiltering before parsing so
    /// non-matching events never pay for deserialization.
    pub fn evaluate_raw(&mut self, json: &str) -> Result<DagEvaluationResult> {
        if let Some(prefilter) = &self.prefilter {
            if !prefilter.matches_raw(json)? {
                self.prefilter_misses += 1;
                return Ok(DagEvaluationResult {
                    matched_rules: Vec::new(),
                    nodes_evaluated: 1,
                    primitive_evaluations: 0,
                });
            }
            self.prefilter_hits += 1;
        }
        let event: Value = serde_json::from_str(json)
            .map_err(|e| SigmaError::ExecutionError(format!("Invalid JSON event: {e}")))?;
        self.evaluate_unfiltered(&event)
    }

    /// Evaluate a batch, reusing scratch buffers between events. Result
    /// order matches input order.
    pub fn evaluate_batch(&mut self, events: &[Value]) -> Result<Vec<DagEvaluationResult>> {
        let mut results = Vec::with_capacity(events.len());
        for event in events {
            results.push(self.evaluate(event)?);
        }
        Ok(results)
    }

    /// Evaluate using externally computed primitive truths, indexed by
    /// `PrimitiveId`. Primitive nodes read from the slice (missing indices
    /// are `false`); only the logical, threshold and result layers execute.
    pub fn evaluate_with_primitive_results(
        &mut self,
        primitive_results: &[bool],
    ) -> Result<DagEvaluationResult> {
        self.reset();

        for (&primitive_id, &node_id) in &self.dag.primitive_map {
            let value = primitive_results
                .get(primitive_id as usize)
                .copied()
                .unwrap_or(false);
            self.node_results.insert(node_id, value);
            self.primitive_evaluations += 1;
        }

        let dag = Arc::clone(&self.dag);
        for &node_id in &dag.execution_order {
            let node = &dag.nodes[node_id as usize];
            if matches!(node.node_type, NodeType::Primitive { .. })
                && node.cached_result.is_none()
            {
                self.node_results.entry(node_id).or_insert(false);
                self.nodes_evaluated += 1;
                continue;
            }
            let value = self.eval_node_sparse_non_primitive(node)?;
            self.node_results.insert(node_id, value);
            self.nodes_evaluated += 1;
        }

        Ok(self.collect_sparse())
    }

    /// (hits, misses) of the prefilter gate, cumulative across events.
    pub fn prefilter_stats(&self) -> (usize, usize) {
        (self.prefilter_hits, self.prefilter_misses)
    }

    pub fn reset(&mut self) {
        self.fast_results.fill(false);
        self.node_results.clear();
        self.nodes_evaluated = 0;
        self.primitive_evaluations = 0;
        self.regex_operations = 0;
        self.deadline = None;
    }

    fn evaluate_unfiltered(&mut self, event: &Value) -> Result<DagEvaluationResult> {
        self.reset();
        self.deadline = self.config.timeout.map(|timeout| Instant::now() + timeout);

        // Ultra-fast path: one rule over a single bare primitive.
        if self.dag.rule_results.len() == 1 && self.dag.nodes.len() <= 3 {
            if let Some(result) = self.evaluate_single_primitive(event)? {
                return Ok(result);
            }
        }

        if self.dag.nodes.len() <= DENSE_NODE_LIMIT {
            self.evaluate_dense(event)
        } else {
            self.evaluate_sparse(event)
        }
    }

    fn evaluate_single_primitive(&mut self, event: &Value) -> Result<Option<DagEvaluationResult>> {
        let dag = Arc::clone(&self.dag);
        let (&rule_id, &result_node_id) = dag.rule_results.iter().next().expect("one rule");
        let result_node = &dag.nodes[result_node_id as usize];
        let &[dep_id] = &result_node.dependencies[..] else {
            return Ok(None);
        };
        let dep = &dag.nodes[dep_id as usize];
        let NodeType::Primitive { primitive_id } = dep.node_type else {
            return Ok(None);
        };
        if dep.cached_result.is_some() {
            return Ok(None);
        }

        let context = EventContext::new(event);
        let matched = self.eval_primitive(primitive_id, &context)?;
        self.nodes_evaluated = 2;
        Ok(Some(DagEvaluationResult {
            matched_rules: if matched { vec![rule_id] } else { Vec::new() },
            nodes_evaluated: self.nodes_evaluated,
            primitive_evaluations: self.primitive_evaluations,
        }))
    }

    pub(crate) fn evaluate_dense(&mut self, event: &Value) -> Result<DagEvaluationResult> {
        let dag = Arc::clone(&self.dag);
        let context = EventContext::new(event);

        for &node_id in &dag.execution_order {
            self.charge_operation()?;
            let node = &dag.nodes[node_id as usize];
            let value = self.eval_node_dense(node, &context)?;
            self.fast_results[node_id as usize] = value;
            self.nodes_evaluated += 1;
        }

        let mut matched_rules: Vec<RuleId> = dag
            .rule_results
            .iter()
            .filter(|(_, &node_id)| self.fast_results[node_id as usize])
            .map(|(&rule_id, _)| rule_id)
            .collect();
        matched_rules.sort_unstable();

        Ok(DagEvaluationResult {
            matched_rules,
            nodes_evaluated: self.nodes_evaluated,
            primitive_evaluations: self.primitive_evaluations,
        })
    }

    pub(crate) fn evaluate_sparse(&mut self, event: &Value) -> Result<DagEvaluationResult> {
        let dag = Arc::clone(&self.dag);
        let context = EventContext::new(event);

        for &node_id in &dag.execution_order {
            self.charge_operation()?;
            let node = &dag.nodes[node_id as usize];
            let value = self.eval_node_sparse(node, &context)?;
            self.node_results.insert(node_id, value);
            self.nodes_evaluated += 1;
        }

        Ok(self.collect_sparse())
    }

    fn collect_sparse(&self) -> DagEvaluationResult {
        let mut matched_rules: Vec<RuleId> = self
            .dag
            .rule_results
            .iter()
            .filter(|(_, node_id)| self.node_results.get(node_id).copied().unwrap_or(false))
            .map(|(&rule_id, _)| rule_id)
            .collect();
        matched_rules.sort_unstable();

        DagEvaluationResult {
            matched_rules,
            nodes_evaluated: self.nodes_evaluated,
            primitive_evaluations: self.primitive_evaluations,
        }
    }

    fn eval_node_dense(&mut self, node: &DagNode, context: &EventContext) -> Result<bool> {
        if let Some(cached) = node.cached_result {
            return Ok(cached);
        }
        match &node.node_type {
            NodeType::Primitive { primitive_id } => self.eval_primitive(*primitive_id, context),
            NodeType::Logical { operation } => {
                let deps = &node.dependencies;
                self.eval_logical(*operation, deps, |s, id| s.fast_results[id as usize])
            }
            NodeType::Threshold { required } => {
                self.eval_threshold(*required, &node.dependencies, |s, id| {
                    s.fast_results[id as usize]
                })
            }
            NodeType::Result { .. } => Ok(node
                .dependencies
                .first()
                .map(|&dep| self.fast_results[dep as usize])
                .unwrap_or(false)),
            // A reachable prefilter node means the gate already passed.
            NodeType::Prefilter { .. } => Ok(true),
        }
    }

    fn eval_node_sparse(&mut self, node: &DagNode, context: &EventContext) -> Result<bool> {
        if let Some(cached) = node.cached_result {
            return Ok(cached);
        }
        match &node.node_type {
            NodeType::Primitive { primitive_id } => self.eval_primitive(*primitive_id, context),
            _ => self.eval_node_sparse_non_primitive(node),
        }
    }

    fn eval_node_sparse_non_primitive(&mut self, node: &DagNode) -> Result<bool> {
        if let Some(cached) = node.cached_result {
            return Ok(cached);
        }
        match &node.node_type {
            NodeType::Logical { operation } => {
                self.eval_logical(*operation, &node.dependencies, |s, id| {
                    s.node_results.get(&id).copied().unwrap_or(false)
                })
            }
            NodeType::Threshold { required } => {
                self.eval_threshold(*required, &node.dependencies, |s, id| {
                    s.node_results.get(&id).copied().unwrap_or(false)
                })
            }
            NodeType::Result { .. } => Ok(node
                .dependencies
                .first()
                .map(|&dep| self.node_results.get(&dep).copied().unwrap_or(false))
                .unwrap_or(false)),
            NodeType::Prefilter { .. } => Ok(true),
            NodeType::Primitive { .. } => Err(SigmaError::ExecutionError(
                "Primitive node reached non-primitive evaluation".to_string(),
            )),
        }
    }

    fn eval_logical(
        &mut self,
        operation: LogicalOp,
        dependencies: &[NodeId],
        read: impl Fn(&Self, NodeId) -> bool,
    ) -> Result<bool> {
        match operation {
            LogicalOp::And => {
                // A degenerate AND with no operands is false, not true.
                if dependencies.is_empty() {
                    return Ok(false);
                }
                for &dep in dependencies {
                    if !read(self, dep) {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            LogicalOp::Or => {
                for &dep in dependencies {
                    if read(self, dep) {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            LogicalOp::Not => {
                if dependencies.len() != 1 {
                    return Err(SigmaError::ExecutionError(
                        "NOT requires exactly one dependency".to_string(),
                    ));
                }
                Ok(!read(self, dependencies[0]))
            }
        }
    }

    fn eval_threshold(
        &mut self,
        required: u32,
        dependencies: &[NodeId],
        read: impl Fn(&Self, NodeId) -> bool,
    ) -> Result<bool> {
        let required = required as usize;
        let mut satisfied = 0usize;
        for (index, &dep) in dependencies.iter().enumerate() {
            if read(self, dep) {
                satisfied += 1;
                if satisfied >= required {
                    return Ok(true);
                }
            }
            // Bail once the remaining dependencies cannot reach the bar.
            let remaining = dependencies.len() - index - 1;
            if satisfied + remaining < required {
                return Ok(false);
            }
        }
        Ok(satisfied >= required)
    }

    fn eval_primitive(&mut self, primitive_id: PrimitiveId, context: &EventContext) -> Result<bool> {
        self.primitive_evaluations += 1;
        if self.primitive_evaluations % TIMEOUT_CHECK_INTERVAL == 0 {
            self.check_deadline()?;
        }

        // Arc-backed handle, a few refcount bumps to clone.
        let primitive = self
            .primitives
            .get(&primitive_id)
            .ok_or(SigmaError::InvalidPrimitiveId(primitive_id))?
            .clone();

        if primitive.is_regex() {
            self.regex_operations += 1;
            if let Some(limit) = self.config.max_regex_operations {
                if self.regex_operations > limit {
                    return Err(SigmaError::TooManyRegexOperations(self.regex_operations));
                }
            }
        }

        match primitive.evaluate(context) {
            Ok(value) => Ok(value),
            // A broken pattern must not fail the event or produce a false
            // positive; the primitive just does not match.
            Err(SigmaError::InvalidRegex(_)) | Err(SigmaError::DangerousRegexPattern(_)) => {
                Ok(false)
            }
            Err(other) => Err(other),
        }
    }

    fn charge_operation(&mut self) -> Result<()> {
        if let Some(limit) = self.config.max_operations {
            let spent = self.nodes_evaluated as u64 + 1;
            if spent > limit {
                return Err(SigmaError::TooManyOperations(spent));
            }
        }
        Ok(())
    }

    fn check_deadline(&self) -> Result<()> {
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                return Err(SigmaError::ExecutionTimeout);
            }
        }
        Ok(())
    }
}
