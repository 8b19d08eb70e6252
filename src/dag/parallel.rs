//! Parallel evaluation over rule partitions.
//!
//! Rules are split into balanced partitions at construction time. Per
//! event, the shared primitive layer is evaluated exactly once on the
//! calling thread; worker threads then evaluate each partition's logical
//! subgraph against the shared primitive results and the matched-rule sets
//! are merged. Rule partitions may share logical nodes; those are cheap and
//! re-evaluated locally rather than synchronized.

use super::evaluator::{DagEvaluationResult, DagEvaluator};
use super::prefilter::LiteralPrefilter;
use super::types::{CompiledDag, LogicalOp, NodeId, NodeType};
use crate::config::ParallelConfig;
use crate::error::{Result, SigmaError};
use crate::ir::{PrimitiveId, RuleId};
use crate::matcher::{CompiledPrimitive, EventContext};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One worker's share of the rule set.
#[derive(Debug, Clone, Default)]
pub struct RulePartition {
    pub rule_ids: Vec<RuleId>,
    /// Non-primitive nodes this partition must evaluate, in execution
    /// order.
    node_ids: Vec<NodeId>,
    /// Estimated evaluation weight, used for balancing.
    pub complexity: usize,
}

impl RulePartition {
    pub fn rule_count(&self) -> usize {
        self.rule_ids.len()
    }
}

/// Partitioned evaluator for large rule sets.
pub struct ParallelDagEvaluator {
    dag: Arc<CompiledDag>,
    primitives: HashMap<PrimitiveId, CompiledPrimitive>,
    prefilter: Option<Arc<LiteralPrefilter>>,
    config: ParallelConfig,
    partitions: Vec<RulePartition>,
    /// Sequential evaluator used when partitioning would not pay off.
    fallback: DagEvaluator,
}

impl ParallelDagEvaluator {
    pub fn new(
        dag: Arc<CompiledDag>,
        primitives: HashMap<PrimitiveId, CompiledPrimitive>,
        prefilter: Option<Arc<LiteralPrefilter>>,
        config: ParallelConfig,
    ) -> Self {
        let partitions = Self::partition_rules(&dag, &config);
        let fallback = DagEvaluator::new(Arc::clone(&dag), primitives.clone())
            .with_prefilter(prefilter.clone());
        Self {
            dag,
            primitives,
            prefilter,
            config,
            partitions,
            fallback,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partitions(&self) -> &[RulePartition] {
        &self.partitions
    }

    /// Greedy balance: heaviest rules first, each onto the lightest
    /// partition.
    fn partition_rules(dag: &CompiledDag, config: &ParallelConfig) -> Vec<RulePartition> {
        let rule_count = dag.rule_results.len();
        let by_capacity = rule_count / config.min_rules_per_thread.max(1);
        let partition_count = config.effective_threads().min(by_capacity.max(1)).max(1);
        if partition_count <= 1 {
            return Vec::new();
        }

        let mut weighted: Vec<(RuleId, NodeId, usize)> = dag
            .rule_results
            .iter()
            .map(|(&rule_id, &node_id)| (rule_id, node_id, Self::subtree_size(dag, node_id)))
            .collect();
        weighted.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

        let mut partitions = vec![RulePartition::default(); partition_count];
        let mut members: Vec<HashSet<NodeId>> = vec![HashSet::new(); partition_count];
        for (rule_id, result_node, weight) in weighted {
            let lightest = partitions
                .iter()
                .enumerate()
                .min_by_key(|(_, p)| p.complexity)
                .map(|(i, _)| i)
                .unwrap_or(0);
            partitions[lightest].rule_ids.push(rule_id);
            partitions[lightest].complexity += weight;
            Self::collect_upper_nodes(dag, result_node, &mut members[lightest]);
        }

        for (partition, member) in partitions.iter_mut().zip(&members) {
            partition.rule_ids.sort_unstable();
            partition.node_ids = dag
                .execution_order
                .iter()
                .copied()
                .filter(|id| member.contains(id))
                .collect();
        }
        partitions.retain(|partition| !partition.rule_ids.is_empty());
        partitions
    }

    fn subtree_size(dag: &CompiledDag, root: NodeId) -> usize {
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(node_id) = stack.pop() {
            if seen.insert(node_id) {
                if let Some(node) = dag.get_node(node_id) {
                    stack.extend(node.dependencies.iter().copied());
                }
            }
        }
        seen.len()
    }

    /// Nodes above the primitive layer reachable from `root`.
    fn collect_upper_nodes(dag: &CompiledDag, root: NodeId, out: &mut HashSet<NodeId>) {
        let mut stack = vec![root];
        while let Some(node_id) = stack.pop() {
            let Some(node) = dag.get_node(node_id) else {
                continue;
            };
            if matches!(node.node_type, NodeType::Primitive { .. }) {
                continue;
            }
            if out.insert(node_id) {
                stack.extend(node.dependencies.iter().copied());
            }
        }
    }

    /// Evaluate one event across all partitions.
    pub fn evaluate(&mut self, event: &Value) -> Result<DagEvaluationResult> {
        if let Some(prefilter) = &self.prefilter {
            if !prefilter.matches(event)? {
                return Ok(DagEvaluationResult {
                    matched_rules: Vec::new(),
                    nodes_evaluated: 1,
                    primitive_evaluations: 0,
                });
            }
        }

        if self.partitions.len() <= 1 {
            return self.fallback.evaluate(event);
        }

        // Shared primitive layer, evaluated once.
        let mut primitive_results: HashMap<NodeId, bool> = HashMap::new();
        let mut primitive_evaluations = 0usize;
        let context = EventContext::new(event);
        for node in &self.dag.nodes {
            let NodeType::Primitive { primitive_id } = node.node_type else {
                continue;
            };
            let value = match node.cached_result {
                Some(cached) => cached,
                None => {
                    primitive_evaluations += 1;
                    let primitive = self
                        .primitives
                        .get(&primitive_id)
                        .ok_or(SigmaError::InvalidPrimitiveId(primitive_id))?;
                    match primitive.evaluate(&context) {
                        Ok(value) => value,
                        Err(SigmaError::InvalidRegex(_))
                        | Err(SigmaError::DangerousRegexPattern(_)) => false,
                        Err(other) => return Err(other),
                    }
                }
            };
            primitive_results.insert(node.id, value);
        }

        let dag = &self.dag;
        let shared = &primitive_results;
        let worker_results: Vec<Result<(Vec<RuleId>, usize)>> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .partitions
                .iter()
                .map(|partition| {
                    scope.spawn(move || evaluate_partition(dag, partition, shared))
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("partition worker panicked"))
                .collect()
        });

        let mut matched_rules = Vec::new();
        let mut nodes_evaluated = primitive_results.len();
        for worker in worker_results {
            let (mut rules, visited) = worker?;
            matched_rules.append(&mut rules);
            nodes_evaluated += visited;
        }
        matched_rules.sort_unstable();

        Ok(DagEvaluationResult {
            matched_rules,
            nodes_evaluated,
            primitive_evaluations,
        })
    }

    /// Evaluate a batch. Small batches stay on the calling thread; larger
    /// ones are chunked across workers, with each result placed at its
    /// input index.
    pub fn evaluate_batch(&mut self, events: &[Value]) -> Result<Vec<DagEvaluationResult>> {
        if events.len() < self.config.min_batch_size_for_parallelism.max(1) {
            return self.fallback.evaluate_batch(events);
        }

        let threads = self.config.effective_threads().max(1);
        let chunk_size = events.len().div_ceil(threads);
        let dag = &self.dag;
        let primitives = &self.primitives;
        let prefilter = &self.prefilter;

        let chunk_results: Vec<Result<Vec<DagEvaluationResult>>> =
            std::thread::scope(|scope| {
                let handles: Vec<_> = events
                    .chunks(chunk_size)
                    .map(|chunk| {
                        scope.spawn(move || {
                            let mut evaluator =
                                DagEvaluator::new(Arc::clone(dag), primitives.clone())
                                    .with_prefilter(prefilter.clone());
                            evaluator.evaluate_batch(chunk)
                        })
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|handle| handle.join().expect("batch worker panicked"))
                    .collect()
            });

        let mut results = Vec::with_capacity(events.len());
        for chunk in chunk_results {
            results.extend(chunk?);
        }
        if results.len() != events.len() {
            return Err(SigmaError::BatchSizeMismatch);
        }
        Ok(results)
    }
}

/// Evaluate one partition's logical subgraph over the shared primitive
/// results.
fn evaluate_partition(
    dag: &CompiledDag,
    partition: &RulePartition,
    primitive_results: &HashMap<NodeId, bool>,
) -> Result<(Vec<RuleId>, usize)> {
    let mut local: HashMap<NodeId, bool> = HashMap::with_capacity(partition.node_ids.len());
    let read = |local: &HashMap<NodeId, bool>, node_id: NodeId| -> bool {
        local
            .get(&node_id)
            .or_else(|| primitive_results.get(&node_id))
            .copied()
            .unwrap_or(false)
    };

    let mut nodes_evaluated = 0usize;
    for &node_id in &partition.node_ids {
        let node = &dag.nodes[node_id as usize];
        nodes_evaluated += 1;
        let value = if let Some(cached) = node.cached_result {
            cached
        } else {
            match &node.node_type {
                NodeType::Logical { operation } => match operation {
                    LogicalOp::And => {
                        !node.dependencies.is_empty()
                            && node.dependencies.iter().all(|&dep| read(&local, dep))
                    }
                    LogicalOp::Or => node.dependencies.iter().any(|&dep| read(&local, dep)),
                    LogicalOp::Not => {
                        if node.dependencies.len() != 1 {
                            return Err(SigmaError::ExecutionError(
                                "NOT requires exactly one dependency".to_string(),
                            ));
                        }
                        !read(&local, node.dependencies[0])
                    }
                },
                NodeType::Threshold { required } => {
                    node.dependencies
                        .iter()
                        .filter(|&&dep| read(&local, dep))
                        .count()
                        >= *required as usize
                }
                NodeType::Result { .. } => node
                    .dependencies
                    .first()
                    .map(|&dep| read(&local, dep))
                    .unwrap_or(false),
                NodeType::Prefilter { .. } => true,
                NodeType::Primitive { .. } => {
                    return Err(SigmaError::ExecutionError(
                        "Primitive node in partition upper layer".to_string(),
                    ))
                }
            }
        };
        local.insert(node_id, value);
    }

    let matched: Vec<RuleId> = partition
        .rule_ids
        .iter()
        .copied()
        .filter(|rule_id| {
            dag.rule_results
                .get(rule_id)
                .map(|node_id| read(&local, *node_id))
                .unwrap_or(false)
        })
        .collect();

    Ok((matched, nodes_evaluated))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;
    use crate::dag::builder::DagBuilder;
    use crate::matcher::MatcherBuilder;
    use serde_json::json;

    fn parallel_evaluator(rule_count: usize, config: ParallelConfig) -> ParallelDagEvaluator {
        let rules: Vec<String> = (0..rule_count)
            .map(|i| {
                format!(
                    "title: R{i}\ndetection:\n    a:\n        EventID: {}\n    b:\n        User: u{}\n    condition: a and b\n",
                    4000 + i,
                    i % 4
                )
            })
            .collect();
        let mut compiler = Compiler::new();
        for rule in &rules {
            compiler.compile_rule(rule).unwrap();
        }
        let ruleset = compiler.into_ruleset();
        let (dag, _) = DagBuilder::new()
            .with_prefilter(false)
            .from_ruleset(&ruleset)
            .unwrap()
            .build()
            .unwrap();
        let primitives = MatcherBuilder::new().compile(&ruleset.primitives).unwrap();
        ParallelDagEvaluator::new(Arc::new(dag), primitives, None, config)
    }

    fn test_config(threads: usize) -> ParallelConfig {
        ParallelConfig {
            num_threads: threads,
            min_rules_per_thread: 4,
            min_batch_size_for_parallelism: 4,
        }
    }

    #[test]
    fn test_partitions_cover_all_rules_once() {
        let evaluator = parallel_evaluator(24, test_config(4));
        assert!(evaluator.partition_count() > 1);

        let mut all_rules: Vec<RuleId> = evaluator
            .partitions()
            .iter()
            .flat_map(|p| p.rule_ids.iter().copied())
            .collect();
        all_rules.sort_unstable();
        assert_eq!(all_rules, (0..24).collect::<Vec<_>>());
    }

    #[test]
    fn test_small_rule_sets_stay_sequential() {
        let mut evaluator = parallel_evaluator(3, test_config(4));
        assert_eq!(evaluator.partition_count(), 0);
        let result = evaluator
            .evaluate(&json!({"EventID": "4000", "User": "u0"}))
            .unwrap();
        assert_eq!(result.matched_rules, vec![0]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let mut parallel = parallel_evaluator(24, test_config(4));
        let mut sequential = parallel_evaluator(24, test_config(1));

        let events = [
            json!({"EventID": "4007", "User": "u3"}),
            json!({"EventID": "4000", "User": "u1"}),
            json!({"EventID": "9999", "User": "u0"}),
            json!({}),
        ];
        for event in &events {
            let p = parallel.evaluate(event).unwrap();
            let s = sequential.evaluate(event).unwrap();
            assert_eq!(p.matched_rules, s.matched_rules, "mismatch on {event}");
        }
    }

    #[test]
    fn test_shared_primitives_evaluated_once() {
        let mut evaluator = parallel_evaluator(24, test_config(4));
        let result = evaluator
            .evaluate(&json!({"EventID": "4003", "User": "u3"}))
            .unwrap();
        // 24 EventID primitives + 4 User primitives, each exactly once.
        assert_eq!(result.primitive_evaluations, 28);
        assert_eq!(result.matched_rules, vec![3]);
    }

    #[test]
    fn test_parallel_batch_preserves_input_order() {
        let mut evaluator = parallel_evaluator(24, test_config(4));
        let events: Vec<Value> = (0..50)
            .map(|i| json!({"EventID": format!("{}", 4000 + (i % 24)), "User": format!("u{}", (i % 24) % 4)}))
            .collect();
        let results = evaluator.evaluate_batch(&events).unwrap();
        assert_eq!(results.len(), events.len());
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.matched_rules, vec![(i % 24) as RuleId], "index {i}");
        }
    }

    #[test]
    fn test_batch_below_threshold_is_sequential() {
        let mut evaluator = parallel_evaluator(24, test_config(4));
        let events = vec![json!({"EventID": "4001", "User": "u1"})];
        let results = evaluator.evaluate_batch(&events).unwrap();
        assert_eq!(results[0].matched_rules, vec![1]);
    }
}
