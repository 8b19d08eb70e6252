//! DAG optimization passes.
//!
//! The optimizer runs on a deep copy of the DAG, in a fixed pass order:
//! constant folding, common subexpression elimination, dead code
//! elimination, then a selectivity-aware rebuild of the execution order.
//! Every pass leaves the structural invariants intact; node IDs are
//! compacted after passes that delete nodes, so callers must not hold IDs
//! across an optimization.

use super::builder::topological_sort;
use super::types::{CompiledDag, DagNode, LogicalOp, NodeId, NodeType};
use crate::error::{Result, SigmaError};
use std::collections::{HashMap, HashSet};

const FOLD_ROUND_LIMIT: usize = 10;
const CSE_ROUND_LIMIT: usize = 5;

/// Configurable pass pipeline over a [`CompiledDag`].
pub struct DagOptimizer {
    enable_constant_folding: bool,
    enable_cse: bool,
    enable_dce: bool,
    enable_reordering: bool,
    fold_round_limit: usize,
    cse_round_limit: usize,
}

impl DagOptimizer {
    /// All passes enabled with default round limits (optimization level 2).
    pub fn new() -> Self {
        Self {
            enable_constant_folding: true,
            enable_cse: true,
            enable_dce: true,
            enable_reordering: true,
            fold_round_limit: FOLD_ROUND_LIMIT,
            cse_round_limit: CSE_ROUND_LIMIT,
        }
    }

    /// Pass selection for an engine optimization level (`0..=3`).
    pub fn with_level(level: u8) -> Self {
        let mut optimizer = Self::new();
        match level {
            0 => {
                optimizer.enable_constant_folding = false;
                optimizer.enable_cse = false;
                optimizer.enable_dce = false;
                optimizer.enable_reordering = false;
            }
            1 => {
                optimizer.enable_cse = false;
                optimizer.enable_reordering = false;
            }
            2 => {}
            _ => {
                // Aggressive: same passes, iterated within higher bounds.
                optimizer.fold_round_limit = FOLD_ROUND_LIMIT * 2;
                optimizer.cse_round_limit = CSE_ROUND_LIMIT * 2;
            }
        }
        optimizer
    }

    pub fn with_constant_folding(mut self, enable: bool) -> Self {
        self.enable_constant_folding = enable;
        self
    }

    pub fn with_cse(mut self, enable: bool) -> Self {
        self.enable_cse = enable;
        self
    }

    pub fn with_dce(mut self, enable: bool) -> Self {
        self.enable_dce = enable;
        self
    }

    pub fn with_reordering(mut self, enable: bool) -> Self {
        self.enable_reordering = enable;
        self
    }

    /// Run the configured passes on a copy of `dag`.
    pub fn optimize(&self, dag: &CompiledDag) -> Result<CompiledDag> {
        let mut dag = dag.clone();

        if self.enable_constant_folding {
            self.constant_folding(&mut dag);
        }
        if self.enable_cse {
            self.common_subexpression_elimination(&mut dag);
        }
        if self.enable_dce {
            Self::dead_code_elimination(&mut dag);
        }

        dag.execution_order = if self.enable_reordering {
            selectivity_order(&dag)?
        } else {
            topological_sort(&dag.nodes)?
        };
        dag.result_buffer_size = dag.nodes.len();
        dag.validate()?;

        Ok(dag)
    }

    /// Fold logical and threshold nodes whose operands are all constants.
    ///
    /// Folded nodes keep their `cached_result` and are disconnected from
    /// their operands, leaving the operands for DCE to reclaim.
    fn constant_folding(&self, dag: &mut CompiledDag) {
        for _ in 0..self.fold_round_limit {
            let mut folds: Vec<(NodeId, bool)> = Vec::new();
            for node in &dag.nodes {
                if node.cached_result.is_some() {
                    continue;
                }
                if let Some(value) = evaluate_constant(node, dag) {
                    folds.push((node.id, value));
                }
            }
            if folds.is_empty() {
                break;
            }
            for (node_id, value) in folds {
                let dependencies =
                    std::mem::take(&mut dag.nodes[node_id as usize].dependencies);
                dag.nodes[node_id as usize].cached_result = Some(value);
                for dep_id in dependencies {
                    dag.nodes[dep_id as usize]
                        .dependents
                        .retain(|&id| id != node_id);
                }
            }
        }
    }

    /// Merge structurally identical non-Result nodes.
    fn common_subexpression_elimination(&self, dag: &mut CompiledDag) {
        for _ in 0..self.cse_round_limit {
            let mut signatures: HashMap<String, NodeId> = HashMap::new();
            let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
            let mut memo: HashMap<NodeId, String> = HashMap::new();

            for node in &dag.nodes {
                if matches!(node.node_type, NodeType::Result { .. }) {
                    continue;
                }
                let signature = expression_signature(node.id, dag, &mut memo);
                match signatures.get(&signature) {
                    Some(&canonical) if canonical != node.id => {
                        mapping.insert(node.id, canonical);
                    }
                    Some(_) => {}
                    None => {
                        signatures.insert(signature, node.id);
                    }
                }
            }

            if mapping.is_empty() {
                break;
            }
            apply_node_mapping(dag, &mapping);
        }
    }

    /// Remove nodes unreachable from any Result node. Prefilter nodes are
    /// roots of their own and survive.
    fn dead_code_elimination(dag: &mut CompiledDag) {
        let mut reachable: HashSet<NodeId> = HashSet::new();
        let mut stack: Vec<NodeId> = dag.rule_results.values().copied().collect();
        stack.extend(
            dag.nodes
                .iter()
                .filter(|n| matches!(n.node_type, NodeType::Prefilter { .. }))
                .map(|n| n.id),
        );

        while let Some(node_id) = stack.pop() {
            if !reachable.insert(node_id) {
                continue;
            }
            if let Some(node) = dag.get_node(node_id) {
                stack.extend(node.dependencies.iter().copied());
            }
        }

        if reachable.len() == dag.nodes.len() {
            return;
        }
        dag.nodes.retain(|node| reachable.contains(&node.id));
        dag.primitive_map
            .retain(|_, node_id| reachable.contains(node_id));
        dag.rule_results
            .retain(|_, node_id| reachable.contains(node_id));
        compact(dag);
    }
}

impl Default for DagOptimizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate a node whose dependencies are all constant, if possible.
fn evaluate_constant(node: &DagNode, dag: &CompiledDag) -> Option<bool> {
    let foldable = matches!(
        node.node_type,
        NodeType::Logical { .. } | NodeType::Threshold { .. }
    );
    if !foldable {
        return None;
    }

    let mut values = Vec::with_capacity(node.dependencies.len());
    for &dep_id in &node.dependencies {
        values.push(dag.get_node(dep_id)?.cached_result?);
    }

    match &node.node_type {
        NodeType::Logical {
            operation: LogicalOp::And,
        } => Some(!values.is_empty() && values.iter().all(|&v| v)),
        NodeType::Logical {
            operation: LogicalOp::Or,
        } => Some(values.iter().any(|&v| v)),
        NodeType::Logical {
            operation: LogicalOp::Not,
        } => {
            if values.len() == 1 {
                Some(!values[0])
            } else {
                None
            }
        }
        NodeType::Threshold { required } => {
            Some(values.iter().filter(|&&v| v).count() >= *required as usize)
        }
        _ => None,
    }
}

/// Canonical CSE signature of a node, memoized across the pass.
///
/// Dependency signatures are sorted so operand order does not defeat
/// merging. Constant-folded nodes collapse to their value.
fn expression_signature(
    node_id: NodeId,
    dag: &CompiledDag,
    memo: &mut HashMap<NodeId, String>,
) -> String {
    if let Some(cached) = memo.get(&node_id) {
        return cached.clone();
    }
    let node = match dag.get_node(node_id) {
        Some(node) => node,
        None => return format!("X{node_id}"),
    };

    let signature = if let Some(value) = node.cached_result {
        format!("C{value}")
    } else {
        match &node.node_type {
            NodeType::Primitive { primitive_id } => format!("P{primitive_id}"),
            NodeType::Prefilter {
                prefilter_id,
                pattern_count,
            } => format!("F{prefilter_id}:{pattern_count}"),
            NodeType::Result { rule_id } => format!("R{rule_id}"),
            NodeType::Logical { operation } => {
                let mut deps: Vec<String> = node
                    .dependencies
                    .iter()
                    .map(|&dep| expression_signature(dep, dag, memo))
                    .collect();
                deps.sort();
                let joined = deps.join(",");
                match operation {
                    LogicalOp::And => format!("AND({joined})"),
                    LogicalOp::Or => format!("OR({joined})"),
                    LogicalOp::Not => format!("NOT({joined})"),
                }
            }
            NodeType::Threshold { required } => {
                let mut deps: Vec<String> = node
                    .dependencies
                    .iter()
                    .map(|&dep| expression_signature(dep, dag, memo))
                    .collect();
                deps.sort();
                format!("GE{required}({})", deps.join(","))
            }
        }
    };

    memo.insert(node_id, signature.clone());
    signature
}

/// Redirect every reference from duplicate nodes to their canonical node,
/// delete the duplicates, and restore dense IDs and back edges.
fn apply_node_mapping(dag: &mut CompiledDag, mapping: &HashMap<NodeId, NodeId>) {
    dag.nodes.retain(|node| !mapping.contains_key(&node.id));

    for node in &mut dag.nodes {
        let mut rewritten = Vec::with_capacity(node.dependencies.len());
        for &dep_id in &node.dependencies {
            let target = mapping.get(&dep_id).copied().unwrap_or(dep_id);
            if !rewritten.contains(&target) {
                rewritten.push(target);
            }
        }
        node.dependencies = rewritten;
    }

    for node_id in dag.primitive_map.values_mut() {
        if let Some(&target) = mapping.get(node_id) {
            *node_id = target;
        }
    }
    for node_id in dag.rule_results.values_mut() {
        if let Some(&target) = mapping.get(node_id) {
            *node_id = target;
        }
    }

    compact(dag);
}

/// Renumber nodes to dense IDs after deletions and rebuild `dependents`
/// wholesale from `dependencies`.
fn compact(dag: &mut CompiledDag) {
    let remap: HashMap<NodeId, NodeId> = dag
        .nodes
        .iter()
        .enumerate()
        .map(|(index, node)| (node.id, index as NodeId))
        .collect();

    for node in &mut dag.nodes {
        node.id = remap[&node.id];
        for dep_id in &mut node.dependencies {
            *dep_id = remap[dep_id];
        }
        node.dependents.clear();
    }

    let edges: Vec<(NodeId, NodeId)> = dag
        .nodes
        .iter()
        .flat_map(|node| node.dependencies.iter().map(move |&dep| (dep, node.id)))
        .collect();
    for (dependency, dependent) in edges {
        dag.nodes[dependency as usize].add_dependent(dependent);
    }

    for node_id in dag.primitive_map.values_mut() {
        *node_id = remap[node_id];
    }
    for node_id in dag.rule_results.values_mut() {
        *node_id = remap[node_id];
    }
    dag.result_buffer_size = dag.nodes.len();
}

/// Estimated probability a node evaluates true; lower runs earlier.
fn node_selectivity(node: &DagNode) -> f64 {
    match &node.node_type {
        NodeType::Prefilter { .. } => 0.01,
        NodeType::Primitive { primitive_id } => (0.1 + f64::from(*primitive_id) * 0.1).min(0.9),
        NodeType::Logical {
            operation: LogicalOp::And,
        } => 0.3,
        NodeType::Threshold { .. } => 0.4,
        NodeType::Logical {
            operation: LogicalOp::Not,
        } => 0.5,
        NodeType::Logical {
            operation: LogicalOp::Or,
        } => 0.7,
        NodeType::Result { .. } => 1.0,
    }
}

/// Topological order where each ready wave is sorted most-selective-first,
/// so discriminating nodes run before the expressions consuming them.
fn selectivity_order(dag: &CompiledDag) -> Result<Vec<NodeId>> {
    let mut in_degree: Vec<usize> = dag
        .nodes
        .iter()
        .map(|node| node.dependencies.len())
        .collect();
    let mut ready: Vec<NodeId> = dag
        .nodes
        .iter()
        .filter(|node| node.dependencies.is_empty())
        .map(|node| node.id)
        .collect();
    let mut order = Vec::with_capacity(dag.nodes.len());

    while !ready.is_empty() {
        ready.sort_by(|&a, &b| {
            let sa = node_selectivity(&dag.nodes[a as usize]);
            let sb = node_selectivity(&dag.nodes[b as usize]);
            sa.partial_cmp(&sb)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });

        let wave = std::mem::take(&mut ready);
        for &node_id in &wave {
            order.push(node_id);
        }
        for node_id in wave {
            for &dependent in &dag.nodes[node_id as usize].dependents {
                let degree = &mut in_degree[dependent as usize];
                *degree -= 1;
                if *degree == 0 {
                    ready.push(dependent);
                }
            }
        }
    }

    if order.len() != dag.nodes.len() {
        return Err(SigmaError::CompilationError(
            "Cycle detected in DAG during optimization".to_string(),
        ));
    }
    Ok(order)
}
