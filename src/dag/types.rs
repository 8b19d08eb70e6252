//! Core DAG types.

use crate::error::{Result, SigmaError};
use crate::ir::{PrimitiveId, RuleId};
use std::collections::HashMap;

/// Dense identifier of a DAG node; always a valid index into
/// [`CompiledDag::nodes`].
pub type NodeId = u32;

/// Logical operations carried by [`NodeType::Logical`] nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Node kinds of the execution graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeType {
    /// Leaf node evaluating one deduplicated primitive.
    Primitive { primitive_id: PrimitiveId },

    /// Boolean combination of dependency results.
    Logical { operation: LogicalOp },

    /// K-of-m node: true when at least `required` dependencies are true.
    /// Lowered from `N of pattern*` conditions with `1 < N < m`.
    Threshold { required: u32 },

    /// Terminal node recording the verdict for one rule. Exactly one
    /// dependency.
    Result { rule_id: RuleId },

    /// Literal multi-pattern gate scheduled before everything else; a miss
    /// short-circuits the whole evaluation.
    Prefilter {
        prefilter_id: u32,
        pattern_count: usize,
    },
}

/// One node of the shared DAG.
#[derive(Debug, Clone)]
pub struct DagNode {
    pub id: NodeId,
    pub node_type: NodeType,
    /// Nodes whose results this node consumes. No duplicates.
    pub dependencies: Vec<NodeId>,
    /// Nodes consuming this node's result. No duplicates; kept consistent
    /// with `dependencies` across all mutations.
    pub dependents: Vec<NodeId>,
    /// Set only by constant folding; evaluators return it without touching
    /// dependencies.
    pub cached_result: Option<bool>,
}

impl DagNode {
    pub fn new(id: NodeId, node_type: NodeType) -> Self {
        Self {
            id,
            node_type,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            cached_result: None,
        }
    }

    pub fn add_dependency(&mut self, dependency_id: NodeId) {
        if !self.dependencies.contains(&dependency_id) {
            self.dependencies.push(dependency_id);
        }
    }

    pub fn add_dependent(&mut self, dependent_id: NodeId) {
        if !self.dependents.contains(&dependent_id) {
            self.dependents.push(dependent_id);
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.dependencies.is_empty()
    }

    pub fn is_root(&self) -> bool {
        self.dependents.is_empty()
    }
}

/// The compiled, shared execution graph.
///
/// Frozen after [`DagBuilder::build`](super::DagBuilder::build); evaluators
/// share it read-only across threads and keep all per-event state on their
/// side.
#[derive(Debug, Clone, Default)]
pub struct CompiledDag {
    /// All nodes, indexed by `NodeId`.
    pub nodes: Vec<DagNode>,
    /// A linear extension of the dependency order, selectivity-sorted within
    /// ready waves by the optimizer.
    pub execution_order: Vec<NodeId>,
    /// Primitive ID to the single node carrying it.
    pub primitive_map: HashMap<PrimitiveId, NodeId>,
    /// Rule ID to its Result node.
    pub rule_results: HashMap<RuleId, NodeId>,
    /// Scratch buffer length evaluators must allocate.
    pub result_buffer_size: usize,
}

impl CompiledDag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_node(&self, node_id: NodeId) -> Option<&DagNode> {
        self.nodes.get(node_id as usize)
    }

    pub fn get_node_mut(&mut self, node_id: NodeId) -> Option<&mut DagNode> {
        self.nodes.get_mut(node_id as usize)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Verify the structural invariants: dense IDs, complete execution order,
    /// valid edges, bidirectional consistency, and per-kind arity rules.
    pub fn validate(&self) -> Result<()> {
        for (index, node) in self.nodes.iter().enumerate() {
            if node.id as usize != index {
                return Err(SigmaError::CompilationError(format!(
                    "Node ID {} does not match its index {index}",
                    node.id
                )));
            }
        }

        if self.execution_order.len() != self.nodes.len() {
            return Err(SigmaError::CompilationError(
                "Execution order length mismatch".to_string(),
            ));
        }
        let mut seen = vec![false; self.nodes.len()];
        for &node_id in &self.execution_order {
            match seen.get_mut(node_id as usize) {
                Some(slot) if !*slot => *slot = true,
                _ => {
                    return Err(SigmaError::CompilationError(format!(
                        "Execution order repeats or exceeds node {node_id}"
                    )))
                }
            }
        }

        for node in &self.nodes {
            for &dep_id in &node.dependencies {
                let dep = self.get_node(dep_id).ok_or_else(|| {
                    SigmaError::CompilationError(format!(
                        "Invalid dependency: {} -> {dep_id}",
                        node.id
                    ))
                })?;
                if !dep.dependents.contains(&node.id) {
                    return Err(SigmaError::CompilationError(format!(
                        "Missing back edge: {} -> {dep_id}",
                        node.id
                    )));
                }
            }
            for &dependent_id in &node.dependents {
                let dependent = self.get_node(dependent_id).ok_or_else(|| {
                    SigmaError::CompilationError(format!(
                        "Invalid dependent: {} -> {dependent_id}",
                        node.id
                    ))
                })?;
                if !dependent.dependencies.contains(&node.id) {
                    return Err(SigmaError::CompilationError(format!(
                        "Missing forward edge: {dependent_id} -> {}",
                        node.id
                    )));
                }
            }

            // Constant-folded nodes are disconnected from their operands, so
            // arity rules only bind nodes that still evaluate.
            if node.cached_result.is_some() {
                continue;
            }
            match &node.node_type {
                NodeType::Result { .. } if node.dependencies.len() != 1 => {
                    return Err(SigmaError::CompilationError(format!(
                        "Result node {} must have exactly one dependency",
                        node.id
                    )));
                }
                NodeType::Logical {
                    operation: LogicalOp::Not,
                } if node.dependencies.len() != 1 => {
                    return Err(SigmaError::CompilationError(format!(
                        "Not node {} must have exactly one dependency",
                        node.id
                    )));
                }
                NodeType::Primitive { .. } | NodeType::Prefilter { .. }
                    if !node.dependencies.is_empty() =>
                {
                    return Err(SigmaError::CompilationError(format!(
                        "Leaf node {} must not have dependencies",
                        node.id
                    )));
                }
                NodeType::Threshold { required }
                    if node.dependencies.len() < *required as usize =>
                {
                    return Err(SigmaError::CompilationError(format!(
                        "Threshold node {} requires {required} of {} dependencies",
                        node.id,
                        node.dependencies.len()
                    )));
                }
                _ => {}
            }
        }

        for &result_node_id in self.rule_results.values() {
            if self.get_node(result_node_id).is_none() {
                return Err(SigmaError::CompilationError(format!(
                    "Invalid result node: {result_node_id}"
                )));
            }
        }
        for (&primitive_id, &node_id) in &self.primitive_map {
            match self.get_node(node_id).map(|n| &n.node_type) {
                Some(NodeType::Primitive { primitive_id: pid }) if *pid == primitive_id => {}
                _ => {
                    return Err(SigmaError::CompilationError(format!(
                        "Primitive map entry {primitive_id} -> {node_id} is stale"
                    )))
                }
            }
        }

        Ok(())
    }

    pub fn statistics(&self) -> DagStatistics {
        DagStatistics::from_dag(self)
    }
}

/// Structure counters for reporting and tests.
#[derive(Debug, Clone)]
pub struct DagStatistics {
    pub total_nodes: usize,
    pub primitive_nodes: usize,
    pub logical_nodes: usize,
    pub threshold_nodes: usize,
    pub result_nodes: usize,
    pub prefilter_nodes: usize,
    pub max_depth: usize,
    pub avg_fanin: f64,
    /// Primitives whose node feeds more than one dependent.
    pub shared_primitives: usize,
    pub estimated_memory_bytes: usize,
}

impl DagStatistics {
    pub fn from_dag(dag: &CompiledDag) -> Self {
        let mut primitive_nodes = 0;
        let mut logical_nodes = 0;
        let mut threshold_nodes = 0;
        let mut result_nodes = 0;
        let mut prefilter_nodes = 0;
        let mut total_edges = 0;
        let mut shared_primitives = 0;

        for node in &dag.nodes {
            match &node.node_type {
                NodeType::Primitive { .. } => {
                    primitive_nodes += 1;
                    if node.dependents.len() > 1 {
                        shared_primitives += 1;
                    }
                }
                NodeType::Logical { .. } => logical_nodes += 1,
                NodeType::Threshold { .. } => threshold_nodes += 1,
                NodeType::Result { .. } => result_nodes += 1,
                NodeType::Prefilter { .. } => prefilter_nodes += 1,
            }
            total_edges += node.dependencies.len();
        }

        let avg_fanin = if dag.nodes.is_empty() {
            0.0
        } else {
            total_edges as f64 / dag.nodes.len() as f64
        };

        let estimated_memory_bytes = dag.nodes.len() * std::mem::size_of::<DagNode>()
            + dag.execution_order.len() * std::mem::size_of::<NodeId>()
            + dag.primitive_map.len()
                * (std::mem::size_of::<PrimitiveId>() + std::mem::size_of::<NodeId>())
            + dag.rule_results.len()
                * (std::mem::size_of::<RuleId>() + std::mem::size_of::<NodeId>());

        Self {
            total_nodes: dag.nodes.len(),
            primitive_nodes,
            logical_nodes,
            threshold_nodes,
            result_nodes,
            prefilter_nodes,
            max_depth: Self::max_depth(dag),
            avg_fanin,
            shared_primitives,
            estimated_memory_bytes,
        }
    }

    fn max_depth(dag: &CompiledDag) -> usize {
        let mut depths: HashMap<NodeId, usize> = HashMap::new();
        let mut max_depth = 0;
        for &node_id in &dag.execution_order {
            if let Some(node) = dag.get_node(node_id) {
                let depth = node
                    .dependencies
                    .iter()
                    .map(|dep| depths.get(dep).copied().unwrap_or(0))
                    .max()
                    .unwrap_or(0)
                    + 1;
                depths.insert(node_id, depth);
                max_depth = max_depth.max(depth);
            }
        }
        max_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// p0, p1 -> and(2) -> result(3)
    fn small_dag() -> CompiledDag {
        let mut dag = CompiledDag::new();

        let mut p0 = DagNode::new(0, NodeType::Primitive { primitive_id: 0 });
        p0.add_dependent(2);
        let mut p1 = DagNode::new(1, NodeType::Primitive { primitive_id: 1 });
        p1.add_dependent(2);
        let mut and_node = DagNode::new(
            2,
            NodeType::Logical {
                operation: LogicalOp::And,
            },
        );
        and_node.dependencies = vec![0, 1];
        and_node.add_dependent(3);
        let mut result = DagNode::new(3, NodeType::Result { rule_id: 0 });
        result.dependencies = vec![2];

        dag.nodes = vec![p0, p1, and_node, result];
        dag.execution_order = vec![0, 1, 2, 3];
        dag.primitive_map = HashMap::from([(0, 0), (1, 1)]);
        dag.rule_results = HashMap::from([(0, 3)]);
        dag.result_buffer_size = 4;
        dag
    }

    #[test]
    fn test_node_edges_deduplicate() {
        let mut node = DagNode::new(
            0,
            NodeType::Logical {
                operation: LogicalOp::And,
            },
        );
        node.add_dependency(1);
        node.add_dependency(2);
        node.add_dependency(1);
        assert_eq!(node.dependencies, vec![1, 2]);

        node.add_dependent(9);
        node.add_dependent(9);
        assert_eq!(node.dependents, vec![9]);
    }

    #[test]
    fn test_leaf_and_root() {
        let dag = small_dag();
        assert!(dag.get_node(0).unwrap().is_leaf());
        assert!(!dag.get_node(0).unwrap().is_root());
        assert!(dag.get_node(3).unwrap().is_root());
        assert!(!dag.get_node(3).unwrap().is_leaf());
    }

    #[test]
    fn test_validate_accepts_well_formed() {
        assert!(small_dag().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_order_mismatch() {
        let mut dag = small_dag();
        dag.execution_order.pop();
        assert!(dag.validate().is_err());

        let mut dag = small_dag();
        dag.execution_order = vec![0, 0, 2, 3];
        assert!(dag.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_missing_back_edge() {
        let mut dag = small_dag();
        dag.nodes[0].dependents.clear();
        let err = dag.validate().unwrap_err();
        assert!(err.to_string().contains("back edge"));
    }

    #[test]
    fn test_validate_rejects_result_arity() {
        let mut dag = small_dag();
        dag.nodes[3].dependencies.push(0);
        dag.nodes[0].dependents.push(3);
        let err = dag.validate().unwrap_err();
        assert!(err.to_string().contains("exactly one dependency"));
    }

    #[test]
    fn test_validate_rejects_primitive_with_dependencies() {
        let mut dag = small_dag();
        dag.nodes[1].dependencies.push(0);
        dag.nodes[0].dependents.push(1);
        assert!(dag.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_underfilled_threshold() {
        let mut dag = small_dag();
        dag.nodes[2].node_type = NodeType::Threshold { required: 3 };
        let err = dag.validate().unwrap_err();
        assert!(err.to_string().contains("Threshold"));
    }

    #[test]
    fn test_validate_rejects_stale_primitive_map() {
        let mut dag = small_dag();
        dag.primitive_map.insert(7, 2);
        assert!(dag.validate().is_err());
    }

    #[test]
    fn test_statistics() {
        let dag = small_dag();
        let stats = dag.statistics();
        assert_eq!(stats.total_nodes, 4);
        assert_eq!(stats.primitive_nodes, 2);
        assert_eq!(stats.logical_nodes, 1);
        assert_eq!(stats.result_nodes, 1);
        assert_eq!(stats.threshold_nodes, 0);
        assert_eq!(stats.max_depth, 3);
        assert_eq!(stats.shared_primitives, 0);
        assert!(stats.avg_fanin > 0.0);
        assert!(stats.estimated_memory_bytes > 0);
    }

    #[test]
    fn test_statistics_shared_primitive() {
        let mut dag = small_dag();
        // p0 feeding a second consumer counts as shared.
        dag.nodes[0].dependents.push(3);
        let stats = dag.statistics();
        assert_eq!(stats.shared_primitives, 1);
    }

    #[test]
    fn test_statistics_empty() {
        let stats = CompiledDag::new().statistics();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.max_depth, 0);
        assert_eq!(stats.avg_fanin, 0.0);
    }
}
