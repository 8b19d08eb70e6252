//! DAG construction from compiled rulesets.
//!
//! Lowers each rule's (selection map, condition AST) into node fragments
//! appended to one shared [`CompiledDag`]. Primitive nodes are created once
//! per `PrimitiveId`, so predicates shared between rules converge on the same
//! leaf.

use super::prefilter::LiteralPrefilter;
use super::types::{CompiledDag, DagNode, LogicalOp, NodeId, NodeType};
use crate::compiler::parser::{parse_condition, selection_matches_pattern, ConditionAst};
use crate::error::{Result, SigmaError};
use crate::ir::{CompiledRuleset, PrimitiveId, RuleId};
use std::collections::{HashMap, VecDeque};

/// Builder assembling the shared DAG.
pub struct DagBuilder {
    nodes: Vec<DagNode>,
    primitive_nodes: HashMap<PrimitiveId, NodeId>,
    rule_results: HashMap<RuleId, NodeId>,
    enable_prefilter: bool,
    prefilter: Option<LiteralPrefilter>,
}

impl DagBuilder {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            primitive_nodes: HashMap::new(),
            rule_results: HashMap::new(),
            enable_prefilter: true,
            prefilter: None,
        }
    }

    pub fn with_prefilter(mut self, enable: bool) -> Self {
        self.enable_prefilter = enable;
        self
    }

    /// Lower every rule of the ruleset into the shared graph.
    pub fn from_ruleset(mut self, ruleset: &CompiledRuleset) -> Result<Self> {
        if self.enable_prefilter {
            let prefilter = LiteralPrefilter::from_primitives(&ruleset.primitives)?;
            if prefilter.stats().pattern_count > 0 {
                let node_id = self.alloc_node(NodeType::Prefilter {
                    prefilter_id: 0,
                    pattern_count: prefilter.stats().pattern_count,
                });
                debug_assert_eq!(node_id, 0);
                self.prefilter = Some(prefilter);
            }
        }

        for rule in &ruleset.rules {
            let ast = parse_condition(&rule.condition, &rule.selections)?;
            let root = self.lower_condition(&ast, &rule.selections)?;
            let result_node = self.alloc_node(NodeType::Result {
                rule_id: rule.rule_id,
            });
            self.connect(result_node, root);
            self.rule_results.insert(rule.rule_id, result_node);
        }

        Ok(self)
    }

    /// Finalize: topologically order, validate and freeze the DAG.
    pub fn build(self) -> Result<(CompiledDag, Option<LiteralPrefilter>)> {
        let execution_order = topological_sort(&self.nodes)?;
        let result_buffer_size = self.nodes.len();

        let dag = CompiledDag {
            nodes: self.nodes,
            execution_order,
            primitive_map: self.primitive_nodes,
            rule_results: self.rule_results,
            result_buffer_size,
        };
        dag.validate()?;

        Ok((dag, self.prefilter))
    }

    fn alloc_node(&mut self, node_type: NodeType) -> NodeId {
        let node_id = self.nodes.len() as NodeId;
        self.nodes.push(DagNode::new(node_id, node_type));
        node_id
    }

    fn primitive_node(&mut self, primitive_id: PrimitiveId) -> NodeId {
        if let Some(&node_id) = self.primitive_nodes.get(&primitive_id) {
            return node_id;
        }
        let node_id = self.alloc_node(NodeType::Primitive { primitive_id });
        self.primitive_nodes.insert(primitive_id, node_id);
        node_id
    }

    /// Wire `dependent -> dependency`, keeping both edge lists consistent.
    fn connect(&mut self, dependent_id: NodeId, dependency_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(dependent_id as usize) {
            node.add_dependency(dependency_id);
        }
        if let Some(node) = self.nodes.get_mut(dependency_id as usize) {
            node.add_dependent(dependent_id);
        }
    }

    /// The node representing one named selection: its single primitive, or an
    /// AND over all of them (fields within a selection conjoin).
    fn selection_node(
        &mut self,
        name: &str,
        selections: &HashMap<String, Vec<PrimitiveId>>,
    ) -> Result<NodeId> {
        let primitive_ids = selections
            .get(name)
            .ok_or_else(|| SigmaError::CompilationError(format!("Unknown selection: {name}")))?;
        if primitive_ids.is_empty() {
            return Err(SigmaError::CompilationError(format!(
                "Empty selection: {name}"
            )));
        }
        if primitive_ids.len() == 1 {
            return Ok(self.primitive_node(primitive_ids[0]));
        }
        let and_node = self.alloc_node(NodeType::Logical {
            operation: LogicalOp::And,
        });
        for &primitive_id in primitive_ids {
            let leaf = self.primitive_node(primitive_id);
            self.connect(and_node, leaf);
        }
        Ok(and_node)
    }

    /// Selection names matching a glob pattern, sorted for deterministic
    /// node layout.
    fn selections_matching(
        pattern: &str,
        selections: &HashMap<String, Vec<PrimitiveId>>,
    ) -> Vec<String> {
        let mut names: Vec<String> = selections
            .keys()
            .filter(|name| selection_matches_pattern(pattern, name))
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Gather the primitives of the given selections, preserving selection
    /// order and dropping duplicates.
    fn primitives_of(
        names: &[String],
        selections: &HashMap<String, Vec<PrimitiveId>>,
    ) -> Vec<PrimitiveId> {
        let mut out = Vec::new();
        for name in names {
            if let Some(ids) = selections.get(name) {
                for &id in ids {
                    if !out.contains(&id) {
                        out.push(id);
                    }
                }
            }
        }
        out
    }

    fn fan_in_primitives(
        &mut self,
        operation: LogicalOp,
        primitive_ids: &[PrimitiveId],
    ) -> NodeId {
        let gate = self.alloc_node(NodeType::Logical { operation });
        for &primitive_id in primitive_ids {
            let leaf = self.primitive_node(primitive_id);
            self.connect(gate, leaf);
        }
        gate
    }

    fn lower_condition(
        &mut self,
        ast: &ConditionAst,
        selections: &HashMap<String, Vec<PrimitiveId>>,
    ) -> Result<NodeId> {
        match ast {
            ConditionAst::Identifier(name) => self.selection_node(name, selections),
            ConditionAst::And(l, r) => {
                let left = self.lower_condition(l, selections)?;
                let right = self.lower_condition(r, selections)?;
                let node = self.alloc_node(NodeType::Logical {
                    operation: LogicalOp::And,
                });
                self.connect(node, left);
                self.connect(node, right);
                Ok(node)
            }
            ConditionAst::Or(l, r) => {
                let left = self.lower_condition(l, selections)?;
                let right = self.lower_condition(r, selections)?;
                let node = self.alloc_node(NodeType::Logical {
                    operation: LogicalOp::Or,
                });
                self.connect(node, left);
                self.connect(node, right);
                Ok(node)
            }
            ConditionAst::Not(x) => {
                let operand = self.lower_condition(x, selections)?;
                let node = self.alloc_node(NodeType::Logical {
                    operation: LogicalOp::Not,
                });
                self.connect(node, operand);
                Ok(node)
            }
            ConditionAst::OneOfThem | ConditionAst::AllOfThem => {
                let mut names: Vec<String> = selections.keys().cloned().collect();
                names.sort();
                let primitive_ids = Self::primitives_of(&names, selections);
                if primitive_ids.is_empty() {
                    return Err(SigmaError::CompilationError(
                        "Quantifier over 'them' requires at least one selection".to_string(),
                    ));
                }
                let operation = if matches!(ast, ConditionAst::OneOfThem) {
                    LogicalOp::Or
                } else {
                    LogicalOp::And
                };
                Ok(self.fan_in_primitives(operation, &primitive_ids))
            }
            ConditionAst::OneOfPattern(pattern) | ConditionAst::AllOfPattern(pattern) => {
                let names = Self::selections_matching(pattern, selections);
                if names.is_empty() {
                    return Err(SigmaError::CompilationError(format!(
                        "No selections match pattern '{pattern}'"
                    )));
                }
                let primitive_ids = Self::primitives_of(&names, selections);
                let operation = if matches!(ast, ConditionAst::OneOfPattern(_)) {
                    LogicalOp::Or
                } else {
                    LogicalOp::And
                };
                Ok(self.fan_in_primitives(operation, &primitive_ids))
            }
            ConditionAst::CountOfPattern(count, pattern) => {
                let names = Self::selections_matching(pattern, selections);
                if names.is_empty() {
                    return Err(SigmaError::CompilationError(format!(
                        "No selections match pattern '{pattern}'"
                    )));
                }
                if *count as usize > names.len() {
                    return Err(SigmaError::InvalidThreshold(format!(
                        "{count} of {pattern} (only {} selections match)",
                        names.len()
                    )));
                }
                // "at least N of the matching selections hold": a k-of-m gate
                // over the selection nodes.
                let member_nodes: Vec<NodeId> = names
                    .iter()
                    .map(|name| self.selection_node(name, selections))
                    .collect::<Result<_>>()?;
                let gate = self.alloc_node(NodeType::Threshold { required: *count });
                for member in member_nodes {
                    self.connect(gate, member);
                }
                Ok(gate)
            }
        }
    }
}

impl Default for DagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Kahn's algorithm over the builder's node list. Rejects cycles, which the
/// codegen contract should make impossible.
pub(crate) fn topological_sort(nodes: &[DagNode]) -> Result<Vec<NodeId>> {
    let mut in_degree = vec![0usize; nodes.len()];
    for node in nodes {
        in_degree[node.id as usize] = node.dependencies.len();
    }

    let mut queue: VecDeque<NodeId> = (0..nodes.len() as NodeId)
        .filter(|&id| in_degree[id as usize] == 0)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(node_id) = queue.pop_front() {
        order.push(node_id);
        for &dependent_id in &nodes[node_id as usize].dependents {
            let degree = &mut in_degree[dependent_id as usize];
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent_id);
            }
        }
    }

    if order.len() != nodes.len() {
        return Err(SigmaError::CompilationError(
            "Cycle detected in DAG".to_string(),
        ));
    }
    Ok(order)
}
