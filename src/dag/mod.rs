//! The shared execution DAG: construction, optimization and evaluation.
//!
//! Rules compile into fragments of one graph whose primitive leaves are
//! deduplicated across the whole ruleset, so a predicate used by a hundred
//! rules is evaluated once per event. The optimizer folds constants, merges
//! identical subexpressions, removes dead nodes and orders execution by
//! estimated selectivity; the evaluator then runs the frozen graph against
//! events with dense or sparse scratch storage depending on graph size.

pub mod builder;
pub mod evaluator;
pub mod optimizer;
pub mod parallel;
pub mod prefilter;
pub mod types;

pub use builder::DagBuilder;
pub use evaluator::{DagEvaluationResult, DagEvaluator, EvaluatorConfig};
pub use optimizer::DagOptimizer;
pub use parallel::{ParallelDagEvaluator, RulePartition};
pub use prefilter::{LiteralPrefilter, PrefilterStats};
pub use types::{CompiledDag, DagNode, DagStatistics, LogicalOp, NodeId, NodeType};
