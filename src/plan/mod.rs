//! The plan graph model: an arena of nodes wrapping procedure specs, the
//! structural rewrite primitives, the integrity checker, and the
//! pattern-matched rule engine that drives planning to a fixpoint.

pub mod graph;
pub mod node_id;
pub mod rules;
pub mod spec;

pub use graph::{Bounds, NodeClass, PlanGraph, PlanNode, ProcedureKind, ProcedureSpec, StackEntry};
pub use node_id::NodeId;
pub use rules::{Pattern, Rewrite, Rule, RulePlanner, any, pat};
pub use spec::{
    PlanExplanation, PlanSpec, ResourceManagement, walk_predecessors, walk_successors,
};
