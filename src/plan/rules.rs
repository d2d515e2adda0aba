//! Pattern-matched rewrite rules and the fixpoint planning driver.
//!
//! A [`Rule`] pairs a [`Pattern`] over a node's kind and neighborhood shape
//! with a rewrite function. The [`RulePlanner`] repeatedly scans the plan for
//! the first unapplied match, applies its rewrite, and re-scans, until a full
//! pass changes nothing. Rewrite errors abort planning immediately. After the
//! fixpoint, graph integrity is re-validated unless explicitly disabled -- an
//! escape hatch for rules under test that intentionally violate structure
//! transiently.
//!
//! Convention: a rewrite that substitutes a node returns the replacement and
//! leaves it without successors; the driver reattaches the old node's
//! successors and updates the root set. Rules reconnect predecessors
//! themselves (the merge/swap/replace primitives already do).

use std::collections::HashSet;

use anyhow::Result;
use tracing::debug;

use crate::plan::graph::{PlanGraph, ProcedureKind};
use crate::plan::node_id::NodeId;
use crate::plan::spec::PlanSpec;

/// A predicate over a node and its neighborhood shape.
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Matches every node.
    Any,
    /// Matches a node of the given kind.
    Kind(ProcedureKind),
    /// Matches a node of the given kind whose predecessors match the given
    /// sub-patterns, in order and with exactly that arity.
    WithPredecessors(ProcedureKind, Vec<Pattern>),
    /// Matches a node of the given kind with exactly one successor matching
    /// the sub-pattern.
    WithSingleSuccessor(ProcedureKind, Box<Pattern>),
}

/// Shorthand for [`Pattern::Kind`].
pub fn pat(kind: &str) -> Pattern {
    Pattern::Kind(kind.into())
}

/// Shorthand for [`Pattern::Any`].
pub fn any() -> Pattern {
    Pattern::Any
}

impl Pattern {
    pub fn matches(&self, graph: &PlanGraph, node: NodeId) -> bool {
        let n = graph.node(node);
        match self {
            Self::Any => true,
            Self::Kind(kind) => n.kind() == *kind,
            Self::WithPredecessors(kind, preds) => {
                n.kind() == *kind
                    && n.predecessors().len() == preds.len()
                    && n.predecessors()
                        .iter()
                        .zip(preds)
                        .all(|(p, pattern)| pattern.matches(graph, *p))
            }
            Self::WithSingleSuccessor(kind, succ) => {
                n.kind() == *kind
                    && n.successors().len() == 1
                    && succ.matches(graph, n.successors()[0])
            }
        }
    }
}

/// Outcome of a rewrite: the node now standing where the matched node stood,
/// and whether anything changed.
#[derive(Clone, Copy, Debug)]
pub struct Rewrite {
    pub node: NodeId,
    pub changed: bool,
}

impl Rewrite {
    /// The matched node was left as is.
    pub fn unchanged(node: NodeId) -> Self {
        Self { node, changed: false }
    }

    /// `node` replaces the matched node; the driver reattaches successors.
    pub fn replaced(node: NodeId) -> Self {
        Self { node, changed: true }
    }
}

/// A named graph rewrite.
pub trait Rule: Send + Sync {
    fn name(&self) -> &str;

    fn pattern(&self) -> Pattern;

    /// Rewrite the matched node. Returning [`Rewrite::replaced`] with a new
    /// node hands successor reattachment to the driver; returning
    /// [`Rewrite::unchanged`] marks this (rule, node) pair as exhausted.
    fn rewrite(&self, graph: &mut PlanGraph, node: NodeId) -> Result<Rewrite>;
}

/// Fixpoint driver applying rewrite rules until none fires.
#[derive(Default)]
pub struct RulePlanner {
    rules: Vec<Box<dyn Rule>>,
    disable_integrity_checks: bool,
}

impl RulePlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Box<dyn Rule>) -> &mut Self {
        self.rules.push(rule);
        self
    }

    /// Skip the post-fixpoint integrity validation. Only meant for testing
    /// rules that transiently violate the graph structure.
    pub fn disable_integrity_checks(&mut self) -> &mut Self {
        self.disable_integrity_checks = true;
        self
    }

    /// Apply rules until a full pass over the plan yields no change, then
    /// re-validate graph integrity.
    ///
    /// A (rule, node) pair whose rewrite reports no change is not retried;
    /// a rewrite that reports a change re-opens the scan. A rule that keeps
    /// reporting change without converging is the rule author's bug.
    ///
    /// # Errors
    ///
    /// The first rewrite error is propagated immediately, aborting planning.
    /// A misbehaving rule that breaks edge symmetry or introduces a
    /// root-connected cycle is caught by the post-check and reported as a
    /// planning failure.
    pub fn plan(&self, spec: &mut PlanSpec) -> Result<()> {
        let mut exhausted: HashSet<(String, String)> = HashSet::new();

        'scan: loop {
            for node in spec.visit_order() {
                for rule in &self.rules {
                    let key = (
                        rule.name().to_string(),
                        spec.graph.node(node).id().to_string(),
                    );
                    if exhausted.contains(&key) || !rule.pattern().matches(&spec.graph, node) {
                        continue;
                    }

                    let rewrite = rule.rewrite(&mut spec.graph, node)?;
                    if rewrite.changed {
                        debug!(
                            rule = rule.name(),
                            node = %spec.graph.node(rewrite.node).id(),
                            "rewrite applied"
                        );
                        if rewrite.node != node {
                            self.update_successors(spec, node, rewrite.node);
                        }
                        continue 'scan;
                    }
                    exhausted.insert(key);
                }
            }
            break;
        }

        if !self.disable_integrity_checks {
            spec.check_integrity()?;
        }
        Ok(())
    }

    /// Driver half of the dangling-edge convention: move the superseded
    /// node's successors onto its replacement and fix the root set.
    fn update_successors(&self, spec: &mut PlanSpec, old: NodeId, new: NodeId) {
        let succs = spec.graph.node(old).successors().to_vec();
        for &succ in &succs {
            let preds: Vec<NodeId> = spec
                .graph
                .node(succ)
                .predecessors()
                .iter()
                .map(|&p| if p == old { new } else { p })
                .collect();
            spec.graph.clear_predecessors(succ);
            spec.graph.add_predecessors(succ, &preds);
        }
        spec.graph.add_successors(new, &succs);
        spec.graph.clear_successors(old);
        if spec.is_root(old) {
            spec.replace_root(old, new);
        }
    }
}
