use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use tributary::testing::OpSpec;
use tributary::*;

fn spec(kind: &str) -> Arc<dyn ProcedureSpec> {
    Arc::new(OpSpec::new(kind))
}

/// source -> filter -> limit as a fresh plan.
fn linear_plan() -> PlanSpec {
    let mut graph = PlanGraph::new();
    let source = graph.create_logical_node("source0", spec("source"));
    let filter = graph.create_logical_node("filter0", spec("filter"));
    let limit = graph.create_logical_node("limit0", spec("limit"));
    graph.connect(source, filter);
    graph.connect(filter, limit);

    let mut plan = PlanSpec::new(graph, 0);
    plan.add_root(limit);
    plan
}

/// Merges `filter -> limit` pairs into a single fused node.
struct FuseFilterLimit;

impl Rule for FuseFilterLimit {
    fn name(&self) -> &str {
        "FuseFilterLimit"
    }

    fn pattern(&self) -> Pattern {
        Pattern::WithPredecessors("limit".into(), vec![pat("filter")])
    }

    fn rewrite(&self, graph: &mut PlanGraph, node: NodeId) -> Result<Rewrite> {
        let filter = graph.node(node).predecessors()[0];
        let merged = graph.merge_to_logical_node(node, filter, spec("fused-filter-limit"))?;
        Ok(Rewrite::replaced(merged))
    }
}

/// Fires on every match it sees, counting invocations.
struct CountingRule {
    fired: Arc<AtomicUsize>,
}

impl Rule for CountingRule {
    fn name(&self) -> &str {
        "CountingRule"
    }

    fn pattern(&self) -> Pattern {
        any()
    }

    fn rewrite(&self, _graph: &mut PlanGraph, node: NodeId) -> Result<Rewrite> {
        self.fired.fetch_add(1, Ordering::SeqCst);
        Ok(Rewrite::unchanged(node))
    }
}

struct FailingRule;

impl Rule for FailingRule {
    fn name(&self) -> &str {
        "FailingRule"
    }

    fn pattern(&self) -> Pattern {
        pat("filter")
    }

    fn rewrite(&self, _graph: &mut PlanGraph, _node: NodeId) -> Result<Rewrite> {
        bail!("no filter rewrite for this shape")
    }
}

/// Claims a change but deliberately breaks edge symmetry.
struct VandalRule;

impl Rule for VandalRule {
    fn name(&self) -> &str {
        "VandalRule"
    }

    fn pattern(&self) -> Pattern {
        pat("filter")
    }

    fn rewrite(&self, graph: &mut PlanGraph, node: NodeId) -> Result<Rewrite> {
        graph.clear_successors(node);
        Ok(Rewrite::unchanged(node))
    }
}

/// Retags filters whose single consumer is a limit, in place.
struct TagPushableFilter;

impl Rule for TagPushableFilter {
    fn name(&self) -> &str {
        "TagPushableFilter"
    }

    fn pattern(&self) -> Pattern {
        Pattern::WithSingleSuccessor("filter".into(), Box::new(pat("limit")))
    }

    fn rewrite(&self, graph: &mut PlanGraph, node: NodeId) -> Result<Rewrite> {
        graph.node_mut(node).replace_spec(spec("pushable-filter"));
        Ok(Rewrite::replaced(node))
    }
}

#[test]
fn successor_pattern_matches_a_single_limit_consumer() -> Result<()> {
    let mut plan = linear_plan();

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(TagPushableFilter));
    planner.plan(&mut plan)?;

    let roots: Vec<NodeId> = plan.roots().collect();
    let filter = plan.graph.node(roots[0]).predecessors()[0];
    assert_eq!(
        plan.graph.node(filter).kind(),
        ProcedureKind::from("pushable-filter")
    );
    Ok(())
}

#[test]
fn successor_pattern_rejects_multiple_consumers() -> Result<()> {
    // filter feeds two limits, so the single-successor shape does not match
    let mut graph = PlanGraph::new();
    let source = graph.create_logical_node("source0", spec("source"));
    let filter = graph.create_logical_node("filter0", spec("filter"));
    let l1 = graph.create_logical_node("limit0", spec("limit"));
    let l2 = graph.create_logical_node("limit1", spec("limit"));
    graph.connect(source, filter);
    graph.connect(filter, l1);
    graph.connect(filter, l2);

    let mut plan = PlanSpec::new(graph, 0);
    plan.add_root(l1);
    plan.add_root(l2);

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(TagPushableFilter));
    planner.plan(&mut plan)?;

    assert_eq!(
        plan.graph.node(filter).kind(),
        ProcedureKind::from("filter")
    );
    Ok(())
}

#[test]
fn fusion_replaces_the_pair_and_updates_the_root() -> Result<()> {
    let mut plan = linear_plan();

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(FuseFilterLimit));
    planner.plan(&mut plan)?;

    let roots: Vec<NodeId> = plan.roots().collect();
    assert_eq!(roots.len(), 1);
    let root = plan.graph.node(roots[0]);
    assert_eq!(root.kind(), ProcedureKind::from("fused-filter-limit"));
    assert_eq!(root.id(), "merged_filter0_limit0");

    // the fused node sits directly on the source now
    assert_eq!(root.predecessors().len(), 1);
    let source = plan.graph.node(root.predecessors()[0]);
    assert_eq!(source.id(), "source0");
    assert_eq!(source.successors(), &roots[..]);
    Ok(())
}

#[test]
fn planning_reaches_a_fixpoint_without_retrying_exhausted_pairs() -> Result<()> {
    let mut plan = linear_plan();
    let fired = Arc::new(AtomicUsize::new(0));

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(CountingRule { fired: Arc::clone(&fired) }));
    planner.plan(&mut plan)?;

    // once per node; unchanged rewrites are never retried
    assert_eq!(fired.load(Ordering::SeqCst), 3);
    Ok(())
}

#[test]
fn rewrite_error_aborts_planning() {
    let mut plan = linear_plan();

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(FailingRule));
    let err = planner.plan(&mut plan).unwrap_err();
    assert!(err.to_string().contains("no filter rewrite for this shape"));
}

#[test]
fn misbehaving_rule_is_caught_by_the_post_check() {
    let mut plan = linear_plan();

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(VandalRule));
    let err = planner.plan(&mut plan).unwrap_err();
    assert!(err.to_string().contains("integrity violated"), "got: {err}");
}

#[test]
fn integrity_post_check_can_be_disabled() -> Result<()> {
    let mut plan = linear_plan();

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(VandalRule));
    planner.disable_integrity_checks();
    planner.plan(&mut plan)
}

#[test]
fn rules_compose_across_passes() -> Result<()> {
    // source -> filter -> filter -> limit; fusing the top pair exposes a new
    // filter -> limit pair only after relabeling, so here only one fires.
    let mut graph = PlanGraph::new();
    let source = graph.create_logical_node("source0", spec("source"));
    let f1 = graph.create_logical_node("filter0", spec("filter"));
    let f2 = graph.create_logical_node("filter1", spec("filter"));
    let limit = graph.create_logical_node("limit0", spec("limit"));
    graph.connect(source, f1);
    graph.connect(f1, f2);
    graph.connect(f2, limit);

    let mut plan = PlanSpec::new(graph, 0);
    plan.add_root(limit);

    let mut planner = RulePlanner::new();
    planner.add_rule(Box::new(FuseFilterLimit));
    planner.plan(&mut plan)?;

    let roots: Vec<NodeId> = plan.roots().collect();
    let root = plan.graph.node(roots[0]);
    assert_eq!(root.id(), "merged_filter1_limit0");
    // filter0 still feeds the fused node
    assert_eq!(
        plan.graph.node(root.predecessors()[0]).id(),
        "filter0"
    );
    Ok(())
}
