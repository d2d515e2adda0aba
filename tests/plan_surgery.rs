use std::sync::Arc;

use anyhow::Result;
use tributary::testing::OpSpec;
use tributary::*;

fn spec(kind: &str) -> Arc<dyn ProcedureSpec> {
    Arc::new(OpSpec::new(kind))
}

/// source -> filter -> limit, with limit as the root.
fn linear_plan() -> (PlanSpec, NodeId, NodeId, NodeId) {
    let mut graph = PlanGraph::new();
    let source = graph.create_logical_node("source0", spec("source"));
    let filter = graph.create_logical_node("filter0", spec("filter"));
    let limit = graph.create_logical_node("limit0", spec("limit"));
    graph.connect(source, filter);
    graph.connect(filter, limit);

    let mut plan = PlanSpec::new(graph, 0);
    plan.add_root(limit);
    (plan, source, filter, limit)
}

#[test]
fn connect_keeps_both_edge_directions() -> Result<()> {
    let (plan, source, filter, limit) = linear_plan();

    assert_eq!(plan.graph.node(source).successors(), &[filter]);
    assert_eq!(plan.graph.node(filter).predecessors(), &[source]);
    assert_eq!(plan.graph.node(filter).successors(), &[limit]);
    assert_eq!(plan.graph.node(limit).predecessors(), &[filter]);
    plan.check_integrity()
}

#[test]
fn merge_rewires_predecessors_and_builds_combined_id() -> Result<()> {
    let (mut plan, source, filter, limit) = linear_plan();

    let merged = plan
        .graph
        .merge_to_logical_node(limit, filter, spec("filter-limit"))?;

    assert_eq!(plan.graph.node(merged).id(), "merged_filter0_limit0");
    assert_eq!(plan.graph.node(merged).predecessors(), &[source]);
    assert!(plan.graph.node(merged).successors().is_empty());
    assert_eq!(plan.graph.node(source).successors(), &[merged]);
    Ok(())
}

#[test]
fn merged_ids_do_not_nest_the_prefix() -> Result<()> {
    let mut graph = PlanGraph::new();
    let a = graph.create_logical_node("a", spec("a"));
    let b = graph.create_logical_node("b", spec("b"));
    let c = graph.create_logical_node("c", spec("c"));
    graph.connect(a, b);
    graph.connect(b, c);

    let ab = graph.merge_to_logical_node(b, a, spec("ab"))?;
    graph.add_successors(ab, &[c]);
    graph.clear_predecessors(c);
    graph.add_predecessors(c, &[ab]);

    let abc = graph.merge_to_logical_node(c, ab, spec("abc"))?;
    assert_eq!(graph.node(abc).id(), "merged_a_b_c");
    Ok(())
}

#[test]
fn failed_merge_leaves_inputs_unmodified() {
    let mut graph = PlanGraph::new();
    let a = graph.create_logical_node("a", spec("a"));
    let b = graph.create_logical_node("b", spec("b"));
    // not adjacent: no edge between them

    let count = graph.node_count();
    let err = graph.merge_to_logical_node(b, a, spec("ab")).unwrap_err();
    assert!(
        err.to_string()
            .contains("cannot merge b and a due to topological issues")
    );
    assert_eq!(graph.node_count(), count);
    assert!(graph.node(a).successors().is_empty());
    assert!(graph.node(b).predecessors().is_empty());
}

#[test]
fn swap_repositions_bottom_above_a_copy_of_top() -> Result<()> {
    // source -> bottom -> top, where top has two logical consumers v1/v2
    let mut graph = PlanGraph::new();
    let source = graph.create_logical_node("source0", spec("source"));
    let bottom = graph.create_logical_node("window0", spec("window"));
    let top = graph.create_logical_node("filter0", spec("filter"));
    graph.connect(source, bottom);
    graph.connect(bottom, top);

    let swapped = graph.swap_plan_nodes(top, bottom)?;
    assert_eq!(swapped, bottom);

    // the copy of top sits where bottom was
    let copy = graph.node(bottom).predecessors()[0];
    assert_eq!(graph.node(copy).id(), "filter0_copy");
    assert_eq!(graph.node(copy).predecessors(), &[source]);
    assert_eq!(graph.node(copy).successors(), &[bottom]);
    assert_eq!(graph.node(source).successors(), &[copy]);

    // returned node awaits successor reattachment by the driver
    assert!(graph.node(bottom).successors().is_empty());
    Ok(())
}

#[test]
fn swap_rejects_multi_output_bottom() {
    let mut graph = PlanGraph::new();
    let source = graph.create_logical_node("source0", spec("source"));
    let bottom = graph.create_logical_node("window0", spec("window"));
    let top = graph.create_logical_node("filter0", spec("filter"));
    let other = graph.create_logical_node("count0", spec("count"));
    graph.connect(source, bottom);
    graph.connect(bottom, top);
    graph.connect(bottom, other);

    let err = graph.swap_plan_nodes(top, bottom).unwrap_err();
    assert!(
        err.to_string()
            .contains("cannot swap nodes filter0 and window0 due to topological issue")
    );
}

#[test]
fn replace_node_takes_over_all_predecessors() {
    let mut graph = PlanGraph::new();
    let p1 = graph.create_logical_node("p1", spec("source"));
    let p2 = graph.create_logical_node("p2", spec("source"));
    let old = graph.create_logical_node("union0", spec("union"));
    graph.connect(p1, old);
    graph.connect(p2, old);
    let new = graph.create_logical_node("union1", spec("union"));

    graph.replace_node(old, new);

    assert_eq!(graph.node(new).predecessors(), &[p1, p2]);
    assert_eq!(graph.node(p1).successors(), &[new]);
    assert_eq!(graph.node(p2).successors(), &[new]);
    assert!(graph.node(old).predecessors().is_empty());
}

#[test]
fn shallow_copy_shares_spec_but_not_edges() {
    let (mut plan, _, filter, _) = linear_plan();

    let copy = plan.graph.shallow_copy(filter);
    let copied = plan.graph.node(copy);
    assert_eq!(copied.id(), "filter0_copy");
    assert_eq!(copied.kind(), plan.graph.node(filter).kind());
    assert!(copied.predecessors().is_empty());
    assert!(copied.successors().is_empty());
}

#[test]
fn explain_lists_every_node_with_its_edges() -> Result<()> {
    let (plan, _, _, _) = linear_plan();

    let explanation = plan.explain();
    let json = explanation.to_json();
    let nodes = json["nodes"].as_array().expect("nodes array");
    assert_eq!(nodes.len(), 3);

    let rendered = explanation.to_string();
    assert!(rendered.contains("filter0"));
    Ok(())
}
