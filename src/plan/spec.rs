//! Complete plans: root sets, traversals, and the integrity checker.

use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fmt;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::plan::graph::PlanGraph;
use crate::plan::node_id::NodeId;
use crate::values::Time;

/// Resource limits attached to a plan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceManagement {
    pub concurrency_quota: usize,
    pub memory_bytes_quota: u64,
}

/// A complete query plan: the node arena, its root (sink) nodes, resource
/// limits, and the reference timestamp used for relative time resolution.
#[derive(Debug)]
pub struct PlanSpec {
    pub graph: PlanGraph,
    roots: BTreeSet<NodeId>,
    pub resources: ResourceManagement,
    pub now: Time,
}

impl PlanSpec {
    pub fn new(graph: PlanGraph, now: Time) -> Self {
        Self {
            graph,
            roots: BTreeSet::new(),
            resources: ResourceManagement::default(),
            now,
        }
    }

    /// Mark a node as a root. Roots are the sink nodes of the plan, with no
    /// successors.
    pub fn add_root(&mut self, root: NodeId) {
        self.roots.insert(root);
    }

    pub fn is_root(&self, node: NodeId) -> bool {
        self.roots.contains(&node)
    }

    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.roots.iter().copied()
    }

    /// Replace one of the root nodes of the plan.
    pub fn replace_root(&mut self, root: NodeId, with: NodeId) {
        self.roots.remove(&root);
        self.roots.insert(with);
    }

    /// Every node reachable backward from the roots, in breadth-first
    /// discovery order. This is the scan order of the rewrite driver.
    pub fn visit_order(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let roots: Vec<NodeId> = self.roots().collect();
        // walk cannot fail here; the visitor is infallible
        let _ = walk_predecessors(&self.graph, &roots, |id| {
            order.push(id);
            Ok(())
        });
        order
    }

    /// All attached nodes in topological order, sources first.
    ///
    /// # Errors
    ///
    /// If the reachable subgraph contains a cycle.
    pub fn topo_sort(&self) -> Result<Vec<NodeId>> {
        let attached = self.visit_order();
        let attached_set: HashSet<NodeId> = attached.iter().copied().collect();

        let mut in_degree: Vec<(NodeId, usize)> = attached
            .iter()
            .map(|&id| {
                let n = self
                    .graph
                    .node(id)
                    .predecessors()
                    .iter()
                    .filter(|p| attached_set.contains(p))
                    .count();
                (id, n)
            })
            .collect();
        let mut queue: VecDeque<NodeId> = in_degree
            .iter()
            .filter(|(_, n)| *n == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(attached.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &succ in self.graph.node(id).successors() {
                if !attached_set.contains(&succ) {
                    continue;
                }
                if let Some(entry) = in_degree.iter_mut().find(|(n, _)| *n == succ) {
                    entry.1 -= 1;
                    if entry.1 == 0 {
                        queue.push_back(succ);
                    }
                }
            }
        }
        if order.len() != attached.len() {
            bail!("plan contains a cycle");
        }
        Ok(order)
    }

    /// Check the integrity of the plan:
    ///   - node A is a predecessor of B iff B is a successor of A;
    ///   - the graph reachable from the roots is acyclic.
    ///
    /// The check walks backward from every root, collecting nodes with no
    /// predecessors as sources, then walks forward from those sources,
    /// verifying edge symmetry at every visited node. A node reachable in
    /// one direction but not the other (which is how a root-connected cycle
    /// manifests) is an error.
    ///
    /// Known limitation, preserved deliberately: a cycle disconnected from
    /// both the root set and the discovered sources is not detected, because
    /// neither walk ever reaches it.
    pub fn check_integrity(&self) -> Result<()> {
        let sinks: Vec<NodeId> = self.roots().collect();
        let mut sources = Vec::new();
        let mut backward = HashSet::new();

        walk_predecessors(&self.graph, &sinks, |id| {
            backward.insert(id);
            if self.graph.node(id).predecessors().is_empty() {
                sources.push(id);
            }
            symmetry_check(&self.graph, id)
        })?;

        let mut forward = HashSet::new();
        walk_successors(&self.graph, &sources, |id| {
            forward.insert(id);
            symmetry_check(&self.graph, id)
        })?;

        for id in backward.symmetric_difference(&forward) {
            bail!(
                "integrity violated: node {} is reachable in only one traversal direction",
                self.graph.node(*id).id()
            );
        }
        Ok(())
    }

    /// A renderable, JSON-serializable summary of the plan.
    pub fn explain(&self) -> PlanExplanation {
        let nodes = self
            .visit_order()
            .into_iter()
            .map(|id| {
                let node = self.graph.node(id);
                ExplainNode {
                    id: node.id().to_string(),
                    kind: node.kind().to_string(),
                    root: self.is_root(id),
                    predecessors: node
                        .predecessors()
                        .iter()
                        .map(|p| self.graph.node(*p).id().to_string())
                        .collect(),
                }
            })
            .collect();
        PlanExplanation { nodes, now: self.now }
    }
}

fn symmetry_check(graph: &PlanGraph, id: NodeId) -> Result<()> {
    let node = graph.node(id);
    for &pred in node.predecessors() {
        if !graph.node(pred).successors().contains(&id) {
            bail!(
                "integrity violated: {} is predecessor of {}, but {} is not successor of {}",
                graph.node(pred).id(),
                node.id(),
                node.id(),
                graph.node(pred).id()
            );
        }
    }
    for &succ in node.successors() {
        if !graph.node(succ).predecessors().contains(&id) {
            bail!(
                "integrity violated: {} is successor of {}, but {} is not predecessor of {}",
                graph.node(succ).id(),
                node.id(),
                node.id(),
                graph.node(succ).id()
            );
        }
    }
    Ok(())
}

/// Breadth-first walk along predecessor edges, visiting each reachable node
/// exactly once. The visitor's first error aborts the walk.
pub fn walk_predecessors<F>(graph: &PlanGraph, starts: &[NodeId], mut f: F) -> Result<()>
where
    F: FnMut(NodeId) -> Result<()>,
{
    walk(starts, &mut f, |id| graph.node(id).predecessors().to_vec())
}

/// Breadth-first walk along successor edges, visiting each reachable node
/// exactly once.
pub fn walk_successors<F>(graph: &PlanGraph, starts: &[NodeId], mut f: F) -> Result<()>
where
    F: FnMut(NodeId) -> Result<()>,
{
    walk(starts, &mut f, |id| graph.node(id).successors().to_vec())
}

fn walk<F, N>(starts: &[NodeId], f: &mut F, neighbors: N) -> Result<()>
where
    F: FnMut(NodeId) -> Result<()>,
    N: Fn(NodeId) -> Vec<NodeId>,
{
    let mut seen = HashSet::new();
    let mut queue: VecDeque<NodeId> = starts.iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        f(id)?;
        queue.extend(neighbors(id));
    }
    Ok(())
}

/// One node of a plan explanation.
#[derive(Clone, Debug)]
pub struct ExplainNode {
    pub id: String,
    pub kind: String,
    pub root: bool,
    pub predecessors: Vec<String>,
}

/// Renderable summary of a plan, produced by [`PlanSpec::explain`].
#[derive(Clone, Debug)]
pub struct PlanExplanation {
    pub nodes: Vec<ExplainNode>,
    pub now: Time,
}

impl PlanExplanation {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "now": self.now,
            "nodes": self.nodes.iter().map(|n| json!({
                "id": n.id,
                "kind": n.kind,
                "root": n.root,
                "predecessors": n.predecessors,
            })).collect::<Vec<_>>(),
        })
    }
}

impl fmt::Display for PlanExplanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for n in &self.nodes {
            let marker = if n.root { " (root)" } else { "" };
            writeln!(f, "{} [{}]{} <- {:?}", n.id, n.kind, marker, n.predecessors)?;
        }
        Ok(())
    }
}
