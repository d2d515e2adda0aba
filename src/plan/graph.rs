//! The plan node arena and its structural mutation primitives.
//!
//! A [`PlanGraph`] owns every node of a plan in an arena; edges are vectors
//! of [`NodeId`] handles. The mutation primitives mirror what rewrite rules
//! need: appending and clearing one side of a node's edge lists, shallow
//! copies, merging two adjacent nodes, swapping two adjacent nodes, and
//! replacing a node. Edge symmetry is *not* maintained automatically by the
//! single-sided operations -- bulk rewrites perform the detach/reattach
//! sequence themselves and the planner re-validates integrity afterwards.
//!
//! Ownership convention for dangling edges after a rewrite: rules reconnect
//! predecessors, the planning driver reconnects successors.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

use crate::plan::node_id::NodeId;
use crate::values::Time;

/// Denotes the kind of operation a procedure performs.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProcedureKind(String);

impl ProcedureKind {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProcedureKind {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProcedureKind {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The immutable parameters identifying what operation a plan node performs.
///
/// Concrete operations implement this capability set rather than inheriting
/// from a base type; `as_any` lets executors downcast to the concrete spec
/// when instantiating a transformation.
pub trait ProcedureSpec: fmt::Debug + Send + Sync {
    fn kind(&self) -> ProcedureKind;

    /// An independent copy of this spec. Specs are immutable once attached
    /// to a node; copies are taken when a rewrite needs to derive a new one.
    fn copy_spec(&self) -> Arc<dyn ProcedureSpec>;

    fn as_any(&self) -> &dyn Any;
}

/// Time bounds carried by a plan node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub start: Time,
    pub stop: Time,
}

/// One frame of the source location trail that created a node. A node built
/// by a rewrite rule has no call stack.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEntry {
    pub function: String,
    pub file: String,
    pub line: u32,
}

/// Whether a node belongs to the logical or the physical plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeClass {
    Logical,
    Physical,
}

/// A vertex in the plan graph.
#[derive(Debug)]
pub struct PlanNode {
    id: String,
    class: NodeClass,
    spec: Arc<dyn ProcedureSpec>,
    bounds: Option<Bounds>,
    predecessors: Vec<NodeId>,
    successors: Vec<NodeId>,
    call_stack: Vec<StackEntry>,
}

impl PlanNode {
    /// Identifier for this plan node, unique within a plan.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn class(&self) -> NodeClass {
        self.class
    }

    pub fn spec(&self) -> &Arc<dyn ProcedureSpec> {
        &self.spec
    }

    /// The kind of procedure represented by this node.
    pub fn kind(&self) -> ProcedureKind {
        self.spec.kind()
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.bounds
    }

    pub fn set_bounds(&mut self, bounds: Option<Bounds>) {
        self.bounds = bounds;
    }

    /// Nodes executed immediately before this node.
    pub fn predecessors(&self) -> &[NodeId] {
        &self.predecessors
    }

    /// Nodes executed immediately after this node.
    pub fn successors(&self) -> &[NodeId] {
        &self.successors
    }

    pub fn call_stack(&self) -> &[StackEntry] {
        &self.call_stack
    }

    pub fn set_call_stack(&mut self, stack: Vec<StackEntry>) {
        self.call_stack = stack;
    }

    /// Replace the procedure spec of this node with another. The node keeps
    /// its identity but may change kind.
    pub fn replace_spec(&mut self, spec: Arc<dyn ProcedureSpec>) {
        self.spec = spec;
    }
}

/// Derive the identifier of a merged node from its inputs. Any previously
/// applied `merged_` prefix is stripped so identifiers do not grow without
/// bound under repeated merges; the result is deterministic, which matters
/// for plan comparison in tests.
fn merge_ids(top: &str, bottom: &str) -> String {
    let top = top.strip_prefix("merged_").unwrap_or(top);
    let bottom = bottom.strip_prefix("merged_").unwrap_or(bottom);
    format!("merged_{bottom}_{top}")
}

/// Arena of plan nodes with index-vector edge lists.
#[derive(Debug, Default)]
pub struct PlanGraph {
    nodes: Vec<PlanNode>,
}

impl PlanGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, node: PlanNode) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(node);
        id
    }

    pub fn create_logical_node(&mut self, id: &str, spec: Arc<dyn ProcedureSpec>) -> NodeId {
        self.create_node(id, NodeClass::Logical, spec)
    }

    pub fn create_physical_node(&mut self, id: &str, spec: Arc<dyn ProcedureSpec>) -> NodeId {
        self.create_node(id, NodeClass::Physical, spec)
    }

    fn create_node(&mut self, id: &str, class: NodeClass, spec: Arc<dyn ProcedureSpec>) -> NodeId {
        self.insert(PlanNode {
            id: id.to_string(),
            class,
            spec,
            bounds: None,
            predecessors: Vec::new(),
            successors: Vec::new(),
            call_stack: Vec::new(),
        })
    }

    /// Number of arena slots, including detached nodes superseded by
    /// rewrites.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Borrow a node. Handles are only ever minted by this graph, so an
    /// unknown handle is a caller bug.
    pub fn node(&self, id: NodeId) -> &PlanNode {
        &self.nodes[id.raw()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut PlanNode {
        &mut self.nodes[id.raw()]
    }

    /// Append edges on one side only. Symmetry is the caller's concern.
    pub fn add_successors(&mut self, id: NodeId, succs: &[NodeId]) {
        self.nodes[id.raw()].successors.extend_from_slice(succs);
    }

    pub fn add_predecessors(&mut self, id: NodeId, preds: &[NodeId]) {
        self.nodes[id.raw()].predecessors.extend_from_slice(preds);
    }

    /// Detach all successor edges of `id` without touching the opposite
    /// nodes' edge lists.
    pub fn clear_successors(&mut self, id: NodeId) {
        self.nodes[id.raw()].successors.clear();
    }

    pub fn clear_predecessors(&mut self, id: NodeId) {
        self.nodes[id.raw()].predecessors.clear();
    }

    /// Connect `from -> to`, maintaining symmetry on both edge lists.
    pub fn connect(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.raw()].successors.push(to);
        self.nodes[to.raw()].predecessors.push(from);
    }

    /// A new node with the same procedure spec and empty edge lists, used
    /// when a rewrite needs a structural duplicate without shared edge
    /// state. The copy's identifier is suffixed with `_copy`.
    pub fn shallow_copy(&mut self, id: NodeId) -> NodeId {
        let src = &self.nodes[id.raw()];
        let node = PlanNode {
            id: format!("{}_copy", src.id),
            class: src.class,
            spec: src.spec.copy_spec(),
            bounds: src.bounds,
            predecessors: Vec::new(),
            successors: Vec::new(),
            call_stack: Vec::new(),
        };
        self.insert(node)
    }

    /// Merge adjacent `top` and `bottom` into a new logical node carrying
    /// `spec`.
    ///
    /// ```text
    ///  V1     V2       V1            V2       <-- successors
    ///    \   /
    ///     top             mergedNode
    ///      |      ==>         |
    ///    bottom               W
    ///      |
    ///      W
    /// ```
    ///
    /// The merged node takes over `bottom`'s predecessors, and each of those
    /// predecessors' successor lists is rewired to point at the merged node
    /// in place of `bottom`. Its successors are left empty; attaching them is
    /// the planning driver's responsibility.
    ///
    /// # Errors
    ///
    /// If `top` does not have exactly one predecessor equal to `bottom`, or
    /// `bottom` does not have exactly one successor. Neither input node is
    /// modified in that case.
    pub fn merge_to_logical_node(
        &mut self,
        top: NodeId,
        bottom: NodeId,
        spec: Arc<dyn ProcedureSpec>,
    ) -> Result<NodeId> {
        self.merge_nodes(top, bottom, spec, NodeClass::Logical)
    }

    /// Physical-plan variant of [`PlanGraph::merge_to_logical_node`].
    pub fn merge_to_physical_node(
        &mut self,
        top: NodeId,
        bottom: NodeId,
        spec: Arc<dyn ProcedureSpec>,
    ) -> Result<NodeId> {
        self.merge_nodes(top, bottom, spec, NodeClass::Physical)
    }

    fn merge_nodes(
        &mut self,
        top: NodeId,
        bottom: NodeId,
        spec: Arc<dyn ProcedureSpec>,
        class: NodeClass,
    ) -> Result<NodeId> {
        let t = &self.nodes[top.raw()];
        let b = &self.nodes[bottom.raw()];
        if t.predecessors.len() != 1 || b.successors.len() != 1 || t.predecessors[0] != bottom {
            bail!("cannot merge {} and {} due to topological issues", t.id, b.id);
        }

        let id = merge_ids(&t.id, &b.id);
        let preds = b.predecessors.clone();
        let merged = self.insert(PlanNode {
            id,
            class,
            spec,
            bounds: None,
            predecessors: preds.clone(),
            successors: Vec::new(),
            call_stack: Vec::new(),
        });
        for pred in preds {
            for succ in self.nodes[pred.raw()].successors.iter_mut() {
                if *succ == bottom {
                    *succ = merged;
                }
            }
        }
        Ok(merged)
    }

    /// Swap adjacent `top` and `bottom`, returning `bottom` repositioned
    /// where `top` was.
    ///
    /// ```text
    ///  V1   V2        V1   V2
    ///    \ /
    ///     A              B
    ///     |     ==>      |
    ///     B          copy of A
    ///     |              |
    ///     W              W
    /// ```
    ///
    /// The copy of `top` is positioned where `bottom` was. Successors of the
    /// original `top` are not updated and the returned node has no
    /// successors; attaching them is the planning driver's responsibility.
    ///
    /// # Errors
    ///
    /// If `top` does not have exactly one predecessor, or `bottom` does not
    /// have exactly one predecessor and one successor.
    pub fn swap_plan_nodes(&mut self, top: NodeId, bottom: NodeId) -> Result<NodeId> {
        {
            let t = &self.nodes[top.raw()];
            let b = &self.nodes[bottom.raw()];
            if t.predecessors.len() != 1 || b.successors.len() != 1 || b.predecessors.len() != 1 {
                bail!("cannot swap nodes {} and {} due to topological issue", t.id, b.id);
            }
        }

        let new_bottom = self.shallow_copy(top);
        let bottom_pred = self.nodes[bottom.raw()].predecessors[0];
        self.nodes[new_bottom.raw()].successors.push(bottom);
        self.nodes[new_bottom.raw()].predecessors.push(bottom_pred);
        for succ in self.nodes[bottom_pred.raw()].successors.iter_mut() {
            if *succ == bottom {
                *succ = new_bottom;
                break;
            }
        }

        let b = &mut self.nodes[bottom.raw()];
        b.predecessors.clear();
        b.predecessors.push(new_bottom);
        b.successors.clear();
        Ok(bottom)
    }

    /// Attach all predecessors of `old` to `new`, rewiring those
    /// predecessors' successor lists, and detach `old`'s predecessors.
    ///
    /// ```text
    ///  S1   S2        S1   S2
    ///    \ /
    ///  oldNode   =>   newNode
    ///    / \            / \
    ///  P1   P2        P1   P2
    /// ```
    ///
    /// As is convention, `new` will not have any successors attached; the
    /// planning driver takes care of that.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId) {
        self.nodes[new.raw()].predecessors.clear();
        self.nodes[new.raw()].successors.clear();

        let preds = self.nodes[old.raw()].predecessors.clone();
        self.nodes[new.raw()].predecessors = preds.clone();
        for pred in preds {
            for succ in self.nodes[pred.raw()].successors.iter_mut() {
                if *succ == old {
                    *succ = new;
                }
            }
        }
        self.nodes[old.raw()].predecessors.clear();
    }
}
