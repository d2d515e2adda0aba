//! Lightweight unique identifier for nodes within a
//! [`PlanGraph`](crate::plan::PlanGraph).
//!
//! Each [`PlanNode`](crate::plan::PlanNode) lives in an arena owned by the
//! graph and is addressed by a sequential `NodeId`. Edge lists are vectors of
//! these handles rather than references, so structural rewrites are plain
//! index updates with no dangling-reference risk.
//!
//! They're small, `Copy`, and hashable, so they can be used efficiently as
//! keys in maps or sets when traversing or rewriting a plan.

/// Unique numeric identifier for a node in a plan graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(usize);

impl NodeId {
    /// Create a new `NodeId` (used internally by the graph arena).
    pub(crate) fn new(v: usize) -> Self {
        Self(v)
    }

    /// Return the underlying arena offset.
    ///
    /// Useful mainly for debugging or deriving executor dataset ids.
    pub fn raw(&self) -> usize {
        self.0
    }
}
