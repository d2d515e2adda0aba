//! # Tributary
//!
//! A **dataflow query engine** for Rust: queries are directed acyclic graphs
//! of typed operations, rewritten by a rule-driven planner and executed by a
//! push-based streaming runtime.
//!
//! ## Key Features
//!
//! - **Plan graphs** - arena-allocated DAGs with symmetric edge lists and
//!   structural surgery (merge, swap, replace) that keeps both directions
//!   consistent
//! - **Rule-driven rewriting** - pattern-matched rules applied to a fixpoint,
//!   with an integrity check guarding against misbehaving rules
//! - **Push-based execution** - one worker per plan node, bounded channels
//!   in between, tables flowing from sources toward roots
//! - **Grouped tables** - data is partitioned by group key; a table is one
//!   partition, with columnar storage behind reference-counted readers
//! - **Sort-merge join** - a two-input operator matching rows on `_time`
//!   within each group key
//! - **Explicit registries** - operator implementations are looked up in an
//!   ordinary object, never a process-global table
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tributary::*;
//! use tributary::testing::{StaticTablesSpec, copy_builder, tables_source_builder};
//!
//! fn main() -> anyhow::Result<()> {
//!     // Describe the plan: a static source feeding a copy.
//!     let mut graph = PlanGraph::new();
//!     let source = graph.create_physical_node(
//!         "from0",
//!         Arc::new(StaticTablesSpec::new(my_tables())),
//!     );
//!     let copy = graph.create_physical_node("copy0", Arc::new(my_copy_spec()));
//!     graph.connect(source, copy);
//!
//!     let mut plan = PlanSpec::new(graph, 0);
//!     plan.add_root(copy);
//!     plan.check_integrity()?;
//!
//!     // Map procedure kinds to implementations and run.
//!     let mut registry = TransformationRegistry::new();
//!     registry.register_source("from-tables", tables_source_builder());
//!     registry.register_transformation("copy", copy_builder());
//!
//!     let results = Executor::new().execute(&plan, &registry)?;
//!     for (root, tables) in results {
//!         println!("{root}: {} tables", tables.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Plans
//!
//! A [`PlanSpec`] owns a [`PlanGraph`] plus the set of root (sink) nodes.
//! Nodes are addressed by [`NodeId`] handles into the graph's arena; each
//! node carries an immutable [`ProcedureSpec`] describing what it computes.
//! Logical plans are converted to physical plans by rewrite rules.
//!
//! ### Rewriting
//!
//! A [`Rule`] pairs a [`Pattern`] with a rewrite function. The [`RulePlanner`]
//! scans the plan from the roots and applies matching rules until no rule
//! changes anything, then re-validates edge symmetry.
//!
//! ### Execution
//!
//! Each physical node becomes a [`Transformation`] (logic) and a [`Dataset`]
//! (output handle). Tables are pushed downstream as they materialize;
//! watermark and processing-time updates share the same channel. A finish
//! signal, optionally carrying an error, flushes caches and tears the
//! pipeline down. The [`Executor`] owns the threads and channels.
//!
//! ### Tables and group keys
//!
//! Streams are partitioned by [`GroupKey`]. A [`Table`] is one partition:
//! columnar data behind an [`Arc`], handed to operators through retained
//! [`ColReader`]s so a table can outlive the node that produced it.
//!
//! [`Arc`]: std::sync::Arc
//!
//! ## Module Overview
//!
//! - [`values`] - value model: column types, dynamic values, records
//! - [`column`] - columnar storage and reference-counted readers
//! - [`group_key`] - group keys and their ordering semantics
//! - [`table`] - immutable tables and the row-at-a-time builder
//! - [`plan`] - plan graphs, plan specs, the rewrite engine
//! - [`exec`] - the execution protocol, caches, the join, the executor
//! - [`testing`] - fixtures and stub operators for tests

pub mod column;
pub mod exec;
pub mod group_key;
pub mod plan;
pub mod table;
pub mod testing;
pub mod values;

pub use column::{ColReader, ColumnData};
pub use exec::{
    BuilderCache, Dataset, DatasetId, ExecContext, Executor, FinishError, MERGE_JOIN_KIND,
    MergeJoinCache,
    MergeJoinTransformation, RowJoinFn, Source, SourceBuilder, StreamDataset, TableCache,
    Transformation, TransformationBuilder, TransformationRegistry, TransformationSet,
    finish_error, merge_join_builder,
};
pub use group_key::GroupKey;
pub use plan::{
    Bounds, NodeClass, NodeId, Pattern, PlanExplanation, PlanGraph, PlanNode, PlanSpec,
    ProcedureKind, ProcedureSpec, ResourceManagement, Rewrite, Rule, RulePlanner, StackEntry,
    any, pat, walk_predecessors, walk_successors,
};
pub use table::{Table, TableBuilder};
pub use values::{ColMeta, ColumnType, DEFAULT_TIME_COL, Record, Time, Value, col_idx};
