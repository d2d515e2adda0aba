//! Push-based execution of physical plans.
//!
//! The execution protocol mirrors the planner's dataflow graph: each node
//! becomes a [`Transformation`] (its logic) paired with a [`Dataset`] (its
//! output handle), and tables are pushed from sources toward roots. The
//! [`Executor`] wires instantiated nodes together with bounded channels and
//! runs one worker thread per node.

pub mod cache;
pub mod dataset;
pub mod driver;
pub mod join;
pub mod registry;
pub mod transformation;

pub use cache::{BuilderCache, TableCache};
pub use dataset::StreamDataset;
pub use driver::Executor;
pub use join::{
    MERGE_JOIN_KIND, MergeJoinCache, MergeJoinTransformation, RowIterator, RowJoinFn,
    merge_join_builder,
};
pub use registry::{ExecContext, SourceBuilder, TransformationBuilder, TransformationRegistry};
pub use transformation::{
    Dataset, DatasetId, FinishError, Source, Transformation, TransformationSet, finish_error,
};
