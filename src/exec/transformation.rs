//! The Dataset/Transformation contract.
//!
//! Data moves between running operators as discrete messages: table
//! fragments pushed via `process`, and retraction/watermark/processing-time/
//! finish control signals flowing alongside. A [`Transformation`] is the
//! receiving side of that protocol; a [`Dataset`] is the sending side owned
//! by the operator that produces tables.
//!
//! Every protocol method takes the calling predecessor's [`DatasetId`]. A
//! transformation attached to more than one predecessor may be invoked
//! concurrently and must serialize any cross-predecessor state internally;
//! narrow transformations with no shared state need no locking.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::group_key::GroupKey;
use crate::table::Table;
use crate::values::Time;

/// Identifies the output stream of one running plan node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DatasetId(pub u64);

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dataset-{}", self.0)
    }
}

/// An upstream error shared across every downstream branch it fans out to.
pub type FinishError = Arc<anyhow::Error>;

/// Wrap an error for finish propagation.
pub fn finish_error(err: anyhow::Error) -> FinishError {
    Arc::new(err)
}

/// The receiving side of the execution protocol.
///
/// `finish` is called exactly once per predecessor: either because the
/// predecessor completed, or with the error that aborted it. An error is a
/// cooperative cancellation signal -- the transformation must forward it via
/// its own dataset and must not flush partial state.
pub trait Transformation: Send + Sync {
    /// Push one fragment of a table. Fragments for the same group key may
    /// arrive over any number of calls.
    fn process(&self, from: DatasetId, tbl: Table) -> Result<()>;

    /// Withdraw a previously emitted group key. Narrow transformations
    /// forward the retraction unchanged; stateful ones must also discard
    /// any cached state for the key.
    fn retract_table(&self, from: DatasetId, key: &GroupKey) -> Result<()>;

    /// Monotonic bound: no data earlier than `mark` will arrive.
    fn update_watermark(&self, from: DatasetId, mark: Time) -> Result<()>;

    fn update_processing_time(&self, from: DatasetId, time: Time) -> Result<()>;

    fn finish(&self, from: DatasetId, err: Option<FinishError>);
}

/// The sending side of the protocol, owned by a running operator.
pub trait Dataset: Send + Sync {
    fn add_transformation(&self, t: Arc<dyn Transformation>);

    fn update_watermark(&self, mark: Time) -> Result<()>;

    fn update_processing_time(&self, time: Time) -> Result<()>;

    /// Withdraw `key` downstream, discarding any cached output for it.
    fn retract_table(&self, key: &GroupKey) -> Result<()>;

    /// Push one finished table downstream.
    fn process(&self, tbl: Table) -> Result<()>;

    /// Terminal transition. Idempotent: a second call is a no-op.
    fn finish(&self, err: Option<FinishError>);
}

/// The set of downstream transformations attached to a dataset.
#[derive(Clone, Default)]
pub struct TransformationSet(Vec<Arc<dyn Transformation>>);

impl TransformationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, t: Arc<dyn Transformation>) {
        self.0.push(t);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn process(&self, from: DatasetId, tbl: Table) -> Result<()> {
        // every consumer gets its own copy of the fragment
        for t in &self.0 {
            t.process(from, tbl.clone())?;
        }
        Ok(())
    }

    pub fn retract_table(&self, from: DatasetId, key: &GroupKey) -> Result<()> {
        for t in &self.0 {
            t.retract_table(from, key)?;
        }
        Ok(())
    }

    pub fn update_watermark(&self, from: DatasetId, mark: Time) -> Result<()> {
        for t in &self.0 {
            t.update_watermark(from, mark)?;
        }
        Ok(())
    }

    pub fn update_processing_time(&self, from: DatasetId, time: Time) -> Result<()> {
        for t in &self.0 {
            t.update_processing_time(from, time)?;
        }
        Ok(())
    }

    pub fn finish(&self, from: DatasetId, err: Option<FinishError>) {
        for t in &self.0 {
            t.finish(from, err.clone());
        }
    }
}

/// A running producer with no upstream: pushes tables into its attached
/// transformations and ends with a finish.
pub trait Source: Send + Sync {
    fn add_transformation(&self, t: Arc<dyn Transformation>);

    /// Run to completion. Any produced error must be delivered through the
    /// finish path rather than returned.
    fn run(&self);
}
