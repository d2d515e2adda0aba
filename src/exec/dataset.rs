//! The standard dataset: a [`TableCache`]-backed implementation of the
//! sending side of the execution protocol.
//!
//! This dataset does not support triggers; tables are flushed only when the
//! dataset finishes. On a successful finish every cached key is finalized
//! and pushed downstream before the finish propagates. On an error finish
//! nothing is flushed and the error is forwarded verbatim -- this is how a
//! partial failure aborts the whole pipeline without emitting partial
//! results.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::exec::cache::TableCache;
use crate::exec::transformation::{
    Dataset, DatasetId, FinishError, Transformation, TransformationSet, finish_error,
};
use crate::group_key::GroupKey;
use crate::table::Table;
use crate::values::Time;

/// A dataset whose pending output lives in a [`TableCache`].
pub struct StreamDataset {
    id: DatasetId,
    ts: Mutex<TransformationSet>,
    cache: Arc<dyn TableCache>,
    finished: AtomicBool,
}

impl StreamDataset {
    pub fn new(id: DatasetId, cache: Arc<dyn TableCache>) -> Self {
        Self {
            id,
            ts: Mutex::new(TransformationSet::new()),
            cache,
            finished: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> DatasetId {
        self.id
    }

    pub fn cache(&self) -> &Arc<dyn TableCache> {
        &self.cache
    }

    fn downstream(&self) -> TransformationSet {
        self.ts.lock().unwrap().clone()
    }
}

impl Dataset for StreamDataset {
    fn add_transformation(&self, t: Arc<dyn Transformation>) {
        self.ts.lock().unwrap().add(t);
    }

    fn update_watermark(&self, mark: Time) -> Result<()> {
        self.downstream().update_watermark(self.id, mark)
    }

    fn update_processing_time(&self, time: Time) -> Result<()> {
        self.downstream().update_processing_time(self.id, time)
    }

    fn retract_table(&self, key: &GroupKey) -> Result<()> {
        self.cache.discard_table(key);
        self.downstream().retract_table(self.id, key)
    }

    fn process(&self, tbl: Table) -> Result<()> {
        self.downstream().process(self.id, tbl)
    }

    fn finish(&self, err: Option<FinishError>) {
        if self.finished.swap(true, Ordering::SeqCst) {
            // duplicate finish; resources were already released once
            return;
        }
        let mut err = err;
        if err.is_none() {
            let flushed = self.cache.for_each(&mut |key| {
                let tbl = self.cache.table(key)?;
                self.process(tbl)
            });
            if let Err(e) = flushed {
                err = Some(finish_error(e));
            }
        }
        self.downstream().finish(self.id, err);
    }
}
