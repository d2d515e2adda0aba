//! The sort-merge join: a two-input stateful transformation.
//!
//! Each predecessor's table fragments are buffered per group key as a
//! [`RowIterator`] over retained column readers. A cache entry is ready once
//! both sides hold at least one row for the key. At flush time the two sides
//! are merged by the `_time` column: the side with the smaller time advances,
//! and on a time match every right-side row sharing that time is paired with
//! the current left row before the left index advances, reproducing a full
//! cross-match within equal-time groups.
//!
//! The user-supplied join function is evaluated once per matched pair. The
//! first successful evaluation fixes the output schema (columns sorted by
//! label); every row must reproduce the group-key column values it was
//! produced under. Retained readers are released exactly once, on cache-entry
//! deletion or when the operator finishes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use crate::column::ColReader;
use crate::exec::cache::TableCache;
use crate::exec::dataset::StreamDataset;
use crate::exec::registry::{ExecContext, TransformationBuilder};
use crate::exec::transformation::{Dataset, DatasetId, FinishError, Transformation};
use crate::group_key::GroupKey;
use crate::table::{Table, TableBuilder};
use crate::values::{ColMeta, DEFAULT_TIME_COL, Record, Time, Value, col_idx};

/// The join function: evaluated with the left and right record of each
/// matched pair, producing one output row.
pub type RowJoinFn = Arc<dyn Fn(&Record, &Record) -> Result<Record> + Send + Sync>;

/// Procedure kind under which the merge join registers.
pub const MERGE_JOIN_KIND: &str = "mergeJoin";

/// Iterates over the rows of one or more retained column readers as a single
/// logical sequence.
pub struct RowIterator {
    len: usize,
    time_col: usize,
    offsets: Vec<usize>,
    readers: Vec<ColReader>,
    columns: Vec<ColMeta>,
}

impl RowIterator {
    pub fn new(columns: Vec<ColMeta>, readers: Vec<ColReader>, time_col: usize) -> Self {
        let mut offsets = Vec::with_capacity(readers.len());
        let mut len = 0;
        for r in &readers {
            offsets.push(len);
            len += r.len();
        }
        Self { len, time_col, offsets, readers, columns }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn columns(&self) -> &[ColMeta] {
        &self.columns
    }

    /// Buffer one more fragment. All fragments of a key/side must share a
    /// schema.
    fn push_reader(&mut self, reader: ColReader) -> Result<()> {
        if reader.cols() != self.columns.as_slice() {
            bail!(
                "table fragment schema mismatch: got {:?}, expected {:?}",
                reader.cols(),
                self.columns
            );
        }
        self.offsets.push(self.len);
        self.len += reader.len();
        self.readers.push(reader);
        Ok(())
    }

    fn locate(&self, idx: usize) -> Option<(usize, usize)> {
        if idx >= self.len {
            return None;
        }
        for i in (0..self.readers.len()).rev() {
            if idx >= self.offsets[i] {
                return Some((i, idx - self.offsets[i]));
            }
        }
        None
    }

    /// The time at row `idx`, or `None` past the end.
    ///
    /// # Errors
    ///
    /// If the time column holds a null or non-time value at `idx`.
    pub fn time(&self, idx: usize) -> Result<Option<Time>> {
        let Some((reader, row)) = self.locate(idx) else {
            return Ok(None);
        };
        match self.readers[reader].value(row, self.time_col) {
            Value::Time(t) => Ok(Some(t)),
            Value::Null => bail!("null {DEFAULT_TIME_COL} value at row {idx}"),
            v => bail!("{DEFAULT_TIME_COL} column holds non-time value {v}"),
        }
    }

    /// The row at `idx` as a record. Rows past the end are empty.
    pub fn record(&self, idx: usize) -> Record {
        match self.locate(idx) {
            Some((reader, row)) => self.readers[reader].record(row),
            None => Record::new(),
        }
    }

    fn release_readers(&self) {
        for r in &self.readers {
            r.release();
        }
    }
}

#[derive(Default)]
struct CacheEntry {
    l: Option<RowIterator>,
    r: Option<RowIterator>,
}

impl CacheEntry {
    fn ready(&self) -> bool {
        matches!((&self.l, &self.r), (Some(l), Some(r)) if !l.is_empty() && !r.is_empty())
    }

    fn release(&self) {
        if let Some(l) = &self.l {
            l.release_readers();
        }
        if let Some(r) = &self.r {
            r.release_readers();
        }
    }
}

/// Per-group-key buffers for both sides of the join, plus the join itself.
pub struct MergeJoinCache {
    left: DatasetId,
    right: DatasetId,
    join_fn: RowJoinFn,
    data: Mutex<HashMap<GroupKey, CacheEntry>>,
}

impl MergeJoinCache {
    pub fn new(left: DatasetId, right: DatasetId, join_fn: RowJoinFn) -> Self {
        Self { left, right, join_fn, data: Mutex::new(HashMap::new()) }
    }

    /// Buffer a retained reader for one side of the join. The cache takes
    /// over the reader's retain and releases it exactly once, on entry
    /// deletion or shutdown.
    pub fn insert(
        &self,
        from: DatasetId,
        key: GroupKey,
        columns: Vec<ColMeta>,
        reader: ColReader,
        time_col: usize,
    ) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let entry = data.entry(key).or_default();
        let side = if from == self.left {
            &mut entry.l
        } else if from == self.right {
            &mut entry.r
        } else {
            bail!("{from} is not a parent of this join");
        };
        match side {
            Some(iter) => iter.push_reader(reader)?,
            None => *side = Some(RowIterator::new(columns, vec![reader], time_col)),
        }
        Ok(())
    }

    fn delete(&self, key: &GroupKey) {
        if let Some(entry) = self.data.lock().unwrap().remove(key) {
            entry.release();
        }
    }

    fn clean(&self) {
        let mut data = self.data.lock().unwrap();
        for (_, entry) in data.drain() {
            entry.release();
        }
    }

    fn join(&self, key: &GroupKey, a: &RowIterator, b: &RowIterator) -> Result<Table> {
        let mut builder = TableBuilder::new(key.clone());
        let mut first_row = true;
        let (mut i, mut j) = (0usize, 0usize);

        loop {
            let (Some(ta), Some(tb)) = (a.time(i)?, b.time(j)?) else {
                break;
            };
            if ta < tb {
                i += 1;
                continue;
            }
            if ta > tb {
                j += 1;
                continue;
            }

            // There may be multiple rows of b that match a single row of a;
            // the inner loop joins all of them. Multiple rows of a matching
            // a single row of b are covered as well: only i advances after
            // the loop, and the scan of b restarts from j.
            let mut k = j;
            while a.time(i)? == b.time(k)? {
                let row = (self.join_fn)(&a.record(i), &b.record(k))?;

                if first_row {
                    build_schema(&mut builder, &row)?;
                    first_row = false;
                }

                if !record_contains_key(&row, key) {
                    bail!("join function may not modify the group key");
                }

                builder.append_record(&row)?;
                k += 1;
            }
            i += 1;
        }
        builder.build()
    }
}

impl TableCache for MergeJoinCache {
    fn table(&self, key: &GroupKey) -> Result<Table> {
        let data = self.data.lock().unwrap();
        match data.get(key) {
            Some(CacheEntry { l: Some(l), r: Some(r) }) if !l.is_empty() && !r.is_empty() => {
                self.join(key, l, r)
            }
            _ => bail!("no entry for group key {key} in cache"),
        }
    }

    fn for_each(&self, f: &mut dyn FnMut(&GroupKey) -> Result<()>) -> Result<()> {
        let ready: Vec<GroupKey> = {
            let data = self.data.lock().unwrap();
            data.iter()
                .filter(|(_, e)| e.ready())
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in ready {
            f(&key)?;
        }
        Ok(())
    }

    fn discard_table(&self, key: &GroupKey) {
        self.delete(key);
    }
}

/// Build an output schema from the first evaluated row, columns sorted by
/// label. A null cell in the first row leaves its column type unknowable.
fn build_schema(builder: &mut TableBuilder, row: &Record) -> Result<()> {
    // Record iterates label-sorted
    for (label, value) in row.iter() {
        let Some(typ) = value.column_type() else {
            bail!("cannot infer type of output column {label:?} from a null value");
        };
        builder.add_col(ColMeta::new(label.clone(), typ))?;
    }
    Ok(())
}

/// Whether `row` reproduces every group-key column value exactly.
fn record_contains_key(row: &Record, key: &GroupKey) -> bool {
    key.cols()
        .iter()
        .all(|col| row.get(&col.label) == key.label_value(&col.label))
}

struct JoinState {
    done: bool,
}

/// The transformation half of the merge join. Cross-predecessor state (the
/// cache and the done flag) is guarded by one lock around every protocol
/// method.
pub struct MergeJoinTransformation {
    state: Mutex<JoinState>,
    d: Arc<dyn Dataset>,
    cache: Arc<MergeJoinCache>,
}

impl MergeJoinTransformation {
    pub fn new(d: Arc<dyn Dataset>, cache: Arc<MergeJoinCache>) -> Self {
        Self { state: Mutex::new(JoinState { done: false }), d, cache }
    }
}

impl Transformation for MergeJoinTransformation {
    fn process(&self, from: DatasetId, tbl: Table) -> Result<()> {
        let _guard = self.state.lock().unwrap();

        let columns = tbl.cols().to_vec();
        let Some(time_col) = col_idx(DEFAULT_TIME_COL, &columns) else {
            bail!("no {DEFAULT_TIME_COL} column found");
        };

        let reader = tbl.reader();
        self.cache
            .insert(from, tbl.key().clone(), columns, reader, time_col)
    }

    fn retract_table(&self, _from: DatasetId, key: &GroupKey) -> Result<()> {
        let _guard = self.state.lock().unwrap();
        // discards the cache entry (releasing its readers) and forwards
        self.d.retract_table(key)
    }

    fn update_watermark(&self, _from: DatasetId, mark: Time) -> Result<()> {
        let _guard = self.state.lock().unwrap();
        self.d.update_watermark(mark)
    }

    fn update_processing_time(&self, _from: DatasetId, time: Time) -> Result<()> {
        let _guard = self.state.lock().unwrap();
        self.d.update_processing_time(time)
    }

    fn finish(&self, _from: DatasetId, err: Option<FinishError>) {
        let mut state = self.state.lock().unwrap();
        // wait for both parents unless an error short-circuits
        if err.is_some() || state.done {
            self.d.finish(err);
            self.cache.clean();
        }
        state.done = true;
    }
}

/// A registry builder for the merge join. Expects exactly two parents; the
/// first is the left side.
pub fn merge_join_builder(join_fn: RowJoinFn) -> Arc<dyn TransformationBuilder> {
    Arc::new(
        move |id: DatasetId, _spec: &dyn crate::plan::graph::ProcedureSpec, ctx: &ExecContext| {
            let [left, right] = ctx.parents[..] else {
                bail!("merge join requires exactly two parents, got {}", ctx.parents.len());
            };
            let cache = Arc::new(MergeJoinCache::new(left, right, Arc::clone(&join_fn)));
            let d: Arc<dyn Dataset> = Arc::new(StreamDataset::new(
                id,
                Arc::clone(&cache) as Arc<dyn TableCache>,
            ));
            let t: Arc<dyn Transformation> =
                Arc::new(MergeJoinTransformation::new(Arc::clone(&d), cache));
            Ok((t, d))
        },
    )
}
