//! Testing utilities for plans and operators.
//!
//! This module provides the pieces most tests need:
//!
//! - **Procedure specs**: [`OpSpec`] for plans where only the kind matters,
//!   [`StaticTablesSpec`] for sources fed from in-memory tables
//! - **Operators**: [`TableSource`] and [`CopyTransformation`] with registry
//!   builders, enough to execute a plan end to end without real I/O
//! - **Data construction**: [`group_key`] and [`table`] helpers for building
//!   fixtures in a line or two
//!
//! # Quick Start
//!
//! ```ignore
//! use tributary::testing::*;
//!
//! #[test]
//! fn test_copy_plan() -> anyhow::Result<()> {
//!     let key = group_key(&[("tag", Value::Str("a".into()))])?;
//!     let input = table(
//!         key,
//!         &[("_time", ColumnType::Time), ("v", ColumnType::Int)],
//!         &[&[Value::Time(1), Value::Int(10)]],
//!     )?;
//!
//!     let mut registry = TransformationRegistry::new();
//!     registry.register_source("from-tables", tables_source_builder());
//!     registry.register_transformation("copy", copy_builder());
//!     // build a plan, execute, assert on the returned tables
//!     Ok(())
//! }
//! ```

use std::any::Any;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use crate::exec::cache::{BuilderCache, TableCache};
use crate::exec::dataset::StreamDataset;
use crate::exec::registry::{ExecContext, SourceBuilder, TransformationBuilder};
use crate::exec::transformation::{
    Dataset, DatasetId, FinishError, Source, Transformation, TransformationSet, finish_error,
};
use crate::group_key::GroupKey;
use crate::plan::graph::{ProcedureKind, ProcedureSpec};
use crate::table::{Table, TableBuilder};
use crate::values::{ColMeta, ColumnType, Time, Value};

/// Kind under which [`tables_source_builder`] is conventionally registered.
pub const STATIC_TABLES_KIND: &str = "from-tables";

/// Kind under which [`copy_builder`] is conventionally registered.
pub const COPY_KIND: &str = "copy";

/// A procedure spec that carries nothing but its kind. Plan-structure tests
/// never instantiate operators, so this is all they need.
#[derive(Debug, Clone)]
pub struct OpSpec {
    kind: ProcedureKind,
}

impl OpSpec {
    pub fn new(kind: impl Into<ProcedureKind>) -> Self {
        Self { kind: kind.into() }
    }
}

impl ProcedureSpec for OpSpec {
    fn kind(&self) -> ProcedureKind {
        self.kind.clone()
    }

    fn copy_spec(&self) -> Arc<dyn ProcedureSpec> {
        Arc::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A source spec holding the tables it will emit.
#[derive(Debug, Clone)]
pub struct StaticTablesSpec {
    pub tables: Vec<Table>,
}

impl StaticTablesSpec {
    pub fn new(tables: Vec<Table>) -> Self {
        Self { tables }
    }
}

impl ProcedureSpec for StaticTablesSpec {
    fn kind(&self) -> ProcedureKind {
        STATIC_TABLES_KIND.into()
    }

    fn copy_spec(&self) -> Arc<dyn ProcedureSpec> {
        Arc::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A source that pushes a fixed list of tables and finishes.
pub struct TableSource {
    id: DatasetId,
    tables: Vec<Table>,
    ts: Mutex<TransformationSet>,
}

impl TableSource {
    pub fn new(id: DatasetId, tables: Vec<Table>) -> Self {
        Self { id, tables, ts: Mutex::new(TransformationSet::new()) }
    }
}

impl Source for TableSource {
    fn add_transformation(&self, t: Arc<dyn Transformation>) {
        self.ts.lock().unwrap().add(t);
    }

    fn run(&self) {
        let ts = self.ts.lock().unwrap().clone();
        for tbl in &self.tables {
            if let Err(e) = ts.process(self.id, tbl.clone()) {
                ts.finish(self.id, Some(finish_error(e)));
                return;
            }
        }
        ts.finish(self.id, None);
    }
}

/// Registry builder for [`TableSource`]. The node's spec must be a
/// [`StaticTablesSpec`].
pub fn tables_source_builder() -> Arc<dyn SourceBuilder> {
    Arc::new(
        |id: DatasetId, spec: &dyn ProcedureSpec, _ctx: &ExecContext| {
            let Some(spec) = spec.as_any().downcast_ref::<StaticTablesSpec>() else {
                bail!("source spec of kind {} is not a static tables spec", spec.kind());
            };
            Ok(Arc::new(TableSource::new(id, spec.tables.clone())) as Arc<dyn Source>)
        },
    )
}

/// A narrow transformation that buffers its input unchanged. Used to stand
/// in for any single-input operator when a test only cares about plumbing.
pub struct CopyTransformation {
    d: Arc<dyn Dataset>,
    cache: Arc<BuilderCache>,
}

impl CopyTransformation {
    pub fn new(d: Arc<dyn Dataset>, cache: Arc<BuilderCache>) -> Self {
        Self { d, cache }
    }
}

impl Transformation for CopyTransformation {
    fn process(&self, _from: DatasetId, tbl: Table) -> Result<()> {
        let (builder, created) = self.cache.table_builder(tbl.key());
        if !created {
            bail!("duplicate table for group key {}", tbl.key());
        }
        let mut builder = builder.lock().unwrap();
        for col in tbl.cols() {
            builder.add_col(col.clone())?;
        }
        for row in 0..tbl.num_rows() {
            builder.append_record(&tbl.record(row))?;
        }
        Ok(())
    }

    fn retract_table(&self, _from: DatasetId, key: &GroupKey) -> Result<()> {
        self.d.retract_table(key)
    }

    fn update_watermark(&self, _from: DatasetId, mark: Time) -> Result<()> {
        self.d.update_watermark(mark)
    }

    fn update_processing_time(&self, _from: DatasetId, time: Time) -> Result<()> {
        self.d.update_processing_time(time)
    }

    fn finish(&self, _from: DatasetId, err: Option<FinishError>) {
        self.d.finish(err)
    }
}

/// Registry builder for [`CopyTransformation`].
pub fn copy_builder() -> Arc<dyn TransformationBuilder> {
    Arc::new(
        |id: DatasetId, _spec: &dyn ProcedureSpec, _ctx: &ExecContext| {
            let cache = Arc::new(BuilderCache::new());
            let d: Arc<dyn Dataset> = Arc::new(StreamDataset::new(
                id,
                Arc::clone(&cache) as Arc<dyn TableCache>,
            ));
            let t: Arc<dyn Transformation> =
                Arc::new(CopyTransformation::new(Arc::clone(&d), cache));
            Ok((t, d))
        },
    )
}

/// Build a group key from `(label, value)` pairs. Column types are derived
/// from the values, so null key values are rejected here even though the
/// engine itself allows them.
pub fn group_key(pairs: &[(&str, Value)]) -> Result<GroupKey> {
    let mut cols = Vec::with_capacity(pairs.len());
    let mut values = Vec::with_capacity(pairs.len());
    for (label, value) in pairs {
        let Some(typ) = value.column_type() else {
            bail!("cannot derive a column type for null key column {label:?}");
        };
        cols.push(ColMeta::new(*label, typ));
        values.push(value.clone());
    }
    GroupKey::new(cols, values)
}

/// Build a table from a column list and row-major values.
pub fn table(
    key: GroupKey,
    cols: &[(&str, ColumnType)],
    rows: &[&[Value]],
) -> Result<Table> {
    let mut builder = TableBuilder::new(key);
    for (label, typ) in cols {
        builder.add_col(ColMeta::new(*label, *typ))?;
    }
    for row in rows {
        if row.len() != cols.len() {
            bail!("row has {} values but the table has {} columns", row.len(), cols.len());
        }
        for (idx, value) in row.iter().enumerate() {
            builder.append_value(idx, value.clone())?;
        }
    }
    builder.build()
}
