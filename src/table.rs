//! Immutable tables and the mutable builders that accumulate them.
//!
//! A [`Table`] is one fragment of columnar data identified by a
//! [`GroupKey`]. Tables are immutable; operators produce them by appending
//! rows to a [`TableBuilder`] and finalizing it. Readers handed out by
//! [`Table::reader`] follow the retain/release discipline described in
//! [`crate::column`].

use std::sync::Arc;

use anyhow::{Context, Result, bail};

use crate::column::{ColReader, ColumnData};
use crate::group_key::GroupKey;
use crate::values::{ColMeta, Record, Value, col_idx};

/// An immutable fragment of a table, all rows sharing one group key.
#[derive(Clone, Debug)]
pub struct Table {
    key: GroupKey,
    cols: Vec<ColMeta>,
    data: Arc<Vec<ColumnData>>,
}

impl Table {
    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn num_rows(&self) -> usize {
        self.data.first().map_or(0, ColumnData::len)
    }

    /// A retained reader over this table's columns. The caller owns one
    /// retain and must balance it with a release.
    pub fn reader(&self) -> ColReader {
        ColReader::new(self.cols.clone(), Arc::clone(&self.data))
    }

    /// The row at `idx` as a record.
    pub fn record(&self, idx: usize) -> Record {
        self.cols
            .iter()
            .enumerate()
            .map(|(i, c)| (c.label.clone(), self.data[i].value(idx)))
            .collect()
    }
}

/// A mutable accumulator for one output table.
#[derive(Debug)]
pub struct TableBuilder {
    key: GroupKey,
    cols: Vec<ColMeta>,
    data: Vec<ColumnData>,
}

impl TableBuilder {
    pub fn new(key: GroupKey) -> Self {
        Self { key, cols: Vec::new(), data: Vec::new() }
    }

    pub fn key(&self) -> &GroupKey {
        &self.key
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn num_rows(&self) -> usize {
        self.data.first().map_or(0, ColumnData::len)
    }

    /// Add a column to the schema, returning its offset.
    ///
    /// # Errors
    ///
    /// If the label is already present, or rows have already been appended.
    pub fn add_col(&mut self, col: ColMeta) -> Result<usize> {
        if col_idx(&col.label, &self.cols).is_some() {
            bail!("column {:?} already exists in builder", col.label);
        }
        if self.num_rows() > 0 {
            bail!("cannot add column {:?} after rows were appended", col.label);
        }
        self.data.push(ColumnData::new(col.typ));
        self.cols.push(col);
        Ok(self.cols.len() - 1)
    }

    /// Append one value to the column at `idx`.
    pub fn append_value(&mut self, idx: usize, value: Value) -> Result<()> {
        if idx >= self.cols.len() {
            bail!("column index {idx} out of range");
        }
        self.data[idx]
            .push(value)
            .with_context(|| format!("column {:?}", self.cols[idx].label))
    }

    /// Append a full row addressed by label. Every cell in the record must
    /// name an existing column; the row is rejected otherwise.
    pub fn append_record(&mut self, record: &Record) -> Result<()> {
        for (label, value) in record.iter() {
            let Some(idx) = col_idx(label, &self.cols) else {
                bail!("column {label:?} not found");
            };
            self.append_value(idx, value.clone())?;
        }
        Ok(())
    }

    /// Finalize the accumulated rows into an immutable table, leaving the
    /// builder empty. Column lengths must agree.
    pub fn build(&mut self) -> Result<Table> {
        let cols = self.cols.clone();
        let data = std::mem::take(&mut self.data);
        for c in &cols {
            self.data.push(ColumnData::new(c.typ));
        }
        if let Some(first) = data.first() {
            let n = first.len();
            if let Some(bad) = data.iter().position(|c| c.len() != n) {
                bail!(
                    "ragged table: column {:?} has {} rows, expected {}",
                    cols[bad].label,
                    data[bad].len(),
                    n
                );
            }
        }
        Ok(Table { key: self.key.clone(), cols, data: Arc::new(data) })
    }
}
