//! Typed, nullable columnar arrays and shared column readers.
//!
//! [`ColumnData`] is a closed sum over the supported element types, one
//! variant per type, each holding a `Vec<Option<T>>`. Dispatch happens once
//! per batch with a single match rather than per-row virtual calls.
//!
//! [`ColReader`] gives shared read access to a table's columns under an
//! explicit retain/release discipline: creation counts as the first retain,
//! and every retain must be balanced by exactly one release. The counter is
//! observable so tests can assert the balance.

use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, Ordering};

use anyhow::{Result, bail};

use crate::values::{ColMeta, ColumnType, Time, Value};

/// A single column of nullable values.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Bool(Vec<Option<bool>>),
    Int(Vec<Option<i64>>),
    UInt(Vec<Option<u64>>),
    Float(Vec<Option<f64>>),
    Str(Vec<Option<String>>),
    Time(Vec<Option<Time>>),
}

impl ColumnData {
    /// An empty column of the given element type.
    pub fn new(typ: ColumnType) -> Self {
        match typ {
            ColumnType::Bool => Self::Bool(Vec::new()),
            ColumnType::Int => Self::Int(Vec::new()),
            ColumnType::UInt => Self::UInt(Vec::new()),
            ColumnType::Float => Self::Float(Vec::new()),
            ColumnType::Str => Self::Str(Vec::new()),
            ColumnType::Time => Self::Time(Vec::new()),
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            Self::Bool(_) => ColumnType::Bool,
            Self::Int(_) => ColumnType::Int,
            Self::UInt(_) => ColumnType::UInt,
            Self::Float(_) => ColumnType::Float,
            Self::Str(_) => ColumnType::Str,
            Self::Time(_) => ColumnType::Time,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bool(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::UInt(v) => v.len(),
            Self::Float(v) => v.len(),
            Self::Str(v) => v.len(),
            Self::Time(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one value. A null is accepted by every column type; a non-null
    /// value must match the column's element type.
    pub fn push(&mut self, value: Value) -> Result<()> {
        match (self, value) {
            (Self::Bool(v), Value::Bool(x)) => v.push(Some(x)),
            (Self::Int(v), Value::Int(x)) => v.push(Some(x)),
            (Self::UInt(v), Value::UInt(x)) => v.push(Some(x)),
            (Self::Float(v), Value::Float(x)) => v.push(Some(x)),
            (Self::Str(v), Value::Str(x)) => v.push(Some(x)),
            (Self::Time(v), Value::Time(x)) => v.push(Some(x)),
            (Self::Bool(v), Value::Null) => v.push(None),
            (Self::Int(v), Value::Null) => v.push(None),
            (Self::UInt(v), Value::Null) => v.push(None),
            (Self::Float(v), Value::Null) => v.push(None),
            (Self::Str(v), Value::Null) => v.push(None),
            (Self::Time(v), Value::Null) => v.push(None),
            (col, value) => bail!(
                "cannot append {} value to {} column",
                value.column_type().map_or_else(|| "null".to_string(), |t| t.to_string()),
                col.column_type()
            ),
        }
        Ok(())
    }

    /// The value at `idx`, with absent slots surfaced as [`Value::Null`].
    pub fn value(&self, idx: usize) -> Value {
        match self {
            Self::Bool(v) => v[idx].map_or(Value::Null, Value::Bool),
            Self::Int(v) => v[idx].map_or(Value::Null, Value::Int),
            Self::UInt(v) => v[idx].map_or(Value::Null, Value::UInt),
            Self::Float(v) => v[idx].map_or(Value::Null, Value::Float),
            Self::Str(v) => v[idx].clone().map_or(Value::Null, Value::Str),
            Self::Time(v) => v[idx].map_or(Value::Null, Value::Time),
        }
    }
}

struct ReaderShared {
    cols: Vec<ColMeta>,
    data: Arc<Vec<ColumnData>>,
    refs: AtomicIsize,
}

/// Shared read access to a block of columns.
///
/// Readers are reference-counted explicitly: constructing one counts as the
/// first retain, [`ColReader::retain`] adds one, and [`ColReader::release`]
/// removes one. Releasing a reader that was never retained is a bug and
/// panics. Clones share the same counter.
#[derive(Clone)]
pub struct ColReader {
    shared: Arc<ReaderShared>,
}

impl ColReader {
    pub(crate) fn new(cols: Vec<ColMeta>, data: Arc<Vec<ColumnData>>) -> Self {
        Self {
            shared: Arc::new(ReaderShared { cols, data, refs: AtomicIsize::new(1) }),
        }
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.shared.cols
    }

    /// Number of rows in this block.
    pub fn len(&self) -> usize {
        self.shared.data.first().map_or(0, ColumnData::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, row: usize, col: usize) -> Value {
        self.shared.data[col].value(row)
    }

    /// One full row as a [`Record`](crate::values::Record).
    pub fn record(&self, row: usize) -> crate::values::Record {
        self.shared
            .cols
            .iter()
            .enumerate()
            .map(|(i, c)| (c.label.clone(), self.value(row, i)))
            .collect()
    }

    pub fn retain(&self) {
        self.shared.refs.fetch_add(1, Ordering::SeqCst);
    }

    pub fn release(&self) {
        let prev = self.shared.refs.fetch_sub(1, Ordering::SeqCst);
        assert!(prev > 0, "column reader released more times than retained");
    }

    /// Current retain count. Zero means every retain has been balanced.
    pub fn ref_count(&self) -> isize {
        self.shared.refs.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ColReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColReader")
            .field("cols", &self.shared.cols)
            .field("rows", &self.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_checks_element_type() -> Result<()> {
        let mut col = ColumnData::new(ColumnType::Int);
        col.push(Value::Int(1))?;
        col.push(Value::Null)?;
        assert!(col.push(Value::Str("x".into())).is_err());
        assert_eq!(col.value(0), Value::Int(1));
        assert_eq!(col.value(1), Value::Null);
        Ok(())
    }

    #[test]
    fn reader_retain_release_balance() {
        let data = Arc::new(vec![ColumnData::Int(vec![Some(1)])]);
        let reader = ColReader::new(vec![ColMeta::new("v", ColumnType::Int)], data);
        assert_eq!(reader.ref_count(), 1);
        reader.retain();
        assert_eq!(reader.ref_count(), 2);
        reader.release();
        reader.release();
        assert_eq!(reader.ref_count(), 0);
    }

    #[test]
    #[should_panic(expected = "released more times than retained")]
    fn reader_double_release_panics() {
        let data = Arc::new(vec![ColumnData::Int(vec![Some(1)])]);
        let reader = ColReader::new(vec![ColMeta::new("v", ColumnType::Int)], data);
        reader.release();
        reader.release();
    }
}
