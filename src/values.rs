//! Scalar values, column metadata, and row records.
//!
//! Every cell flowing through the engine is a [`Value`]: a closed sum over the
//! supported column element types plus an explicit null. Comparisons are total
//! within a column type -- null equals null and sorts before every non-null
//! value, and floats are ordered through [`ordered_float`] so a `Value` can be
//! used as a map key or inside a [`GroupKey`](crate::group_key::GroupKey).
//!
//! A [`Record`] is one row as a label -> value map. Records iterate in label
//! order, which is what fixes the schema of tables whose columns are derived
//! from an evaluated row (see the join operator).

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::hash::{Hash, Hasher};

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// Time is tracked as nanoseconds since the epoch.
pub type Time = i64;

/// Label of the column the sort-merge join (and other time-ordered
/// operators) merge on.
pub const DEFAULT_TIME_COL: &str = "_time";

/// The element type of a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Bool,
    Int,
    UInt,
    Float,
    Str,
    Time,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::UInt => "uint",
            Self::Float => "float",
            Self::Str => "string",
            Self::Time => "time",
        };
        f.write_str(s)
    }
}

/// Metadata for one column: its label and element type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ColMeta {
    pub label: String,
    pub typ: ColumnType,
}

impl ColMeta {
    pub fn new(label: impl Into<String>, typ: ColumnType) -> Self {
        Self { label: label.into(), typ }
    }
}

/// Offset of `label` in `cols`, or `None` if absent.
pub fn col_idx(label: &str, cols: &[ColMeta]) -> Option<usize> {
    cols.iter().position(|c| c.label == label)
}

/// A single scalar cell.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Time(Time),
}

impl Value {
    /// The column type this value belongs to, or `None` for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(ColumnType::Bool),
            Self::Int(_) => Some(ColumnType::Int),
            Self::UInt(_) => Some(ColumnType::UInt),
            Self::Float(_) => Some(ColumnType::Float),
            Self::Str(_) => Some(ColumnType::Str),
            Self::Time(_) => Some(ColumnType::Time),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Variant rank used to order values of different variants; null ranks
    /// lowest so it sorts before any non-null value.
    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::UInt(_) => 3,
            Self::Float(_) => 4,
            Self::Str(_) => 5,
            Self::Time(_) => 6,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::UInt(a), Self::UInt(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => OrderedFloat(*a) == OrderedFloat(*b),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Time(a), Self::Time(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::UInt(a), Self::UInt(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => OrderedFloat(*a).cmp(&OrderedFloat(*b)),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Time(a), Self::Time(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::Null => {}
            Self::Bool(v) => v.hash(state),
            Self::Int(v) => v.hash(state),
            Self::UInt(v) => v.hash(state),
            Self::Float(v) => OrderedFloat(*v).hash(state),
            Self::Str(v) => v.hash(state),
            Self::Time(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => f.write_str(v),
            Self::Time(v) => write!(f, "{v}"),
        }
    }
}

/// One row, addressed by column label. Iteration is label-ordered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, value: Value) -> Self {
        self.set(label, value);
        self
    }

    pub fn set(&mut self, label: impl Into<String>, value: Value) {
        self.0.insert(label.into(), value);
    }

    pub fn get(&self, label: &str) -> Option<&Value> {
        self.0.get(label)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Label-ordered iteration over the row's cells.
    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
