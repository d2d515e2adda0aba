//! Group keys: the identity that buckets table fragments.
//!
//! A [`GroupKey`] pairs an ordered set of column descriptors with a parallel
//! set of values, but its semantics are those of an unordered label -> value
//! map: two keys built from the same pairs in different insertion orders are
//! equal, hash identically, and render identically. Ordering between keys
//! with the same label set compares values in ascending label order with null
//! sorting before any non-null value; keys with different label sets are
//! incomparable (`partial_cmp` is `None`) but not equal.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::{Result, bail};

use crate::values::{ColMeta, Value};

/// Immutable identity of a table fragment.
#[derive(Clone, Debug)]
pub struct GroupKey {
    cols: Vec<ColMeta>,
    values: Vec<Value>,
}

impl GroupKey {
    /// Build a key from parallel column and value lists.
    ///
    /// # Errors
    ///
    /// If the lists differ in length or a label appears twice.
    pub fn new(cols: Vec<ColMeta>, values: Vec<Value>) -> Result<Self> {
        if cols.len() != values.len() {
            bail!(
                "group key has {} columns but {} values",
                cols.len(),
                values.len()
            );
        }
        for (i, col) in cols.iter().enumerate() {
            if cols[..i].iter().any(|c| c.label == col.label) {
                bail!("duplicate label {:?} in group key", col.label);
            }
        }
        Ok(Self { cols, values })
    }

    /// The empty key, identifying ungrouped data.
    pub fn empty() -> Self {
        Self { cols: Vec::new(), values: Vec::new() }
    }

    pub fn cols(&self) -> &[ColMeta] {
        &self.cols
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.cols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cols.is_empty()
    }

    pub fn has(&self, label: &str) -> bool {
        self.cols.iter().any(|c| c.label == label)
    }

    /// The value stored under `label`, if the label is part of the key.
    pub fn label_value(&self, label: &str) -> Option<&Value> {
        self.cols
            .iter()
            .position(|c| c.label == label)
            .map(|i| &self.values[i])
    }

    /// (label, value) pairs in ascending label order.
    fn sorted_pairs(&self) -> Vec<(&str, &Value)> {
        let mut pairs: Vec<(&str, &Value)> = self
            .cols
            .iter()
            .zip(self.values.iter())
            .map(|(c, v)| (c.label.as_str(), v))
            .collect();
        pairs.sort_by_key(|(label, _)| *label);
        pairs
    }

    fn same_label_set(&self, other: &Self) -> bool {
        self.cols.len() == other.cols.len() && self.cols.iter().all(|c| other.has(&c.label))
    }
}

impl PartialEq for GroupKey {
    fn eq(&self, other: &Self) -> bool {
        if !self.same_label_set(other) {
            return false;
        }
        self.cols.iter().zip(self.values.iter()).all(|(c, v)| {
            other.label_value(&c.label) == Some(v)
        })
    }
}

impl Eq for GroupKey {}

impl Hash for GroupKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for (label, value) in self.sorted_pairs() {
            label.hash(state);
            value.hash(state);
        }
    }
}

impl PartialOrd for GroupKey {
    /// Keys with different label sets do not order: `<` is false both ways.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if !self.same_label_set(other) {
            return None;
        }
        for ((label, lv), (_, rv)) in self.sorted_pairs().into_iter().zip(other.sorted_pairs()) {
            debug_assert!(other.has(label));
            match lv.cmp(rv) {
                Ordering::Equal => continue,
                ord => return Some(ord),
            }
        }
        Some(Ordering::Equal)
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (label, value)) in self.sorted_pairs().into_iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{label}={value}")?;
        }
        f.write_str("}")
    }
}
