//! Caches of in-progress output tables, keyed by group key.
//!
//! [`TableCache`] is the contract a dataset flushes against: enumerate the
//! keys that have output, finalize one key into a table, and discard a key
//! on retraction. [`BuilderCache`] is the standard implementation -- a
//! lazily-populated map of [`TableBuilder`]s, one per distinct group key.
//! Stateful operators with their own buffering (the join) implement
//! [`TableCache`] directly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Result, bail};

use crate::group_key::GroupKey;
use crate::table::{Table, TableBuilder};

/// A per-group-key store of pending output, drained when the owning dataset
/// finishes.
pub trait TableCache: Send + Sync {
    /// Finalize the pending output for `key` into an immutable table.
    fn table(&self, key: &GroupKey) -> Result<Table>;

    /// Visit every key with pending output. Order across keys is
    /// unspecified; the first error aborts the iteration.
    fn for_each(&self, f: &mut dyn FnMut(&GroupKey) -> Result<()>) -> Result<()>;

    /// Drop the pending output for `key`, releasing whatever it holds.
    fn discard_table(&self, key: &GroupKey);
}

/// The standard table cache: one [`TableBuilder`] per distinct group key,
/// created on demand.
#[derive(Default)]
pub struct BuilderCache {
    entries: Mutex<HashMap<GroupKey, Arc<Mutex<TableBuilder>>>>,
}

impl BuilderCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up or create the builder for `key`. The second return value is
    /// true when the builder was created by this call; operators that expect
    /// at most one fragment per key treat `false` as a protocol violation.
    pub fn table_builder(&self, key: &GroupKey) -> (Arc<Mutex<TableBuilder>>, bool) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(key) {
            return (Arc::clone(existing), false);
        }
        let builder = Arc::new(Mutex::new(TableBuilder::new(key.clone())));
        entries.insert(key.clone(), Arc::clone(&builder));
        (builder, true)
    }

    /// Number of distinct group keys with a builder.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TableCache for BuilderCache {
    fn table(&self, key: &GroupKey) -> Result<Table> {
        let builder = {
            let entries = self.entries.lock().unwrap();
            match entries.get(key) {
                Some(b) => Arc::clone(b),
                None => bail!("no entry for group key {key} in cache"),
            }
        };
        let tbl = builder.lock().unwrap().build()?;
        Ok(tbl)
    }

    fn for_each(&self, f: &mut dyn FnMut(&GroupKey) -> Result<()>) -> Result<()> {
        let keys: Vec<GroupKey> = self.entries.lock().unwrap().keys().cloned().collect();
        for key in keys {
            f(&key)?;
        }
        Ok(())
    }

    fn discard_table(&self, key: &GroupKey) {
        self.entries.lock().unwrap().remove(key);
    }
}
