//! Per-note locks.
//!
//! An operation that reads, modifies and rewrites several note documents
//! acquires all of their ids at once, so two operations touching the same
//! note are serialized and lock ordering cannot deadlock.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Condvar, Mutex, PoisonError};

/// Set of note ids currently held by some operation.
#[derive(Debug, Default)]
pub struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Releases its ids when dropped.
#[derive(Debug)]
pub struct NoteGuard<'a> {
    table: &'a LockTable,
    ids: Vec<String>,
}

impl LockTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until none of `ids` is held, then hold all of them.
    pub fn acquire<S: AsRef<str>>(&self, ids: &[S]) -> NoteGuard<'_> {
        let wanted: BTreeSet<&str> = ids.iter().map(AsRef::as_ref).collect();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while wanted.iter().any(|id| held.contains(*id)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        let ids: Vec<String> = wanted.into_iter().map(str::to_string).collect();
        held.extend(ids.iter().cloned());
        NoteGuard { table: self, ids }
    }

    fn release(&self, ids: &[String]) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            held.remove(id);
        }
        drop(held);
        self.released.notify_all();
    }
}

impl NoteGuard<'_> {
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

impl Drop for NoteGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.ids);
    }
}
