//! Keeps the index in step with the note documents.
//!
//! The note store is authoritative. Every mutation writes the document
//! first and mirrors it into the index second; an index failure after a
//! successful document write is logged, marks the index dirty, and is
//! repaired by the next rebuild.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::SystemTime;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use zk_core::error::{Result, ZkError};
use zk_index::{IndexConn, IndexStore};
use zk_vault::{DocumentStamp, NoteStore};

/// A problem met while rebuilding, tied to a note id or document path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildIssue {
    pub source: String,
    pub message: String,
}

/// Outcome of a full rebuild.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    pub notes: u64,
    pub links: u64,
    /// Documents that could not be decoded and were left out.
    pub skipped: Vec<RebuildIssue>,
    /// Indexed notes with dropped link lines or header fixes.
    pub warnings: Vec<RebuildIssue>,
}

/// Differences between the documents and the index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Drift {
    pub missing_from_index: Vec<String>,
    pub missing_from_files: Vec<String>,
    pub changed: Vec<String>,
}

impl Drift {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing_from_index.is_empty()
            && self.missing_from_files.is_empty()
            && self.changed.is_empty()
    }
}

/// Owns both stores and coordinates writes against rebuilds.
///
/// Writers share the gate; a rebuild holds it exclusively.
pub struct Synchronizer {
    store: NoteStore,
    index: IndexStore,
    gate: RwLock<()>,
    dirty: AtomicBool,
    deep_check: bool,
    /// Documents the last rebuild could not decode, with their modification
    /// time then. They stay out of the staleness check until they change.
    unreadable: Mutex<BTreeMap<PathBuf, Option<SystemTime>>>,
}

impl Synchronizer {
    #[must_use]
    pub fn new(store: NoteStore, index: IndexStore, deep_check: bool) -> Self {
        Self {
            store,
            index,
            gate: RwLock::new(()),
            dirty: AtomicBool::new(false),
            deep_check,
            unreadable: Mutex::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    #[must_use]
    pub fn index(&self) -> &IndexStore {
        &self.index
    }

    /// Whether an index write failed since the last rebuild.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Documents skipped by the last rebuild and unchanged since.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Vault`] if the notes directory cannot be read.
    pub fn unreadable(&self) -> Result<Vec<PathBuf>> {
        let unreadable = self.unreadable.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .store
            .documents()?
            .into_iter()
            .filter(|doc| is_known_unreadable(&unreadable, doc))
            .map(|doc| doc.path)
            .collect())
    }

    /// Documents expected in the index: all of them except those the last
    /// rebuild skipped and that have not been touched since.
    fn indexable_documents(&self) -> Result<Vec<DocumentStamp>> {
        let unreadable = self.unreadable.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self
            .store
            .documents()?
            .into_iter()
            .filter(|doc| !is_known_unreadable(&unreadable, doc))
            .collect())
    }

    /// Stale when an index write failed, when the indexable document and
    /// row counts differ, or (with deep checking) when [`Self::drift`]
    /// finds anything.
    ///
    /// # Errors
    ///
    /// Returns a storage error if either store cannot be read.
    pub fn is_stale(&self) -> Result<bool> {
        if self.is_dirty() {
            return Ok(true);
        }
        let files = self.indexable_documents()?.len() as u64;
        let rows = self.index.count()?;
        if files != rows {
            debug!(files, rows, "index count differs from note documents");
            return Ok(true);
        }
        if self.deep_check {
            return Ok(!self.drift()?.is_empty());
        }
        Ok(false)
    }

    /// Compare document ids and content hashes against the index.
    ///
    /// # Errors
    ///
    /// Returns a storage error if either store cannot be read.
    pub fn drift(&self) -> Result<Drift> {
        let mut files: BTreeMap<String, String> = BTreeMap::new();
        for doc in self.indexable_documents()? {
            match self.store.content_hash(&doc.id) {
                Ok(hash) => {
                    files.insert(doc.id, hash);
                }
                // Removed between listing and hashing.
                Err(ZkError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let rows = self.index.read(|c| c.content_hashes())?;

        let mut drift = Drift::default();
        for (id, hash) in &files {
            match rows.get(id) {
                None => drift.missing_from_index.push(id.clone()),
                Some(stored) if stored.as_deref() != Some(hash.as_str()) => {
                    drift.changed.push(id.clone());
                }
                Some(_) => {}
            }
        }
        drift.missing_from_files = rows
            .keys()
            .filter(|id| !files.contains_key(*id))
            .cloned()
            .collect();
        Ok(drift)
    }

    /// Rebuild if [`Self::is_stale`] says so.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the check or the rebuild fails.
    pub fn ensure_fresh(&self) -> Result<Option<RebuildReport>> {
        if self.is_stale()? {
            return self.rebuild().map(Some);
        }
        Ok(None)
    }

    /// Rebuild the whole index from the note documents in one transaction.
    ///
    /// Undecodable documents, dangling link targets and self-links are
    /// reported and skipped. Running it twice yields the same index.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the notes directory cannot be listed or
    /// the transaction fails; the previous index is then left untouched.
    pub fn rebuild(&self) -> Result<RebuildReport> {
        let _exclusive = self.gate.write().unwrap_or_else(PoisonError::into_inner);
        let mut unreadable = BTreeMap::new();
        let report = self
            .index
            .write(|tx| rebuild_into(tx, &self.store, &mut unreadable))?;
        *self.unreadable.lock().unwrap_or_else(PoisonError::into_inner) = unreadable;
        self.dirty.store(false, Ordering::Release);
        info!(
            notes = report.notes,
            links = report.links,
            skipped = report.skipped.len(),
            warnings = report.warnings.len(),
            "rebuilt index"
        );
        Ok(report)
    }

    /// Run a document write, then mirror it into the index.
    ///
    /// A failing `file_op` aborts with its error. A failing `index_op` is
    /// logged with `operation` and `ids`, marks the index dirty, and the
    /// call still succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error from `file_op`.
    pub fn write<T>(
        &self,
        operation: &str,
        ids: &[&str],
        file_op: impl FnOnce(&NoteStore) -> Result<T>,
        index_op: impl FnOnce(&IndexConn<'_>, &T) -> Result<()>,
    ) -> Result<T> {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let out = file_op(&self.store)?;
        if let Err(e) = self.index.write(|tx| index_op(tx, &out)) {
            self.dirty.store(true, Ordering::Release);
            error!(operation, ?ids, error = %e, "index update failed; index marked stale");
        } else {
            debug!(operation, ?ids, "mirrored into index");
        }
        Ok(out)
    }

    /// Re-derive one note's row and every edge touching it from the
    /// documents. A missing document is treated as a removal.
    ///
    /// # Errors
    ///
    /// Returns the decode or storage error; on an index error the index is
    /// also marked dirty.
    pub fn reindex_note(&self, id: &str) -> Result<()> {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        let stored = match self.store.load_stored(id) {
            Ok(stored) => stored,
            Err(ZkError::NotFound(_)) => return self.remove_row(id),
            Err(e) => return Err(e),
        };
        for warning in &stored.warnings {
            warn!(id, "{warning}");
        }

        let result = self.index.write(|tx| {
            let mut neighbors: BTreeSet<String> = tx.neighbors(id)?;
            tx.upsert_note(&stored.note, Some(&stored.content_hash))?;
            tx.delete_links_touching(id)?;

            for link in &stored.note.links {
                match tx.resolve_target(&link.target)? {
                    Some(target) if target != id => {
                        zk_graph::mirror(tx, id, &target, link.link_type, link.description.as_deref())?;
                        neighbors.insert(target);
                    }
                    Some(_) => warn!(id, "ignoring self-link"),
                    None => warn!(id, target = %link.target, "link target not found"),
                }
            }

            // Neighbours keep the links their own documents declare.
            for other in neighbors {
                let Ok(note) = self.store.load(&other) else {
                    continue;
                };
                for link in &note.links {
                    if tx.resolve_target(&link.target)?.as_deref() == Some(id) {
                        zk_graph::mirror(tx, &other, id, link.link_type, link.description.as_deref())?;
                    }
                }
            }
            Ok(())
        });
        self.flag_on_error(result, "reindex_note", id)
    }

    /// Drop a note's row and edges after its document disappeared.
    ///
    /// # Errors
    ///
    /// Returns the index error; the index is also marked dirty.
    pub fn forget_note(&self, id: &str) -> Result<()> {
        let _shared = self.gate.read().unwrap_or_else(PoisonError::into_inner);
        self.remove_row(id)
    }

    fn remove_row(&self, id: &str) -> Result<()> {
        let result = self.index.write(|tx| tx.delete_note(id).map(|_| ()));
        self.flag_on_error(result, "forget_note", id)
    }

    fn flag_on_error(&self, result: Result<()>, operation: &str, id: &str) -> Result<()> {
        if let Err(e) = &result {
            if matches!(e, ZkError::Index(_)) {
                self.dirty.store(true, Ordering::Release);
            }
            error!(operation, id, error = %e, "incremental reindex failed");
        }
        result
    }
}

fn is_known_unreadable(
    unreadable: &BTreeMap<PathBuf, Option<SystemTime>>,
    doc: &DocumentStamp,
) -> bool {
    unreadable.get(&doc.path) == Some(&doc.modified)
}

fn rebuild_into(
    tx: &IndexConn<'_>,
    store: &NoteStore,
    unreadable: &mut BTreeMap<PathBuf, Option<SystemTime>>,
) -> Result<RebuildReport> {
    let mut report = RebuildReport::default();
    tx.clear()?;

    let mut declared = Vec::new();
    for item in store.list_all()? {
        match item {
            Ok(stored) => {
                let id = stored.note.id.clone();
                for warning in stored.warnings {
                    warn!(id = %id, "{warning}");
                    report.warnings.push(RebuildIssue {
                        source: id.clone(),
                        message: warning,
                    });
                }
                tx.upsert_note(&stored.note, Some(&stored.content_hash))?;
                report.notes += 1;
                declared.extend(stored.note.links.into_iter().map(|link| (id.clone(), link)));
            }
            Err(skipped) => {
                warn!(
                    path = %skipped.path.display(),
                    error = %skipped.error,
                    "skipping unreadable note document"
                );
                report.skipped.push(RebuildIssue {
                    source: skipped.path.display().to_string(),
                    message: skipped.error.to_string(),
                });
                unreadable.insert(skipped.path, skipped.modified);
            }
        }
    }

    for (source, link) in declared {
        let message = match tx.resolve_target(&link.target)? {
            Some(target) if target == source => "link to itself ignored".to_string(),
            Some(target) => {
                zk_graph::mirror(tx, &source, &target, link.link_type, link.description.as_deref())?;
                continue;
            }
            None => format!("link target '{}' not found", link.target),
        };
        warn!(id = %source, link_type = %link.link_type, "{message}");
        report.warnings.push(RebuildIssue { source, message });
    }

    report.links = tx.link_count()?;
    Ok(report)
}
