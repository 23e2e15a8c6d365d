//! The zettel service: every note and link operation, coordinated across
//! the note store and the index.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info};

use zk_core::error::{Result, ValidationError, ZkError};
use zk_core::id::IdGenerator;
use zk_core::link::{LinkType, NoteLink};
use zk_core::note::{Note, NoteType};
use zk_graph::{CentralNote, Direction, LinkedNote, NoteGraph, ScoredNote};
use zk_index::{DateField, IndexStore, NoteFilter, TagCount};
use zk_vault::{LockTable, NoteStore};

use crate::config::Config;
use crate::sync::{RebuildReport, Synchronizer};

/// Input for [`ZettelService::create_note`].
#[derive(Debug, Clone, Default)]
pub struct NewNote {
    pub title: String,
    pub content: String,
    pub note_type: NoteType,
    pub tags: Vec<String>,
}

/// Fields to change in [`ZettelService::update_note`]. `None` keeps the
/// current value.
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
    pub note_type: Option<NoteType>,
    pub tags: Option<Vec<String>>,
}

/// Health of the knowledge base.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub notes_dir: String,
    pub database: String,
    pub files: u64,
    /// Documents the last rebuild could not decode, unchanged since.
    pub unreadable: u64,
    pub indexed: u64,
    pub links: u64,
    pub tags: u64,
    pub orphans: u64,
    pub stale: bool,
}

/// Note and link operations over a [`Synchronizer`].
///
/// Safe to share between threads. Mutations lock every note they touch
/// for their whole read-modify-write cycle.
pub struct ZettelService {
    sync: Synchronizer,
    ids: IdGenerator,
    locks: LockTable,
}

impl ZettelService {
    /// Open the stores named by `config` and reconcile the index.
    ///
    /// # Errors
    ///
    /// Returns an error if the notes directory or the index cannot be
    /// opened, or if the startup rebuild fails.
    pub fn open(config: &Config) -> Result<Self> {
        let store = NoteStore::open(&config.notes_path())?;
        let target = config.index_target()?;
        debug!(notes_dir = %config.notes_path().display(), index = %target.describe(), "opening knowledge base");
        let index = IndexStore::connect(&target)?;
        let service = Self::new(store, index, config.deep_check);
        if let Some(report) = service.sync.ensure_fresh()? {
            info!(notes = report.notes, links = report.links, "reconciled index at startup");
        }
        Ok(service)
    }

    #[must_use]
    pub fn new(store: NoteStore, index: IndexStore, deep_check: bool) -> Self {
        Self {
            sync: Synchronizer::new(store, index, deep_check),
            ids: IdGenerator::new(),
            locks: LockTable::new(),
        }
    }

    #[must_use]
    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    // === Notes ===

    /// Create a note with a fresh id.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTitle`] or a storage error.
    pub fn create_note(&self, new: NewNote) -> Result<Note> {
        let mut id = self.ids.next_id();
        // Another process may share the notes directory.
        while self.sync.store().exists(&id) {
            id = self.ids.next_id();
        }
        let note = Note::new(
            id,
            &new.title,
            &new.content,
            new.note_type,
            &new.tags,
            Utc::now(),
        )?;

        let _guard = self.locks.acquire(&[note.id.as_str()]);
        self.sync.write(
            "create_note",
            &[note.id.as_str()],
            |store| store.save(&note),
            |tx, hash| tx.upsert_note(&note, Some(hash.as_str())),
        )?;
        debug!(id = %note.id, "created note");
        Ok(note)
    }

    /// Change a note's title, content, type or tags. Links are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`], a validation error, or a storage error.
    pub fn update_note(&self, id: &str, update: NoteUpdate) -> Result<Note> {
        let _guard = self.locks.acquire(&[id]);
        let mut note = self.sync.store().load(id)?;
        if let Some(title) = &update.title {
            note.set_title(title)?;
        }
        if let Some(content) = &update.content {
            note.content = content.trim().to_string();
        }
        if let Some(note_type) = update.note_type {
            note.note_type = note_type;
        }
        if let Some(tags) = &update.tags {
            note.tags = zk_core::normalize_tags(tags);
        }
        note.touch(Utc::now());

        self.sync.write(
            "update_note",
            &[id],
            |store| store.save(&note),
            |tx, hash| tx.upsert_note(&note, Some(hash.as_str())),
        )?;
        debug!(id, "updated note");
        Ok(note)
    }

    /// Delete a note and every link touching it. The documents of linked
    /// notes are rewritten without their links to the deleted note.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] or a storage error. On a storage error
    /// every document is left as it was.
    pub fn delete_note(&self, id: &str) -> Result<()> {
        let mut involved = self.delete_scope(id)?;
        let _guard = loop {
            let guard = self.locks.acquire(&involved.iter().collect::<Vec<_>>());
            let current = self.delete_scope(id)?;
            if current.is_subset(&involved) {
                break guard;
            }
            drop(guard);
            involved.extend(current);
        };

        let note = self.sync.store().load(id)?;
        let now = Utc::now();
        let mut changes = Vec::new();
        for other in involved.iter().filter(|other| *other != id) {
            let before = match self.sync.store().load(other) {
                Ok(before) => before,
                Err(ZkError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            let mut after = before.clone();
            let mut removed = after.remove_links_to(id, None);
            removed.extend(after.remove_links_to(&note.title, None));
            if !removed.is_empty() {
                after.touch(now);
                changes.push((before, after));
            }
        }

        self.sync.write(
            "delete_note",
            &[id],
            |store| {
                let hashes = save_all(store, &changes)?;
                if let Err(e) = store.delete(id) {
                    restore(store, &changes);
                    return Err(e);
                }
                Ok(hashes)
            },
            |tx, hashes| {
                tx.delete_note(id)?;
                for (_, after) in &changes {
                    tx.upsert_note(after, hashes.get(&after.id).map(String::as_str))?;
                }
                Ok(())
            },
        )?;
        debug!(id, rewritten = changes.len(), "deleted note");
        Ok(())
    }

    /// The note and every note linked to it, by document or by index.
    fn delete_scope(&self, id: &str) -> Result<BTreeSet<String>> {
        let note = self.sync.store().load(id)?;
        let mut ids: BTreeSet<String> = self.sync.index().read(|c| {
            let mut ids = c.neighbors(id)?;
            for link in &note.links {
                if let Some(target) = c.resolve_target(&link.target)? {
                    ids.insert(target);
                }
            }
            Ok(ids)
        })?;
        ids.insert(id.to_string());
        Ok(ids)
    }

    /// Fetch a note by id, falling back to an exact title match.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] when neither matches.
    pub fn get_note(&self, id_or_title: &str) -> Result<Note> {
        if self.sync.store().exists(id_or_title) {
            return self.sync.store().load(id_or_title);
        }
        self.sync.ensure_fresh()?;
        match self.sync.index().read(|c| c.find_by_title(id_or_title))? {
            Some(found) => self.sync.store().load(&found.id),
            None => Err(ZkError::note_not_found(id_or_title)),
        }
    }

    /// Notes matching every given filter, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn search_notes(&self, filter: &NoteFilter) -> Result<Vec<Note>> {
        self.fresh_read(|c| c.search(filter))
    }

    /// Every indexed note, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn all_notes(&self) -> Result<Vec<Note>> {
        self.fresh_read(|c| c.all_notes())
    }

    /// Every tag with its usage count, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn all_tags(&self) -> Result<Vec<TagCount>> {
        self.fresh_read(|c| c.tag_counts())
    }

    // === Links ===

    /// Link `source` to `target`. The source document records the link,
    /// the target document records the inverse.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::SelfLink`] when `source == target`
    /// - [`ZkError::NotFound`] when either note is missing
    /// - [`ValidationError::DuplicateLink`] when the link already exists
    /// - a storage error, after which both documents are as they were
    pub fn create_link(
        &self,
        source: &str,
        target: &str,
        link_type: LinkType,
        description: Option<&str>,
    ) -> Result<()> {
        if source == target {
            return Err(ValidationError::SelfLink(source.to_string()).into());
        }
        let _guard = self.locks.acquire(&[source, target]);
        let source_before = self.sync.store().load(source)?;
        let target_before = self.sync.store().load(target)?;
        let declared = self
            .spellings_of(&source_before, target)?
            .iter()
            .any(|t| source_before.has_link(t, link_type))
            || self
                .spellings_of(&target_before, source)?
                .iter()
                .any(|s| target_before.has_link(s, link_type.inverse()));
        let indexed = self.fresh_read(|c| c.link_exists(source, target, link_type))?;
        if declared || indexed {
            return Err(ValidationError::DuplicateLink {
                source_id: source.to_string(),
                target_id: target.to_string(),
                link_type: link_type.to_string(),
            }
            .into());
        }

        let description = description.map(str::to_string);
        let now = Utc::now();
        let mut source_after = source_before.clone();
        source_after.add_link(NoteLink::new(link_type, target).with_description(description.clone()));
        source_after.touch(now);
        let mut target_after = target_before.clone();
        target_after.add_link(
            NoteLink::new(link_type.inverse(), source).with_description(description.clone()),
        );
        target_after.touch(now);

        let changes = [(source_before, source_after), (target_before, target_after)];
        self.sync.write(
            "create_link",
            &[source, target],
            |store| save_all(store, &changes),
            |tx, hashes| {
                for (_, after) in &changes {
                    tx.upsert_note(after, hashes.get(&after.id).map(String::as_str))?;
                }
                zk_graph::connect(tx, source, target, link_type, description.as_deref())
            },
        )?;
        debug!(source, target, %link_type, "created link");
        Ok(())
    }

    /// Remove links from `source` to `target` and their inverses. With no
    /// type, every link between them in that direction goes. Returns the
    /// removed types as seen from `source`.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] when a note or the link is missing, or
    /// a storage error, after which both documents are as they were.
    pub fn remove_link(
        &self,
        source: &str,
        target: &str,
        link_type: Option<LinkType>,
    ) -> Result<Vec<LinkType>> {
        let _guard = self.locks.acquire(&[source, target]);
        let source_before = self.sync.store().load(source)?;
        let target_before = self.sync.store().load(target)?;

        let to_target = self.spellings_of(&source_before, target)?;
        let to_source = self.spellings_of(&target_before, source)?;
        let mut source_after = source_before.clone();
        let mut target_after = target_before.clone();
        let mut removed: BTreeSet<LinkType> = BTreeSet::new();
        for spelling in &to_target {
            removed.extend(
                source_after
                    .remove_links_to(spelling, link_type)
                    .into_iter()
                    .map(|l| l.link_type),
            );
        }
        // A hand-edited document may record only one side.
        for spelling in &to_source {
            removed.extend(
                target_after
                    .remove_links_to(spelling, link_type.map(LinkType::inverse))
                    .into_iter()
                    .map(|l| l.link_type.inverse()),
            );
        }
        // The inverse of every removed type goes too.
        for t in &removed {
            for spelling in &to_source {
                target_after.remove_links_to(spelling, Some(t.inverse()));
            }
        }
        if removed.is_empty() {
            let what = link_type.map_or_else(|| "any".to_string(), |t| t.to_string());
            return Err(ZkError::NotFound(format!("link {source} -[{what}]-> {target}")));
        }

        let now = Utc::now();
        let mut changes = Vec::new();
        for (before, mut after) in [(source_before, source_after), (target_before, target_after)] {
            if after.links != before.links {
                after.touch(now);
                changes.push((before, after));
            }
        }

        let removed: Vec<LinkType> = removed.into_iter().collect();
        self.sync.write(
            "remove_link",
            &[source, target],
            |store| save_all(store, &changes),
            |tx, hashes| {
                for (_, after) in &changes {
                    tx.upsert_note(after, hashes.get(&after.id).map(String::as_str))?;
                }
                for t in &removed {
                    match zk_graph::disconnect(tx, source, target, Some(*t)) {
                        Ok(_) | Err(ZkError::NotFound(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                Ok(())
            },
        )?;
        debug!(source, target, removed = removed.len(), "removed link");
        Ok(removed)
    }

    /// Every link target written in `note` that names `id`: the id itself or
    /// a title the index resolves to it.
    fn spellings_of(&self, note: &Note, id: &str) -> Result<BTreeSet<String>> {
        let written: BTreeSet<&str> = note.links.iter().map(|l| l.target.as_str()).collect();
        self.fresh_read(|c| {
            let mut spellings = BTreeSet::new();
            for target in written {
                if target == id || c.resolve_target(target)?.as_deref() == Some(id) {
                    spellings.insert(target.to_string());
                }
            }
            Ok(spellings)
        })
    }

    // === Graph queries ===

    /// Notes linked to `id`, see [`zk_graph::linked_notes`].
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] or a storage error.
    pub fn linked_notes(
        &self,
        id: &str,
        direction: Direction,
        link_type: Option<LinkType>,
    ) -> Result<Vec<LinkedNote>> {
        self.fresh_read(|c| zk_graph::linked_notes(c, id, direction, link_type))
    }

    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] or a storage error.
    pub fn find_similar(&self, id: &str, limit: usize) -> Result<Vec<ScoredNote>> {
        self.fresh_read(|c| zk_graph::find_similar(c, id, limit))
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub fn find_central(&self, limit: usize) -> Result<Vec<CentralNote>> {
        self.fresh_read(|c| zk_graph::find_central(c, limit))
    }

    /// # Errors
    ///
    /// Returns a storage error.
    pub fn find_orphaned(&self) -> Result<Vec<Note>> {
        self.fresh_read(|c| zk_graph::find_orphaned(c))
    }

    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidDateRange`] or a storage error.
    pub fn list_by_date(
        &self,
        field: DateField,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Note>> {
        self.fresh_read(|c| zk_graph::list_by_date(c, field, start, end, limit))
    }

    /// The graph around `id` up to `depth` hops.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] or a storage error.
    pub fn neighborhood(&self, id: &str, depth: u32) -> Result<NoteGraph> {
        self.fresh_read(|c| NoteGraph::neighborhood(c, id, depth))
    }

    // === Maintenance ===

    /// Rebuild the index from the note documents.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn rebuild_index(&self) -> Result<RebuildReport> {
        self.sync.rebuild()
    }

    /// Counts from both stores. Does not rebuild.
    ///
    /// # Errors
    ///
    /// Returns a storage error.
    pub fn status(&self) -> Result<Status> {
        let stale = self.sync.is_stale()?;
        let files = self.sync.store().count()?;
        let unreadable = self.sync.unreadable()?.len() as u64;
        let (indexed, links, tags, orphans) = self.sync.index().read(|c| {
            let degrees = c.degrees()?;
            let orphans = degrees.iter().filter(|(_, d)| *d == 0).count() as u64;
            Ok((c.count()?, c.link_count()?, c.tag_counts()?.len() as u64, orphans))
        })?;
        Ok(Status {
            notes_dir: self.sync.store().root().display().to_string(),
            database: self.sync.index().location().to_string(),
            files,
            unreadable,
            indexed,
            links,
            tags,
            orphans,
            stale,
        })
    }

    fn fresh_read<T>(&self, f: impl FnOnce(&zk_index::IndexConn<'_>) -> Result<T>) -> Result<T> {
        self.sync.ensure_fresh()?;
        self.sync.index().read(f)
    }
}

/// Save every `after` document in order. On failure the documents already
/// written are put back to their `before` version.
fn save_all(store: &NoteStore, changes: &[(Note, Note)]) -> Result<BTreeMap<String, String>> {
    let mut hashes = BTreeMap::new();
    for (done, (_, after)) in changes.iter().enumerate() {
        match store.save(after) {
            Ok(hash) => {
                hashes.insert(after.id.clone(), hash);
            }
            Err(e) => {
                restore(store, &changes[..done]);
                return Err(e);
            }
        }
    }
    Ok(hashes)
}

fn restore(store: &NoteStore, changes: &[(Note, Note)]) {
    for (before, _) in changes.iter().rev() {
        if let Err(e) = store.save(before) {
            error!(id = %before.id, error = %e, "failed to restore note document");
        }
    }
}
