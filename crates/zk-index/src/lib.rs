//! # zk-index
//!
//! SQLite index for zk.
//!
//! Maintains a derived, disposable mirror of the note documents:
//! - `notes` table for point lookups, search and date queries
//! - `tags` / `note_tags` for the many-to-many tag relation
//! - `links` for typed edges, both directions stored explicitly
//!
//! Every mutation runs inside [`IndexStore::write`], one transaction per
//! logical operation.

pub mod target;

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{Type, Value as SqlValue};
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use serde::Serialize;
use tracing::debug;

use zk_core::error::{Result, ZkError};
use zk_core::link::{LinkType, NoteLink};
use zk_core::note::{Note, NoteType};

pub use target::IndexTarget;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notes (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        content TEXT NOT NULL DEFAULT '',
        note_type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        content_hash TEXT
    );

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE IF NOT EXISTS note_tags (
        note_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (note_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS links (
        source_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
        target_id TEXT NOT NULL REFERENCES notes(id) ON DELETE CASCADE,
        link_type TEXT NOT NULL,
        description TEXT,
        PRIMARY KEY (source_id, target_id, link_type),
        CHECK (source_id <> target_id)
    );

    CREATE INDEX IF NOT EXISTS idx_notes_title ON notes(title);
    CREATE INDEX IF NOT EXISTS idx_notes_created_at ON notes(created_at);
    CREATE INDEX IF NOT EXISTS idx_notes_updated_at ON notes(updated_at);
    CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_id);
    CREATE INDEX IF NOT EXISTS idx_note_tags_tag ON note_tags(tag_id);
";

const NOTE_COLUMNS: &str = "id, title, content, note_type, created_at, updated_at";

/// Owns the index database connection.
pub struct IndexStore {
    conn: Mutex<Connection>,
    location: String,
}

impl IndexStore {
    /// Open or create an index database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the database cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ZkError::Index(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(ix)?;
        Self::init(conn, path.display().to_string())
    }

    /// Create an in-memory index (useful for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if schema creation fails.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(ix)?;
        Self::init(conn, ":memory:".to_string())
    }

    /// Open the index named by a parsed connection string.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the database cannot be opened.
    pub fn connect(target: &IndexTarget) -> Result<Self> {
        match target {
            IndexTarget::Memory => Self::in_memory(),
            IndexTarget::File(path) => Self::open(path),
        }
    }

    fn init(conn: Connection, location: String) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5)).map_err(ix)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;").map_err(ix)?;
        conn.execute_batch(SCHEMA).map_err(ix)?;
        // SQLite's lower() only folds ASCII.
        conn.create_scalar_function(
            "zk_fold",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            |ctx| Ok(ctx.get::<Option<String>>(0)?.map(|s| s.to_lowercase())),
        )
        .map_err(ix)?;
        debug!(%location, "opened index");
        Ok(Self {
            conn: Mutex::new(conn),
            location,
        })
    }

    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Run read-only queries against the index.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or [`ZkError::Index`] if the connection
    /// lock is poisoned.
    pub fn read<T>(&self, f: impl FnOnce(&IndexConn<'_>) -> Result<T>) -> Result<T> {
        let conn = self.lock()?;
        f(&IndexConn { conn: &conn })
    }

    /// Run `f` inside one transaction. Committed when `f` returns `Ok`,
    /// rolled back otherwise.
    ///
    /// # Errors
    ///
    /// Returns whatever `f` returns, or [`ZkError::Index`] if the
    /// transaction cannot be started or committed.
    pub fn write<T>(&self, f: impl FnOnce(&IndexConn<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(ix)?;
        let out = f(&IndexConn { conn: &tx })?;
        tx.commit().map_err(ix)?;
        Ok(out)
    }

    /// Number of indexed notes.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn count(&self) -> Result<u64> {
        self.read(|c| c.count())
    }

    /// Look up a note by id.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn get_note(&self, id: &str) -> Result<Option<Note>> {
        self.read(|c| c.get_note(id))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| ZkError::Index("index connection lock poisoned".to_string()))
    }
}

/// Which timestamp a date query filters and orders by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DateField {
    #[default]
    Created,
    Updated,
}

impl DateField {
    fn column(self) -> &'static str {
        match self {
            Self::Created => "created_at",
            Self::Updated => "updated_at",
        }
    }
}

/// A stored edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRow {
    pub source_id: String,
    pub target_id: String,
    pub link_type: LinkType,
    pub description: Option<String>,
}

impl LinkRow {
    #[must_use]
    pub fn into_note_link(self) -> NoteLink {
        NoteLink::new(self.link_type, self.target_id).with_description(self.description)
    }
}

/// A tag and the number of notes carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub name: String,
    pub count: u64,
}

/// Filters for [`IndexConn::search`]. All filters are combined with AND.
#[derive(Debug, Clone, Default)]
pub struct NoteFilter {
    /// Case-insensitive substring of the title or content.
    pub text: Option<String>,
    /// Every listed tag must be present.
    pub tags: Vec<String>,
    pub note_type: Option<NoteType>,
    pub limit: Option<usize>,
}

/// A borrowed connection, either plain (reads) or inside a transaction.
pub struct IndexConn<'a> {
    conn: &'a Connection,
}

impl IndexConn<'_> {
    // === Notes ===

    /// Insert or update a note row and replace its tag associations.
    /// Links are left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if a statement fails.
    pub fn upsert_note(&self, note: &Note, content_hash: Option<&str>) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO notes (id, title, content, note_type, created_at, updated_at, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    title = excluded.title,
                    content = excluded.content,
                    note_type = excluded.note_type,
                    created_at = excluded.created_at,
                    updated_at = excluded.updated_at,
                    content_hash = excluded.content_hash",
                params![
                    note.id,
                    note.title,
                    note.content,
                    note.note_type.as_str(),
                    fmt_ts(&note.created_at),
                    fmt_ts(&note.updated_at),
                    content_hash,
                ],
            )
            .map_err(ix)?;

        self.conn
            .execute("DELETE FROM note_tags WHERE note_id = ?1", params![note.id])
            .map_err(ix)?;
        for tag in &note.tags {
            self.conn
                .execute(
                    "INSERT INTO tags (name) VALUES (?1) ON CONFLICT(name) DO NOTHING",
                    params![tag],
                )
                .map_err(ix)?;
            self.conn
                .execute(
                    "INSERT OR IGNORE INTO note_tags (note_id, tag_id)
                     SELECT ?1, id FROM tags WHERE name = ?2",
                    params![note.id, tag],
                )
                .map_err(ix)?;
        }
        self.prune_tags()
    }

    /// Delete a note row. Its tag associations and every link touching it
    /// go with it. Returns `false` if the note was not indexed.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if a statement fails.
    pub fn delete_note(&self, id: &str) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM notes WHERE id = ?1", params![id])
            .map_err(ix)?;
        self.prune_tags()?;
        Ok(removed > 0)
    }

    /// Remove every row from every table.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if a statement fails.
    pub fn clear(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "DELETE FROM links;
                 DELETE FROM note_tags;
                 DELETE FROM tags;
                 DELETE FROM notes;",
            )
            .map_err(ix)
    }

    fn prune_tags(&self) -> Result<()> {
        self.conn
            .execute(
                "DELETE FROM tags WHERE id NOT IN (SELECT tag_id FROM note_tags)",
                [],
            )
            .map_err(ix)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM notes", [], |row| row.get(0))
            .map_err(ix)?;
        Ok(count as u64)
    }

    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn note_exists(&self, id: &str) -> Result<bool> {
        self.conn
            .query_row("SELECT 1 FROM notes WHERE id = ?1", params![id], |_| Ok(()))
            .optional()
            .map(|found| found.is_some())
            .map_err(ix)
    }

    /// Look up a note by id, with tags and outbound links.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn get_note(&self, id: &str) -> Result<Option<Note>> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1");
        Ok(self.query_notes(&sql, params![id])?.into_iter().next())
    }

    /// Look up a note by exact title. When several notes share a title the
    /// oldest id wins.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn find_by_title(&self, title: &str) -> Result<Option<Note>> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes WHERE title = ?1 ORDER BY id LIMIT 1");
        Ok(self.query_notes(&sql, params![title])?.into_iter().next())
    }

    /// Resolve a link target written as an id or an exact title.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn resolve_target(&self, target: &str) -> Result<Option<String>> {
        if self.note_exists(target)? {
            return Ok(Some(target.to_string()));
        }
        self.conn
            .query_row(
                "SELECT id FROM notes WHERE title = ?1 ORDER BY id LIMIT 1",
                params![target],
                |row| row.get(0),
            )
            .optional()
            .map_err(ix)
    }

    /// Every indexed note, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn all_notes(&self) -> Result<Vec<Note>> {
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes ORDER BY id");
        self.query_notes(&sql, [])
    }

    /// Notes matching every given filter, most recently updated first.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn search(&self, filter: &NoteFilter) -> Result<Vec<Note>> {
        let mut sql = format!("SELECT {NOTE_COLUMNS} FROM notes n WHERE 1=1");
        let mut values: Vec<SqlValue> = Vec::new();

        if let Some(text) = filter.text.as_deref().filter(|t| !t.trim().is_empty()) {
            sql.push_str(
                " AND (instr(zk_fold(n.title), ?) > 0 OR instr(zk_fold(n.content), ?) > 0)",
            );
            let needle = text.trim().to_lowercase();
            values.push(SqlValue::Text(needle.clone()));
            values.push(SqlValue::Text(needle));
        }
        if let Some(note_type) = filter.note_type {
            sql.push_str(" AND n.note_type = ?");
            values.push(SqlValue::Text(note_type.as_str().to_string()));
        }
        let tags: BTreeSet<String> = zk_core::normalize_tags(&filter.tags);
        if !tags.is_empty() {
            let placeholders = vec!["?"; tags.len()].join(", ");
            sql.push_str(&format!(
                " AND (SELECT COUNT(*) FROM note_tags nt JOIN tags t ON t.id = nt.tag_id
                       WHERE nt.note_id = n.id AND t.name IN ({placeholders})) = ?"
            ));
            values.extend(tags.iter().cloned().map(SqlValue::Text));
            values.push(SqlValue::Integer(tags.len() as i64));
        }
        sql.push_str(" ORDER BY n.updated_at DESC, n.id ASC LIMIT ?");
        values.push(SqlValue::Integer(limit_value(filter.limit)));

        self.query_notes(&sql, params_from_iter(values))
    }

    /// Notes whose `field` lies in the inclusive range, ascending by that
    /// field then id. Open bounds are `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn notes_in_range(
        &self,
        field: DateField,
        start: Option<&DateTime<Utc>>,
        end: Option<&DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<Note>> {
        let col = field.column();
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM notes
             WHERE (?1 IS NULL OR {col} >= ?1) AND (?2 IS NULL OR {col} <= ?2)
             ORDER BY {col} ASC, id ASC
             LIMIT ?3"
        );
        self.query_notes(
            &sql,
            params![start.map(fmt_ts), end.map(fmt_ts), limit_value(limit)],
        )
    }

    /// Stored content hash per note id.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn content_hashes(&self) -> Result<BTreeMap<String, Option<String>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, content_hash FROM notes")
            .map_err(ix)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(ix)?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()
            .map_err(ix)?;
        Ok(rows)
    }

    // === Tags ===

    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn tags_for(&self, id: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.name FROM tags t JOIN note_tags nt ON nt.tag_id = t.id
                 WHERE nt.note_id = ?1",
            )
            .map_err(ix)?;
        let tags = stmt
            .query_map(params![id], |row| row.get(0))
            .map_err(ix)?
            .collect::<rusqlite::Result<BTreeSet<String>>>()
            .map_err(ix)?;
        Ok(tags)
    }

    /// Ids of notes carrying a tag, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn notes_for_tag(&self, tag: &str) -> Result<Vec<String>> {
        let Some(tag) = zk_core::normalize_tag(tag) else {
            return Ok(Vec::new());
        };
        let mut stmt = self
            .conn
            .prepare(
                "SELECT nt.note_id FROM note_tags nt JOIN tags t ON t.id = nt.tag_id
                 WHERE t.name = ?1 ORDER BY nt.note_id",
            )
            .map_err(ix)?;
        let ids = stmt
            .query_map(params![tag], |row| row.get(0))
            .map_err(ix)?
            .collect::<rusqlite::Result<Vec<String>>>()
            .map_err(ix)?;
        Ok(ids)
    }

    /// Every tag with its usage count, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn tag_counts(&self) -> Result<Vec<TagCount>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT t.name, COUNT(nt.note_id) FROM tags t
                 LEFT JOIN note_tags nt ON nt.tag_id = t.id
                 GROUP BY t.id ORDER BY t.name",
            )
            .map_err(ix)?;
        let tags = stmt
            .query_map([], |row| {
                let count: i64 = row.get(1)?;
                Ok(TagCount {
                    name: row.get(0)?,
                    count: count as u64,
                })
            })
            .map_err(ix)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ix)?;
        Ok(tags)
    }

    // === Links ===

    /// Insert one directed edge. Returns `false` if the triple already existed.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if either endpoint is not indexed.
    pub fn insert_link(
        &self,
        source_id: &str,
        target_id: &str,
        link_type: LinkType,
        description: Option<&str>,
    ) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO links (source_id, target_id, link_type, description)
                 VALUES (?1, ?2, ?3, ?4)",
                params![source_id, target_id, link_type.as_str(), description],
            )
            .map_err(ix)?;
        Ok(inserted > 0)
    }

    /// Delete one directed edge. Returns `false` if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the statement fails.
    pub fn delete_link(&self, source_id: &str, target_id: &str, link_type: LinkType) -> Result<bool> {
        let removed = self
            .conn
            .execute(
                "DELETE FROM links WHERE source_id = ?1 AND target_id = ?2 AND link_type = ?3",
                params![source_id, target_id, link_type.as_str()],
            )
            .map_err(ix)?;
        Ok(removed > 0)
    }

    /// Delete every edge that starts or ends at `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the statement fails.
    pub fn delete_links_touching(&self, id: &str) -> Result<usize> {
        self.conn
            .execute(
                "DELETE FROM links WHERE source_id = ?1 OR target_id = ?1",
                params![id],
            )
            .map_err(ix)
    }

    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn link_exists(&self, source_id: &str, target_id: &str, link_type: LinkType) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM links WHERE source_id = ?1 AND target_id = ?2 AND link_type = ?3",
                params![source_id, target_id, link_type.as_str()],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .map_err(ix)
    }

    /// Edges leaving `id`, ordered by target then type.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn links_from(&self, id: &str) -> Result<Vec<LinkRow>> {
        self.query_links(
            "SELECT source_id, target_id, link_type, description FROM links
             WHERE source_id = ?1 ORDER BY target_id, link_type",
            params![id],
        )
    }

    /// Edges arriving at `id`, ordered by source then type.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn links_to(&self, id: &str) -> Result<Vec<LinkRow>> {
        self.query_links(
            "SELECT source_id, target_id, link_type, description FROM links
             WHERE target_id = ?1 ORDER BY source_id, link_type",
            params![id],
        )
    }

    /// Every edge, ordered by source, target, type.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn all_links(&self) -> Result<Vec<LinkRow>> {
        self.query_links(
            "SELECT source_id, target_id, link_type, description FROM links
             ORDER BY source_id, target_id, link_type",
            [],
        )
    }

    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn link_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM links", [], |row| row.get(0))
            .map_err(ix)?;
        Ok(count as u64)
    }

    /// Distinct notes linked to `id` in either direction.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn neighbors(&self, id: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT target_id FROM links WHERE source_id = ?1
                 UNION
                 SELECT source_id FROM links WHERE target_id = ?1",
            )
            .map_err(ix)?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))
            .map_err(ix)?
            .collect::<rusqlite::Result<BTreeSet<String>>>()
            .map_err(ix)?;
        Ok(ids)
    }

    /// Total degree (outgoing + incoming edges) of every note, ordered by id.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Index`] if the query fails.
    pub fn degrees(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT n.id,
                    (SELECT COUNT(*) FROM links WHERE source_id = n.id)
                  + (SELECT COUNT(*) FROM links WHERE target_id = n.id)
                 FROM notes n ORDER BY n.id",
            )
            .map_err(ix)?;
        let rows = stmt
            .query_map([], |row| {
                let degree: i64 = row.get(1)?;
                Ok((row.get(0)?, degree as u64))
            })
            .map_err(ix)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ix)?;
        Ok(rows)
    }

    // === Helpers ===

    fn query_notes<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Note>> {
        let mut stmt = self.conn.prepare(sql).map_err(ix)?;
        let rows = stmt
            .query_map(params, note_row)
            .map_err(ix)?
            .collect::<rusqlite::Result<Vec<Note>>>()
            .map_err(ix)?;
        rows.into_iter().map(|note| self.hydrate(note)).collect()
    }

    fn hydrate(&self, mut note: Note) -> Result<Note> {
        note.tags = self.tags_for(&note.id)?;
        note.links = self
            .links_from(&note.id)?
            .into_iter()
            .map(LinkRow::into_note_link)
            .collect();
        Ok(note)
    }

    fn query_links<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<LinkRow>> {
        let mut stmt = self.conn.prepare(sql).map_err(ix)?;
        let rows = stmt
            .query_map(params, |row| {
                Ok(LinkRow {
                    source_id: row.get(0)?,
                    target_id: row.get(1)?,
                    link_type: parse_col(row, 2)?,
                    description: row.get(3)?,
                })
            })
            .map_err(ix)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(ix)?;
        Ok(rows)
    }
}

fn note_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        title: row.get(1)?,
        content: row.get(2)?,
        note_type: parse_col(row, 3)?,
        created_at: ts_col(row, 4)?,
        updated_at: ts_col(row, 5)?,
        tags: BTreeSet::new(),
        links: Vec::new(),
    })
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Fixed-width RFC 3339 so text order equals time order.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn limit_value(limit: Option<usize>) -> i64 {
    limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX))
}

fn ix(e: rusqlite::Error) -> ZkError {
    ZkError::Index(e.to_string())
}
