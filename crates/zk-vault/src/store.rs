//! Note store: one markdown document per note in a flat notes directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use zk_core::codec::{self, DecodeDefaults};
use zk_core::error::{Result, ValidationError, ZkError};
use zk_core::note::Note;

const NOTE_EXTENSION: &str = "md";

/// A note read from disk along with where it came from and any decode warnings.
#[derive(Debug, Clone)]
pub struct StoredNote {
    pub path: PathBuf,
    pub note: Note,
    pub warnings: Vec<String>,
    /// SHA-256 of the document bytes, as returned by [`NoteStore::content_hash`].
    pub content_hash: String,
}

/// A document that could not be decoded during a listing.
#[derive(Debug)]
pub struct SkippedDocument {
    pub path: PathBuf,
    /// Modification time read before decoding.
    pub modified: Option<SystemTime>,
    pub error: ZkError,
}

/// A note document on disk, without its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentStamp {
    pub id: String,
    pub path: PathBuf,
    pub modified: Option<SystemTime>,
}

/// The authoritative store of note documents.
#[derive(Debug, Clone)]
pub struct NoteStore {
    root: PathBuf,
}

impl NoteStore {
    /// Open the notes directory, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Vault`] if the directory cannot be created or is not
    /// a directory.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).map_err(|e| {
            ZkError::Vault(format!("cannot create notes directory {}: {e}", root.display()))
        })?;
        if !root.is_dir() {
            return Err(ZkError::Vault(format!(
                "notes path {} is not a directory",
                root.display()
            )));
        }
        debug!(root = %root.display(), "opened note store");
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The document path for a note id.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidId`] for ids that are empty, hidden,
    /// or would escape the notes directory.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(format!("{id}.{NOTE_EXTENSION}")))
    }

    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.path_for(id).is_ok_and(|p| p.is_file())
    }

    /// Write a note atomically: the document is written to a temp file in the
    /// notes directory, flushed, then renamed over the target. Returns the
    /// content hash of the written document.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Vault`] if the temp file cannot be written or renamed.
    pub fn save(&self, note: &Note) -> Result<String> {
        let path = self.path_for(&note.id)?;
        let document = codec::encode(note);

        let write_err =
            |e: io::Error| ZkError::Vault(format!("failed to write {}: {e}", path.display()));
        let mut tmp = NamedTempFile::new_in(&self.root).map_err(write_err)?;
        tmp.write_all(document.as_bytes()).map_err(write_err)?;
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(id = %note.id, "saved note document");
        Ok(hash_bytes(document.as_bytes()))
    }

    /// Load a note by id. Decode warnings are logged.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] if no document exists for `id`, or
    /// [`ZkError::Decode`] if the document is malformed.
    pub fn load(&self, id: &str) -> Result<Note> {
        let stored = self.load_stored(id)?;
        for warning in &stored.warnings {
            warn!(id, path = %stored.path.display(), "{warning}");
        }
        Ok(stored.note)
    }

    /// Load a note by id, returning decode warnings to the caller.
    ///
    /// # Errors
    ///
    /// Same as [`NoteStore::load`].
    pub fn load_stored(&self, id: &str) -> Result<StoredNote> {
        let path = self.path_for(id)?;
        read_document(&path).map_err(|e| match e {
            ZkError::Io(err) if err.kind() == io::ErrorKind::NotFound => ZkError::note_not_found(id),
            other => other,
        })
    }

    /// Delete a note document.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] if no document exists for `id`.
    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(id, "deleted note document");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(ZkError::note_not_found(id)),
            Err(e) => Err(ZkError::Vault(format!(
                "failed to delete {}: {e}",
                path.display()
            ))),
        }
    }

    /// Ids of all note documents, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Vault`] if the directory cannot be read.
    pub fn list_ids(&self) -> Result<Vec<String>> {
        Ok(self
            .document_paths()?
            .iter()
            .filter_map(|p| file_id(p))
            .collect())
    }

    /// Lazily decode every note document, in id order.
    ///
    /// Each call takes a fresh snapshot of the directory, so the listing can
    /// be restarted by calling this again.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Vault`] if the directory cannot be read.
    pub fn list_all(&self) -> Result<NoteIter> {
        Ok(NoteIter {
            paths: self.document_paths()?.into_iter(),
        })
    }

    /// Number of note documents.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Vault`] if the directory cannot be read.
    pub fn count(&self) -> Result<u64> {
        Ok(self.document_paths()?.len() as u64)
    }

    /// Every note document with its modification time, in id order.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Vault`] if the directory cannot be read.
    pub fn documents(&self) -> Result<Vec<DocumentStamp>> {
        Ok(self
            .document_paths()?
            .into_iter()
            .filter_map(|path| {
                let id = file_id(&path)?;
                let modified = modified_time(&path);
                Some(DocumentStamp { id, path, modified })
            })
            .collect())
    }

    /// SHA-256 of a note document's bytes, hex encoded.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::NotFound`] if no document exists for `id`.
    pub fn content_hash(&self, id: &str) -> Result<String> {
        let path = self.path_for(id)?;
        let bytes = fs::read(&path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ZkError::note_not_found(id),
            _ => ZkError::Vault(format!("failed to read {}: {e}", path.display())),
        })?;
        Ok(hash_bytes(&bytes))
    }

    fn document_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.root).map_err(|e| {
            ZkError::Vault(format!("cannot read notes directory {}: {e}", self.root.display()))
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| is_note_document(path))
            .collect();
        paths.sort();
        Ok(paths)
    }
}

/// Iterator over decoded note documents. See [`NoteStore::list_all`].
#[derive(Debug)]
pub struct NoteIter {
    paths: std::vec::IntoIter<PathBuf>,
}

impl Iterator for NoteIter {
    type Item = std::result::Result<StoredNote, SkippedDocument>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.next()?;
        let modified = modified_time(&path);
        Some(read_document(&path).map_err(|error| SkippedDocument {
            path,
            modified,
            error,
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.paths.size_hint()
    }
}

/// Hex SHA-256 of a byte slice.
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn read_document(path: &Path) -> Result<StoredNote> {
    let content = fs::read_to_string(path)?;
    let stem = file_id(path);
    let timestamp = modified_time(path).map(DateTime::<Utc>::from).unwrap_or_default();

    let defaults = DecodeDefaults {
        id: stem.clone(),
        timestamp,
    };
    let mut decoded = codec::decode_with(&content, &defaults)?;

    // The path is derived from the id, so the file name wins over a
    // hand-edited header id.
    if let Some(stem) = stem {
        if decoded.note.id != stem {
            decoded.warnings.push(format!(
                "header id '{}' does not match file name; using '{stem}'",
                decoded.note.id
            ));
            decoded.note.id = stem;
        }
    }

    Ok(StoredNote {
        path: path.to_path_buf(),
        note: decoded.note,
        warnings: decoded.warnings,
        content_hash: hash_bytes(content.as_bytes()),
    })
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn file_id(path: &Path) -> Option<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
}

fn is_note_document(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_none_or(|n| n.starts_with('.'));
    !hidden && path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(NOTE_EXTENSION)
}

fn validate_id(id: &str) -> std::result::Result<(), ValidationError> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
        || id.trim() != id;
    if bad {
        return Err(ValidationError::InvalidId(id.to_string()));
    }
    Ok(())
}
