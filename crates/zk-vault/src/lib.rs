//! # zk-vault
//!
//! File system operations for the note vault.
//!
//! The vault is the authoritative source of truth. Every note lives as one
//! markdown document in the notes directory. The index layer is a derived
//! cache that can be rebuilt from these files at any time.

pub mod lock;
pub mod store;
pub mod watcher;

pub use lock::{LockTable, NoteGuard};
pub use store::{DocumentStamp, NoteIter, NoteStore, SkippedDocument, StoredNote};
pub use watcher::{NoteEvent, NoteWatcher};
