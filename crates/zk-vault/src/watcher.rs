//! File system watcher for reindexing notes edited outside the service.
//!
//! Uses the `notify` crate for cross-platform file system events
//! (FSEvents on macOS, inotify on Linux, ReadDirectoryChanges on Windows).

use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use zk_core::error::ZkError;

/// Events emitted by the note watcher, keyed by note id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteEvent {
    /// A note document was created or modified.
    Changed(String),
    /// A note document was deleted or renamed away.
    Removed(String),
}

impl NoteEvent {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Changed(id) | Self::Removed(id) => id,
        }
    }
}

/// Watches a notes directory for document changes and emits events.
pub struct NoteWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::Receiver<NoteEvent>,
}

impl NoteWatcher {
    /// Start watching a notes directory for changes.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Io`] if the watcher cannot be created.
    pub fn start(notes_dir: &Path) -> Result<Self, ZkError> {
        let (tx, rx) = mpsc::channel();

        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
            let Ok(event) = res else {
                return;
            };
            for path in &event.paths {
                if path.extension().and_then(|e| e.to_str()) != Some("md") {
                    continue;
                }
                // Hidden files are drafts or temp files from atomic saves.
                let Some(id) = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .filter(|s| !s.starts_with('.'))
                else {
                    continue;
                };

                let note_event = match event.kind {
                    EventKind::Create(_) | EventKind::Modify(_) if path.exists() => {
                        NoteEvent::Changed(id.to_string())
                    }
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                        NoteEvent::Removed(id.to_string())
                    }
                    _ => continue,
                };
                let _ = tx.send(note_event);
            }
        })
        .map_err(|e| ZkError::Io(std::io::Error::other(e)))?;

        watcher
            .watch(notes_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ZkError::Io(std::io::Error::other(e)))?;

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// Try to receive the next event with a timeout.
    ///
    /// Returns `None` if no event is available within the timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<NoteEvent> {
        self.receiver.recv_timeout(timeout).ok()
    }
}
