//! Note type — the atomic knowledge unit.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::link::{LinkType, NoteLink};

/// Kind of note in the Zettelkasten method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Fleeting,
    Literature,
    #[default]
    Permanent,
    Structure,
    Hub,
}

impl NoteType {
    pub const ALL: [NoteType; 5] = [
        Self::Fleeting,
        Self::Literature,
        Self::Permanent,
        Self::Structure,
        Self::Hub,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fleeting => "fleeting",
            Self::Literature => "literature",
            Self::Permanent => "permanent",
            Self::Structure => "structure",
            Self::Hub => "hub",
        }
    }
}

impl fmt::Display for NoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NoteType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownNoteType(s.to_string()))
    }
}

/// An atomic note. Every note is stored as one markdown document whose
/// header carries the metadata and whose links section carries `links`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    pub note_type: NoteType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub links: Vec<NoteLink>,
}

impl Note {
    /// Build a new note, validating the title and normalizing tags.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTitle`] for a blank title.
    pub fn new<I, S>(
        id: String,
        title: &str,
        content: &str,
        note_type: NoteType,
        tags: I,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            id,
            title: validate_title(title)?,
            content: content.trim().to_string(),
            note_type,
            created_at: now,
            updated_at: now,
            tags: normalize_tags(tags),
            links: Vec::new(),
        })
    }

    /// Replace the title, keeping the non-empty invariant.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyTitle`] for a blank title.
    pub fn set_title(&mut self, title: &str) -> Result<(), ValidationError> {
        self.title = validate_title(title)?;
        Ok(())
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now;
    }

    #[must_use]
    pub fn has_link(&self, target: &str, link_type: LinkType) -> bool {
        self.links
            .iter()
            .any(|l| l.target == target && l.link_type == link_type)
    }

    /// Add a link unless the same (target, type) pair is already declared.
    /// Returns `true` when the link was added.
    pub fn add_link(&mut self, link: NoteLink) -> bool {
        if self.has_link(&link.target, link.link_type) {
            return false;
        }
        self.links.push(link);
        true
    }

    /// Remove links to `target`, optionally restricted to one type.
    /// Returns the removed links.
    pub fn remove_links_to(&mut self, target: &str, link_type: Option<LinkType>) -> Vec<NoteLink> {
        let (removed, kept): (Vec<NoteLink>, Vec<NoteLink>) =
            self.links.drain(..).partition(|l| {
                l.target == target && link_type.is_none_or(|t| t == l.link_type)
            });
        self.links = kept;
        removed
    }
}

fn validate_title(title: &str) -> Result<String, ValidationError> {
    normalize_title(title).ok_or(ValidationError::EmptyTitle)
}

/// Collapse whitespace runs, line breaks included, to single spaces.
/// A title is one line in the document heading. `None` for a blank title.
#[must_use]
pub fn normalize_title(title: &str) -> Option<String> {
    let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
    (!title.is_empty()).then_some(title)
}

/// Normalize a tag: trimmed and lower-cased. Returns `None` for blank tags.
#[must_use]
pub fn normalize_tag(tag: &str) -> Option<String> {
    let tag = tag.trim().trim_start_matches('#').trim();
    if tag.is_empty() {
        None
    } else {
        Some(tag.to_lowercase())
    }
}

/// Normalize a collection of tags into a sorted, de-duplicated set.
pub fn normalize_tags<I, S>(tags: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tags.into_iter()
        .filter_map(|t| normalize_tag(t.as_ref()))
        .collect()
}
