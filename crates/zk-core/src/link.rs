//! Link types — typed relationships between notes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Semantic relation carried by a link.
///
/// Every relation has an inverse: a link `A -[extends]-> B` is always paired
/// with `B -[extended_by]-> A`. `reference` and `related` are their own inverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    Reference,
    Extends,
    ExtendedBy,
    Refines,
    RefinedBy,
    Contradicts,
    ContradictedBy,
    Questions,
    QuestionedBy,
    Supports,
    SupportedBy,
    Related,
}

impl LinkType {
    pub const ALL: [LinkType; 12] = [
        Self::Reference,
        Self::Extends,
        Self::ExtendedBy,
        Self::Refines,
        Self::RefinedBy,
        Self::Contradicts,
        Self::ContradictedBy,
        Self::Questions,
        Self::QuestionedBy,
        Self::Supports,
        Self::SupportedBy,
        Self::Related,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reference => "reference",
            Self::Extends => "extends",
            Self::ExtendedBy => "extended_by",
            Self::Refines => "refines",
            Self::RefinedBy => "refined_by",
            Self::Contradicts => "contradicts",
            Self::ContradictedBy => "contradicted_by",
            Self::Questions => "questions",
            Self::QuestionedBy => "questioned_by",
            Self::Supports => "supports",
            Self::SupportedBy => "supported_by",
            Self::Related => "related",
        }
    }

    /// The relation as seen from the other end of the link.
    #[must_use]
    pub fn inverse(self) -> Self {
        match self {
            Self::Reference => Self::Reference,
            Self::Extends => Self::ExtendedBy,
            Self::ExtendedBy => Self::Extends,
            Self::Refines => Self::RefinedBy,
            Self::RefinedBy => Self::Refines,
            Self::Contradicts => Self::ContradictedBy,
            Self::ContradictedBy => Self::Contradicts,
            Self::Questions => Self::QuestionedBy,
            Self::QuestionedBy => Self::Questions,
            Self::Supports => Self::SupportedBy,
            Self::SupportedBy => Self::Supports,
            Self::Related => Self::Related,
        }
    }

    #[must_use]
    pub fn is_symmetric(self) -> bool {
        self.inverse() == self
    }
}

impl fmt::Display for LinkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ValidationError::UnknownLinkType(s.to_string()))
    }
}

/// An outbound link declared in a note document.
///
/// `target` is normally a note id; hand-edited documents may name the target
/// by its exact title instead, which is resolved at index time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteLink {
    pub link_type: LinkType,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl NoteLink {
    #[must_use]
    pub fn new(link_type: LinkType, target: impl Into<String>) -> Self {
        Self {
            link_type,
            target: target.into(),
            description: None,
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self
    }
}
