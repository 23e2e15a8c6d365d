//! Error types for the knowledge base.

use thiserror::Error;

/// Top-level result type for zk operations.
pub type Result<T> = std::result::Result<T, ZkError>;

/// Top-level error type for zk.
#[derive(Debug, Error)]
pub enum ZkError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("vault error: {0}")]
    Vault(String),

    #[error("index error: {0}")]
    Index(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of [`ZkError`] used by callers that only need to
/// decide how to report a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Decode,
    Storage,
    Config,
}

impl ZkError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Vault(_) | Self::Index(_) | Self::Io(_) => ErrorKind::Storage,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Shorthand for a missing note.
    #[must_use]
    pub fn note_not_found(id: &str) -> Self {
        Self::NotFound(format!("note '{id}'"))
    }
}

/// Errors raised when caller input is rejected before touching storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("note title must not be empty")]
    EmptyTitle,

    #[error("unknown note type '{0}': expected one of fleeting, literature, permanent, structure, hub")]
    UnknownNoteType(String),

    #[error("unknown link type '{0}'")]
    UnknownLinkType(String),

    #[error("unknown link direction '{0}': expected outgoing, incoming or both")]
    UnknownDirection(String),

    #[error("invalid note id '{0}'")]
    InvalidId(String),

    #[error("a note cannot link to itself ({0})")]
    SelfLink(String),

    #[error("link {source_id} -[{link_type}]-> {target_id} already exists")]
    DuplicateLink {
        source_id: String,
        target_id: String,
        link_type: String,
    },

    #[error("invalid date range: start {start} is after end {end}")]
    InvalidDateRange { start: String, end: String },
}

/// Errors raised while decoding a note document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("document must start with a '---' header delimiter")]
    MissingHeader,

    #[error("no closing '---' header delimiter found")]
    UnterminatedHeader,

    #[error("malformed header: {0}")]
    Malformed(String),

    #[error("invalid note type '{0}'")]
    InvalidType(String),

    #[error("missing required field '{0}'")]
    MissingField(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_display_human_readable_messages() {
        let err = ValidationError::DuplicateLink {
            source_id: "a".to_string(),
            target_id: "b".to_string(),
            link_type: "extends".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("extends"));
        assert!(msg.contains("already exists"));

        let err = ZkError::from(DecodeError::InvalidType("memo".to_string()));
        assert!(err.to_string().contains("memo"));
    }

    #[test]
    fn kind_groups_storage_failures() {
        assert_eq!(ZkError::Index("locked".into()).kind(), ErrorKind::Storage);
        assert_eq!(ZkError::Vault("gone".into()).kind(), ErrorKind::Storage);
        assert_eq!(
            ZkError::Io(std::io::Error::other("disk")).kind(),
            ErrorKind::Storage
        );
        assert_eq!(ZkError::note_not_found("x").kind(), ErrorKind::NotFound);
        assert_eq!(
            ZkError::from(ValidationError::EmptyTitle).kind(),
            ErrorKind::Validation
        );
    }
}
