//! Index connection strings.

use std::path::{Path, PathBuf};

use zk_core::error::ZkError;

/// Where the index database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexTarget {
    Memory,
    File(PathBuf),
}

impl IndexTarget {
    /// Parse a connection string.
    ///
    /// Accepted forms: a plain path, `sqlite:<path>`, `sqlite://<path>`,
    /// `sqlite:///<abs path>`, `:memory:` and `sqlite::memory:`. Relative paths are resolved against
    /// `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Config`] for empty strings and non-SQLite schemes.
    pub fn parse(value: &str, base_dir: &Path) -> Result<Self, ZkError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ZkError::Config("database setting is empty".to_string()));
        }
        if matches!(value, ":memory:" | "sqlite::memory:" | "sqlite://:memory:") {
            return Ok(Self::Memory);
        }

        let raw_path = if let Some(rest) = value.strip_prefix("sqlite://") {
            rest
        } else if let Some(rest) = value.strip_prefix("sqlite:") {
            rest
        } else if let Some((scheme, _)) = value.split_once("://") {
            return Err(ZkError::Config(format!(
                "unsupported database scheme '{scheme}': only SQLite is available"
            )));
        } else {
            value
        };
        if raw_path.is_empty() {
            return Err(ZkError::Config(format!("no database path in '{value}'")));
        }

        let path = Path::new(raw_path);
        Ok(Self::File(if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }))
    }

    /// Human-readable location for logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Memory => ":memory:".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_paths_and_urls() {
        let base = Path::new("/srv/zk");
        assert_eq!(
            IndexTarget::parse("data/db/zk.db", base).unwrap(),
            IndexTarget::File(PathBuf::from("/srv/zk/data/db/zk.db"))
        );
        assert_eq!(
            IndexTarget::parse("sqlite:///var/lib/zk.db", base).unwrap(),
            IndexTarget::File(PathBuf::from("/var/lib/zk.db"))
        );
        assert_eq!(
            IndexTarget::parse("sqlite://rel.db", base).unwrap(),
            IndexTarget::File(PathBuf::from("/srv/zk/rel.db"))
        );
        assert_eq!(
            IndexTarget::parse("sqlite::memory:", base).unwrap(),
            IndexTarget::Memory
        );
    }

    #[test]
    fn bare_sqlite_prefix_is_stripped() {
        let base = Path::new("/srv/zk");
        assert_eq!(
            IndexTarget::parse("sqlite:foo.db", base).unwrap(),
            IndexTarget::File(PathBuf::from("/srv/zk/foo.db"))
        );
        assert_eq!(
            IndexTarget::parse("sqlite:/var/lib/zk.db", base).unwrap(),
            IndexTarget::File(PathBuf::from("/var/lib/zk.db"))
        );
        assert!(IndexTarget::parse("sqlite:", base).is_err());
    }

    #[test]
    fn rejects_other_engines() {
        let err = IndexTarget::parse("postgresql://user@host/db", Path::new("/")).unwrap_err();
        assert!(matches!(err, ZkError::Config(msg) if msg.contains("postgresql")));
        assert!(IndexTarget::parse("  ", Path::new("/")).is_err());
    }
}
