//! Layered configuration: defaults, then `zk.toml`, then environment, then
//! explicit overrides from the command line.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use zk_core::error::{Result, ZkError};
use zk_index::IndexTarget;

pub const CONFIG_FILE_NAME: &str = "zk.toml";
pub const DEFAULT_NOTES_DIR: &str = "data/notes";
pub const DEFAULT_DATABASE: &str = "data/db/zettelkasten.db";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Resolved settings. Paths are absolute or relative to `base_dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Config {
    pub base_dir: PathBuf,
    pub notes_dir: PathBuf,
    /// Index connection string, see [`IndexTarget::parse`].
    pub database: String,
    pub log_level: String,
    /// Compare content hashes, not just counts, when checking staleness.
    pub deep_check: bool,
}

/// Values supplied by the caller, highest precedence.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_file: Option<PathBuf>,
    pub base_dir: Option<PathBuf>,
    pub notes_dir: Option<PathBuf>,
    pub database: Option<String>,
    pub log_level: Option<String>,
    pub deep_check: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    base_dir: Option<PathBuf>,
    notes_dir: Option<PathBuf>,
    database: Option<String>,
    log_level: Option<String>,
    deep_check: Option<bool>,
}

impl Config {
    /// Defaults rooted at `base_dir`.
    #[must_use]
    pub fn for_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            notes_dir: PathBuf::from(DEFAULT_NOTES_DIR),
            database: DEFAULT_DATABASE.to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            deep_check: false,
        }
    }

    /// Load from the process environment and the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Config`] if a config file is unreadable or invalid.
    pub fn load(overrides: &Overrides) -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| ZkError::Config(format!("cannot read working directory: {e}")))?;
        Self::load_with(overrides, &cwd, |key| std::env::var(key).ok())
    }

    /// Load with an explicit working directory and environment lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Config`] if a config file is unreadable or invalid.
    pub fn load_with(
        overrides: &Overrides,
        cwd: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let early_base = overrides
            .base_dir
            .clone()
            .or_else(|| env("ZETTELKASTEN_BASE_DIR").map(PathBuf::from))
            .map_or_else(|| cwd.to_path_buf(), |b| absolutize(cwd, &b));

        let config_file = match overrides
            .config_file
            .clone()
            .or_else(|| env("ZETTELKASTEN_CONFIG").map(PathBuf::from))
        {
            Some(path) => Some(absolutize(cwd, &path)),
            None => Some(early_base.join(CONFIG_FILE_NAME)).filter(|p| p.is_file()),
        };
        let file = match &config_file {
            Some(path) => read_file_config(path)?,
            None => FileConfig::default(),
        };

        let base_dir = match (&overrides.base_dir, env("ZETTELKASTEN_BASE_DIR"), &file.base_dir) {
            (None, None, Some(from_file)) => absolutize(&early_base, from_file),
            _ => early_base,
        };

        let mut config = Self::for_base_dir(base_dir);
        if let Some(notes_dir) = file.notes_dir {
            config.notes_dir = notes_dir;
        }
        if let Some(database) = file.database {
            config.database = database;
        }
        if let Some(log_level) = file.log_level {
            config.log_level = log_level;
        }
        if let Some(deep_check) = file.deep_check {
            config.deep_check = deep_check;
        }

        if let Some(notes_dir) = env("ZETTELKASTEN_NOTES_DIR") {
            config.notes_dir = PathBuf::from(notes_dir);
        }
        if let Some(database) = env("ZETTELKASTEN_DATABASE")
            .or_else(|| env("ZETTELKASTEN_DATABASE_URL"))
            .or_else(|| env("ZETTELKASTEN_DATABASE_PATH"))
        {
            config.database = database;
        }
        if let Some(log_level) = env("ZETTELKASTEN_LOG_LEVEL") {
            config.log_level = log_level;
        }

        if let Some(notes_dir) = &overrides.notes_dir {
            config.notes_dir = absolutize(cwd, notes_dir);
        }
        if let Some(database) = &overrides.database {
            config.database = database.clone();
        }
        if let Some(log_level) = &overrides.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(deep_check) = overrides.deep_check {
            config.deep_check = deep_check;
        }

        config.log_level = config.log_level.trim().to_ascii_lowercase();
        Ok(config)
    }

    /// The notes directory as an absolute path.
    #[must_use]
    pub fn notes_path(&self) -> PathBuf {
        absolutize(&self.base_dir, &self.notes_dir)
    }

    /// Parse the database setting.
    ///
    /// # Errors
    ///
    /// Returns [`ZkError::Config`] for unsupported connection strings.
    pub fn index_target(&self) -> Result<IndexTarget> {
        IndexTarget::parse(&self.database, &self.base_dir)
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let content = fs::read_to_string(path)
        .map_err(|e| ZkError::Config(format!("failed to read config file {}: {e}", path.display())))?;
    toml::from_str(&content)
        .map_err(|e| ZkError::Config(format!("failed to parse TOML config {}: {e}", path.display())))
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_rooted_at_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(&Overrides::default(), dir.path(), env_of(&[])).unwrap();

        assert_eq!(config.base_dir, dir.path());
        assert_eq!(config.notes_path(), dir.path().join("data/notes"));
        assert_eq!(
            config.index_target().unwrap(),
            IndexTarget::File(dir.path().join("data/db/zettelkasten.db"))
        );
        assert_eq!(config.log_level, "info");
        assert!(!config.deep_check);
    }

    #[test]
    fn file_then_env_then_overrides() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "notes_dir = \"vault\"\ndatabase = \"index.db\"\nlog_level = \"WARN\"\ndeep_check = true\n",
        )
        .unwrap();

        let from_file =
            Config::load_with(&Overrides::default(), dir.path(), env_of(&[])).unwrap();
        assert_eq!(from_file.notes_path(), dir.path().join("vault"));
        assert_eq!(from_file.database, "index.db");
        assert_eq!(from_file.log_level, "warn");
        assert!(from_file.deep_check);

        let env = env_of(&[
            ("ZETTELKASTEN_NOTES_DIR", "env-notes"),
            ("ZETTELKASTEN_DATABASE_URL", "sqlite:///tmp/zk.db"),
        ]);
        let from_env = Config::load_with(&Overrides::default(), dir.path(), env).unwrap();
        assert_eq!(from_env.notes_path(), dir.path().join("env-notes"));
        assert_eq!(
            from_env.index_target().unwrap(),
            IndexTarget::File(PathBuf::from("/tmp/zk.db"))
        );

        let overrides = Overrides {
            database: Some(":memory:".into()),
            deep_check: Some(false),
            ..Overrides::default()
        };
        let from_flags = Config::load_with(
            &overrides,
            dir.path(),
            env_of(&[("ZETTELKASTEN_DATABASE", "other.db")]),
        )
        .unwrap();
        assert_eq!(from_flags.index_target().unwrap(), IndexTarget::Memory);
        assert!(!from_flags.deep_check);
    }

    #[test]
    fn base_dir_from_env() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("kb");
        let env = env_of(&[("ZETTELKASTEN_BASE_DIR", base.to_str().unwrap())]);
        let config = Config::load_with(&Overrides::default(), Path::new("/"), env).unwrap();
        assert_eq!(config.notes_path(), base.join("data/notes"));
    }

    #[test]
    fn explicit_config_file_must_exist_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            config_file: Some(dir.path().join("missing.toml")),
            ..Overrides::default()
        };
        let err = Config::load_with(&overrides, dir.path(), env_of(&[])).unwrap_err();
        assert!(matches!(err, ZkError::Config(_)));

        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "unknown_key = 1\n").unwrap();
        let overrides = Overrides {
            config_file: Some(bad),
            ..Overrides::default()
        };
        let err = Config::load_with(&overrides, dir.path(), env_of(&[])).unwrap_err();
        assert!(matches!(err, ZkError::Config(msg) if msg.contains("bad.toml")));
    }

    #[test]
    fn rejects_unsupported_database() {
        let mut config = Config::for_base_dir("/srv/zk");
        config.database = "mongodb://localhost/zk".into();
        assert!(matches!(config.index_target(), Err(ZkError::Config(_))));
    }
}
