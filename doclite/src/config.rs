use crate::error::{DocliteError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// SQLite journal mode applied when a file database is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
    Truncate,
    Persist,
    Memory,
    Off,
}

impl JournalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::Wal => "WAL",
            JournalMode::Delete => "DELETE",
            JournalMode::Truncate => "TRUNCATE",
            JournalMode::Persist => "PERSIST",
            JournalMode::Memory => "MEMORY",
            JournalMode::Off => "OFF",
        }
    }
}

/// How document ids are generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Lexicographically time-ordered, monotonic within the process.
    #[default]
    Ulid,
    Uuid,
    Nanoid,
}

/// Store configuration, loadable from YAML:
///
/// ```yaml
/// path: data/app.db
/// journal_mode: wal
/// busy_timeout_ms: 5000
/// id_strategy: ulid
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens a private in-memory database.
    pub path: Option<PathBuf>,
    pub journal_mode: JournalMode,
    pub busy_timeout_ms: u64,
    pub id_strategy: IdStrategy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: None,
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            id_strategy: IdStrategy::Ulid,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        StoreConfig::default()
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        StoreConfig {
            path: Some(path.into()),
            ..StoreConfig::default()
        }
    }

    pub fn id_strategy(mut self, strategy: IdStrategy) -> Self {
        self.id_strategy = strategy;
        self
    }

    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }

    pub fn busy_timeout_ms(mut self, ms: u64) -> Self {
        self.busy_timeout_ms = ms;
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.path.is_none()
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        serde_yaml::from_str(content)
            .map_err(|e| DocliteError::Connection(format!("Invalid store config: {e}")))
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DocliteError::Connection(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert!(config.is_in_memory());
        assert_eq!(config.journal_mode, JournalMode::Wal);
        assert_eq!(config.busy_timeout_ms, 5000);
        assert_eq!(config.id_strategy, IdStrategy::Ulid);
    }

    #[test]
    fn test_from_yaml() {
        let config = StoreConfig::from_yaml_str(
            "path: /tmp/app.db\njournal_mode: delete\nid_strategy: uuid\n",
        )
        .unwrap();
        assert_eq!(config.path, Some(PathBuf::from("/tmp/app.db")));
        assert_eq!(config.journal_mode, JournalMode::Delete);
        assert_eq!(config.id_strategy, IdStrategy::Uuid);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_from_yaml_rejects_unknown_strategy() {
        let err = StoreConfig::from_yaml_str("id_strategy: sequential\n").unwrap_err();
        assert!(matches!(err, DocliteError::Connection(_)));
    }
}
