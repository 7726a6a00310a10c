use serde::{Deserialize, Serialize};
use std::time::Duration;

/// SQLite provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database URL, e.g. `sqlite://ladder.db` or `sqlite::memory:`
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Connection acquire timeout
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// How long a statement waits on a locked database before failing
    #[serde(with = "humantime_serde")]
    pub busy_timeout: Duration,

    /// Journal mode for file databases (`WAL`, `DELETE`, `TRUNCATE`, `PERSIST`, `MEMORY`, `OFF`).
    /// In-memory databases keep SQLite's own mode.
    pub journal_mode: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://ladder.db".to_string(),
            // A run holds one connection, each transactional unit borrows a
            // second, and failure records take a third.
            max_connections: 4,
            connection_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            journal_mode: "WAL".to_string(),
        }
    }
}

impl SqliteConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set maximum number of pooled connections
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn with_journal_mode(mut self, journal_mode: impl Into<String>) -> Self {
        self.journal_mode = journal_mode.into();
        self
    }

    pub fn is_in_memory(&self) -> bool {
        self.url.contains(":memory:") || self.url.contains("mode=memory")
    }
}
