//! Database configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_database_url, validate_enum_choice, validate_positive, Validatable};

/// URL schemes with a built-in provider
pub const SUPPORTED_SCHEMES: &[&str] = &["sqlite"];

/// A run holds one connection for history and locking plus one per
/// transactional unit, and failures are recorded on a fresh one.
const MIN_CONNECTIONS_PER_RUN: u32 = 2;

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database URL (e.g., "sqlite://data/app.db")
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of database connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection acquisition timeout, e.g. `30s`
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,

    /// SQLite busy timeout in milliseconds
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u32,

    /// SQLite journal mode
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connection_timeout: default_connection_timeout(),
            busy_timeout_ms: default_busy_timeout(),
            journal_mode: default_journal_mode(),
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(u64::from(self.busy_timeout_ms))
    }
}

impl Validatable for DatabaseConfig {
    fn validate(&self) -> ConfigResult<()> {
        let scheme = validate_database_url(&self.url, "url", self.domain_name())?;
        validate_enum_choice(&scheme, SUPPORTED_SCHEMES, "url scheme", self.domain_name())?;

        if self.max_connections < MIN_CONNECTIONS_PER_RUN {
            return Err(self.validation_error(format!(
                "max_connections must be at least {}, got {}",
                MIN_CONNECTIONS_PER_RUN, self.max_connections
            )));
        }

        validate_positive(self.connection_timeout.as_millis(), "connection_timeout", self.domain_name())?;
        validate_positive(self.busy_timeout_ms, "busy_timeout_ms", self.domain_name())?;

        let valid_journal_modes = ["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];
        validate_enum_choice(&self.journal_mode, &valid_journal_modes, "journal_mode", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "database"
    }
}

// Default value functions
fn default_database_url() -> String {
    "sqlite://ladder.db".to_string()
}

fn default_max_connections() -> u32 {
    4
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_busy_timeout() -> u32 {
    5000 // 5 seconds
}

fn default_journal_mode() -> String {
    "WAL".to_string()
}
