//! Migrator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{MigrationError, MigrationResult, Version};

/// Options recognised by the migrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigratorConfig {
    /// History table name
    pub table_name: String,

    /// Schema holding the history table. On SQLite this is a database name
    /// visible to every pooled connection, so only `main` or `temp`.
    pub schema_name: Option<String>,

    /// Maximum wait for the advisory lock
    #[serde(with = "humantime_serde")]
    pub lock_timeout: Duration,

    /// Base delay between lock acquisition attempts
    #[serde(with = "humantime_serde")]
    pub lock_poll_interval: Duration,

    /// Serialize concurrent runs through the lock table
    pub use_advisory_lock: bool,

    /// Default target when a run does not name one
    pub target_version: Option<Version>,

    /// Reject runs when an applied SQL script changed since it ran
    pub validate_checksums: bool,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self {
            table_name: "ladder_history".to_string(),
            schema_name: None,
            lock_timeout: Duration::from_secs(30),
            lock_poll_interval: Duration::from_millis(100),
            use_advisory_lock: true,
            target_version: None,
            validate_checksums: true,
        }
    }
}

impl MigratorConfig {
    /// Set custom history table name
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_schema_name(mut self, schema_name: impl Into<String>) -> Self {
        self.schema_name = Some(schema_name.into());
        self
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn with_target_version(mut self, target: Version) -> Self {
        self.target_version = Some(target);
        self
    }

    pub fn without_advisory_lock(mut self) -> Self {
        self.use_advisory_lock = false;
        self
    }

    pub fn with_checksum_validation(mut self, enabled: bool) -> Self {
        self.validate_checksums = enabled;
        self
    }

    /// Validate the configuration. Identifier syntax is checked separately by the provider.
    pub fn validate(&self) -> MigrationResult<()> {
        if self.table_name.is_empty() {
            return Err(MigrationError::ConfigError(
                "table_name cannot be empty".to_string(),
            ));
        }

        if self.use_advisory_lock && self.lock_poll_interval.is_zero() {
            return Err(MigrationError::ConfigError(
                "lock_poll_interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
