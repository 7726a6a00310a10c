//! Configuration loading and environment variable handling

use humantime_serde::re::humantime;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::domains::database::DatabaseConfig;
use crate::domains::logging::{LogFormat, LogLevel, LoggingConfig};
use crate::domains::migrations::MigrationsConfig;
use crate::domains::LadderConfig;
use crate::error::{ConfigError, ConfigResult};

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "LADDER".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<LadderConfig> {
        let path = path.as_ref();
        tracing::debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path)?;
        let mut config: LadderConfig = serde_yaml::from_str(&content)?;

        // Apply environment variable overrides
        self.apply_env_overrides(&mut config)?;

        // Validate all domains
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<LadderConfig> {
        let mut config = LadderConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<LadderConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut LadderConfig) -> ConfigResult<()> {
        self.apply_database_overrides(&mut config.database)?;
        self.apply_migrations_overrides(&mut config.migrations)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply database config overrides
    fn apply_database_overrides(&self, config: &mut DatabaseConfig) -> ConfigResult<()> {
        if let Ok(url) = self.get_env_var("DATABASE_URL") {
            config.url = url;
        }

        if let Ok(max_connections) = self.get_env_var("DATABASE_MAX_CONNECTIONS") {
            config.max_connections = max_connections.parse().map_err(|e| {
                ConfigError::EnvError(format!("Invalid DATABASE_MAX_CONNECTIONS: {}", e))
            })?;
        }

        Ok(())
    }

    /// Apply migrations config overrides
    fn apply_migrations_overrides(&self, config: &mut MigrationsConfig) -> ConfigResult<()> {
        if let Ok(dir) = self.get_env_var("MIGRATIONS_DIR") {
            config.directory = dir;
        }

        if let Ok(table) = self.get_env_var("MIGRATIONS_TABLE") {
            config.migrator.table_name = table;
        }

        if let Ok(schema) = self.get_env_var("MIGRATIONS_SCHEMA") {
            config.migrator.schema_name = Some(schema);
        }

        if let Ok(target) = self.get_env_var("TARGET_VERSION") {
            let version = target
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid TARGET_VERSION: {}", e)))?;
            config.migrator.target_version = Some(version);
        }

        if let Ok(timeout) = self.get_env_var("LOCK_TIMEOUT") {
            config.migrator.lock_timeout = parse_duration(&timeout)
                .map_err(|e| ConfigError::EnvError(format!("Invalid LOCK_TIMEOUT: {}", e)))?;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(&self, config: &mut LoggingConfig) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Plain integers are seconds; anything else goes through humantime ("500ms", "2m")
fn parse_duration(value: &str) -> Result<Duration, String> {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value.trim()).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert!(parse_duration("soon").is_err());
    }
}
