//! Integration tests for ladder-config

use ladder_config::*;
use ladder_storage::Version;
use std::io::Write;
use std::time::Duration;
use temp_env::{with_vars, with_vars_unset};

const ENV_VARS: &[&str] = &[
    "LADDER_DATABASE_URL",
    "LADDER_DATABASE_MAX_CONNECTIONS",
    "LADDER_MIGRATIONS_DIR",
    "LADDER_MIGRATIONS_TABLE",
    "LADDER_MIGRATIONS_SCHEMA",
    "LADDER_TARGET_VERSION",
    "LADDER_LOCK_TIMEOUT",
    "LADDER_LOG_LEVEL",
    "LADDER_LOG_FORMAT",
];

#[test]
fn test_default_config_validation() {
    let config = LadderConfig::default();
    assert!(config.validate_all().is_ok());
}

#[test]
fn test_config_loader_from_env() {
    let vars = vec![
        ("LADDER_DATABASE_URL", Some("sqlite://data/app.db")),
        ("LADDER_DATABASE_MAX_CONNECTIONS", Some("8")),
        ("LADDER_MIGRATIONS_DIR", Some("db/migrations")),
        ("LADDER_MIGRATIONS_TABLE", Some("schema_history")),
        ("LADDER_TARGET_VERSION", Some("2.1")),
        ("LADDER_LOCK_TIMEOUT", Some("90s")),
        ("LADDER_LOG_LEVEL", Some("debug")),
        ("LADDER_LOG_FORMAT", Some("json")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::new();
        let config = loader.from_env().unwrap();

        assert_eq!(config.database.url, "sqlite://data/app.db");
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.migrations.directory, "db/migrations");
        assert_eq!(config.migrations.migrator.table_name, "schema_history");
        assert_eq!(config.migrations.migrator.target_version, Some(Version::new(2, 1)));
        assert_eq!(config.migrations.migrator.lock_timeout, Duration::from_secs(90));
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.format, LogFormat::Json);
    });
}

#[test]
fn test_invalid_env_values_are_rejected() {
    with_vars(vec![("LADDER_TARGET_VERSION", Some("1.x"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::EnvError(_)));
    });

    with_vars(vec![("LADDER_MIGRATIONS_TABLE", Some("drop"))], || {
        let err = ConfigLoader::new().from_env().unwrap_err();
        assert!(matches!(err, ConfigError::DomainError { .. }));
    });
}

#[test]
fn test_load_from_file_with_env_override() {
    let yaml = r#"
database:
  url: "sqlite://var/ladder.db"
  max_connections: 6
  journal_mode: DELETE

migrations:
  directory: sql
  table_name: app_history
  lock_timeout: 5s
  lock_poll_interval: 50ms
  validate_checksums: false

logging:
  level: warn
  format: compact
"#;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();

    with_vars(vec![("LADDER_DATABASE_URL", Some("sqlite://override.db"))], || {
        let config = ConfigLoader::new().load(Some(file.path())).unwrap();

        assert_eq!(config.database.url, "sqlite://override.db");
        assert_eq!(config.database.max_connections, 6);
        assert_eq!(config.database.journal_mode, "DELETE");
        assert_eq!(config.migrations.directory, "sql");
        assert_eq!(config.migrations.migrator.table_name, "app_history");
        assert_eq!(config.migrations.migrator.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.migrations.migrator.lock_poll_interval, Duration::from_millis(50));
        assert!(!config.migrations.migrator.validate_checksums);
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.logging.format, LogFormat::Compact);
    });
}

#[test]
fn test_missing_file_is_an_error() {
    with_vars_unset(ENV_VARS.to_vec(), || {
        let err = ConfigLoader::new()
            .load(Some("/definitely/not/here/ladder.yaml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::FileReadError(_)));
    });
}

#[test]
fn test_custom_prefix_loader() {
    let vars = vec![
        ("CUSTOM_MIGRATIONS_DIR", Some("custom")),
        ("CUSTOM_LOG_LEVEL", Some("trace")),
    ];

    with_vars(vars, || {
        let loader = ConfigLoader::with_prefix("CUSTOM");
        let config = loader.from_env().unwrap();

        assert_eq!(config.migrations.directory, "custom");
        assert_eq!(config.logging.level, LogLevel::Trace);
    });
}

#[test]
fn test_validation_errors() {
    let mut config = LadderConfig::default();
    config.database.max_connections = 0;
    assert!(config.validate_all().is_err());

    config = LadderConfig::default();
    config.migrations.directory = String::new();
    assert!(config.validate_all().is_err());

    config = LadderConfig::default();
    config.migrations.migrator.lock_poll_interval = Duration::ZERO;
    assert!(config.validate_all().is_err());
}

#[test]
fn test_generate_sample_config() {
    let sample = LadderConfig::generate_sample();
    assert!(sample.contains("database:"));
    assert!(sample.contains("migrations:"));
    assert!(sample.contains("logging:"));

    // Verify the sample is valid YAML
    let parsed: LadderConfig = serde_yaml::from_str(&sample).unwrap();
    assert!(parsed.validate_all().is_ok());
    assert_eq!(parsed.migrations.migrator.table_name, "ladder_history");
}
