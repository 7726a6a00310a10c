//! Domain-driven configuration management for Ladder
//!
//! Configuration is split into `database`, `migrations` and `logging`
//! domains, loaded from YAML with `LADDER_*` environment overrides and
//! validated per domain.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    database::DatabaseConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    migrations::MigrationsConfig,
    LadderConfig,
};
