//! Migration run configuration

use ladder_storage::{validate_identifier, MigratorConfig};
use serde::{Deserialize, Serialize};

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};

/// Where migration scripts live and how runs behave
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationsConfig {
    /// Directory containing `V*__*.sql` / `U*__*.sql` scripts
    #[serde(default = "default_migrations_dir")]
    pub directory: String,

    /// Options handed to the migrator
    #[serde(flatten)]
    pub migrator: MigratorConfig,
}

impl Default for MigrationsConfig {
    fn default() -> Self {
        Self {
            directory: default_migrations_dir(),
            migrator: MigratorConfig::default(),
        }
    }
}

impl Validatable for MigrationsConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.directory, "directory", self.domain_name())?;

        validate_identifier(&self.migrator.table_name)
            .map_err(|e| self.validation_error(format!("table_name: {}", e)))?;
        if let Some(schema) = &self.migrator.schema_name {
            validate_identifier(schema).map_err(|e| self.validation_error(format!("schema_name: {}", e)))?;
        }

        self.migrator
            .validate()
            .map_err(|e| self.validation_error(e.to_string()))
    }

    fn domain_name(&self) -> &'static str {
        "migrations"
    }
}

fn default_migrations_dir() -> String {
    "migrations".to_string()
}
