//! Migration units: one versioned change with forward and optional reverse actions

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::connection::Executor;
use crate::{MigrationError, MigrationResult, Version};

/// Procedural migration step
#[async_trait]
pub trait MigrationAction: Send + Sync {
    /// Apply the change through the given executor (a transaction or a bare connection)
    async fn apply(&self, executor: &mut dyn Executor) -> MigrationResult<()>;
}

/// Whether the migrator wraps a unit in its own transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Action and history record commit atomically
    #[default]
    Transactional,
    /// Action runs on a bare connection, for statements a backend refuses inside a transaction
    NonTransactional,
}

/// The body of an upgrade or downgrade
#[derive(Clone)]
pub enum Action {
    /// Raw SQL script, possibly several statements
    Sql(String),
    /// Procedural code
    Code(Arc<dyn MigrationAction>),
}

impl Action {
    /// Run the action
    pub async fn apply(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        match self {
            Action::Sql(script) => executor.execute_script(script).await,
            Action::Code(action) => action.apply(executor).await,
        }
    }

    /// SHA-256 of the script for SQL actions; procedural actions have none
    pub fn checksum(&self) -> Option<String> {
        match self {
            Action::Sql(script) => Some(hex::encode(Sha256::digest(script.as_bytes()))),
            Action::Code(_) => None,
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Sql(script) => f.debug_tuple("Sql").field(&script.len()).finish(),
            Action::Code(_) => f.write_str("Code"),
        }
    }
}

/// A single versioned migration
#[derive(Debug, Clone)]
pub struct MigrationUnit {
    version: Version,
    comment: String,
    upgrade: Action,
    downgrade: Option<Action>,
    mode: ExecutionMode,
}

impl MigrationUnit {
    /// Create a unit with an explicit upgrade action
    pub fn new(version: Version, comment: impl Into<String>, upgrade: Action) -> Self {
        Self {
            version,
            comment: comment.into(),
            upgrade,
            downgrade: None,
            mode: ExecutionMode::Transactional,
        }
    }

    /// Create a SQL script unit
    pub fn sql(version: Version, comment: impl Into<String>, up_sql: impl Into<String>) -> Self {
        Self::new(version, comment, Action::Sql(up_sql.into()))
    }

    /// Create a procedural unit
    pub fn code<A>(version: Version, comment: impl Into<String>, action: A) -> Self
    where
        A: MigrationAction + 'static,
    {
        Self::new(version, comment, Action::Code(Arc::new(action)))
    }

    /// Set down SQL for rollback
    pub fn with_downgrade_sql(mut self, down_sql: impl Into<String>) -> Self {
        self.downgrade = Some(Action::Sql(down_sql.into()));
        self
    }

    /// Set a procedural downgrade
    pub fn with_downgrade<A>(mut self, action: A) -> Self
    where
        A: MigrationAction + 'static,
    {
        self.downgrade = Some(Action::Code(Arc::new(action)));
        self
    }

    /// Set the downgrade action directly
    pub fn with_downgrade_action(mut self, action: Action) -> Self {
        self.downgrade = Some(action);
        self
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Run outside a transaction
    pub fn non_transactional(self) -> Self {
        self.with_mode(ExecutionMode::NonTransactional)
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn upgrade_action(&self) -> &Action {
        &self.upgrade
    }

    pub fn downgrade_action(&self) -> Option<&Action> {
        self.downgrade.as_ref()
    }

    /// Check if the unit can be rolled back
    pub fn is_reversible(&self) -> bool {
        self.downgrade.is_some()
    }

    /// Checksum recorded in history when the unit is applied
    pub fn checksum(&self) -> Option<String> {
        self.upgrade.checksum()
    }

    /// Apply the forward change
    pub async fn upgrade(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        self.upgrade.apply(executor).await
    }

    /// Apply the reverse change
    pub async fn downgrade(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        match &self.downgrade {
            Some(action) => action.apply(executor).await,
            None => Err(MigrationError::NotReversible(self.version)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopExecutor {
        scripts: Vec<String>,
    }

    #[async_trait]
    impl Executor for NoopExecutor {
        async fn execute(&mut self, _query: &str, _params: &[serde_json::Value]) -> MigrationResult<u64> {
            Ok(0)
        }

        async fn execute_script(&mut self, script: &str) -> MigrationResult<()> {
            self.scripts.push(script.to_string());
            Ok(())
        }

        async fn fetch_json(
            &mut self,
            _query: &str,
            _params: &[serde_json::Value],
        ) -> MigrationResult<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_sql_unit() {
        let unit = MigrationUnit::sql(Version::new(1, 0), "create users", "CREATE TABLE users (id INTEGER)")
            .with_downgrade_sql("DROP TABLE users");

        assert_eq!(unit.version(), Version::new(1, 0));
        assert_eq!(unit.comment(), "create users");
        assert_eq!(unit.mode(), ExecutionMode::Transactional);
        assert!(unit.is_reversible());
        assert_eq!(unit.checksum().map(|c| c.len()), Some(64));
    }

    #[test]
    fn test_checksum_tracks_script_content() {
        let a = MigrationUnit::sql(Version::new(1, 0), "a", "CREATE TABLE a (id INTEGER)");
        let b = MigrationUnit::sql(Version::new(1, 0), "a", "CREATE TABLE a (id TEXT)");
        assert_ne!(a.checksum(), b.checksum());
        assert_eq!(a.checksum(), a.clone().checksum());
    }

    #[tokio::test]
    async fn test_downgrade_without_action_is_not_reversible() {
        let unit = MigrationUnit::sql(Version::new(2, 0), "add index", "CREATE INDEX i ON t (c)")
            .non_transactional();
        let mut executor = NoopExecutor { scripts: Vec::new() };

        assert_eq!(unit.mode(), ExecutionMode::NonTransactional);
        assert!(matches!(
            unit.downgrade(&mut executor).await,
            Err(MigrationError::NotReversible(v)) if v == Version::new(2, 0)
        ));
        assert!(executor.scripts.is_empty());

        unit.upgrade(&mut executor).await.unwrap();
        assert_eq!(executor.scripts, vec!["CREATE INDEX i ON t (c)".to_string()]);
    }
}
