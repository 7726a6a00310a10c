//! Testing utilities for ladder-storage
//!
//! - `TestDatabase`: file-backed SQLite database in a temporary directory,
//!   removed on drop. Hands out extra independent providers so tests can run
//!   several migrators against the same database.
//! - `TracedAction`: procedural migration that records its execution order and
//!   can sleep, run SQL or fail on demand.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Mutex;

use crate::connection::{Connection, Executor, Provider};
use crate::sqlite::{SqliteConfig, SqliteProvider};
use crate::unit::MigrationAction;
use crate::{MigrationError, MigrationResult};

/// Test database for isolated testing
pub struct TestDatabase {
    _temp_dir: TempDir,
    url: String,
    pub provider: Arc<SqliteProvider>,
}

impl TestDatabase {
    /// Create a new SQLite test database in a temporary directory
    pub async fn new() -> MigrationResult<Self> {
        let temp_dir = TempDir::new()
            .map_err(|e| MigrationError::ConfigError(format!("creating temp dir: {}", e)))?;
        let db_path = temp_dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let provider = Arc::new(SqliteProvider::connect(SqliteConfig::new(url.clone())).await?);

        Ok(Self {
            _temp_dir: temp_dir,
            url,
            provider,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// An independent provider (own pool) on the same database file
    pub async fn another_provider(&self) -> MigrationResult<Arc<SqliteProvider>> {
        Ok(Arc::new(SqliteProvider::connect(SqliteConfig::new(self.url.clone())).await?))
    }

    pub async fn connect(&self) -> MigrationResult<Box<dyn Connection>> {
        self.provider.open_connection().await
    }

    /// Check if a table exists
    pub async fn table_exists(&self, table: &str) -> MigrationResult<bool> {
        let mut conn = self.connect().await?;
        let rows = conn
            .fetch_json(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[json!(table)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Check if a column exists on a table
    pub async fn column_exists(&self, table: &str, column: &str) -> MigrationResult<bool> {
        let mut conn = self.connect().await?;
        let rows = conn
            .fetch_json(
                "SELECT name FROM pragma_table_info(?) WHERE name = ?",
                &[json!(table), json!(column)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Get a count of records in a table
    pub async fn count_records(&self, table: &str) -> MigrationResult<i64> {
        let mut conn = self.connect().await?;
        let rows = conn
            .fetch_json(&format!("SELECT COUNT(*) AS count FROM {}", table), &[])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row["count"].as_i64())
            .unwrap_or_default())
    }
}

/// Shared, ordered log of executed actions
#[derive(Debug, Clone, Default)]
pub struct ExecutionTrace(Arc<Mutex<Vec<String>>>);

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, label: impl Into<String>) {
        self.0.lock().await.push(label.into());
    }

    pub async fn entries(&self) -> Vec<String> {
        self.0.lock().await.clone()
    }
}

/// Procedural action that records itself in an `ExecutionTrace`
#[derive(Debug, Clone)]
pub struct TracedAction {
    trace: ExecutionTrace,
    label: String,
    sql: Option<String>,
    delay: Option<Duration>,
    fail: bool,
}

impl TracedAction {
    pub fn new(trace: &ExecutionTrace, label: impl Into<String>) -> Self {
        Self {
            trace: trace.clone(),
            label: label.into(),
            sql: None,
            delay: None,
            fail: false,
        }
    }

    /// Run a script after recording
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Sleep before doing anything else
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail after running the optional script
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl MigrationAction for TracedAction {
    async fn apply(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        self.trace.push(self.label.clone()).await;

        if let Some(sql) = &self.sql {
            executor.execute_script(sql).await?;
        }

        if self.fail {
            return Err(MigrationError::ExecutionFailed(format!(
                "{} failed on purpose",
                self.label
            )));
        }

        Ok(())
    }
}
