use async_trait::async_trait;
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::{Column, Connection as _, Row, Sqlite};
use std::str::FromStr;
use tracing::{debug, info};

use super::config::SqliteConfig;
use crate::connection::{Connection, Executor, Provider, Transaction};
use crate::{MigrationError, MigrationResult};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// SQLite provider backed by an sqlx connection pool
#[derive(Clone)]
pub struct SqliteProvider {
    pool: SqlitePool,
    config: SqliteConfig,
}

impl SqliteProvider {
    /// Create a new provider and its connection pool
    pub async fn connect(config: SqliteConfig) -> MigrationResult<Self> {
        info!("Connecting to database: {}", config.url);

        Self::ensure_sqlite_file_exists(&config.url)?;

        let mut options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| MigrationError::ConfigError(format!("invalid SQLite URL {}: {}", config.url, e)))?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);

        if !config.is_in_memory() {
            let journal_mode = SqliteJournalMode::from_str(&config.journal_mode).map_err(|e| {
                MigrationError::ConfigError(format!(
                    "invalid journal mode {}: {}",
                    config.journal_mode, e
                ))
            })?;
            options = options.journal_mode(journal_mode);
        }

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout);

        if config.is_in_memory() {
            // The shared in-memory database lives only as long as one connection does
            pool_options = pool_options
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        }

        let pool = pool_options.connect_with(options).await?;

        debug!(
            "Database pool established with {} max connections",
            config.max_connections
        );

        Ok(Self { pool, config })
    }

    /// Ensure the parent directory of a file-based SQLite database exists
    fn ensure_sqlite_file_exists(database_url: &str) -> MigrationResult<()> {
        if !database_url.starts_with("sqlite:") || database_url.contains(":memory:") {
            return Ok(());
        }

        let path_part = database_url
            .strip_prefix("sqlite://")
            .or_else(|| database_url.strip_prefix("sqlite:"))
            .unwrap_or_default();
        let file_path = path_part.split('?').next().unwrap_or_default();
        if file_path.is_empty() {
            return Ok(());
        }

        let path = std::path::Path::new(file_path);
        if let Some(parent_dir) = path.parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                info!("Creating database directory: {:?}", parent_dir);
                std::fs::create_dir_all(parent_dir).map_err(|e| {
                    MigrationError::ConfigError(format!(
                        "Failed to create database directory {:?}: {}",
                        parent_dir, e
                    ))
                })?;
            }
        }

        Ok(())
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }
}

#[async_trait]
impl Provider for SqliteProvider {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn validate_schema_name(&self, name: &str) -> MigrationResult<()> {
        self.validate_identifier(name)?;
        if ["main", "temp"].iter().any(|schema| name.eq_ignore_ascii_case(schema)) {
            Ok(())
        } else {
            Err(MigrationError::InvalidIdentifier(format!(
                "SQLite schema '{}' is not available to pooled connections; use 'main' or 'temp'",
                name
            )))
        }
    }

    async fn open_connection(&self) -> MigrationResult<Box<dyn Connection>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(SqliteConnection {
            conn,
            pool: self.pool.clone(),
        }))
    }

    async fn close(&self) -> MigrationResult<()> {
        info!("Closing database pool");
        self.pool.close().await;
        Ok(())
    }
}

/// A pooled SQLite connection. Transactions run on a sibling connection from
/// the same pool so the run connection stays free for history reads.
pub struct SqliteConnection {
    conn: PoolConnection<Sqlite>,
    pool: SqlitePool,
}

#[async_trait]
impl Executor for SqliteConnection {
    async fn execute(&mut self, query: &str, params: &[Value]) -> MigrationResult<u64> {
        let result = bind_params(sqlx::query(query), params)
            .execute(&mut *self.conn)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&mut self, script: &str) -> MigrationResult<()> {
        sqlx::Executor::execute(&mut *self.conn, script).await?;
        Ok(())
    }

    async fn fetch_json(&mut self, query: &str, params: &[Value]) -> MigrationResult<Vec<Value>> {
        let rows = bind_params(sqlx::query(query), params)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn as_executor(&mut self) -> &mut dyn Executor {
        self
    }

    async fn begin_transaction(&mut self) -> MigrationResult<Box<dyn Transaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| MigrationError::TransactionFailed(e.to_string()))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    async fn ping(&mut self) -> MigrationResult<()> {
        self.conn.ping().await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> MigrationResult<()> {
        // Dropping the pool connection returns it to the pool
        drop(self);
        Ok(())
    }
}

/// An open SQLite transaction; rolled back by sqlx if dropped uncommitted
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl Executor for SqliteTransaction {
    async fn execute(&mut self, query: &str, params: &[Value]) -> MigrationResult<u64> {
        let result = bind_params(sqlx::query(query), params)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&mut self, script: &str) -> MigrationResult<()> {
        sqlx::Executor::execute(&mut *self.tx, script).await?;
        Ok(())
    }

    async fn fetch_json(&mut self, query: &str, params: &[Value]) -> MigrationResult<Vec<Value>> {
        let rows = bind_params(sqlx::query(query), params)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows.iter().map(row_to_json).collect())
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    fn as_executor(&mut self) -> &mut dyn Executor {
        self
    }

    async fn commit(self: Box<Self>) -> MigrationResult<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| MigrationError::TransactionFailed(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> MigrationResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| MigrationError::TransactionFailed(e.to_string()))
    }
}

/// Bind JSON parameters positionally
fn bind_params<'q>(mut query: SqliteQuery<'q>, params: &'q [Value]) -> SqliteQuery<'q> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Decode a row into a JSON object using SQLite's storage classes
fn row_to_json(row: &SqliteRow) -> Value {
    let mut object = serde_json::Map::with_capacity(row.columns().len());

    for column in row.columns() {
        let index = column.ordinal();
        let value = if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
            v.map(Value::from)
        } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
            v.map(Value::String)
        } else {
            None
        };
        object.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }

    Value::Object(object)
}
