//! Connection and transaction provider contract
//!
//! A backend plugs into the migrator by implementing [`Provider`], which hands
//! out [`Connection`]s; a connection can open a [`Transaction`]. Both share the
//! statement-level [`Executor`] surface so history writes and procedural
//! migrations are written once for either target.

use async_trait::async_trait;

use crate::{identifier, MigrationResult};

/// Statement execution shared by connections and transactions
#[async_trait]
pub trait Executor: Send {
    /// Execute a single statement with positional parameters, returning rows affected
    async fn execute(&mut self, query: &str, params: &[serde_json::Value]) -> MigrationResult<u64>;

    /// Execute a script that may contain several statements
    async fn execute_script(&mut self, script: &str) -> MigrationResult<()>;

    /// Execute a query and return each row as a JSON object keyed by column name
    async fn fetch_json(
        &mut self,
        query: &str,
        params: &[serde_json::Value],
    ) -> MigrationResult<Vec<serde_json::Value>>;
}

/// A live database connection
#[async_trait]
pub trait Connection: Executor {
    /// View this connection as a plain executor
    fn as_executor(&mut self) -> &mut dyn Executor;

    /// Begin a transaction. Implementations must roll the transaction back if
    /// it is dropped without an explicit commit or rollback.
    async fn begin_transaction(&mut self) -> MigrationResult<Box<dyn Transaction>>;

    /// Check if the connection is healthy
    async fn ping(&mut self) -> MigrationResult<()>;

    /// Release the connection
    async fn close(self: Box<Self>) -> MigrationResult<()>;
}

/// An open transaction
#[async_trait]
pub trait Transaction: Executor {
    /// View this transaction as a plain executor
    fn as_executor(&mut self) -> &mut dyn Executor;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> MigrationResult<()>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> MigrationResult<()>;
}

/// Backend plug-in: opens connections against one target database
#[async_trait]
pub trait Provider: Send + Sync {
    /// Short backend name used in logs
    fn name(&self) -> &'static str;

    /// Open a new connection
    async fn open_connection(&self) -> MigrationResult<Box<dyn Connection>>;

    /// Validate a configurable identifier (table or schema name) before use
    fn validate_identifier(&self, name: &str) -> MigrationResult<()> {
        identifier::validate_identifier(name)
    }

    /// Validate the schema holding the history table. Backends narrow this to
    /// the schemas their connections can actually see.
    fn validate_schema_name(&self, name: &str) -> MigrationResult<()> {
        self.validate_identifier(name)
    }

    /// Close all pooled resources
    async fn close(&self) -> MigrationResult<()> {
        Ok(())
    }
}
