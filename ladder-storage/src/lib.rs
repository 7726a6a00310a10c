//! Versioned schema migrations for Ladder
//!
//! This crate brings a database from its recorded version to a desired one.
//! Migration units (SQL scripts or procedural code) are applied in strict
//! version order, each recorded in an append-only history table, and runs
//! against the same database are serialized through an advisory lock. Backends
//! plug in through the [`Provider`] contract; SQLite ships behind the default
//! `sqlite` feature.

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod history;
pub mod identifier;
pub mod lock;
pub mod migrator;
pub mod result;
pub mod unit;
pub mod version;

// SQLite implementation (feature-gated)
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Testing utilities
#[cfg(all(feature = "sqlite", any(test, feature = "testing")))]
pub mod testing;

// Re-export core types for convenience
pub use config::MigratorConfig;
pub use connection::{Connection, Executor, Provider, Transaction};
pub use discovery::{load_scripts, ScriptDirectory};
pub use error::{MigrationError, MigrationResult};
pub use history::{HistoryRecord, HistoryStore, Outcome};
pub use identifier::validate_identifier;
pub use lock::{Backoff, LockHolder, LockTable};
pub use migrator::{MigrationStatus, Migrator, UnitStatus};
pub use result::{Direction, RunFailure, RunResult, RunState};
pub use unit::{Action, ExecutionMode, MigrationAction, MigrationUnit};
pub use version::Version;

pub use tokio_util::sync::CancellationToken;
