//! Migration error types

use std::time::Duration;
use thiserror::Error;

use crate::result::RunResult;
use crate::version::Version;

/// Result type for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;

/// Migration-related errors
#[derive(Debug, Clone, Error)]
pub enum MigrationError {
    /// A version could not be constructed or parsed
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Network or authentication failure while talking to the backend
    #[error("Database connection failed: {0}")]
    ConnectionFailed(String),

    /// The backend rejected a statement or script
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// Transaction could not be started, committed or rolled back
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    /// Two supplied units share a version
    #[error("Duplicate migration version: {0}")]
    DuplicateVersion(Version),

    /// History references a version the caller no longer supplies
    #[error("History contains applied version {0} which is missing from the supplied migrations")]
    OutOfOrderHistory(Version),

    /// A downgrade was requested across a unit without a downgrade action
    #[error("Migration {0} is not reversible")]
    NotReversible(Version),

    /// The advisory lock was not acquired within the configured wait
    #[error("Timed out after {0:?} waiting for the migration lock")]
    LockTimeout(Duration),

    /// The history table could not be created or read
    #[error("History schema error: {0}")]
    SchemaError(String),

    /// A configured table or schema name failed validation
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// An applied script was modified after it ran
    #[error("Checksum mismatch for migration {version}: recorded {recorded}, current {current}")]
    ChecksumMismatch {
        version: Version,
        recorded: String,
        current: String,
    },

    /// Unique key constraint violation reported by the backend
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Migration scripts could not be discovered or parsed
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// The run was cancelled between units
    #[error("Migration run cancelled")]
    Cancelled,

    /// Raised by the throwing run variants; carries the full run result
    #[error("{}", describe_abort(.cause, .result))]
    RunAborted {
        cause: Box<MigrationError>,
        result: Box<RunResult>,
    },
}

fn describe_abort(cause: &MigrationError, result: &RunResult) -> String {
    match result.failure.as_ref().and_then(|f| f.version) {
        Some(version) => format!("Migration run aborted at {}: {}", version, cause),
        None => format!("Migration run aborted: {}", cause),
    }
}

impl MigrationError {
    /// Check if the caller may retry the operation unchanged
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::ConnectionFailed(_)
            | MigrationError::LockTimeout(_)
            | MigrationError::TransactionFailed(_) => true,
            MigrationError::RunAborted { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// The underlying error, looking through `RunAborted`
    pub fn cause(&self) -> &MigrationError {
        match self {
            MigrationError::RunAborted { cause, .. } => cause.cause(),
            other => other,
        }
    }

    /// The run result attached by the throwing variants, if any
    pub fn run_result(&self) -> Option<&RunResult> {
        match self {
            MigrationError::RunAborted { result, .. } => Some(result),
            _ => None,
        }
    }

    /// Get error code for reporting
    pub fn error_code(&self) -> &'static str {
        match self {
            MigrationError::InvalidVersion(_) => "INVALID_VERSION",
            MigrationError::ConnectionFailed(_) => "CONNECTION_ERROR",
            MigrationError::ExecutionFailed(_) => "EXECUTION_ERROR",
            MigrationError::TransactionFailed(_) => "TRANSACTION_ERROR",
            MigrationError::DuplicateVersion(_) => "DUPLICATE_VERSION",
            MigrationError::OutOfOrderHistory(_) => "OUT_OF_ORDER_HISTORY",
            MigrationError::NotReversible(_) => "NOT_REVERSIBLE",
            MigrationError::LockTimeout(_) => "LOCK_TIMEOUT",
            MigrationError::SchemaError(_) => "SCHEMA_ERROR",
            MigrationError::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            MigrationError::ChecksumMismatch { .. } => "CHECKSUM_MISMATCH",
            MigrationError::Conflict(_) => "CONFLICT",
            MigrationError::ConfigError(_) => "CONFIG_ERROR",
            MigrationError::Discovery(_) => "DISCOVERY_ERROR",
            MigrationError::Cancelled => "CANCELLED",
            MigrationError::RunAborted { cause, .. } => cause.error_code(),
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() || db_err.message().contains("UNIQUE constraint") {
                    MigrationError::Conflict(db_err.to_string())
                } else {
                    MigrationError::ExecutionFailed(db_err.to_string())
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => MigrationError::ConnectionFailed(err.to_string()),
            other => MigrationError::ExecutionFailed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::{Direction, RunResult};

    #[test]
    fn test_error_retryable() {
        assert!(MigrationError::ConnectionFailed("down".to_string()).is_retryable());
        assert!(MigrationError::LockTimeout(Duration::from_secs(1)).is_retryable());
        assert!(!MigrationError::ExecutionFailed("syntax".to_string()).is_retryable());
        assert!(!MigrationError::NotReversible(Version::new(1, 0)).is_retryable());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            MigrationError::DuplicateVersion(Version::new(1, 0)).error_code(),
            "DUPLICATE_VERSION"
        );
        assert_eq!(
            MigrationError::OutOfOrderHistory(Version::new(1, 0)).error_code(),
            "OUT_OF_ORDER_HISTORY"
        );
        assert_eq!(MigrationError::Cancelled.error_code(), "CANCELLED");
    }

    #[test]
    fn test_run_aborted_exposes_cause() {
        let cause = MigrationError::ExecutionFailed("no such table: users".to_string());
        let mut result = RunResult::new(Direction::Up);
        result.abort(Some(Version::new(2, 1)), cause.clone());

        let err = MigrationError::RunAborted {
            cause: Box::new(cause),
            result: Box::new(result),
        };

        assert!(matches!(err.cause(), MigrationError::ExecutionFailed(_)));
        assert_eq!(err.error_code(), "EXECUTION_ERROR");
        assert!(err.to_string().contains("aborted at 2.1"));
        assert!(err.run_result().is_some());
    }
}
