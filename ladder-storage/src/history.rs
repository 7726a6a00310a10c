//! Persisted ledger of applied migrations
//!
//! Records are append-only. The applied set is derived by replaying records in
//! insertion order: `success` adds a version, `reverted` removes it, `failed`
//! leaves it untouched.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::connection::Executor;
use crate::identifier::qualify;
use crate::result::Direction;
use crate::{MigrationError, MigrationResult, Version};

/// Outcome stored with each history record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
    Reverted,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::Reverted => "reverted",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Outcome {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Outcome::Success),
            "failed" => Ok(Outcome::Failed),
            "reverted" => Ok(Outcome::Reverted),
            other => Err(MigrationError::SchemaError(format!(
                "unknown history outcome '{}'",
                other
            ))),
        }
    }
}

/// One row of the history table
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub id: i64,
    pub version: Version,
    pub comment: String,
    pub applied_at: DateTime<Utc>,
    pub duration: Duration,
    pub outcome: Outcome,
    pub direction: Direction,
    pub checksum: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HistoryRow {
    id: i64,
    version_major: i64,
    version_minor: i64,
    comment: String,
    applied_at: String,
    duration_ms: i64,
    outcome: String,
    direction: String,
    checksum: Option<String>,
    error: Option<String>,
}

impl TryFrom<HistoryRow> for HistoryRecord {
    type Error = MigrationError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let applied_at = DateTime::parse_from_rfc3339(&row.applied_at)
            .map_err(|e| {
                MigrationError::SchemaError(format!(
                    "invalid applied_at '{}' in history row {}: {}",
                    row.applied_at, row.id, e
                ))
            })?
            .with_timezone(&Utc);

        let direction = match row.direction.as_str() {
            "up" => Direction::Up,
            "down" => Direction::Down,
            other => {
                return Err(MigrationError::SchemaError(format!(
                    "unknown direction '{}' in history row {}",
                    other, row.id
                )))
            }
        };

        Ok(Self {
            id: row.id,
            version: Version::try_new(row.version_major, row.version_minor)?,
            comment: row.comment,
            applied_at,
            duration: Duration::from_millis(row.duration_ms.max(0) as u64),
            outcome: row.outcome.parse()?,
            direction,
            checksum: row.checksum,
            error: row.error,
        })
    }
}

/// History store bound to one (validated) table name
#[derive(Debug, Clone)]
pub struct HistoryStore {
    table: String,
}

impl HistoryStore {
    /// Create a store for `schema.table`. Both parts must already be validated.
    pub fn new(schema: Option<&str>, table: &str) -> Self {
        Self {
            table: qualify(schema, table),
        }
    }

    /// Qualified table name
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the history table if it does not exist
    pub async fn ensure_schema(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        let query = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY,
                version_major INTEGER NOT NULL,
                version_minor INTEGER NOT NULL,
                comment TEXT NOT NULL,
                applied_at TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                outcome TEXT NOT NULL,
                direction TEXT NOT NULL,
                checksum TEXT,
                error TEXT
            )
            "#,
            self.table
        );

        executor
            .execute(&query, &[])
            .await
            .map_err(|e| MigrationError::SchemaError(format!("creating {}: {}", self.table, e)))?;

        tracing::debug!(table = %self.table, "History schema ensured");
        Ok(())
    }

    /// All records in insertion order
    pub async fn records(&self, executor: &mut dyn Executor) -> MigrationResult<Vec<HistoryRecord>> {
        let query = format!(
            "SELECT id, version_major, version_minor, comment, applied_at, duration_ms, \
             outcome, direction, checksum, error FROM {} ORDER BY id",
            self.table
        );

        let rows = executor
            .fetch_json(&query, &[])
            .await
            .map_err(|e| MigrationError::SchemaError(format!("reading {}: {}", self.table, e)))?;

        rows.into_iter()
            .map(|row| {
                let row: HistoryRow = serde_json::from_value(row).map_err(|e| {
                    MigrationError::SchemaError(format!("malformed row in {}: {}", self.table, e))
                })?;
                HistoryRecord::try_from(row)
            })
            .collect()
    }

    /// The success record currently in force for every applied version
    pub async fn applied_records(
        &self,
        executor: &mut dyn Executor,
    ) -> MigrationResult<BTreeMap<Version, HistoryRecord>> {
        Ok(fold_applied(self.records(executor).await?))
    }

    /// Versions currently applied
    pub async fn applied_versions(&self, executor: &mut dyn Executor) -> MigrationResult<BTreeSet<Version>> {
        Ok(self.applied_records(executor).await?.into_keys().collect())
    }

    /// Append a success record
    pub async fn record_applied(
        &self,
        executor: &mut dyn Executor,
        version: Version,
        comment: &str,
        duration: Duration,
        checksum: Option<&str>,
    ) -> MigrationResult<()> {
        self.append(executor, version, comment, duration, Outcome::Success, Direction::Up, checksum, None)
            .await
    }

    /// Append a reverted record after a successful downgrade
    pub async fn record_reverted(
        &self,
        executor: &mut dyn Executor,
        version: Version,
        comment: &str,
        duration: Duration,
    ) -> MigrationResult<()> {
        self.append(executor, version, comment, duration, Outcome::Reverted, Direction::Down, None, None)
            .await
    }

    /// Append a failed record. Callers use a connection outside any rolled-back transaction.
    pub async fn record_failed(
        &self,
        executor: &mut dyn Executor,
        version: Version,
        comment: &str,
        direction: Direction,
        duration: Duration,
        cause: &MigrationError,
    ) -> MigrationResult<()> {
        let error = cause.to_string();
        self.append(
            executor,
            version,
            comment,
            duration,
            Outcome::Failed,
            direction,
            None,
            Some(error.as_str()),
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn append(
        &self,
        executor: &mut dyn Executor,
        version: Version,
        comment: &str,
        duration: Duration,
        outcome: Outcome,
        direction: Direction,
        checksum: Option<&str>,
        error: Option<&str>,
    ) -> MigrationResult<()> {
        let query = format!(
            "INSERT INTO {} (version_major, version_minor, comment, applied_at, duration_ms, \
             outcome, direction, checksum, error) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            self.table
        );

        let params = [
            json!(version.major()),
            json!(version.minor()),
            json!(comment),
            json!(Utc::now().to_rfc3339()),
            json!(duration.as_millis() as u64),
            json!(outcome.as_str()),
            json!(direction.as_str()),
            json!(checksum),
            json!(error),
        ];

        executor.execute(&query, &params).await?;
        tracing::debug!(table = %self.table, version = %version, outcome = %outcome, "History record appended");
        Ok(())
    }
}

/// Replay records into the set of versions currently applied
fn fold_applied(records: Vec<HistoryRecord>) -> BTreeMap<Version, HistoryRecord> {
    let mut applied = BTreeMap::new();
    for record in records {
        match record.outcome {
            Outcome::Success => {
                applied.insert(record.version, record);
            }
            Outcome::Reverted => {
                applied.remove(&record.version);
            }
            Outcome::Failed => {}
        }
    }
    applied
}
