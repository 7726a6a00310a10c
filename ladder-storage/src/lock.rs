//! Run-scoped advisory lock
//!
//! The lock is a single row (id = 1) in a dedicated table next to the history
//! table. Whoever inserts the row owns the lock; everyone else sees a unique-key
//! conflict and waits with exponential backoff until the configured timeout.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::connection::Executor;
use crate::identifier::qualify;
use crate::{MigrationError, MigrationResult};

/// Current holder of the lock
#[derive(Debug, Clone)]
pub struct LockHolder {
    pub owner: String,
    pub acquired_at: Option<DateTime<Utc>>,
}

/// Exponential backoff with jitter between acquisition attempts
#[derive(Debug, Clone)]
pub struct Backoff {
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay: Duration::from_secs(2),
            jitter: true,
        }
    }

    /// Set maximum retry delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Enable or disable jitter in retry delays
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before attempt `attempt + 1`
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt.min(16));
        let delay_ms = (self.base_delay.as_millis() as u64).saturating_mul(factor);
        let delay = Duration::from_millis(delay_ms).min(self.max_delay);

        if self.jitter {
            // ±25%
            let jitter_range = delay.as_millis() as i64 / 4;
            let jitter = fastrand::i64(-jitter_range..=jitter_range);
            Duration::from_millis((delay.as_millis() as i64 + jitter).max(1) as u64)
        } else {
            delay
        }
    }
}

/// Lock table bound to one (validated) table name
#[derive(Debug, Clone)]
pub struct LockTable {
    table: String,
}

impl LockTable {
    /// Lock table for a history table: `<history_table>_lock`
    pub fn for_history(schema: Option<&str>, history_table: &str) -> Self {
        Self {
            table: qualify(schema, &format!("{}_lock", history_table)),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the lock table if it does not exist
    pub async fn ensure_schema(&self, executor: &mut dyn Executor) -> MigrationResult<()> {
        let query = format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY, owner TEXT NOT NULL, acquired_at TEXT NOT NULL)",
            self.table
        );
        executor
            .execute(&query, &[])
            .await
            .map_err(|e| MigrationError::SchemaError(format!("creating {}: {}", self.table, e)))?;
        Ok(())
    }

    /// Single acquisition attempt; `false` when someone else holds the lock
    pub async fn try_acquire(&self, executor: &mut dyn Executor, owner: &str) -> MigrationResult<bool> {
        let query = format!(
            "INSERT INTO {} (id, owner, acquired_at) VALUES (1, ?, ?)",
            self.table
        );
        match executor
            .execute(&query, &[json!(owner), json!(Utc::now().to_rfc3339())])
            .await
        {
            Ok(_) => Ok(true),
            Err(MigrationError::Conflict(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Acquire the lock, waiting up to `timeout`. The wait stops early with
    /// `Cancelled` when `cancel` fires.
    pub async fn acquire(
        &self,
        executor: &mut dyn Executor,
        owner: &str,
        timeout: Duration,
        backoff: &Backoff,
        cancel: &CancellationToken,
    ) -> MigrationResult<()> {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0;

        loop {
            if self.try_acquire(executor, owner).await? {
                tracing::debug!(table = %self.table, owner, attempts = attempt + 1, "Migration lock acquired");
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(MigrationError::LockTimeout(timeout));
            }

            let delay = backoff.delay(attempt).min(deadline - now);
            tracing::debug!(table = %self.table, owner, ?delay, "Migration lock busy, waiting");

            tokio::select! {
                _ = cancel.cancelled() => return Err(MigrationError::Cancelled),
                _ = sleep(delay) => {}
            }
            attempt += 1;
        }
    }

    /// Release the lock if `owner` holds it. Returns whether a row was removed.
    pub async fn release(&self, executor: &mut dyn Executor, owner: &str) -> MigrationResult<bool> {
        let query = format!("DELETE FROM {} WHERE id = 1 AND owner = ?", self.table);
        let removed = executor.execute(&query, &[json!(owner)]).await?;
        Ok(removed > 0)
    }

    /// Remove the lock regardless of owner, for recovery after a crashed run
    pub async fn force_release(&self, executor: &mut dyn Executor) -> MigrationResult<bool> {
        let query = format!("DELETE FROM {} WHERE id = 1", self.table);
        let removed = executor.execute(&query, &[]).await?;
        Ok(removed > 0)
    }

    /// Current lock holder, if any
    pub async fn holder(&self, executor: &mut dyn Executor) -> MigrationResult<Option<LockHolder>> {
        let query = format!("SELECT owner, acquired_at FROM {} WHERE id = 1", self.table);
        let rows = executor.fetch_json(&query, &[]).await?;

        Ok(rows.into_iter().next().map(|row| LockHolder {
            owner: row["owner"].as_str().unwrap_or_default().to_string(),
            acquired_at: row["acquired_at"]
                .as_str()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&Utc)),
        }))
    }
}
