//! Migration orchestration
//!
//! A run moves through `Initializing -> Resolving -> Executing` and ends in
//! `Completed` or `Aborted`:
//!
//! 1. **Initializing**: open the run connection, ensure the history table and
//!    take the advisory lock.
//! 2. **Resolving**: read the applied set, check the supplied units against it
//!    and compute the plan. Nothing is mutated when this phase fails.
//! 3. **Executing**: run each planned unit in order, one transaction per
//!    transactional unit, stopping at the first failure.
//!
//! The lock and the run connection are released on every exit path.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MigratorConfig;
use crate::connection::{Connection, Executor, Provider};
use crate::history::{HistoryRecord, HistoryStore};
use crate::lock::{Backoff, LockHolder, LockTable};
use crate::result::{Direction, RunResult, RunState};
use crate::unit::{ExecutionMode, MigrationUnit};
use crate::{MigrationError, MigrationResult, Version};

/// Applied or pending state of one supplied unit
#[derive(Debug, Clone)]
pub struct UnitStatus {
    pub version: Version,
    pub comment: String,
    pub applied: bool,
    pub applied_at: Option<DateTime<Utc>>,
    pub reversible: bool,
}

/// Snapshot returned by [`Migrator::status`]
#[derive(Debug, Clone)]
pub struct MigrationStatus {
    pub current: Option<Version>,
    pub units: Vec<UnitStatus>,
    /// Applied versions with no matching supplied unit
    pub orphaned: Vec<Version>,
    pub locked_by: Option<LockHolder>,
}

impl MigrationStatus {
    pub fn pending_count(&self) -> usize {
        self.units.iter().filter(|u| !u.applied).count()
    }
}

/// Brings a database from its recorded version to a desired one
pub struct Migrator {
    provider: Arc<dyn Provider>,
    units: Vec<MigrationUnit>,
    config: MigratorConfig,
    history: HistoryStore,
    lock: LockTable,
    cancel: CancellationToken,
}

impl Migrator {
    /// Create a migrator. Configured identifiers are validated here, before
    /// anything touches the database.
    pub fn new(
        provider: Arc<dyn Provider>,
        units: Vec<MigrationUnit>,
        config: MigratorConfig,
    ) -> MigrationResult<Self> {
        config.validate()?;

        provider.validate_identifier(&config.table_name)?;
        provider.validate_identifier(&format!("{}_lock", config.table_name))?;
        if let Some(schema) = &config.schema_name {
            provider.validate_schema_name(schema)?;
        }

        let schema = config.schema_name.as_deref();
        let history = HistoryStore::new(schema, &config.table_name);
        let lock = LockTable::for_history(schema, &config.table_name);

        let mut units = units;
        units.sort_by_key(|unit| unit.version());

        Ok(Self {
            provider,
            units,
            config,
            history,
            lock,
            cancel: CancellationToken::new(),
        })
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that stops the current run between units when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Supplied units in ascending version order
    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    /// Apply pending units up to `target` (or the configured target), raising
    /// `RunAborted` on failure
    pub async fn migrate(&self, target: Option<Version>) -> MigrationResult<RunResult> {
        self.migrate_safe(target).await.into_result()
    }

    /// Apply pending units up to `target`. Never raises; failures are carried
    /// in the returned result.
    pub async fn migrate_safe(&self, target: Option<Version>) -> RunResult {
        let target = target.or(self.config.target_version);
        self.run(Direction::Up, target).await
    }

    /// Revert applied units above `target`, raising `RunAborted` on failure
    pub async fn downgrade(&self, target: Version) -> MigrationResult<RunResult> {
        self.downgrade_safe(target).await.into_result()
    }

    /// Revert applied units above `target`, in descending order
    pub async fn downgrade_safe(&self, target: Version) -> RunResult {
        self.run(Direction::Down, Some(target)).await
    }

    /// Highest applied version, if any
    pub async fn current_version(&self) -> MigrationResult<Option<Version>> {
        let mut conn = self.open_with_schema().await?;
        let applied = self.history.applied_versions(conn.as_executor()).await;
        close_quietly(conn).await;
        Ok(applied?.into_iter().next_back())
    }

    /// Every history record in insertion order
    pub async fn history(&self) -> MigrationResult<Vec<HistoryRecord>> {
        let mut conn = self.open_with_schema().await?;
        let records = self.history.records(conn.as_executor()).await;
        close_quietly(conn).await;
        records
    }

    /// Units a `migrate(target)` would apply now, without executing them
    pub async fn pending(&self, target: Option<Version>) -> MigrationResult<Vec<&MigrationUnit>> {
        let target = target.or(self.config.target_version);
        let mut conn = self.open_with_schema().await?;
        let plan = self.resolve(conn.as_executor(), Direction::Up, target).await;
        close_quietly(conn).await;
        plan
    }

    /// Per-unit view of the applied state
    pub async fn status(&self) -> MigrationResult<MigrationStatus> {
        let mut conn = self.open_with_schema().await?;
        let snapshot = self.read_status(conn.as_mut()).await;
        close_quietly(conn).await;
        snapshot
    }

    /// Remove the advisory lock regardless of owner. Returns whether a lock was held.
    pub async fn force_unlock(&self) -> MigrationResult<bool> {
        let mut conn = self.provider.open_connection().await?;
        let released = async {
            self.lock.ensure_schema(conn.as_executor()).await?;
            self.lock.force_release(conn.as_executor()).await
        }
        .await;
        close_quietly(conn).await;

        let released = released?;
        if released {
            warn!(table = %self.lock.table(), "Migration lock forcibly released");
        }
        Ok(released)
    }

    async fn open_with_schema(&self) -> MigrationResult<Box<dyn Connection>> {
        let mut conn = self.provider.open_connection().await?;
        if let Err(e) = self.history.ensure_schema(conn.as_executor()).await {
            close_quietly(conn).await;
            return Err(e);
        }
        Ok(conn)
    }

    async fn read_status(&self, conn: &mut dyn Connection) -> MigrationResult<MigrationStatus> {
        let records = self.history.applied_records(conn.as_executor()).await?;
        let locked_by = if self.config.use_advisory_lock {
            self.lock.ensure_schema(conn.as_executor()).await?;
            self.lock.holder(conn.as_executor()).await?
        } else {
            None
        };

        let units = self
            .units
            .iter()
            .map(|unit| {
                let record = records.get(&unit.version());
                UnitStatus {
                    version: unit.version(),
                    comment: unit.comment().to_string(),
                    applied: record.is_some(),
                    applied_at: record.map(|r| r.applied_at),
                    reversible: unit.is_reversible(),
                }
            })
            .collect();

        let orphaned = records
            .keys()
            .filter(|v| self.find_unit(**v).is_none())
            .copied()
            .collect();

        Ok(MigrationStatus {
            current: records.keys().next_back().copied(),
            units,
            orphaned,
            locked_by,
        })
    }

    async fn run(&self, direction: Direction, target: Option<Version>) -> RunResult {
        let started = Instant::now();
        let mut result = RunResult::new(direction);

        info!(
            direction = %direction,
            target = %target.map(|v| v.to_string()).unwrap_or_else(|| "latest".to_string()),
            units = self.units.len(),
            provider = self.provider.name(),
            "Starting migration run"
        );

        let mut conn = match self.provider.open_connection().await {
            Ok(conn) => conn,
            Err(e) => {
                error!(error = %e, "Could not open migration connection");
                result.abort(None, e);
                return self.finish(result, started);
            }
        };

        let owner = Uuid::new_v4().to_string();
        match self.initialize(conn.as_mut(), &owner).await {
            Ok(()) => {
                self.resolve_and_execute(conn.as_mut(), &mut result, direction, target)
                    .await;
                if self.config.use_advisory_lock {
                    self.release_lock(conn.as_mut(), &owner).await;
                }
            }
            Err(e) => {
                error!(error = %e, "Migration run could not start");
                result.abort(None, e);
            }
        }

        close_quietly(conn).await;
        self.finish(result, started)
    }

    async fn initialize(&self, conn: &mut dyn Connection, owner: &str) -> MigrationResult<()> {
        self.history.ensure_schema(conn.as_executor()).await?;

        if self.config.use_advisory_lock {
            self.lock.ensure_schema(conn.as_executor()).await?;
            let backoff = Backoff::new(self.config.lock_poll_interval);
            self.lock
                .acquire(
                    conn.as_executor(),
                    owner,
                    self.config.lock_timeout,
                    &backoff,
                    &self.cancel,
                )
                .await?;
        }

        Ok(())
    }

    async fn resolve_and_execute(
        &self,
        conn: &mut dyn Connection,
        result: &mut RunResult,
        direction: Direction,
        target: Option<Version>,
    ) {
        result.transition(RunState::Resolving);
        let plan = match self.resolve(conn.as_executor(), direction, target).await {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "Migration plan rejected");
                result.abort(None, e);
                return;
            }
        };

        debug!(planned = plan.len(), "Migration plan resolved");
        result.transition(RunState::Executing);

        for unit in plan {
            if self.cancel.is_cancelled() {
                warn!(applied = result.applied.len(), "Migration run cancelled between units");
                result.abort(None, MigrationError::Cancelled);
                return;
            }

            let version = unit.version();
            let unit_started = Instant::now();
            match self.execute_unit(conn, unit, direction).await {
                Ok(()) => {
                    info!(
                        version = %version,
                        comment = unit.comment(),
                        direction = %direction,
                        duration_ms = unit_started.elapsed().as_millis() as u64,
                        "Migration unit completed"
                    );
                    result.applied.push(version);
                }
                Err(e) => {
                    let duration = unit_started.elapsed();
                    error!(
                        version = %version,
                        comment = unit.comment(),
                        direction = %direction,
                        error = %e,
                        "Migration unit failed"
                    );
                    if let Err(record_err) = self.record_failure(unit, direction, duration, &e).await {
                        error!(version = %version, error = %record_err, "Could not record migration failure");
                    }
                    result.abort(Some(version), e);
                    return;
                }
            }
        }

        result.transition(RunState::Completed);
    }

    /// Consistency checks and the ordered plan for one run
    async fn resolve(
        &self,
        executor: &mut dyn Executor,
        direction: Direction,
        target: Option<Version>,
    ) -> MigrationResult<Vec<&MigrationUnit>> {
        check_unique(&self.units)?;

        let records = self.history.applied_records(executor).await?;
        self.check_history(&records)?;

        let applied: BTreeSet<Version> = records.keys().copied().collect();
        match direction {
            Direction::Up => Ok(plan_upgrade(&self.units, &applied, target)),
            Direction::Down => plan_downgrade(&self.units, &applied, target),
        }
    }

    fn check_history(&self, records: &BTreeMap<Version, HistoryRecord>) -> MigrationResult<()> {
        for (version, record) in records {
            let unit = self
                .find_unit(*version)
                .ok_or(MigrationError::OutOfOrderHistory(*version))?;

            if !self.config.validate_checksums {
                continue;
            }
            if let (Some(recorded), Some(current)) = (record.checksum.as_deref(), unit.checksum()) {
                if recorded != current {
                    return Err(MigrationError::ChecksumMismatch {
                        version: *version,
                        recorded: recorded.to_string(),
                        current,
                    });
                }
            }
        }
        Ok(())
    }

    async fn execute_unit(
        &self,
        conn: &mut dyn Connection,
        unit: &MigrationUnit,
        direction: Direction,
    ) -> MigrationResult<()> {
        let started = Instant::now();
        match unit.mode() {
            ExecutionMode::Transactional => {
                let mut tx = conn.begin_transaction().await?;
                let applied = self
                    .apply_and_record(tx.as_executor(), unit, direction, started)
                    .await;
                match applied {
                    Ok(()) => tx.commit().await,
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            warn!(version = %unit.version(), error = %rollback_err, "Rollback failed");
                        }
                        Err(e)
                    }
                }
            }
            ExecutionMode::NonTransactional => {
                self.apply_and_record(conn.as_executor(), unit, direction, started)
                    .await
            }
        }
    }

    /// Run the unit's action and append its history record on the same executor
    async fn apply_and_record(
        &self,
        executor: &mut dyn Executor,
        unit: &MigrationUnit,
        direction: Direction,
        started: Instant,
    ) -> MigrationResult<()> {
        match direction {
            Direction::Up => {
                unit.upgrade(executor).await?;
                let checksum = unit.checksum();
                self.history
                    .record_applied(
                        executor,
                        unit.version(),
                        unit.comment(),
                        started.elapsed(),
                        checksum.as_deref(),
                    )
                    .await
            }
            Direction::Down => {
                unit.downgrade(executor).await?;
                self.history
                    .record_reverted(executor, unit.version(), unit.comment(), started.elapsed())
                    .await
            }
        }
    }

    /// Append a failed record on a fresh connection
    async fn record_failure(
        &self,
        unit: &MigrationUnit,
        direction: Direction,
        duration: Duration,
        cause: &MigrationError,
    ) -> MigrationResult<()> {
        let mut conn = self.provider.open_connection().await?;
        let recorded = self
            .history
            .record_failed(
                conn.as_executor(),
                unit.version(),
                unit.comment(),
                direction,
                duration,
                cause,
            )
            .await;
        close_quietly(conn).await;
        recorded
    }

    async fn release_lock(&self, conn: &mut dyn Connection, owner: &str) {
        match self.lock.release(conn.as_executor(), owner).await {
            Ok(true) => debug!(table = %self.lock.table(), owner, "Migration lock released"),
            Ok(false) => warn!(table = %self.lock.table(), owner, "Migration lock was no longer held"),
            Err(e) => warn!(table = %self.lock.table(), owner, error = %e, "Failed to release migration lock"),
        }
    }

    fn finish(&self, mut result: RunResult, started: Instant) -> RunResult {
        result.elapsed = started.elapsed();
        result.skipped = self.units.len().saturating_sub(result.applied.len());

        if result.is_success() {
            info!(
                direction = %result.direction,
                applied = result.applied.len(),
                skipped = result.skipped,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Migration run completed"
            );
        } else {
            error!(
                direction = %result.direction,
                applied = result.applied.len(),
                failed_version = %result.failed_version().map(|v| v.to_string()).unwrap_or_default(),
                "Migration run aborted"
            );
        }
        result
    }

    fn find_unit(&self, version: Version) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by_key(&version, |unit| unit.version())
            .ok()
            .map(|index| &self.units[index])
    }
}

async fn close_quietly(conn: Box<dyn Connection>) {
    if let Err(e) = conn.close().await {
        warn!(error = %e, "Failed to close migration connection");
    }
}

/// Reject unit sets where two units share a version. `units` must be sorted.
fn check_unique(units: &[MigrationUnit]) -> MigrationResult<()> {
    match units.windows(2).find(|pair| pair[0].version() == pair[1].version()) {
        Some(pair) => Err(MigrationError::DuplicateVersion(pair[0].version())),
        None => Ok(()),
    }
}

/// Unapplied units in ascending order. With a target, only units above the
/// highest applied version and at or below the target.
fn plan_upgrade<'a>(
    units: &'a [MigrationUnit],
    applied: &BTreeSet<Version>,
    target: Option<Version>,
) -> Vec<&'a MigrationUnit> {
    let high_water = applied.iter().next_back().copied();

    units
        .iter()
        .filter(|unit| !applied.contains(&unit.version()))
        .filter(|unit| match target {
            Some(target) => {
                unit.version() <= target && high_water.map_or(true, |hw| unit.version() > hw)
            }
            None => true,
        })
        .collect()
}

/// Applied units above `target` in descending order. Fails with
/// `NotReversible` if any of them has no downgrade action.
fn plan_downgrade<'a>(
    units: &'a [MigrationUnit],
    applied: &BTreeSet<Version>,
    target: Option<Version>,
) -> MigrationResult<Vec<&'a MigrationUnit>> {
    let plan: Vec<&MigrationUnit> = units
        .iter()
        .rev()
        .filter(|unit| applied.contains(&unit.version()))
        .filter(|unit| target.map_or(true, |target| unit.version() > target))
        .collect();

    if let Some(unit) = plan.iter().find(|unit| !unit.is_reversible()) {
        return Err(MigrationError::NotReversible(unit.version()));
    }

    Ok(plan)
}
