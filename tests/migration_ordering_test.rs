//! Version ordering, idempotence and target resolution

mod common;

use anyhow::Result;
use common::{applied_versions, v};
use ladder_storage::testing::{ExecutionTrace, TestDatabase, TracedAction};
use ladder_storage::{MigrationError, MigrationUnit, Migrator, MigratorConfig, Outcome, RunState};

fn traced(trace: &ExecutionTrace, major: u32, minor: u32) -> MigrationUnit {
    let label = format!("{}.{}", major, minor);
    MigrationUnit::code(v(major, minor), format!("unit {}", label), TracedAction::new(trace, label))
}

fn schema_units() -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::sql(
            v(1, 0),
            "create table",
            "CREATE TABLE accounts (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
        )
        .with_downgrade_sql("DROP TABLE accounts"),
        MigrationUnit::sql(v(1, 1), "add column", "ALTER TABLE accounts ADD COLUMN email TEXT")
            .with_downgrade_sql("ALTER TABLE accounts DROP COLUMN email"),
        MigrationUnit::sql(
            v(2, 0),
            "add index",
            "CREATE INDEX idx_accounts_email ON accounts (email)",
        )
        .with_downgrade_sql("DROP INDEX idx_accounts_email"),
    ]
}

/// Units are applied in ascending version order regardless of supply order
#[tokio::test]
async fn test_units_apply_in_ascending_order() -> Result<()> {
    let db = TestDatabase::new().await?;
    let trace = ExecutionTrace::new();
    let units = vec![
        traced(&trace, 2, 0),
        traced(&trace, 1, 10),
        traced(&trace, 1, 0),
        traced(&trace, 1, 2),
        traced(&trace, 0, 9),
    ];

    let migrator = Migrator::new(db.provider.clone(), units, MigratorConfig::default())?;
    let result = migrator.migrate(None).await?;

    assert_eq!(result.state, RunState::Completed);
    assert_eq!(result.applied, vec![v(0, 9), v(1, 0), v(1, 2), v(1, 10), v(2, 0)]);
    assert_eq!(trace.entries().await, vec!["0.9", "1.0", "1.2", "1.10", "2.0"]);
    Ok(())
}

/// A second run with no new units applies nothing
#[tokio::test]
async fn test_migrate_is_idempotent() -> Result<()> {
    let db = TestDatabase::new().await?;
    let migrator = Migrator::new(db.provider.clone(), schema_units(), MigratorConfig::default())?;

    let first = migrator.migrate(None).await?;
    assert_eq!(first.applied_count(), 3);
    assert_eq!(first.skipped, 0);

    let second = migrator.migrate(None).await?;
    assert!(second.is_success());
    assert!(second.applied.is_empty());
    assert_eq!(second.skipped, 3);
    assert!(migrator.pending(None).await?.is_empty());

    assert_eq!(db.count_records("ladder_history").await?, 3);
    Ok(())
}

/// Migrating to 1.1 on an empty database applies 1.0 and 1.1 only
#[tokio::test]
async fn test_migrate_to_target_version() -> Result<()> {
    let db = TestDatabase::new().await?;
    let migrator = Migrator::new(db.provider.clone(), schema_units(), MigratorConfig::default())?;

    let result = migrator.migrate(Some(v(1, 1))).await?;
    assert_eq!(result.applied, vec![v(1, 0), v(1, 1)]);
    assert_eq!(result.skipped, 1);

    let history = migrator.history().await?;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.outcome == Outcome::Success));
    assert_eq!(history[0].version, v(1, 0));
    assert_eq!(history[0].comment, "create table");
    assert_eq!(history[1].version, v(1, 1));
    assert!(history[0].checksum.is_some());

    assert!(db.column_exists("accounts", "email").await?);
    assert_eq!(migrator.current_version().await?, Some(v(1, 1)));

    let status = migrator.status().await?;
    assert!(!status.units[2].applied);
    Ok(())
}

/// Migrating, downgrading and migrating again lands on the same applied set
#[tokio::test]
async fn test_migrate_downgrade_round_trip() -> Result<()> {
    let db = TestDatabase::new().await?;
    let migrator = Migrator::new(db.provider.clone(), schema_units(), MigratorConfig::default())?;

    migrator.migrate(Some(v(2, 0))).await?;
    let after_first = applied_versions(&migrator).await;
    assert_eq!(after_first, vec![v(1, 0), v(1, 1), v(2, 0)]);

    let down = migrator.downgrade(v(1, 0)).await?;
    assert_eq!(down.applied, vec![v(2, 0), v(1, 1)]);
    assert_eq!(applied_versions(&migrator).await, vec![v(1, 0)]);
    assert!(!db.column_exists("accounts", "email").await?);
    assert_eq!(migrator.current_version().await?, Some(v(1, 0)));

    let again = migrator.migrate(Some(v(2, 0))).await?;
    assert_eq!(again.applied, vec![v(1, 1), v(2, 0)]);
    assert_eq!(applied_versions(&migrator).await, after_first);
    assert!(db.column_exists("accounts", "email").await?);

    let outcomes: Vec<Outcome> = migrator.history().await?.iter().map(|r| r.outcome).collect();
    assert_eq!(
        outcomes,
        vec![
            Outcome::Success,
            Outcome::Success,
            Outcome::Success,
            Outcome::Reverted,
            Outcome::Reverted,
            Outcome::Success,
            Outcome::Success,
        ]
    );
    Ok(())
}

/// A target below the current version never triggers a downgrade, and a
/// downgrade to the current version reverts nothing
#[tokio::test]
async fn test_targets_never_reverse_direction() -> Result<()> {
    let db = TestDatabase::new().await?;
    let migrator = Migrator::new(db.provider.clone(), schema_units(), MigratorConfig::default())?;
    migrator.migrate(None).await?;

    let result = migrator.migrate(Some(v(1, 0))).await?;
    assert!(result.is_success());
    assert!(result.applied.is_empty());

    let result = migrator.downgrade(v(2, 0)).await?;
    assert!(result.is_success());
    assert!(result.applied.is_empty());

    assert_eq!(applied_versions(&migrator).await, vec![v(1, 0), v(1, 1), v(2, 0)]);
    Ok(())
}

/// Without a target, gaps below the highest applied version are filled in
#[tokio::test]
async fn test_late_unit_below_high_water_is_applied() -> Result<()> {
    let db = TestDatabase::new().await?;
    let trace = ExecutionTrace::new();

    let migrator = Migrator::new(
        db.provider.clone(),
        vec![traced(&trace, 1, 0), traced(&trace, 2, 0)],
        MigratorConfig::default(),
    )?;
    migrator.migrate(None).await?;

    let migrator = Migrator::new(
        db.provider.clone(),
        vec![traced(&trace, 1, 0), traced(&trace, 1, 5), traced(&trace, 2, 0)],
        MigratorConfig::default(),
    )?;

    // Bounded by a target, nothing at or below the high-water mark is eligible
    assert!(migrator.pending(Some(v(2, 0))).await?.is_empty());

    let result = migrator.migrate(None).await?;
    assert_eq!(result.applied, vec![v(1, 5)]);
    assert_eq!(trace.entries().await, vec!["1.0", "2.0", "1.5"]);
    Ok(())
}

/// History referencing a unit the caller no longer supplies stops the run
/// before anything executes
#[tokio::test]
async fn test_missing_applied_unit_is_rejected() -> Result<()> {
    let db = TestDatabase::new().await?;
    let trace = ExecutionTrace::new();

    let migrator = Migrator::new(
        db.provider.clone(),
        vec![traced(&trace, 1, 0)],
        MigratorConfig::default(),
    )?;
    migrator.migrate(None).await?;

    let migrator = Migrator::new(
        db.provider.clone(),
        vec![traced(&trace, 1, 1), traced(&trace, 2, 0)],
        MigratorConfig::default(),
    )?;
    let result = migrator.migrate_safe(None).await;

    assert_eq!(result.state, RunState::Aborted);
    assert!(matches!(
        result.error(),
        Some(MigrationError::OutOfOrderHistory(version)) if *version == v(1, 0)
    ));
    assert_eq!(result.failure.as_ref().map(|f| f.state), Some(RunState::Resolving));
    assert!(result.applied.is_empty());
    assert_eq!(trace.entries().await, vec!["1.0"]);
    assert_eq!(db.count_records("ladder_history").await?, 1);

    let status = migrator.status().await?;
    assert_eq!(status.orphaned, vec![v(1, 0)]);
    Ok(())
}

/// A custom history table name is honored
#[tokio::test]
async fn test_custom_history_table() -> Result<()> {
    let db = TestDatabase::new().await?;
    let config = MigratorConfig::default().with_table_name("schema_versions");
    let migrator = Migrator::new(db.provider.clone(), schema_units(), config)?;

    migrator.migrate(None).await?;

    assert!(db.table_exists("schema_versions").await?);
    assert!(db.table_exists("schema_versions_lock").await?);
    assert!(!db.table_exists("ladder_history").await?);
    assert_eq!(db.count_records("schema_versions").await?, 3);
    Ok(())
}
