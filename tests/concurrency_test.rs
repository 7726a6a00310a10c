//! Concurrent runs against one database serialize on the advisory lock

mod common;

use anyhow::Result;
use common::v;
use ladder_storage::testing::{ExecutionTrace, TestDatabase, TracedAction};
use ladder_storage::{MigrationError, MigrationUnit, Migrator, MigratorConfig, RunResult};
use std::time::Duration;

fn units(trace: &ExecutionTrace) -> Vec<MigrationUnit> {
    vec![
        MigrationUnit::code(
            v(1, 0),
            "slow create",
            TracedAction::new(trace, "slow")
                .with_delay(Duration::from_millis(300))
                .with_sql("CREATE TABLE shared (id INTEGER PRIMARY KEY)"),
        ),
        MigrationUnit::code(
            v(1, 1),
            "seed",
            TracedAction::new(trace, "seed").with_sql("INSERT INTO shared (id) VALUES (1)"),
        ),
    ]
}

fn config() -> MigratorConfig {
    let mut config = MigratorConfig::default().with_lock_timeout(Duration::from_secs(10));
    config.lock_poll_interval = Duration::from_millis(20);
    config
}

/// Two runs started together execute every unit exactly once
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_runs_apply_each_unit_once() -> Result<()> {
    let db = TestDatabase::new().await?;
    let trace = ExecutionTrace::new();

    let first = Migrator::new(db.another_provider().await?, units(&trace), config())?;
    let second = Migrator::new(db.another_provider().await?, units(&trace), config())?;

    let (a, b) = tokio::join!(first.migrate_safe(None), second.migrate_safe(None));
    let results: Vec<&RunResult> = vec![&a, &b];

    for result in &results {
        assert!(
            result.is_success() || matches!(result.error(), Some(MigrationError::LockTimeout(_))),
            "unexpected outcome: {:?}",
            result.failure
        );
    }

    let applied: usize = results.iter().map(|r| r.applied.len()).sum();
    assert_eq!(applied, 2);
    assert!(results.iter().any(|r| r.applied == vec![v(1, 0), v(1, 1)]));

    let entries = trace.entries().await;
    assert_eq!(entries.iter().filter(|e| *e == "slow").count(), 1);
    assert_eq!(entries.iter().filter(|e| *e == "seed").count(), 1);

    assert_eq!(db.count_records("ladder_history").await?, 2);
    assert_eq!(db.count_records("shared").await?, 1);
    assert!(first.status().await?.locked_by.is_none());
    Ok(())
}

/// A run that cannot get the lock in time fails without touching the schema
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_timeout_while_another_run_holds_lock() -> Result<()> {
    let db = TestDatabase::new().await?;
    let trace = ExecutionTrace::new();

    let holder = Migrator::new(db.another_provider().await?, units(&trace), config())?;
    let impatient_config = MigratorConfig::default().with_lock_timeout(Duration::from_millis(50));
    let impatient = Migrator::new(db.another_provider().await?, units(&trace), impatient_config)?;

    let (held, waited) = tokio::join!(holder.migrate_safe(None), async {
        // Let the first run take the lock and start its slow unit
        tokio::time::sleep(Duration::from_millis(100)).await;
        impatient.migrate_safe(None).await
    });

    assert!(held.is_success());
    assert_eq!(held.applied.len(), 2);

    let err = waited.error().unwrap();
    assert!(matches!(err, MigrationError::LockTimeout(_)));
    assert!(err.is_retryable());
    assert!(waited.applied.is_empty());

    // Once the holder is done the retry has nothing left to do
    let retry = impatient.migrate(None).await?;
    assert!(retry.applied.is_empty());
    assert_eq!(trace.entries().await, vec!["slow", "seed"]);
    Ok(())
}
