//! Command handlers

use anyhow::{bail, Context, Result};
use colored::Colorize;
use ladder_config::LadderConfig;
use ladder_storage::sqlite::{SqliteConfig, SqliteProvider};
use ladder_storage::{
    Direction, Migrator, MigrationStatus, Outcome, Provider, RunResult, ScriptDirectory, Version,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Open the configured database and load the script directory
pub async fn build_migrator(config: &LadderConfig) -> Result<(Arc<SqliteProvider>, Migrator)> {
    let units = ScriptDirectory::new(&config.migrations.directory)
        .load()
        .context("Failed to load migration scripts")?;

    let database = &config.database;
    let mut sqlite = SqliteConfig::new(database.url.clone())
        .with_max_connections(database.max_connections)
        .with_busy_timeout(database.busy_timeout())
        .with_journal_mode(database.journal_mode.clone());
    sqlite.connection_timeout = database.connection_timeout;

    let provider = Arc::new(
        SqliteProvider::connect(sqlite)
            .await
            .with_context(|| format!("Failed to connect to {}", database.url))?,
    );

    let migrator = Migrator::new(provider.clone(), units, config.migrations.migrator.clone())
        .context("Invalid migrator configuration")?;

    Ok((provider, migrator))
}

/// Cancel the run between units on Ctrl-C
fn cancel_on_ctrl_c(migrator: &Migrator) -> tokio::task::JoinHandle<()> {
    let token = migrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current migration");
            token.cancel();
        }
    })
}

pub async fn migrate(migrator: &Migrator, target: Option<Version>) -> Result<()> {
    let signal = cancel_on_ctrl_c(migrator);
    let result = migrator.migrate_safe(target).await;
    signal.abort();

    print_run_result(&result);
    finish_run(result)
}

pub async fn downgrade(migrator: &Migrator, target: Version) -> Result<()> {
    let signal = cancel_on_ctrl_c(migrator);
    let result = migrator.downgrade_safe(target).await;
    signal.abort();

    print_run_result(&result);
    finish_run(result)
}

fn finish_run(result: RunResult) -> Result<()> {
    match result.into_result() {
        Ok(_) => Ok(()),
        Err(e) => bail!(e),
    }
}

pub async fn status(migrator: &Migrator) -> Result<()> {
    let status = migrator.status().await.context("Failed to read migration status")?;
    print_status(&status);
    Ok(())
}

pub async fn current(migrator: &Migrator) -> Result<()> {
    match migrator.current_version().await.context("Failed to read current version")? {
        Some(version) => println!("{}", version),
        None => println!("none"),
    }
    Ok(())
}

pub async fn history(migrator: &Migrator) -> Result<()> {
    let records = migrator.history().await.context("Failed to read migration history")?;

    if records.is_empty() {
        println!("No migrations have been run.");
        return Ok(());
    }

    println!(
        "  {:>5}  {:10}  {:30}  {:4}  {:9}  {:>8}  {}",
        "Id", "Version", "Comment", "Dir", "Outcome", "Ms", "Applied at"
    );
    println!(
        "  {:->5}  {:-<10}  {:-<30}  {:-<4}  {:-<9}  {:->8}  {:-<20}",
        "", "", "", "", "", "", ""
    );

    for record in &records {
        let outcome = match record.outcome {
            Outcome::Success => record.outcome.as_str().green(),
            Outcome::Failed => record.outcome.as_str().red(),
            Outcome::Reverted => record.outcome.as_str().yellow(),
        };
        println!(
            "  {:>5}  {:10}  {:30}  {:4}  {:9}  {:>8}  {}",
            record.id,
            record.version.to_string(),
            record.comment,
            record.direction.as_str(),
            outcome,
            record.duration.as_millis(),
            record.applied_at.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = &record.error {
            println!("         {}", error.dimmed());
        }
    }

    Ok(())
}

pub async fn unlock(migrator: &Migrator) -> Result<()> {
    if migrator.force_unlock().await.context("Failed to release migration lock")? {
        println!("{}", "Migration lock released.".green());
    } else {
        println!("No migration lock was held.");
    }
    Ok(())
}

pub async fn close(provider: &SqliteProvider) {
    if let Err(e) = provider.close().await {
        warn!("Failed to close database pool: {}", e);
    }
}

fn print_run_result(result: &RunResult) {
    let verb = match result.direction {
        Direction::Up => "Applied",
        Direction::Down => "Reverted",
    };

    for version in &result.applied {
        println!("  {} {}", "✓".green(), version);
    }

    if result.is_success() {
        if result.applied.is_empty() {
            println!("{}", "Database is up to date.".green());
        } else {
            println!(
                "{}",
                format!(
                    "{} {} migration(s) in {} ms",
                    verb,
                    result.applied.len(),
                    result.elapsed.as_millis()
                )
                .green()
            );
        }
        info!(applied = result.applied.len(), "Run finished");
        return;
    }

    if let Some(failure) = &result.failure {
        let at = failure
            .version
            .map(|v| format!(" at {}", v))
            .unwrap_or_default();
        println!(
            "  {} {}",
            "✗".red(),
            format!("Run aborted{} during {}: {}", at, failure.state, failure.error).red()
        );
    }
    println!(
        "{} migration(s) {} before the run stopped",
        result.applied.len(),
        verb.to_lowercase()
    );
}

fn print_status(status: &MigrationStatus) {
    println!();
    println!("  {}", "Database Migrations".bold());
    println!();

    match status.current {
        Some(version) => println!("  Current version: {}", version.to_string().cyan()),
        None => println!("  Current version: {}", "none".dimmed()),
    }
    if let Some(holder) = &status.locked_by {
        let since = holder
            .acquired_at
            .map(|t| format!(" since {}", t.format("%Y-%m-%d %H:%M:%S")))
            .unwrap_or_default();
        println!("  {} held by {}{}", "Lock".yellow(), holder.owner, since);
    }
    println!();

    if status.units.is_empty() {
        println!("  No migrations found.");
        println!();
        return;
    }

    println!("  {:10}  {:30}  {:10}  {}", "Version", "Comment", "Status", "Reversible");
    println!("  {:-<10}  {:-<30}  {:-<10}  {:-<10}", "", "", "", "");

    for unit in &status.units {
        let state = if unit.applied {
            "applied".green()
        } else {
            "pending".yellow()
        };
        let reversible = if unit.reversible { "yes" } else { "no" };
        println!(
            "  {:10}  {:30}  {:10}  {}",
            unit.version.to_string(),
            unit.comment,
            state,
            reversible
        );
    }

    for version in &status.orphaned {
        println!(
            "  {:10}  {:30}  {}",
            version.to_string(),
            "(missing script)".dimmed(),
            "orphaned".red()
        );
    }

    println!();
    let applied = status.units.len() - status.pending_count();
    println!(
        "  {} applied, {} pending",
        applied.to_string().green(),
        status.pending_count().to_string().yellow()
    );
    println!();
}
