use anyhow::{Context, Result};
use clap::Parser;
use ladder_config::{ConfigLoader, LadderConfig, LogFormat, LoggingConfig};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::{Cli, Commands};

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<LadderConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => loader
            .from_file(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path)),
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Command-line flags win over file and environment settings
fn apply_cli_overrides(config: &mut LadderConfig, cli: &Cli) {
    if let Some(url) = &cli.database_url {
        config.database.url = url.clone();
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations.directory = dir.to_string_lossy().into_owned();
    }
}

/// Build the log filter: `--log-level`, then `RUST_LOG`, then the configured level
fn build_env_filter(log_level: Option<&String>, logging: &LoggingConfig) -> EnvFilter {
    match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", level);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str())),
    }
}

/// Initialize tracing on stderr so command output on stdout stays clean
fn init_logging(log_level: Option<&String>, logging: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(log_level, logging);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    let initialized = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    initialized.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    debug!("Tracing initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    apply_cli_overrides(&mut config, &cli);

    init_logging(cli.log_level.as_ref(), &config.logging)?;
    info!("Ladder CLI starting");

    let (provider, migrator) = commands::build_migrator(&config).await?;

    let outcome = match cli.command {
        Commands::Migrate { target } => commands::migrate(&migrator, target).await,
        Commands::Downgrade { target } => commands::downgrade(&migrator, target).await,
        Commands::Status => commands::status(&migrator).await,
        Commands::Current => commands::current(&migrator).await,
        Commands::History => commands::history(&migrator).await,
        Commands::Unlock => commands::unlock(&migrator).await,
    };

    commands::close(&provider).await;
    outcome
}
