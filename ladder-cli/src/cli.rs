//! CLI argument parsing definitions

use clap::{Parser, Subcommand};
use ladder_storage::Version;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Database URL, overriding the configuration
    #[arg(long, value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Directory containing migration scripts, overriding the configuration
    #[arg(long, value_name = "PATH", global = true)]
    pub migrations_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply pending migrations
    Migrate {
        /// Stop after this version (major.minor)
        #[arg(long, value_name = "VERSION")]
        target: Option<Version>,
    },

    /// Revert applied migrations above a version
    Downgrade {
        /// Version to return to (major.minor); use 0.0 to revert everything
        #[arg(long, value_name = "VERSION")]
        target: Version,
    },

    /// Show applied and pending migrations
    Status,

    /// Print the current schema version
    Current,

    /// Print the migration history
    History,

    /// Remove a stale migration lock left by a crashed run
    Unlock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_migrate_with_target() {
        let cli = Cli::try_parse_from(["ladder", "migrate", "--target", "1.1"]).unwrap();
        match cli.command {
            Commands::Migrate { target } => assert_eq!(target, Some(Version::new(1, 1))),
            _ => panic!("expected migrate"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ladder",
            "status",
            "--database-url",
            "sqlite://app.db",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Status));
        assert_eq!(cli.database_url.as_deref(), Some("sqlite://app.db"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_downgrade_requires_target() {
        assert!(Cli::try_parse_from(["ladder", "downgrade"]).is_err());
        assert!(Cli::try_parse_from(["ladder", "downgrade", "--target", "x"]).is_err());
    }
}
