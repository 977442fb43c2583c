//! Command-line arguments and the configuration derived from them.

use crate::formatter::OutputFormat;
use clap::{Parser, Subcommand};
use shiftdb_core::{RunnerConfig, StorageConfig};
use std::path::PathBuf;
use std::time::Duration;

/// Default database directory.
pub const DEFAULT_DATA_PATH: &str = "./shiftdb_data";

/// Default directory of migration declarations.
pub const DEFAULT_MIGRATIONS_PATH: &str = "./migrations";

/// Identifier accepted by `rollback` to reverse everything.
pub const ROLLBACK_ALL_TARGET: &str = "zero";

/// shiftdb command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "shiftdb")]
#[command(version, about = "Apply and roll back shiftdb schema migrations")]
pub struct Args {
    /// Path to the database directory.
    #[arg(short, long, global = true, default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Directory containing migration declaration files.
    #[arg(short, long, global = true, default_value = DEFAULT_MIGRATIONS_PATH)]
    pub migrations: PathBuf,

    /// Output format.
    #[arg(long, global = true, default_value = "table", value_enum)]
    pub format: OutputFormat,

    /// Seconds to wait for a held migration lock (fail immediately if unset).
    #[arg(long, global = true)]
    pub lock_wait: Option<u64>,

    /// Skip checksum verification of applied migrations.
    #[arg(long, global = true)]
    pub no_verify_checksums: bool,

    /// Page cache size in MB.
    #[arg(long, global = true, default_value_t = 64)]
    pub cache_mb: u64,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Apply every pending migration.
    Apply {
        /// Validate the plan without writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Reverse migrations applied after the target (`zero` reverses all).
    Rollback {
        /// Migration identifier to roll back to, or `zero`.
        target: String,
    },
    /// Show applied and pending migrations.
    Status,
    /// Print the live schema.
    Schema,
    /// Clear a migration lock left behind by a crashed process.
    Unlock,
}

/// Everything a command needs to run.
#[derive(Debug, Clone)]
pub struct CliConfig {
    /// Database configuration.
    pub storage: StorageConfig,
    /// Runner configuration.
    pub runner: RunnerConfig,
    /// Directory of declaration files.
    pub migrations: PathBuf,
    /// Output format.
    pub format: OutputFormat,
    /// Command to run.
    pub command: Command,
}

impl Args {
    /// Convert command-line arguments to configuration.
    pub fn into_config(self) -> CliConfig {
        let storage =
            StorageConfig::new(self.data_path).with_cache_capacity(self.cache_mb * 1024 * 1024);

        let mut runner = RunnerConfig::default();
        if let Some(secs) = self.lock_wait {
            runner = runner.with_lock_wait(Duration::from_secs(secs));
        }
        if self.no_verify_checksums {
            runner = runner.without_checksum_verification();
        }
        if let Command::Apply { dry_run } = self.command {
            runner = runner.with_dry_run(dry_run);
        }

        CliConfig {
            storage,
            runner,
            migrations: self.migrations,
            format: self.format,
            command: self.command,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Args::try_parse_from(["shiftdb", "status"])
            .unwrap()
            .into_config();
        assert_eq!(config.storage.path, PathBuf::from(DEFAULT_DATA_PATH));
        assert_eq!(config.migrations, PathBuf::from(DEFAULT_MIGRATIONS_PATH));
        assert_eq!(config.format, OutputFormat::Table);
        assert_eq!(config.runner.lock_wait, None);
        assert!(config.runner.verify_checksums);
        assert_eq!(config.command, Command::Status);
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let config = Args::try_parse_from([
            "shiftdb",
            "apply",
            "--dry-run",
            "--data-path",
            "/var/lib/shiftdb",
            "--lock-wait",
            "10",
            "--no-verify-checksums",
            "--format",
            "json",
        ])
        .unwrap()
        .into_config();

        assert!(config.runner.dry_run);
        assert_eq!(config.runner.lock_wait, Some(Duration::from_secs(10)));
        assert!(!config.runner.verify_checksums);
        assert_eq!(config.format, OutputFormat::Json);
        assert_eq!(config.storage.path, PathBuf::from("/var/lib/shiftdb"));
    }

    #[test]
    fn test_rollback_requires_target() {
        assert!(Args::try_parse_from(["shiftdb", "rollback"]).is_err());
        let config = Args::try_parse_from(["shiftdb", "rollback", "zero"])
            .unwrap()
            .into_config();
        assert_eq!(
            config.command,
            Command::Rollback {
                target: ROLLBACK_ALL_TARGET.to_string()
            }
        );
    }
}
