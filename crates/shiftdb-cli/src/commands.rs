//! Command dispatch.

use crate::config::{CliConfig, Command, ROLLBACK_ALL_TARGET};
use crate::error::CliError;
use crate::formatter::Formatter;
use shiftdb_core::{MigrationGraph, MigrationId, MigrationLock, MigrationRunner, SledColumnStore};

/// Run a command and return its rendered output.
pub fn run(config: CliConfig, formatter: &dyn Formatter) -> Result<String, CliError> {
    let db = config
        .storage
        .open_for_migration(config.runner.lock_wait, config.runner.lock_poll_interval)?;

    let output = match &config.command {
        Command::Apply { dry_run } => {
            let graph = load_graph(&config)?;
            let applied = open_runner(&graph, &db, &config)?.apply_all()?;
            let action = if *dry_run { "planned" } else { "applied" };
            formatter.format_migrations(action, &applied)?
        }
        Command::Rollback { target } => {
            let graph = load_graph(&config)?;
            let mut runner = open_runner(&graph, &db, &config)?;
            let reverted = if target == ROLLBACK_ALL_TARGET {
                runner.rollback_all()?
            } else {
                runner.rollback(&MigrationId::parse(target)?)?
            };
            formatter.format_migrations("reverted", &reverted)?
        }
        Command::Status => {
            let graph = load_graph(&config)?;
            let status = open_runner(&graph, &db, &config)?.status()?;
            formatter.format_status(&status)?
        }
        Command::Schema => {
            let graph = load_graph(&config)?;
            let runner = open_runner(&graph, &db, &config)?;
            formatter.format_schema(runner.registry())?
        }
        Command::Unlock => {
            let released = MigrationLock::open(&db)?.force_release()?;
            if let Some(record) = &released {
                tracing::warn!(owner = %record.owner, "cleared migration lock");
            }
            formatter.format_unlock(released.as_ref())?
        }
    };

    db.flush().map_err(shiftdb_core::Error::from)?;
    Ok(output)
}

fn load_graph(config: &CliConfig) -> Result<MigrationGraph, CliError> {
    let graph = MigrationGraph::load_dir(&config.migrations)?;
    tracing::info!(
        migrations = graph.len(),
        leaves = graph.leaves().len(),
        path = %config.migrations.display(),
        "loaded migration graph"
    );
    Ok(graph)
}

fn open_runner<'g>(
    graph: &'g MigrationGraph,
    db: &sled::Db,
    config: &CliConfig,
) -> Result<MigrationRunner<'g, SledColumnStore>, CliError> {
    let store = SledColumnStore::open(db)?;
    Ok(MigrationRunner::open(graph, db, store, config.runner.clone())?)
}
