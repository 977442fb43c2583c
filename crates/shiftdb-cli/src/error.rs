//! CLI error type.

use shiftdb_core::{MigrationError, MigrationId};
use thiserror::Error;

/// Errors surfaced by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Migration failure.
    #[error(transparent)]
    Migration(#[from] MigrationError),

    /// Storage failure outside a migration.
    #[error(transparent)]
    Storage(#[from] shiftdb_core::Error),

    /// Output could not be rendered.
    #[error("failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

impl CliError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            CliError::Migration(e) => e.kind(),
            CliError::Storage(_) => "storage",
            CliError::Output(_) => "output",
        }
    }

    /// The migration the error is about, if any.
    pub fn migration(&self) -> Option<&MigrationId> {
        match self {
            CliError::Migration(e) => e.migration(),
            _ => None,
        }
    }

    /// Index of the failing operation, if any.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            CliError::Migration(e) => e.operation_index(),
            _ => None,
        }
    }
}
