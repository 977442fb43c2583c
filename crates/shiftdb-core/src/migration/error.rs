//! Migration-specific error types.

use super::id::MigrationId;
use crate::catalog::FieldSpecError;
use std::path::PathBuf;
use thiserror::Error;

fn join_ids(ids: &[MigrationId]) -> String {
    ids.iter()
        .map(|id| id.as_str())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Migration-specific errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A node depends on an identifier that is not in the graph.
    #[error("migration {migration} depends on unknown migration {dependency}")]
    UnknownDependency {
        /// The node declaring the dependency.
        migration: MigrationId,
        /// The missing dependency.
        dependency: MigrationId,
    },

    /// The dependency graph has a cycle.
    #[error("cyclic dependency: {}", join_ids(cycle))]
    CyclicDependency {
        /// Identifiers on the cycle, in dependency order.
        cycle: Vec<MigrationId>,
    },

    /// Two nodes share an identifier.
    #[error("duplicate migration {id}")]
    DuplicateMigration {
        /// The repeated identifier.
        id: MigrationId,
    },

    /// An identifier does not follow `<sequence>_<slug>`.
    #[error("invalid migration identifier {id:?}: {reason}")]
    InvalidMigrationId {
        /// The rejected identifier.
        id: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// An applied migration depends on one that is not applied.
    #[error("migration {migration} is applied but its dependency {dependency} is not")]
    InconsistentHistory {
        /// The applied node.
        migration: MigrationId,
        /// Its unapplied dependency.
        dependency: MigrationId,
    },

    /// The application record names a node absent from the graph.
    #[error("applied migration {migration} is not in the migration graph")]
    AppliedMigrationMissing {
        /// The recorded identifier.
        migration: String,
    },

    /// The requested migration is not applied or not known.
    #[error("migration {migration} is not applied")]
    UnknownMigration {
        /// The requested identifier.
        migration: String,
    },

    /// A node changed after it was applied.
    #[error("migration {migration} changed after it was applied (recorded {recorded}, now {current})")]
    ChecksumMismatch {
        /// The edited node.
        migration: MigrationId,
        /// Checksum stored when applied.
        recorded: String,
        /// Checksum of the node as loaded now.
        current: String,
    },

    /// The record type does not exist.
    #[error("record type {record_type} not found")]
    RecordTypeNotFound {
        /// The missing record type.
        record_type: String,
    },

    /// The record type already exists.
    #[error("record type {record_type} already exists")]
    RecordTypeAlreadyExists {
        /// The existing record type.
        record_type: String,
    },

    /// The field does not exist on the record type.
    #[error("field {record_type}.{field} not found")]
    FieldNotFound {
        /// The record type searched.
        record_type: String,
        /// The missing field.
        field: String,
    },

    /// The field already exists on the record type.
    #[error("field {record_type}.{field} already exists")]
    FieldAlreadyExists {
        /// The record type.
        record_type: String,
        /// The existing field.
        field: String,
    },

    /// A field definition is invalid.
    #[error("invalid field {record_type}.{field}: {reason}")]
    InvalidFieldSpec {
        /// The record type.
        record_type: String,
        /// The field.
        field: String,
        /// The validation failure.
        #[source]
        reason: FieldSpecError,
    },

    /// A bitfield change would reinterpret stored values.
    #[error("incompatible bitfield change on {record_type}.{field}: {reason}")]
    IncompatibleBitfieldChange {
        /// The record type.
        record_type: String,
        /// The bitfield.
        field: String,
        /// What breaks.
        reason: String,
    },

    /// A node has an operation without an inverse.
    #[error("migration {migration} cannot be reversed: operation {operation_index} has no inverse")]
    IrreversibleMigration {
        /// The node being reversed.
        migration: MigrationId,
        /// Index of the irreversible operation.
        operation_index: usize,
    },

    /// Another runner holds the migration lock.
    #[error("migration lock held by {holder} since {acquired_at}")]
    MigrationLocked {
        /// The current holder.
        holder: String,
        /// When the holder acquired it (microseconds since epoch).
        acquired_at: u64,
    },

    /// An operation of a node failed; the node was rolled back.
    #[error("migration {migration} failed at operation {operation_index}: {source}")]
    OperationFailed {
        /// The failing node.
        migration: MigrationId,
        /// Index of the failing operation.
        operation_index: usize,
        /// The underlying failure.
        source: Box<MigrationError>,
    },

    /// A declaration file could not be read or parsed.
    #[error("invalid declaration {}: {message}", path.display())]
    Declaration {
        /// The declaration file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl MigrationError {
    /// Stable, machine-readable error kind.
    ///
    /// `OperationFailed` reports the kind of its source.
    pub fn kind(&self) -> &'static str {
        match self {
            MigrationError::UnknownDependency { .. } => "unknown_dependency",
            MigrationError::CyclicDependency { .. } => "cyclic_dependency",
            MigrationError::DuplicateMigration { .. } => "duplicate_migration",
            MigrationError::InvalidMigrationId { .. } => "invalid_migration_id",
            MigrationError::InconsistentHistory { .. } => "inconsistent_history",
            MigrationError::AppliedMigrationMissing { .. } => "applied_migration_missing",
            MigrationError::UnknownMigration { .. } => "unknown_migration",
            MigrationError::ChecksumMismatch { .. } => "checksum_mismatch",
            MigrationError::RecordTypeNotFound { .. } => "record_type_not_found",
            MigrationError::RecordTypeAlreadyExists { .. } => "record_type_already_exists",
            MigrationError::FieldNotFound { .. } => "field_not_found",
            MigrationError::FieldAlreadyExists { .. } => "field_already_exists",
            MigrationError::InvalidFieldSpec { .. } => "invalid_field_spec",
            MigrationError::IncompatibleBitfieldChange { .. } => "incompatible_bitfield_change",
            MigrationError::IrreversibleMigration { .. } => "irreversible_migration",
            MigrationError::MigrationLocked { .. } => "migration_locked",
            MigrationError::OperationFailed { source, .. } => source.kind(),
            MigrationError::Declaration { .. } => "declaration",
            MigrationError::Storage(_) => "storage",
            MigrationError::Serialization(_) => "serialization",
            MigrationError::Deserialization(_) => "deserialization",
        }
    }

    /// The migration the error is about, if any.
    pub fn migration(&self) -> Option<&MigrationId> {
        match self {
            MigrationError::UnknownDependency { migration, .. }
            | MigrationError::InconsistentHistory { migration, .. }
            | MigrationError::ChecksumMismatch { migration, .. }
            | MigrationError::IrreversibleMigration { migration, .. }
            | MigrationError::OperationFailed { migration, .. } => Some(migration),
            MigrationError::DuplicateMigration { id } => Some(id),
            MigrationError::CyclicDependency { cycle } => cycle.first(),
            _ => None,
        }
    }

    /// Index of the operation the error is about, if any.
    pub fn operation_index(&self) -> Option<usize> {
        match self {
            MigrationError::IrreversibleMigration {
                operation_index, ..
            }
            | MigrationError::OperationFailed {
                operation_index, ..
            } => Some(*operation_index),
            _ => None,
        }
    }

    /// Attach the failing node and operation index.
    pub(crate) fn at_operation(self, migration: &MigrationId, operation_index: usize) -> Self {
        MigrationError::OperationFailed {
            migration: migration.clone(),
            operation_index,
            source: Box::new(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> MigrationId {
        raw.parse().unwrap()
    }

    #[test]
    fn test_cycle_display_lists_nodes() {
        let err = MigrationError::CyclicDependency {
            cycle: vec![id("0001_a"), id("0002_b")],
        };
        assert_eq!(err.to_string(), "cyclic dependency: 0001_a -> 0002_b");
        assert_eq!(err.kind(), "cyclic_dependency");
    }

    #[test]
    fn test_operation_failed_reports_source_kind() {
        let err = MigrationError::FieldNotFound {
            record_type: "realm".to_string(),
            field: "authentication_methods".to_string(),
        }
        .at_operation(&id("0395_mero_guru_realm"), 2);

        assert_eq!(err.kind(), "field_not_found");
        assert_eq!(err.operation_index(), Some(2));
        assert_eq!(err.migration().map(|m| m.as_str()), Some("0395_mero_guru_realm"));
        assert!(err.to_string().contains("realm.authentication_methods"));
    }
}
