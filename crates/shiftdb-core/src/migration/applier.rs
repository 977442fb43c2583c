//! Operation applier.
//!
//! Applies one [`Operation`] to a [`SchemaRegistry`] and returns the storage
//! directives that make the same change physically. Every check runs before
//! the registry is touched, so a failed operation leaves it unchanged.

use super::error::MigrationError;
use super::operation::Operation;
use crate::catalog::{FieldKind, FieldSpec, RecordTypeSpec, SchemaRegistry};
use crate::storage::{ColumnDef, ColumnMeta, ColumnType, StorageDirective, TableLayout};

/// Translates schema operations into registry changes and storage directives.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationApplier {
    allow_breaking: bool,
}

impl OperationApplier {
    /// Create an applier that enforces bitfield compatibility.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept breaking bitfield changes regardless of the operation's flag.
    ///
    /// Used when replaying inverses on rollback.
    pub fn allow_breaking(mut self) -> Self {
        self.allow_breaking = true;
        self
    }

    /// Apply an operation, returning the directives to write in order.
    pub fn apply(
        &self,
        op: &Operation,
        registry: &mut SchemaRegistry,
    ) -> Result<Vec<StorageDirective>, MigrationError> {
        match op {
            Operation::CreateRecordType { name, fields } => {
                if registry.contains(name) {
                    return Err(MigrationError::RecordTypeAlreadyExists {
                        record_type: name.clone(),
                    });
                }
                let mut spec = RecordTypeSpec::new(name.clone());
                for field in fields {
                    validate_field(name, field)?;
                    if spec.insert_field(field.clone()).is_some() {
                        return Err(MigrationError::FieldAlreadyExists {
                            record_type: name.clone(),
                            field: field.name.clone(),
                        });
                    }
                }
                let table = table_layout(&spec);
                registry.insert(spec);
                Ok(vec![StorageDirective::CreateTable { table }])
            }

            Operation::DeleteRecordType { name } => {
                let spec = registry
                    .remove(name)
                    .ok_or_else(|| record_type_not_found(name))?;
                Ok(vec![StorageDirective::DropTable {
                    table: table_layout(&spec),
                }])
            }

            Operation::AddField { record_type, field } => {
                let spec = registry
                    .get_mut(record_type)
                    .ok_or_else(|| record_type_not_found(record_type))?;
                if spec.has_field(&field.name) {
                    return Err(MigrationError::FieldAlreadyExists {
                        record_type: record_type.clone(),
                        field: field.name.clone(),
                    });
                }
                validate_field(record_type, field)?;
                spec.insert_field(field.clone());
                Ok(vec![StorageDirective::AddColumn {
                    table: record_type.clone(),
                    column: column_def(field),
                }])
            }

            Operation::RemoveField { record_type, name } => {
                let spec = registry
                    .get_mut(record_type)
                    .ok_or_else(|| record_type_not_found(record_type))?;
                let removed = spec
                    .remove_field(name)
                    .ok_or_else(|| field_not_found(record_type, name))?;
                Ok(vec![StorageDirective::DropColumn {
                    table: record_type.clone(),
                    column: column_def(&removed),
                }])
            }

            Operation::AlterField {
                record_type,
                field,
                allow_breaking,
            } => {
                let spec = registry
                    .get_mut(record_type)
                    .ok_or_else(|| record_type_not_found(record_type))?;
                let current = spec
                    .field(&field.name)
                    .ok_or_else(|| field_not_found(record_type, &field.name))?;
                validate_field(record_type, field)?;

                if let Some(reason) = breaking_change(current, field) {
                    if !(*allow_breaking || self.allow_breaking) {
                        return Err(MigrationError::IncompatibleBitfieldChange {
                            record_type: record_type.clone(),
                            field: field.name.clone(),
                            reason,
                        });
                    }
                    tracing::warn!(
                        record_type = %record_type,
                        field = %field.name,
                        %reason,
                        "applying breaking bitfield change"
                    );
                }

                let directives = alter_directives(record_type, current, field);
                spec.insert_field(field.clone());
                Ok(directives)
            }

            Operation::RenameField {
                record_type,
                from,
                to,
            } => {
                let spec = registry
                    .get_mut(record_type)
                    .ok_or_else(|| record_type_not_found(record_type))?;
                if !spec.has_field(from) {
                    return Err(field_not_found(record_type, from));
                }
                if spec.has_field(to) {
                    return Err(MigrationError::FieldAlreadyExists {
                        record_type: record_type.clone(),
                        field: to.clone(),
                    });
                }
                if let Some(mut renamed) = spec.remove_field(from) {
                    renamed.name = to.clone();
                    spec.insert_field(renamed);
                }
                Ok(vec![StorageDirective::RenameColumn {
                    table: record_type.clone(),
                    from: from.clone(),
                    to: to.clone(),
                }])
            }

            Operation::RunDirective { forward, .. } => Ok(vec![forward.clone()]),
        }
    }

    /// Derive the operation that undoes `op`, given the schema right before it.
    ///
    /// Returns `None` for a `RunDirective` without a backward directive.
    pub fn inverse(
        &self,
        op: &Operation,
        before: &SchemaRegistry,
    ) -> Result<Option<Operation>, MigrationError> {
        let inverse = match op {
            Operation::CreateRecordType { name, .. } => {
                Operation::DeleteRecordType { name: name.clone() }
            }
            Operation::DeleteRecordType { name } => {
                let spec = before.get(name).ok_or_else(|| record_type_not_found(name))?;
                Operation::CreateRecordType {
                    name: name.clone(),
                    fields: spec.fields().cloned().collect(),
                }
            }
            Operation::AddField { record_type, field } => Operation::RemoveField {
                record_type: record_type.clone(),
                name: field.name.clone(),
            },
            Operation::RemoveField { record_type, name } => {
                let field = before
                    .field(record_type, name)
                    .ok_or_else(|| field_not_found(record_type, name))?;
                Operation::AddField {
                    record_type: record_type.clone(),
                    field: field.clone(),
                }
            }
            Operation::AlterField {
                record_type, field, ..
            } => {
                let previous = before
                    .field(record_type, &field.name)
                    .ok_or_else(|| field_not_found(record_type, &field.name))?;
                Operation::AlterField {
                    record_type: record_type.clone(),
                    field: previous.clone(),
                    allow_breaking: true,
                }
            }
            Operation::RenameField {
                record_type,
                from,
                to,
            } => Operation::RenameField {
                record_type: record_type.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            Operation::RunDirective { forward, backward } => match backward {
                Some(backward) => Operation::RunDirective {
                    forward: backward.clone(),
                    backward: Some(forward.clone()),
                },
                None => return Ok(None),
            },
        };
        Ok(Some(inverse))
    }
}

/// Physical column for a field definition.
pub fn column_def(field: &FieldSpec) -> ColumnDef {
    let (column_type, meta) = match &field.kind {
        FieldKind::Bitfield(spec) => (
            ColumnType::Integer {
                bits: spec.width().bits(),
            },
            ColumnMeta {
                flags: spec.flags.clone(),
                default: Some(spec.storage_default()),
            },
        ),
        FieldKind::Text { max_length } => (
            ColumnType::Text {
                max_length: *max_length,
            },
            ColumnMeta::default(),
        ),
        FieldKind::Integer { bits } => (ColumnType::Integer { bits: *bits }, ColumnMeta::default()),
        FieldKind::Boolean => (ColumnType::Boolean, ColumnMeta::default()),
    };

    ColumnDef {
        name: field.name.clone(),
        column_type,
        meta,
    }
}

/// Physical layout for a record type, columns in field name order.
pub fn table_layout(spec: &RecordTypeSpec) -> TableLayout {
    TableLayout {
        name: spec.name.clone(),
        columns: spec.fields().map(column_def).collect(),
    }
}

/// Why replacing `current` with `next` would reinterpret stored values, if it would.
///
/// Existing flags must keep their label and bit position; appending is fine.
fn breaking_change(current: &FieldSpec, next: &FieldSpec) -> Option<String> {
    let old = current.as_bitfield()?;
    let Some(new) = next.as_bitfield() else {
        return Some(format!("bitfield converted to {}", next.kind.name()));
    };

    for (bit, label) in old.flags.iter().enumerate() {
        if new.flags.get(bit) == Some(label) {
            continue;
        }
        return Some(match new.position(label) {
            Some(moved) => format!("flag {:?} moved from bit {} to bit {}", label, bit, moved),
            None => format!("flag {:?} at bit {} was removed", label, bit),
        });
    }
    None
}

fn alter_directives(table: &str, current: &FieldSpec, next: &FieldSpec) -> Vec<StorageDirective> {
    if current == next {
        return vec![StorageDirective::NoOp];
    }

    let from = column_def(current);
    let to = column_def(next);
    let both_bitfields = current.as_bitfield().is_some() && next.as_bitfield().is_some();
    let mut directives = Vec::new();

    match (&from.column_type, &to.column_type) {
        (a, b) if a == b => {}
        (ColumnType::Integer { bits: from_bits }, ColumnType::Integer { bits: to_bits })
            if to_bits > from_bits =>
        {
            directives.push(StorageDirective::WidenColumn {
                table: table.to_string(),
                column: next.name.clone(),
                from_bits: *from_bits,
                to_bits: *to_bits,
            });
        }
        // A bitfield that shrinks keeps its wider column.
        (ColumnType::Integer { .. }, ColumnType::Integer { .. }) if both_bitfields => {}
        _ => directives.push(StorageDirective::AlterColumnType {
            table: table.to_string(),
            column: next.name.clone(),
            from: from.column_type.clone(),
            to: to.column_type.clone(),
        }),
    }

    if from.meta != to.meta {
        directives.push(StorageDirective::AlterColumnMetadata {
            table: table.to_string(),
            column: next.name.clone(),
            from: from.meta,
            to: to.meta,
        });
    }

    if directives.is_empty() {
        directives.push(StorageDirective::NoOp);
    }
    directives
}

fn validate_field(record_type: &str, field: &FieldSpec) -> Result<(), MigrationError> {
    field
        .validate()
        .map_err(|reason| MigrationError::InvalidFieldSpec {
            record_type: record_type.to_string(),
            field: field.name.clone(),
            reason,
        })
}

fn record_type_not_found(name: &str) -> MigrationError {
    MigrationError::RecordTypeNotFound {
        record_type: name.to_string(),
    }
}

fn field_not_found(record_type: &str, field: &str) -> MigrationError {
    MigrationError::FieldNotFound {
        record_type: record_type.to_string(),
        field: field.to_string(),
    }
}
