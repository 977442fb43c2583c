//! Declarative migration operations.

use crate::catalog::FieldSpec;
use crate::storage::StorageDirective;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One schema change within a migration node.
///
/// A closed set: every operation can be validated up front and, except for a
/// `RunDirective` without a `backward` directive, inverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Create a record type with its initial fields.
    CreateRecordType {
        /// Record type name.
        name: String,
        /// Initial fields.
        #[serde(default)]
        fields: Vec<FieldSpec>,
    },
    /// Delete a record type and all its fields.
    DeleteRecordType {
        /// Record type name.
        name: String,
    },
    /// Add a field to a record type.
    AddField {
        /// Target record type.
        record_type: String,
        /// The new field.
        field: FieldSpec,
    },
    /// Remove a field from a record type.
    RemoveField {
        /// Target record type.
        record_type: String,
        /// Field name.
        name: String,
    },
    /// Replace the definition of an existing field.
    AlterField {
        /// Target record type.
        record_type: String,
        /// New definition; `field.name` selects the field.
        field: FieldSpec,
        /// Accept changes that reinterpret stored bitfield values.
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        allow_breaking: bool,
    },
    /// Rename a field.
    RenameField {
        /// Target record type.
        record_type: String,
        /// Current name.
        from: String,
        /// New name.
        to: String,
    },
    /// Run a raw storage directive. Irreversible without `backward`.
    RunDirective {
        /// Directive applied going forward.
        forward: StorageDirective,
        /// Directive applied on rollback.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backward: Option<StorageDirective>,
    },
}

impl Operation {
    /// Shorthand for a non-breaking `AlterField`.
    pub fn alter_field(record_type: impl Into<String>, field: FieldSpec) -> Self {
        Operation::AlterField {
            record_type: record_type.into(),
            field,
            allow_breaking: false,
        }
    }

    /// Shorthand for `AddField`.
    pub fn add_field(record_type: impl Into<String>, field: FieldSpec) -> Self {
        Operation::AddField {
            record_type: record_type.into(),
            field,
        }
    }

    /// Shorthand for `CreateRecordType`.
    pub fn create_record_type(
        name: impl Into<String>,
        fields: impl IntoIterator<Item = FieldSpec>,
    ) -> Self {
        Operation::CreateRecordType {
            name: name.into(),
            fields: fields.into_iter().collect(),
        }
    }

    /// Record type touched by the operation, if any.
    pub fn record_type(&self) -> Option<&str> {
        match self {
            Operation::CreateRecordType { name, .. } | Operation::DeleteRecordType { name } => {
                Some(name)
            }
            Operation::AddField { record_type, .. }
            | Operation::RemoveField { record_type, .. }
            | Operation::AlterField { record_type, .. }
            | Operation::RenameField { record_type, .. } => Some(record_type),
            Operation::RunDirective { .. } => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::CreateRecordType { name, .. } => write!(f, "create record type {}", name),
            Operation::DeleteRecordType { name } => write!(f, "delete record type {}", name),
            Operation::AddField { record_type, field } => {
                write!(f, "add field {}.{}", record_type, field.name)
            }
            Operation::RemoveField { record_type, name } => {
                write!(f, "remove field {}.{}", record_type, name)
            }
            Operation::AlterField {
                record_type, field, ..
            } => write!(f, "alter field {}.{}", record_type, field.name),
            Operation::RenameField {
                record_type,
                from,
                to,
            } => write!(f, "rename field {}.{} to {}", record_type, from, to),
            Operation::RunDirective { forward, .. } => write!(f, "run directive: {}", forward),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DefaultMask;

    #[test]
    fn test_alter_field_declaration() {
        let op: Operation = serde_json::from_str(
            r#"{
                "op": "alter_field",
                "record_type": "realm",
                "field": {
                    "name": "authentication_methods",
                    "kind": "bitfield",
                    "flags": ["Google", "Email"],
                    "default": 2147483647
                }
            }"#,
        )
        .unwrap();

        match &op {
            Operation::AlterField {
                record_type,
                field,
                allow_breaking,
            } => {
                assert_eq!(record_type, "realm");
                assert!(!allow_breaking);
                assert_eq!(
                    field.as_bitfield().map(|b| b.default),
                    Some(DefaultMask::AllEnabled)
                );
            }
            other => panic!("expected AlterField, got {:?}", other),
        }
        assert_eq!(op.to_string(), "alter field realm.authentication_methods");
    }

    #[test]
    fn test_run_directive_without_backward() {
        let op: Operation = serde_json::from_str(
            r#"{"op": "run_directive", "forward": {"directive": "no_op"}}"#,
        )
        .unwrap();
        assert_eq!(
            op,
            Operation::RunDirective {
                forward: StorageDirective::NoOp,
                backward: None
            }
        );
        assert_eq!(op.record_type(), None);
    }
}
