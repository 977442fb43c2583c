//! Storage directive protocol.
//!
//! The applier translates schema operations into these directives; storage
//! adapters execute them against the physical store.

use crate::error::Error;
use crate::storage::key::aligned_copy;
use rkyv::Archive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical column type.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ColumnType {
    /// Variable-length text.
    Text {
        /// Maximum length in characters.
        max_length: Option<u32>,
    },
    /// Signed integer of the given width.
    Integer {
        /// Width in bits.
        bits: u8,
    },
    /// Boolean.
    Boolean,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Text {
                max_length: Some(n),
            } => write!(f, "text({})", n),
            ColumnType::Text { max_length: None } => write!(f, "text"),
            ColumnType::Integer { bits } => write!(f, "int{}", bits),
            ColumnType::Boolean => write!(f, "bool"),
        }
    }
}

/// Interpretation metadata attached to a column.
///
/// Changing metadata never changes the stored bytes.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
pub struct ColumnMeta {
    /// Bit labels for bitfield columns, by position.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    /// Column default value, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<i64>,
}

/// A column in a table layout.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Physical type.
    pub column_type: ColumnType,
    /// Interpretation metadata.
    #[serde(default)]
    pub meta: ColumnMeta,
}

/// Physical layout of one table.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
    Serialize,
    Deserialize,
)]
pub struct TableLayout {
    /// Table name.
    pub name: String,
    /// Columns in creation order.
    pub columns: Vec<ColumnDef>,
}

impl TableLayout {
    /// Create an empty table layout.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Add a column.
    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Get a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Get a column by name (mutable).
    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDef> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    /// Serialize the layout to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize a layout from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned_copy(bytes))
            .map_err(|e| Error::Deserialization(e.to_string()))
    }
}

/// A physical change for a storage adapter to carry out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum StorageDirective {
    /// Nothing to do.
    NoOp,
    /// Create a table with its columns.
    CreateTable {
        /// Layout of the new table.
        table: TableLayout,
    },
    /// Drop a table. Carries the layout so the drop can be reverted.
    DropTable {
        /// Layout of the dropped table.
        table: TableLayout,
    },
    /// Add a column.
    AddColumn {
        /// Table name.
        table: String,
        /// New column.
        column: ColumnDef,
    },
    /// Drop a column.
    DropColumn {
        /// Table name.
        table: String,
        /// Dropped column.
        column: ColumnDef,
    },
    /// Rename a column.
    RenameColumn {
        /// Table name.
        table: String,
        /// Current column name.
        from: String,
        /// New column name.
        to: String,
    },
    /// Change a column's physical type.
    AlterColumnType {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Current type.
        from: ColumnType,
        /// New type.
        to: ColumnType,
    },
    /// Change only how stored values are interpreted.
    AlterColumnMetadata {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Current metadata.
        from: ColumnMeta,
        /// New metadata.
        to: ColumnMeta,
    },
    /// Grow an integer column.
    WidenColumn {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
        /// Current width in bits.
        from_bits: u8,
        /// New width in bits.
        to_bits: u8,
    },
}

impl StorageDirective {
    /// The directive that undoes this one.
    ///
    /// Widening is undone as a no-op: the column keeps its width and the
    /// reverted metadata restores the old interpretation.
    pub fn inverse(&self) -> StorageDirective {
        match self {
            StorageDirective::NoOp | StorageDirective::WidenColumn { .. } => {
                StorageDirective::NoOp
            }
            StorageDirective::CreateTable { table } => StorageDirective::DropTable {
                table: table.clone(),
            },
            StorageDirective::DropTable { table } => StorageDirective::CreateTable {
                table: table.clone(),
            },
            StorageDirective::AddColumn { table, column } => StorageDirective::DropColumn {
                table: table.clone(),
                column: column.clone(),
            },
            StorageDirective::DropColumn { table, column } => StorageDirective::AddColumn {
                table: table.clone(),
                column: column.clone(),
            },
            StorageDirective::RenameColumn { table, from, to } => {
                StorageDirective::RenameColumn {
                    table: table.clone(),
                    from: to.clone(),
                    to: from.clone(),
                }
            }
            StorageDirective::AlterColumnType {
                table,
                column,
                from,
                to,
            } => StorageDirective::AlterColumnType {
                table: table.clone(),
                column: column.clone(),
                from: to.clone(),
                to: from.clone(),
            },
            StorageDirective::AlterColumnMetadata {
                table,
                column,
                from,
                to,
            } => StorageDirective::AlterColumnMetadata {
                table: table.clone(),
                column: column.clone(),
                from: to.clone(),
                to: from.clone(),
            },
        }
    }

    /// Whether the directive changes stored bytes or layout.
    pub fn is_physical(&self) -> bool {
        !matches!(
            self,
            StorageDirective::NoOp | StorageDirective::AlterColumnMetadata { .. }
        )
    }

    /// Name of the affected table.
    pub fn table(&self) -> Option<&str> {
        match self {
            StorageDirective::NoOp => None,
            StorageDirective::CreateTable { table } | StorageDirective::DropTable { table } => {
                Some(&table.name)
            }
            StorageDirective::AddColumn { table, .. }
            | StorageDirective::DropColumn { table, .. }
            | StorageDirective::RenameColumn { table, .. }
            | StorageDirective::AlterColumnType { table, .. }
            | StorageDirective::AlterColumnMetadata { table, .. }
            | StorageDirective::WidenColumn { table, .. } => Some(table),
        }
    }
}

impl fmt::Display for StorageDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageDirective::NoOp => write!(f, "no-op"),
            StorageDirective::CreateTable { table } => {
                write!(f, "create table {} ({} columns)", table.name, table.columns.len())
            }
            StorageDirective::DropTable { table } => write!(f, "drop table {}", table.name),
            StorageDirective::AddColumn { table, column } => {
                write!(f, "add column {}.{} {}", table, column.name, column.column_type)
            }
            StorageDirective::DropColumn { table, column } => {
                write!(f, "drop column {}.{}", table, column.name)
            }
            StorageDirective::RenameColumn { table, from, to } => {
                write!(f, "rename column {}.{} to {}", table, from, to)
            }
            StorageDirective::AlterColumnType {
                table,
                column,
                from,
                to,
            } => write!(f, "alter column {}.{} type {} -> {}", table, column, from, to),
            StorageDirective::AlterColumnMetadata { table, column, .. } => {
                write!(f, "alter column {}.{} metadata", table, column)
            }
            StorageDirective::WidenColumn {
                table,
                column,
                from_bits,
                to_bits,
            } => write!(
                f,
                "widen column {}.{} int{} -> int{}",
                table, column, from_bits, to_bits
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn methods_column() -> ColumnDef {
        ColumnDef {
            name: "authentication_methods".to_string(),
            column_type: ColumnType::Integer { bits: 32 },
            meta: ColumnMeta {
                flags: vec!["Google".to_string(), "Email".to_string()],
                default: Some(i64::from(i32::MAX)),
            },
        }
    }

    #[test]
    fn test_inverse_pairs() {
        let add = StorageDirective::AddColumn {
            table: "realm".to_string(),
            column: methods_column(),
        };
        assert!(matches!(add.inverse(), StorageDirective::DropColumn { .. }));
        assert_eq!(add.inverse().inverse(), add);

        let rename = StorageDirective::RenameColumn {
            table: "realm".to_string(),
            from: "a".to_string(),
            to: "b".to_string(),
        };
        assert_eq!(rename.inverse().inverse(), rename);

        let widen = StorageDirective::WidenColumn {
            table: "realm".to_string(),
            column: "authentication_methods".to_string(),
            from_bits: 32,
            to_bits: 64,
        };
        assert_eq!(widen.inverse(), StorageDirective::NoOp);
    }

    #[test]
    fn test_metadata_changes_are_not_physical() {
        let meta = StorageDirective::AlterColumnMetadata {
            table: "realm".to_string(),
            column: "authentication_methods".to_string(),
            from: ColumnMeta::default(),
            to: methods_column().meta,
        };
        assert!(!meta.is_physical());
        assert!(!StorageDirective::NoOp.is_physical());
        assert_eq!(meta.table(), Some("realm"));
    }

    #[test]
    fn test_layout_bytes_roundtrip() {
        let layout = TableLayout::new("realm").with_column(methods_column());
        let restored = TableLayout::from_bytes(&layout.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, layout);
    }

    #[test]
    fn test_directive_json_shape() {
        let directive: StorageDirective = serde_json::from_str(
            r#"{"directive": "rename_column", "table": "realm", "from": "a", "to": "b"}"#,
        )
        .unwrap();
        assert_eq!(directive.to_string(), "rename column realm.a to b");
    }
}
