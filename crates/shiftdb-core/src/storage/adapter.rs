//! Storage adapters consume directives emitted by the operation applier.

use super::directive::{ColumnType, StorageDirective, TableLayout};
use crate::error::Error;
use sled::{Db, Tree};

/// Executes storage directives against a physical store.
pub trait StorageAdapter {
    /// Apply one directive.
    fn apply(&mut self, directive: &StorageDirective) -> Result<(), Error>;

    /// Make applied directives durable.
    fn flush(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

impl<S: StorageAdapter + ?Sized> StorageAdapter for &mut S {
    fn apply(&mut self, directive: &StorageDirective) -> Result<(), Error> {
        (**self).apply(directive)
    }

    fn flush(&mut self) -> Result<(), Error> {
        (**self).flush()
    }
}

/// Tree name for table layouts.
const COLUMNS_TREE: &str = "storage:columns";

/// Column catalogue kept in a sled tree.
///
/// Tracks table layouts only; it holds no row data.
pub struct SledColumnStore {
    tree: Tree,
}

impl SledColumnStore {
    /// Open or create the column catalogue in the given database.
    pub fn open(db: &Db) -> Result<Self, Error> {
        Ok(Self {
            tree: db.open_tree(COLUMNS_TREE)?,
        })
    }

    /// Get a table layout by name.
    pub fn table(&self, name: &str) -> Result<Option<TableLayout>, Error> {
        match self.tree.get(name.as_bytes())? {
            Some(bytes) => Ok(Some(TableLayout::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// List all table layouts in name order.
    pub fn tables(&self) -> Result<Vec<TableLayout>, Error> {
        let mut tables = Vec::new();
        for result in self.tree.iter() {
            let (_, value) = result?;
            tables.push(TableLayout::from_bytes(&value)?);
        }
        Ok(tables)
    }

    fn require_table(&self, name: &str) -> Result<TableLayout, Error> {
        self.table(name)?
            .ok_or_else(|| Error::DirectiveRejected(format!("table {} does not exist", name)))
    }

    fn save(&self, table: &TableLayout) -> Result<(), Error> {
        self.tree.insert(table.name.as_bytes(), table.to_bytes()?)?;
        Ok(())
    }

    fn update_column<F>(&self, table: &str, column: &str, update: F) -> Result<(), Error>
    where
        F: FnOnce(&mut super::directive::ColumnDef) -> Result<(), Error>,
    {
        let mut layout = self.require_table(table)?;
        let target = layout.column_mut(column).ok_or_else(|| {
            Error::DirectiveRejected(format!("column {}.{} does not exist", table, column))
        })?;
        update(target)?;
        self.save(&layout)
    }
}

impl StorageAdapter for SledColumnStore {
    fn apply(&mut self, directive: &StorageDirective) -> Result<(), Error> {
        tracing::debug!(%directive, "applying storage directive");

        match directive {
            StorageDirective::NoOp => Ok(()),
            StorageDirective::CreateTable { table } => {
                if self.tree.contains_key(table.name.as_bytes())? {
                    return Err(Error::DirectiveRejected(format!(
                        "table {} already exists",
                        table.name
                    )));
                }
                self.save(table)
            }
            StorageDirective::DropTable { table } => {
                if self.tree.remove(table.name.as_bytes())?.is_none() {
                    return Err(Error::DirectiveRejected(format!(
                        "table {} does not exist",
                        table.name
                    )));
                }
                Ok(())
            }
            StorageDirective::AddColumn { table, column } => {
                let mut layout = self.require_table(table)?;
                if layout.column(&column.name).is_some() {
                    return Err(Error::DirectiveRejected(format!(
                        "column {}.{} already exists",
                        table, column.name
                    )));
                }
                layout.columns.push(column.clone());
                self.save(&layout)
            }
            StorageDirective::DropColumn { table, column } => {
                let mut layout = self.require_table(table)?;
                let before = layout.columns.len();
                layout.columns.retain(|c| c.name != column.name);
                if layout.columns.len() == before {
                    return Err(Error::DirectiveRejected(format!(
                        "column {}.{} does not exist",
                        table, column.name
                    )));
                }
                self.save(&layout)
            }
            StorageDirective::RenameColumn { table, from, to } => {
                let layout = self.require_table(table)?;
                if layout.column(to).is_some() {
                    return Err(Error::DirectiveRejected(format!(
                        "column {}.{} already exists",
                        table, to
                    )));
                }
                self.update_column(table, from, |c| {
                    c.name = to.clone();
                    Ok(())
                })
            }
            StorageDirective::AlterColumnType {
                table, column, to, ..
            } => self.update_column(table, column, |c| {
                c.column_type = to.clone();
                Ok(())
            }),
            StorageDirective::AlterColumnMetadata {
                table, column, to, ..
            } => self.update_column(table, column, |c| {
                c.meta = to.clone();
                Ok(())
            }),
            StorageDirective::WidenColumn {
                table,
                column,
                to_bits,
                ..
            } => self.update_column(table, column, |c| match c.column_type {
                ColumnType::Integer { bits } => {
                    // Widening to a width already reached is a no-op.
                    if bits < *to_bits {
                        c.column_type = ColumnType::Integer { bits: *to_bits };
                    }
                    Ok(())
                }
                _ => Err(Error::DirectiveRejected(format!(
                    "cannot widen {} column {}.{}",
                    c.column_type, table, column
                ))),
            }),
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.tree.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::directive::{ColumnDef, ColumnMeta};

    fn test_db() -> sled::Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn int_column(name: &str, bits: u8) -> ColumnDef {
        ColumnDef {
            name: name.to_string(),
            column_type: ColumnType::Integer { bits },
            meta: ColumnMeta::default(),
        }
    }

    fn realm_layout() -> TableLayout {
        TableLayout::new("realm").with_column(int_column("authentication_methods", 32))
    }

    #[test]
    fn test_create_and_drop_table() {
        let db = test_db();
        let mut store = SledColumnStore::open(&db).unwrap();

        store
            .apply(&StorageDirective::CreateTable {
                table: realm_layout(),
            })
            .unwrap();
        assert_eq!(store.table("realm").unwrap(), Some(realm_layout()));

        let again = store.apply(&StorageDirective::CreateTable {
            table: realm_layout(),
        });
        assert!(matches!(again, Err(Error::DirectiveRejected(_))));

        store
            .apply(&StorageDirective::DropTable {
                table: realm_layout(),
            })
            .unwrap();
        assert!(store.tables().unwrap().is_empty());
    }

    #[test]
    fn test_column_directives() {
        let db = test_db();
        let mut store = SledColumnStore::open(&db).unwrap();
        store
            .apply(&StorageDirective::CreateTable {
                table: realm_layout(),
            })
            .unwrap();

        store
            .apply(&StorageDirective::AddColumn {
                table: "realm".to_string(),
                column: int_column("org_type", 16),
            })
            .unwrap();
        store
            .apply(&StorageDirective::RenameColumn {
                table: "realm".to_string(),
                from: "org_type".to_string(),
                to: "organization_type".to_string(),
            })
            .unwrap();
        store
            .apply(&StorageDirective::WidenColumn {
                table: "realm".to_string(),
                column: "authentication_methods".to_string(),
                from_bits: 32,
                to_bits: 64,
            })
            .unwrap();

        let layout = store.table("realm").unwrap().unwrap();
        assert!(layout.column("org_type").is_none());
        assert!(layout.column("organization_type").is_some());
        assert_eq!(
            layout.column("authentication_methods").unwrap().column_type,
            ColumnType::Integer { bits: 64 }
        );
    }

    #[test]
    fn test_widen_is_idempotent_and_rejects_text() {
        let db = test_db();
        let mut store = SledColumnStore::open(&db).unwrap();
        let layout = realm_layout().with_column(ColumnDef {
            name: "name".to_string(),
            column_type: ColumnType::Text { max_length: None },
            meta: ColumnMeta::default(),
        });
        store
            .apply(&StorageDirective::CreateTable { table: layout })
            .unwrap();

        let narrow = StorageDirective::WidenColumn {
            table: "realm".to_string(),
            column: "authentication_methods".to_string(),
            from_bits: 16,
            to_bits: 16,
        };
        store.apply(&narrow).unwrap();
        let column = store.table("realm").unwrap().unwrap();
        assert_eq!(
            column.column("authentication_methods").unwrap().column_type,
            ColumnType::Integer { bits: 32 }
        );

        let text = StorageDirective::WidenColumn {
            table: "realm".to_string(),
            column: "name".to_string(),
            from_bits: 32,
            to_bits: 64,
        };
        assert!(store.apply(&text).is_err());
    }

    #[test]
    fn test_missing_table_is_rejected() {
        let db = test_db();
        let mut store = SledColumnStore::open(&db).unwrap();
        let result = store.apply(&StorageDirective::AddColumn {
            table: "ghost".to_string(),
            column: int_column("x", 32),
        });
        assert!(matches!(result, Err(Error::DirectiveRejected(_))));
    }
}
