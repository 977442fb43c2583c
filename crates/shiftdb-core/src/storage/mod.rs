//! Storage layer for shiftdb.
//!
//! Storage directives describe physical changes; a [`StorageAdapter`] applies
//! them. The sled-backed [`SledColumnStore`] keeps the column catalogue and
//! [`MigrationLock`] serialises runners on a shared store.

mod adapter;
mod config;
mod directive;
mod lock;

pub mod key;

pub use adapter::{SledColumnStore, StorageAdapter};
pub use config::StorageConfig;
pub use directive::{ColumnDef, ColumnMeta, ColumnType, StorageDirective, TableLayout};
pub use lock::{LockGuard, LockRecord, MigrationLock};
