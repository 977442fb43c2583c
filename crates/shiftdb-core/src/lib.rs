//! shiftdb Core - Schema registry, migration graph and migration runner.
//!
//! This crate applies ordered, dependency-linked migrations to a record schema
//! and to the physical store that backs it.

pub mod catalog;
pub mod error;
pub mod migration;
pub mod storage;

pub use catalog::{
    BitWidth, BitfieldSpec, DefaultMask, FieldKind, FieldSpec, FieldSpecError, RecordTypeSpec,
    SchemaRegistry,
};
pub use error::Error;
pub use migration::{
    AppliedMigration, ApplicationRecord, DependencyResolver, MigrationError, MigrationGraph,
    MigrationId, MigrationNode, MigrationRunner, Operation, OperationApplier, RunnerConfig,
    StatusReport,
};
pub use storage::{
    ColumnDef, ColumnMeta, ColumnType, LockGuard, LockRecord, MigrationLock, SledColumnStore,
    StorageAdapter, StorageConfig, StorageDirective, TableLayout,
};
