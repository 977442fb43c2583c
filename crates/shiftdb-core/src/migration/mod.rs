//! Migration graph, resolver and runner.
//!
//! Migrations are immutable nodes loaded from declaration files. Each node
//! lists the nodes it depends on and an ordered list of [`Operation`]s.
//!
//! # Flow
//!
//! 1. [`MigrationGraph`] holds every known node.
//! 2. [`DependencyResolver`] orders the nodes not yet applied.
//! 3. [`OperationApplier`] turns each operation into registry changes and
//!    [`StorageDirective`](crate::storage::StorageDirective)s.
//! 4. [`MigrationRunner`] writes the directives, node by node, under the
//!    migration lock and updates the [`ApplicationRecord`].
//!
//! Rollback runs the same pipeline with inverse operations derived from the
//! schema as it was before each operation.

mod applier;
mod error;
mod graph;
mod id;
mod node;
mod operation;
mod resolver;
mod runner;
mod state;

pub use applier::{column_def, table_layout, OperationApplier};
pub use error::MigrationError;
pub use graph::MigrationGraph;
pub use id::MigrationId;
pub use node::{MigrationDeclaration, MigrationNode};
pub use operation::Operation;
pub use resolver::DependencyResolver;
pub use runner::{MigrationRunner, RunnerConfig, StatusReport};
pub use state::{AppliedMigration, ApplicationRecord};
