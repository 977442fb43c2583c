//! Schema model registry.
//!
//! Holds the record types and field definitions that migrations evolve. The
//! live registry is rebuilt per run by replaying applied migrations.

mod field;
mod record;
mod registry;

pub use field::{BitWidth, BitfieldSpec, DefaultMask, FieldKind, FieldSpec, FieldSpecError};
pub use record::RecordTypeSpec;
pub use registry::SchemaRegistry;
