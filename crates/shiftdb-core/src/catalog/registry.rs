//! The live schema: every record type known at a point in migration history.

use super::{FieldSpec, RecordTypeSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// In-memory schema model.
///
/// Passed explicitly to the applier and owned by the runner; never global.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SchemaRegistry {
    /// Record types keyed by name.
    pub record_types: BTreeMap<String, RecordTypeSpec>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record type, replacing any with the same name.
    pub fn with_record_type(mut self, record_type: RecordTypeSpec) -> Self {
        self.insert(record_type);
        self
    }

    /// Get a record type by name.
    pub fn get(&self, name: &str) -> Option<&RecordTypeSpec> {
        self.record_types.get(name)
    }

    /// Get a record type by name (mutable).
    pub fn get_mut(&mut self, name: &str) -> Option<&mut RecordTypeSpec> {
        self.record_types.get_mut(name)
    }

    /// Check whether a record type exists.
    pub fn contains(&self, name: &str) -> bool {
        self.record_types.contains_key(name)
    }

    /// Insert a record type, returning the one it replaced.
    pub fn insert(&mut self, record_type: RecordTypeSpec) -> Option<RecordTypeSpec> {
        self.record_types
            .insert(record_type.name.clone(), record_type)
    }

    /// Remove a record type by name.
    pub fn remove(&mut self, name: &str) -> Option<RecordTypeSpec> {
        self.record_types.remove(name)
    }

    /// Look up a field of a record type.
    pub fn field(&self, record_type: &str, field: &str) -> Option<&FieldSpec> {
        self.get(record_type).and_then(|r| r.field(field))
    }

    /// Iterate over record types in name order.
    pub fn iter(&self) -> impl Iterator<Item = &RecordTypeSpec> {
        self.record_types.values()
    }

    /// Number of record types.
    pub fn len(&self) -> usize {
        self.record_types.len()
    }

    /// Check whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.record_types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BitfieldSpec;

    fn sample_registry() -> SchemaRegistry {
        let realm = RecordTypeSpec::new("realm")
            .with_field(FieldSpec::text("name"))
            .with_field(FieldSpec::bitfield(
                "authentication_methods",
                BitfieldSpec::new(["Google", "Email"]),
            ));
        let stream = RecordTypeSpec::new("stream").with_field(FieldSpec::text("name"));

        SchemaRegistry::new()
            .with_record_type(realm)
            .with_record_type(stream)
    }

    #[test]
    fn test_registry_lookup() {
        let registry = sample_registry();

        assert_eq!(registry.len(), 2);
        let names: Vec<&str> = registry.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["realm", "stream"]);
        assert!(registry.field("realm", "authentication_methods").is_some());
        assert!(registry.field("realm", "missing").is_none());
        assert!(registry.field("missing", "name").is_none());
    }

    #[test]
    fn test_registry_clone_is_independent() {
        let registry = sample_registry();
        let mut copy = registry.clone();
        copy.remove("stream");

        assert!(registry.contains("stream"));
        assert!(!copy.contains("stream"));
        assert_ne!(registry, copy);
    }
}
