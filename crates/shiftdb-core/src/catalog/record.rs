//! Record type definitions.

use super::field::FieldSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A record type definition (table schema).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordTypeSpec {
    /// Record type name (unique within the registry).
    pub name: String,
    /// Field definitions keyed by field name.
    pub fields: BTreeMap<String, FieldSpec>,
}

impl RecordTypeSpec {
    /// Create an empty record type.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Add a field, replacing any field with the same name.
    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.insert_field(field);
        self
    }

    /// Get a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }

    /// Check whether a field exists.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Insert a field, returning the one it replaced.
    pub fn insert_field(&mut self, field: FieldSpec) -> Option<FieldSpec> {
        self.fields.insert(field.name.clone(), field)
    }

    /// Remove a field by name.
    pub fn remove_field(&mut self, name: &str) -> Option<FieldSpec> {
        self.fields.remove(name)
    }

    /// Iterate over fields in name order.
    pub fn fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.fields.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_builder() {
        let realm = RecordTypeSpec::new("realm")
            .with_field(FieldSpec::text("name"))
            .with_field(FieldSpec::boolean("deactivated"));

        assert_eq!(realm.name, "realm");
        assert_eq!(realm.fields.len(), 2);
        assert!(realm.has_field("name"));
        assert!(realm.field("nonexistent").is_none());
    }

    #[test]
    fn test_field_names_are_unique() {
        let mut realm = RecordTypeSpec::new("realm").with_field(FieldSpec::text("name"));
        let replaced = realm.insert_field(FieldSpec::integer("name", 32));

        assert_eq!(replaced, Some(FieldSpec::text("name")));
        assert_eq!(realm.fields.len(), 1);
        assert_eq!(realm.remove_field("name"), Some(FieldSpec::integer("name", 32)));
        assert!(realm.fields.is_empty());
    }
}
