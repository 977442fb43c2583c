//! Migration nodes and their declaration format.

use super::error::MigrationError;
use super::id::MigrationId;
use super::operation::Operation;
use serde::{Deserialize, Serialize};

/// On-disk form of a node. The identifier comes from the file name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationDeclaration {
    /// Identifiers this node depends on.
    #[serde(default)]
    pub dependencies: Vec<MigrationId>,
    /// Operations in application order.
    pub operations: Vec<Operation>,
}

/// An immutable migration: identifier, dependencies and ordered operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationNode {
    id: MigrationId,
    dependencies: Vec<MigrationId>,
    operations: Vec<Operation>,
}

impl MigrationNode {
    /// Create a node. Repeated dependencies are collapsed.
    pub fn new(
        id: MigrationId,
        dependencies: impl IntoIterator<Item = MigrationId>,
        operations: impl IntoIterator<Item = Operation>,
    ) -> Self {
        let mut deps: Vec<MigrationId> = Vec::new();
        for dep in dependencies {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        Self {
            id,
            dependencies: deps,
            operations: operations.into_iter().collect(),
        }
    }

    /// Build a node from a parsed declaration.
    pub fn from_declaration(id: MigrationId, declaration: MigrationDeclaration) -> Self {
        Self::new(id, declaration.dependencies, declaration.operations)
    }

    /// Parse a node from JSON declaration text.
    pub fn from_json(id: MigrationId, json: &str) -> Result<Self, MigrationError> {
        let declaration: MigrationDeclaration = serde_json::from_str(json)
            .map_err(|e| MigrationError::Deserialization(format!("{}: {}", id, e)))?;
        Ok(Self::from_declaration(id, declaration))
    }

    /// The node identifier.
    pub fn id(&self) -> &MigrationId {
        &self.id
    }

    /// Identifiers this node depends on.
    pub fn dependencies(&self) -> &[MigrationId] {
        &self.dependencies
    }

    /// Operations in application order.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    /// The declaration this node would be written as.
    pub fn to_declaration(&self) -> MigrationDeclaration {
        MigrationDeclaration {
            dependencies: self.dependencies.clone(),
            operations: self.operations.clone(),
        }
    }

    /// Content checksum (blake3, hex) over dependencies and operations.
    pub fn checksum(&self) -> Result<String, MigrationError> {
        let bytes = serde_json::to_vec(&self.to_declaration())
            .map_err(|e| MigrationError::Serialization(e.to_string()))?;
        Ok(hex::encode(blake3::hash(&bytes).as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: &str) -> MigrationId {
        raw.parse().unwrap()
    }

    #[test]
    fn test_from_json() {
        let node = MigrationNode::from_json(
            id("0002_add_stream"),
            r#"{
                "dependencies": ["0001_initial", "0001_initial"],
                "operations": [{"op": "create_record_type", "name": "stream"}]
            }"#,
        )
        .unwrap();

        assert_eq!(node.dependencies(), &[id("0001_initial")]);
        assert_eq!(node.operations().len(), 1);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result = MigrationNode::from_json(
            id("0002_add_stream"),
            r#"{"operations": [], "replaces": []}"#,
        );
        assert!(matches!(result, Err(MigrationError::Deserialization(_))));
    }

    #[test]
    fn test_checksum_tracks_content() {
        let a = MigrationNode::new(id("0001_initial"), [], [Operation::DeleteRecordType {
            name: "realm".to_string(),
        }]);
        let b = MigrationNode::new(id("0001_initial"), [], [Operation::DeleteRecordType {
            name: "stream".to_string(),
        }]);

        assert_eq!(a.checksum().unwrap(), a.clone().checksum().unwrap());
        assert_ne!(a.checksum().unwrap(), b.checksum().unwrap());
        assert_eq!(a.checksum().unwrap().len(), 64);
    }
}
