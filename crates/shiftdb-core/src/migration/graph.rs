//! Migration graph store.
//!
//! Owns every known migration node for the lifetime of the process.

use super::error::MigrationError;
use super::id::MigrationId;
use super::node::MigrationNode;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// File extension of declaration files.
const DECLARATION_EXTENSION: &str = "json";

/// All known migration nodes, keyed by identifier.
#[derive(Debug, Clone, Default)]
pub struct MigrationGraph {
    nodes: BTreeMap<MigrationId, MigrationNode>,
}

impl MigrationGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node. Identifiers must be unique.
    pub fn insert(&mut self, node: MigrationNode) -> Result<(), MigrationError> {
        if self.nodes.contains_key(node.id()) {
            return Err(MigrationError::DuplicateMigration {
                id: node.id().clone(),
            });
        }
        self.nodes.insert(node.id().clone(), node);
        Ok(())
    }

    /// Add a node, builder style.
    pub fn with_node(mut self, node: MigrationNode) -> Result<Self, MigrationError> {
        self.insert(node)?;
        Ok(self)
    }

    /// Get a node by identifier.
    pub fn get(&self, id: &MigrationId) -> Option<&MigrationNode> {
        self.nodes.get(id)
    }

    /// Find a node by its identifier text.
    pub fn find(&self, raw: &str) -> Option<&MigrationNode> {
        self.nodes.values().find(|n| n.id().as_str() == raw)
    }

    /// Check whether a node exists.
    pub fn contains(&self, id: &MigrationId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Iterate over nodes in identifier order.
    pub fn nodes(&self) -> impl Iterator<Item = &MigrationNode> {
        self.nodes.values()
    }

    /// Nodes that declare a dependency on `id`.
    pub fn dependents(&self, id: &MigrationId) -> Vec<&MigrationNode> {
        self.nodes
            .values()
            .filter(|n| n.dependencies().contains(id))
            .collect()
    }

    /// Nodes no other node depends on.
    pub fn leaves(&self) -> Vec<&MigrationNode> {
        self.nodes
            .values()
            .filter(|n| self.dependents(n.id()).is_empty())
            .collect()
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check whether the graph is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Load one declaration file. The file stem is the node identifier.
    pub fn load_file(path: &Path) -> Result<MigrationNode, MigrationError> {
        let declaration_error = |message: String| MigrationError::Declaration {
            path: path.to_path_buf(),
            message,
        };

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| declaration_error("file name is not valid UTF-8".to_string()))?;
        let id = MigrationId::parse(stem)?;
        let text = fs::read_to_string(path).map_err(|e| declaration_error(e.to_string()))?;
        let declaration =
            serde_json::from_str(&text).map_err(|e| declaration_error(e.to_string()))?;

        Ok(MigrationNode::from_declaration(id, declaration))
    }

    /// Load every `*.json` declaration in a directory.
    pub fn load_dir(dir: &Path) -> Result<Self, MigrationError> {
        let entries = fs::read_dir(dir).map_err(|e| MigrationError::Declaration {
            path: dir.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut paths = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| MigrationError::Declaration {
                path: dir.to_path_buf(),
                message: e.to_string(),
            })?;
            let path = entry.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(DECLARATION_EXTENSION)
            {
                paths.push(path);
            }
        }
        paths.sort();

        let mut graph = Self::new();
        for path in paths {
            let node = Self::load_file(&path)?;
            tracing::debug!(migration = %node.id(), path = %path.display(), "loaded migration");
            graph.insert(node)?;
        }
        Ok(graph)
    }
}
