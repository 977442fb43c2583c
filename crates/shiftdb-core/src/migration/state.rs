//! Application record persistence.
//!
//! Tracks which migrations are applied, in the order they were applied.

use super::error::MigrationError;
use super::id::MigrationId;
use crate::storage::key::{aligned_copy, current_timestamp, decode_sequence_key, sequence_key};
use rkyv::{Archive, Deserialize, Serialize};

/// One applied migration.
#[derive(Debug, Clone, PartialEq, Eq, Archive, Serialize, Deserialize, serde::Serialize)]
pub struct AppliedMigration {
    /// Migration identifier as written.
    pub id: String,
    /// Position in applied order, starting at 1.
    pub sequence: u64,
    /// When the migration was applied (microseconds since epoch).
    pub applied_at: u64,
    /// Content checksum of the node when it was applied.
    pub checksum: String,
}

impl AppliedMigration {
    /// Serialize the entry to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MigrationError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| MigrationError::Serialization(e.to_string()))
    }

    /// Deserialize an entry from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MigrationError> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned_copy(bytes))
            .map_err(|e| MigrationError::Deserialization(e.to_string()))
    }
}

fn storage_error(e: sled::Error) -> MigrationError {
    MigrationError::Storage(crate::error::Error::Storage(e))
}

/// Persistent record of applied migrations.
///
/// Keys are big-endian applied sequences, so iteration follows applied order.
#[derive(Clone)]
pub struct ApplicationRecord {
    tree: sled::Tree,
}

impl ApplicationRecord {
    /// Tree name for applied migrations.
    pub const TREE_NAME: &'static str = "migration:applied";

    /// Open or create the application record.
    pub fn open(db: &sled::Db) -> Result<Self, MigrationError> {
        let tree = db.open_tree(Self::TREE_NAME).map_err(storage_error)?;
        Ok(Self { tree })
    }

    /// All applied migrations, oldest first.
    pub fn list(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        let mut applied = Vec::new();
        for result in self.tree.iter() {
            let (key, value) = result.map_err(storage_error)?;
            if decode_sequence_key(&key).is_none() {
                continue;
            }
            applied.push(AppliedMigration::from_bytes(&value)?);
        }
        Ok(applied)
    }

    /// The most recently applied migration.
    pub fn last(&self) -> Result<Option<AppliedMigration>, MigrationError> {
        match self.tree.last().map_err(storage_error)? {
            Some((_, value)) => Ok(Some(AppliedMigration::from_bytes(&value)?)),
            None => Ok(None),
        }
    }

    /// Look up an applied migration by identifier.
    pub fn get(&self, id: &str) -> Result<Option<AppliedMigration>, MigrationError> {
        Ok(self.list()?.into_iter().find(|m| m.id == id))
    }

    /// Append a migration to the record and flush.
    pub fn record(
        &self,
        id: &MigrationId,
        checksum: impl Into<String>,
    ) -> Result<AppliedMigration, MigrationError> {
        let sequence = self.last()?.map_or(1, |m| m.sequence + 1);
        let entry = AppliedMigration {
            id: id.to_string(),
            sequence,
            applied_at: current_timestamp(),
            checksum: checksum.into(),
        };

        self.tree
            .insert(sequence_key(sequence), entry.to_bytes()?)
            .map_err(storage_error)?;
        self.flush()?;
        Ok(entry)
    }

    /// Remove a migration from the record and flush.
    pub fn remove(&self, id: &str) -> Result<Option<AppliedMigration>, MigrationError> {
        let Some(entry) = self.get(id)? else {
            return Ok(None);
        };
        self.tree
            .remove(sequence_key(entry.sequence))
            .map_err(storage_error)?;
        self.flush()?;
        Ok(Some(entry))
    }

    /// Number of applied migrations.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Check whether nothing is applied.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flush the record to disk.
    pub fn flush(&self) -> Result<(), MigrationError> {
        self.tree.flush().map_err(storage_error)?;
        Ok(())
    }
}
