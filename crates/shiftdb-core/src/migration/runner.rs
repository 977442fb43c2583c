//! Migration runner.
//!
//! Applies pending nodes in resolved order and reverses applied nodes on
//! rollback. Each node is atomic: its operations run against a working copy
//! of the registry, and a storage directive that fails reverts the directives
//! already written for that node.

use super::applier::OperationApplier;
use super::error::MigrationError;
use super::graph::MigrationGraph;
use super::id::MigrationId;
use super::node::MigrationNode;
use super::resolver::DependencyResolver;
use super::state::{AppliedMigration, ApplicationRecord};
use crate::catalog::SchemaRegistry;
use crate::storage::{LockGuard, LockRecord, MigrationLock, StorageAdapter, StorageDirective};
use std::collections::BTreeSet;
use std::time::Duration;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Name written into the lock record.
    pub owner: String,
    /// How long to wait for a held lock. `None` fails fast.
    pub lock_wait: Option<Duration>,
    /// Delay between lock attempts while waiting.
    pub lock_poll_interval: Duration,
    /// Check that applied nodes still match their recorded checksum.
    pub verify_checksums: bool,
    /// Validate the plan without writing anything.
    pub dry_run: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            owner: format!("pid:{}", std::process::id()),
            lock_wait: None,
            lock_poll_interval: Duration::from_millis(100),
            verify_checksums: true,
            dry_run: false,
        }
    }
}

impl RunnerConfig {
    /// Set the lock owner name.
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Wait up to `wait` for a held lock.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = Some(wait);
        self
    }

    /// Set the polling interval used while waiting for the lock.
    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    /// Skip checksum verification of applied nodes.
    pub fn without_checksum_verification(mut self) -> Self {
        self.verify_checksums = false;
        self
    }

    /// Enable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Applied and pending migrations plus the current lock holder.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    /// Applied migrations, oldest first.
    pub applied: Vec<AppliedMigration>,
    /// Pending migrations in the order they would be applied.
    pub pending: Vec<MigrationId>,
    /// Current lock holder, if any.
    pub lock: Option<LockRecord>,
}

/// Directive planned for a node, tagged with the index of its operation.
type Planned = (usize, StorageDirective);

/// Drives a migration graph against one store.
pub struct MigrationRunner<'g, S: StorageAdapter> {
    graph: &'g MigrationGraph,
    storage: S,
    record: ApplicationRecord,
    lock: MigrationLock,
    registry: SchemaRegistry,
    applier: OperationApplier,
    config: RunnerConfig,
}

impl<'g, S: StorageAdapter> MigrationRunner<'g, S> {
    /// Open a runner and rebuild the live registry from applied history.
    pub fn open(
        graph: &'g MigrationGraph,
        db: &sled::Db,
        storage: S,
        config: RunnerConfig,
    ) -> Result<Self, MigrationError> {
        let record = ApplicationRecord::open(db)?;
        let lock = MigrationLock::open(db)?;
        let (registry, _) = replay(graph, &record.list()?)?;

        Ok(Self {
            graph,
            storage,
            record,
            lock,
            registry,
            applier: OperationApplier::new(),
            config,
        })
    }

    /// The live schema.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// The storage adapter.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// The storage adapter (mutable).
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// The runner configuration.
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Applied migrations, oldest first.
    pub fn applied(&self) -> Result<Vec<AppliedMigration>, MigrationError> {
        self.record.list()
    }

    /// Rebuild the live registry from the application record.
    pub fn reload(&mut self) -> Result<(), MigrationError> {
        let (registry, _) = replay(self.graph, &self.record.list()?)?;
        self.registry = registry;
        Ok(())
    }

    /// Apply every pending migration.
    ///
    /// Returns the identifiers applied, in order. With nothing pending the
    /// list is empty. In dry-run mode the identifiers are those that would be
    /// applied, and nothing is written.
    pub fn apply_all(&mut self) -> Result<Vec<MigrationId>, MigrationError> {
        let _guard = self.lock_unless_dry_run()?;
        let graph = self.graph;

        let applied = self.record.list()?;
        let (registry, applied_ids) = replay(graph, &applied)?;
        self.registry = registry;
        if self.config.verify_checksums {
            verify_checksums(graph, &applied)?;
        }

        let pending = DependencyResolver::pending(graph, &applied_ids)?;
        if pending.is_empty() {
            tracing::info!("no pending migrations");
            return Ok(Vec::new());
        }

        if self.config.dry_run {
            let mut preview = self.registry.clone();
            for node in &pending {
                let planned = plan_node(&self.applier, node, &mut preview)?;
                tracing::info!(
                    migration = %node.id(),
                    directives = planned.len(),
                    "would apply migration"
                );
            }
            return Ok(pending.iter().map(|n| n.id().clone()).collect());
        }

        tracing::info!(count = pending.len(), "applying migrations");
        let mut done = Vec::with_capacity(pending.len());
        for node in pending {
            self.apply_node(node)?;
            done.push(node.id().clone());
        }
        Ok(done)
    }

    /// Reverse every migration applied after `target`, newest first.
    pub fn rollback(&mut self, target: &MigrationId) -> Result<Vec<MigrationId>, MigrationError> {
        let _guard = self.lock_unless_dry_run()?;

        let applied = self.record.list()?;
        let position = applied
            .iter()
            .position(|m| m.id == target.as_str())
            .ok_or_else(|| MigrationError::UnknownMigration {
                migration: target.to_string(),
            })?;

        self.reverse_after(&applied, position + 1)
    }

    /// Reverse every applied migration, newest first.
    pub fn rollback_all(&mut self) -> Result<Vec<MigrationId>, MigrationError> {
        let _guard = self.lock_unless_dry_run()?;
        let applied = self.record.list()?;
        self.reverse_after(&applied, 0)
    }

    /// Applied and pending migrations and the lock holder.
    pub fn status(&self) -> Result<StatusReport, MigrationError> {
        let applied = self.record.list()?;
        let (_, applied_ids) = replay(self.graph, &applied)?;
        let pending = DependencyResolver::pending(self.graph, &applied_ids)?
            .into_iter()
            .map(|n| n.id().clone())
            .collect();

        Ok(StatusReport {
            applied,
            pending,
            lock: self.lock.holder()?,
        })
    }

    fn lock_unless_dry_run(&self) -> Result<Option<LockGuard>, MigrationError> {
        if self.config.dry_run {
            return Ok(None);
        }
        let guard = self.lock.acquire(
            &self.config.owner,
            self.config.lock_wait,
            self.config.lock_poll_interval,
        )?;
        Ok(Some(guard))
    }

    fn apply_node(&mut self, node: &MigrationNode) -> Result<(), MigrationError> {
        let mut working = self.registry.clone();
        let planned = plan_node(&self.applier, node, &mut working)?;
        let checksum = node.checksum()?;

        self.commit_node(node.id(), &planned, |record| {
            record.record(node.id(), checksum).map(|_| ())
        })?;
        self.registry = working;

        tracing::info!(
            migration = %node.id(),
            operations = node.operations().len(),
            directives = planned.len(),
            "applied migration"
        );
        Ok(())
    }

    /// Reverse `applied[keep..]`, newest first.
    fn reverse_after(
        &mut self,
        applied: &[AppliedMigration],
        keep: usize,
    ) -> Result<Vec<MigrationId>, MigrationError> {
        let graph = self.graph;
        let (registry, _) = replay(graph, applied)?;
        self.registry = registry;

        let mut reverted = Vec::new();
        for index in (keep..applied.len()).rev() {
            let node = graph
                .find(&applied[index].id)
                .ok_or_else(|| MigrationError::AppliedMigrationMissing {
                    migration: applied[index].id.clone(),
                })?;
            let (before, _) = replay(graph, &applied[..index])?;

            let (planned, restored) = self.plan_reversal(node, before)?;
            if self.config.dry_run {
                tracing::info!(migration = %node.id(), directives = planned.len(), "would revert migration");
                reverted.push(node.id().clone());
                continue;
            }

            self.commit_node(node.id(), &planned, |record| {
                record.remove(node.id().as_str()).map(|_| ())
            })?;
            self.registry = restored;

            tracing::info!(migration = %node.id(), directives = planned.len(), "reverted migration");
            reverted.push(node.id().clone());
        }

        if reverted.is_empty() {
            tracing::info!("nothing to roll back");
        }
        Ok(reverted)
    }

    /// Plan the directives that undo `node`, given the schema before it.
    ///
    /// Fails with `IrreversibleMigration` before anything is written when an
    /// operation has no inverse. Returns the directives and the registry as
    /// it will be once they are written.
    fn plan_reversal(
        &self,
        node: &MigrationNode,
        before: SchemaRegistry,
    ) -> Result<(Vec<Planned>, SchemaRegistry), MigrationError> {
        let mut state = before;
        let mut inverses = Vec::with_capacity(node.operations().len());

        for (index, op) in node.operations().iter().enumerate() {
            let inverse = self
                .applier
                .inverse(op, &state)
                .map_err(|e| e.at_operation(node.id(), index))?
                .ok_or_else(|| MigrationError::IrreversibleMigration {
                    migration: node.id().clone(),
                    operation_index: index,
                })?;
            self.applier
                .apply(op, &mut state)
                .map_err(|e| e.at_operation(node.id(), index))?;
            inverses.push((index, inverse));
        }

        let applier = self.applier.allow_breaking();
        let mut planned = Vec::new();
        for (index, inverse) in inverses.into_iter().rev() {
            let directives = applier
                .apply(&inverse, &mut state)
                .map_err(|e| e.at_operation(node.id(), index))?;
            planned.extend(directives.into_iter().map(|d| (index, d)));
        }

        Ok((planned, state))
    }

    /// Write a node's directives, then update the application record.
    ///
    /// If the record update fails, every directive of the node is reverted so
    /// storage keeps matching the record.
    fn commit_node<F>(
        &mut self,
        migration: &MigrationId,
        planned: &[Planned],
        update_record: F,
    ) -> Result<(), MigrationError>
    where
        F: FnOnce(&ApplicationRecord) -> Result<(), MigrationError>,
    {
        self.write_directives(migration, planned)?;

        if let Err(e) = update_record(&self.record) {
            tracing::warn!(%migration, error = %e, "record update failed, reverting migration");
            self.revert(planned);
            if let Err(flush) = self.storage.flush() {
                tracing::warn!(%migration, error = %flush, "failed to flush reverted directives");
            }
            return Err(e.at_operation(migration, last_operation(planned)));
        }
        Ok(())
    }

    /// Write directives in order. On failure, revert the ones already written.
    fn write_directives(
        &mut self,
        migration: &MigrationId,
        planned: &[Planned],
    ) -> Result<(), MigrationError> {
        for (written, (index, directive)) in planned.iter().enumerate() {
            tracing::debug!(
                %migration,
                operation = index,
                table = directive.table().unwrap_or("-"),
                %directive,
                "writing directive"
            );
            if let Err(e) = self.storage.apply(directive) {
                tracing::warn!(
                    %migration,
                    operation = index,
                    error = %e,
                    "directive failed, reverting migration"
                );
                self.revert(&planned[..written]);
                return Err(MigrationError::from(e).at_operation(migration, *index));
            }
        }

        if let Err(e) = self.storage.flush() {
            tracing::warn!(%migration, error = %e, "flush failed, reverting migration");
            self.revert(planned);
            return Err(MigrationError::from(e).at_operation(migration, last_operation(planned)));
        }
        Ok(())
    }

    fn revert(&mut self, written: &[Planned]) {
        for (index, directive) in written.iter().rev() {
            let inverse = directive.inverse();
            if let Err(e) = self.storage.apply(&inverse) {
                tracing::warn!(
                    operation = index,
                    directive = %inverse,
                    error = %e,
                    "failed to revert directive"
                );
            }
        }
    }
}

fn last_operation(planned: &[Planned]) -> usize {
    planned.last().map_or(0, |(index, _)| *index)
}

/// Run a node's operations against `registry`, collecting its directives.
fn plan_node(
    applier: &OperationApplier,
    node: &MigrationNode,
    registry: &mut SchemaRegistry,
) -> Result<Vec<Planned>, MigrationError> {
    let mut planned = Vec::new();
    for (index, op) in node.operations().iter().enumerate() {
        tracing::trace!(
            migration = %node.id(),
            operation = index,
            record_type = op.record_type().unwrap_or("-"),
            "planning operation"
        );
        let directives = applier
            .apply(op, registry)
            .map_err(|e| e.at_operation(node.id(), index))?;
        planned.extend(directives.into_iter().map(|d| (index, d)));
    }
    Ok(planned)
}

/// Rebuild the registry by replaying applied nodes in applied order.
fn replay(
    graph: &MigrationGraph,
    applied: &[AppliedMigration],
) -> Result<(SchemaRegistry, BTreeSet<MigrationId>), MigrationError> {
    let applier = OperationApplier::new().allow_breaking();
    let mut registry = SchemaRegistry::new();
    let mut ids = BTreeSet::new();

    for entry in applied {
        let node = graph
            .find(&entry.id)
            .ok_or_else(|| MigrationError::AppliedMigrationMissing {
                migration: entry.id.clone(),
            })?;
        plan_node(&applier, node, &mut registry)?;
        ids.insert(node.id().clone());
    }
    Ok((registry, ids))
}

fn verify_checksums(
    graph: &MigrationGraph,
    applied: &[AppliedMigration],
) -> Result<(), MigrationError> {
    for entry in applied {
        let Some(node) = graph.find(&entry.id) else {
            continue;
        };
        let current = node.checksum()?;
        if current != entry.checksum {
            return Err(MigrationError::ChecksumMismatch {
                migration: node.id().clone(),
                recorded: entry.checksum.clone(),
                current,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldSpec;
    use crate::migration::Operation;
    use crate::storage::SledColumnStore;

    fn id(raw: &str) -> MigrationId {
        raw.parse().unwrap()
    }

    fn two_node_graph() -> MigrationGraph {
        MigrationGraph::new()
            .with_node(MigrationNode::new(
                id("0001_initial"),
                [],
                [Operation::create_record_type("realm", [FieldSpec::text("name")])],
            ))
            .unwrap()
            .with_node(MigrationNode::new(
                id("0002_org_type"),
                [id("0001_initial")],
                [Operation::add_field("realm", FieldSpec::integer("org_type", 16))],
            ))
            .unwrap()
    }

    #[test]
    fn test_config_builders() {
        let config = RunnerConfig::default()
            .with_owner("deploy")
            .with_lock_wait(Duration::from_secs(5))
            .without_checksum_verification()
            .with_dry_run(true);

        assert_eq!(config.owner, "deploy");
        assert_eq!(config.lock_wait, Some(Duration::from_secs(5)));
        assert!(!config.verify_checksums);
        assert!(config.dry_run);
        assert!(RunnerConfig::default().owner.starts_with("pid:"));
    }

    #[test]
    fn test_apply_then_reopen_replays_history() {
        let graph = two_node_graph();
        let db = sled::Config::new().temporary(true).open().unwrap();

        let mut runner = MigrationRunner::open(
            &graph,
            &db,
            SledColumnStore::open(&db).unwrap(),
            RunnerConfig::default(),
        )
        .unwrap();
        let applied = runner.apply_all().unwrap();
        assert_eq!(applied, vec![id("0001_initial"), id("0002_org_type")]);
        let schema = runner.registry().clone();
        drop(runner);

        let reopened = MigrationRunner::open(
            &graph,
            &db,
            SledColumnStore::open(&db).unwrap(),
            RunnerConfig::default(),
        )
        .unwrap();
        assert_eq!(reopened.registry(), &schema);
        assert!(reopened.status().unwrap().pending.is_empty());
    }

    #[test]
    fn test_failed_record_update_reverts_directives() {
        let graph = two_node_graph();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mut runner = MigrationRunner::open(
            &graph,
            &db,
            SledColumnStore::open(&db).unwrap(),
            RunnerConfig::default(),
        )
        .unwrap();

        let node = graph.find("0001_initial").unwrap();
        let mut working = runner.registry().clone();
        let planned = plan_node(&runner.applier, node, &mut working).unwrap();

        let err = runner
            .commit_node(node.id(), &planned, |_| {
                Err(crate::error::Error::InvalidData("record tree unavailable".into()).into())
            })
            .unwrap_err();
        assert_eq!(err.kind(), "storage");
        assert_eq!(err.migration(), Some(&id("0001_initial")));
        assert_eq!(err.operation_index(), Some(0));
        assert!(runner.storage().table("realm").unwrap().is_none());
        assert!(runner.applied().unwrap().is_empty());

        // Storage still matches the record, so the next run is not stuck.
        let applied = runner.apply_all().unwrap();
        assert_eq!(applied, vec![id("0001_initial"), id("0002_org_type")]);
        assert!(runner.storage().table("realm").unwrap().is_some());
    }

    #[test]
    fn test_failed_record_removal_restores_storage() {
        let graph = two_node_graph();
        let db = sled::Config::new().temporary(true).open().unwrap();
        let mut runner = MigrationRunner::open(
            &graph,
            &db,
            SledColumnStore::open(&db).unwrap(),
            RunnerConfig::default(),
        )
        .unwrap();
        runner.apply_all().unwrap();
        let layout = runner.storage().table("realm").unwrap();

        let applied = runner.applied().unwrap();
        let node = graph.find("0002_org_type").unwrap();
        let (before, _) = replay(&graph, &applied[..1]).unwrap();
        let (planned, _) = runner.plan_reversal(node, before).unwrap();

        let err = runner
            .commit_node(node.id(), &planned, |_| {
                Err(crate::error::Error::InvalidData("record tree unavailable".into()).into())
            })
            .unwrap_err();
        assert_eq!(err.operation_index(), Some(0));
        assert_eq!(runner.storage().table("realm").unwrap(), layout);
        assert_eq!(runner.applied().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_applied_node() {
        let graph = two_node_graph();
        let db = sled::Config::new().temporary(true).open().unwrap();
        ApplicationRecord::open(&db)
            .unwrap()
            .record(&id("0007_gone"), "00")
            .unwrap();

        let result = MigrationRunner::open(
            &graph,
            &db,
            SledColumnStore::open(&db).unwrap(),
            RunnerConfig::default(),
        );
        assert!(matches!(
            result,
            Err(MigrationError::AppliedMigrationMissing { .. })
        ));
    }
}
