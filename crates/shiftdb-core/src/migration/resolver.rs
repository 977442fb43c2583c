//! Dependency resolution over the migration graph.
//!
//! Produces the pending nodes in an order where every node follows all of
//! its dependencies. The order is deterministic: among nodes that are ready
//! at the same time, the smallest identifier (sequence, then slug) goes
//! first.

use super::error::MigrationError;
use super::graph::MigrationGraph;
use super::id::MigrationId;
use super::node::MigrationNode;
use std::collections::{BTreeMap, BTreeSet};

/// Topological ordering of migration nodes.
pub struct DependencyResolver;

impl DependencyResolver {
    /// Check that every dependency names a node in the graph.
    pub fn validate(graph: &MigrationGraph) -> Result<(), MigrationError> {
        for node in graph.nodes() {
            for dep in node.dependencies() {
                if !graph.contains(dep) {
                    return Err(MigrationError::UnknownDependency {
                        migration: node.id().clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Order the whole graph as if nothing were applied.
    pub fn full_order(graph: &MigrationGraph) -> Result<Vec<&MigrationNode>, MigrationError> {
        Self::pending(graph, &BTreeSet::new())
    }

    /// Order the nodes not yet applied.
    ///
    /// Applied dependencies count as satisfied. Applied identifiers that are
    /// not in the graph are ignored here; the runner reports them.
    pub fn pending<'g>(
        graph: &'g MigrationGraph,
        applied: &BTreeSet<MigrationId>,
    ) -> Result<Vec<&'g MigrationNode>, MigrationError> {
        Self::validate(graph)?;
        Self::check_history(graph, applied)?;

        let mut in_degree: BTreeMap<&MigrationId, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&MigrationId, Vec<&MigrationId>> = BTreeMap::new();

        for node in graph.nodes().filter(|n| !applied.contains(n.id())) {
            let unsatisfied: Vec<_> = node
                .dependencies()
                .iter()
                .filter(|d| !applied.contains(*d))
                .collect();
            in_degree.insert(node.id(), unsatisfied.len());
            for dep in unsatisfied {
                dependents.entry(dep).or_default().push(node.id());
            }
        }

        let mut ready: BTreeSet<&MigrationId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(in_degree.len());
        while let Some(id) = ready.pop_first() {
            in_degree.remove(id);
            if let Some(node) = graph.get(id) {
                order.push(node);
            }
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if !in_degree.is_empty() {
            let blocked: BTreeSet<&MigrationId> = in_degree.keys().copied().collect();
            return Err(MigrationError::CyclicDependency {
                cycle: Self::find_cycle(graph, &blocked),
            });
        }

        Ok(order)
    }

    /// An applied node must not depend on an unapplied one.
    fn check_history(
        graph: &MigrationGraph,
        applied: &BTreeSet<MigrationId>,
    ) -> Result<(), MigrationError> {
        for id in applied {
            let Some(node) = graph.get(id) else {
                continue;
            };
            if let Some(dep) = node.dependencies().iter().find(|d| !applied.contains(*d)) {
                return Err(MigrationError::InconsistentHistory {
                    migration: id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
        Ok(())
    }

    /// Walk dependencies from the smallest blocked node until one repeats.
    ///
    /// Every blocked node has at least one blocked dependency, so the walk
    /// always closes a cycle. Each listed node depends on the next, and the
    /// last depends on the first.
    fn find_cycle(graph: &MigrationGraph, blocked: &BTreeSet<&MigrationId>) -> Vec<MigrationId> {
        let mut path: Vec<&MigrationId> = Vec::new();
        let mut current = blocked.first().copied();

        while let Some(id) = current {
            if let Some(start) = path.iter().position(|p| *p == id) {
                return path[start..].iter().map(|id| (*id).clone()).collect();
            }
            path.push(id);
            current = graph.get(id).and_then(|node| {
                node.dependencies()
                    .iter()
                    .filter(|d| blocked.contains(d))
                    .min()
            });
        }

        path.into_iter().cloned().collect()
    }
}
