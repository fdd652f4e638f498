//! Dependency ordering for a task map
//!
//! Layers are computed with Kahn's algorithm: every task in layer N depends
//! only on tasks in layers 0..N. Tasks inside a layer are sorted by key, so
//! the order is deterministic for a given map.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use keel_common::{Error, Result};

use crate::task::{TaskKey, TaskMap};

/// Tasks grouped into dependency layers
#[derive(Debug, Clone, PartialEq)]
pub struct TaskGraph {
    layers: Vec<Vec<TaskKey>>,
    dependencies: BTreeMap<TaskKey, BTreeSet<TaskKey>>,
}

impl TaskGraph {
    /// Resolve dependencies and compute layers
    ///
    /// A task's explicit dependencies win over the references it holds.
    /// References to tasks missing from the map are an error.
    pub fn build<C>(tasks: &TaskMap<C>) -> Result<Self> {
        let mut dependencies: BTreeMap<TaskKey, BTreeSet<TaskKey>> = BTreeMap::new();
        for (key, task) in tasks {
            let deps = task
                .dependencies(tasks)
                .unwrap_or_else(|| task.references());
            let mut resolved = BTreeSet::new();
            for dep in deps {
                if dep == *key {
                    return Err(Error::DependencyCycle {
                        from: key.to_string(),
                        to: dep.to_string(),
                    });
                }
                if !tasks.contains_key(&dep) {
                    return Err(Error::invalid_input(format!(
                        "task {key} depends on unknown task {dep}"
                    )));
                }
                resolved.insert(dep);
            }
            dependencies.insert(key.clone(), resolved);
        }
        Self::from_dependencies(dependencies)
    }

    /// Compute layers from an explicit dependency map
    pub fn from_dependencies(dependencies: BTreeMap<TaskKey, BTreeSet<TaskKey>>) -> Result<Self> {
        let mut placed: BTreeSet<TaskKey> = BTreeSet::new();
        let mut layers: Vec<Vec<TaskKey>> = Vec::new();

        while placed.len() < dependencies.len() {
            let layer: Vec<TaskKey> = dependencies
                .iter()
                .filter(|(key, _)| !placed.contains(*key))
                .filter(|(_, deps)| deps.iter().all(|d| placed.contains(d)))
                .map(|(key, _)| key.clone())
                .collect();

            if layer.is_empty() {
                return Err(match find_cycle_edge(&dependencies, &placed) {
                    Some((from, to)) => Error::DependencyCycle {
                        from: from.to_string(),
                        to: to.to_string(),
                    },
                    None => Error::precondition("task graph cannot make progress"),
                });
            }

            debug!(layer = layers.len(), tasks = layer.len(), "computed task layer");
            placed.extend(layer.iter().cloned());
            layers.push(layer);
        }

        Ok(Self {
            layers,
            dependencies,
        })
    }

    /// Layers in execution order
    pub fn layers(&self) -> &[Vec<TaskKey>] {
        &self.layers
    }

    /// All keys in execution order
    pub fn ordered(&self) -> Vec<TaskKey> {
        self.layers.iter().flatten().cloned().collect()
    }

    /// Resolved dependencies of `key`
    pub fn dependencies_of(&self, key: &TaskKey) -> Option<&BTreeSet<TaskKey>> {
        self.dependencies.get(key)
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// No tasks
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }
}

/// An edge on a cycle among the unplaced tasks
///
/// Every unplaced task has an unplaced dependency, so walking those edges
/// from any start must revisit a node.
fn find_cycle_edge<'a>(
    dependencies: &'a BTreeMap<TaskKey, BTreeSet<TaskKey>>,
    placed: &BTreeSet<TaskKey>,
) -> Option<(&'a TaskKey, &'a TaskKey)> {
    let unplaced_dep = |key: &TaskKey| {
        dependencies
            .get(key)
            .and_then(|deps| deps.iter().find(|d| !placed.contains(*d)))
    };

    let mut visited: Vec<&TaskKey> = Vec::new();
    let mut current = dependencies.keys().find(|k| !placed.contains(*k))?;
    loop {
        let next = unplaced_dep(current)?;
        if visited.contains(&next) || next == current {
            return Some((current, next));
        }
        visited.push(current);
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> TaskKey {
        TaskKey::new("Test", name)
    }

    fn deps(edges: &[(&str, &[&str])]) -> BTreeMap<TaskKey, BTreeSet<TaskKey>> {
        edges
            .iter()
            .map(|(k, ds)| (key(k), ds.iter().map(|d| key(d)).collect()))
            .collect()
    }

    #[test]
    fn layers_respect_dependencies() {
        let graph = TaskGraph::from_dependencies(deps(&[
            ("instance", &["network", "lb"]),
            ("lb", &["network"]),
            ("network", &[]),
            ("dns", &["lb"]),
            ("sshkey", &[]),
        ]))
        .unwrap();
        let names: Vec<Vec<String>> = graph
            .layers()
            .iter()
            .map(|l| l.iter().map(|k| k.name.clone()).collect())
            .collect();
        assert_eq!(
            names,
            vec![
                vec!["network", "sshkey"],
                vec!["lb"],
                vec!["dns", "instance"],
            ]
        );
    }

    #[test]
    fn cycle_reports_an_edge_on_the_cycle() {
        let err = TaskGraph::from_dependencies(deps(&[
            ("a", &["b"]),
            ("b", &["c"]),
            ("c", &["a"]),
            ("d", &[]),
        ]))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("dependency cycle detected: Test/"), "{msg}");
        assert!(!msg.contains("Test/d"));
    }

    #[test]
    fn empty_graph_has_no_layers() {
        let graph = TaskGraph::from_dependencies(BTreeMap::new()).unwrap();
        assert!(graph.is_empty());
        assert!(graph.layers().is_empty());
    }
}
