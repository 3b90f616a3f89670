//! Structural differences between two versions of a workflow.

use crate::ir::{Connection, Macro, NodeInstance, Workflow};
use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};

/// An instance present in both versions whose node type or configuration changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceChange {
    pub id: String,
    pub before: NodeInstance,
    pub after: NodeInstance,
}

impl InstanceChange {
    pub fn type_changed(&self) -> bool {
        self.before.node_type != self.after.node_type
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDiff {
    pub added_instances: Vec<NodeInstance>,
    pub removed_instances: Vec<String>,
    pub changed_instances: Vec<InstanceChange>,
    pub added_connections: Vec<Connection>,
    pub removed_connections: Vec<Connection>,
    pub added_node_types: Vec<String>,
    pub removed_node_types: Vec<String>,
    /// Node types declared in both versions with different definitions.
    pub changed_node_types: Vec<String>,
    pub added_macros: Vec<Macro>,
    pub removed_macros: Vec<Macro>,
}

/// Compares `before` with `after`. Entries keep the declaration order of the version
/// they come from.
pub fn diff_workflows(before: &Workflow, after: &Workflow) -> WorkflowDiff {
    let mut diff = WorkflowDiff::default();

    let old_instances: AHashMap<&str, &NodeInstance> =
        before.instances.iter().map(|i| (i.id.as_str(), i)).collect();
    let new_ids: AHashSet<&str> = after.instances.iter().map(|i| i.id.as_str()).collect();
    for instance in &after.instances {
        match old_instances.get(instance.id.as_str()) {
            None => diff.added_instances.push(instance.clone()),
            Some(old) if *old != instance => diff.changed_instances.push(InstanceChange {
                id: instance.id.clone(),
                before: (*old).clone(),
                after: instance.clone(),
            }),
            Some(_) => {}
        }
    }
    diff.removed_instances = before
        .instances
        .iter()
        .filter(|i| !new_ids.contains(i.id.as_str()))
        .map(|i| i.id.clone())
        .collect();

    let old_connections: AHashSet<&Connection> = before.connections.iter().collect();
    let new_connections: AHashSet<&Connection> = after.connections.iter().collect();
    diff.added_connections = after
        .connections
        .iter()
        .filter(|c| !old_connections.contains(c))
        .cloned()
        .collect();
    diff.removed_connections = before
        .connections
        .iter()
        .filter(|c| !new_connections.contains(c))
        .cloned()
        .collect();

    for node_type in &after.node_types {
        match before.node_type(&node_type.name) {
            None => diff.added_node_types.push(node_type.name.clone()),
            Some(old) if old != node_type => diff.changed_node_types.push(node_type.name.clone()),
            Some(_) => {}
        }
    }
    diff.removed_node_types = before
        .node_types
        .iter()
        .filter(|t| after.node_type(&t.name).is_none())
        .map(|t| t.name.clone())
        .collect();

    diff.added_macros = after
        .macros
        .iter()
        .filter(|m| !before.macros.contains(m))
        .cloned()
        .collect();
    diff.removed_macros = before
        .macros
        .iter()
        .filter(|m| !after.macros.contains(m))
        .cloned()
        .collect();

    diff
}

impl WorkflowDiff {
    pub fn has_changes(&self) -> bool {
        self.change_count() > 0
    }

    pub fn change_count(&self) -> usize {
        self.added_instances.len()
            + self.removed_instances.len()
            + self.changed_instances.len()
            + self.added_connections.len()
            + self.removed_connections.len()
            + self.added_node_types.len()
            + self.removed_node_types.len()
            + self.changed_node_types.len()
            + self.added_macros.len()
            + self.removed_macros.len()
    }

    /// A one-line human-readable summary, e.g. `"2 instances added, 1 connection removed"`.
    pub fn summary(&self) -> String {
        let counts = [
            (self.added_instances.len(), "instance", "added"),
            (self.removed_instances.len(), "instance", "removed"),
            (self.changed_instances.len(), "instance", "changed"),
            (self.added_connections.len(), "connection", "added"),
            (self.removed_connections.len(), "connection", "removed"),
            (self.added_node_types.len(), "node type", "added"),
            (self.removed_node_types.len(), "node type", "removed"),
            (self.changed_node_types.len(), "node type", "changed"),
            (self.added_macros.len(), "macro", "added"),
            (self.removed_macros.len(), "macro", "removed"),
        ];
        let parts: Vec<String> = counts
            .iter()
            .filter(|(n, _, _)| *n > 0)
            .map(|(n, noun, verb)| {
                format!("{} {}{} {}", n, noun, if *n == 1 { "" } else { "s" }, verb)
            })
            .collect();
        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}
