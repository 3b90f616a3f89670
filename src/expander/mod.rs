//! Macro expansion.
//!
//! Every macro is expanded by a pure function of `(workflow, macro)` into an
//! [`Expansion`]: the node types, instances, connections and scopes it stands for.
//! Nothing is written until an expansion has been computed in full, so a failing
//! macro never leaves half of itself behind. [`expand`] applies the macros of a
//! workflow in declaration order and is all-or-nothing for the whole workflow.
//!
//! The same expansion functions back [`coverage`], which the emitter uses to decide
//! which parts of a workflow are spelled by a macro line rather than explicitly.

mod fan;
pub mod map;
mod path;

pub use map::{ITERATE_SCOPE, iterator_type_name};

use crate::error::ExpandError;
use crate::ir::{
    Connection, Macro, NodeInstance, NodeType, ParentRef, Port, Workflow, is_virtual, scope_key,
};
use ahash::AHashSet;
use tracing::debug;

/// The canonical graph fragment a single macro stands for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Expansion {
    pub node_types: Vec<NodeType>,
    pub instances: Vec<NodeInstance>,
    pub connections: Vec<Connection>,
    /// `(owner, scope, members)`
    pub scopes: Vec<(String, String, Vec<String>)>,
    /// `(instance, parent)` assignments.
    pub parents: Vec<(String, ParentRef)>,
}

impl Expansion {
    fn connect(&mut self, connection: Connection) {
        if !self.connections.contains(&connection) {
            self.connections.push(connection);
        }
    }

    /// Writes the fragment into `workflow`. Already-present instances, scope members
    /// and connections are left alone, which makes applying twice a no-op.
    pub fn apply(&self, workflow: Workflow) -> Workflow {
        let mut workflow = self
            .node_types
            .iter()
            .cloned()
            .fold(workflow, Workflow::with_node_type);

        for instance in &self.instances {
            if workflow.instance(&instance.id).is_none() {
                workflow = workflow.with_instance(instance.clone());
            }
        }

        for (id, parent) in &self.parents {
            for instance in workflow.instances.iter_mut().filter(|i| &i.id == id) {
                instance.parent = Some(parent.clone());
            }
        }

        for (owner, scope, members) in &self.scopes {
            let entry = workflow.scopes.entry(scope_key(owner, scope)).or_default();
            for member in members {
                if !entry.contains(member) {
                    entry.push(member.clone());
                }
            }
        }

        for connection in &self.connections {
            if !workflow.connections.contains(connection) {
                workflow = workflow.with_connection(connection.clone());
            }
        }

        workflow
    }
}

/// Computes the expansion of one macro against `workflow` without modifying it.
pub fn expand_macro(workflow: &Workflow, declared: &Macro) -> Result<Expansion, ExpandError> {
    match declared {
        Macro::Map {
            iterator,
            child,
            ports,
            source,
        } => map::expand(workflow, iterator, child, ports.as_ref(), source),
        Macro::Path { steps } => path::expand(workflow, steps),
        Macro::FanOut { source, targets } => fan::expand_out(workflow, source, targets),
        Macro::FanIn { sources, target } => fan::expand_in(workflow, sources, target),
    }
}

/// Expands every recorded macro. On error the input workflow is dropped untouched by
/// any partial result.
pub fn expand(workflow: Workflow) -> Result<Workflow, ExpandError> {
    let macros = workflow.macros.clone();
    let mut expanded = workflow;
    for declared in &macros {
        let expansion = expand_macro(&expanded, declared)?;
        debug!(
            workflow = %expanded.name,
            kind = declared.kind(),
            connections = expansion.connections.len(),
            instances = expansion.instances.len(),
            "Expanded macro"
        );
        expanded = expansion.apply(expanded);
    }
    Ok(expanded)
}

/// The parts of a workflow that its macros account for.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    pub connections: AHashSet<Connection>,
    pub instances: AHashSet<String>,
    pub node_types: AHashSet<String>,
    /// Scope keys (`owner.scope`).
    pub scopes: AHashSet<String>,
}

impl Coverage {
    pub fn covers_connection(&self, connection: &Connection) -> bool {
        self.connections.contains(connection)
    }

    pub fn covers_instance(&self, id: &str) -> bool {
        self.instances.contains(id)
    }

    pub fn covers_scope(&self, key: &str) -> bool {
        self.scopes.contains(key)
    }
}

/// Recomputes every macro against the already-expanded workflow and collects what
/// they produce.
pub fn coverage(workflow: &Workflow) -> Result<Coverage, ExpandError> {
    let mut covered = Coverage::default();
    for declared in &workflow.macros {
        let expansion = expand_macro(workflow, declared)?;
        covered.connections.extend(expansion.connections);
        covered
            .instances
            .extend(expansion.instances.into_iter().map(|i| i.id));
        covered
            .node_types
            .extend(expansion.node_types.into_iter().map(|t| t.name));
        covered.scopes.extend(
            expansion
                .scopes
                .iter()
                .map(|(owner, scope, _)| scope_key(owner, scope)),
        );
    }
    Ok(covered)
}

// ---- reference checks shared by the macro kinds ----

fn require_node<'w>(
    workflow: &'w Workflow,
    macro_kind: &'static str,
    id: &str,
) -> Result<Option<&'w NodeType>, ExpandError> {
    if is_virtual(id) {
        return Ok(None);
    }
    let instance = workflow
        .instance(id)
        .ok_or_else(|| ExpandError::UnknownInstance {
            macro_kind,
            id: id.to_string(),
        })?;
    workflow
        .node_type(&instance.node_type)
        .map(Some)
        .ok_or_else(|| ExpandError::UnknownNodeType {
            macro_kind,
            id: id.to_string(),
            node_type: instance.node_type.clone(),
        })
}

fn require_output<'w>(
    workflow: &'w Workflow,
    macro_kind: &'static str,
    node: &str,
    port: &str,
) -> Result<&'w Port, ExpandError> {
    require_node(workflow, macro_kind, node)?;
    workflow
        .output_port(node, port)
        .ok_or_else(|| ExpandError::UnknownPort {
            macro_kind,
            id: node.to_string(),
            port: port.to_string(),
        })
}

fn require_input<'w>(
    workflow: &'w Workflow,
    macro_kind: &'static str,
    node: &str,
    port: &str,
) -> Result<&'w Port, ExpandError> {
    require_node(workflow, macro_kind, node)?;
    workflow
        .input_port(node, port)
        .ok_or_else(|| ExpandError::UnknownPort {
            macro_kind,
            id: node.to_string(),
            port: port.to_string(),
        })
}
