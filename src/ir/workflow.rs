use super::connection::Connection;
use super::instance::NodeInstance;
use super::macros::Macro;
use super::node_type::NodeType;
use super::port::{DataType, Direction, Port};
use super::{EXECUTE, EXIT, ON_FAILURE, ON_SUCCESS, START};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowMetadata {
    #[serde(default)]
    pub force_async: bool,
    #[serde(default)]
    pub strict_types: bool,
}

/// The root of the graph IR.
///
/// `scopes` maps `"ownerId.scopeName"` to the ordered member ids. `macros` holds the
/// provenance of sugared declarations; the canonical graph in `instances` and
/// `connections` already contains everything they expanded to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub name: String,
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub node_types: Vec<NodeType>,
    pub instances: Vec<NodeInstance>,
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub scopes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub macros: Vec<Macro>,
    pub start_ports: Vec<Port>,
    pub exit_ports: Vec<Port>,
    #[serde(default)]
    pub metadata: WorkflowMetadata,
}

/// Builds the `"owner.scope"` key used in [`Workflow::scopes`].
pub fn scope_key(owner: &str, scope: &str) -> String {
    format!("{}.{}", owner, scope)
}

/// Splits a scope key at its last dot into `(owner, scope)`.
pub fn split_scope_key(key: &str) -> Option<(&str, &str)> {
    key.rsplit_once('.')
        .filter(|(owner, scope)| !owner.is_empty() && !scope.is_empty())
}

impl Workflow {
    /// An empty workflow whose virtual `Start`/`Exit` carry only the control ports.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            function_name: name.to_string(),
            description: None,
            node_types: Vec::new(),
            instances: Vec::new(),
            connections: Vec::new(),
            scopes: BTreeMap::new(),
            macros: Vec::new(),
            start_ports: vec![Port::output(EXECUTE, DataType::Step)],
            exit_ports: vec![
                Port::input(ON_SUCCESS, DataType::Step),
                Port::input(ON_FAILURE, DataType::Step),
            ],
            metadata: WorkflowMetadata::default(),
        }
    }

    // ---- by-value builders ----

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_function_name(mut self, function_name: &str) -> Self {
        self.function_name = function_name.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    /// Adds a node type, replacing any existing type with the same name.
    pub fn with_node_type(mut self, node_type: NodeType) -> Self {
        match self.node_types.iter_mut().find(|t| t.name == node_type.name) {
            Some(existing) => *existing = node_type,
            None => self.node_types.push(node_type),
        }
        self
    }

    /// Appends an instance. Duplicate ids are left for the validator to report.
    pub fn with_instance(mut self, instance: NodeInstance) -> Self {
        self.instances.push(instance);
        self
    }

    /// Removes an instance together with every connection touching it and its
    /// scope memberships.
    pub fn without_instance(mut self, id: &str) -> Self {
        self.instances.retain(|i| i.id != id);
        self.connections.retain(|c| !c.touches(id));
        for members in self.scopes.values_mut() {
            members.retain(|m| m != id);
        }
        self.scopes
            .retain(|key, _| split_scope_key(key).is_none_or(|(owner, _)| owner != id));
        self
    }

    pub fn with_connection(mut self, connection: Connection) -> Self {
        self.connections.push(connection);
        self
    }

    /// Removes every connection equal to `connection`.
    pub fn without_connection(mut self, connection: &Connection) -> Self {
        self.connections.retain(|c| c != connection);
        self
    }

    /// Sets the members of the scope `scope` owned by `owner`.
    pub fn with_scope(mut self, owner: &str, scope: &str, members: Vec<String>) -> Self {
        self.scopes.insert(scope_key(owner, scope), members);
        self
    }

    /// Records macro provenance. Expansion is a separate step (see `expander`).
    pub fn with_macro(mut self, declared: Macro) -> Self {
        self.macros.push(declared);
        self
    }

    /// Adds a data parameter exposed as an output of the virtual `Start` node.
    pub fn with_start_port(mut self, port: Port) -> Self {
        let port = Port {
            direction: Direction::Output,
            ..port
        };
        self.start_ports.retain(|p| p.name != port.name);
        self.start_ports.push(port);
        self
    }

    /// Adds a return value received by the virtual `Exit` node.
    pub fn with_exit_port(mut self, port: Port) -> Self {
        let port = Port {
            direction: Direction::Input,
            ..port
        };
        self.exit_ports.retain(|p| p.name != port.name);
        self.exit_ports.push(port);
        self
    }

    pub fn strict_types(mut self, strict: bool) -> Self {
        self.metadata.strict_types = strict;
        self
    }

    pub fn force_async(mut self, force: bool) -> Self {
        self.metadata.force_async = force;
        self
    }

    // ---- lookups ----

    pub fn node_type(&self, name: &str) -> Option<&NodeType> {
        self.node_types.iter().find(|t| t.name == name)
    }

    pub fn instance(&self, id: &str) -> Option<&NodeInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    /// Resolves the node type of an instance.
    pub fn instance_type(&self, id: &str) -> Option<&NodeType> {
        self.instance(id).and_then(|i| self.node_type(&i.node_type))
    }

    /// True for `Start`, `Exit` and any declared instance id.
    pub fn has_node(&self, id: &str) -> bool {
        id == START || id == EXIT || self.instance(id).is_some()
    }

    /// Looks up a port a connection may originate from.
    pub fn output_port(&self, node: &str, port: &str) -> Option<&Port> {
        if node == START {
            return self.start_ports.iter().find(|p| p.name == port);
        }
        self.instance_type(node).and_then(|t| t.output(port))
    }

    /// Looks up a port a connection may terminate at.
    pub fn input_port(&self, node: &str, port: &str) -> Option<&Port> {
        if node == EXIT {
            return self.exit_ports.iter().find(|p| p.name == port);
        }
        self.instance_type(node).and_then(|t| t.input(port))
    }

    pub fn start_data_ports(&self) -> impl Iterator<Item = &Port> {
        self.start_ports.iter().filter(|p| !p.is_control_flow())
    }

    pub fn exit_data_ports(&self) -> impl Iterator<Item = &Port> {
        self.exit_ports.iter().filter(|p| !p.is_control_flow())
    }

    pub fn connections_into<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.connections.iter().filter(move |c| c.to.node == node)
    }

    pub fn connections_from<'a>(&'a self, node: &'a str) -> impl Iterator<Item = &'a Connection> {
        self.connections.iter().filter(move |c| c.from.node == node)
    }

    /// Instances not placed inside any scope, in declaration order.
    pub fn top_level_instances(&self) -> impl Iterator<Item = &NodeInstance> {
        self.instances.iter().filter(|i| i.parent.is_none())
    }

    /// Instances whose parent is `owner`/`scope`, in declaration order.
    pub fn scope_children<'a>(
        &'a self,
        owner: &'a str,
        scope: &'a str,
    ) -> impl Iterator<Item = &'a NodeInstance> {
        self.instances
            .iter()
            .filter(move |i| i.is_in_scope(owner, scope))
    }

    /// True when the workflow needs an asynchronous entry point.
    pub fn is_async(&self) -> bool {
        self.metadata.force_async
            || self
                .instances
                .iter()
                .filter_map(|i| self.node_type(&i.node_type))
                .any(|t| t.is_async)
    }
}
