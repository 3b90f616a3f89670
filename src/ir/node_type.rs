use super::port::{DataType, Direction, Port};
use super::{EXECUTE, ON_FAILURE, ON_SUCCESS};
use crate::error::UnknownDataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The firing rule applied to a node's inbound control-flow connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecuteWhen {
    /// Fires once every inbound control predecessor has signaled.
    #[default]
    Conjunction,
    /// Fires on the first inbound signal.
    Disjunction,
    /// Defers to a predicate supplied with the node implementation.
    Custom,
}

impl ExecuteWhen {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecuteWhen::Conjunction => "CONJUNCTION",
            ExecuteWhen::Disjunction => "DISJUNCTION",
            ExecuteWhen::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for ExecuteWhen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecuteWhen {
    type Err = UnknownDataType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CONJUNCTION" => Ok(ExecuteWhen::Conjunction),
            "DISJUNCTION" => Ok(ExecuteWhen::Disjunction),
            "CUSTOM" => Ok(ExecuteWhen::Custom),
            _ => Err(UnknownDataType(s.trim().to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeVariant {
    #[default]
    Function,
    /// Declared without an implementation body.
    Stub,
    /// Synthesized by the `@map` macro; never hand-written.
    MapIterator,
}

/// A reusable node definition. Ports are kept in declaration order because macro
/// expansion infers "the first data input/output" from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeType {
    pub name: String,
    pub function_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
    pub has_success_port: bool,
    pub has_failure_port: bool,
    #[serde(default)]
    pub execute_when: ExecuteWhen,
    #[serde(default)]
    pub is_async: bool,
    #[serde(default)]
    pub variant: NodeVariant,
    /// Pure data node without control-flow ports.
    #[serde(default)]
    pub expression: bool,
    /// Instances only run when one of their outputs is demanded.
    #[serde(default)]
    pub pull_execution: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_text: Option<String>,
}

impl NodeType {
    /// A node type with the standard `execute` input and `onSuccess`/`onFailure` outputs.
    pub fn function(name: &str) -> Self {
        Self {
            name: name.to_string(),
            function_name: name.to_string(),
            label: None,
            description: None,
            inputs: vec![Port::input(EXECUTE, DataType::Step)],
            outputs: vec![
                Port::output(ON_SUCCESS, DataType::Step),
                Port::output(ON_FAILURE, DataType::Step),
            ],
            has_success_port: true,
            has_failure_port: true,
            execute_when: ExecuteWhen::Conjunction,
            is_async: false,
            variant: NodeVariant::Function,
            expression: false,
            pull_execution: false,
            function_text: None,
        }
    }

    /// A pure data node: no control-flow ports at all.
    pub fn expression(name: &str) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
            has_success_port: false,
            has_failure_port: false,
            expression: true,
            ..Self::function(name)
        }
    }

    pub fn with_function_name(mut self, function_name: &str) -> Self {
        self.function_name = function_name.to_string();
        self
    }

    pub fn with_input(mut self, port: Port) -> Self {
        let port = Port {
            direction: Direction::Input,
            ..port
        };
        self.inputs.retain(|p| p.name != port.name);
        self.inputs.push(port);
        self
    }

    pub fn with_output(mut self, port: Port) -> Self {
        let port = Port {
            direction: Direction::Output,
            ..port
        };
        self.outputs.retain(|p| p.name != port.name);
        self.outputs.push(port);
        self
    }

    pub fn with_execute_when(mut self, execute_when: ExecuteWhen) -> Self {
        self.execute_when = execute_when;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn stub(mut self) -> Self {
        self.variant = NodeVariant::Stub;
        self
    }

    pub fn pull(mut self) -> Self {
        self.pull_execution = true;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_function_text(mut self, text: &str) -> Self {
        self.function_text = Some(text.to_string());
        self
    }

    pub fn input(&self, name: &str) -> Option<&Port> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&Port> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Non-control, non-scoped inputs in declaration order.
    pub fn data_inputs(&self) -> impl Iterator<Item = &Port> {
        self.inputs
            .iter()
            .filter(|p| !p.is_control_flow() && !p.is_scoped())
    }

    /// Non-control, non-scoped outputs in declaration order.
    pub fn data_outputs(&self) -> impl Iterator<Item = &Port> {
        self.outputs
            .iter()
            .filter(|p| !p.is_control_flow() && !p.is_scoped())
    }

    pub fn control_inputs(&self) -> impl Iterator<Item = &Port> {
        self.inputs.iter().filter(|p| p.is_control_flow())
    }

    /// Ports (inputs then outputs) bound to the named inner scope.
    pub fn scoped_ports<'a>(&'a self, scope: &'a str) -> impl Iterator<Item = &'a Port> + 'a {
        self.inputs
            .iter()
            .chain(self.outputs.iter())
            .filter(move |p| p.scope.as_deref() == Some(scope))
    }

    /// Distinct scope names declared on this type's ports, in first-seen order.
    pub fn scope_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for port in self.inputs.iter().chain(self.outputs.iter()) {
            if let Some(scope) = port.scope.as_deref() {
                if !names.contains(&scope) {
                    names.push(scope);
                }
            }
        }
        names
    }

    pub fn is_map_iterator(&self) -> bool {
        self.variant == NodeVariant::MapIterator
    }

    pub fn is_stub(&self) -> bool {
        self.variant == NodeVariant::Stub
    }
}
