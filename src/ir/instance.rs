use super::port::DataType;
use crate::annotation::SourceLocation;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Places an instance inside a named scope owned by another instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    pub scope: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Per-instance override of a port declared on the node type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<DataType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PortOverride {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.data_type.is_none() && self.default.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub minimized: bool,
    #[serde(default)]
    pub pull_execution: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub port_overrides: BTreeMap<String, PortOverride>,
}

/// A placed occurrence of a node type within a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInstance {
    pub id: String,
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(default)]
    pub config: InstanceConfig,
    /// Where the instance was declared, when it came from annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl NodeInstance {
    pub fn new(id: &str, node_type: &str) -> Self {
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            parent: None,
            config: InstanceConfig::default(),
            location: None,
        }
    }

    pub fn with_parent(mut self, id: &str, scope: &str) -> Self {
        self.parent = Some(ParentRef {
            id: id.to_string(),
            scope: scope.to_string(),
        });
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.config.label = Some(label.to_string());
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.config.position = Some(Position { x, y });
        self
    }

    pub fn minimized(mut self) -> Self {
        self.config.minimized = true;
        self
    }

    pub fn pull(mut self) -> Self {
        self.config.pull_execution = true;
        self
    }

    pub fn with_port_override(mut self, port: &str, port_override: PortOverride) -> Self {
        self.config
            .port_overrides
            .insert(port.to_string(), port_override);
        self
    }

    pub fn at_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn port_override(&self, port: &str) -> Option<&PortOverride> {
        self.config.port_overrides.get(port)
    }

    /// True when the instance sits in the scope `scope` owned by `owner`.
    pub fn is_in_scope(&self, owner: &str, scope: &str) -> bool {
        self.parent
            .as_ref()
            .is_some_and(|p| p.id == owner && p.scope == scope)
    }
}
