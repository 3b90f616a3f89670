use super::{EXIT, START};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One endpoint of a connection: `node.port`, optionally qualified with `:scope`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRef {
    pub node: String,
    pub port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl PortRef {
    pub fn new(node: &str, port: &str) -> Self {
        Self {
            node: node.to_string(),
            port: port.to_string(),
            scope: None,
        }
    }

    pub fn scoped(mut self, scope: &str) -> Self {
        self.scope = Some(scope.to_string());
        self
    }

    pub fn is_start(&self) -> bool {
        self.node == START
    }

    pub fn is_exit(&self) -> bool {
        self.node == EXIT
    }

    /// Parses `node.port` or `node.port:scope`.
    pub fn parse(text: &str) -> Option<Self> {
        let (node, rest) = text.trim().split_once('.')?;
        let (port, scope) = match rest.split_once(':') {
            Some((port, scope)) => (port, Some(scope)),
            None => (rest, None),
        };
        let valid = |s: &str| !s.is_empty() && !s.contains(char::is_whitespace);
        if !valid(node) || !valid(port) || scope.is_some_and(|s| !valid(s)) {
            return None;
        }
        Some(Self {
            node: node.to_string(),
            port: port.to_string(),
            scope: scope.map(str::to_string),
        })
    }
}

impl fmt::Display for PortRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.port)?;
        if let Some(scope) = &self.scope {
            write!(f, ":{}", scope)?;
        }
        Ok(())
    }
}

/// A directed edge from an output port to an input port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Connection {
    pub from: PortRef,
    pub to: PortRef,
}

impl Connection {
    pub fn new(from: PortRef, to: PortRef) -> Self {
        Self { from, to }
    }

    /// Shorthand for an unscoped `from_node.from_port -> to_node.to_port` edge.
    pub fn between(from_node: &str, from_port: &str, to_node: &str, to_port: &str) -> Self {
        Self::new(
            PortRef::new(from_node, from_port),
            PortRef::new(to_node, to_port),
        )
    }

    /// True when either endpoint carries a scope qualifier.
    pub fn is_scoped(&self) -> bool {
        self.from.scope.is_some() || self.to.scope.is_some()
    }

    pub fn touches(&self, node: &str) -> bool {
        self.from.node == node || self.to.node == node
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}
