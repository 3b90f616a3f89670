use super::connection::PortRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which control output a `@path` hop continues from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathRoute {
    Ok,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathStep {
    pub node: String,
    /// `None` when the suffix was omitted (behaves as `:ok`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<PathRoute>,
}

impl PathStep {
    pub fn new(node: &str) -> Self {
        Self {
            node: node.to_string(),
            route: None,
        }
    }

    pub fn with_route(mut self, route: PathRoute) -> Self {
        self.route = Some(route);
        self
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.node)?;
        match self.route {
            Some(PathRoute::Ok) => f.write_str(":ok"),
            Some(PathRoute::Fail) => f.write_str(":fail"),
            None => Ok(()),
        }
    }
}

/// A fan endpoint whose port may be left implicit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortTarget {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
}

impl PortTarget {
    pub fn node(node: &str) -> Self {
        Self {
            node: node.to_string(),
            port: None,
        }
    }

    pub fn port(node: &str, port: &str) -> Self {
        Self {
            node: node.to_string(),
            port: Some(port.to_string()),
        }
    }

    /// Parses `node` or `node.port`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() || text.contains(char::is_whitespace) {
            return None;
        }
        match text.split_once('.') {
            Some((node, port)) if !node.is_empty() && !port.is_empty() => {
                Some(Self::port(node, port))
            }
            Some(_) => None,
            None => Some(Self::node(text)),
        }
    }
}

impl fmt::Display for PortTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => write!(f, "{}.{}", self.node, port),
            None => f.write_str(&self.node),
        }
    }
}

/// Provenance of a sugared declaration. Kept beside the expanded graph so that
/// regeneration can emit the original one-line form again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Macro {
    Map {
        iterator: String,
        child: String,
        /// Explicit `(input -> output)` mapping on the child.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ports: Option<(String, String)>,
        source: PortRef,
    },
    Path {
        steps: Vec<PathStep>,
    },
    FanOut {
        source: PortRef,
        targets: Vec<PortTarget>,
    },
    FanIn {
        sources: Vec<PortTarget>,
        target: PortRef,
    },
}

impl Macro {
    /// Annotation name of the macro (`map`, `path`, `fanOut`, `fanIn`).
    pub fn kind(&self) -> &'static str {
        match self {
            Macro::Map { .. } => "map",
            Macro::Path { .. } => "path",
            Macro::FanOut { .. } => "fanOut",
            Macro::FanIn { .. } => "fanIn",
        }
    }

    /// Instance ids the macro refers to (virtual nodes included).
    pub fn referenced_nodes(&self) -> Vec<&str> {
        match self {
            Macro::Map { child, source, .. } => vec![child.as_str(), source.node.as_str()],
            Macro::Path { steps } => steps.iter().map(|s| s.node.as_str()).collect(),
            Macro::FanOut { source, targets } => std::iter::once(source.node.as_str())
                .chain(targets.iter().map(|t| t.node.as_str()))
                .collect(),
            Macro::FanIn { sources, target } => sources
                .iter()
                .map(|s| s.node.as_str())
                .chain(std::iter::once(target.node.as_str()))
                .collect(),
        }
    }
}
