use crate::codegen::SourceRef;
use crate::error::NodeError;
use ahash::AHashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Named values a node returns. `onSuccess`/`onFailure` booleans in the map override
/// the default outcome.
pub type Outputs = Map<String, Value>;

pub type NodeResult = Result<Outputs, NodeError>;

/// Builds an [`Outputs`] map from name/value pairs.
pub fn outputs<K: Into<String>>(pairs: impl IntoIterator<Item = (K, Value)>) -> Outputs {
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// What a node implementation receives for one execution occurrence.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeCall {
    pub instance: String,
    pub index: usize,
    pub inputs: Map<String, Value>,
}

impl NodeCall {
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.input(name).and_then(Value::as_f64)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.input(name).and_then(Value::as_str)
    }

    /// The input as a number, or a node error naming the port.
    pub fn require_number(&self, name: &str) -> Result<f64, NodeError> {
        self.number(name)
            .ok_or_else(|| NodeError(format!("input '{}' of '{}' is not a number", name, self.instance)))
    }
}

/// The control inputs of a node at the moment its trigger is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct TriggerState {
    pub instance: String,
    pub signals: Vec<(SourceRef, bool)>,
}

impl TriggerState {
    pub fn signaled(&self) -> usize {
        self.signals.iter().filter(|(_, s)| *s).count()
    }

    pub fn total(&self) -> usize {
        self.signals.len()
    }

    pub fn is_signaled(&self, instance: &str, port: &str) -> bool {
        self.signals
            .iter()
            .any(|(source, s)| *s && source.instance == instance && source.port == port)
    }
}

pub type SyncNode = Arc<dyn Fn(&NodeCall) -> NodeResult + Send + Sync>;
pub type AsyncNode = Arc<dyn Fn(NodeCall) -> BoxFuture<'static, NodeResult> + Send + Sync>;
pub type TriggerPredicate = Arc<dyn Fn(&TriggerState) -> bool + Send + Sync>;

#[derive(Clone)]
pub enum NodeImplementation {
    Sync(SyncNode),
    Async(AsyncNode),
}

impl NodeImplementation {
    pub fn is_async(&self) -> bool {
        matches!(self, NodeImplementation::Async(_))
    }

    pub(crate) async fn invoke(&self, call: NodeCall) -> NodeResult {
        match self {
            NodeImplementation::Sync(f) => f(&call),
            NodeImplementation::Async(f) => f(call).await,
        }
    }
}

impl fmt::Debug for NodeImplementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeImplementation::Sync(_) => f.write_str("Sync(..)"),
            NodeImplementation::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// Node implementations keyed by node type function name.
///
/// Constructed and owned by the host; nothing is registered globally.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    nodes: AHashMap<String, NodeImplementation>,
    triggers: AHashMap<String, TriggerPredicate>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync<F>(mut self, function: &str, implementation: F) -> Self
    where
        F: Fn(&NodeCall) -> NodeResult + Send + Sync + 'static,
    {
        self.nodes
            .insert(function.to_string(), NodeImplementation::Sync(Arc::new(implementation)));
        self
    }

    pub fn with_async<F, Fut>(mut self, function: &str, implementation: F) -> Self
    where
        F: Fn(NodeCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = NodeResult> + Send + 'static,
    {
        let wrapped: AsyncNode = Arc::new(move |call: NodeCall| implementation(call).boxed());
        self.nodes
            .insert(function.to_string(), NodeImplementation::Async(wrapped));
        self
    }

    /// Supplies the firing rule for a node type declared with `CUSTOM` execution.
    pub fn with_trigger<P>(mut self, function: &str, predicate: P) -> Self
    where
        P: Fn(&TriggerState) -> bool + Send + Sync + 'static,
    {
        self.triggers.insert(function.to_string(), Arc::new(predicate));
        self
    }

    pub fn get(&self, function: &str) -> Option<&NodeImplementation> {
        self.nodes.get(function)
    }

    pub fn trigger(&self, function: &str) -> Option<&TriggerPredicate> {
        self.triggers.get(function)
    }

    pub fn contains(&self, function: &str) -> bool {
        self.nodes.contains_key(function)
    }

    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(String::as_str)
    }
}

impl fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.functions().collect();
        names.sort_unstable();
        f.debug_struct("NodeRegistry")
            .field("nodes", &names)
            .field("triggers", &self.triggers.len())
            .finish()
    }
}
