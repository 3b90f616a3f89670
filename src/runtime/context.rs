use super::cancel::AbortSignal;
use super::events::{DebugEvent, EventKind, EventSink};
use super::slot::Slot;
use crate::error::RuntimeError;
use ahash::{AHashMap, AHashSet};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, trace};

/// Where a value lives: the output `port` of `instance` during execution occurrence `index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariableAddress {
    pub instance: String,
    pub port: String,
    pub index: usize,
}

impl VariableAddress {
    pub fn new(instance: &str, port: &str, index: usize) -> Self {
        Self {
            instance: instance.to_string(),
            port: port.to_string(),
            index,
        }
    }
}

impl fmt::Display for VariableAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}#{}", self.instance, self.port, self.index)
    }
}

/// One entry of the execution log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRecord {
    pub instance: String,
    pub index: usize,
    /// Occurrence index of the scope owner, for executions inside a scope.
    pub parent_index: Option<usize>,
    pub scope: Option<String>,
}

/// Identifies the scope a child context was created for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo {
    pub owner: String,
    pub owner_index: usize,
    pub name: String,
    pub clean: bool,
}

/// Computes the outputs of a lazily evaluated instance when one of them is first read.
pub trait PullExecutor: Send + Sync {
    fn pull<'a>(&'a self, context: &'a mut ExecutionContext) -> BoxFuture<'a, Result<(), RuntimeError>>;
}

/// Adapts a synchronous closure into a [`PullExecutor`].
pub struct FnPull<F>(pub F);

impl<F> PullExecutor for FnPull<F>
where
    F: Fn(&mut ExecutionContext) -> Result<(), RuntimeError> + Send + Sync,
{
    fn pull<'a>(&'a self, context: &'a mut ExecutionContext) -> BoxFuture<'a, Result<(), RuntimeError>> {
        futures::future::ready((self.0)(context)).boxed()
    }
}

/// The variable store and execution log of one workflow invocation (or one scope of it).
///
/// Occurrence indices come from a counter shared with every scope created from this
/// context, so they stay unique across nested scopes.
pub struct ExecutionContext {
    variables: AHashMap<VariableAddress, Slot>,
    latest: AHashMap<(String, String), usize>,
    executions: Vec<ExecutionRecord>,
    counter: Arc<AtomicUsize>,
    pull_executors: AHashMap<String, Arc<dyn PullExecutor>>,
    pulled: AHashSet<String>,
    signal: Option<AbortSignal>,
    sink: Option<Arc<dyn EventSink>>,
    scope: Option<ScopeInfo>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            variables: AHashMap::new(),
            latest: AHashMap::new(),
            executions: Vec::new(),
            counter: Arc::new(AtomicUsize::new(0)),
            pull_executors: AHashMap::new(),
            pulled: AHashSet::new(),
            signal: None,
            sink: None,
            scope: None,
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("variables", &self.variables.len())
            .field("executions", &self.executions.len())
            .field("counter", &self.counter.load(Ordering::SeqCst))
            .field("scope", &self.scope)
            .finish()
    }
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn scope(&self) -> Option<&ScopeInfo> {
        self.scope.as_ref()
    }

    pub(crate) fn emit(&self, kind: EventKind, data: Value) {
        if let Some(sink) = &self.sink {
            sink.emit(DebugEvent::new(kind, data));
        }
    }

    // --- execution log ---

    /// Allocates the next occurrence index for `instance` and logs it. Inside a scope
    /// the record carries the owner's occurrence and the scope name.
    pub fn add_execution(&mut self, instance: &str) -> usize {
        let index = self.counter.fetch_add(1, Ordering::SeqCst);
        self.executions.push(ExecutionRecord {
            instance: instance.to_string(),
            index,
            parent_index: self.scope.as_ref().map(|s| s.owner_index),
            scope: self.scope.as_ref().map(|s| s.name.clone()),
        });
        index
    }

    pub fn executions(&self) -> &[ExecutionRecord] {
        &self.executions
    }

    /// Number of occurrence indices handed out so far.
    pub fn execution_count(&self) -> usize {
        self.counter.load(Ordering::SeqCst)
    }

    // --- variables ---

    pub fn set_variable(&mut self, address: VariableAddress, value: Value) {
        self.emit(
            EventKind::VariableSet,
            json!({
                "instance": address.instance,
                "port": address.port,
                "index": address.index,
                "value": value,
            }),
        );
        self.insert(address, Slot::Value(value));
    }

    /// Stores a value that is computed on first read.
    pub fn set_producer(&mut self, address: VariableAddress, producer: impl FnOnce() -> Value + Send + 'static) {
        self.insert(address, Slot::producer(producer));
    }

    /// Stores a value that is awaited on first read.
    pub fn set_async_producer(
        &mut self,
        address: VariableAddress,
        producer: impl Future<Output = Value> + Send + 'static,
    ) {
        self.insert(address, Slot::async_producer(producer));
    }

    fn insert(&mut self, address: VariableAddress, slot: Slot) {
        let key = (address.instance.clone(), address.port.clone());
        let latest = self.latest.entry(key).or_insert(address.index);
        *latest = (*latest).max(address.index);
        self.variables.insert(address, slot);
    }

    pub fn has_variable(&self, address: &VariableAddress) -> bool {
        self.variables.contains_key(address)
    }

    /// The highest occurrence index that wrote `instance.port` in this context.
    pub fn latest_index(&self, instance: &str, port: &str) -> Option<usize> {
        self.latest.get(&(instance.to_string(), port.to_string())).copied()
    }

    /// True when the latest value of a control output is `true`.
    pub fn is_signaled(&self, instance: &str, port: &str) -> bool {
        self.latest_index(instance, port)
            .and_then(|index| self.variables.get(&VariableAddress::new(instance, port, index)))
            .and_then(Slot::as_value)
            .is_some_and(|v| v == &Value::Bool(true))
    }

    /// Reads a variable without suspending. Fails with `Suspended` when the value
    /// depends on a producer or pull executor that does not complete immediately.
    pub fn get_variable(&mut self, address: &VariableAddress) -> Result<Value, RuntimeError> {
        self.get_variable_async(address)
            .now_or_never()
            .unwrap_or_else(|| Err(RuntimeError::Suspended(address.to_string())))
    }

    /// Reads a variable, running the instance's pull executor first when the address
    /// is empty and a producer is registered.
    pub fn get_variable_async<'a>(
        &'a mut self,
        address: &'a VariableAddress,
    ) -> BoxFuture<'a, Result<Value, RuntimeError>> {
        async move {
            if !self.variables.contains_key(address) {
                self.pull(&address.instance).await?;
            }
            self.resolve(address).await
        }
        .boxed()
    }

    /// Reads the most recent value of `instance.port`, pulling the instance if it has
    /// not produced one yet.
    pub fn latest_output<'a>(
        &'a mut self,
        instance: &'a str,
        port: &'a str,
    ) -> BoxFuture<'a, Result<Value, RuntimeError>> {
        async move {
            if self.latest_index(instance, port).is_none() {
                self.pull(instance).await?;
            }
            let index = self
                .latest_index(instance, port)
                .ok_or_else(|| RuntimeError::VariableNotFound(format!("{}.{}", instance, port)))?;
            self.resolve(&VariableAddress::new(instance, port, index)).await
        }
        .boxed()
    }

    async fn resolve(&mut self, address: &VariableAddress) -> Result<Value, RuntimeError> {
        let slot = self
            .variables
            .get(address)
            .cloned()
            .ok_or_else(|| RuntimeError::VariableNotFound(address.to_string()))?;
        let value = match slot {
            Slot::Value(value) => return Ok(value),
            Slot::Producer(lazy) => lazy.force(),
            Slot::AsyncProducer(future) => future.await,
        };
        trace!(%address, "producer resolved");
        self.set_variable(address.clone(), value.clone());
        Ok(value)
    }

    // --- pull execution ---

    /// Registers the producer of `instance`'s outputs. Registering again re-arms it.
    pub fn register_pull_executor(&mut self, instance: &str, executor: impl PullExecutor + 'static) {
        self.pulled.remove(instance);
        self.pull_executors.insert(instance.to_string(), Arc::new(executor));
    }

    pub fn has_pull_executor(&self, instance: &str) -> bool {
        self.pull_executors.contains_key(instance)
    }

    async fn pull(&mut self, instance: &str) -> Result<(), RuntimeError> {
        if self.pulled.contains(instance) {
            return Ok(());
        }
        let Some(executor) = self.pull_executors.get(instance).cloned() else {
            return Ok(());
        };
        self.pulled.insert(instance.to_string());
        trace!(instance, "pull execution");
        executor.pull(self).await
    }

    // --- scopes ---

    /// Creates the context for one run of `owner`'s `scope`. A clean scope starts with
    /// an empty store; otherwise it starts from a copy of this one. Both share the
    /// occurrence counter, abort signal, event sink and pull executors.
    pub fn create_scope(&self, owner: &str, owner_index: usize, scope: &str, clean: bool) -> ExecutionContext {
        let (variables, latest) = if clean {
            (AHashMap::new(), AHashMap::new())
        } else {
            (self.variables.clone(), self.latest.clone())
        };
        ExecutionContext {
            variables,
            latest,
            executions: Vec::new(),
            counter: Arc::clone(&self.counter),
            pull_executors: self.pull_executors.clone(),
            pulled: self.pulled.clone(),
            signal: self.signal.clone(),
            sink: self.sink.clone(),
            scope: Some(ScopeInfo {
                owner: owner.to_string(),
                owner_index,
                name: scope.to_string(),
                clean,
            }),
        }
    }

    /// Drops every value `instance` produced in this context and re-arms its pull
    /// executor, so the next read sees a fresh occurrence.
    pub fn forget(&mut self, instance: &str) {
        self.latest.retain(|(owner, _), _| owner != instance);
        self.variables.retain(|address, _| address.instance != instance);
        self.pulled.remove(instance);
    }

    /// Folds a finished scope back in: its variables and execution records become
    /// visible here and the counter never moves backwards.
    pub fn merge_scope(&mut self, child: ExecutionContext) {
        let merged = child.variables.len();
        for (address, slot) in child.variables {
            self.insert(address, slot);
        }
        self.executions.extend(child.executions);
        self.counter
            .fetch_max(child.counter.load(Ordering::SeqCst), Ordering::SeqCst);
        if let Some(scope) = &child.scope {
            debug!(owner = %scope.owner, scope = %scope.name, variables = merged, "merged scope");
        }
    }

    // --- cancellation ---

    pub fn is_aborted(&self) -> bool {
        self.signal.as_ref().is_some_and(AbortSignal::is_aborted)
    }

    /// Fails with `Cancelled` once the abort signal has fired.
    pub fn check_aborted(&self, instance: Option<&str>) -> Result<(), RuntimeError> {
        if self.is_aborted() {
            debug!(instance = instance.unwrap_or("<workflow>"), "execution cancelled");
            return Err(RuntimeError::Cancelled {
                occurrences: self.execution_count(),
                instance: instance.map(str::to_string),
            });
        }
        Ok(())
    }

    /// Clears variables, the execution log and the counter. Registered pull executors,
    /// the abort signal and the event sink stay attached.
    pub fn reset(&mut self) {
        self.variables.clear();
        self.latest.clear();
        self.executions.clear();
        self.pulled.clear();
        self.counter.store(0, Ordering::SeqCst);
    }
}
