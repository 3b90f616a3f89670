use super::cancel::AbortSignal;
use super::context::{ExecutionContext, PullExecutor, VariableAddress};
use super::events::{EventKind, EventSink, ExecutionStatus};
use super::registry::{NodeCall, NodeRegistry, Outputs, TriggerState};
use crate::codegen::{CompiledWorkflow, InputBinding, Invocation, Iteration, Literal, Region, SourceRef, Step, Trigger};
use crate::config::ExecutorOptions;
use crate::error::{NodeError, RuntimeError};
use crate::expander::ITERATE_SCOPE;
use crate::expander::map::{ITEM, RESULTS, START_ITEM};
use crate::ir::{EXECUTE, ExecuteWhen, ON_FAILURE, ON_SUCCESS, START};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// What a workflow invocation hands back to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResult {
    pub on_success: bool,
    pub on_failure: bool,
    /// Values reaching the workflow's return ports.
    #[serde(flatten)]
    pub outputs: Map<String, Value>,
}

impl WorkflowResult {
    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }
}

/// Runs a [`CompiledWorkflow`] against a [`NodeRegistry`].
///
/// The interpreter is asynchronous throughout; [`Executor::call`] drives it to
/// completion synchronously and fails with `Suspended` if any node actually suspends.
pub struct Executor {
    runner: Runner,
    sink: Option<Arc<dyn EventSink>>,
    signal: Option<AbortSignal>,
}

impl Executor {
    pub fn new(program: CompiledWorkflow, registry: NodeRegistry) -> Self {
        Self {
            runner: Runner {
                program: Arc::new(program),
                registry: Arc::new(registry),
                options: ExecutorOptions::default(),
            },
            sink: None,
            signal: None,
        }
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.runner.options = options;
        self
    }

    /// Attaches a sink for debug events and turns tracing on.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self.runner.options.trace = true;
        self
    }

    pub fn with_abort_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn program(&self) -> &CompiledWorkflow {
        &self.runner.program
    }

    pub fn options(&self) -> ExecutorOptions {
        self.runner.options
    }

    /// A fresh context wired to this executor's abort signal and, when events are
    /// enabled, its sink.
    pub fn context(&self) -> ExecutionContext {
        let mut context = ExecutionContext::new();
        if let Some(signal) = &self.signal {
            context = context.with_abort_signal(signal.clone());
        }
        if let Some(sink) = &self.sink {
            if self.runner.options.emits_events(self.runner.program.production) {
                context = context.with_event_sink(Arc::clone(sink));
            }
        }
        context
    }

    /// Runs a synchronous workflow to completion.
    pub fn call(&self, execute: bool, params: Value) -> Result<WorkflowResult, RuntimeError> {
        let program = &self.runner.program;
        if program.is_async {
            return Err(RuntimeError::AsyncRequired(program.name.clone()));
        }
        let mut context = self.context();
        self.call_with_context(&mut context, execute, params)
            .now_or_never()
            .unwrap_or_else(|| Err(RuntimeError::Suspended(program.name.clone())))
    }

    pub async fn call_async(&self, execute: bool, params: Value) -> Result<WorkflowResult, RuntimeError> {
        let mut context = self.context();
        self.call_with_context(&mut context, execute, params).await
    }

    /// Runs the workflow on a caller-supplied context, leaving every variable and
    /// execution record in it for inspection.
    pub async fn call_with_context(
        &self,
        context: &mut ExecutionContext,
        execute: bool,
        params: Value,
    ) -> Result<WorkflowResult, RuntimeError> {
        let params = match params {
            Value::Object(params) => params,
            Value::Null => Map::new(),
            other => return Err(RuntimeError::InvalidParams(other.to_string())),
        };
        let program = &self.runner.program;
        debug!(workflow = %program.name, execute, "workflow started");

        let start = context.add_execution(START);
        context.set_variable(VariableAddress::new(START, EXECUTE, start), Value::Bool(execute));
        for port in &program.start_ports {
            let value = params
                .get(&port.name)
                .cloned()
                .or_else(|| port.default.as_ref().map(Literal::to_value));
            match value {
                Some(value) => {
                    context.set_variable(VariableAddress::new(START, &port.name, start), value)
                }
                None if !port.optional => {
                    warn!(workflow = %program.name, param = %port.name, "required parameter missing")
                }
                None => {}
            }
        }

        if let Err(error) = self.runner.run_region(&program.root, context).await {
            if error.is_cancellation() {
                context.emit(
                    EventKind::WorkflowCompleted,
                    json!({ "workflow": program.name, "status": ExecutionStatus::Cancelled }),
                );
            }
            return Err(error);
        }

        let exit = &program.exit;
        let (on_success, on_failure) = if exit.success.is_empty() && exit.failure.is_empty() {
            (execute, false)
        } else {
            (
                exit.success.iter().any(|s| context.is_signaled(&s.instance, &s.port)),
                exit.failure.iter().any(|s| context.is_signaled(&s.instance, &s.port)),
            )
        };
        let mut outputs = Map::new();
        for (name, sources) in &exit.outputs {
            let mut value = Value::Null;
            for source in sources {
                if let Some(found) = self.runner.read(source, context).await? {
                    value = found;
                    break;
                }
            }
            outputs.insert(name.clone(), value);
        }

        let result = WorkflowResult {
            on_success,
            on_failure,
            outputs,
        };
        context.emit(
            EventKind::WorkflowCompleted,
            serde_json::to_value(&result).unwrap_or(Value::Null),
        );
        debug!(workflow = %program.name, on_success, on_failure, "workflow completed");
        Ok(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Firing {
    Triggered,
    Pulled,
    Stub,
}

/// The interpreter shared by the executor and its pull executors.
#[derive(Clone)]
struct Runner {
    program: Arc<CompiledWorkflow>,
    registry: Arc<NodeRegistry>,
    options: ExecutorOptions,
}

/// Runs a lazily evaluated step when one of its outputs is first read.
struct PullStep {
    runner: Runner,
    invocation: Invocation,
}

impl PullExecutor for PullStep {
    fn pull<'a>(&'a self, context: &'a mut ExecutionContext) -> BoxFuture<'a, Result<(), RuntimeError>> {
        self.runner.fire(&self.invocation, context, Firing::Pulled)
    }
}

fn report_status(context: &ExecutionContext, instance: &str, index: usize, status: ExecutionStatus) {
    context.emit(
        EventKind::StatusChanged,
        json!({ "instance": instance, "index": index, "status": status }),
    );
}

impl Runner {
    fn run_region<'a>(
        &'a self,
        region: &'a Region,
        context: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        async move {
            for invocation in region.pulls() {
                context.register_pull_executor(
                    &invocation.instance,
                    PullStep {
                        runner: self.clone(),
                        invocation: invocation.clone(),
                    },
                );
            }
            for step in &region.steps {
                match step {
                    Step::Invoke(invocation) => self.fire(invocation, context, Firing::Triggered).await?,
                    Step::Stub(invocation) => self.fire(invocation, context, Firing::Stub).await?,
                    Step::Pull(_) => {}
                    Step::Iterate(iteration) => self.iterate(iteration, context).await?,
                }
            }
            Ok(())
        }
        .boxed()
    }

    fn armed(
        &self,
        trigger: &Trigger,
        function: &str,
        instance: &str,
        context: &ExecutionContext,
    ) -> Result<bool, RuntimeError> {
        let signals: Vec<bool> = trigger
            .sources
            .iter()
            .map(|s| context.is_signaled(&s.instance, &s.port))
            .collect();
        Ok(match trigger.when {
            ExecuteWhen::Conjunction => !signals.is_empty() && signals.iter().all(|s| *s),
            ExecuteWhen::Disjunction => signals.iter().any(|s| *s),
            ExecuteWhen::Custom => {
                let predicate = self.registry.trigger(function).ok_or_else(|| {
                    RuntimeError::MissingTriggerPredicate {
                        function: function.to_string(),
                        instance: instance.to_string(),
                    }
                })?;
                predicate(&TriggerState {
                    instance: instance.to_string(),
                    signals: trigger.sources.iter().cloned().zip(signals).collect(),
                })
            }
        })
    }

    /// Reads the latest value of an output. `None` when it was never produced.
    async fn read(
        &self,
        source: &SourceRef,
        context: &mut ExecutionContext,
    ) -> Result<Option<Value>, RuntimeError> {
        match context.latest_output(&source.instance, &source.port).await {
            Ok(value) => Ok(Some(value)),
            Err(RuntimeError::VariableNotFound(_)) => {
                trace!(%source, "no value produced");
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    /// The value delivered to one input port; `None` leaves an optional port out of
    /// the call entirely.
    async fn resolve_binding(
        &self,
        binding: &InputBinding,
        context: &mut ExecutionContext,
    ) -> Result<Option<Value>, RuntimeError> {
        let mut values = Vec::with_capacity(binding.sources.len());
        for source in &binding.sources {
            if let Some(value) = self.read(source, context).await? {
                values.push(value);
            }
        }
        let value = if binding.multi && !binding.sources.is_empty() {
            Some(Value::Array(values))
        } else {
            values.into_iter().next()
        };
        let value = value.or_else(|| binding.default.as_ref().map(Literal::to_value));
        let value = match (value, binding.coerce) {
            (Some(Value::Array(items)), Some(target)) if binding.multi => Some(Value::Array(
                items.into_iter().map(|v| target.coerce(v)).collect(),
            )),
            (Some(value), Some(target)) => Some(target.coerce(value)),
            (value, _) => value,
        };
        Ok(match value {
            None if !binding.optional => Some(Value::Null),
            value => value,
        })
    }

    async fn resolve_inputs(
        &self,
        bindings: &[InputBinding],
        context: &mut ExecutionContext,
    ) -> Result<Outputs, RuntimeError> {
        let mut inputs = Outputs::new();
        for binding in bindings {
            if let Some(value) = self.resolve_binding(binding, context).await? {
                inputs.insert(binding.port.clone(), value);
            }
        }
        Ok(inputs)
    }

    fn fire<'a>(
        &'a self,
        invocation: &'a Invocation,
        context: &'a mut ExecutionContext,
        firing: Firing,
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        async move {
            let instance = invocation.instance.as_str();
            if firing != Firing::Pulled
                && !self.armed(&invocation.trigger, &invocation.function, instance, context)?
            {
                trace!(instance, "trigger not armed");
                return Ok(());
            }
            context.check_aborted(Some(instance))?;

            let index = context.add_execution(instance);
            report_status(context, instance, index, ExecutionStatus::Running);
            let inputs = self.resolve_inputs(&invocation.inputs, context).await?;

            let result = if firing == Firing::Stub {
                warn!(instance, node_type = %invocation.node_type, "stub node reached");
                Err(NodeError(format!(
                    "node type '{}' has no implementation",
                    invocation.node_type
                )))
            } else {
                let implementation = self.registry.get(&invocation.function).ok_or_else(|| {
                    RuntimeError::MissingImplementation {
                        function: invocation.function.clone(),
                        instance: instance.to_string(),
                    }
                })?;
                debug!(instance, function = %invocation.function, index, "invoking node");
                implementation
                    .invoke(NodeCall {
                        instance: instance.to_string(),
                        index,
                        inputs,
                    })
                    .await
            };
            self.record(invocation, index, result, context)
        }
        .boxed()
    }

    /// Stores a node's outputs and control signals for occurrence `index`.
    fn record(
        &self,
        invocation: &Invocation,
        index: usize,
        result: Result<Outputs, NodeError>,
        context: &mut ExecutionContext,
    ) -> Result<(), RuntimeError> {
        let instance = invocation.instance.as_str();
        let address = |port: &str| VariableAddress::new(instance, port, index);

        let (succeeded, failed, mut values) = match result {
            Ok(mut values) => {
                let failed = values.remove(ON_FAILURE).and_then(|v| v.as_bool());
                let succeeded = values
                    .remove(ON_SUCCESS)
                    .and_then(|v| v.as_bool())
                    .unwrap_or(!failed.unwrap_or(false));
                (succeeded, failed.unwrap_or(!succeeded), Some(values))
            }
            Err(error) if invocation.expression => {
                return Err(RuntimeError::ExpressionFailed {
                    instance: instance.to_string(),
                    message: error.0,
                });
            }
            Err(error) => {
                warn!(instance, index, %error, "node failed");
                context.emit(
                    EventKind::LogError,
                    json!({ "instance": instance, "index": index, "message": error.0 }),
                );
                (false, true, None)
            }
        };

        if let Some(values) = values.as_mut() {
            for name in &invocation.outputs {
                let value = values.remove(name).unwrap_or(Value::Null);
                context.set_variable(address(name), value);
            }
        }
        for name in &invocation.step_outputs {
            let signaled = values
                .as_mut()
                .and_then(|v| v.remove(name))
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            context.set_variable(address(name), Value::Bool(signaled));
        }
        if invocation.success_port {
            context.set_variable(address(ON_SUCCESS), Value::Bool(succeeded));
        }
        if invocation.failure_port {
            context.set_variable(address(ON_FAILURE), Value::Bool(failed));
        }

        let status = if succeeded {
            ExecutionStatus::Succeeded
        } else {
            ExecutionStatus::Failed
        };
        report_status(context, instance, index, status);
        Ok(())
    }

    /// Runs the body once per element, each in its own scope, stopping at the first
    /// element whose body fails.
    fn iterate<'a>(
        &'a self,
        iteration: &'a Iteration,
        context: &'a mut ExecutionContext,
    ) -> BoxFuture<'a, Result<(), RuntimeError>> {
        async move {
            let instance = iteration.instance.as_str();
            if !self.armed(&iteration.trigger, instance, instance, context)? {
                trace!(instance, "trigger not armed");
                return Ok(());
            }
            context.check_aborted(Some(instance))?;

            let index = context.add_execution(instance);
            let address = |port: &str| VariableAddress::new(instance, port, index);
            report_status(context, instance, index, ExecutionStatus::Running);

            let items = match self.resolve_binding(&iteration.items, context).await? {
                Some(Value::Array(items)) => items,
                other => {
                    let found = other.map_or_else(|| "nothing".to_string(), |v| v.to_string());
                    let message = format!("expected an array of items, found {}", found);
                    warn!(instance, index, %message, "map iteration failed");
                    context.emit(
                        EventKind::LogError,
                        json!({ "instance": instance, "index": index, "message": message }),
                    );
                    context.set_variable(address(ON_SUCCESS), Value::Bool(false));
                    context.set_variable(address(ON_FAILURE), Value::Bool(true));
                    report_status(context, instance, index, ExecutionStatus::Failed);
                    return Ok(());
                }
            };

            let mut captured = Vec::with_capacity(iteration.body.captures.len());
            for source in &iteration.body.captures {
                let Some(value) = self.read(source, context).await? else {
                    continue;
                };
                if let Some(at) = context.latest_index(&source.instance, &source.port) {
                    captured.push((VariableAddress::new(&source.instance, &source.port, at), value));
                }
            }

            debug!(instance, items = items.len(), "map iteration started");
            let mut results = Vec::with_capacity(items.len());
            let mut failed = false;
            for (position, item) in items.into_iter().enumerate() {
                context.check_aborted(Some(instance))?;
                let mut scope =
                    context.create_scope(instance, index, ITERATE_SCOPE, self.options.clean_scopes);
                if !self.options.clean_scopes {
                    // Inherited stores still hold the previous element's body outputs.
                    for id in iteration.body.instances() {
                        scope.forget(id);
                    }
                }
                for (at, value) in &captured {
                    scope.set_variable(at.clone(), value.clone());
                }
                scope.set_variable(address(START_ITEM), Value::Bool(true));
                scope.set_variable(address(ITEM), item);

                self.run_region(&iteration.body, &mut scope).await?;

                let processed = match &iteration.processed {
                    Some(source) => self.read(source, &mut scope).await?.unwrap_or(Value::Null),
                    None => Value::Null,
                };
                let signaled = |sources: &[SourceRef]| {
                    sources.iter().any(|s| scope.is_signaled(&s.instance, &s.port))
                };
                let element_failed = signaled(&iteration.failure)
                    || (!iteration.success.is_empty() && !signaled(&iteration.success));
                context.merge_scope(scope);

                if element_failed {
                    debug!(instance, position, "map iteration stopped at failed element");
                    failed = true;
                    break;
                }
                results.push(processed);
            }

            context.set_variable(address(RESULTS), Value::Array(results));
            context.set_variable(address(ON_SUCCESS), Value::Bool(!failed));
            context.set_variable(address(ON_FAILURE), Value::Bool(failed));
            let status = if failed {
                ExecutionStatus::Failed
            } else {
                ExecutionStatus::Succeeded
            };
            report_status(context, instance, index, status);
            Ok(())
        }
        .boxed()
    }
}
