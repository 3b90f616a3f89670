//! Execution support for compiled workflows.
//!
//! An [`ExecutionContext`] holds every value produced during one invocation, keyed by
//! `(instance, port, occurrence)`. The [`Executor`] walks a
//! [`CompiledWorkflow`](crate::codegen::CompiledWorkflow) step by step, calling node
//! implementations from a [`NodeRegistry`] and recording their outputs and control
//! signals in the context.

mod cancel;
mod context;
mod events;
mod executor;
mod registry;
mod slot;

pub use cancel::AbortSignal;
pub use context::{ExecutionContext, ExecutionRecord, FnPull, PullExecutor, ScopeInfo, VariableAddress};
pub use events::{DebugEvent, EventKind, EventSink, ExecutionStatus, MemorySink, TracingSink};
pub use executor::{Executor, WorkflowResult};
pub use registry::{
    AsyncNode, NodeCall, NodeImplementation, NodeRegistry, NodeResult, Outputs, SyncNode,
    TriggerPredicate, TriggerState, outputs,
};
pub use slot::{LazyValue, Slot};
