//! The executable step program produced by the generator.
//!
//! Every type here round-trips through bincode, so none of them use
//! `skip_serializing_if`, internally tagged enums or `serde_json::Value` directly;
//! literal values travel as JSON text in [`Literal`].

use crate::ir::{DataType, ExecuteWhen};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A JSON value stored as its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Literal(pub String);

impl Literal {
    pub fn from_value(value: &Value) -> Self {
        Literal(value.to_string())
    }

    pub fn to_value(&self) -> Value {
        serde_json::from_str(&self.0).unwrap_or(Value::Null)
    }
}

/// An output port read by a binding: `instance.port`, with `Start` for workflow
/// parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    pub instance: String,
    pub port: String,
}

impl SourceRef {
    pub fn new(instance: &str, port: &str) -> Self {
        Self {
            instance: instance.to_string(),
            port: port.to_string(),
        }
    }
}

impl std::fmt::Display for SourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.instance, self.port)
    }
}

/// Inbound control-flow wiring of a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub when: ExecuteWhen,
    pub sources: Vec<SourceRef>,
}

/// How one data input gets its value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputBinding {
    pub port: String,
    /// Connected outputs in connection order.
    pub sources: Vec<SourceRef>,
    pub default: Option<Literal>,
    pub optional: bool,
    /// Collect every source into an array.
    pub multi: bool,
    /// Set when at least one source needs converting to this type.
    pub coerce: Option<DataType>,
}

/// One node invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub instance: String,
    pub node_type: String,
    /// Registry key of the implementation.
    pub function: String,
    pub is_async: bool,
    pub expression: bool,
    pub trigger: Trigger,
    pub inputs: Vec<InputBinding>,
    /// Declared data outputs.
    pub outputs: Vec<String>,
    /// Additional `@step` outputs besides `onSuccess`/`onFailure`.
    pub step_outputs: Vec<String>,
    pub success_port: bool,
    pub failure_port: bool,
}

/// A map iterator and the body it runs once per element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iteration {
    pub instance: String,
    pub trigger: Trigger,
    pub items: InputBinding,
    pub body: Region,
    /// Body outputs wired to the iterator's scoped `success`/`failure`/`processed` inputs.
    pub success: Vec<SourceRef>,
    pub failure: Vec<SourceRef>,
    pub processed: Option<SourceRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Step {
    /// Runs when its trigger is armed.
    Invoke(Invocation),
    /// Registered at region start, runs when one of its outputs is read.
    Pull(Invocation),
    /// Placeholder for an unimplemented node type (draft output only).
    Stub(Invocation),
    Iterate(Iteration),
}

impl Step {
    pub fn instance(&self) -> &str {
        match self {
            Step::Invoke(i) | Step::Pull(i) | Step::Stub(i) => &i.instance,
            Step::Iterate(i) => &i.instance,
        }
    }
}

/// An ordered list of steps sharing one execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    /// `(owner, scope)` for iteration bodies, `None` for the top level.
    pub scope: Option<(String, String)>,
    pub steps: Vec<Step>,
    /// Values produced outside the region that its steps read. They are copied into
    /// each fresh scope before the body runs.
    pub captures: Vec<SourceRef>,
}

impl Region {
    pub fn pulls(&self) -> impl Iterator<Item = &Invocation> {
        self.steps.iter().filter_map(|s| match s {
            Step::Pull(invocation) => Some(invocation),
            _ => None,
        })
    }

    /// Every instance run by this region, nested iteration bodies included.
    pub fn instances(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        for step in &self.steps {
            ids.push(step.instance());
            if let Step::Iterate(iteration) = step {
                ids.extend(iteration.body.instances());
            }
        }
        ids
    }
}

/// A declared workflow parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub data_type: DataType,
    pub optional: bool,
    pub default: Option<Literal>,
}

/// What reaches the virtual `Exit` node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitPlan {
    pub success: Vec<SourceRef>,
    pub failure: Vec<SourceRef>,
    /// `(return name, connected sources)`
    pub outputs: Vec<(String, Vec<SourceRef>)>,
}

/// A generated workflow: the unit the runtime executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledWorkflow {
    pub name: String,
    pub function_name: String,
    pub is_async: bool,
    /// Suppresses debug events regardless of executor options.
    pub production: bool,
    pub start_ports: Vec<ParamSpec>,
    pub root: Region,
    pub exit: ExitPlan,
}

impl CompiledWorkflow {
    /// Every step, nested iteration bodies included, in program order.
    pub fn all_steps(&self) -> Vec<&Step> {
        fn walk<'a>(region: &'a Region, out: &mut Vec<&'a Step>) {
            for step in &region.steps {
                out.push(step);
                if let Step::Iterate(iteration) = step {
                    walk(&iteration.body, out);
                }
            }
        }
        let mut steps = Vec::new();
        walk(&self.root, &mut steps);
        steps
    }

    pub fn step(&self, instance: &str) -> Option<&Step> {
        self.all_steps().into_iter().find(|s| s.instance() == instance)
    }
}
