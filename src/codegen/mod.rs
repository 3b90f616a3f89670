//! Turns a validated workflow into a [`CompiledWorkflow`] step program.
//!
//! Each region (the top level, and every map iterator's `iterate` scope) is ordered
//! with Kahn's algorithm over its own non-scoped connections. Map iterators become
//! [`Step::Iterate`] with their scope's members as the nested body.

mod artifact;
mod order;
mod program;
mod render;

pub use order::execution_order;
pub use program::*;

use crate::error::GenerateError;
use crate::expander::ITERATE_SCOPE;
use crate::expander::map::{FAILURE, ITEMS, PROCESSED, SUCCESS};
use crate::ir::{
    Compatibility, EXECUTE, EXIT, NodeInstance, NodeType, ON_FAILURE, ON_SUCCESS, ParentRef, Port,
    START, Workflow, scope_key,
};
use crate::validator::{ValidatedWorkflow, ValidationMode, effective_input_type, effective_output_type};
use ahash::AHashSet;
use tracing::{debug, instrument};

/// Code generator for validated workflows.
#[derive(Debug, Clone, Default)]
pub struct Generator {
    production: bool,
}

impl Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Production programs never emit debug events.
    pub fn production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    /// Generates a program from a workflow that passed validation. Stub node types are
    /// only accepted when it was validated in draft mode.
    pub fn generate(&self, validated: &ValidatedWorkflow) -> Result<CompiledWorkflow, GenerateError> {
        self.build(validated.workflow(), validated.mode() == ValidationMode::Draft)
    }

    /// Generates a program without a validation pass, placing stubs where node types
    /// have no implementation.
    pub fn generate_draft(&self, workflow: &Workflow) -> Result<CompiledWorkflow, GenerateError> {
        self.build(workflow, true)
    }

    #[instrument(level = "debug", skip_all, fields(workflow = %workflow.name))]
    fn build(&self, workflow: &Workflow, allow_stubs: bool) -> Result<CompiledWorkflow, GenerateError> {
        let root = build_region(workflow, None, allow_stubs)?;
        let start_ports = workflow
            .start_data_ports()
            .map(|port| ParamSpec {
                name: port.name.clone(),
                data_type: port.data_type,
                optional: port.optional || port.default.is_some(),
                default: port.default.as_ref().map(Literal::from_value),
            })
            .collect();
        let exit = ExitPlan {
            success: sources_into(workflow, EXIT, ON_SUCCESS, None),
            failure: sources_into(workflow, EXIT, ON_FAILURE, None),
            outputs: workflow
                .exit_data_ports()
                .map(|port| (port.name.clone(), sources_into(workflow, EXIT, &port.name, None)))
                .collect(),
        };

        let program = CompiledWorkflow {
            name: workflow.name.clone(),
            function_name: workflow.function_name.clone(),
            is_async: workflow.is_async(),
            production: self.production,
            start_ports,
            root,
            exit,
        };
        debug!(steps = program.all_steps().len(), "generated program");
        Ok(program)
    }
}

/// Outputs wired into `node.port`, in connection order. `scope` selects the scoped
/// side of an owner's port.
fn sources_into(workflow: &Workflow, node: &str, port: &str, scope: Option<&str>) -> Vec<SourceRef> {
    let mut sources: Vec<SourceRef> = Vec::new();
    for connection in workflow.connections_into(node) {
        if connection.to.port != port || connection.to.scope.as_deref() != scope {
            continue;
        }
        let source = SourceRef::new(&connection.from.node, &connection.from.port);
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

fn build_region(
    workflow: &Workflow,
    scope: Option<&ParentRef>,
    allow_stubs: bool,
) -> Result<Region, GenerateError> {
    let members: Vec<&NodeInstance> = workflow
        .instances
        .iter()
        .filter(|i| i.parent.as_ref() == scope)
        .collect();
    let ids: Vec<&str> = members.iter().map(|i| i.id.as_str()).collect();
    let member_set: AHashSet<&str> = ids.iter().copied().collect();
    let edges: Vec<(&str, &str)> = workflow
        .connections
        .iter()
        .filter(|c| !c.is_scoped())
        .filter(|c| member_set.contains(c.from.node.as_str()) && member_set.contains(c.to.node.as_str()))
        .map(|c| (c.from.node.as_str(), c.to.node.as_str()))
        .collect();

    let order = execution_order(&ids, &edges).map_err(|remaining| GenerateError::CycleInRegion {
        region: scope
            .map(|p| scope_key(&p.id, &p.scope))
            .unwrap_or_else(|| workflow.name.clone()),
        remaining: remaining.join(", "),
    })?;

    let mut steps = Vec::with_capacity(order.len());
    for position in order {
        let instance = members[position];
        let node_type = workflow.node_type(&instance.node_type).ok_or_else(|| {
            GenerateError::MissingNodeType {
                instance: instance.id.clone(),
                node_type: instance.node_type.clone(),
            }
        })?;

        let step = if node_type.is_map_iterator() {
            Step::Iterate(build_iteration(workflow, instance, node_type, allow_stubs)?)
        } else {
            let invocation = build_invocation(workflow, instance, node_type);
            if node_type.is_stub() {
                if !allow_stubs {
                    return Err(GenerateError::StubInFullGeneration(instance.id.clone()));
                }
                Step::Stub(invocation)
            } else if node_type.expression || node_type.pull_execution || instance.config.pull_execution {
                Step::Pull(invocation)
            } else {
                Step::Invoke(invocation)
            }
        };
        steps.push(step);
    }

    let captures = match scope {
        Some(parent) => region_captures(&steps, &member_set, &parent.id),
        None => Vec::new(),
    };
    Ok(Region {
        scope: scope.map(|p| (p.id.clone(), p.scope.clone())),
        steps,
        captures,
    })
}

/// Everything the steps of a scope read from outside it.
fn region_captures(steps: &[Step], members: &AHashSet<&str>, owner: &str) -> Vec<SourceRef> {
    let mut captures: Vec<SourceRef> = Vec::new();
    let mut note = |source: &SourceRef| {
        if source.instance != owner
            && !members.contains(source.instance.as_str())
            && !captures.contains(source)
        {
            captures.push(source.clone());
        }
    };
    for step in steps {
        match step {
            Step::Invoke(invocation) | Step::Pull(invocation) | Step::Stub(invocation) => {
                invocation.inputs.iter().flat_map(|b| &b.sources).for_each(&mut note);
            }
            Step::Iterate(iteration) => {
                iteration.items.sources.iter().for_each(&mut note);
                iteration.body.captures.iter().for_each(&mut note);
            }
        }
    }
    captures
}

fn trigger(workflow: &Workflow, instance: &NodeInstance, node_type: &NodeType) -> Trigger {
    Trigger {
        when: node_type.execute_when,
        sources: sources_into(workflow, &instance.id, EXECUTE, None),
    }
}

fn binding(workflow: &Workflow, instance: &NodeInstance, port: &Port) -> InputBinding {
    let sources = sources_into(workflow, &instance.id, &port.name, None);
    let target = effective_input_type(workflow, &instance.id, &port.name).unwrap_or(port.data_type);
    let needs_coercion = sources.iter().any(|s| {
        effective_output_type(workflow, &s.instance, &s.port)
            .is_some_and(|t| t.compatibility(target) == Compatibility::Coercible)
    });
    let default = instance
        .port_override(&port.name)
        .and_then(|o| o.default.as_ref())
        .or(port.default.as_ref())
        .map(Literal::from_value);

    InputBinding {
        port: port.name.clone(),
        sources,
        optional: port.optional || default.is_some(),
        default,
        multi: port.multi,
        coerce: needs_coercion.then_some(target),
    }
}

fn build_invocation(workflow: &Workflow, instance: &NodeInstance, node_type: &NodeType) -> Invocation {
    Invocation {
        instance: instance.id.clone(),
        node_type: node_type.name.clone(),
        function: node_type.function_name.clone(),
        is_async: node_type.is_async,
        expression: node_type.expression,
        trigger: trigger(workflow, instance, node_type),
        inputs: node_type
            .data_inputs()
            .map(|port| binding(workflow, instance, port))
            .collect(),
        outputs: node_type.data_outputs().map(|p| p.name.clone()).collect(),
        step_outputs: node_type
            .outputs
            .iter()
            .filter(|p| p.is_control_flow() && !p.is_scoped())
            .filter(|p| p.name != ON_SUCCESS && p.name != ON_FAILURE)
            .map(|p| p.name.clone())
            .collect(),
        success_port: node_type.has_success_port,
        failure_port: node_type.has_failure_port,
    }
}

fn build_iteration(
    workflow: &Workflow,
    instance: &NodeInstance,
    node_type: &NodeType,
    allow_stubs: bool,
) -> Result<Iteration, GenerateError> {
    if !workflow.scopes.contains_key(&scope_key(&instance.id, ITERATE_SCOPE)) {
        return Err(GenerateError::MissingIterationScope(instance.id.clone()));
    }
    let items = node_type
        .input(ITEMS)
        .map(|port| binding(workflow, instance, port))
        .ok_or_else(|| GenerateError::MissingIterationScope(instance.id.clone()))?;
    let body_scope = ParentRef {
        id: instance.id.clone(),
        scope: ITERATE_SCOPE.to_string(),
    };

    Ok(Iteration {
        instance: instance.id.clone(),
        trigger: trigger(workflow, instance, node_type),
        items,
        body: build_region(workflow, Some(&body_scope), allow_stubs)?,
        success: sources_into(workflow, &instance.id, SUCCESS, Some(ITERATE_SCOPE)),
        failure: sources_into(workflow, &instance.id, FAILURE, Some(ITERATE_SCOPE)),
        processed: sources_into(workflow, &instance.id, PROCESSED, Some(ITERATE_SCOPE))
            .into_iter()
            .next(),
    })
}
