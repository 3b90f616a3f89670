use super::{Expansion, require_node};
use crate::error::ExpandError;
use crate::ir::{
    Connection, EXECUTE, EXIT, NodeType, ON_FAILURE, ON_SUCCESS, PathRoute, PathStep, PortRef,
    START, Workflow,
};

const KIND: &str = "path";

/// Control hops first, then data: each hop target's data inputs are fed from the
/// nearest earlier step exposing an output of the same name. Existing connections
/// are not consulted, so the result depends only on the steps and the node types.
pub(super) fn expand(workflow: &Workflow, steps: &[PathStep]) -> Result<Expansion, ExpandError> {
    if steps.len() < 2 {
        return Err(ExpandError::InvalidPath(format!(
            "a path needs at least two steps, found {}",
            steps.len()
        )));
    }

    let mut types: Vec<Option<&NodeType>> = Vec::with_capacity(steps.len());
    for (position, step) in steps.iter().enumerate() {
        if step.node == START && position != 0 {
            return Err(ExpandError::InvalidPath(
                "'Start' may only open a path".to_string(),
            ));
        }
        if step.node == EXIT && position != steps.len() - 1 {
            return Err(ExpandError::InvalidPath(
                "'Exit' may only close a path".to_string(),
            ));
        }
        if step.node == START && step.route == Some(PathRoute::Fail) {
            return Err(ExpandError::InvalidPath(
                "'Start' has no failure route".to_string(),
            ));
        }
        types.push(require_node(workflow, KIND, &step.node)?);
    }

    let mut expansion = Expansion::default();

    // Control: expression steps are skipped, the hop comes from the last step that
    // has control outputs.
    let mut armed: Option<PortRef> = None;
    for (step, node_type) in steps.iter().zip(&types) {
        let is_expression = node_type.is_some_and(|t| t.expression);
        if is_expression {
            continue;
        }
        if let Some(from) = armed.take() {
            let to_port = if step.node == EXIT {
                if from.node == START {
                    ON_SUCCESS.to_string()
                } else {
                    from.port.clone()
                }
            } else {
                EXECUTE.to_string()
            };
            expansion.connect(Connection::new(from, PortRef::new(&step.node, &to_port)));
        }
        armed = control_output(step, *node_type);
    }

    // Data: nearest ancestor with a same-named output.
    for target in 1..steps.len() {
        let inputs: Vec<String> = match types[target] {
            Some(node_type) => node_type.data_inputs().map(|p| p.name.clone()).collect(),
            None => workflow.exit_data_ports().map(|p| p.name.clone()).collect(),
        };
        for input in inputs {
            let ancestor = (0..target).rev().find(|&i| {
                workflow
                    .output_port(&steps[i].node, &input)
                    .is_some_and(|p| !p.is_control_flow() && !p.is_scoped())
            });
            if let Some(source) = ancestor {
                expansion.connect(Connection::new(
                    PortRef::new(&steps[source].node, &input),
                    PortRef::new(&steps[target].node, &input),
                ));
            }
        }
    }

    Ok(expansion)
}

fn control_output(step: &PathStep, node_type: Option<&NodeType>) -> Option<PortRef> {
    if step.node == START {
        return Some(PortRef::new(START, EXECUTE));
    }
    let node_type = node_type?;
    match step.route.unwrap_or(PathRoute::Ok) {
        PathRoute::Ok if node_type.has_success_port => Some(PortRef::new(&step.node, ON_SUCCESS)),
        PathRoute::Fail if node_type.has_failure_port => {
            Some(PortRef::new(&step.node, ON_FAILURE))
        }
        _ => None,
    }
}
