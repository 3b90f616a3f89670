use super::{Expansion, require_node, require_output};
use crate::error::ExpandError;
use crate::ir::{
    Connection, DataType, EXECUTE, NodeInstance, NodeType, NodeVariant, ON_FAILURE, ON_SUCCESS,
    ParentRef, Port, PortRef, START, Workflow,
};

/// Name of the inner scope every map iterator owns.
pub const ITERATE_SCOPE: &str = "iterate";

pub const ITEMS: &str = "items";
pub const RESULTS: &str = "results";
/// Scoped output fired once per element.
pub const START_ITEM: &str = "start";
pub const ITEM: &str = "item";
pub const SUCCESS: &str = "success";
pub const FAILURE: &str = "failure";
pub const PROCESSED: &str = "processed";

const KIND: &str = "map";

/// The synthetic node type name generated for the iterator `iterator`.
pub fn iterator_type_name(iterator: &str) -> String {
    format!("__map_{}", iterator)
}

/// Builds the `MapIterator` node type wrapping a child that consumes `item_type` and
/// produces `processed_type`.
pub fn iterator_node_type(
    iterator: &str,
    item_type: DataType,
    processed_type: DataType,
) -> NodeType {
    let mut node_type = NodeType::function(&iterator_type_name(iterator))
        .with_input(Port::input(ITEMS, DataType::Array))
        .with_input(Port::input(SUCCESS, DataType::Step).scoped(ITERATE_SCOPE))
        .with_input(Port::input(FAILURE, DataType::Step).scoped(ITERATE_SCOPE))
        .with_input(Port::input(PROCESSED, processed_type).scoped(ITERATE_SCOPE))
        .with_output(Port::output(START_ITEM, DataType::Step).scoped(ITERATE_SCOPE))
        .with_output(Port::output(ITEM, item_type).scoped(ITERATE_SCOPE))
        .with_output(Port::output(RESULTS, DataType::Array));
    node_type.variant = NodeVariant::MapIterator;
    node_type
}

pub(super) fn expand(
    workflow: &Workflow,
    iterator: &str,
    child: &str,
    ports: Option<&(String, String)>,
    source: &PortRef,
) -> Result<Expansion, ExpandError> {
    let child_type = require_node(workflow, KIND, child)?.ok_or_else(|| {
        ExpandError::UnknownInstance {
            macro_kind: KIND,
            id: child.to_string(),
        }
    })?;
    require_output(workflow, KIND, &source.node, &source.port)?;

    let unknown_port = |port: &str| ExpandError::UnknownPort {
        macro_kind: KIND,
        id: child.to_string(),
        port: port.to_string(),
    };
    let (input, output) = match ports {
        Some((input, output)) => (
            child_type.input(input).ok_or_else(|| unknown_port(input))?,
            Some(child_type.output(output).ok_or_else(|| unknown_port(output))?),
        ),
        None => (
            child_type
                .data_inputs()
                .next()
                .ok_or_else(|| ExpandError::NoDataInput {
                    child: child.to_string(),
                })?,
            child_type.data_outputs().next(),
        ),
    };

    let type_name = iterator_type_name(iterator);
    let conflict = match workflow.instance(iterator) {
        Some(existing) if existing.node_type != type_name => Some(existing.node_type.clone()),
        _ if iterator == child || crate::ir::is_virtual(iterator) => Some(child_type.name.clone()),
        _ => None,
    };
    if let Some(node_type) = conflict {
        return Err(ExpandError::IdConflict {
            id: iterator.to_string(),
            node_type,
        });
    }

    let mut expansion = Expansion {
        node_types: vec![iterator_node_type(
            iterator,
            input.data_type,
            output.map_or(DataType::Any, |p| p.data_type),
        )],
        instances: vec![NodeInstance::new(iterator, &type_name)],
        ..Expansion::default()
    };

    expansion.connect(Connection::new(
        source.clone(),
        PortRef::new(iterator, ITEMS),
    ));
    expansion.connect(Connection::new(
        control_source(workflow, &source.node),
        PortRef::new(iterator, EXECUTE),
    ));

    let scoped = |port: &str| PortRef::new(iterator, port).scoped(ITERATE_SCOPE);
    if child_type.input(EXECUTE).is_some() {
        expansion.connect(Connection::new(
            scoped(START_ITEM),
            PortRef::new(child, EXECUTE),
        ));
        if child_type.has_success_port {
            expansion.connect(Connection::new(
                PortRef::new(child, ON_SUCCESS),
                scoped(SUCCESS),
            ));
        }
        if child_type.has_failure_port {
            expansion.connect(Connection::new(
                PortRef::new(child, ON_FAILURE),
                scoped(FAILURE),
            ));
        }
    }
    expansion.connect(Connection::new(
        scoped(ITEM),
        PortRef::new(child, &input.name),
    ));
    if let Some(output) = output {
        expansion.connect(Connection::new(
            PortRef::new(child, &output.name),
            scoped(PROCESSED),
        ));
    }

    expansion.scopes.push((
        iterator.to_string(),
        ITERATE_SCOPE.to_string(),
        vec![child.to_string()],
    ));
    expansion.parents.push((
        child.to_string(),
        ParentRef {
            id: iterator.to_string(),
            scope: ITERATE_SCOPE.to_string(),
        },
    ));
    Ok(expansion)
}

/// The control output that arms the iterator: `Start.execute` for workflow inputs and
/// expression sources, otherwise the source's `onSuccess`.
fn control_source(workflow: &Workflow, node: &str) -> PortRef {
    match workflow.instance_type(node) {
        Some(node_type) if node_type.has_success_port && !node_type.expression => {
            PortRef::new(node, ON_SUCCESS)
        }
        _ => PortRef::new(START, EXECUTE),
    }
}
