use crate::ir::{Connection, EXIT, START, Workflow};
use crate::validator::{Diagnostic, DiagnosticCode, RuleContext, ValidationRule};
use ahash::{AHashMap, AHashSet};

/// Endpoint existence, direction, duplicate and multi-consumer checks.
pub struct ConnectionRule;

impl ValidationRule for ConnectionRule {
    fn id(&self) -> &'static str {
        "connections"
    }

    fn description(&self) -> &'static str {
        "Connections join existing output ports to existing input ports"
    }

    fn validate(&self, workflow: &Workflow, _context: &RuleContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();
        let mut seen: AHashSet<&Connection> = AHashSet::new();
        let mut consumers: AHashMap<(&str, &str), Vec<&Connection>> = AHashMap::new();
        let mut consumer_order: Vec<(&str, &str)> = Vec::new();

        for connection in &workflow.connections {
            if !seen.insert(connection) {
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticCode::DuplicateConnection,
                        format!("Connection '{}' is declared more than once", connection),
                    )
                    .with_connection(connection),
                );
                continue;
            }

            let source_ok = check_source(workflow, connection, &mut diagnostics);
            let target_ok = check_target(workflow, connection, &mut diagnostics);
            if source_ok && target_ok {
                let key = (connection.to.node.as_str(), connection.to.port.as_str());
                let entry = consumers.entry(key).or_default();
                if entry.is_empty() {
                    consumer_order.push(key);
                }
                entry.push(connection);
            }
        }

        for key in consumer_order {
            let Some(incoming) = consumers.get(&key).filter(|c| c.len() > 1) else {
                continue;
            };
            let Some(port) = workflow.input_port(key.0, key.1) else {
                continue;
            };
            // STEP inputs combine their signals through the node's trigger rule.
            if port.is_control_flow() || port.multi {
                continue;
            }
            let sources: Vec<String> = incoming.iter().map(|c| c.from.to_string()).collect();
            diagnostics.push(
                Diagnostic::error(
                    DiagnosticCode::MultipleConnectionsToInput,
                    format!(
                        "Input '{}.{}' receives {} connections ({}) but is not a multi port",
                        key.0,
                        key.1,
                        incoming.len(),
                        sources.join(", ")
                    ),
                )
                .with_node(key.0)
                .with_connection(incoming[1])
                .with_location(workflow.instance(key.0).and_then(|i| i.location.as_ref())),
            );
        }

        diagnostics
    }
}

fn check_source(workflow: &Workflow, connection: &Connection, out: &mut Vec<Diagnostic>) -> bool {
    let from = &connection.from;
    if from.node == EXIT {
        out.push(
            Diagnostic::error(
                DiagnosticCode::InvalidConnectionDirection,
                format!("'{}' cannot be a connection source", connection.from),
            )
            .with_connection(connection),
        );
        return false;
    }
    if !workflow.has_node(&from.node) {
        out.push(
            Diagnostic::error(
                DiagnosticCode::UnknownSourceNode,
                format!("Connection source node '{}' does not exist", from.node),
            )
            .with_node(&from.node)
            .with_connection(connection),
        );
        return false;
    }
    // Unknown node types are reported by the structural rule.
    if from.node != START && workflow.instance_type(&from.node).is_none() {
        return false;
    }
    if workflow.output_port(&from.node, &from.port).is_some() {
        return true;
    }
    let diagnostic = if workflow.input_port(&from.node, &from.port).is_some() {
        Diagnostic::error(
            DiagnosticCode::InvalidConnectionDirection,
            format!("'{}' is an input and cannot be a connection source", from),
        )
    } else {
        Diagnostic::error(
            DiagnosticCode::UnknownSourcePort,
            format!("Node '{}' has no output port '{}'", from.node, from.port),
        )
    };
    out.push(
        diagnostic
            .with_node(&from.node)
            .with_connection(connection)
            .with_location(workflow.instance(&from.node).and_then(|i| i.location.as_ref())),
    );
    false
}

fn check_target(workflow: &Workflow, connection: &Connection, out: &mut Vec<Diagnostic>) -> bool {
    let to = &connection.to;
    if to.node == START {
        out.push(
            Diagnostic::error(
                DiagnosticCode::InvalidConnectionDirection,
                format!("'{}' cannot be a connection target", connection.to),
            )
            .with_connection(connection),
        );
        return false;
    }
    if !workflow.has_node(&to.node) {
        out.push(
            Diagnostic::error(
                DiagnosticCode::UnknownTargetNode,
                format!("Connection target node '{}' does not exist", to.node),
            )
            .with_node(&to.node)
            .with_connection(connection),
        );
        return false;
    }
    if to.node != EXIT && workflow.instance_type(&to.node).is_none() {
        return false;
    }
    if workflow.input_port(&to.node, &to.port).is_some() {
        return true;
    }
    let diagnostic = if workflow.output_port(&to.node, &to.port).is_some() {
        Diagnostic::error(
            DiagnosticCode::InvalidConnectionDirection,
            format!("'{}' is an output and cannot be a connection target", to),
        )
    } else {
        Diagnostic::error(
            DiagnosticCode::UnknownTargetPort,
            format!("Node '{}' has no input port '{}'", to.node, to.port),
        )
    };
    out.push(
        diagnostic
            .with_node(&to.node)
            .with_connection(connection)
            .with_location(workflow.instance(&to.node).and_then(|i| i.location.as_ref())),
    );
    false
}
