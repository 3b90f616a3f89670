use crate::ir::{START, Workflow};
use crate::validator::{Diagnostic, DiagnosticCode, RuleContext, ValidationMode, ValidationRule};
use ahash::AHashSet;
use std::collections::VecDeque;

/// Stubs, unfed required inputs and unreachable instances. Full mode only.
pub struct DataFlowRule;

impl ValidationRule for DataFlowRule {
    fn id(&self) -> &'static str {
        "dataflow"
    }

    fn description(&self) -> &'static str {
        "Every instance is implemented, fed and reachable from Start"
    }

    fn applies_to(&self, mode: ValidationMode) -> bool {
        mode == ValidationMode::Full
    }

    fn validate(&self, workflow: &Workflow, _context: &RuleContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for instance in &workflow.instances {
            let Some(node_type) = workflow.node_type(&instance.node_type) else {
                continue;
            };
            let location = instance.location.as_ref();

            if node_type.is_stub() {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::StubNodeType,
                        format!(
                            "Instance '{}' uses node type '{}' which has no implementation",
                            instance.id, node_type.name
                        ),
                    )
                    .with_node(&instance.id)
                    .with_location(location),
                );
            }

            for port in node_type.data_inputs() {
                let defaulted = port.optional
                    || port.default.is_some()
                    || instance
                        .port_override(&port.name)
                        .is_some_and(|o| o.default.is_some());
                if defaulted {
                    continue;
                }
                let fed = workflow
                    .connections_into(&instance.id)
                    .any(|c| c.to.port == port.name);
                if !fed {
                    diagnostics.push(
                        Diagnostic::error(
                            DiagnosticCode::MissingRequiredInput,
                            format!(
                                "Required input '{}.{}' has no connection and no default",
                                instance.id, port.name
                            ),
                        )
                        .with_node(&instance.id)
                        .with_location(location),
                    );
                }
            }
        }

        let reached = control_reachable(workflow);
        for instance in &workflow.instances {
            let pulled = instance.config.pull_execution
                || workflow
                    .node_type(&instance.node_type)
                    .is_some_and(|t| t.expression || t.pull_execution);
            if pulled || reached.contains(instance.id.as_str()) {
                continue;
            }
            diagnostics.push(
                Diagnostic::warning(
                    DiagnosticCode::UnreachableNode,
                    format!(
                        "Instance '{}' is not reachable from Start through control flow",
                        instance.id
                    ),
                )
                .with_node(&instance.id)
                .with_location(instance.location.as_ref()),
            );
        }

        diagnostics
    }
}

/// Instances reachable from `Start` along STEP connections, scoped ones included.
fn control_reachable(workflow: &Workflow) -> AHashSet<&str> {
    let mut reached: AHashSet<&str> = AHashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([START]);
    reached.insert(START);

    while let Some(node) = queue.pop_front() {
        for connection in workflow.connections_from(node) {
            let is_control = workflow
                .output_port(node, &connection.from.port)
                .is_some_and(|p| p.is_control_flow());
            if is_control && reached.insert(connection.to.node.as_str()) {
                queue.push_back(connection.to.node.as_str());
            }
        }
    }
    reached
}
