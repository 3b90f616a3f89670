use crate::ir::{Workflow, is_virtual};
use crate::validator::{Diagnostic, DiagnosticCode, RuleContext, ValidationRule};
use ahash::AHashMap;

/// Workflow name, unique instance ids, resolvable node types.
pub struct StructuralRule;

impl ValidationRule for StructuralRule {
    fn id(&self) -> &'static str {
        "structural"
    }

    fn description(&self) -> &'static str {
        "Workflow has a name; instance ids are unique; node types resolve"
    }

    fn validate(&self, workflow: &Workflow, _context: &RuleContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        if workflow.name.trim().is_empty() {
            diagnostics.push(Diagnostic::error(
                DiagnosticCode::MissingWorkflowName,
                "Workflow has no name",
            ));
        }

        let mut seen: AHashMap<&str, usize> = AHashMap::new();
        for instance in &workflow.instances {
            if is_virtual(&instance.id) {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::DuplicateInstanceId,
                        format!("Instance id '{}' is reserved for the workflow boundary", instance.id),
                    )
                    .with_node(&instance.id)
                    .with_location(instance.location.as_ref()),
                );
            }
            let count = seen.entry(&instance.id).or_insert(0);
            *count += 1;
            // Report each duplicate once, on its second occurrence.
            if *count == 2 {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::DuplicateInstanceId,
                        format!("Instance id '{}' is declared more than once", instance.id),
                    )
                    .with_node(&instance.id)
                    .with_location(instance.location.as_ref()),
                );
            }

            if workflow.node_type(&instance.node_type).is_none() {
                diagnostics.push(
                    Diagnostic::error(
                        DiagnosticCode::UnknownNodeType,
                        format!(
                            "Instance '{}' references unknown node type '{}'",
                            instance.id, instance.node_type
                        ),
                    )
                    .with_node(&instance.id)
                    .with_location(instance.location.as_ref()),
                );
            }
        }

        diagnostics
    }
}
