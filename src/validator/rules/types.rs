use crate::ir::{Compatibility, Workflow};
use crate::validator::{
    Diagnostic, DiagnosticCode, RuleContext, ValidationMode, ValidationRule,
    effective_input_type, effective_output_type,
};

/// Port type compatibility across every connection. Full mode only.
///
/// `STEP` against data is always an error. Coercible and incompatible pairs are
/// warnings unless the workflow (or the validator) is strict, which turns both into
/// `TYPE_MISMATCH` errors.
pub struct TypeRule;

impl ValidationRule for TypeRule {
    fn id(&self) -> &'static str {
        "types"
    }

    fn description(&self) -> &'static str {
        "Connected ports carry compatible data types"
    }

    fn applies_to(&self, mode: ValidationMode) -> bool {
        mode == ValidationMode::Full
    }

    fn validate(&self, workflow: &Workflow, context: &RuleContext) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for connection in &workflow.connections {
            let (from, to) = (&connection.from, &connection.to);
            let (Some(source), Some(target)) = (
                effective_output_type(workflow, &from.node, &from.port),
                effective_input_type(workflow, &to.node, &to.port),
            ) else {
                continue;
            };

            let diagnostic = match source.compatibility(target) {
                Compatibility::Exact => continue,
                Compatibility::StepMismatch => Diagnostic::error(
                    DiagnosticCode::StepDataMismatch,
                    format!(
                        "'{}' connects {} to {}; control flow and data never mix",
                        connection, source, target
                    ),
                ),
                Compatibility::Coercible if context.strict => Diagnostic::error(
                    DiagnosticCode::TypeMismatch,
                    format!(
                        "'{}' would coerce {} to {} (strict types)",
                        connection, source, target
                    ),
                ),
                Compatibility::Coercible => Diagnostic::warning(
                    DiagnosticCode::TypeCoercion,
                    format!("'{}' coerces {} to {}", connection, source, target),
                ),
                Compatibility::Incompatible if context.strict => Diagnostic::error(
                    DiagnosticCode::TypeMismatch,
                    format!(
                        "'{}' connects incompatible types {} and {} (strict types)",
                        connection, source, target
                    ),
                ),
                Compatibility::Incompatible => Diagnostic::warning(
                    DiagnosticCode::TypeIncompatible,
                    format!(
                        "'{}' connects incompatible types {} and {}",
                        connection, source, target
                    ),
                ),
            };
            let node = if workflow.instance(&to.node).is_some() {
                &to.node
            } else {
                &from.node
            };
            diagnostics.push(
                diagnostic
                    .with_node(node)
                    .with_connection(connection)
                    .with_location(workflow.instance(node).and_then(|i| i.location.as_ref())),
            );
        }

        diagnostics
    }
}
