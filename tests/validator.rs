//! Validator tests: one scenario per diagnostic code, validation modes, strict types
//! and externally added rules.
mod common;
use common::*;
use kumiki::expander::expand;
use kumiki::ir::{Macro, PortOverride};
use kumiki::validator::{Diagnostic, DiagnosticCode, RuleContext, ValidationRule};
use kumiki::prelude::*;
use serde_json::json;

fn full(workflow: &Workflow) -> ValidationReport {
    Validator::full().validate(workflow)
}

/// A `@map` over `double`, expanded and valid in full mode.
fn mapped() -> Workflow {
    expand(
        Workflow::new("mapped")
            .with_start_port(Port::output("items", DataType::Array))
            .with_node_type(double_type())
            .with_instance(NodeInstance::new("d", "double"))
            .with_macro(Macro::Map {
                iterator: "loop".to_string(),
                child: "d".to_string(),
                ports: None,
                source: PortRef::new("Start", "items"),
            }),
    )
    .expect("Map should expand")
}

/// Flags every instance of `double`.
struct NoDoubles;

impl ValidationRule for NoDoubles {
    fn id(&self) -> &'static str {
        "noDoubles"
    }

    fn description(&self) -> &'static str {
        "The double node type is retired"
    }

    fn validate(&self, workflow: &Workflow, _context: &RuleContext) -> Vec<Diagnostic> {
        workflow
            .instances
            .iter()
            .filter(|i| i.node_type == "double")
            .map(|i| {
                Diagnostic::error(DiagnosticCode::Custom("NO_DOUBLES".to_string()), "Retired")
                    .with_node(&i.id)
            })
            .collect()
    }
}

#[cfg(test)]
mod structure_tests {
    use super::*;

    #[test]
    fn test_linear_workflow_is_clean() {
        let report = full(&linear_workflow());
        assert!(report.valid, "{}", report);
        assert!(report.warnings.is_empty(), "{}", report);
    }

    #[test]
    fn test_missing_name() {
        let report = full(&linear_workflow().with_name("  "));
        assert!(report.has_error(&DiagnosticCode::MissingWorkflowName));
    }

    #[test]
    fn test_duplicate_and_reserved_ids() {
        let duplicated = linear_workflow().with_instance(NodeInstance::new("d", "double"));
        let report = full(&duplicated);
        assert_eq!(report.with_code(&DiagnosticCode::DuplicateInstanceId).count(), 1);

        let reserved = linear_workflow().with_instance(NodeInstance::new("Start", "double"));
        assert!(full(&reserved).has_error(&DiagnosticCode::DuplicateInstanceId));
    }

    #[test]
    fn test_unknown_node_type_is_a_diagnostic() {
        let report = full(&linear_workflow().with_instance(NodeInstance::new("x", "ghost")));
        assert!(!report.valid);
        let diagnostic = report
            .with_code(&DiagnosticCode::UnknownNodeType)
            .next()
            .expect("Unknown node type should be reported");
        assert_eq!(diagnostic.node.as_deref(), Some("x"));
    }

    #[test]
    fn test_diagnostics_carry_annotation_locations() {
        let parsed = kumiki::annotation::build_unit(&unit_with_workflow(
            "located",
            "/**
              * @flowWeaver workflow
              * @node x ghost
              */",
        ))
        .expect("Unknown node types are left to the validator");
        let workflow = parsed.workflow("located").expect("Workflow should exist");
        let report = full(workflow);
        let diagnostic = report
            .with_code(&DiagnosticCode::UnknownNodeType)
            .next()
            .expect("Unknown node type should be reported");
        assert_eq!(diagnostic.location.as_ref().map(|l| l.line), Some(3));
    }
}

#[cfg(test)]
mod connection_tests {
    use super::*;

    #[test]
    fn test_unknown_endpoints() {
        let cases = [
            (Connection::between("ghost", "out", "Exit", "result"), DiagnosticCode::UnknownSourceNode),
            (Connection::between("d", "nope", "Exit", "result"), DiagnosticCode::UnknownSourcePort),
            (Connection::between("d", "result", "ghost", "in"), DiagnosticCode::UnknownTargetNode),
            (Connection::between("d", "result", "Exit", "nope"), DiagnosticCode::UnknownTargetPort),
        ];
        for (connection, code) in cases {
            let report = full(&linear_workflow().with_connection(connection.clone()));
            assert!(report.has_error(&code), "Expected {} for {}", code, connection);
        }
    }

    #[test]
    fn test_connection_direction() {
        for connection in [
            Connection::between("d", "value", "Exit", "result"),
            Connection::between("Exit", "result", "d", "value"),
            Connection::between("Start", "value", "Start", "execute"),
            Connection::between("Start", "value", "d", "result"),
        ] {
            let report = full(&linear_workflow().with_connection(connection.clone()));
            assert!(
                report.has_error(&DiagnosticCode::InvalidConnectionDirection),
                "Expected a direction error for {}",
                connection
            );
        }
    }

    #[test]
    fn test_single_consumer_inputs() {
        let workflow = linear_workflow()
            .with_start_port(Port::output("other", DataType::Number))
            .with_connection(Connection::between("Start", "other", "d", "value"));
        assert!(full(&workflow).has_error(&DiagnosticCode::MultipleConnectionsToInput));

        // Control inputs combine through the trigger rule instead.
        let workflow = linear_workflow()
            .with_connection(Connection::between("Start", "execute", "Exit", "onSuccess"));
        assert!(!full(&workflow).has_error(&DiagnosticCode::MultipleConnectionsToInput));
    }

    #[test]
    fn test_duplicate_connection_is_a_warning() {
        let workflow =
            linear_workflow().with_connection(Connection::between("Start", "value", "d", "value"));
        let report = full(&workflow);
        assert!(report.valid, "{}", report);
        assert!(report.has_warning(&DiagnosticCode::DuplicateConnection));
        assert!(!report.has_error(&DiagnosticCode::MultipleConnectionsToInput));
    }

    #[test]
    fn test_cycle_is_reported_with_its_path() {
        let workflow = linear_workflow()
            .with_instance(NodeInstance::new("e", "double"))
            .with_connection(Connection::between("d", "onSuccess", "e", "execute"))
            .with_connection(Connection::between("e", "onSuccess", "d", "execute"));
        let report = Validator::draft().validate(&workflow);
        let cycle = report
            .with_code(&DiagnosticCode::CycleDetected)
            .next()
            .expect("Cycle should be reported");
        assert!(cycle.message.contains("d -> e -> d"), "{}", cycle.message);
    }
}

#[cfg(test)]
mod scope_tests {
    use super::*;

    #[test]
    fn test_expanded_map_is_valid() {
        let report = full(&mapped());
        assert!(report.valid, "{}", report);
    }

    #[test]
    fn test_parent_must_match_membership() {
        let mut workflow = mapped();
        if let Some(child) = workflow.instances.iter_mut().find(|i| i.id == "d") {
            child.parent = None;
        }
        assert!(full(&workflow).has_error(&DiagnosticCode::ScopeParentMismatch));
    }

    #[test]
    fn test_unknown_owner_and_member() {
        let workflow = mapped().with_scope("ghost", "body", Vec::new());
        assert!(full(&workflow).has_error(&DiagnosticCode::ScopeUnknownOwner));

        let mut workflow = mapped();
        if let Some(members) = workflow.scopes.get_mut("loop.iterate") {
            members.push("ghost".to_string());
        }
        assert!(full(&workflow).has_error(&DiagnosticCode::ScopeUnknownMember));
    }

    #[test]
    fn test_only_iterators_own_scopes() {
        let workflow = mapped().with_scope("d", "body", Vec::new());
        assert!(full(&workflow).has_error(&DiagnosticCode::InvalidScopeOwner));
    }

    #[test]
    fn test_instance_in_two_scopes() {
        let workflow = mapped().with_scope("loop", "other", vec!["d".to_string()]);
        assert!(full(&workflow).has_error(&DiagnosticCode::InstanceInMultipleScopes));
    }

    #[test]
    fn test_unqualified_connection_across_scope() {
        let workflow = mapped().with_connection(Connection::between("Start", "execute", "d", "execute"));
        assert!(full(&workflow).has_error(&DiagnosticCode::ScopeConnectionMismatch));

        let scoped_port_without_qualifier =
            mapped().with_connection(Connection::between("loop", "item", "d", "value"));
        assert!(full(&scoped_port_without_qualifier)
            .has_error(&DiagnosticCode::ScopeConnectionMismatch));
    }

    #[test]
    fn test_unwired_scoped_port_is_a_warning() {
        let processed = Connection::new(
            PortRef::new("d", "result"),
            PortRef::new("loop", "processed").scoped("iterate"),
        );
        let report = full(&mapped().without_connection(&processed));
        assert!(report.valid, "{}", report);
        assert!(report.has_warning(&DiagnosticCode::ScopeMissingRequiredInput));
    }
}

#[cfg(test)]
mod dataflow_tests {
    use super::*;

    fn with_stub() -> Workflow {
        linear_workflow()
            .with_node_type(NodeType::function("todo").stub())
            .with_instance(NodeInstance::new("t", "todo"))
            .with_connection(Connection::between("d", "onSuccess", "t", "execute"))
    }

    #[test]
    fn test_stubs_pass_draft_but_not_full() {
        assert!(Validator::draft().validate(&with_stub()).valid);
        assert!(full(&with_stub()).has_error(&DiagnosticCode::StubNodeType));
    }

    #[test]
    fn test_missing_required_input() {
        let workflow =
            linear_workflow().without_connection(&Connection::between("Start", "value", "d", "value"));
        assert!(full(&workflow).has_error(&DiagnosticCode::MissingRequiredInput));
        assert!(Validator::draft().validate(&workflow).valid);
    }

    #[test]
    fn test_instance_default_satisfies_required_input() {
        let mut workflow =
            linear_workflow().without_connection(&Connection::between("Start", "value", "d", "value"));
        let fallback = PortOverride {
            default: Some(json!(4)),
            ..PortOverride::default()
        };
        for instance in workflow.instances.iter_mut() {
            instance
                .config
                .port_overrides
                .insert("value".to_string(), fallback.clone());
        }
        assert!(!full(&workflow).has_error(&DiagnosticCode::MissingRequiredInput));
    }

    #[test]
    fn test_unreachable_node_is_a_warning() {
        let workflow = linear_workflow()
            .with_instance(NodeInstance::new("idle", "double"))
            .with_connection(Connection::between("Start", "value", "idle", "value"));
        let report = full(&workflow);
        assert!(report.valid, "{}", report);
        let unreachable = report
            .with_code(&DiagnosticCode::UnreachableNode)
            .next()
            .expect("Idle instance should be unreachable");
        assert_eq!(unreachable.node.as_deref(), Some("idle"));
    }
}

#[cfg(test)]
mod type_tests {
    use super::*;

    fn fed_with(start_type: DataType) -> Workflow {
        linear_workflow().with_start_port(Port::output("value", start_type))
    }

    #[test]
    fn test_step_never_feeds_data() {
        let workflow = linear_workflow()
            .without_connection(&Connection::between("Start", "value", "d", "value"))
            .with_connection(Connection::between("Start", "execute", "d", "value"));
        assert!(full(&workflow).has_error(&DiagnosticCode::StepDataMismatch));
    }

    #[test]
    fn test_coercion_and_incompatibility_warn() {
        let report = full(&fed_with(DataType::String));
        assert!(report.valid);
        assert!(report.has_warning(&DiagnosticCode::TypeCoercion));

        let report = full(&fed_with(DataType::Array));
        assert!(report.valid);
        assert!(report.has_warning(&DiagnosticCode::TypeIncompatible));
    }

    #[test]
    fn test_strict_types_turn_warnings_into_errors() {
        let report = Validator::full().strict(true).validate(&fed_with(DataType::String));
        assert!(report.has_error(&DiagnosticCode::TypeMismatch));
        assert!(!report.has_warning(&DiagnosticCode::TypeCoercion));

        let report = full(&fed_with(DataType::Array).strict_types(true));
        assert!(report.has_error(&DiagnosticCode::TypeMismatch));
    }

    #[test]
    fn test_draft_skips_type_checks() {
        let report = Validator::draft().validate(&fed_with(DataType::String));
        assert!(report.warnings.is_empty());
    }
}

#[cfg(test)]
mod api_tests {
    use super::*;

    #[test]
    fn test_custom_rule_runs_after_builtins() {
        let validator = Validator::full().with_rule(Box::new(NoDoubles));
        let ids: Vec<&str> = validator.rules().map(|(id, _)| id).collect();
        assert_eq!(ids.last(), Some(&"noDoubles"));

        let report = validator.validate(&linear_workflow());
        assert!(!report.valid);
        assert!(report.has_error(&DiagnosticCode::Custom("NO_DOUBLES".to_string())));
    }

    #[test]
    fn test_validate_into() {
        let validated = Validator::full()
            .validate_into(fed_with_coercion())
            .expect("Warnings do not block validation");
        assert_eq!(validated.mode(), ValidationMode::Full);
        assert!(validated.report().has_warning(&DiagnosticCode::TypeCoercion));

        let report = Validator::full()
            .validate_into(linear_workflow().with_name(""))
            .expect_err("A nameless workflow is invalid");
        assert!(!report.valid);
    }

    #[test]
    fn test_codes_serialize_as_strings() {
        assert_eq!(DiagnosticCode::from_code("CYCLE_DETECTED"), DiagnosticCode::CycleDetected);
        assert_eq!(
            DiagnosticCode::from_code("HOUSE_RULE"),
            DiagnosticCode::Custom("HOUSE_RULE".to_string())
        );

        let report = full(&linear_workflow().with_name(""));
        let value = serde_json::to_value(&report).expect("Report should serialize");
        assert_eq!(value["valid"], json!(false));
        assert_eq!(value["errors"][0]["code"], json!("MISSING_WORKFLOW_NAME"));
        assert_eq!(value["errors"][0]["severity"], json!("error"));
    }

    fn fed_with_coercion() -> Workflow {
        linear_workflow().with_start_port(Port::output("value", DataType::String))
    }
}
