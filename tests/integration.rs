//! Integration tests for Kumiki
//!
//! End-to-end tests: annotated declarations are compiled with the `Compiler` facade
//! and the resulting programs are run against the shared node registry.
//!
mod common;
use common::*;
use kumiki::annotation::build_unit;
use kumiki::codegen::{SourceRef, Step};
use kumiki::diff::diff_workflows;
use kumiki::runtime::{EventKind, MemorySink};
use kumiki::validator::{Diagnostic, DiagnosticCode, RuleContext, ValidationRule};
use kumiki::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Runs `a` and `g` side by side and joins their success signals in `j`.
fn join_block(join: &str) -> String {
    format!(
        "/**
          * @flowWeaver workflow
          * @param value {{NUMBER}}
          * @node a double
          * @node g guard
          * @node j {}
          * @connect Start.execute -> a.execute
          * @connect Start.execute -> g.execute
          * @fanOut Start.value -> a, g
          * @fanIn a.onSuccess, g.onSuccess -> j.execute
          * @connect j.onSuccess -> Exit.onSuccess
          */",
        join
    )
}

const PULLED: &str = "/**
  * @flowWeaver workflow
  * @param value {NUMBER}
  * @returns value {NUMBER}
  * @node o offset
  * @node d double
  * @connect Start.value -> o.base
  * @connect o.value -> d.value
  * @connect Start.execute -> d.execute
  * @connect d.result -> Exit.value
  * @connect d.onSuccess -> Exit.onSuccess
  * @connect d.onFailure -> Exit.onFailure
  */";

const COERCED: &str = "/**
  * @flowWeaver workflow
  * @param value {STRING}
  * @returns result {NUMBER}
  * @node d double
  * @path Start -> d -> Exit
  */";

const SLOW: &str = "/**
  * @flowWeaver workflow
  * @param value {NUMBER}
  * @returns result {NUMBER}
  * @node s slowDouble
  * @path Start -> s -> Exit
  */";

const UNFINISHED: &str = "/**
  * @flowWeaver workflow
  * @param value {NUMBER}
  * @node t todo
  * @path Start -> t -> Exit
  * @connect t.onFailure -> Exit.onFailure
  */";

/// A node type declared without a body.
fn todo_declaration() -> Declaration {
    Declaration::from_block(
        "/**
          * @flowWeaver nodeType
          * @input value {NUMBER}
          */",
        FunctionSignature::new("todo"),
    )
}

fn run(artifacts: &CompilationArtifacts, params: serde_json::Value) -> WorkflowResult {
    artifacts
        .executor(registry())
        .call(true, params)
        .expect("Workflow should run")
}

/// Maps the `offset` expression over `Start.items`.
const OFFSETS: &str = "/**
  * @flowWeaver workflow
  * @param items {ARRAY}
  * @returns results {ARRAY}
  * @node o offset
  * @map loop o over Start.items
  * @connect loop.results -> Exit.results
  * @connect loop.onSuccess -> Exit.onSuccess
  */";

/// Adds the outer `Start.offset` to each element of `Start.items`. The unqualified
/// connection into the scope only passes draft generation.
const SHIFTED: &str = "/**
  * @flowWeaver workflow
  * @param items {ARRAY}
  * @param offset {NUMBER}
  * @returns results {ARRAY}
  * @node s add
  * @map loop s over Start.items
  * @connect Start.offset -> s.b
  * @connect loop.results -> Exit.results
  * @connect loop.onSuccess -> Exit.onSuccess
  */";

/// Draft program for [`SHIFTED`] whose body copies nothing in from outside, so only an
/// inherited store can supply `Start.offset`.
fn shifted_without_captures() -> CompiledWorkflow {
    let parsed = build_unit(&unit_with_workflow("shifted", SHIFTED)).expect("Unit should build");
    let workflow = parsed.workflow("shifted").expect("Workflow should exist");
    let mut program = Generator::new()
        .generate_draft(workflow)
        .expect("Draft generation should succeed");
    for step in &mut program.root.steps {
        if let Step::Iterate(iteration) = step {
            assert_eq!(iteration.body.captures, vec![SourceRef::new("Start", "offset")]);
            iteration.body.captures.clear();
        }
    }
    program
}

fn compile_inherited(name: &str, block: &str) -> CompilationArtifacts {
    Compiler::builder(unit_with_workflow(name, block))
        .clean_scopes(false)
        .build()
        .compile()
        .expect("Workflow should compile")
        .remove(0)
}

#[cfg(test)]
mod map_tests {
    use super::*;

    #[test]
    fn test_inherited_scopes_pull_each_element() {
        for artifacts in [compile_workflow("offsets", OFFSETS), compile_inherited("offsets", OFFSETS)] {
            let result = run(&artifacts, json!({ "items": [1, 2, 3] }));
            assert!(result.on_success);
            assert_eq!(
                result.output("results"),
                Some(&json!([11.0, 12.0, 13.0])),
                "clean_scopes = {}",
                artifacts.options.clean_scopes
            );
        }
    }

    #[test]
    fn test_inherited_scopes_read_outer_values() {
        let params = json!({ "items": [1, 2, 3], "offset": 100 });
        let run_with = |clean_scopes: bool| {
            let executor = Executor::new(shifted_without_captures(), registry()).with_options(
                ExecutorOptions {
                    clean_scopes,
                    ..Default::default()
                },
            );
            let mut context = executor.context();
            let result = tokio_test::block_on(executor.call_with_context(
                &mut context,
                true,
                params.clone(),
            ))
            .expect("Workflow should run");
            let runs = context.executions().iter().filter(|r| r.instance == "s").count();
            (result, runs)
        };

        let (inherited, runs) = run_with(false);
        assert!(inherited.on_success);
        assert_eq!(inherited.output("results"), Some(&json!([101.0, 102.0, 103.0])));
        assert_eq!(runs, 3);

        // A clean scope sees nothing from outside and falls back to the default of `b`.
        let (clean, _) = run_with(true);
        assert_eq!(clean.output("results"), Some(&json!([1.0, 2.0, 3.0])));
    }

    #[test]
    fn test_doubler_end_to_end() {
        init_tracing();
        let artifacts = compile_workflow("doubler", DOUBLER);
        let result = run(&artifacts, json!({ "items": [1, 2, 3, 4, 5] }));

        assert!(result.on_success);
        assert!(!result.on_failure);
        assert_eq!(
            result.output("results"),
            Some(&json!([2.0, 4.0, 6.0, 8.0, 10.0]))
        );
        println!("{}", artifacts.program.render_source());
    }

    #[test]
    fn test_empty_input_succeeds() {
        let result = run(&compile_workflow("doubler", DOUBLER), json!({ "items": [] }));
        assert!(result.on_success);
        assert_eq!(result.output("results"), Some(&json!([])));
    }

    #[test]
    fn test_non_array_input_fails() {
        let result = run(&compile_workflow("doubler", DOUBLER), json!({ "items": 5 }));
        assert!(!result.on_success);
        assert!(result.on_failure);
        assert_eq!(result.output("results"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_first_failing_element_stops_iteration() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let registry = registry().with_sync("double", move |call| {
            counter.fetch_add(1, Ordering::SeqCst);
            let value = call.require_number("value")?;
            if value == 3.0 {
                return Err(NodeError("three is not allowed".to_string()));
            }
            Ok(outputs([("result", json!(value * 2.0))]))
        });

        let result = compile_workflow("doubler", DOUBLER)
            .executor(registry)
            .call(true, json!({ "items": [1, 2, 3, 4, 5] }))
            .expect("Node failures do not abort the workflow");

        assert!(!result.on_success);
        assert!(result.on_failure);
        assert_eq!(result.output("results"), Some(&json!([2.0, 4.0])));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_iteration_records_point_at_owner() {
        let executor = compile_workflow("doubler", DOUBLER).executor(registry());
        let mut context = executor.context();
        tokio_test::block_on(executor.call_with_context(
            &mut context,
            true,
            json!({ "items": [1, 2, 3] }),
        ))
        .expect("Workflow should run");

        let records = context.executions();
        let owner = records
            .iter()
            .find(|r| r.instance == "loop")
            .expect("Iterator should have run");
        let children: Vec<_> = records.iter().filter(|r| r.instance == "d").collect();
        assert_eq!(children.len(), 3);
        for child in children {
            assert_eq!(child.parent_index, Some(owner.index));
            assert_eq!(child.scope.as_deref(), Some("iterate"));
        }
        // Indices are unique across all scopes.
        let mut indices: Vec<usize> = records.iter().map(|r| r.index).collect();
        indices.dedup();
        assert_eq!(indices.len(), records.len());
    }

    #[test]
    fn test_execute_false_runs_nothing() {
        let result = compile_workflow("doubler", DOUBLER)
            .executor(registry())
            .call(false, json!({ "items": [1] }))
            .expect("Workflow should run");
        assert!(!result.on_success);
        assert!(!result.on_failure);
        assert_eq!(result.output("results"), Some(&serde_json::Value::Null));
    }
}

#[cfg(test)]
mod control_flow_tests {
    use super::*;

    #[test]
    fn test_failure_route_recovers() {
        let result = run(&compile_workflow("guarded", GUARDED), json!({ "value": -5 }));
        assert!(result.on_success);
        assert_eq!(result.output("value"), Some(&json!(0.0)));
    }

    #[test]
    fn test_failure_route_stays_idle_on_success() {
        let result = run(&compile_workflow("guarded", GUARDED), json!({ "value": 5 }));
        assert!(!result.on_success);
        assert!(!result.on_failure);
        assert_eq!(result.output("value"), Some(&serde_json::Value::Null));
    }

    #[test]
    fn test_join_rules() {
        // With a negative value `a` succeeds and `g` fails.
        let any = run(&compile_workflow("joined", &join_block("anyOf")), json!({ "value": -1 }));
        assert!(any.on_success);

        let all = run(&compile_workflow("joined", &join_block("allOf")), json!({ "value": -1 }));
        assert!(!all.on_success);

        let all = run(&compile_workflow("joined", &join_block("allOf")), json!({ "value": 1 }));
        assert!(all.on_success);
    }

    #[test]
    fn test_custom_trigger_uses_registered_predicate() {
        let artifacts = compile_workflow("joined", &join_block("quorum"));
        let quorum_registry = registry().with_trigger("quorum", |state| state.signaled() * 2 >= state.total());
        let result = artifacts
            .executor(quorum_registry)
            .call(true, json!({ "value": -1 }))
            .expect("Workflow should run");
        assert!(result.on_success);

        let missing = artifacts.executor(registry()).call(true, json!({ "value": -1 }));
        assert_eq!(
            missing,
            Err(RuntimeError::MissingTriggerPredicate {
                function: "quorum".to_string(),
                instance: "j".to_string(),
            })
        );
    }

    #[test]
    fn test_node_failure_is_logged() {
        let sink = Arc::new(MemorySink::new());
        compile_workflow("guarded", GUARDED)
            .executor(registry())
            .with_event_sink(sink.clone())
            .call(true, json!({ "value": -5 }))
            .expect("Workflow should run");

        let errors = sink.of_kind(EventKind::LogError);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].data["instance"], json!("g"));
    }
}

#[cfg(test)]
mod pull_tests {
    use super::*;

    #[test]
    fn test_expression_runs_once_on_demand() {
        let (registry, calls) = counting_registry("offset");
        let result = compile_workflow("pulled", PULLED)
            .executor(registry)
            .call(true, json!({ "value": 1 }))
            .expect("Workflow should run");

        assert!(result.on_success);
        assert_eq!(result.output("value"), Some(&json!(22.0)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_expression_failure_aborts() {
        let error = compile_workflow("pulled", PULLED)
            .executor(registry())
            .call(true, json!({ "value": "abc" }))
            .expect_err("Expression failures are fatal");
        assert!(matches!(
            error,
            RuntimeError::ExpressionFailed { instance, .. } if instance == "o"
        ));
    }
}

#[cfg(test)]
mod typing_tests {
    use super::*;

    #[test]
    fn test_coercion_warns_and_converts() {
        let artifacts = compile_workflow("coerced", COERCED);
        assert!(artifacts.report.has_warning(&DiagnosticCode::TypeCoercion));

        let result = run(&artifacts, json!({ "value": "21" }));
        assert_eq!(result.output("result"), Some(&json!(42.0)));
    }

    #[test]
    fn test_strict_compilation_rejects_coercion() {
        let error = Compiler::builder(unit_with_workflow("coerced", COERCED))
            .strict(true)
            .build()
            .compile()
            .expect_err("Strict types reject coercion");
        match error {
            CompileError::Invalid { workflow, report } => {
                assert_eq!(workflow, "coerced");
                assert!(report.has_error(&DiagnosticCode::TypeMismatch));
            }
            other => panic!("Expected a validation failure, got {}", other),
        }
    }
}

#[cfg(test)]
mod draft_tests {
    use super::*;

    fn unfinished_unit() -> SourceUnit {
        unit_with_workflow("unfinished", UNFINISHED).with_declaration(todo_declaration())
    }

    #[test]
    fn test_full_compilation_rejects_stubs() {
        let error = Compiler::builder(unfinished_unit())
            .build()
            .compile()
            .expect_err("Stubs are rejected in full mode");
        let CompileError::Invalid { report, .. } = error else {
            panic!("Expected a validation failure, got {}", error);
        };
        assert!(report.has_error(&DiagnosticCode::StubNodeType));
    }

    #[test]
    fn test_draft_stub_routes_to_failure() {
        let artifacts = Compiler::builder(unfinished_unit())
            .draft(true)
            .build()
            .compile()
            .expect("Draft compilation accepts stubs")
            .remove(0);

        let sink = Arc::new(MemorySink::new());
        let result = artifacts
            .executor(registry())
            .with_event_sink(sink.clone())
            .call(true, json!({ "value": 1 }))
            .expect("Stubs fail without aborting");
        assert!(!result.on_success);
        assert!(result.on_failure);
        assert_eq!(sink.of_kind(EventKind::LogError).len(), 1);
    }
}

#[cfg(test)]
mod async_tests {
    use super::*;

    #[test]
    fn test_async_workflow_needs_async_call() {
        let executor = compile_workflow("slow", SLOW).executor(registry());
        assert_eq!(
            executor.call(true, json!({ "value": 4 })),
            Err(RuntimeError::AsyncRequired("slow".to_string()))
        );

        let result = tokio_test::block_on(executor.call_async(true, json!({ "value": 4 })))
            .expect("Async workflow should run");
        assert_eq!(result.output("result"), Some(&json!(8.0)));
    }

    #[test]
    fn test_sync_workflow_runs_async_too() {
        let executor = compile_workflow("guarded", GUARDED).executor(registry());
        let result = tokio_test::block_on(executor.call_async(true, json!({ "value": -1 })))
            .expect("Workflow should run");
        assert!(result.on_success);
    }
}

#[cfg(test)]
mod cancellation_tests {
    use super::*;

    #[test]
    fn test_abort_before_start() {
        let signal = AbortSignal::new();
        signal.abort();
        let error = compile_workflow("guarded", GUARDED)
            .executor(registry())
            .with_abort_signal(signal)
            .call(true, json!({ "value": 1 }))
            .expect_err("Aborted workflows do not run");
        assert_eq!(
            error,
            RuntimeError::Cancelled {
                occurrences: 1,
                instance: Some("g".to_string()),
            }
        );
    }

    #[test]
    fn test_abort_between_elements() {
        let signal = AbortSignal::new();
        let trip = signal.clone();
        let registry = registry().with_sync("double", move |call| {
            let value = call.require_number("value")?;
            if value == 2.0 {
                trip.abort();
            }
            Ok(outputs([("result", json!(value * 2.0))]))
        });

        let sink = Arc::new(MemorySink::new());
        let error = compile_workflow("doubler", DOUBLER)
            .executor(registry)
            .with_abort_signal(signal)
            .with_event_sink(sink.clone())
            .call(true, json!({ "items": [1, 2, 3] }))
            .expect_err("Iteration should stop");

        assert!(matches!(
            error,
            RuntimeError::Cancelled { instance: Some(ref id), .. } if id == "loop"
        ));
        let completed = sink.of_kind(EventKind::WorkflowCompleted);
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].data["status"], json!("CANCELLED"));
    }
}

#[cfg(test)]
mod event_tests {
    use super::*;

    #[test]
    fn test_events_describe_the_run() {
        let sink = Arc::new(MemorySink::new());
        compile_workflow("doubler", DOUBLER)
            .executor(registry())
            .with_event_sink(sink.clone())
            .call(true, json!({ "items": [1, 2] }))
            .expect("Workflow should run");

        let events = sink.events();
        assert!(!sink.of_kind(EventKind::StatusChanged).is_empty());
        assert!(!sink.of_kind(EventKind::VariableSet).is_empty());
        let last = events.last().expect("Events should be recorded");
        assert_eq!(last.kind, EventKind::WorkflowCompleted);
        assert_eq!(last.data["onSuccess"], json!(true));
        assert_eq!(last.data["results"], json!([2.0, 4.0]));
    }

    #[test]
    fn test_production_programs_stay_silent() {
        let artifacts = Compiler::builder(unit_with_workflow("doubler", DOUBLER))
            .production(true)
            .build()
            .compile()
            .expect("Workflow should compile")
            .remove(0);
        assert!(artifacts.program.production);

        let sink = Arc::new(MemorySink::new());
        artifacts
            .executor(registry())
            .with_event_sink(sink.clone())
            .call(true, json!({ "items": [1] }))
            .expect("Workflow should run");
        assert!(sink.events().is_empty());
    }
}

#[cfg(test)]
mod error_handling_tests {
    use super::*;

    #[test]
    fn test_missing_implementation() {
        let error = compile_workflow("doubler", DOUBLER)
            .executor(NodeRegistry::new())
            .call(true, json!({ "items": [1] }))
            .expect_err("double is not registered");
        assert_eq!(
            error,
            RuntimeError::MissingImplementation {
                function: "double".to_string(),
                instance: "d".to_string(),
            }
        );
    }

    #[test]
    fn test_params_must_be_an_object() {
        let error = compile_workflow("doubler", DOUBLER)
            .executor(registry())
            .call(true, json!(5))
            .expect_err("Scalar params are rejected");
        assert_eq!(error, RuntimeError::InvalidParams("5".to_string()));
    }

    #[test]
    fn test_duplicate_workflows_are_rejected() {
        let unit = unit_with_workflow("doubler", DOUBLER)
            .with_declaration(Declaration::from_block(DOUBLER, FunctionSignature::new("doubler")));
        let error = Compiler::builder(unit).build().compile().expect_err("Names collide");
        assert!(matches!(
            error,
            CompileError::Build(BuildError::DuplicateWorkflow(name)) if name == "doubler"
        ));
    }
}

#[cfg(test)]
mod compiler_tests {
    use super::*;

    /// Rejects workflows with more than one instance.
    struct SingleInstance;

    impl ValidationRule for SingleInstance {
        fn id(&self) -> &'static str {
            "singleInstance"
        }

        fn description(&self) -> &'static str {
            "Workflows place at most one instance"
        }

        fn validate(&self, workflow: &Workflow, _context: &RuleContext) -> Vec<Diagnostic> {
            if workflow.instances.len() > 1 {
                vec![Diagnostic::error(
                    DiagnosticCode::Custom("TOO_MANY_INSTANCES".to_string()),
                    "Only one instance allowed",
                )]
            } else {
                Vec::new()
            }
        }
    }

    #[test]
    fn test_every_workflow_is_compiled_in_order() {
        let unit = unit_with_workflow("doubler", DOUBLER)
            .with_declaration(Declaration::from_block(GUARDED, FunctionSignature::new("guarded")));
        let artifacts = Compiler::builder(unit).build().compile().expect("Both should compile");
        let names: Vec<&str> = artifacts.iter().map(|a| a.program.name.as_str()).collect();
        assert_eq!(names, vec!["doubler", "guarded"]);
    }

    #[test]
    fn test_custom_rule_through_the_compiler() {
        let error = Compiler::builder(unit_with_workflow("guarded", GUARDED))
            .with_rule(Box::new(SingleInstance))
            .build()
            .compile()
            .expect_err("Two instances violate the rule");
        let CompileError::Invalid { report, .. } = error else {
            panic!("Expected a validation failure, got {}", error);
        };
        assert!(report.has_error(&DiagnosticCode::Custom("TOO_MANY_INSTANCES".to_string())));
    }

    #[test]
    fn test_options_from_json() {
        let options = CompileOptions::from_json(r#"{ "cleanScopes": false, "trace": true }"#)
            .expect("Options should parse");
        let compiler = Compiler::builder(unit_with_workflow("doubler", DOUBLER))
            .with_options(options.clone())
            .build();
        assert_eq!(compiler.options(), &options);

        let artifacts = compiler.compile().expect("Workflow should compile").remove(0);
        assert!(!artifacts.options.clean_scopes);
        assert!(artifacts.options.trace);

        // Inherited scopes change nothing for a self-contained body.
        let result = run(&artifacts, json!({ "items": [1, 2] }));
        assert_eq!(result.output("results"), Some(&json!([2.0, 4.0])));
    }

    #[test]
    fn test_diff_between_versions() {
        let before = linear_workflow();
        let after = linear_workflow()
            .with_instance(NodeInstance::new("e", "double"))
            .with_connection(Connection::between("d", "onSuccess", "e", "execute"))
            .without_connection(&Connection::between("d", "onFailure", "Exit", "onFailure"));

        let diff = diff_workflows(&before, &after);
        assert_eq!(diff.added_instances.len(), 1);
        assert_eq!(diff.added_connections.len(), 1);
        assert_eq!(diff.removed_connections.len(), 1);
        assert_eq!(
            diff.summary(),
            "1 instance added, 1 connection added, 1 connection removed"
        );
        assert!(!diff_workflows(&before, &before).has_changes());
    }
}
