//! Runtime building blocks: the execution context and its scopes, pull execution,
//! cancellation, event sinks and the node registry.
mod common;
use common::*;
use kumiki::codegen::SourceRef;
use kumiki::runtime::{EventKind, FnPull, MemorySink, TriggerState, VariableAddress};
use kumiki::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Registers a pull executor for `calc` that writes `calc.out` and counts its runs.
fn counting_pull(context: &mut ExecutionContext) -> Arc<AtomicUsize> {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    context.register_pull_executor(
        "calc",
        FnPull(move |context: &mut ExecutionContext| {
            counter.fetch_add(1, Ordering::SeqCst);
            let index = context.add_execution("calc");
            context.set_variable(VariableAddress::new("calc", "out", index), json!(5));
            Ok(())
        }),
    );
    runs
}

#[cfg(test)]
mod context_tests {
    use super::*;

    #[test]
    fn test_latest_value_wins() {
        let mut context = ExecutionContext::new();
        context.set_variable(VariableAddress::new("n", "onSuccess", 0), json!(true));
        context.set_variable(VariableAddress::new("n", "onSuccess", 3), json!(false));

        assert_eq!(context.latest_index("n", "onSuccess"), Some(3));
        assert!(!context.is_signaled("n", "onSuccess"));
        assert!(!context.is_signaled("n", "onFailure"));
        assert_eq!(
            context
                .get_variable(&VariableAddress::new("n", "onSuccess", 0))
                .expect("Earlier occurrence stays readable"),
            json!(true)
        );
    }

    #[test]
    fn test_missing_variable() {
        let mut context = ExecutionContext::new();
        let address = VariableAddress::new("ghost", "out", 0);
        assert_eq!(
            context.get_variable(&address),
            Err(RuntimeError::VariableNotFound("ghost.out#0".to_string()))
        );
    }

    #[test]
    fn test_async_producer_resolves_once_awaited() {
        let mut context = ExecutionContext::new();
        let address = VariableAddress::new("slow", "out", 0);
        context.set_async_producer(address.clone(), async { json!(3) });

        let value = tokio_test::block_on(context.get_variable_async(&address))
            .expect("Producer should resolve");
        assert_eq!(value, json!(3));
        assert_eq!(context.get_variable(&address), Ok(json!(3)));
    }

    #[test]
    fn test_execution_records() {
        let mut context = ExecutionContext::new();
        let first = context.add_execution("a");
        let second = context.add_execution("b");
        assert_eq!((first, second), (0, 1));
        assert_eq!(context.execution_count(), 2);

        let records = context.executions();
        assert_eq!(records[1].instance, "b");
        assert_eq!(records[1].parent_index, None);
        assert_eq!(records[1].scope, None);
    }
}

#[cfg(test)]
mod scope_tests {
    use super::*;

    #[test]
    fn test_clean_scope_starts_empty() {
        let mut parent = ExecutionContext::new();
        let owner = parent.add_execution("loop");
        let outer = VariableAddress::new("Start", "value", 0);
        parent.set_variable(outer.clone(), json!(1));

        let clean = parent.create_scope("loop", owner, "iterate", true);
        assert!(!clean.has_variable(&outer));
        assert!(clean.scope().is_some_and(|s| s.clean && s.owner == "loop"));

        let mut inherited = parent.create_scope("loop", owner, "iterate", false);
        assert!(inherited.has_variable(&outer));
        assert_eq!(inherited.get_variable(&outer), Ok(json!(1)));
    }

    #[test]
    fn test_forget_clears_inherited_outputs() {
        let mut parent = ExecutionContext::new();
        let owner = parent.add_execution("loop");
        let runs = counting_pull(&mut parent);
        let first = tokio_test::block_on(parent.latest_output("calc", "out"))
            .expect("Pulled value should resolve");
        assert_eq!(first, json!(5));

        let mut scope = parent.create_scope("loop", owner, "iterate", false);
        assert!(scope.latest_index("calc", "out").is_some());
        scope.forget("calc");
        assert_eq!(scope.latest_index("calc", "out"), None);

        tokio_test::block_on(scope.latest_output("calc", "out"))
            .expect("Forgotten instance should be pulled again");
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        // The parent keeps its own value.
        assert!(parent.latest_index("calc", "out").is_some());
    }

    #[test]
    fn test_scope_records_carry_owner() {
        let mut parent = ExecutionContext::new();
        let owner = parent.add_execution("loop");
        let mut scope = parent.create_scope("loop", owner, "iterate", true);
        scope.add_execution("d");

        let record = &scope.executions()[0];
        assert_eq!(record.parent_index, Some(owner));
        assert_eq!(record.scope.as_deref(), Some("iterate"));
    }

    #[test]
    fn test_merge_makes_scope_results_visible() {
        let mut parent = ExecutionContext::new();
        let owner = parent.add_execution("loop");

        let mut scope = parent.create_scope("loop", owner, "iterate", true);
        let inner = scope.add_execution("d");
        let produced = VariableAddress::new("d", "result", inner);
        scope.set_variable(produced.clone(), json!(8));
        parent.merge_scope(scope);

        assert_eq!(parent.get_variable(&produced), Ok(json!(8)));
        assert_eq!(parent.executions().len(), 2);
        // The shared counter keeps moving forward after the merge.
        assert_eq!(parent.add_execution("next"), inner + 1);
    }

    #[test]
    fn test_sibling_scopes_never_reuse_indices() {
        let mut parent = ExecutionContext::new();
        let owner = parent.add_execution("loop");
        let mut seen = Vec::new();
        for _ in 0..3 {
            let mut scope = parent.create_scope("loop", owner, "iterate", true);
            seen.push(scope.add_execution("d"));
            parent.merge_scope(scope);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }
}

#[cfg(test)]
mod pull_tests {
    use super::*;

    #[test]
    fn test_pull_runs_on_first_read_only() {
        let mut context = ExecutionContext::new();
        let runs = counting_pull(&mut context);
        assert!(context.has_pull_executor("calc"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        for _ in 0..2 {
            let value = tokio_test::block_on(context.latest_output("calc", "out"))
                .expect("Pulled value should resolve");
            assert_eq!(value, json!(5));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_registering_again_rearms() {
        let mut context = ExecutionContext::new();
        let runs = counting_pull(&mut context);
        let missing = VariableAddress::new("calc", "out", 99);

        assert!(context.get_variable(&missing).is_err());
        assert!(context.get_variable(&missing).is_err());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let rearmed = counting_pull(&mut context);
        assert!(context.get_variable(&missing).is_err());
        assert_eq!(rearmed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scopes_share_pull_executors() {
        let mut parent = ExecutionContext::new();
        let runs = counting_pull(&mut parent);
        let mut scope = parent.create_scope("loop", 0, "iterate", true);
        let value = tokio_test::block_on(scope.latest_output("calc", "out"))
            .expect("Pull should run inside the scope");
        assert_eq!(value, json!(5));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }
}

#[cfg(test)]
mod signal_tests {
    use super::*;

    #[test]
    fn test_check_aborted() {
        let signal = AbortSignal::new();
        let mut context = ExecutionContext::new().with_abort_signal(signal.clone());
        context.add_execution("a");
        assert_eq!(context.check_aborted(Some("b")), Ok(()));

        signal.abort();
        assert_eq!(
            context.check_aborted(Some("b")),
            Err(RuntimeError::Cancelled {
                occurrences: 1,
                instance: Some("b".to_string()),
            })
        );
        assert!(context.check_aborted(None).is_err_and(|e| e.is_cancellation()));
    }

    #[test]
    fn test_scopes_observe_the_signal() {
        let signal = AbortSignal::new();
        let parent = ExecutionContext::new().with_abort_signal(signal.clone());
        let scope = parent.create_scope("loop", 0, "iterate", true);
        signal.abort();
        assert!(scope.is_aborted());
    }

    #[test]
    fn test_memory_sink_receives_variable_events() {
        let sink = Arc::new(MemorySink::new());
        let mut context = ExecutionContext::new().with_event_sink(sink.clone());
        context.set_variable(VariableAddress::new("d", "result", 2), json!(4.0));

        let events = sink.of_kind(EventKind::VariableSet);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["instance"], json!("d"));
        assert_eq!(events[0].data["index"], json!(2));
        assert_eq!(events[0].data["value"], json!(4.0));

        sink.clear();
        assert!(sink.events().is_empty());
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn test_registry_lookup() {
        let registry = registry();
        assert!(registry.contains("double"));
        assert!(!registry.contains("ghost"));
        assert!(registry.get("slowDouble").is_some_and(|i| i.is_async()));
        assert!(registry.get("double").is_some_and(|i| !i.is_async()));
        assert!(registry.trigger("quorum").is_none());
    }

    #[test]
    fn test_node_call_accessors() {
        let call = NodeCall {
            instance: "d".to_string(),
            index: 0,
            inputs: outputs([("value", json!(2.5)), ("name", json!("x"))]),
        };
        assert_eq!(call.number("value"), Some(2.5));
        assert_eq!(call.string("name"), Some("x"));
        assert_eq!(call.number("name"), None);
        let err = call.require_number("missing").expect_err("Missing input is an error");
        assert!(err.0.contains("'missing'"));
    }

    #[test]
    fn test_trigger_state_counts() {
        let state = TriggerState {
            instance: "j".to_string(),
            signals: vec![
                (SourceRef::new("a", "onSuccess"), true),
                (SourceRef::new("b", "onSuccess"), false),
                (SourceRef::new("c", "onSuccess"), true),
            ],
        };
        assert_eq!(state.signaled(), 2);
        assert_eq!(state.total(), 3);
        assert!(state.is_signaled("a", "onSuccess"));
        assert!(!state.is_signaled("b", "onSuccess"));
    }

    #[test]
    fn test_custom_trigger_registration() {
        let registry = registry().with_trigger("quorum", |state| state.signaled() * 2 > state.total());
        let predicate = registry.trigger("quorum").expect("Predicate should be registered");
        let state = TriggerState {
            instance: "q".to_string(),
            signals: vec![(SourceRef::new("a", "onSuccess"), true)],
        };
        assert!(predicate(&state));
    }
}
