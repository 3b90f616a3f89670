//! Common test fixtures: the node type catalog, annotated source units and the
//! node registry shared by the integration suites.
use kumiki::prelude::*;
use kumiki::runtime::NodeImplementation;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::EnvFilter;

/// Routes `tracing` output through the test harness. Set `RUST_LOG=kumiki=debug` to
/// see it.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A node type declaration with a (host-side) implementation body.
#[allow(dead_code)]
pub fn node_type(name: &str, block: &str) -> Declaration {
    Declaration::from_block(block, FunctionSignature::new(name)).with_body("/* host */")
}

/// `double(value) -> result`
#[allow(dead_code)]
pub fn double_declaration() -> Declaration {
    node_type(
        "double",
        "/**
          * @flowWeaver nodeType
          * @input value {NUMBER}
          * @output result {NUMBER}
          */",
    )
}

/// `add(a, [b=0]) -> sum`
#[allow(dead_code)]
pub fn add_declaration() -> Declaration {
    node_type(
        "add",
        "/**
          * @flowWeaver nodeType
          * @input a {NUMBER}
          * @input [b=0] {NUMBER}
          * @output sum {NUMBER}
          */",
    )
}

/// `guard(value) -> value`, failing for negative numbers.
#[allow(dead_code)]
pub fn guard_declaration() -> Declaration {
    node_type(
        "guard",
        "/**
          * @flowWeaver nodeType
          * @input value {NUMBER}
          * @output value {NUMBER}
          */",
    )
}

/// `recover(value) -> value`, always producing zero.
#[allow(dead_code)]
pub fn recover_declaration() -> Declaration {
    node_type(
        "recover",
        "/**
          * @flowWeaver nodeType
          * @input [value] {NUMBER}
          * @output value {NUMBER}
          */",
    )
}

/// Control-only joins with each firing rule.
#[allow(dead_code)]
pub fn join_declarations() -> Vec<Declaration> {
    vec![
        node_type("allOf", "/** @flowWeaver nodeType */"),
        node_type(
            "anyOf",
            "/**
              * @flowWeaver nodeType
              * @executeWhen DISJUNCTION
              */",
        ),
        node_type(
            "quorum",
            "/**
              * @flowWeaver nodeType
              * @executeWhen CUSTOM
              */",
        ),
    ]
}

/// `offset(base) -> value`, a pure expression node.
#[allow(dead_code)]
pub fn offset_declaration() -> Declaration {
    node_type(
        "offset",
        "/**
          * @flowWeaver nodeType
          * @expression
          * @input base {NUMBER}
          * @output value {NUMBER}
          */",
    )
}

/// `slowDouble(value) -> result`, implemented asynchronously.
#[allow(dead_code)]
pub fn slow_double_declaration() -> Declaration {
    Declaration::from_block(
        "/**
          * @flowWeaver nodeType
          * @input value {NUMBER}
          * @output result {NUMBER}
          */",
        FunctionSignature::new("slowDouble").asynchronous(),
    )
    .with_body("/* host */")
}

/// Every node type above.
#[allow(dead_code)]
pub fn catalog() -> Vec<Declaration> {
    let mut declarations = vec![
        double_declaration(),
        add_declaration(),
        guard_declaration(),
        recover_declaration(),
        offset_declaration(),
        slow_double_declaration(),
    ];
    declarations.extend(join_declarations());
    declarations
}

/// The catalog followed by one workflow declaration named `name`.
#[allow(dead_code)]
pub fn unit_with_workflow(name: &str, block: &str) -> SourceUnit {
    catalog()
        .into_iter()
        .fold(SourceUnit::new(), SourceUnit::with_declaration)
        .with_declaration(Declaration::from_block(block, FunctionSignature::new(name)))
}

/// Compiles a single workflow against the catalog with default options.
#[allow(dead_code)]
pub fn compile_workflow(name: &str, block: &str) -> CompilationArtifacts {
    let mut artifacts = Compiler::builder(unit_with_workflow(name, block))
        .build()
        .compile()
        .expect("Workflow should compile");
    assert_eq!(artifacts.len(), 1, "Expected exactly one workflow");
    artifacts.remove(0)
}

/// Doubles each element of `Start.items` with a `@map`.
#[allow(dead_code)]
pub const DOUBLER: &str = "/**
  * @flowWeaver workflow
  * @param items {ARRAY}
  * @returns results {ARRAY}
  * @node d double
  * @map loop d over Start.items
  * @connect loop.results -> Exit.results
  * @connect loop.onSuccess -> Exit.onSuccess
  * @connect loop.onFailure -> Exit.onFailure
  */";

/// Runs the guard and recovers from its failure.
#[allow(dead_code)]
pub const GUARDED: &str = "/**
  * @flowWeaver workflow
  * @param value {NUMBER}
  * @returns value {NUMBER}
  * @node g guard
  * @node r recover
  * @path Start -> g:fail -> r -> Exit
  */";

/// Implementations for every node type of [`catalog`] except `quorum`'s trigger.
#[allow(dead_code)]
pub fn registry() -> NodeRegistry {
    NodeRegistry::new()
        .with_sync("double", |call| {
            let value = call.require_number("value")?;
            Ok(outputs([("result", json!(value * 2.0))]))
        })
        .with_sync("add", |call| {
            let sum = call.require_number("a")? + call.number("b").unwrap_or(0.0);
            Ok(outputs([("sum", json!(sum))]))
        })
        .with_sync("guard", |call| {
            let value = call.require_number("value")?;
            if value < 0.0 {
                return Err(NodeError(format!("{} is negative", value)));
            }
            Ok(outputs([("value", json!(value))]))
        })
        .with_sync("recover", |_| Ok(outputs([("value", json!(0.0))])))
        .with_sync("allOf", |_| Ok(Outputs::new()))
        .with_sync("anyOf", |_| Ok(Outputs::new()))
        .with_sync("quorum", |_| Ok(Outputs::new()))
        .with_sync("offset", |call| {
            let base = call.require_number("base")?;
            Ok(outputs([("value", json!(base + 10.0))]))
        })
        .with_async("slowDouble", |call: NodeCall| async move {
            let value = call.require_number("value")?;
            Ok::<_, NodeError>(outputs([("result", json!(value * 2.0))]))
        })
}

/// Wraps the implementation of `function` so every invocation bumps the returned counter.
#[allow(dead_code)]
pub fn counting_registry(function: &str) -> (NodeRegistry, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let inner = registry();
    let Some(NodeImplementation::Sync(implementation)) = inner.get(function).cloned() else {
        panic!("'{}' has no synchronous implementation", function);
    };
    let registry = inner.with_sync(function, move |call| {
        counter.fetch_add(1, Ordering::SeqCst);
        implementation(call)
    });
    (registry, calls)
}

// ---- graph IR fixtures ----

#[allow(dead_code)]
pub fn double_type() -> NodeType {
    NodeType::function("double")
        .with_input(Port::input("value", DataType::Number))
        .with_output(Port::output("result", DataType::Number))
}

/// `Start.value -> d.value`, `d.result -> Exit.result`, fully wired control flow.
#[allow(dead_code)]
pub fn linear_workflow() -> Workflow {
    Workflow::new("linear")
        .with_start_port(Port::output("value", DataType::Number))
        .with_exit_port(Port::input("result", DataType::Number))
        .with_node_type(double_type())
        .with_instance(NodeInstance::new("d", "double"))
        .with_connection(Connection::between("Start", "execute", "d", "execute"))
        .with_connection(Connection::between("Start", "value", "d", "value"))
        .with_connection(Connection::between("d", "result", "Exit", "result"))
        .with_connection(Connection::between("d", "onSuccess", "Exit", "onSuccess"))
        .with_connection(Connection::between("d", "onFailure", "Exit", "onFailure"))
}
