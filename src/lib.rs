//! # Kumiki - Annotation-Driven Workflow Compiler
//!
//! **Kumiki** compiles workflows described by annotations on function declarations
//! into validated, executable node graphs. Node types are ordinary functions with
//! typed ports; a workflow places instances of them, wires ports together and may use
//! shorthand macros (`@map`, `@path`, `@fanOut`, `@fanIn`) for common shapes.
//!
//! ## Core Workflow
//!
//! 1.  **Describe**: Collect each declaration's annotation comment block and signature into
//!     a [`SourceUnit`](annotation::SourceUnit).
//! 2.  **Build & Expand**: [`annotation::build_unit`] turns the annotations into the graph IR
//!     ([`ir::Workflow`]) and expands macros into plain instances and connections.
//! 3.  **Validate**: A [`Validator`](validator::Validator) checks structure, scopes, cycles,
//!     data flow and port types, producing coded diagnostics.
//! 4.  **Generate**: The [`Generator`](codegen::Generator) orders every region and emits a
//!     serializable step program ([`CompiledWorkflow`](codegen::CompiledWorkflow)).
//! 5.  **Run**: An [`Executor`](runtime::Executor) interprets the program, calling node
//!     implementations registered in a [`NodeRegistry`](runtime::NodeRegistry).
//!
//! The [`Compiler`](compiler::Compiler) facade runs steps 2 to 4 in one call.
//!
//! ## Quick Start
//!
//! ```rust
//! use kumiki::prelude::*;
//! use serde_json::json;
//!
//! let double = Declaration::from_block(
//!     "/**
//!       * @flowWeaver nodeType
//!       * @input value {NUMBER}
//!       * @output result {NUMBER}
//!       */",
//!     FunctionSignature::new("double"),
//! )
//! .with_body("return { result: value * 2 };");
//!
//! let doubler = Declaration::from_block(
//!     "/**
//!       * @flowWeaver workflow
//!       * @param value {NUMBER}
//!       * @returns result {NUMBER}
//!       * @node d double
//!       * @connect Start.execute -> d.execute
//!       * @connect Start.value -> d.value
//!       * @connect d.result -> Exit.result
//!       * @connect d.onSuccess -> Exit.onSuccess
//!       * @connect d.onFailure -> Exit.onFailure
//!       */",
//!     FunctionSignature::new("doubler"),
//! );
//!
//! let unit = SourceUnit::new().with_declaration(double).with_declaration(doubler);
//! let artifacts = Compiler::builder(unit).build().compile()?;
//!
//! let registry = NodeRegistry::new().with_sync("double", |call| {
//!     let value = call.require_number("value")?;
//!     Ok(outputs([("result", json!(value * 2.0))]))
//! });
//! let result = artifacts[0].executor(registry).call(true, json!({ "value": 21 }))?;
//!
//! assert!(result.on_success);
//! assert_eq!(result.output("result"), Some(&json!(42.0)));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod annotation;
pub mod codegen;
pub mod compiler;
pub mod config;
pub mod diff;
pub mod error;
pub mod expander;
pub mod ir;
pub mod prelude;
pub mod runtime;
pub mod validator;
