//! Prelude module for convenient imports
//!
//! Re-exports the types most hosts need to describe, compile and run workflows.
//!
//! ```rust
//! use kumiki::prelude::*;
//!
//! let workflow = Workflow::new("empty");
//! let report = Validator::full().validate(&workflow);
//! assert!(report.valid);
//! ```

// Pipeline
pub use crate::annotation::{Annotation, Declaration, FunctionSignature, ParamShape, SourceUnit};
pub use crate::codegen::{CompiledWorkflow, Generator};
pub use crate::compiler::{CompilationArtifacts, Compiler};
pub use crate::config::{CompileOptions, ExecutorOptions};
pub use crate::validator::{ValidatedWorkflow, ValidationMode, ValidationReport, Validator};

// Graph model
pub use crate::ir::{Connection, DataType, NodeInstance, NodeType, Port, PortRef, Workflow};

// Runtime
pub use crate::runtime::{
    AbortSignal, ExecutionContext, Executor, NodeCall, NodeRegistry, Outputs, WorkflowResult,
    outputs,
};

// Error types
pub use crate::error::{BuildError, CompileError, GenerateError, NodeError, RuntimeError};
