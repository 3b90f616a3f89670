use crate::annotation::SourceLocation;
use crate::validator::ValidationReport;
use thiserror::Error;

/// A data type name that is not part of the closed port type set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown data type '{0}'")]
pub struct UnknownDataType(pub String);

/// Errors raised while turning annotation tuples into the graph IR.
#[derive(Error, Debug, Clone)]
pub enum BuildError {
    #[error("Malformed @{annotation} at {location}: {message}")]
    MalformedAnnotation {
        annotation: String,
        message: String,
        location: SourceLocation,
    },

    #[error("Invalid data type at {location}: {source}")]
    InvalidDataType {
        #[source]
        source: UnknownDataType,
        location: SourceLocation,
    },

    #[error("Declaration '{function}' has no @flowWeaver kind (expected 'workflow' or 'nodeType')")]
    MissingKind { function: String },

    #[error("Unknown @flowWeaver kind '{kind}' on '{function}' at {location}")]
    UnknownKind {
        kind: String,
        function: String,
        location: SourceLocation,
    },

    #[error("Workflow '{0}' is declared more than once")]
    DuplicateWorkflow(String),

    #[error("Node type '{0}' is declared more than once")]
    DuplicateNodeType(String),

    #[error(transparent)]
    Expand(#[from] ExpandError),
}

/// Errors raised by the macro expander. Every variant names the macro kind it came from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    #[error("@{macro_kind} references unknown instance '{id}'")]
    UnknownInstance { macro_kind: &'static str, id: String },

    #[error("@{macro_kind} references instance '{id}' of unknown node type '{node_type}'")]
    UnknownNodeType {
        macro_kind: &'static str,
        id: String,
        node_type: String,
    },

    #[error("@{macro_kind} references unknown port '{port}' on '{id}'")]
    UnknownPort {
        macro_kind: &'static str,
        id: String,
        port: String,
    },

    #[error("NO_DATA_INPUT: @map child '{child}' has no data input port to receive items")]
    NoDataInput { child: String },

    #[error("@map iterator id '{id}' is already used by an instance of type '{node_type}'")]
    IdConflict { id: String, node_type: String },

    #[error("Invalid @path: {0}")]
    InvalidPath(String),
}

/// Internal invariant violations during code generation. These indicate a pipeline bug,
/// never a problem in the user's workflow (the validator reports those).
#[derive(Error, Debug, Clone)]
pub enum GenerateError {
    #[error("Node type '{node_type}' of instance '{instance}' is missing after validation")]
    MissingNodeType { instance: String, node_type: String },

    #[error("Instance '{0}' uses a stub node type; stubs are only generated in draft mode")]
    StubInFullGeneration(String),

    #[error("Region '{region}' still contains a cycle through: {remaining}")]
    CycleInRegion { region: String, remaining: String },

    #[error("Map iterator '{0}' owns no iteration scope")]
    MissingIterationScope(String),

    #[error("Artifact error: {0}")]
    Artifact(String),
}

/// Faults raised while a compiled workflow runs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    #[error("Execution cancelled at '{}' after {occurrences} occurrence(s)", .instance.as_deref().unwrap_or("<workflow>"))]
    Cancelled {
        occurrences: usize,
        instance: Option<String>,
    },

    #[error("No implementation registered for node function '{function}' (instance '{instance}')")]
    MissingImplementation { function: String, instance: String },

    #[error("Instance '{instance}' uses CUSTOM execution but '{function}' registered no trigger predicate")]
    MissingTriggerPredicate { function: String, instance: String },

    #[error("Workflow '{0}' is asynchronous and must be invoked with call_async")]
    AsyncRequired(String),

    #[error("Synchronous execution suspended while resolving '{0}'")]
    Suspended(String),

    #[error("Workflow parameters must be a JSON object, found: {0}")]
    InvalidParams(String),

    #[error("Expression node '{instance}' failed: {message}")]
    ExpressionFailed { instance: String, message: String },
}

impl RuntimeError {
    /// True for deliberate stops raised through `check_aborted`.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, RuntimeError::Cancelled { .. })
    }
}

/// A failure reported by a node implementation. Routed to the node's `onFailure`
/// port rather than aborting the workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct NodeError(pub String);

impl From<String> for NodeError {
    fn from(message: String) -> Self {
        NodeError(message)
    }
}

impl From<&str> for NodeError {
    fn from(message: &str) -> Self {
        NodeError(message.to_string())
    }
}

/// Errors surfaced by the end-to-end `Compiler` facade.
#[derive(Error, Debug, Clone)]
pub enum CompileError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error("Workflow '{workflow}' failed validation with {} error(s)", .report.errors.len())]
    Invalid {
        workflow: String,
        report: ValidationReport,
    },

    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error("Failed to write debug output: {0}")]
    DebugOutput(String),
}
