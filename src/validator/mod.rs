//! Static validation of a workflow graph.
//!
//! Validation is a pure function `&Workflow -> ValidationReport` built from a list of
//! rules. Each rule implements [`ValidationRule`] and checks one concern; the
//! [`Validator`] runs them in order and merges their diagnostics. Problems in the
//! user's graph are always reported as [`Diagnostic`] data, never as errors.
//!
//! # Adding a Rule
//!
//! Implement [`ValidationRule`] and hand it to [`Validator::with_rule`]. Its
//! diagnostics land in the same `errors`/`warnings` lists as the built-in ones.

pub mod rules;

use crate::annotation::SourceLocation;
use crate::ir::{Connection, DataType, Workflow};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use tracing::debug;

/// Stable diagnostic codes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiagnosticCode {
    MissingWorkflowName,
    DuplicateInstanceId,
    UnknownNodeType,
    UnknownSourceNode,
    UnknownTargetNode,
    UnknownSourcePort,
    UnknownTargetPort,
    InvalidConnectionDirection,
    MultipleConnectionsToInput,
    DuplicateConnection,
    CycleDetected,
    ScopeUnknownOwner,
    ScopeUnknownMember,
    ScopeParentMismatch,
    InstanceInMultipleScopes,
    InvalidScopeOwner,
    ScopeConnectionMismatch,
    ScopeMissingRequiredInput,
    StubNodeType,
    MissingRequiredInput,
    UnreachableNode,
    StepDataMismatch,
    TypeCoercion,
    TypeIncompatible,
    TypeMismatch,
    /// A code contributed by an external rule.
    Custom(String),
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &str {
        match self {
            DiagnosticCode::MissingWorkflowName => "MISSING_WORKFLOW_NAME",
            DiagnosticCode::DuplicateInstanceId => "DUPLICATE_INSTANCE_ID",
            DiagnosticCode::UnknownNodeType => "UNKNOWN_NODE_TYPE",
            DiagnosticCode::UnknownSourceNode => "UNKNOWN_SOURCE_NODE",
            DiagnosticCode::UnknownTargetNode => "UNKNOWN_TARGET_NODE",
            DiagnosticCode::UnknownSourcePort => "UNKNOWN_SOURCE_PORT",
            DiagnosticCode::UnknownTargetPort => "UNKNOWN_TARGET_PORT",
            DiagnosticCode::InvalidConnectionDirection => "INVALID_CONNECTION_DIRECTION",
            DiagnosticCode::MultipleConnectionsToInput => "MULTIPLE_CONNECTIONS_TO_INPUT",
            DiagnosticCode::DuplicateConnection => "DUPLICATE_CONNECTION",
            DiagnosticCode::CycleDetected => "CYCLE_DETECTED",
            DiagnosticCode::ScopeUnknownOwner => "SCOPE_UNKNOWN_OWNER",
            DiagnosticCode::ScopeUnknownMember => "SCOPE_UNKNOWN_MEMBER",
            DiagnosticCode::ScopeParentMismatch => "SCOPE_PARENT_MISMATCH",
            DiagnosticCode::InstanceInMultipleScopes => "INSTANCE_IN_MULTIPLE_SCOPES",
            DiagnosticCode::InvalidScopeOwner => "INVALID_SCOPE_OWNER",
            DiagnosticCode::ScopeConnectionMismatch => "SCOPE_CONNECTION_MISMATCH",
            DiagnosticCode::ScopeMissingRequiredInput => "SCOPE_MISSING_REQUIRED_INPUT",
            DiagnosticCode::StubNodeType => "STUB_NODE_TYPE",
            DiagnosticCode::MissingRequiredInput => "MISSING_REQUIRED_INPUT",
            DiagnosticCode::UnreachableNode => "UNREACHABLE_NODE",
            DiagnosticCode::StepDataMismatch => "STEP_DATA_MISMATCH",
            DiagnosticCode::TypeCoercion => "TYPE_COERCION",
            DiagnosticCode::TypeIncompatible => "TYPE_INCOMPATIBLE",
            DiagnosticCode::TypeMismatch => "TYPE_MISMATCH",
            DiagnosticCode::Custom(code) => code,
        }
    }

    /// Parses a code; anything not built in becomes `Custom`.
    pub fn from_code(code: &str) -> Self {
        const BUILT_IN: [DiagnosticCode; 25] = [
            DiagnosticCode::MissingWorkflowName,
            DiagnosticCode::DuplicateInstanceId,
            DiagnosticCode::UnknownNodeType,
            DiagnosticCode::UnknownSourceNode,
            DiagnosticCode::UnknownTargetNode,
            DiagnosticCode::UnknownSourcePort,
            DiagnosticCode::UnknownTargetPort,
            DiagnosticCode::InvalidConnectionDirection,
            DiagnosticCode::MultipleConnectionsToInput,
            DiagnosticCode::DuplicateConnection,
            DiagnosticCode::CycleDetected,
            DiagnosticCode::ScopeUnknownOwner,
            DiagnosticCode::ScopeUnknownMember,
            DiagnosticCode::ScopeParentMismatch,
            DiagnosticCode::InstanceInMultipleScopes,
            DiagnosticCode::InvalidScopeOwner,
            DiagnosticCode::ScopeConnectionMismatch,
            DiagnosticCode::ScopeMissingRequiredInput,
            DiagnosticCode::StubNodeType,
            DiagnosticCode::MissingRequiredInput,
            DiagnosticCode::UnreachableNode,
            DiagnosticCode::StepDataMismatch,
            DiagnosticCode::TypeCoercion,
            DiagnosticCode::TypeIncompatible,
            DiagnosticCode::TypeMismatch,
        ];
        BUILT_IN
            .into_iter()
            .find(|c| c.as_str() == code)
            .unwrap_or_else(|| DiagnosticCode::Custom(code.to_string()))
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for DiagnosticCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DiagnosticCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = String::deserialize(deserializer)?;
        Ok(DiagnosticCode::from_code(&code))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One coded finding about a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: DiagnosticCode,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<Connection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<SourceLocation>,
}

impl Diagnostic {
    pub fn error(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            node: None,
            connection: None,
            location: None,
        }
    }

    pub fn warning(code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, message)
        }
    }

    pub fn with_node(mut self, node: &str) -> Self {
        self.node = Some(node.to_string());
        self
    }

    pub fn with_connection(mut self, connection: &Connection) -> Self {
        self.connection = Some(connection.clone());
        self
    }

    pub fn with_location(mut self, location: Option<&SourceLocation>) -> Self {
        self.location = location.cloned();
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{} [{}]: {}", severity, self.code, self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {})", location)?;
        }
        Ok(())
    }
}

/// Errors and warnings of one validation run. `valid` is exactly `errors.is_empty()`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn from_diagnostics(diagnostics: impl IntoIterator<Item = Diagnostic>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) =
            diagnostics.into_iter().partition(Diagnostic::is_error);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    pub fn has_error(&self, code: &DiagnosticCode) -> bool {
        self.errors.iter().any(|d| &d.code == code)
    }

    pub fn has_warning(&self, code: &DiagnosticCode) -> bool {
        self.warnings.iter().any(|d| &d.code == code)
    }

    /// All diagnostics carrying `code`, errors first.
    pub fn with_code<'a>(&'a self, code: &'a DiagnosticCode) -> impl Iterator<Item = &'a Diagnostic> {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .filter(move |d| &d.code == code)
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in self.errors.iter().chain(self.warnings.iter()) {
            writeln!(f, "{}", diagnostic)?;
        }
        write!(
            f,
            "{} error(s), {} warning(s)",
            self.errors.len(),
            self.warnings.len()
        )
    }
}

/// `Draft` checks structure only and tolerates stubs; `Full` adds data-flow and
/// type checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationMode {
    Draft,
    #[default]
    Full,
}

/// Settings a rule may consult.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext {
    pub mode: ValidationMode,
    /// Promotes coercion warnings to `TYPE_MISMATCH` errors.
    pub strict: bool,
}

/// A single validation pass.
pub trait ValidationRule: Send + Sync {
    /// Unique identifier, e.g. `"connections"`.
    fn id(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Whether the rule runs in `mode`. Defaults to every mode.
    fn applies_to(&self, mode: ValidationMode) -> bool {
        let _ = mode;
        true
    }

    fn validate(&self, workflow: &Workflow, context: &RuleContext) -> Vec<Diagnostic>;
}

/// A workflow that passed validation. Only [`Validator::validate_into`] creates one.
#[derive(Debug, Clone)]
pub struct ValidatedWorkflow {
    workflow: Workflow,
    report: ValidationReport,
    mode: ValidationMode,
}

impl ValidatedWorkflow {
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// The (error-free) report, still carrying any warnings.
    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    pub fn into_inner(self) -> Workflow {
        self.workflow
    }
}

/// Runs the built-in rules followed by any added ones.
pub struct Validator {
    mode: ValidationMode,
    strict: bool,
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            strict: false,
            rules: vec![
                Box::new(rules::StructuralRule),
                Box::new(rules::ConnectionRule),
                Box::new(rules::CycleRule),
                Box::new(rules::ScopeRule),
                Box::new(rules::DataFlowRule),
                Box::new(rules::TypeRule),
            ],
        }
    }

    pub fn full() -> Self {
        Self::new(ValidationMode::Full)
    }

    pub fn draft() -> Self {
        Self::new(ValidationMode::Draft)
    }

    /// Treats every workflow as if it declared `@strictTypes`.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_rule(mut self, rule: Box<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// `(id, description)` of every registered rule, in run order.
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }

    pub fn validate(&self, workflow: &Workflow) -> ValidationReport {
        let context = RuleContext {
            mode: self.mode,
            strict: self.strict || workflow.metadata.strict_types,
        };
        let report = ValidationReport::from_diagnostics(
            self.rules
                .iter()
                .filter(|rule| rule.applies_to(self.mode))
                .flat_map(|rule| rule.validate(workflow, &context)),
        );
        debug!(
            workflow = %workflow.name,
            mode = ?self.mode,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Validated workflow"
        );
        report
    }

    /// Validates and, when there are no errors, wraps the workflow as validated.
    pub fn validate_into(&self, workflow: Workflow) -> Result<ValidatedWorkflow, ValidationReport> {
        let report = self.validate(&workflow);
        if report.valid {
            Ok(ValidatedWorkflow {
                workflow,
                report,
                mode: self.mode,
            })
        } else {
            Err(report)
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::full()
    }
}

/// The data type a connection endpoint carries after instance port overrides.
pub(crate) fn effective_output_type(workflow: &Workflow, node: &str, port: &str) -> Option<DataType> {
    let declared = workflow.output_port(node, port)?.data_type;
    Some(override_type(workflow, node, port).unwrap_or(declared))
}

pub(crate) fn effective_input_type(workflow: &Workflow, node: &str, port: &str) -> Option<DataType> {
    let declared = workflow.input_port(node, port)?.data_type;
    Some(override_type(workflow, node, port).unwrap_or(declared))
}

fn override_type(workflow: &Workflow, node: &str, port: &str) -> Option<DataType> {
    workflow
        .instance(node)
        .and_then(|i| i.port_override(port))
        .and_then(|o| o.data_type)
}
