use crate::annotation::{SourceUnit, build_unit};
use crate::codegen::{CompiledWorkflow, Generator};
use crate::config::{CompileOptions, ExecutorOptions};
use crate::error::CompileError;
use crate::ir::Workflow;
use crate::runtime::{Executor, NodeRegistry};
use crate::validator::{ValidationMode, ValidationReport, ValidationRule, Validator};
use tracing::{debug, info};

#[cfg(feature = "debug-tools")]
use std::fs;

/// Everything produced for one workflow.
#[derive(Debug, Clone)]
pub struct CompilationArtifacts {
    /// The expanded, validated workflow.
    pub workflow: Workflow,
    /// Validation warnings (a report with errors never reaches this point).
    pub report: ValidationReport,
    pub program: CompiledWorkflow,
    pub options: ExecutorOptions,
}

impl CompilationArtifacts {
    /// An executor for the program, configured with the compile-time runtime options.
    pub fn executor(&self, registry: NodeRegistry) -> Executor {
        Executor::new(self.program.clone(), registry).with_options(self.options)
    }
}

/// Runs the whole pipeline: annotation build, macro expansion, validation and code
/// generation.
pub struct Compiler {
    unit: SourceUnit,
    options: CompileOptions,
    validator: Validator,
    generator: Generator,
}

pub struct CompilerBuilder {
    unit: SourceUnit,
    options: CompileOptions,
    rules: Vec<Box<dyn ValidationRule>>,
}

impl CompilerBuilder {
    pub fn new(unit: SourceUnit) -> Self {
        Self {
            unit,
            options: CompileOptions::default(),
            rules: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: CompileOptions) -> Self {
        self.options = options;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.options.strict = strict;
        self
    }

    pub fn draft(mut self, draft: bool) -> Self {
        self.options.draft = draft;
        self
    }

    pub fn production(mut self, production: bool) -> Self {
        self.options.production = production;
        self
    }

    pub fn clean_scopes(mut self, clean: bool) -> Self {
        self.options.clean_scopes = clean;
        self
    }

    pub fn trace(mut self, trace: bool) -> Self {
        self.options.trace = trace;
        self
    }

    /// Adds a validation rule that runs after the built-in ones.
    pub fn with_rule(mut self, rule: Box<dyn ValidationRule>) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> Compiler {
        let mode = if self.options.draft {
            ValidationMode::Draft
        } else {
            ValidationMode::Full
        };
        let validator = self
            .rules
            .into_iter()
            .fold(Validator::new(mode).strict(self.options.strict), |v, rule| {
                v.with_rule(rule)
            });
        Compiler {
            unit: self.unit,
            generator: Generator::new().production(self.options.production),
            options: self.options,
            validator,
        }
    }
}

impl Compiler {
    pub fn builder(unit: SourceUnit) -> CompilerBuilder {
        CompilerBuilder::new(unit)
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compiles every workflow of the source unit, in declaration order. Stops at the
    /// first workflow that fails validation.
    pub fn compile(self) -> Result<Vec<CompilationArtifacts>, CompileError> {
        let parsed = build_unit(&self.unit)?;
        debug!(
            node_types = parsed.node_types.len(),
            workflows = parsed.workflows.len(),
            "source unit built"
        );

        let artifacts = parsed
            .workflows
            .into_iter()
            .map(|workflow| self.compile_workflow(workflow))
            .collect::<Result<Vec<_>, _>>()?;
        info!(workflows = artifacts.len(), "compilation finished");
        Ok(artifacts)
    }

    /// Validates and generates one already expanded workflow.
    pub fn compile_workflow(&self, workflow: Workflow) -> Result<CompilationArtifacts, CompileError> {
        let name = workflow.name.clone();
        let validated = self
            .validator
            .validate_into(workflow)
            .map_err(|report| CompileError::Invalid {
                workflow: name.clone(),
                report,
            })?;
        let program = self.generator.generate(&validated)?;

        #[cfg(feature = "debug-tools")]
        self.write_debug_file(
            &format!("tmp/workflow_{}_program.txt", self.sanitize_filename(&name)),
            &program.render_source(),
        )?;

        let report = validated.report().clone();
        Ok(CompilationArtifacts {
            workflow: validated.into_inner(),
            report,
            program,
            options: self.options.executor_options(),
        })
    }

    #[cfg(feature = "debug-tools")]
    fn sanitize_filename(&self, name: &str) -> String {
        name.chars()
            .filter(|c| c.is_alphanumeric() || *c == '_')
            .collect::<String>()
    }

    #[cfg(feature = "debug-tools")]
    fn write_debug_file(&self, path: &str, content: &str) -> Result<(), CompileError> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            fs::create_dir_all(parent).map_err(|e| {
                CompileError::DebugOutput(format!("Failed to create debug directory: {}", e))
            })?;
        }
        fs::write(path, content)
            .map_err(|e| CompileError::DebugOutput(format!("Failed to write debug file: {}", e)))
    }
}
