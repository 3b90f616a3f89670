use serde::{Deserialize, Serialize};

/// Options for the [`Compiler`](crate::compiler::Compiler) pipeline.
///
/// Every field has a default, so hosts can load partial JSON documents:
///
/// ```
/// use kumiki::config::CompileOptions;
///
/// let options = CompileOptions::from_json(r#"{ "strict": true }"#).unwrap();
/// assert!(options.strict);
/// assert!(!options.draft);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompileOptions {
    /// Turns type coercions and incompatibilities into errors.
    pub strict: bool,
    /// Validates in draft mode and generates stubs for unimplemented node types.
    pub draft: bool,
    /// Generated programs never emit debug events.
    pub production: bool,
    /// Iteration scopes start from an empty variable store.
    pub clean_scopes: bool,
    /// Emit debug events while running (ignored in production).
    pub trace: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            strict: false,
            draft: false,
            production: false,
            clean_scopes: true,
            trace: false,
        }
    }
}

impl CompileOptions {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn executor_options(&self) -> ExecutorOptions {
        ExecutorOptions {
            trace: self.trace,
            production: self.production,
            clean_scopes: self.clean_scopes,
        }
    }
}

/// Options for running a compiled workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExecutorOptions {
    pub trace: bool,
    pub production: bool,
    pub clean_scopes: bool,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            trace: false,
            production: false,
            clean_scopes: true,
        }
    }
}

impl ExecutorOptions {
    /// Debug events flow only when tracing is on and neither the options nor the
    /// program are in production mode.
    pub fn emits_events(&self, production_program: bool) -> bool {
        self.trace && !self.production && !production_program
    }
}
