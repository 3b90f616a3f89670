//! The annotation surface: raw annotation tuples in, graph IR out, and back again.
//!
//! A host-language front end is expected to hand over one [`Declaration`] per
//! annotated function: the `(name, rawArguments, location)` tuples found in its doc
//! comment plus the function's declared parameter/return shape. [`lexer::tokenize`]
//! covers the common case of a `/** ... */` block already cut out of the source.

pub mod builder;
pub mod emitter;
pub mod lexer;

pub use builder::build_unit;
pub use emitter::{emit_node_type, emit_workflow};
pub use lexer::tokenize;

use crate::ir::{DataType, NodeType, Workflow};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Line/column of an annotation, both 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SourceLocation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new(line: usize, column: usize) -> Self {
        Self {
            file: None,
            line,
            column,
        }
    }

    pub fn in_file(mut self, file: &str) -> Self {
        self.file = Some(file.to_string());
        self
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file {
            Some(file) => write!(f, "{}:{}:{}", file, self.line, self.column),
            None => write!(f, "{}:{}", self.line, self.column),
        }
    }
}

/// One `@name rawArguments` line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub args: String,
    pub location: SourceLocation,
}

impl Annotation {
    pub fn new(name: &str, args: &str, location: SourceLocation) -> Self {
        Self {
            name: name.to_string(),
            args: args.to_string(),
            location,
        }
    }
}

/// A declared parameter or return value of the annotated function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamShape {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub optional: bool,
}

impl ParamShape {
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            optional: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamShape>,
    #[serde(default)]
    pub returns: Vec<ParamShape>,
    #[serde(default)]
    pub is_async: bool,
}

impl FunctionSignature {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn with_param(mut self, param: ParamShape) -> Self {
        self.params.push(param);
        self
    }

    pub fn with_return(mut self, param: ParamShape) -> Self {
        self.returns.push(param);
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.is_async = true;
        self
    }

    pub fn param(&self, name: &str) -> Option<&ParamShape> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn returned(&self, name: &str) -> Option<&ParamShape> {
        self.returns.iter().find(|p| p.name == name)
    }
}

/// An annotated function declaration. `body` is `None` for declarations without an
/// implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    pub annotations: Vec<Annotation>,
    pub signature: FunctionSignature,
    #[serde(default)]
    pub body: Option<String>,
}

impl Declaration {
    pub fn new(signature: FunctionSignature, annotations: Vec<Annotation>) -> Self {
        Self {
            annotations,
            signature,
            body: None,
        }
    }

    /// Tokenizes a doc-comment block and attaches it to `signature`.
    pub fn from_block(block: &str, signature: FunctionSignature) -> Self {
        Self::new(signature, tokenize(block))
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// The argument of the first annotation named `name`.
    pub fn annotation(&self, name: &str) -> Option<&Annotation> {
        self.annotations.iter().find(|a| a.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SourceUnit {
    pub declarations: Vec<Declaration>,
}

impl SourceUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_declaration(mut self, declaration: Declaration) -> Self {
        self.declarations.push(declaration);
        self
    }
}

/// Everything built from one source unit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUnit {
    pub node_types: Vec<NodeType>,
    pub workflows: Vec<Workflow>,
}

impl ParsedUnit {
    pub fn workflow(&self, name: &str) -> Option<&Workflow> {
        self.workflows.iter().find(|w| w.name == name)
    }

    pub fn node_type(&self, name: &str) -> Option<&NodeType> {
        self.node_types.iter().find(|t| t.name == name)
    }
}
