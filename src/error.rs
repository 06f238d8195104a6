//! User-facing diagnostics. Every error here is raised by semantic analysis;
//! later phases only ever fail on internal invariants, which panic.

use colored::Colorize;
use itertools::Itertools;
use thiserror::Error;

use crate::frontend::{SourceFile, Span};

/// Types are rendered to strings when the error is raised so that a
/// diagnostic stays meaningful after the symbol table is gone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SemanticErrorKind {
    #[error("unknown library `{name}`, only `input` and `output` can be imported")]
    UnknownLibrary { name: String },

    #[error("`{name}` is already declared in this scope")]
    DuplicateDeclaration { name: String },

    #[error("cannot find `{name}` in this scope")]
    UnboundName { name: String },

    #[error("cannot access field `{field}` of `{base}`, which has non-record type {ty}")]
    NotARecord {
        base: String,
        field: String,
        ty: String,
    },

    #[error("record type {ty} has no field named `{field}`")]
    UnknownField { field: String, ty: String },

    #[error("expected left-hand side of `{operator}` with type {lhs} to match right-hand side {rhs}")]
    TypeMismatch {
        operator: String,
        lhs: String,
        rhs: String,
    },

    #[error("cannot index into `{name}`, which has non-array type {ty}")]
    NotAnArray { name: String, ty: String },

    #[error("array index must be an integer but found {actual}")]
    NonIntegerIndex { actual: String },

    #[error("type {actual} cannot be dereferenced")]
    NotAPointer { actual: String },

    #[error("cannot apply unary `{operator}` to type {operand}")]
    BadUnaryOperand { operator: String, operand: String },

    #[error("cannot use type {operand} as an operand of `{operator}`")]
    BadBinaryOperand { operator: String, operand: String },

    #[error("expected {expected} argument(s) to `{name}` but found {actual}")]
    ArityMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("argument {position} of `{name}` expected type {expected} but found {actual}")]
    ArgTypeMismatch {
        name: String,
        position: usize,
        expected: String,
        actual: String,
    },

    #[error("expression is not assignable")]
    NotAnLvalue,

    #[error("`{name}` is not a function or procedure")]
    NotCallable { name: String },

    #[error("cannot assign {value} to a location of type {target}")]
    IncompatibleAssignment { target: String, value: String },

    #[error("function `{function}` never assigns its return value")]
    ReturnNotAssigned { function: String },

    #[error("function `{function}` cannot assign to `{name}`, which is not declared locally")]
    AssignedToNonLocalInFunction { function: String, name: String },

    #[error("expected condition to be boolean but found {actual}")]
    NonBooleanCondition { actual: String },

    #[error("for loop variable and bounds must be integers but found {actual}")]
    NonIntegerLoopBound { actual: String },

    #[error("function `{function}` cannot return type {ty}, results must be scalars or pointers")]
    InvalidReturnType { function: String, ty: String },

    #[error("`{name}` cannot have type {ty}, which has no size")]
    ZeroSizedType { name: String, ty: String },

    #[error("type {ty} is too large, an object may take at most {max} bytes")]
    TypeTooLarge { ty: String, max: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub span: Span,
    pub kind: SemanticErrorKind,
}

impl Diagnostic {
    pub fn new(span: Span, kind: SemanticErrorKind) -> Self {
        Self { span, kind }
    }

    /// Renders the diagnostic the way it is printed to the terminal. Without
    /// the source file only byte offsets can be given.
    pub fn render(&self, source_file: Option<&SourceFile>) -> String {
        match source_file {
            Some(file) => format!(
                "{}: {} {}\n{}",
                "error".red(),
                self.kind,
                format!("(at {})", file.format_span_position(self.span)).white(),
                file.highlight_span(self.span)
            ),
            None => format!(
                "{}: {} {}",
                "error".red(),
                self.kind,
                format!("(at bytes {}..{})", self.span.start, self.span.end).white()
            ),
        }
    }
}

/// All errors reported during one analysis, in the order they were found
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{}", .0.iter().map(|d| d.kind.to_string()).join("\n"))]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &SemanticErrorKind> {
        self.0.iter().map(|d| &d.kind)
    }

    pub fn render(&self, source_file: Option<&SourceFile>) -> String {
        self.0.iter().map(|d| d.render(source_file)).join("\n")
    }
}
