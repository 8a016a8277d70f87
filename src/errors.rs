//! Diagnostic types with source spans.
//!
//! User-facing errors ([`SyntaxError`], [`TypeError`]) carry a byte span
//! into the original source; the driver attaches the source text at report
//! time so miette can render an underlined excerpt. [`CodegenError`] is
//! different in kind: it signals a broken contract between compiler passes
//! (for example a missing type annotation) and is never rendered against
//! user source.

use crate::token::Span;
use miette::{Diagnostic, SourceSpan};
use thiserror::Error;
use std::fmt;

impl From<Span> for SourceSpan {
    fn from(span: Span) -> Self {
        (span.start, span.end.saturating_sub(span.start)).into()
    }
}

/// Stable error codes for syntax and early-semantic violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// PR01 — expected token or keyword not found.
    ExpectedToken,
    /// PR02 — premature end of input.
    UnexpectedEof,
    /// PR03 — type, method, parameter or variable name reused.
    Redeclaration,
    /// PR04 — unknown variable, type or method name.
    UnresolvedName,
    /// PR05 — duplicate field name in a record type or literal.
    DuplicateField,
    /// PR06 — call argument count does not match declared parameter count.
    ArityMismatch,
    /// PR07 — duplicate case value within one switch.
    DuplicateCase,
    /// PR08 — compile-time constant required.
    NonConstant,
    /// PR09 — break/continue outside a permitted context.
    JumpOutsideLoop,
    /// PR10 — assignment target is not an lvalue.
    InvalidLvalue,
    /// PR11 — token cannot begin any expression or type.
    UnrecognizedTerm,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ExpectedToken => "PR01",
            ErrorCode::UnexpectedEof => "PR02",
            ErrorCode::Redeclaration => "PR03",
            ErrorCode::UnresolvedName => "PR04",
            ErrorCode::DuplicateField => "PR05",
            ErrorCode::ArityMismatch => "PR06",
            ErrorCode::DuplicateCase => "PR07",
            ErrorCode::NonConstant => "PR08",
            ErrorCode::JumpOutsideLoop => "PR09",
            ErrorCode::InvalidLvalue => "PR10",
            ErrorCode::UnrecognizedTerm => "PR11",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A syntax or early-semantic error. The parse aborts on the first one.
#[derive(Error, Debug, Diagnostic)]
#[error("[{code}] {message}")]
pub struct SyntaxError {
    pub code: ErrorCode,
    pub message: String,
    #[label("{message}")]
    pub span: Span,
}

impl SyntaxError {
    pub fn new(code: ErrorCode, message: impl Into<String>, span: Span) -> Self {
        Self {
            code,
            message: message.into(),
            span,
        }
    }
}

/// An error raised by the type-annotation pass.
#[derive(Error, Debug, Diagnostic)]
#[error("type error: {message}")]
pub struct TypeError {
    pub message: String,
    #[label("{message}")]
    pub span: Span,
}

impl TypeError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}

/// Internal-consistency failure during code generation. By the time code
/// generation runs the program has been validated, so any of these
/// indicates a bug in an upstream pass, not in the user's program.
#[derive(Error, Debug)]
pub enum CodegenError {
    #[error("internal: expression at bytes {0}..{1} carries no type annotation")]
    MissingTypeAnnotation(usize, usize),

    #[error("internal: no register allocated for variable '{0}'")]
    UnallocatedVariable(String),

    #[error("internal: break/continue reached code generation without an enclosing frame")]
    NoEnclosingFrame,

    #[error("internal: call to unregistered method '{0}'")]
    UnknownMethod(String),

    #[error("internal: reference to undeclared type name '{0}'")]
    UnknownTypeName(String),

    #[error("internal: {0}")]
    Invariant(String),
}
