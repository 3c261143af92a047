//! Error and diagnostic types for the compiler.

use std::fmt;

use thiserror::Error;

use crate::lexer::SourcePos;

/// Result type for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;

/// Broad category of a compile failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed grammar
    Syntax,
    /// Well-formed grammar that breaks a binding or assignment rule
    Semantic,
    /// A structural limit of the bytecode format or of the parser was exceeded
    Limit,
    /// Memory for a buffer or table could not be reserved
    Allocation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Semantic => "SemanticError",
            ErrorKind::Limit => "LimitError",
            ErrorKind::Allocation => "AllocationError",
        };
        f.write_str(name)
    }
}

/// A failed compilation unit. There is no partial output: whoever receives
/// this error receives no bytecode.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind}: {message} ({pos})")]
pub struct CompileError {
    /// Error category
    pub kind: ErrorKind,
    /// Human-readable description
    pub message: String,
    /// Where the error was detected
    pub pos: SourcePos,
}

impl CompileError {
    /// Creates a new error.
    pub fn new(kind: ErrorKind, message: impl Into<String>, pos: SourcePos) -> Self {
        Self {
            kind,
            message: message.into(),
            pos,
        }
    }

    /// Malformed grammar.
    pub fn syntax(message: impl Into<String>, pos: SourcePos) -> Self {
        Self::new(ErrorKind::Syntax, message, pos)
    }

    /// Binding or assignment rule violation.
    pub fn semantic(message: impl Into<String>, pos: SourcePos) -> Self {
        Self::new(ErrorKind::Semantic, message, pos)
    }

    /// Structural limit exceeded.
    pub fn limit(message: impl Into<String>, pos: SourcePos) -> Self {
        Self::new(ErrorKind::Limit, message, pos)
    }

    /// Out of memory while growing `what`.
    pub fn allocation(what: &str, pos: SourcePos) -> Self {
        Self::new(ErrorKind::Allocation, format!("out of memory growing {what}"), pos)
    }
}

/// A non-fatal diagnostic. Sloppy-mode code gets these where strict code
/// would get a [`CompileError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Description of the problem
    pub message: String,
    /// Where it was found
    pub pos: SourcePos,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warning: {} ({})", self.message, self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CompileError::syntax("missing ; before statement", SourcePos::new(3, 14));
        assert_eq!(
            err.to_string(),
            "SyntaxError: missing ; before statement (line 3, column 14)"
        );
    }

    #[test]
    fn test_error_kinds() {
        let pos = SourcePos::default();
        assert_eq!(CompileError::semantic("x", pos).kind, ErrorKind::Semantic);
        assert_eq!(CompileError::limit("x", pos).kind, ErrorKind::Limit);
        let oom = CompileError::allocation("bytecode", pos);
        assert_eq!(oom.kind, ErrorKind::Allocation);
        assert!(oom.message.contains("bytecode"));
    }

    #[test]
    fn test_diagnostic_display() {
        let warning = Diagnostic {
            message: "duplicate argument a".into(),
            pos: SourcePos::new(1, 13),
        };
        assert_eq!(
            warning.to_string(),
            "warning: duplicate argument a (line 1, column 13)"
        );
    }
}
