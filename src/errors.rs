//! Error types shared across the compilation pipeline.
//!
//! Everything raised while compiling an expression is a [`ParseError`] with
//! a byte offset; the structured-query orchestrator is the single place
//! that wraps those into a [`QueryError`] naming the `$`-operator the
//! failing text came from.

use std::fmt;

use crate::structured::QueryOperator;

/// Classification of a compilation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Invalid character or unterminated string literal.
    Lexical,
    /// Unexpected token, missing punctuation, malformed literal.
    Syntax,
    /// Unknown identifier or member, no applicable overload, ambiguous
    /// overload, or a result-type mismatch.
    Semantic,
}

/// A compilation failure at a known byte offset in the expression text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub position: usize,
}

impl ParseError {
    pub fn syntax(message: impl Into<String>, position: usize) -> ParseError {
        ParseError {
            kind: ParseErrorKind::Syntax,
            message: message.into(),
            position,
        }
    }

    pub fn semantic(message: impl Into<String>, position: usize) -> ParseError {
        ParseError {
            kind: ParseErrorKind::Semantic,
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (at index {})", self.message, self.position)
    }
}

impl std::error::Error for ParseError {}

/// The boundary error handed back to callers of the orchestrator: which
/// `$`-operator failed, and how.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryError {
    /// An expression inside `$filter`/`$orderby` failed to compile.
    Clause {
        operator: QueryOperator,
        source: ParseError,
    },
    /// `$skip`/`$top` carried a negative or non-numeric value. The message
    /// keeps the original conversion failure text.
    Range {
        operator: QueryOperator,
        message: String,
    },
    /// The caller's source does not have the element type the plan was
    /// compiled for.
    Composition { expected: String, actual: String },
    /// A validator rejected the composed query.
    Rejected(String),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::Clause { operator, source } => {
                write!(f, "parse error in ${}: {}", operator.as_str(), source)
            }
            QueryError::Range { operator, message } => {
                write!(f, "invalid value for ${}: {}", operator.as_str(), message)
            }
            QueryError::Composition { expected, actual } => {
                write!(
                    f,
                    "cannot compose query over '{}' onto a source of '{}'",
                    expected, actual
                )
            }
            QueryError::Rejected(message) => write!(f, "query rejected: {}", message),
        }
    }
}

impl std::error::Error for QueryError {}
