//! Runtime faults raised by submitted code.
//!
//! A fault never escapes `ExecutionKernel::execute`; it is rendered as a
//! single `Error: <Kind>: <message>` line in the captured output.

use std::fmt;

use super::parser::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    SyntaxError,
    NameError,
    TypeError,
    ValueError,
    ZeroDivisionError,
    IndexError,
    KeyError,
    AttributeError,
    OverflowError,
    RecursionError,
    MemoryError,
    ConnectionError,
    InternalError,
}

impl FaultKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FaultKind::SyntaxError => "SyntaxError",
            FaultKind::NameError => "NameError",
            FaultKind::TypeError => "TypeError",
            FaultKind::ValueError => "ValueError",
            FaultKind::ZeroDivisionError => "ZeroDivisionError",
            FaultKind::IndexError => "IndexError",
            FaultKind::KeyError => "KeyError",
            FaultKind::AttributeError => "AttributeError",
            FaultKind::OverflowError => "OverflowError",
            FaultKind::RecursionError => "RecursionError",
            FaultKind::MemoryError => "MemoryError",
            FaultKind::ConnectionError => "ConnectionError",
            FaultKind::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Fault {
    pub kind: FaultKind,
    pub message: String,
}

impl Fault {
    pub fn new(kind: FaultKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ValueError, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(FaultKind::IndexError, message)
    }

    pub fn zero_division(message: impl Into<String>) -> Self {
        Self::new(FaultKind::ZeroDivisionError, message)
    }

    pub fn overflow() -> Self {
        Self::new(FaultKind::OverflowError, "integer overflow")
    }

    pub fn undefined(name: &str) -> Self {
        Self::new(FaultKind::NameError, format!("name '{name}' is not defined"))
    }

    /// Diagnostic line appended to captured output.
    pub fn diagnostic(&self) -> String {
        format!("Error: {self}\n")
    }
}

impl From<ParseError> for Fault {
    fn from(err: ParseError) -> Self {
        Fault::new(FaultKind::SyntaxError, err.to_string())
    }
}
