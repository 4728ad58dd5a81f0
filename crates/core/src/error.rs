//! Error types shared across the interpreter.
//!
//! Failures are values, not panics: the reader returns a [`ReadError`]
//! discriminant, and everything downstream carries an [`ErrorInfo`]
//! (kind + message + optional faulting value). The interpreter mirrors the
//! last failure in a per-instance error slot so embedding hosts can inspect
//! it after a boolean-style failure and call `reset_error` to continue.

use crate::value::Value;
use std::fmt;

/// Reader outcome codes. `Ok` plays the role of the original's `SUCCESS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError {
    EndOfFile,
    NoCloseParen,
    ExtraCloseParen,
    DotAtBase,
    IllegalChar,
    NoCloseString,
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReadError::EndOfFile => "end of file",
            ReadError::NoCloseParen => "no close paren",
            ReadError::ExtraCloseParen => "extra close paren",
            ReadError::DotAtBase => "dot at base",
            ReadError::IllegalChar => "illegal character",
            ReadError::NoCloseString => "no close string",
        };
        f.write_str(s)
    }
}

impl std::error::Error for ReadError {}

/// Runtime failure subkinds raised by the VM and the native builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeKind {
    UnboundGlobal,
    ArityMismatch,
    TypeMismatch,
    DivideByZero,
    NonCallable,
    StackOverflow,
    /// Malformed instruction stream (a hand-edited or truncated boot image).
    BadBytecode,
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeKind::UnboundGlobal => "unbound global",
            RuntimeKind::ArityMismatch => "arity mismatch",
            RuntimeKind::TypeMismatch => "type mismatch",
            RuntimeKind::DivideByZero => "divide by zero",
            RuntimeKind::NonCallable => "non-callable",
            RuntimeKind::StackOverflow => "stack overflow",
            RuntimeKind::BadBytecode => "bad bytecode",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Read(ReadError),
    Compile,
    Runtime(RuntimeKind),
    FileNotFound,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Read(e) => write!(f, "read error: {}", e),
            ErrorKind::Compile => f.write_str("compile error"),
            ErrorKind::Runtime(k) => write!(f, "runtime error: {}", k),
            ErrorKind::FileNotFound => f.write_str("file not found"),
        }
    }
}

/// One recorded failure.
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
    /// The value that triggered the failure, when there is one.
    pub value: Option<Value>,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> ErrorInfo {
        ErrorInfo { kind, message: message.into(), value: None }
    }

    pub fn with_value(kind: ErrorKind, message: impl Into<String>, value: Value) -> ErrorInfo {
        ErrorInfo { kind, message: message.into(), value: Some(value) }
    }

    pub fn read(e: ReadError) -> ErrorInfo {
        ErrorInfo::new(ErrorKind::Read(e), "")
    }

    pub fn compile(message: impl Into<String>) -> ErrorInfo {
        ErrorInfo::new(ErrorKind::Compile, message)
    }

    pub fn runtime(kind: RuntimeKind, message: impl Into<String>) -> ErrorInfo {
        ErrorInfo::new(ErrorKind::Runtime(kind), message)
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for ErrorInfo {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_forms() {
        let e = ErrorInfo::read(ReadError::NoCloseParen);
        assert_eq!(e.to_string(), "read error: no close paren");
        let e = ErrorInfo::runtime(RuntimeKind::DivideByZero, "(/ 1 0)");
        assert_eq!(e.to_string(), "runtime error: divide by zero: (/ 1 0)");
        let e = ErrorInfo::new(ErrorKind::FileNotFound, "");
        assert_eq!(e.to_string(), "file not found");
    }

    #[test]
    fn test_faulting_value_is_carried() {
        let e = ErrorInfo::with_value(
            ErrorKind::Runtime(RuntimeKind::NonCallable),
            "operator position",
            Value::Fixnum(3),
        );
        assert_eq!(e.value, Some(Value::Fixnum(3)));
    }
}
