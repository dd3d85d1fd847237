use crate::frame::FrameError;
use std::fmt;

/// Exception class raised by snippet code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NameError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    AttributeError,
    ZeroDivisionError,
    OverflowError,
    AssertionError,
    RecursionError,
    ResourceLimitError,
    NotImplementedError,
    SyntaxError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NameError => "NameError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::AssertionError => "AssertionError",
            ErrorKind::RecursionError => "RecursionError",
            ErrorKind::ResourceLimitError => "ResourceLimitError",
            ErrorKind::NotImplementedError => "NotImplementedError",
            ErrorKind::SyntaxError => "SyntaxError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A runtime error with the line it was raised on
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct EvalError {
    pub kind: ErrorKind,
    pub message: String,
    pub line: Option<usize>,
}

impl EvalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValueError, message)
    }

    pub fn attribute(type_name: &str, attr: &str) -> Self {
        Self::new(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, attr),
        )
    }

    pub fn unsupported(feature: &str) -> Self {
        Self::new(
            ErrorKind::NotImplementedError,
            format!("{} is not supported in the sandbox", feature),
        )
    }

    /// Attach a line number unless one is already set
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }
}

impl From<FrameError> for EvalError {
    fn from(err: FrameError) -> Self {
        let kind = match err {
            FrameError::Key(_) => ErrorKind::KeyError,
            FrameError::Type(_) => ErrorKind::TypeError,
            FrameError::Value(_) => ErrorKind::ValueError,
            FrameError::Index(_) => ErrorKind::IndexError,
            FrameError::ZeroDivision(_) => ErrorKind::ZeroDivisionError,
        };
        EvalError::new(kind, err.to_string())
    }
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;
