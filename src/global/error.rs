use std::fmt::Display;
use std::rc::Rc;
use thiserror::Error;

use crate::values::scalar::Sv;

/// The catchable error taxonomy. Every runtime failure carries exactly one
/// of these kinds; `eval` converts the error into `$@` and a false return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ErrorKind {
    ReadOnly,
    TypeError,
    UndefinedOperation,
    DivideByZero,
    ModuloByZero,
    RegexCompile,
    Unimplemented,
    NonExistentGroup,
    Compile,
    UserDie,
}

/// Errors raised by the value model itself (coercion, mutation, deref).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    #[error("Modification of a read-only value attempted")]
    ReadOnly,
    #[error("Illegal division by zero")]
    DivideByZero,
    #[error("Illegal modulus zero")]
    ModuloByZero,
    #[error("Not a {0} reference")]
    NotARef(&'static str),
    /// `kind` carries its article, e.g. "an ARRAY" or "a HASH".
    #[error("Can't use value as {0} reference")]
    WrongRefKind(&'static str),
    #[error("Use of uninitialized value")]
    Uninitialized,
}

impl ValueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ValueError::ReadOnly => ErrorKind::ReadOnly,
            ValueError::DivideByZero => ErrorKind::DivideByZero,
            ValueError::ModuloByZero => ErrorKind::ModuloByZero,
            ValueError::NotARef(_) | ValueError::WrongRefKind(_) => ErrorKind::TypeError,
            ValueError::Uninitialized => ErrorKind::UndefinedOperation,
        }
    }
}

/// Errors raised while preprocessing or compiling a pattern.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegexError {
    #[error("Reference to nonexistent group")]
    NonExistentGroup,
    #[error("{0}")]
    Syntax(String),
    #[error("Unimplemented regex feature: {0}")]
    Unimplemented(String),
}

impl RegexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RegexError::NonExistentGroup => ErrorKind::NonExistentGroup,
            RegexError::Syntax(_) => ErrorKind::RegexCompile,
            RegexError::Unimplemented(_) => ErrorKind::Unimplemented,
        }
    }
}

/// A parse or compile failure, as surfaced by `eval STRING` and `do FILE`.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub line: u32,
}

impl CompileError {
    pub fn new(message: impl Into<String>, line: u32) -> CompileError {
        CompileError {
            message: message.into(),
            line,
        }
    }
}

/// The error value that unwinds through the interpreter. Carries the kind,
/// a message, the source location derived from the compiled source map, and
/// (for `die` with a reference) the original value intact.
#[derive(Debug, Clone)]
pub struct PerlError {
    pub kind: ErrorKind,
    pub message: String,
    pub file: Option<Rc<str>>,
    pub line: Option<u32>,
    /// Set when the user passed a non-string to `die`; propagated intact.
    pub value: Option<Sv>,
}

impl PerlError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> PerlError {
        PerlError {
            kind,
            message: message.into(),
            file: None,
            line: None,
            value: None,
        }
    }

    pub fn die_value(value: Sv) -> PerlError {
        PerlError {
            kind: ErrorKind::UserDie,
            message: String::new(),
            file: None,
            line: None,
            value: Some(value),
        }
    }

    /// Attaches a source location unless one is already present.
    pub fn located(mut self, file: &Rc<str>, line: u32) -> PerlError {
        if self.file.is_none() {
            self.file = Some(file.clone());
            self.line = Some(line);
        }
        self
    }

    /// The `$@` text: message plus ` at FILE line N.` unless the message
    /// already ends in a newline (the `die` contract).
    pub fn to_message(&self) -> String {
        if self.message.ends_with('\n') {
            return self.message.clone();
        }
        match (&self.file, self.line) {
            (Some(file), Some(line)) => {
                format!("{} at {} line {}.\n", self.message, file, line)
            }
            _ => format!("{}\n", self.message),
        }
    }
}

impl Display for PerlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_message().trim_end())
    }
}

impl std::error::Error for PerlError {}

impl From<ValueError> for PerlError {
    fn from(err: ValueError) -> PerlError {
        PerlError::new(err.kind(), err.to_string())
    }
}

impl From<RegexError> for PerlError {
    fn from(err: RegexError) -> PerlError {
        PerlError::new(err.kind(), err.to_string())
    }
}

impl From<CompileError> for PerlError {
    fn from(err: CompileError) -> PerlError {
        let mut perl = PerlError::new(ErrorKind::Compile, err.message.clone());
        perl.line = Some(err.line);
        perl
    }
}
