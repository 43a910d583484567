use std::fmt::Display;
use std::{fmt, result};
use std::collections::TryReserveError;
use std::sync::PoisonError;

#[derive(Debug, PartialEq, Eq)]
pub struct Error {
    err: Box<ErrorKind>, // use a Box to keep the Result type smaller
}

/// Only the resource-exhaustion and concurrency failure modes are modeled here.
/// Programmer/contract violations (header index overflow, mismatched socket reuse,
/// trace entry/exit mismatch) are not recoverable conditions -- they are fatal-logged
/// and then panic, rather than flowing through this type. See module docs in
/// `trace`, `inbound` and `outbound` for where that happens.
#[derive(Debug)]
pub enum ErrorKind {
    /// Allocation failure growing a queue or payload buffer.
    OutOfMemory,
    /// Another thread holding the external socket-table mutex panicked while it was locked.
    PoisonError,
    StringError(String),
}

pub type Result<T> = result::Result<T, Error>;

impl Error {
    pub fn new<S: ToString>(s: S) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(s.to_string())),
        }
    }

    pub fn out_of_memory() -> Self {
        Error {
            err: Box::new(ErrorKind::OutOfMemory),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(String::from(err))),
        }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Error {
            err: Box::new(ErrorKind::StringError(err)),
        }
    }
}

impl From<TryReserveError> for Error {
    fn from(_err: TryReserveError) -> Self {
        Error {
            err: Box::new(ErrorKind::OutOfMemory),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::new(err)
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_err: PoisonError<Guard>) -> Self {
        Error {
            err: Box::new(ErrorKind::PoisonError),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        std::fmt::Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::OutOfMemory => f.write_str("failed to allocate buffer memory"),
            ErrorKind::PoisonError => f.write_str("another thread panicked while holding the socket table mutex"),
            ErrorKind::StringError(s) => f.write_str(s),
        }
    }
}

impl PartialEq for ErrorKind {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

impl Eq for ErrorKind {}

impl std::error::Error for Error {}
