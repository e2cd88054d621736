use thiserror::Error;

use crate::service::RemoteError;
use crate::store::StoreError;

/// How a caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad caller input; retrying the same input will not help.
    InvalidInput,
    /// May succeed if retried later.
    Transient,
    Fatal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
        }
    }
}

/// Failures from allocation and commit.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Local bookkeeping disagrees with the remote service in a way that
    /// cannot be recovered automatically.
    #[error("inconsistent state: {0}")]
    Inconsistent(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Remote(e) => e.kind(),
            Error::Store(_) | Error::Inconsistent(_) => ErrorKind::Fatal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
