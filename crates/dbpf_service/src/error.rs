//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Reading or writing the package failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Package(dbpf_package::error::Error),

    /// Decoding a typed resource failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resource(#[from] dbpf_resource::error::Error),

    /// The operation was cancelled through its token
    #[error("operation cancelled")]
    Cancelled,

    /// The package is still shared with a read in flight
    #[error("package is in use by another task")]
    #[diagnostic(help("wait for pending reads of this package to finish before editing it"))]
    PackageBusy,

    /// The handle was never loaded from or saved to a file
    #[error("package has no file path")]
    #[diagnostic(help("use save_as to pick a destination"))]
    NoPath,

    /// A worker task panicked or was aborted
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

impl From<dbpf_package::error::Error> for Error {
    fn from(error: dbpf_package::error::Error) -> Self {
        match error {
            dbpf_package::error::Error::Cancelled => Error::Cancelled,
            e => Error::Package(e),
        }
    }
}

/// Result type for library
pub type Result<T> = core::result::Result<T, Error>;
