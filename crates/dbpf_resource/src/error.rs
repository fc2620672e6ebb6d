//! Error types that can be emitted from this library
//!

use miette::Diagnostic;
use thiserror::Error;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// Transparent wrapper for [`std::string::FromUtf8Error`]
    #[error(transparent)]
    UTF8Error(#[from] std::string::FromUtf8Error),

    /// The resource bytes do not describe a valid resource
    #[error(transparent)]
    #[diagnostic(transparent)]
    Resource(#[from] ResourceError),

    /// The caller asked for a resource API version this library does not implement
    #[error("resource api version {requested} is not supported")]
    #[diagnostic(help("supported versions are 0 (latest) and 1"))]
    UnsupportedApiVersion {
        /// Version passed by the caller
        requested: u32,
    },

    /// The resource stream is larger than the configured limit
    #[error("resource is larger than {limit} bytes")]
    TooLarge {
        /// Bytes read before giving up
        size: u64,
        /// Configured limit
        limit: u64,
    },
}

/// Structural problems found while parsing or serializing a resource
#[derive(Error, Diagnostic, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// Magic bytes did not match
    #[error("invalid magic {found:02X?}, expected {expected:02X?}")]
    InvalidMagic {
        /// Expected magic
        expected: [u8; 4],
        /// Bytes found instead
        found: [u8; 4],
    },

    /// Format version this library cannot read
    #[error("unsupported {kind} version {version}")]
    UnsupportedVersion {
        /// Resource kind
        kind: &'static str,
        /// Version found
        version: u32,
    },

    /// Declared entry count above the fixed bound
    #[error("{count} entries declared, at most {limit} are accepted")]
    TooManyEntries {
        /// Declared count
        count: u64,
        /// Accepted maximum
        limit: u64,
    },

    /// A length or count needs more bytes than remain
    #[error("{needed} bytes needed but only {remaining} remain")]
    Truncated {
        /// Bytes required
        needed: u64,
        /// Bytes left in the input
        remaining: u64,
    },

    /// A stored total does not match the data it describes
    #[error("{field} declares {declared} but the data holds {actual}")]
    LengthMismatch {
        /// Name of the field
        field: &'static str,
        /// Stored value
        declared: u64,
        /// Value computed from the data
        actual: u64,
    },

    /// A string does not fit its length field
    #[error("{field} is {len} bytes, at most {limit} are allowed")]
    TooLong {
        /// Name of the field
        field: &'static str,
        /// Actual length
        len: u64,
        /// Accepted maximum
        limit: u64,
    },

    /// The same instance appears twice in a name map
    #[error("instance {0:016X} appears more than once")]
    DuplicateInstance(u64),

    /// Bytes left over after the last entry
    #[error("{0} trailing bytes after the last entry")]
    TrailingData(u64),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
