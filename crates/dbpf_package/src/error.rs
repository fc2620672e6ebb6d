//! Error types that can be emitted from this library

use miette::Diagnostic;
use thiserror::Error;

use crate::key::ResourceKey;

/// Error type for library
#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    /// Transparent wrapper for [`std::io::Error`]
    #[error(transparent)]
    IOError(#[from] std::io::Error),

    /// Transparent wrapper for [`binrw::Error`]
    #[error(transparent)]
    BinRWError(#[from] binrw::Error),

    /// The archive or one of its blocks is malformed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Format(#[from] FormatError),

    /// The archive uses a feature this library does not handle
    #[error(transparent)]
    #[diagnostic(transparent)]
    Unsupported(#[from] UnsupportedError),

    /// unable to find requested resource
    #[error("unable to find resource {0}")]
    ResourceNotFound(ResourceKey),

    /// Decoding a single resource failed; the rest of the package is still usable
    #[error("resource {key} failed during {stage}")]
    Resource {
        /// The resource that failed
        key: ResourceKey,
        /// Where in the pipeline it failed
        stage: Stage,
        /// The underlying failure
        #[source]
        source: Box<Error>,
    },

    /// The operation was aborted by its caller
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn at(self, key: ResourceKey, stage: Stage) -> Error {
        match self {
            e @ Error::Resource { .. } => e,
            e @ Error::Cancelled => e,
            e => Error::Resource {
                key,
                stage,
                source: Box::new(e),
            },
        }
    }

    /// Returns the innermost error, skipping any [`Error::Resource`] annotation
    pub fn root(&self) -> &Error {
        match self {
            Error::Resource { source, .. } => source.root(),
            e => e,
        }
    }
}

/// Pipeline stage an error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Reading the fixed header
    Header,
    /// Reading the index table
    Index,
    /// Reading the stored bytes of a resource
    Read,
    /// Decompressing a resource
    Decompress,
    /// Compressing a resource for writing
    Compress,
    /// Writing the package
    Write,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Header => "header",
            Stage::Index => "index",
            Stage::Read => "read",
            Stage::Decompress => "decompress",
            Stage::Compress => "compress",
            Stage::Write => "write",
        })
    }
}

/// Malformed data in the archive or in a compressed block
#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum FormatError {
    /// file is not a DBPF package
    #[error("file is not a DBPF package (magic {found:02X?})")]
    InvalidMagic {
        /// The four bytes found where the magic should be
        found: [u8; 4],
    },

    /// the package version is not supported
    #[error("unsupported package version {major}.{minor}")]
    InvalidVersion {
        /// Major version found in the header
        major: u32,
        /// Minor version found in the header
        minor: u32,
    },

    /// stream ended early
    #[error("stream truncated during {stage}: needed {expected} bytes, {actual} available")]
    Truncated {
        /// Where the stream ran out
        stage: Stage,
        /// Bytes needed
        expected: u64,
        /// Bytes available
        actual: u64,
    },

    /// index table lies outside the stream
    #[error("index at {position} with size {size} lies outside the {stream_len} byte stream")]
    IndexOutOfBounds {
        /// Index position from the header
        position: u64,
        /// Index size from the header
        size: u64,
        /// Total stream length
        stream_len: u64,
    },

    /// the index declares more entries than allowed or than fit in it
    #[error("index declares {count} entries, at most {limit} allowed")]
    TooManyEntries {
        /// Declared entry count
        count: u64,
        /// Maximum accepted
        limit: u64,
    },

    /// an entry's byte range lies outside the stream
    #[error("resource {key} at {offset} with size {size} lies outside the {stream_len} byte stream")]
    EntryOutOfBounds {
        /// Offending entry
        key: ResourceKey,
        /// Chunk offset
        offset: u64,
        /// Stored size
        size: u64,
        /// Total stream length
        stream_len: u64,
    },

    /// decoded length differs from the declared one
    #[error("decoded {actual} bytes, expected {expected}")]
    SizeMismatch {
        /// Declared length
        expected: u64,
        /// Length actually produced
        actual: u64,
    },

    /// a declared length is larger than the configured bound
    #[error("declared size {declared} exceeds the limit of {limit} bytes")]
    SizeLimitExceeded {
        /// Declared length
        declared: u64,
        /// Configured bound
        limit: u64,
    },

    /// a RefPack back-reference points before the start of the output
    #[error("back-reference distance {distance} at output position {position}")]
    InvalidBackReference {
        /// Back distance requested
        distance: usize,
        /// Output length when the reference was read
        position: usize,
    },

    /// compressed input ended before the block was complete
    #[error("compressed input ended at {position}, needed {needed} more bytes")]
    InputUnderrun {
        /// Input cursor position
        position: usize,
        /// Bytes still required
        needed: usize,
    },

    /// decoding would write past the declared size
    #[error("decoded output would exceed the declared size of {declared} bytes")]
    OutputOverrun {
        /// Declared decompressed size
        declared: usize,
    },

    /// {0}
    #[error("{0}")]
    Corrupt(String),
}

/// Valid data this library does not know how to handle
#[derive(Error, Diagnostic, Debug, PartialEq, Eq)]
pub enum UnsupportedError {
    /// the compressed block signature is not zlib or RefPack
    #[error("unknown compression signature {0:02X?}")]
    UnknownSignature([u8; 2]),

    /// the index entry uses an unknown compression marker
    #[error("unknown compression marker {0:#06X}")]
    CompressionMarker(u16),

    /// the package grew past what 32-bit positions can address
    #[error("offset {0} does not fit in a 32-bit package position")]
    OffsetOverflow(u64),
}

/// Generic result type with crate's Error as its error variant
pub type Result<T> = core::result::Result<T, Error>;
