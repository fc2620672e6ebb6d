//! Async access to DBPF packages.
//!
//! [`PackageService`] loads, decodes and saves packages on tokio's blocking pool. Every
//! operation takes a [`CancellationToken`](tokio_util::sync::CancellationToken):
//!
//! - a cancelled load returns [`error::Error::Cancelled`] and no handle
//! - a cancelled save deletes its temporary file, so the package on disk and the
//!   [`PackageHandle`] stay as they were
//!
//! Saving writes a complete new file next to the target and moves it into place once it is
//! finished, so a failed save never leaves a partly written package behind.
//!

pub mod error;
pub mod handle;
pub mod service;
pub mod source;

pub use handle::PackageHandle;
pub use service::{PackageService, ServiceOptions, DEFAULT_DECODE_CONCURRENCY};
pub use source::Source;
