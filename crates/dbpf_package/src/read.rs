//! Types for reading and editing DBPF packages
//!

use bon::Builder;
use dashmap::DashMap;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::{
    fmt::{self, Debug},
    io::{self, Cursor, Read, Seek, SeekFrom},
    sync::Arc,
};
use tracing::{debug, instrument, warn};

use crate::{
    compression::{self, CodecOptions, DEFAULT_MAX_DECOMPRESSED_SIZE},
    error::{Error, FormatError, Result, Stage, UnsupportedError},
    key::ResourceKey,
    pool::BufferPool,
    types::{
        entry_size, read_index, CompressionMarker, IndexEntry, PackageHeader, HEADER_SIZE,
        MAX_STORED_SIZE,
    },
};

/// Default bound on the number of index entries accepted when loading
pub const DEFAULT_MAX_INDEX_ENTRIES: u32 = 1 << 20;

/// Limits and tuning used when loading a package
#[derive(Debug, Clone, Copy, Builder)]
pub struct PackageOptions {
    /// Largest decompressed resource accepted, in bytes
    #[builder(default = DEFAULT_MAX_DECOMPRESSED_SIZE)]
    pub max_resource_size: usize,

    /// Largest entry count accepted from the header
    #[builder(default = DEFAULT_MAX_INDEX_ENTRIES)]
    pub max_index_entries: u32,

    /// Number of idle read buffers kept for reuse
    #[builder(default = 8)]
    pub pool_buffers: usize,
}

impl Default for PackageOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl PackageOptions {
    pub(crate) fn codec(&self) -> CodecOptions {
        CodecOptions::builder()
            .max_decompressed_size(self.max_resource_size)
            .build()
    }
}

/// Where the bytes of a resource currently live
#[derive(Clone)]
pub(crate) enum Slot {
    /// In the source stream at the entry's offset
    Stored,
    /// Added or replaced in memory, uncompressed
    Added(Arc<[u8]>),
}

#[derive(Clone)]
pub(crate) struct Record {
    pub(crate) entry: IndexEntry,
    pub(crate) slot: Slot,
}

type CacheSlot = Arc<Mutex<Option<Arc<[u8]>>>>;

/// A DBPF package
///
/// Loading reads the header and index only; resource bytes are read and decompressed on first
/// access and cached per key. Concurrent lookups of the same key are coalesced so only one
/// caller decompresses it. Edits are held in memory until the package is written out with
/// [`Package::save_to`] or [`Package::compact_to`].
///
/// ```no_run
/// use std::io::prelude::*;
///
/// fn list_package(reader: impl Read + Seek) -> dbpf_package::error::Result<()> {
///     let package = dbpf_package::Package::load(reader)?;
///
///     for key in package.enumerate() {
///         let data = package.get_resource(&key)?;
///         println!("{key}: {} bytes", data.len());
///     }
///
///     Ok(())
/// }
/// ```
pub struct Package<R> {
    reader: Mutex<R>,
    stream_len: u64,
    header: PackageHeader,
    pub(crate) records: IndexMap<ResourceKey, Record>,
    cache: DashMap<ResourceKey, CacheSlot>,
    pool: BufferPool,
    options: PackageOptions,
    modified: bool,
}

impl<R> Debug for Package<R> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Package")
            .field("header", &self.header)
            .field("entries", &self.records.len())
            .field("stream_len", &self.stream_len)
            .field("modified", &self.modified)
            .finish()
    }
}

impl Package<Cursor<Vec<u8>>> {
    /// Create an empty in-memory package
    pub fn new() -> Self {
        Self::empty_with(PackageOptions::default())
    }

    /// Create an empty in-memory package with the given limits
    pub fn empty_with(options: PackageOptions) -> Self {
        Package {
            reader: Mutex::new(Cursor::new(Vec::new())),
            stream_len: 0,
            header: PackageHeader::default(),
            records: IndexMap::new(),
            cache: DashMap::new(),
            pool: BufferPool::new(options.pool_buffers),
            options,
            modified: false,
        }
    }
}

impl Default for Package<Cursor<Vec<u8>>> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Package<R> {
    /// The header as it was read, or as it will be used as a template when writing
    pub fn header(&self) -> &PackageHeader {
        &self.header
    }

    /// Options the package was loaded with
    pub fn options(&self) -> &PackageOptions {
        &self.options
    }

    /// Length of the source stream in bytes, 0 for packages created in memory
    pub fn stream_len(&self) -> u64 {
        self.stream_len
    }

    /// Number of live resources
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether this package holds no resources
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether resources were added or removed since the package was loaded
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether a resource with this key exists
    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.records.contains_key(key)
    }

    /// Keys of all live resources, in index order
    pub fn enumerate(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        self.records.keys().copied()
    }

    /// Index entries of all live resources, in index order
    ///
    /// Entries for resources added in memory report an offset of 0 and their uncompressed
    /// size until the package is written.
    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.records.values().map(|r| &r.entry)
    }

    /// Index entry for a key
    pub fn entry(&self, key: &ResourceKey) -> Option<&IndexEntry> {
        self.records.get(key).map(|r| &r.entry)
    }

    /// Total size of the resources once decompressed, if it can be represented.
    pub fn decompressed_size(&self) -> Option<u128> {
        let mut total = 0u128;
        for record in self.records.values() {
            total = total.checked_add(record.entry.memory_size as u128)?;
        }
        Some(total)
    }

    /// Largest resource that can be added and still be loaded with this package's options
    pub(crate) fn resource_size_limit(&self) -> u64 {
        (self.options.max_resource_size as u64).min(u64::from(MAX_STORED_SIZE))
    }

    /// Add a resource, replacing any existing one with the same key
    ///
    /// Returns `true` when an existing resource was replaced. Nothing is written until the
    /// package is saved. Data larger than [`PackageOptions::max_resource_size`] is rejected,
    /// since the package could not be loaded back with the same options.
    #[instrument(skip_all, fields(key = %key), err)]
    pub fn add_resource(&mut self, key: ResourceKey, data: impl Into<Arc<[u8]>>) -> Result<bool> {
        let data: Arc<[u8]> = data.into();
        let size = entry_size(data.len(), self.resource_size_limit()).map_err(|e| e.at(key, Stage::Write))?;
        let entry = IndexEntry {
            key,
            chunk_offset: 0,
            file_size: size,
            memory_size: size,
            compression: CompressionMarker::Stored.into(),
            committed: 1,
        };

        self.cache.remove(&key);
        self.modified = true;
        Ok(self
            .records
            .insert(
                key,
                Record {
                    entry,
                    slot: Slot::Added(data),
                },
            )
            .is_some())
    }

    /// Remove a resource, returning whether it existed
    #[instrument(skip_all, fields(key = %key))]
    pub fn remove_resource(&mut self, key: &ResourceKey) -> bool {
        self.cache.remove(key);
        let removed = self.records.shift_remove(key).is_some();
        self.modified |= removed;
        removed
    }

    /// Drop every cached decompressed resource
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Whether the decompressed bytes of a key are currently cached
    pub fn is_cached(&self, key: &ResourceKey) -> bool {
        self.cache
            .get(key)
            .map(|slot| slot.lock().is_some())
            .unwrap_or(false)
    }

    /// Unwrap and return the inner reader object
    ///
    /// The position of the reader is undefined.
    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }
}

impl<R: Read + Seek> Package<R> {
    /// Read a package, collecting the resources it contains.
    pub fn load(reader: R) -> Result<Package<R>> {
        Self::load_with(reader, PackageOptions::default())
    }

    /// Read a package using the given limits.
    #[instrument(skip(reader), err)]
    pub fn load_with(mut reader: R, options: PackageOptions) -> Result<Package<R>> {
        let stream_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(0))?;

        let header = PackageHeader::read_validated(&mut reader)?;

        if header.entry_count > options.max_index_entries {
            return Err(FormatError::TooManyEntries {
                count: header.entry_count as u64,
                limit: options.max_index_entries as u64,
            }
            .into());
        }

        let index_offset = header.index_offset();
        let index_size = header.index_size as u64;
        let index = if index_size == 0 {
            Vec::new()
        } else {
            if index_offset < HEADER_SIZE
                || index_offset
                    .checked_add(index_size)
                    .map_or(true, |end| end > stream_len)
            {
                return Err(FormatError::IndexOutOfBounds {
                    position: index_offset,
                    size: index_size,
                    stream_len,
                }
                .into());
            }

            reader.seek(SeekFrom::Start(index_offset))?;
            let mut index = vec![0u8; index_size as usize];
            reader.read_exact(&mut index).map_err(|e| {
                if e.kind() == io::ErrorKind::UnexpectedEof {
                    FormatError::Truncated {
                        stage: Stage::Index,
                        expected: index_size,
                        actual: stream_len.saturating_sub(index_offset),
                    }
                    .into()
                } else {
                    Error::from(e)
                }
            })?;
            index
        };

        let entries = read_index(&index, header.entry_count)?;

        let mut records = IndexMap::with_capacity(entries.len());
        for entry in entries {
            if entry.marker() == CompressionMarker::Deleted {
                debug!(key = %entry.key, "skipping deleted record");
                continue;
            }

            if entry.chunk_end() > stream_len {
                return Err(FormatError::EntryOutOfBounds {
                    key: entry.key,
                    offset: entry.chunk_offset,
                    size: entry.file_size as u64,
                    stream_len,
                }
                .into());
            }

            if entry.memory_size as usize > options.max_resource_size {
                return Err(Error::from(FormatError::SizeLimitExceeded {
                    declared: entry.memory_size as u64,
                    limit: options.max_resource_size as u64,
                })
                .at(entry.key, Stage::Index));
            }

            let previous = records.insert(
                entry.key,
                Record {
                    entry,
                    slot: Slot::Stored,
                },
            );
            if previous.is_some() {
                warn!(key = %entry.key, "duplicate resource key, keeping the last entry");
            }
        }

        debug!(entries = records.len(), stream_len, "loaded package");

        Ok(Package {
            reader: Mutex::new(reader),
            stream_len,
            header,
            records,
            cache: DashMap::new(),
            pool: BufferPool::new(options.pool_buffers),
            options,
            modified: false,
        })
    }

    /// Get the decompressed bytes of a resource
    ///
    /// The result is cached. If several threads ask for the same key at once, one of them
    /// decodes it and the others wait for and share that result. A failure only affects the
    /// requested resource and is not cached.
    pub fn get_resource(&self, key: &ResourceKey) -> Result<Arc<[u8]>> {
        let record = self
            .records
            .get(key)
            .ok_or(Error::ResourceNotFound(*key))?;

        if let Slot::Added(data) = &record.slot {
            return Ok(data.clone());
        }

        let slot = self.cache.entry(*key).or_default().clone();
        let mut cached = slot.lock();
        if let Some(data) = cached.as_ref() {
            return Ok(data.clone());
        }

        let data: Arc<[u8]> = self.decode(&record.entry)?.into();
        *cached = Some(data.clone());
        Ok(data)
    }

    /// Get the stored bytes of a resource exactly as they appear in the package
    ///
    /// Resources added in memory are returned uncompressed.
    pub fn raw_resource(&self, key: &ResourceKey) -> Result<Vec<u8>> {
        let record = self
            .records
            .get(key)
            .ok_or(Error::ResourceNotFound(*key))?;

        match &record.slot {
            Slot::Added(data) => Ok(data.to_vec()),
            Slot::Stored => {
                let mut buffer = Vec::with_capacity(record.entry.file_size as usize);
                self.read_stored(&record.entry, &mut buffer)
                    .map_err(|e| e.at(*key, Stage::Read))?;
                Ok(buffer)
            }
        }
    }

    #[instrument(skip(self, entry), fields(key = %entry.key), err, level = "debug")]
    fn decode(&self, entry: &IndexEntry) -> Result<Vec<u8>> {
        let mut stored = self.pool.acquire(entry.file_size as usize);
        self.read_stored(entry, &mut stored)
            .map_err(|e| e.at(entry.key, Stage::Read))?;

        match entry.marker() {
            CompressionMarker::Stored => {
                if entry.file_size != entry.memory_size {
                    return Err(Error::from(FormatError::SizeMismatch {
                        expected: entry.memory_size as u64,
                        actual: entry.file_size as u64,
                    })
                    .at(entry.key, Stage::Read));
                }
                Ok(stored.to_vec())
            }
            CompressionMarker::Unknown(marker) => Err(Error::from(
                UnsupportedError::CompressionMarker(marker),
            )
            .at(entry.key, Stage::Decompress)),
            _ => compression::decompress(
                &stored,
                entry.memory_size as usize,
                &self.options.codec(),
            )
            .map_err(|e| e.at(entry.key, Stage::Decompress)),
        }
    }

    pub(crate) fn read_stored(&self, entry: &IndexEntry, buffer: &mut Vec<u8>) -> Result<()> {
        buffer.clear();
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(entry.chunk_offset))?;
        let read = reader
            .by_ref()
            .take(entry.file_size as u64)
            .read_to_end(buffer)?;

        if read != entry.file_size as usize {
            return Err(FormatError::Truncated {
                stage: Stage::Read,
                expected: entry.file_size as u64,
                actual: read as u64,
            }
            .into());
        }
        Ok(())
    }

    pub(crate) fn copy_source<W: io::Write>(&self, start: u64, writer: &mut W) -> Result<u64> {
        if self.stream_len <= start {
            return Ok(0);
        }
        let mut reader = self.reader.lock();
        reader.seek(SeekFrom::Start(start))?;
        let copied = io::copy(&mut reader.by_ref().take(self.stream_len - start), writer)?;
        if copied != self.stream_len - start {
            return Err(FormatError::Truncated {
                stage: Stage::Write,
                expected: self.stream_len - start,
                actual: copied,
            }
            .into());
        }
        Ok(copied)
    }
}
