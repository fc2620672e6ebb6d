//! Types for writing DBPF packages
//!

use binrw::BinWrite;
use bon::Builder;
use indexmap::IndexMap;
use std::fmt::Debug;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::sync::Arc;
use tracing::{debug, instrument, Level};

use crate::compression::{self, CompressionMethod};
use crate::error::{Error, FormatError, Result, Stage, UnsupportedError};
use crate::key::ResourceKey;
use crate::read::{Package, Slot};
use crate::types::{
    entry_size, write_index, CompressionMarker, IndexEntry, IndexLayout, PackageHeader,
    HEADER_SIZE, MAX_STORED_SIZE,
};

/// Convert a stream offset to the 32-bit form stored in the index
pub(crate) fn to_position(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| UnsupportedError::OffsetOverflow(offset).into())
}

fn now_timestamp() -> u32 {
    chrono::Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

/// Options for how a package should be written
#[derive(Debug, Clone, Copy, Builder)]
pub struct SaveOptions {
    /// Compression used for resources that are not already stored in the package
    #[builder(default)]
    pub compression: CompressionMethod,

    /// How the index table is laid out
    #[builder(default)]
    pub index_layout: IndexLayout,

    /// Modification time written to the header, the current time when unset
    pub timestamp: Option<u32>,

    /// User major and minor version written to the header, kept from the source package
    /// when unset
    pub user_version: Option<(u32, u32)>,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Space usage before and after compacting a package
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactionStats {
    /// Resources written
    pub live_entries: usize,
    /// Length of the source stream
    pub bytes_before: u64,
    /// Length of the compacted output
    pub bytes_after: u64,
}

impl CompactionStats {
    /// Bytes saved by compacting, 0 if the output grew
    pub fn reclaimed(&self) -> u64 {
        self.bytes_before.saturating_sub(self.bytes_after)
    }
}

/// DBPF package generator
///
/// ```
/// # fn doit() -> dbpf_package::error::Result<()>
/// # {
/// use dbpf_package::{PackageWriter, ResourceKey, SaveOptions};
/// use std::io::Write;
///
/// // We use a buffer here, though you'd normally use a `File`
/// let mut package = PackageWriter::new(std::io::Cursor::new(Vec::new()), SaveOptions::default())?;
///
/// package.start_resource(ResourceKey::new(0x03B33DDF, 0, 1))?;
/// package.write_all(b"Hello, World!")?;
///
/// // Write the index and header.
/// package.finish()?;
///
/// # Ok(())
/// # }
/// # doit().unwrap();
/// ```
pub struct PackageWriter<W: Write + Seek> {
    inner: W,
    position: u64,
    header: PackageHeader,
    options: SaveOptions,
    entries: Vec<IndexEntry>,
    current: Option<(ResourceKey, Vec<u8>)>,
}

impl<W: Write + Seek> Debug for PackageWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageWriter")
            .field("position", &self.position)
            .field("entries", &self.entries.len())
            .field("options", &self.options)
            .finish()
    }
}

impl<W: Write + Seek> PackageWriter<W> {
    /// Initializes the package.
    ///
    /// Space for the header is reserved straight away; the header itself is written by
    /// [`PackageWriter::finish`] once the index position is known. Before writing to this
    /// object, the [`PackageWriter::start_resource`] function should be called.
    pub fn new(inner: W, options: SaveOptions) -> Result<PackageWriter<W>> {
        Self::with_header(inner, PackageHeader::default(), options)
    }

    /// Initializes the package, carrying the format minor version, user versions, flags and
    /// creation time over from `template`.
    pub fn with_header(
        mut inner: W,
        template: PackageHeader,
        options: SaveOptions,
    ) -> Result<PackageWriter<W>> {
        inner.write_all(&[0u8; HEADER_SIZE as usize])?;

        Ok(PackageWriter {
            inner,
            position: HEADER_SIZE,
            header: template,
            options,
            entries: Vec::new(),
            current: None,
        })
    }

    /// Returns true if a resource is currently open for writing.
    pub const fn is_writing_resource(&self) -> bool {
        self.current.is_some()
    }

    /// Number of bytes written so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Start a new resource, finishing the previous one first
    #[instrument(skip_all, fields(key = %key), err)]
    pub fn start_resource(&mut self, key: ResourceKey) -> Result<()> {
        if self.current.is_some() {
            self.finish_resource()?;
        }

        self.current = Some((key, Vec::new()));
        Ok(())
    }

    /// Write a whole resource in one go
    pub fn add_resource(&mut self, key: ResourceKey, data: &[u8]) -> Result<IndexEntry> {
        self.start_resource(key)?;
        self.write_all(data)?;
        self.finish_resource()
    }

    /// Compress (per [`SaveOptions::compression`]) and write the open resource
    #[instrument(skip(self), err)]
    pub fn finish_resource(&mut self) -> Result<IndexEntry> {
        let (key, data) = self.current.take().ok_or_else(|| {
            Error::from(io::Error::new(
                io::ErrorKind::Other,
                "No resource has been started",
            ))
        })?;

        let compressed = match self.options.compression {
            CompressionMethod::None => None,
            CompressionMethod::Zlib => compression::compress_if_smaller(&data)
                .map_err(|e| e.at(key, Stage::Compress))?,
        };

        let memory_size = entry_size(data.len(), u64::from(u32::MAX))
            .map_err(|e| e.at(key, Stage::Write))?;
        let (stored, marker) = match compressed {
            Some(compressed) => (compressed, CompressionMarker::Zlib),
            None => (data, CompressionMarker::Stored),
        };
        let file_size = entry_size(stored.len(), u64::from(MAX_STORED_SIZE))
            .map_err(|e| e.at(key, Stage::Write))?;

        let entry = IndexEntry {
            key,
            chunk_offset: 0,
            file_size,
            memory_size,
            compression: marker.into(),
            committed: 1,
        };
        self.write_stored(entry, &stored)
    }

    /// Write bytes that are already in their stored form, keeping the entry's compression
    /// fields and assigning it a new offset
    pub fn write_stored(&mut self, mut entry: IndexEntry, stored: &[u8]) -> Result<IndexEntry> {
        if stored.len() != entry.file_size as usize {
            return Err(Error::from(FormatError::SizeMismatch {
                expected: entry.file_size as u64,
                actual: stored.len() as u64,
            })
            .at(entry.key, Stage::Write));
        }

        to_position(self.position).map_err(|e| e.at(entry.key, Stage::Write))?;
        entry.chunk_offset = self.position;
        self.inner.write_all(stored)?;
        self.position += stored.len() as u64;
        self.entries.push(entry);
        Ok(entry)
    }

    /// Record an entry whose bytes were already copied into the output
    pub(crate) fn push_entry(&mut self, entry: IndexEntry) {
        self.entries.push(entry);
    }

    /// Append raw bytes produced by `f`, which returns how many it wrote
    pub(crate) fn append_with(&mut self, f: impl FnOnce(&mut W) -> Result<u64>) -> Result<u64> {
        let written = f(&mut self.inner)?;
        self.position += written;
        Ok(written)
    }

    /// Finish the last resource, then write the index and the header
    ///
    /// This will return the writer positioned at the end of the package.
    #[instrument(skip(self), err)]
    pub fn finish(mut self) -> Result<W> {
        if self.current.is_some() {
            self.finish_resource()?;
        }

        let entry_count = u32::try_from(self.entries.len()).map_err(|_| FormatError::TooManyEntries {
            count: self.entries.len() as u64,
            limit: u32::MAX as u64,
        })?;

        let index_position = self.position;
        let index_size = write_index(&mut self.inner, &self.entries, self.options.index_layout)?;
        let end = index_position + index_size as u64;

        let timestamp = self.options.timestamp.unwrap_or_else(now_timestamp);
        let template = mem::take(&mut self.header);
        let (user_major_version, user_minor_version) = self.options.user_version.unwrap_or((
            template.user_major_version,
            template.user_minor_version,
        ));
        let header = PackageHeader {
            minor_version: template.minor_version,
            user_major_version,
            user_minor_version,
            flags: template.flags,
            created: if template.created == 0 {
                timestamp
            } else {
                template.created
            },
            modified: timestamp,
            entry_count,
            index_size,
            index_position,
            ..Default::default()
        };

        self.inner.seek(SeekFrom::Start(0))?;
        header.write(&mut self.inner)?;
        self.inner.seek(SeekFrom::Start(end))?;
        self.inner.flush()?;

        debug!(entries = entry_count, bytes = end, "wrote package");
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for PackageWriter<W> {
    #[instrument(skip_all, err, ret(level = Level::TRACE), fields(size = buf.len()))]
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.current.as_mut() {
            Some((_, data)) => data.write(buf),
            None => Err(io::Error::new(
                io::ErrorKind::Other,
                "No resource has been started",
            )),
        }
    }

    #[instrument(skip(self), err)]
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Resources written in place of, or in addition to, a package's own without editing it
pub type Pending = IndexMap<ResourceKey, Arc<[u8]>>;

impl<R: Read + Seek> Package<R> {
    /// Reject pending data this package could not load back
    fn check_pending(&self, pending: &Pending) -> Result<()> {
        let limit = self.resource_size_limit();
        for (key, data) in pending {
            entry_size(data.len(), limit).map_err(|e| e.at(*key, Stage::Write))?;
        }
        Ok(())
    }

    /// Write the package, appending new resources after the existing data
    ///
    /// Stored resources keep their offsets and bytes; space held by removed or replaced
    /// resources is not reclaimed, see [`Package::compact_to`].
    pub fn save_to<W: Write + Seek>(&self, writer: W, options: &SaveOptions) -> Result<W> {
        self.save_to_with(writer, options, &Pending::new(), || Ok(()))
    }

    /// Like [`Package::save_to`], also writing `pending` and calling `check` before each step
    /// so the caller can abort
    ///
    /// The package itself is never modified, so an aborted save leaves it as it was.
    #[instrument(skip_all, fields(pending = pending.len()), err)]
    pub fn save_to_with<W: Write + Seek>(
        &self,
        writer: W,
        options: &SaveOptions,
        pending: &Pending,
        mut check: impl FnMut() -> Result<()>,
    ) -> Result<W> {
        self.check_pending(pending)?;
        let mut out = PackageWriter::with_header(writer, *self.header(), *options)?;

        check()?;
        out.append_with(|inner| self.copy_source(HEADER_SIZE, inner))?;

        for (key, record) in &self.records {
            match (pending.get(key), &record.slot) {
                (Some(data), _) | (None, Slot::Added(data)) => {
                    check()?;
                    out.add_resource(*key, data)?;
                }
                (None, Slot::Stored) => out.push_entry(record.entry),
            }
        }

        for (key, data) in pending.iter().filter(|(k, _)| !self.records.contains_key(*k)) {
            check()?;
            out.add_resource(*key, data)?;
        }

        check()?;
        out.finish()
    }

    /// Write a fresh copy of the package containing only live resources
    pub fn compact_to<W: Write + Seek>(
        &self,
        writer: W,
        options: &SaveOptions,
    ) -> Result<(W, CompactionStats)> {
        self.compact_to_with(writer, options, &Pending::new(), || Ok(()))
    }

    /// Like [`Package::compact_to`], also writing `pending` and calling `check` before each
    /// resource so the caller can abort
    #[instrument(skip_all, fields(pending = pending.len()), err)]
    pub fn compact_to_with<W: Write + Seek>(
        &self,
        writer: W,
        options: &SaveOptions,
        pending: &Pending,
        mut check: impl FnMut() -> Result<()>,
    ) -> Result<(W, CompactionStats)> {
        self.check_pending(pending)?;
        let mut out = PackageWriter::with_header(writer, *self.header(), *options)?;
        let mut stored = Vec::new();
        let mut live_entries = 0;

        for (key, record) in &self.records {
            check()?;
            match (pending.get(key), &record.slot) {
                (Some(data), _) | (None, Slot::Added(data)) => {
                    out.add_resource(*key, data)?;
                }
                (None, Slot::Stored) => {
                    self.read_stored(&record.entry, &mut stored)
                        .map_err(|e| e.at(*key, Stage::Read))?;
                    out.write_stored(record.entry, &stored)?;
                }
            }
            live_entries += 1;
        }

        for (key, data) in pending.iter().filter(|(k, _)| !self.records.contains_key(*k)) {
            check()?;
            out.add_resource(*key, data)?;
            live_entries += 1;
        }

        check()?;
        let mut inner = out.finish()?;
        let stats = CompactionStats {
            live_entries,
            bytes_before: self.stream_len(),
            bytes_after: inner.stream_position()?,
        };

        debug!(reclaimed = stats.reclaimed(), "compacted package");
        Ok((inner, stats))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_str_eq;
    use tracing_test::traced_test;

    use crate::compression::CompressionMethod;
    use crate::error::{Error, FormatError, Result, Stage, UnsupportedError};
    use crate::key::ResourceKey;
    use crate::read::{Package, PackageOptions};
    use crate::types::{CompressionMarker, PackageHeader};
    use crate::write::{to_position, PackageWriter, Pending, SaveOptions};
    use std::io::{Cursor, Write};

    fn options(compression: CompressionMethod) -> SaveOptions {
        SaveOptions::builder()
            .compression(compression)
            .timestamp(0)
            .build()
    }

    #[traced_test]
    #[test]
    fn empty_write() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            // Header
            0x44, 0x42, 0x50, 0x46,
            0x02, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x04, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
            0x60, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Index
            0x00, 0x00, 0x00, 0x00,
        ];

        let writer = PackageWriter::new(Cursor::new(Vec::new()), options(CompressionMethod::None))?;
        let result = writer.finish()?;
        assert_eq!(result.get_ref().len(), expected.len());
        assert_str_eq!(
            format!("{:02X?}", *result.get_ref()),
            format!("{:02X?}", expected)
        );

        Ok(())
    }

    #[traced_test]
    #[test]
    fn uncompressed_with_data_write() -> Result<()> {
        #[rustfmt::skip]
        let expected = vec![
            // Header
            0x44, 0x42, 0x50, 0x46,
            0x02, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x24, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
            0x6A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            // Data
            0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA, 0xAA,
            // Index
            0x00, 0x00, 0x00, 0x00,
            0x01, 0x00, 0x00, 0x00,
            0x02, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x03, 0x00, 0x00, 0x00,
            0x60, 0x00, 0x00, 0x00,
            0x0A, 0x00, 0x00, 0x80,
            0x0A, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x01, 0x00,
        ];

        let mut writer = PackageWriter::new(Cursor::new(Vec::new()), options(CompressionMethod::None))?;
        writer.start_resource(ResourceKey::new(1, 2, 3))?;
        writer.write_all(&[0xAA; 10])?;

        let result = writer.finish()?;
        assert_eq!(result.get_ref().len(), expected.len());
        assert_str_eq!(
            format!("{:02X?}", *result.get_ref()),
            format!("{:02X?}", expected)
        );

        Ok(())
    }

    #[test]
    fn zlib_is_only_kept_when_smaller() -> Result<()> {
        let mut writer = PackageWriter::new(Cursor::new(Vec::new()), options(CompressionMethod::Zlib))?;
        let zeros = writer.add_resource(ResourceKey::new(1, 1, 1), &[0u8; 1000])?;
        let tiny = writer.add_resource(ResourceKey::new(1, 1, 2), b"ab")?;
        let bytes = writer.finish()?.into_inner();

        assert_eq!(zeros.marker(), CompressionMarker::Zlib);
        assert!(zeros.file_size < 1000);
        assert_eq!(zeros.memory_size, 1000);
        assert_eq!(tiny.marker(), CompressionMarker::Stored);
        assert_eq!(tiny.file_size, 2);

        let package = Package::load(Cursor::new(bytes))?;
        assert_eq!(&*package.get_resource(&ResourceKey::new(1, 1, 1))?, &[0u8; 1000][..]);
        assert_eq!(&*package.get_resource(&ResourceKey::new(1, 1, 2))?, b"ab");

        Ok(())
    }

    #[test]
    fn write_without_resource_fails() -> Result<()> {
        let mut writer = PackageWriter::new(Cursor::new(Vec::new()), SaveOptions::default())?;
        assert!(writer.write(b"orphan").is_err());
        assert!(!writer.is_writing_resource());

        Ok(())
    }

    #[test]
    fn offsets_must_fit_in_32_bits() {
        assert_eq!(to_position(0xFFFF_FFFF).ok(), Some(0xFFFF_FFFF));
        assert!(matches!(
            to_position(0x1_0000_0000),
            Err(Error::Unsupported(UnsupportedError::OffsetOverflow(0x1_0000_0000)))
        ));
    }

    #[test]
    fn save_keeps_stored_offsets_and_appends_new_resources() -> Result<()> {
        let kept = ResourceKey::new(1, 1, 1);
        let added = ResourceKey::new(2, 2, 2);

        let mut writer = PackageWriter::new(Cursor::new(Vec::new()), options(CompressionMethod::None))?;
        writer.add_resource(kept, b"kept")?;
        let original = writer.finish()?.into_inner();

        let mut package = Package::load(Cursor::new(original.clone()))?;
        let kept_offset = package.entry(&kept).map(|e| e.chunk_offset);
        package.add_resource(added, b"added".to_vec())?;

        let saved = package
            .save_to(Cursor::new(Vec::new()), &options(CompressionMethod::None))?
            .into_inner();
        assert!(saved.len() > original.len());
        assert_eq!(&saved[96..original.len()], &original[96..]);

        let reloaded = Package::load(Cursor::new(saved))?;
        assert_eq!(reloaded.entry(&kept).map(|e| e.chunk_offset), kept_offset);
        assert_eq!(&*reloaded.get_resource(&kept)?, b"kept");
        assert_eq!(&*reloaded.get_resource(&added)?, b"added");
        assert_eq!(reloaded.enumerate().collect::<Vec<_>>(), vec![kept, added]);

        Ok(())
    }

    #[test]
    fn compact_reclaims_removed_resources() -> Result<()> {
        let mut writer = PackageWriter::new(Cursor::new(Vec::new()), options(CompressionMethod::None))?;
        for instance in 0..4 {
            writer.add_resource(ResourceKey::new(1, 1, instance), &[instance as u8; 256])?;
        }
        let original = writer.finish()?.into_inner();

        let mut package = Package::load(Cursor::new(original))?;
        package.remove_resource(&ResourceKey::new(1, 1, 0));
        package.remove_resource(&ResourceKey::new(1, 1, 2));

        let (compacted, stats) =
            package.compact_to(Cursor::new(Vec::new()), &options(CompressionMethod::None))?;
        assert_eq!(stats.live_entries, 2);
        assert!(stats.reclaimed() >= 512);
        assert_eq!(stats.bytes_after, compacted.get_ref().len() as u64);

        let reloaded = Package::load(Cursor::new(compacted.into_inner()))?;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(&*reloaded.get_resource(&ResourceKey::new(1, 1, 3))?, &[3u8; 256][..]);

        Ok(())
    }

    #[test]
    fn check_aborts_saving() -> Result<()> {
        let mut package = Package::new();
        package.add_resource(ResourceKey::new(1, 2, 3), vec![1u8, 2, 3])?;

        let mut calls = 0;
        let check = || {
            calls += 1;
            if calls > 1 {
                Err(Error::Cancelled)
            } else {
                Ok(())
            }
        };
        let result = package.save_to_with(
            Cursor::new(Vec::new()),
            &SaveOptions::default(),
            &Pending::new(),
            check,
        );

        assert!(matches!(result, Err(Error::Cancelled)));

        Ok(())
    }

    #[test]
    fn pending_resources_leave_the_package_untouched() -> Result<()> {
        let kept = ResourceKey::new(1, 1, 1);
        let replaced = ResourceKey::new(1, 1, 2);
        let added = ResourceKey::new(1, 1, 3);

        let mut writer = PackageWriter::new(Cursor::new(Vec::new()), options(CompressionMethod::None))?;
        writer.add_resource(kept, b"kept")?;
        writer.add_resource(replaced, b"old")?;
        let package = Package::load(Cursor::new(writer.finish()?.into_inner()))?;

        let mut pending = Pending::new();
        pending.insert(replaced, b"new".to_vec().into());
        pending.insert(added, b"added".to_vec().into());

        let saved = package
            .save_to_with(
                Cursor::new(Vec::new()),
                &options(CompressionMethod::None),
                &pending,
                || Ok(()),
            )?
            .into_inner();
        let (compacted, stats) = package.compact_to_with(
            Cursor::new(Vec::new()),
            &options(CompressionMethod::None),
            &pending,
            || Ok(()),
        )?;
        assert_eq!(stats.live_entries, 3);

        for bytes in [saved, compacted.into_inner()] {
            let reloaded = Package::load(Cursor::new(bytes))?;
            assert_eq!(reloaded.enumerate().collect::<Vec<_>>(), vec![kept, replaced, added]);
            assert_eq!(&*reloaded.get_resource(&replaced)?, b"new");
            assert_eq!(&*reloaded.get_resource(&added)?, b"added");
        }

        assert_eq!(package.len(), 2);
        assert_eq!(&*package.get_resource(&replaced)?, b"old");

        Ok(())
    }

    #[test]
    fn save_keeps_the_format_minor_version() -> Result<()> {
        let key = ResourceKey::new(1, 1, 1);
        let header = PackageHeader {
            minor_version: 0,
            user_major_version: 7,
            ..Default::default()
        };
        let mut writer =
            PackageWriter::with_header(Cursor::new(Vec::new()), header, options(CompressionMethod::None))?;
        writer.add_resource(key, b"sims 3")?;

        let mut package = Package::load(Cursor::new(writer.finish()?.into_inner()))?;
        assert_eq!(package.header().minor_version, 0);
        package.add_resource(ResourceKey::new(1, 1, 2), b"added".to_vec())?;

        let saved = package.save_to(Cursor::new(Vec::new()), &options(CompressionMethod::None))?;
        let reloaded = Package::load(Cursor::new(saved.into_inner()))?;
        assert_eq!(reloaded.header().major_version, 2);
        assert_eq!(reloaded.header().minor_version, 0);
        assert_eq!(reloaded.header().user_major_version, 7);

        let (compacted, _) =
            reloaded.compact_to(Cursor::new(Vec::new()), &options(CompressionMethod::None))?;
        let compacted = Package::load(Cursor::new(compacted.into_inner()))?;
        assert_eq!(compacted.header().minor_version, 0);

        Ok(())
    }

    #[test]
    fn user_version_option_overrides_the_header() -> Result<()> {
        let versioned = SaveOptions::builder()
            .timestamp(0)
            .user_version((3, 14))
            .build();
        let bytes = PackageWriter::new(Cursor::new(Vec::new()), versioned)?
            .finish()?
            .into_inner();

        let package = Package::load(Cursor::new(bytes))?;
        assert_eq!(package.header().user_major_version, 3);
        assert_eq!(package.header().user_minor_version, 14);

        let kept = package.save_to(Cursor::new(Vec::new()), &options(CompressionMethod::None))?;
        let kept = Package::load(Cursor::new(kept.into_inner()))?;
        assert_eq!(kept.header().user_major_version, 3);
        assert_eq!(kept.header().user_minor_version, 14);

        Ok(())
    }

    #[test]
    fn oversized_pending_resources_are_rejected() -> Result<()> {
        let options = PackageOptions::builder().max_resource_size(16).build();
        let package = Package::empty_with(options);
        let key = ResourceKey::new(1, 2, 3);

        let mut pending = Pending::new();
        pending.insert(key, vec![0u8; 32].into());

        let saved = package.save_to_with(
            Cursor::new(Vec::new()),
            &SaveOptions::default(),
            &pending,
            || Ok(()),
        );
        assert!(matches!(
            saved,
            Err(Error::Resource { key: k, stage: Stage::Write, source })
                if k == key && matches!(*source, Error::Format(FormatError::SizeLimitExceeded { .. }))
        ));

        let compacted = package.compact_to_with(
            Cursor::new(Vec::new()),
            &SaveOptions::default(),
            &pending,
            || Ok(()),
        );
        assert!(compacted.is_err());

        Ok(())
    }
}
