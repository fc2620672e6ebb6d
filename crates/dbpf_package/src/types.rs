//! Base types for structure of a DBPF package.

use std::io::{self, Cursor, Read, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::trace;

use crate::error::{FormatError, Result, Stage};
use crate::key::ResourceKey;

/// Size of the fixed package header in bytes
pub const HEADER_SIZE: u64 = 96;

/// The four magic bytes every package starts with
pub const MAGIC: [u8; 4] = *b"DBPF";

/// Bit 31 of the stored size marks an entry carrying the extended compression fields
const EXTENDED_SIZE_FLAG: u32 = 0x8000_0000;

/// Largest file size an index entry can hold, bit 31 being [`EXTENDED_SIZE_FLAG`]
pub const MAX_STORED_SIZE: u32 = !EXTENDED_SIZE_FLAG;

const CONSTANT_TYPE: u32 = 0x1;
const CONSTANT_GROUP: u32 = 0x2;
const CONSTANT_INSTANCE_HI: u32 = 0x4;

/// DBPF package header
///
/// Every package starts with this 96 byte block. Only major version 2 is supported, with
/// minor version 0 or 1. All data is stored in little endian format.
#[derive(BinRead, BinWrite, Debug, Copy, Clone, PartialEq, Eq)]
#[brw(magic = b"DBPF", little)]
pub struct PackageHeader {
    /// Format major version, always 2
    pub major_version: u32,

    /// Format minor version, 0 or 1
    pub minor_version: u32,

    /// Major version set by the tool that wrote the package
    pub user_major_version: u32,

    /// Minor version set by the tool that wrote the package
    pub user_minor_version: u32,

    /// Unused flags, preserved as read
    pub flags: u32,

    /// Creation time in seconds since the unix epoch
    pub created: u32,

    /// Last modification time in seconds since the unix epoch
    pub modified: u32,

    /// Index major version, always 0
    pub index_major_version: u32,

    /// Number of entries stored in the index
    pub entry_count: u32,

    /// 32-bit index position used by older writers when [`PackageHeader::index_position`] is 0
    pub index_position_low: u32,

    /// Size of the index table in bytes
    pub index_size: u32,

    /// Number of entries in the hole index, unused by current packages
    pub hole_count: u32,

    /// Offset of the hole index, unused by current packages
    pub hole_position: u32,

    /// Size of the hole index in bytes, unused by current packages
    pub hole_size: u32,

    /// Index minor version, 3 for current packages
    pub index_minor_version: u32,

    /// Offset of the index table from the start of the file
    pub index_position: u64,

    /// Reserved space, zero in packages written by this library
    pub reserved: [u8; 24],
}

impl Default for PackageHeader {
    fn default() -> Self {
        Self {
            major_version: 2,
            minor_version: 1,
            user_major_version: 0,
            user_minor_version: 0,
            flags: 0,
            created: 0,
            modified: 0,
            index_major_version: 0,
            entry_count: 0,
            index_position_low: 0,
            index_size: 0,
            hole_count: 0,
            hole_position: 0,
            hole_size: 0,
            index_minor_version: 3,
            index_position: 0,
            reserved: [0; 24],
        }
    }
}

impl PackageHeader {
    /// Read and validate a header
    ///
    /// Truncation, wrong magic and unsupported versions are reported as [`FormatError`]s.
    pub fn read_validated<R: Read>(reader: &mut R) -> Result<Self> {
        let mut raw = [0u8; HEADER_SIZE as usize];
        let read = read_up_to(reader, &mut raw)?;
        if read < 4 || raw[..4] != MAGIC {
            let mut found = [0u8; 4];
            found[..read.min(4)].copy_from_slice(&raw[..read.min(4)]);
            return Err(FormatError::InvalidMagic { found }.into());
        }
        if read < raw.len() {
            return Err(FormatError::Truncated {
                stage: Stage::Header,
                expected: HEADER_SIZE,
                actual: read as u64,
            }
            .into());
        }

        let header = PackageHeader::read(&mut Cursor::new(&raw[..]))?;
        if header.major_version != 2 || header.minor_version > 1 {
            return Err(FormatError::InvalidVersion {
                major: header.major_version,
                minor: header.minor_version,
            }
            .into());
        }

        Ok(header)
    }

    /// Effective offset of the index table
    pub fn index_offset(&self) -> u64 {
        if self.index_position != 0 {
            self.index_position
        } else {
            self.index_position_low as u64
        }
    }
}

/// Compression marker stored in an index entry
///
/// The marker only says *whether* a resource is compressed; the algorithm is picked from the
/// payload signature when decoding, see [`crate::compression::detect`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CompressionMarker {
    /// Stored as is
    Stored,
    /// Compressed with zlib (`0x5A42`)
    Zlib,
    /// Legacy streamable compression, RefPack in practice (`0xFFFF`)
    Streamable,
    /// Legacy internal compression, RefPack in practice (`0xFFFE`)
    Internal,
    /// Record marked as deleted (`0xFFE0`)
    Deleted,
    /// Anything else
    Unknown(u16),
}

impl CompressionMarker {
    /// Whether the stored bytes must be decompressed
    pub fn is_compressed(self) -> bool {
        !matches!(self, CompressionMarker::Stored)
    }
}

impl From<u16> for CompressionMarker {
    fn from(value: u16) -> Self {
        match value {
            0x0000 => CompressionMarker::Stored,
            0x5A42 => CompressionMarker::Zlib,
            0xFFFF => CompressionMarker::Streamable,
            0xFFFE => CompressionMarker::Internal,
            0xFFE0 => CompressionMarker::Deleted,
            other => CompressionMarker::Unknown(other),
        }
    }
}

impl From<CompressionMarker> for u16 {
    fn from(value: CompressionMarker) -> Self {
        match value {
            CompressionMarker::Stored => 0x0000,
            CompressionMarker::Zlib => 0x5A42,
            CompressionMarker::Streamable => 0xFFFF,
            CompressionMarker::Internal => 0xFFFE,
            CompressionMarker::Deleted => 0xFFE0,
            CompressionMarker::Unknown(other) => other,
        }
    }
}

/// A single record of the index table
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Identity of the resource
    pub key: ResourceKey,

    /// Offset of the stored bytes from the start of the file
    pub chunk_offset: u64,

    /// Number of stored (possibly compressed) bytes
    pub file_size: u32,

    /// Number of bytes after decompression
    pub memory_size: u32,

    /// Raw compression marker, see [`CompressionMarker`]
    pub compression: u16,

    /// Committed flag, 1 in every package seen so far
    pub committed: u16,
}

impl IndexEntry {
    /// Decoded compression marker
    pub fn marker(&self) -> CompressionMarker {
        self.compression.into()
    }

    /// Whether the stored bytes are compressed
    pub fn is_compressed(&self) -> bool {
        self.marker().is_compressed()
    }

    /// End of the stored byte range
    pub fn chunk_end(&self) -> u64 {
        self.chunk_offset + self.file_size as u64
    }
}

/// How the index table is laid out when writing
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum IndexLayout {
    /// Every entry carries its full key
    #[default]
    Full,

    /// Type, group and instance-high are written once when every entry shares them
    Packed,
}

/// Convert a resource length to an index size field no larger than `limit`
pub(crate) fn entry_size(len: usize, limit: u64) -> Result<u32> {
    u32::try_from(len)
        .ok()
        .filter(|&size| u64::from(size) <= limit)
        .ok_or_else(|| {
            FormatError::SizeLimitExceeded {
                declared: len as u64,
                limit,
            }
            .into()
        })
}

fn eof_as_truncated(err: io::Error, expected: u64, actual: u64) -> crate::error::Error {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        FormatError::Truncated {
            stage: Stage::Index,
            expected,
            actual,
        }
        .into()
    } else {
        err.into()
    }
}

/// Parse the index table
///
/// `data` is the whole index block as declared by the header. The entry count is checked
/// against the smallest possible entry size before anything is allocated.
pub fn read_index(data: &[u8], count: u32) -> Result<Vec<IndexEntry>> {
    let total = data.len() as u64;
    let mut cursor = Cursor::new(data);
    let read_u32 = |c: &mut Cursor<&[u8]>| {
        c.read_u32::<LittleEndian>()
            .map_err(|e| eof_as_truncated(e, c.position() + 4, total))
    };

    if count == 0 && data.is_empty() {
        return Ok(Vec::new());
    }

    let index_type = read_u32(&mut cursor)?;
    let constant_type = if index_type & CONSTANT_TYPE != 0 {
        Some(read_u32(&mut cursor)?)
    } else {
        None
    };
    let constant_group = if index_type & CONSTANT_GROUP != 0 {
        Some(read_u32(&mut cursor)?)
    } else {
        None
    };
    let constant_instance_hi = if index_type & CONSTANT_INSTANCE_HI != 0 {
        Some(read_u32(&mut cursor)?)
    } else {
        None
    };

    let per_entry = 12
        + 4 * [
            constant_type.is_none(),
            constant_group.is_none(),
            constant_instance_hi.is_none(),
        ]
        .iter()
        .filter(|v| **v)
        .count() as u64;
    let remaining = total - cursor.position();
    if count as u64 * per_entry > remaining {
        return Err(FormatError::TooManyEntries {
            count: count as u64,
            limit: remaining / per_entry,
        }
        .into());
    }

    trace!(index_type, count, "reading index");

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let resource_type = match constant_type {
            Some(t) => t,
            None => read_u32(&mut cursor)?,
        };
        let resource_group = match constant_group {
            Some(g) => g,
            None => read_u32(&mut cursor)?,
        };
        let instance_hi = match constant_instance_hi {
            Some(i) => i,
            None => read_u32(&mut cursor)?,
        };
        let instance_lo = read_u32(&mut cursor)?;
        let position = read_u32(&mut cursor)?;
        let size = read_u32(&mut cursor)?;

        let file_size = size & !EXTENDED_SIZE_FLAG;
        let (memory_size, compression, committed) = if size & EXTENDED_SIZE_FLAG != 0 {
            let memory_size = read_u32(&mut cursor)?;
            let compression = cursor
                .read_u16::<LittleEndian>()
                .map_err(|e| eof_as_truncated(e, cursor.position() + 2, total))?;
            let committed = cursor
                .read_u16::<LittleEndian>()
                .map_err(|e| eof_as_truncated(e, cursor.position() + 2, total))?;
            (memory_size, compression, committed)
        } else {
            (file_size, 0, 1)
        };

        entries.push(IndexEntry {
            key: ResourceKey::new(
                resource_type,
                resource_group,
                ((instance_hi as u64) << 32) | instance_lo as u64,
            ),
            chunk_offset: position as u64,
            file_size,
            memory_size,
            compression,
            committed,
        });
    }

    Ok(entries)
}

/// Write the index table, returning the number of bytes written
pub fn write_index<W: Write>(
    writer: &mut W,
    entries: &[IndexEntry],
    layout: IndexLayout,
) -> Result<u32> {
    let shared = |f: fn(&IndexEntry) -> u32| -> Option<u32> {
        let first = f(entries.first()?);
        entries.iter().all(|e| f(e) == first).then_some(first)
    };

    let (constant_type, constant_group, constant_instance_hi) = match layout {
        IndexLayout::Full => (None, None, None),
        IndexLayout::Packed => (
            shared(|e| e.key.resource_type),
            shared(|e| e.key.resource_group),
            shared(|e| e.key.instance_hi()),
        ),
    };

    let mut index_type: u32 = 0;
    let mut block = Vec::new();
    block.write_u32::<LittleEndian>(0)?;
    if let Some(t) = constant_type {
        index_type |= CONSTANT_TYPE;
        block.write_u32::<LittleEndian>(t)?;
    }
    if let Some(g) = constant_group {
        index_type |= CONSTANT_GROUP;
        block.write_u32::<LittleEndian>(g)?;
    }
    if let Some(i) = constant_instance_hi {
        index_type |= CONSTANT_INSTANCE_HI;
        block.write_u32::<LittleEndian>(i)?;
    }
    block[..4].copy_from_slice(&index_type.to_le_bytes());

    for entry in entries {
        if constant_type.is_none() {
            block.write_u32::<LittleEndian>(entry.key.resource_type)?;
        }
        if constant_group.is_none() {
            block.write_u32::<LittleEndian>(entry.key.resource_group)?;
        }
        if constant_instance_hi.is_none() {
            block.write_u32::<LittleEndian>(entry.key.instance_hi())?;
        }
        block.write_u32::<LittleEndian>(entry.key.instance_lo())?;
        block.write_u32::<LittleEndian>(crate::write::to_position(entry.chunk_offset)?)?;
        block.write_u32::<LittleEndian>(entry.file_size | EXTENDED_SIZE_FLAG)?;
        block.write_u32::<LittleEndian>(entry.memory_size)?;
        block.write_u16::<LittleEndian>(entry.compression)?;
        block.write_u16::<LittleEndian>(entry.committed)?;
    }

    writer.write_all(&block)?;
    Ok(block.len() as u32)
}

fn read_up_to<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
