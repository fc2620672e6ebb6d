//! # STBL Format Documentation
//!
//! String tables map a 32-bit key hash to a localized UTF-8 string. One table is stored per
//! language, all sharing resource type `0x220557DA`.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "STBL"                                            |
//! | 0x0004         | Version                | 2 bytes: Fixed value 5                                     |
//! | 0x0006         | Compressed             | 1 byte: Preserved as read                                  |
//! | 0x0007         | Entry Count            | 8 bytes: Number of entries                                 |
//! | 0x000F         | Reserved               | 2 bytes                                                    |
//! | 0x0011         | String Length          | 4 bytes: Sum of each string length plus one                |
//!
//! Each entry then holds a 4 byte key hash, a 1 byte flag, a 2 byte length and the string bytes.

use std::any::Any;
use std::io::{Cursor, Write};

use binrw::{BinRead, BinWrite};
use byteorder::{LittleEndian, WriteBytesExt};
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ResourceError, Result};
use crate::resource::{ChangeTracker, Input, Resource, TypedResource};

/// Resource type of string tables
pub const STRING_TABLE_TYPE: u32 = 0x220557DA;

const MAGIC: [u8; 4] = *b"STBL";
const VERSION: u16 = 5;
const MAX_ENTRIES: u64 = 1_000_000;
const MIN_ENTRY_SIZE: u64 = 7;

#[derive(BinRead, BinWrite, Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
struct StblHeader {
    version: u16,
    compressed: u8,
    count: u64,
    reserved: [u8; 2],
    string_length: u32,
}

const HEADER_SIZE: u64 = 17;

/// A single localized string
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StringEntry {
    /// Hash of the string identifier
    pub key: u32,
    /// Per-string flags, preserved as read
    pub flags: u8,
    /// The string
    pub value: String,
}

/// Localized string table
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StringTable {
    compressed: u8,
    reserved: [u8; 2],
    entries: Vec<StringEntry>,
    #[cfg_attr(feature = "serde", serde(skip))]
    tracker: ChangeTracker,
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

impl StringTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            compressed: 0,
            reserved: [0; 2],
            entries: Vec::new(),
            tracker: ChangeTracker::default(),
        }
    }

    /// Number of entries contained in this table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this table contains no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries in stored order
    pub fn entries(&self) -> &[StringEntry] {
        &self.entries
    }

    /// Look up a string by key hash
    pub fn get(&self, key: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.as_str())
    }

    /// Set the string for a key, returning the previous one
    ///
    /// An existing entry keeps its position and flags.
    pub fn insert(&mut self, key: u32, value: impl Into<String>) -> Option<String> {
        self.tracker.touch();
        let value = value.into();
        match self.entries.iter_mut().find(|e| e.key == key) {
            Some(entry) => Some(std::mem::replace(&mut entry.value, value)),
            None => {
                self.entries.push(StringEntry {
                    key,
                    flags: 0,
                    value,
                });
                None
            }
        }
    }

    /// Remove the string for a key
    pub fn remove(&mut self, key: u32) -> Option<String> {
        let position = self.entries.iter().position(|e| e.key == key)?;
        self.tracker.touch();
        Some(self.entries.remove(position).value)
    }
}

impl PartialEq for StringTable {
    fn eq(&self, other: &Self) -> bool {
        self.compressed == other.compressed
            && self.reserved == other.reserved
            && self.entries == other.entries
    }
}

impl Eq for StringTable {}

impl TypedResource for StringTable {
    const TYPE_IDS: &'static [u32] = &[STRING_TABLE_TYPE];

    fn parse(data: &[u8]) -> Result<Self> {
        let mut input = Input::new(data);
        input.ensure(MAGIC.len() as u64 + HEADER_SIZE)?;

        let magic = input.bytes(4)?;
        if magic != MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(magic);
            return Err(ResourceError::InvalidMagic {
                expected: MAGIC,
                found,
            }
            .into());
        }

        let header = StblHeader::read(input.cursor())?;
        if header.version != VERSION {
            return Err(ResourceError::UnsupportedVersion {
                kind: "string table",
                version: header.version as u32,
            }
            .into());
        }

        let count = input.count(header.count, MAX_ENTRIES, MIN_ENTRY_SIZE)?;
        trace!(count, "reading string table");

        let mut entries = Vec::with_capacity(count);
        let mut string_length = 0u64;
        for _ in 0..count {
            let key = input.u32()?;
            let flags = input.u8()?;
            let len = input.u16()?;
            let value = String::from_utf8(input.bytes(len as u64)?.to_vec())?;

            string_length += len as u64 + 1;
            entries.push(StringEntry { key, flags, value });
        }

        if string_length != header.string_length as u64 {
            return Err(ResourceError::LengthMismatch {
                field: "string length",
                declared: header.string_length as u64,
                actual: string_length,
            }
            .into());
        }
        input.finish()?;

        Ok(StringTable {
            compressed: header.compressed,
            reserved: header.reserved,
            entries,
            tracker: ChangeTracker::default(),
        })
    }
}

impl Resource for StringTable {
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut string_length = 0u64;
        for entry in &self.entries {
            if entry.value.len() > u16::MAX as usize {
                return Err(ResourceError::TooLong {
                    field: "string",
                    len: entry.value.len() as u64,
                    limit: u16::MAX as u64,
                }
                .into());
            }
            string_length += entry.value.len() as u64 + 1;
        }

        let header = StblHeader {
            version: VERSION,
            compressed: self.compressed,
            count: self.entries.len() as u64,
            reserved: self.reserved,
            string_length: u32::try_from(string_length).map_err(|_| ResourceError::TooLong {
                field: "string data",
                len: string_length,
                limit: u32::MAX as u64,
            })?,
        };

        let mut out = Cursor::new(Vec::with_capacity(
            (MAGIC.len() as u64 + HEADER_SIZE + string_length + 6 * self.entries.len() as u64) as usize,
        ));
        out.write_all(&MAGIC)?;
        header.write(&mut out)?;
        for entry in &self.entries {
            out.write_u32::<LittleEndian>(entry.key)?;
            out.write_u8(entry.flags)?;
            out.write_u16::<LittleEndian>(entry.value.len() as u16)?;
            out.write_all(entry.value.as_bytes())?;
        }

        Ok(out.into_inner())
    }

    fn type_name(&self) -> &'static str {
        "StringTable"
    }

    fn tracker(&self) -> &ChangeTracker {
        &self.tracker
    }

    fn tracker_mut(&mut self) -> &mut ChangeTracker {
        &mut self.tracker
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;
    use tracing_test::traced_test;

    use crate::error::{Error, ResourceError, Result};
    use crate::resource::{Resource, TypedResource};
    use crate::stbl::StringTable;

    #[rustfmt::skip]
    const TWO_ENTRIES: [u8; 40] = [
        // Header
        0x53, 0x54, 0x42, 0x4C,
        0x05, 0x00,
        0x00,
        0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00,
        0x07, 0x00, 0x00, 0x00,
        // Entries
        0x44, 0x33, 0x22, 0x11, 0x00, 0x05, 0x00, 0x48, 0x65, 0x6C, 0x6C, 0x6F,
        0xDD, 0xCC, 0xBB, 0xAA, 0x01, 0x00, 0x00,
    ];

    #[traced_test]
    #[test]
    fn parse_and_round_trip() -> Result<()> {
        let table = StringTable::parse(&TWO_ENTRIES)?;

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(0x11223344), Some("Hello"));
        assert_eq!(table.get(0xAABBCCDD), Some(""));
        assert_eq!(table.entries()[1].flags, 1);
        assert!(!table.is_changed());
        assert_eq!(table.serialize()?, TWO_ENTRIES.to_vec());

        Ok(())
    }

    #[test]
    fn edits_are_tracked_and_serialized() -> Result<()> {
        let mut table = StringTable::parse(&TWO_ENTRIES)?;

        assert_eq!(table.insert(0x11223344, "Howdy"), Some("Hello".to_string()));
        assert_eq!(table.insert(0x01020304, "New"), None);
        assert_eq!(table.remove(0xAABBCCDD), Some(String::new()));
        assert_eq!(table.remove(0xAABBCCDD), None);
        assert!(table.is_changed());
        assert_eq!(table.version(), 3);

        let reparsed = StringTable::parse(&table.serialize()?)?;
        assert_eq!(reparsed, table);
        assert_eq!(reparsed.get(0x01020304), Some("New"));

        table.mark_saved();
        assert!(!table.is_changed());

        Ok(())
    }

    #[test]
    fn empty_table_round_trip() -> Result<()> {
        let bytes = StringTable::new().serialize()?;
        assert_eq!(bytes.len(), 21);
        assert_eq!(StringTable::parse(&bytes)?.serialize()?, bytes);

        Ok(())
    }

    #[test]
    fn rejects_bad_magic_and_version() {
        let mut bytes = TWO_ENTRIES;
        bytes[0] = b'X';
        assert!(matches!(
            StringTable::parse(&bytes),
            Err(Error::Resource(ResourceError::InvalidMagic { .. }))
        ));

        let mut bytes = TWO_ENTRIES;
        bytes[4] = 4;
        assert!(matches!(
            StringTable::parse(&bytes),
            Err(Error::Resource(ResourceError::UnsupportedVersion { version: 4, .. }))
        ));
    }

    #[test]
    fn rejects_counts_before_allocating() {
        let mut bytes = TWO_ENTRIES;
        bytes[7..15].copy_from_slice(&1_000_001u64.to_le_bytes());
        assert!(matches!(
            StringTable::parse(&bytes),
            Err(Error::Resource(ResourceError::TooManyEntries { count: 1_000_001, .. }))
        ));

        let mut bytes = TWO_ENTRIES;
        bytes[7..15].copy_from_slice(&1_000u64.to_le_bytes());
        assert!(matches!(
            StringTable::parse(&bytes),
            Err(Error::Resource(ResourceError::Truncated { needed: 7000, .. }))
        ));
    }

    #[test]
    fn rejects_inconsistent_string_length() {
        let mut bytes = TWO_ENTRIES;
        bytes[17] = 0x08;
        assert!(matches!(
            StringTable::parse(&bytes),
            Err(Error::Resource(ResourceError::LengthMismatch { declared: 8, actual: 7, .. }))
        ));
    }

    #[test]
    fn rejects_truncated_and_trailing_input() {
        assert!(matches!(
            StringTable::parse(&TWO_ENTRIES[..TWO_ENTRIES.len() - 1]),
            Err(Error::Resource(ResourceError::Truncated { .. }))
        ));

        let mut bytes = TWO_ENTRIES.to_vec();
        bytes.push(0);
        assert!(matches!(
            StringTable::parse(&bytes),
            Err(Error::Resource(ResourceError::TrailingData(1)))
        ));
    }

    #[test]
    fn rejects_invalid_utf8() {
        let mut bytes = TWO_ENTRIES;
        bytes[28] = 0xFF;
        assert!(matches!(StringTable::parse(&bytes), Err(Error::UTF8Error(_))));
    }
}
