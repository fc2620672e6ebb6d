//! Name maps give human readable names to resource instances of a package.
//!
//! | Field    | Size        | Description                              |
//! |----------|-------------|------------------------------------------|
//! | Version  | 4           | Fixed value 1                            |
//! | Count    | 4           | Number of entries                        |
//! | Instance | 8           | Per entry: resource instance             |
//! | Length   | 4           | Per entry: name length in bytes          |
//! | Name     | Length      | Per entry: UTF-8 name                    |

use std::any::Any;
use std::io::Write;

use byteorder::{LittleEndian, WriteBytesExt};
use indexmap::IndexMap;
use tracing::trace;

use crate::error::{ResourceError, Result};
use crate::resource::{ChangeTracker, Input, Resource, TypedResource};

/// Resource type of name maps
pub const NAME_MAP_TYPE: u32 = 0x0166038C;

const VERSION: u32 = 1;
const MAX_ENTRIES: u64 = 1_000_000;
const MAX_NAME_LEN: u64 = 65_535;
const MIN_ENTRY_SIZE: u64 = 12;

/// Instance to name mapping, kept in stored order
#[derive(Debug, Clone, Default)]
pub struct NameMap {
    pub(crate) names: IndexMap<u64, String>,
    pub(crate) tracker: ChangeTracker,
}

impl NameMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of names
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether this map holds no names
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Name of an instance
    pub fn get(&self, instance: u64) -> Option<&str> {
        self.names.get(&instance).map(String::as_str)
    }

    /// Iterate over `(instance, name)` pairs in stored order
    pub fn iter(&self) -> impl Iterator<Item = (u64, &str)> {
        self.names.iter().map(|(i, n)| (*i, n.as_str()))
    }

    /// Name an instance, returning the previous name
    pub fn insert(&mut self, instance: u64, name: impl Into<String>) -> Option<String> {
        self.tracker.touch();
        self.names.insert(instance, name.into())
    }

    /// Forget the name of an instance, keeping the order of the others
    pub fn remove(&mut self, instance: u64) -> Option<String> {
        let removed = self.names.shift_remove(&instance)?;
        self.tracker.touch();
        Some(removed)
    }
}

impl PartialEq for NameMap {
    fn eq(&self, other: &Self) -> bool {
        self.names.iter().eq(other.names.iter())
    }
}

impl Eq for NameMap {}

impl TypedResource for NameMap {
    const TYPE_IDS: &'static [u32] = &[NAME_MAP_TYPE];

    fn parse(data: &[u8]) -> Result<Self> {
        let mut input = Input::new(data);

        let version = input.u32()?;
        if version != VERSION {
            return Err(ResourceError::UnsupportedVersion {
                kind: "name map",
                version,
            }
            .into());
        }

        let count = input.u32()?;
        let count = input.count(count as u64, MAX_ENTRIES, MIN_ENTRY_SIZE)?;
        trace!(count, "reading name map");

        let mut names = IndexMap::with_capacity(count);
        for _ in 0..count {
            let instance = input.u64()?;
            let len = input.u32()? as u64;
            if len > MAX_NAME_LEN {
                return Err(ResourceError::TooLong {
                    field: "name",
                    len,
                    limit: MAX_NAME_LEN,
                }
                .into());
            }
            let name = String::from_utf8(input.bytes(len)?.to_vec())?;

            if names.insert(instance, name).is_some() {
                return Err(ResourceError::DuplicateInstance(instance).into());
            }
        }
        input.finish()?;

        Ok(NameMap {
            names,
            tracker: ChangeTracker::default(),
        })
    }
}

impl Resource for NameMap {
    fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(8 + self.names.values().map(|n| 12 + n.len()).sum::<usize>());
        out.write_u32::<LittleEndian>(VERSION)?;
        out.write_u32::<LittleEndian>(self.names.len() as u32)?;
        for (instance, name) in &self.names {
            if name.len() as u64 > MAX_NAME_LEN {
                return Err(ResourceError::TooLong {
                    field: "name",
                    len: name.len() as u64,
                    limit: MAX_NAME_LEN,
                }
                .into());
            }
            out.write_u64::<LittleEndian>(*instance)?;
            out.write_u32::<LittleEndian>(name.len() as u32)?;
            out.write_all(name.as_bytes())?;
        }
        Ok(out)
    }

    fn type_name(&self) -> &'static str {
        "NameMap"
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

    use crate::error::{Error, ResourceError, Result};
    use crate::name_map::NameMap;
    use crate::resource::{Resource, TypedResource};

    #[rustfmt::skip]
    const TWO_NAMES: [u8; 35] = [
        0x01, 0x00, 0x00, 0x00,
        0x02, 0x00, 0x00, 0x00,
        // Second instance first, order must survive
        0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x03, 0x00, 0x00, 0x00,
        0x74, 0x77, 0x6F,
        0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0x00, 0x00,
    ];

    #[test]
    fn parse_keeps_order_and_round_trips() -> Result<()> {
        let map = NameMap::parse(&TWO_NAMES)?;

        assert_eq!(map.iter().collect::<Vec<_>>(), vec![(2, "two"), (1, "")]);
        assert_eq!(map.get(2), Some("two"));
        assert_eq!(map.serialize()?, TWO_NAMES.to_vec());

        Ok(())
    }

    #[test]
    fn edits_are_tracked() -> Result<()> {
        let mut map = NameMap::parse(&TWO_NAMES)?;
        assert!(!map.is_changed());

        map.insert(3, "three");
        assert_eq!(map.remove(2), Some("two".to_string()));
        assert_eq!(map.remove(2), None);
        assert_eq!(map.version(), 2);

        let reparsed = NameMap::parse(&map.serialize()?)?;
        assert_eq!(reparsed.iter().collect::<Vec<_>>(), vec![(1, ""), (3, "three")]);
        assert_eq!(reparsed, map);

        Ok(())
    }

    #[test]
    fn rejects_duplicate_instances() {
        let mut bytes = TWO_NAMES;
        bytes[23] = 0x02;
        assert!(matches!(
            NameMap::parse(&bytes),
            Err(Error::Resource(ResourceError::DuplicateInstance(2)))
        ));
    }

    #[test]
    fn rejects_oversized_names_and_counts() {
        let mut bytes = TWO_NAMES;
        bytes[16..20].copy_from_slice(&65_536u32.to_le_bytes());
        assert!(matches!(
            NameMap::parse(&bytes),
            Err(Error::Resource(ResourceError::TooLong { len: 65_536, .. }))
        ));

        let mut bytes = TWO_NAMES;
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            NameMap::parse(&bytes),
            Err(Error::Resource(ResourceError::TooManyEntries { .. }))
        ));

        let mut bytes = TWO_NAMES;
        bytes[4..8].copy_from_slice(&3u32.to_le_bytes());
        assert!(matches!(
            NameMap::parse(&bytes),
            Err(Error::Resource(ResourceError::Truncated { needed: 36, remaining: 27 }))
        ));
    }

    #[test]
    fn rejects_wrong_version_and_trailing_bytes() {
        let mut bytes = TWO_NAMES;
        bytes[0] = 2;
        assert!(matches!(
            NameMap::parse(&bytes),
            Err(Error::Resource(ResourceError::UnsupportedVersion { version: 2, .. }))
        ));

        let mut bytes = TWO_NAMES.to_vec();
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            NameMap::parse(&bytes),
            Err(Error::Resource(ResourceError::TrailingData(2)))
        ));
    }
}
