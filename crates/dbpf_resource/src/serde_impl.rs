use std::fmt;

use indexmap::IndexMap;
use serde::{
    de::{MapAccess, Visitor},
    ser::SerializeMap,
    Deserialize, Serialize,
};

use crate::name_map::NameMap;
use crate::resource::ChangeTracker;

impl Serialize for NameMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (instance, name) in self.iter() {
            map.serialize_entry(&format!("{instance:016X}"), name)?;
        }
        map.end()
    }
}

struct NameMapVisitor;

impl<'de> Visitor<'de> for NameMapVisitor {
    type Value = IndexMap<u64, String>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a map of hexadecimal instances to names")
    }

    fn visit_map<M>(self, mut access: M) -> Result<Self::Value, M::Error>
    where
        M: MapAccess<'de>,
    {
        let mut map = IndexMap::with_capacity(access.size_hint().unwrap_or(0));

        while let Some(key) = access.next_key::<String>()? {
            let instance = u64::from_str_radix(key.trim_start_matches("0x"), 16)
                .map_err(|_| serde::de::Error::custom(format!("invalid instance {key:?}")))?;
            let name = access.next_value::<String>()?;

            if map.insert(instance, name).is_some() {
                return Err(serde::de::Error::custom(format!(
                    "instance {instance:016X} appears more than once"
                )));
            }
        }

        Ok(map)
    }
}

impl<'de> Deserialize<'de> for NameMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(NameMap {
            names: deserializer.deserialize_map(NameMapVisitor)?,
            tracker: ChangeTracker::default(),
        })
    }
}
