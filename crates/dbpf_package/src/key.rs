//! Resource identity within a package.

use std::{fmt, str::FromStr};

use crate::error::FormatError;

/// Type / Group / Instance triple identifying a resource inside a package
///
/// Ordering and hashing follow the field order, so keys sort by type first,
/// then group, then instance.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    /// Resource type identifier, used to pick a resource factory
    pub resource_type: u32,

    /// Group identifier
    pub resource_group: u32,

    /// Instance identifier
    pub instance: u64,
}

impl ResourceKey {
    /// Create a key from its three parts
    pub const fn new(resource_type: u32, resource_group: u32, instance: u64) -> Self {
        Self {
            resource_type,
            resource_group,
            instance,
        }
    }

    /// Upper 32 bits of the instance, stored separately in the index
    pub const fn instance_hi(&self) -> u32 {
        (self.instance >> 32) as u32
    }

    /// Lower 32 bits of the instance
    pub const fn instance_lo(&self) -> u32 {
        self.instance as u32
    }
}

impl From<(u32, u32, u64)> for ResourceKey {
    fn from((resource_type, resource_group, instance): (u32, u32, u64)) -> Self {
        Self::new(resource_type, resource_group, instance)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08X}:{:08X}:{:016X}",
            self.resource_type, self.resource_group, self.instance
        )
    }
}

impl FromStr for ResourceKey {
    type Err = FormatError;

    /// Parses `TTTTTTTT:GGGGGGGG:IIIIIIIIIIIIIIII`; `-` is accepted as a separator
    /// and each part may carry a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || FormatError::Corrupt(format!("invalid resource key {s:?}"));

        let mut parts = s.split([':', '-']).map(|p| {
            let p = p.trim();
            p.strip_prefix("0x")
                .or_else(|| p.strip_prefix("0X"))
                .unwrap_or(p)
        });

        let resource_type = parts
            .next()
            .and_then(|p| u32::from_str_radix(p, 16).ok())
            .ok_or_else(invalid)?;
        let resource_group = parts
            .next()
            .and_then(|p| u32::from_str_radix(p, 16).ok())
            .ok_or_else(invalid)?;
        let instance = parts
            .next()
            .and_then(|p| u64::from_str_radix(p, 16).ok())
            .ok_or_else(invalid)?;

        if parts.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::new(resource_type, resource_group, instance))
    }
}
