//! The contract shared by every typed resource.

use std::any::Any;
use std::fmt::Debug;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt};
use derive_more::derive::Deref;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ResourceError, Result};

/// Counts edits to a resource and remembers which edit was last saved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeTracker {
    version: u64,
    saved: u64,
}

impl ChangeTracker {
    /// Record an edit
    pub fn touch(&mut self) {
        self.version += 1;
    }

    /// Whether there are edits newer than the last save
    pub fn is_changed(&self) -> bool {
        self.version != self.saved
    }

    /// Number of edits made so far
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Mark the current edit as saved
    pub fn mark_saved(&mut self) {
        self.saved = self.version;
    }
}

/// A decoded resource
///
/// `serialize` must reproduce exactly the bytes a resource was parsed from as long as it has
/// not been edited.
pub trait Resource: Debug + Send + Sync + 'static {
    /// Encode the resource into its stored form
    fn serialize(&self) -> Result<Vec<u8>>;

    /// Short name of the resource kind
    fn type_name(&self) -> &'static str;

    /// Edit tracking state
    fn tracker(&self) -> &ChangeTracker;

    /// Mutable edit tracking state
    fn tracker_mut(&mut self) -> &mut ChangeTracker;

    /// Upcast used by `downcast_ref`
    fn as_any(&self) -> &dyn Any;

    /// Upcast used by `downcast_mut`
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Whether the resource was edited since it was parsed or last saved
    fn is_changed(&self) -> bool {
        self.tracker().is_changed()
    }

    /// Number of edits made so far
    fn version(&self) -> u64 {
        self.tracker().version()
    }

    /// Called once the serialized form has been written out
    fn mark_saved(&mut self) {
        self.tracker_mut().mark_saved()
    }
}

impl dyn Resource {
    /// Borrow the concrete resource type, if it is a `T`
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Mutably borrow the concrete resource type, if it is a `T`
    pub fn downcast_mut<T: Resource>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

/// A resource that can be built straight from its stored bytes
pub trait TypedResource: Resource + Sized {
    /// Resource type ids this kind is registered for by default
    const TYPE_IDS: &'static [u32];

    /// Parse the stored bytes
    ///
    /// Any input that is accepted serializes back to the same bytes.
    fn parse(data: &[u8]) -> Result<Self>;
}

/// Bounds checked reader over resource bytes
pub(crate) struct Input<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> Input<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Input {
            cursor: Cursor::new(data),
        }
    }

    pub(crate) fn remaining(&self) -> u64 {
        (self.cursor.get_ref().len() as u64).saturating_sub(self.cursor.position())
    }

    pub(crate) fn ensure(&self, needed: u64) -> Result<()> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(ResourceError::Truncated { needed, remaining }.into());
        }
        Ok(())
    }

    /// Check a declared count against a fixed limit and against what the input can hold
    pub(crate) fn count(&self, count: u64, limit: u64, min_entry_size: u64) -> Result<usize> {
        if count > limit {
            return Err(ResourceError::TooManyEntries { count, limit }.into());
        }
        self.ensure(count.saturating_mul(min_entry_size))?;
        Ok(count as usize)
    }

    pub(crate) fn cursor(&mut self) -> &mut Cursor<&'a [u8]> {
        &mut self.cursor
    }

    pub(crate) fn bytes(&mut self, len: u64) -> Result<&'a [u8]> {
        self.ensure(len)?;
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.cursor.position() as usize;
        let end = start + len as usize;
        self.cursor.set_position(end as u64);
        Ok(&data[start..end])
    }

    pub(crate) fn u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        Ok(self.cursor.read_u8()?)
    }

    pub(crate) fn u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        Ok(self.cursor.read_u16::<LittleEndian>()?)
    }

    pub(crate) fn u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        Ok(self.cursor.read_u32::<LittleEndian>()?)
    }

    pub(crate) fn u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        Ok(self.cursor.read_u64::<LittleEndian>()?)
    }

    /// Reject anything left after the last field
    pub(crate) fn finish(self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            left => Err(ResourceError::TrailingData(left).into()),
        }
    }
}

/// Opaque bytes for resource types without a dedicated parser
#[derive(Debug, Clone, Default, Deref)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DefaultResource {
    #[deref]
    data: Vec<u8>,
    #[cfg_attr(feature = "serde", serde(skip))]
    tracker: ChangeTracker,
}

impl DefaultResource {
    /// Wrap raw bytes
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            tracker: ChangeTracker::default(),
        }
    }

    /// The raw bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the raw bytes
    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
        self.tracker.touch();
    }
}

impl PartialEq for DefaultResource {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for DefaultResource {}

impl Resource for DefaultResource {
    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }

    fn type_name(&self) -> &'static str {
        "DefaultResource"
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

impl TypedResource for DefaultResource {
    const TYPE_IDS: &'static [u32] = &[];

    fn parse(data: &[u8]) -> Result<Self> {
        Ok(Self::new(data.to_vec()))
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use crate::error::{Error, ResourceError};
    use crate::resource::{ChangeTracker, DefaultResource, Input, Resource, TypedResource};

    #[test]
    fn tracker_follows_edits_and_saves() {
        let mut tracker = ChangeTracker::default();
        assert!(!tracker.is_changed());

        tracker.touch();
        tracker.touch();
        assert!(tracker.is_changed());
        assert_eq!(tracker.version(), 2);

        tracker.mark_saved();
        assert!(!tracker.is_changed());
        assert_eq!(tracker.version(), 2);
    }

    #[test]
    fn default_resource_round_trip() -> crate::error::Result<()> {
        let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut resource = DefaultResource::parse(&bytes)?;
        assert_eq!(resource.serialize()?, bytes);
        assert!(!resource.is_changed());
        assert_eq!(resource.len(), 4);

        resource.set_data(vec![1]);
        assert!(resource.is_changed());
        resource.mark_saved();
        assert!(!resource.is_changed());

        Ok(())
    }

    #[test]
    fn downcast_boxed_resource() {
        let mut boxed: Box<dyn Resource> = Box::new(DefaultResource::new(vec![7]));
        assert_eq!(boxed.type_name(), "DefaultResource");
        assert!(boxed.downcast_ref::<DefaultResource>().is_some());

        if let Some(resource) = boxed.downcast_mut::<DefaultResource>() {
            resource.set_data(vec![8, 9]);
        }
        assert_eq!(boxed.serialize().ok(), Some(vec![8, 9]));
        assert_eq!(boxed.version(), 1);
    }

    #[test]
    fn input_checks_counts_against_remaining_bytes() {
        let data = [0u8; 10];
        let input = Input::new(&data);

        assert_eq!(input.count(2, 10, 5).ok(), Some(2));
        assert!(matches!(
            input.count(3, 10, 5),
            Err(Error::Resource(ResourceError::Truncated { needed: 15, remaining: 10 }))
        ));
        assert!(matches!(
            input.count(11, 10, 0),
            Err(Error::Resource(ResourceError::TooManyEntries { count: 11, limit: 10 }))
        ));
    }

    #[test]
    fn input_rejects_trailing_bytes() -> crate::error::Result<()> {
        let data = [1, 0, 2];
        let mut input = Input::new(&data);
        assert_eq!(input.u16()?, 1);
        assert!(matches!(
            input.finish(),
            Err(Error::Resource(ResourceError::TrailingData(1)))
        ));

        Ok(())
    }
}
