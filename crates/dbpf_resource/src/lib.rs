//! Typed views over the resources stored in DBPF packages.
//!
//! Resource bytes are turned into structured values through a [`ResourceRegistry`], which picks
//! a [`ResourceFactory`] by resource type id and priority. Every typed resource implements
//! [`Resource`]:
//!
//! - `serialize` gives back exactly the bytes it was parsed from until the resource is edited
//! - edits are counted by a [`ChangeTracker`], so callers can tell which resources need to be
//!   written back when a package is saved
//!
//! Built-in resource kinds:
//!
//! | Type id(s)                                        | Resource           |
//! |---------------------------------------------------|--------------------|
//! | `0x220557DA`                                      | [`StringTable`]    |
//! | `0x0166038C`                                      | [`NameMap`]        |
//! | `0x03B33DDF`, `0x0333406C`, `0x62E94D38`, `0x6017E896` | [`TextResource`] |
//! | anything else                                     | [`DefaultResource`] |
//!
//! Every length and count read from resource bytes is checked against a fixed bound and
//! against the bytes remaining before anything is allocated, and input with trailing bytes is
//! rejected.
//!

#![warn(missing_docs)]

pub mod error;
pub mod name_map;
pub mod registry;
pub mod resource;
#[cfg(feature = "serde")]
mod serde_impl;
pub mod stbl;
pub mod text;

pub use name_map::NameMap;
pub use registry::{ResourceFactory, ResourceRegistry, TypeMatcher, SUPPORTED_API_VERSIONS};
pub use resource::{ChangeTracker, DefaultResource, Resource, TypedResource};
pub use stbl::StringTable;
pub use text::TextResource;
