//! This library handles reading, editing and creating **DBPF** package files used by *The Sims 3*,
//! *The Sims 4* and other Maxis titles.
//!
//! # DBPF Package Format Documentation
//!
//! A package is a flat container of resources, each identified by a [`ResourceKey`] made of a
//! 32-bit type, a 32-bit group and a 64-bit instance. Packages are typically identified with the
//! `.package` extension.
//!
//! ## File Structure
//!
//! A package consists of a fixed 96 byte header, followed by the stored resource bytes, followed by
//! the index table. Only major version 2 is handled.
//!
//! | Offset (bytes) | Field                  | Description                                                |
//! |----------------|------------------------|------------------------------------------------------------|
//! | 0x0000         | Magic number           | 4 bytes: "DBPF"                                            |
//! | 0x0004         | Major version          | 4 bytes: Fixed value 2                                     |
//! | 0x0008         | Minor version          | 4 bytes: 0 or 1                                            |
//! | 0x000C         | User version           | 8 bytes: Major and minor version of the writing tool       |
//! | 0x0014         | Flags                  | 4 bytes: Unused                                            |
//! | 0x0018         | Created                | 4 bytes: Creation time, seconds since the unix epoch       |
//! | 0x001C         | Modified               | 4 bytes: Modification time, seconds since the unix epoch   |
//! | 0x0020         | Index major version    | 4 bytes: 0                                                 |
//! | 0x0024         | Entry count            | 4 bytes: Number of entries in the index                    |
//! | 0x0028         | Index position (old)   | 4 bytes: Used when the 64-bit position is 0                |
//! | 0x002C         | Index size             | 4 bytes: Size of the index table                           |
//! | 0x0030         | Hole index             | 12 bytes: Unused count, position and size                  |
//! | 0x003C         | Index minor version    | 4 bytes: 3                                                 |
//! | 0x0040         | Index position         | 8 bytes: Offset of the index table                         |
//! | 0x0048         | Reserved               | 24 bytes                                                   |
//!
//! ### Index Table
//!
//! The index starts with a 4-byte index type. Each set bit means a key field is shared by every
//! entry and is written once, directly after the index type:
//!
//! - `0x1`: resource type
//! - `0x2`: resource group
//! - `0x4`: upper 32 bits of the instance
//!
//! Each entry then holds the fields that are not shared, in the order type, group, instance
//! high, followed by:
//!
//! | Field              | Size | Description                                                      |
//! |--------------------|------|------------------------------------------------------------------|
//! | Instance low       | 4    | Lower 32 bits of the instance                                    |
//! | Position           | 4    | Offset of the stored bytes                                       |
//! | Stored size        | 4    | Bit 31 set means the three extended fields below are present     |
//! | Memory size        | 4    | Size after decompression                                         |
//! | Compression        | 2    | Compression marker                                               |
//! | Committed          | 2    | Always 1                                                         |
//!
//! ### Compression
//!
//! The marker in the index only says whether a resource is compressed. The algorithm is picked
//! from the first two bytes of the stored data, see [`compression`].
//!
//! - `0x0000`: stored as is
//! - `0x5A42`: zlib
//! - `0xFFFF`: streamable (RefPack)
//! - `0xFFFE`: internal (RefPack)
//! - `0xFFE0`: deleted record, skipped when reading
//!
//! ## Additional Information
//!
//! - **File Extension**: `.package`
//! - **Endianness**: Little-endian for all multi-byte integers, except the RefPack size header
//!

#![warn(missing_docs)]

pub mod compression;
pub mod error;
pub mod key;
pub mod pool;
pub mod read;
pub mod types;
pub mod write;

pub use compression::CompressionMethod;
pub use key::ResourceKey;
pub use read::{Package, PackageOptions};
pub use types::{IndexEntry, IndexLayout};
pub use write::{CompactionStats, PackageWriter, Pending, SaveOptions};
