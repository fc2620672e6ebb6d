//! Block compression and decompression handling.
//!
//! Two wire formats appear in packages. zlib is read and written. RefPack (also known as QFS)
//! is only read: older content still ships with it but nothing produces it anymore.
//!
//! The algorithm is picked from the first two bytes of a block:
//!
//! | Bytes            | Algorithm |
//! |------------------|-----------|
//! | `78 01`, `78 5E`, `78 9C`, `78 DA` | zlib |
//! | `?? FB`          | RefPack   |

use std::io::{Read, Write};

use bon::Builder;
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use tracing::{instrument, trace};

use crate::error::{FormatError, Result, UnsupportedError};

/// Default upper bound for a single decompressed block (256 MiB)
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 256 * 1024 * 1024;

const ZLIB_LEVELS: [u8; 4] = [0x01, 0x5E, 0x9C, 0xDA];
const REFPACK_SIGNATURE: u8 = 0xFB;
const REFPACK_LARGE_SIZES: u8 = 0x80;

/// Identifies the storage format used for new resources when saving a package
///
/// Resources already stored in a package keep whatever compression they were read with.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum CompressionMethod {
    /// Stores the data as it is
    None,

    /// Compress the data using zlib, keeping the result only when it is smaller
    #[default]
    Zlib,
}

/// Algorithm detected from a block signature
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Algorithm {
    /// zlib / DEFLATE
    Zlib,
    /// RefPack / QFS
    RefPack,
}

/// Limits applied while decoding untrusted blocks
#[derive(Debug, Clone, Copy, Builder)]
pub struct CodecOptions {
    /// Largest decompressed size accepted, checked before any allocation
    #[builder(default = DEFAULT_MAX_DECOMPRESSED_SIZE)]
    pub max_decompressed_size: usize,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Work out which algorithm produced `data`
pub fn detect(data: &[u8]) -> Result<Algorithm> {
    match data {
        [0x78, level, ..] if ZLIB_LEVELS.contains(level) => Ok(Algorithm::Zlib),
        [_, REFPACK_SIGNATURE, ..] => Ok(Algorithm::RefPack),
        [a, b, ..] => Err(UnsupportedError::UnknownSignature([*a, *b]).into()),
        _ => Err(FormatError::InputUnderrun {
            position: data.len(),
            needed: 2 - data.len(),
        }
        .into()),
    }
}

/// Compress `data` with zlib
pub fn compress(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len() / 2 + 16), level);
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Compress `data` with zlib, returning it only if it is strictly smaller than the input
#[instrument(skip(data), fields(size = data.len()), level = "trace")]
pub fn compress_if_smaller(data: &[u8]) -> Result<Option<Vec<u8>>> {
    let compressed = compress(data, Compression::default())?;
    trace!(compressed = compressed.len(), "compressed");
    Ok((compressed.len() < data.len()).then_some(compressed))
}

/// Decompress a block, checking the result is exactly `expected_len` bytes
pub fn decompress(data: &[u8], expected_len: usize, options: &CodecOptions) -> Result<Vec<u8>> {
    let output = match detect(data)? {
        Algorithm::Zlib => decompress_zlib(data, expected_len, options)?,
        Algorithm::RefPack => decompress_refpack(data, expected_len, options)?,
    };

    if output.len() != expected_len {
        return Err(FormatError::SizeMismatch {
            expected: expected_len as u64,
            actual: output.len() as u64,
        }
        .into());
    }

    Ok(output)
}

/// Decompress a zlib block that should inflate to `expected_len` bytes
pub fn decompress_zlib(data: &[u8], expected_len: usize, options: &CodecOptions) -> Result<Vec<u8>> {
    check_limit(expected_len as u64, options)?;

    // One byte of slack so oversized streams are noticed without inflating all of them
    let mut output = Vec::with_capacity(expected_len);
    ZlibDecoder::new(data)
        .take(expected_len as u64 + 1)
        .read_to_end(&mut output)
        .map_err(|e| FormatError::Corrupt(format!("zlib: {e}")))?;

    if output.len() != expected_len {
        return Err(FormatError::SizeMismatch {
            expected: expected_len as u64,
            actual: output.len() as u64,
        }
        .into());
    }

    Ok(output)
}

/// Decompress a RefPack block that should expand to `expected_len` bytes
///
/// The header is one flag byte, the `0xFB` signature and the decompressed size, stored big
/// endian in 3 bytes, or in 4 bytes when the flag byte is `0x80`. A declared size other than
/// `expected_len` is rejected before any output is allocated.
pub fn decompress_refpack(
    data: &[u8],
    expected_len: usize,
    options: &CodecOptions,
) -> Result<Vec<u8>> {
    let mut input = Input { data, position: 0 };

    let header = input.take(2)?;
    if header[1] != REFPACK_SIGNATURE {
        return Err(UnsupportedError::UnknownSignature([header[0], header[1]]).into());
    }

    let declared = if header[0] != REFPACK_LARGE_SIZES {
        input.take(3)?.iter().fold(0u64, |acc, b| acc << 8 | *b as u64)
    } else {
        input.take(4)?.iter().fold(0u64, |acc, b| acc << 8 | *b as u64)
    };
    check_limit(declared, options)?;
    if declared != expected_len as u64 {
        return Err(FormatError::SizeMismatch {
            expected: expected_len as u64,
            actual: declared,
        }
        .into());
    }
    let declared = declared as usize;

    trace!(flags = header[0], declared, "decoding refpack");

    let mut output: Vec<u8> = Vec::with_capacity(declared);
    while output.len() < declared {
        let control = input.byte()?;

        let (plain, copy, distance, last) = match control {
            0x00..=0x7F => {
                let b1 = input.byte()? as usize;
                let ctrl = control as usize;
                (
                    ctrl & 0x03,
                    ((ctrl >> 2) & 0x07) + 3,
                    ((ctrl & 0x60) << 3) + b1 + 1,
                    false,
                )
            }
            0x80..=0xBF => {
                let b = input.take(2)?;
                let (b1, b2) = (b[0] as usize, b[1] as usize);
                let ctrl = control as usize;
                (
                    (b1 >> 6) & 0x03,
                    (ctrl & 0x3F) + 4,
                    ((b1 & 0x3F) << 8) + b2 + 1,
                    false,
                )
            }
            0xC0..=0xDF => {
                let b = input.take(3)?;
                let (b1, b2, b3) = (b[0] as usize, b[1] as usize, b[2] as usize);
                let ctrl = control as usize;
                (
                    ctrl & 0x03,
                    ((ctrl & 0x0C) << 6) + b3 + 5,
                    ((ctrl & 0x10) << 12) + (b1 << 8) + b2 + 1,
                    false,
                )
            }
            0xE0..=0xFB => ((((control & 0x1F) as usize) << 2) + 4, 0, 0, false),
            0xFC..=0xFF => ((control & 0x03) as usize, 0, 0, true),
        };

        if output.len() + plain > declared {
            return Err(FormatError::OutputOverrun { declared }.into());
        }
        output.extend_from_slice(input.take(plain)?);

        if copy > 0 {
            if distance > output.len() {
                return Err(FormatError::InvalidBackReference {
                    distance,
                    position: output.len(),
                }
                .into());
            }
            if output.len() + copy > declared {
                return Err(FormatError::OutputOverrun { declared }.into());
            }

            let start = output.len() - distance;
            if distance >= copy {
                output.extend_from_within(start..start + copy);
            } else {
                // Overlapping run, each byte may depend on one written in this same copy
                for i in 0..copy {
                    let byte = output[start + i];
                    output.push(byte);
                }
            }
        }

        if last {
            break;
        }
    }

    if output.len() != declared {
        return Err(FormatError::SizeMismatch {
            expected: declared as u64,
            actual: output.len() as u64,
        }
        .into());
    }

    Ok(output)
}

fn check_limit(declared: u64, options: &CodecOptions) -> Result<()> {
    if declared > options.max_decompressed_size as u64 {
        return Err(FormatError::SizeLimitExceeded {
            declared,
            limit: options.max_decompressed_size as u64,
        }
        .into());
    }
    Ok(())
}

struct Input<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Input<'a> {
    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        let end = self.position + count;
        if end > self.data.len() {
            return Err(FormatError::InputUnderrun {
                position: self.position,
                needed: end - self.data.len(),
            }
            .into());
        }
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
}
