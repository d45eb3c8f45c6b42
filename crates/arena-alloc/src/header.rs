//! Block headers.
//!
//! Every block in an arena starts with a fixed-size header that records the
//! payload size and whether the block is in use. Headers are stored inside the
//! arena bytes and addressed by their arena-relative offset, so they are always
//! decoded from bytes rather than read through a typed pointer.
//!
//! ```text
//! Header Layout (8 bytes):
//! ┌───────────────────────┬───────┬─────────────────────┐
//! │ size: u32 (LE)        │ flags │ magic [B1, 0C, 4B]  │
//! └───────────────────────┴───────┴─────────────────────┘
//!   0                     4       5                     8
//! ```
//!
//! The magic bytes and the reserved flag bits let a chain walk tell a real
//! header apart from payload bytes that were overwritten by a buffer overrun.

use bitflags::bitflags;
use snafu::{OptionExt as _, Snafu};

use crate::location::Location;

/// Size in bytes of every block header.
pub const HEADER_SIZE: usize = 8;

/// Largest supported arena capacity.
///
/// Header sizes are stored as `u32`, so no block can be larger than this.
pub const MAX_CAPACITY: usize = u32::MAX as usize;

const MAGIC: [u8; 3] = [0xB1, 0x0C, 0x4B];

bitflags! {
    /// Flag bits stored in the fifth header byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct HeaderFlags: u8 {
        /// The block is handed out to a caller.
        const USED = 1 << 0;
    }
}

/// Errors returned when reading a header at an arbitrary offset.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HeaderError {
    #[snafu(display("header at offset {offset} does not fit in a {capacity}-byte arena"))]
    OutOfBounds {
        offset: usize,
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("bytes at offset {offset} are not a valid block header"))]
    BadHeader {
        offset: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Decoded block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Payload capacity in bytes, excluding the header itself.
    pub size: usize,
    /// Whether the block is currently allocated.
    pub used: bool,
}

impl Header {
    #[must_use]
    pub(crate) const fn free(size: usize) -> Self {
        Self { size, used: false }
    }

    #[must_use]
    pub(crate) const fn used(size: usize) -> Self {
        Self { size, used: true }
    }

    /// Returns the bytes this block occupies, header included.
    #[must_use]
    pub const fn footprint(&self) -> usize {
        HEADER_SIZE + self.size
    }

    pub(crate) fn encode(self) -> [u8; HEADER_SIZE] {
        debug_assert!(self.size <= MAX_CAPACITY);
        #[expect(clippy::cast_possible_truncation)]
        let size = (self.size as u32).to_le_bytes();
        let flags = if self.used {
            HeaderFlags::USED
        } else {
            HeaderFlags::empty()
        };
        [
            size[0],
            size[1],
            size[2],
            size[3],
            flags.bits(),
            MAGIC[0],
            MAGIC[1],
            MAGIC[2],
        ]
    }

    pub(crate) fn decode(raw: &[u8; HEADER_SIZE]) -> Option<Self> {
        let [s0, s1, s2, s3, flags, m0, m1, m2] = *raw;
        if [m0, m1, m2] != MAGIC {
            return None;
        }
        let flags = HeaderFlags::from_bits(flags)?;
        let size = u32::from_le_bytes([s0, s1, s2, s3]) as usize;
        Some(Self {
            size,
            used: flags.contains(HeaderFlags::USED),
        })
    }
}

/// Reads the header stored at `offset` within `bytes`.
pub(crate) fn read(bytes: &[u8], offset: usize) -> Result<Header, HeaderError> {
    let capacity = bytes.len();
    let raw = bytes
        .get(offset..)
        .and_then(<[u8]>::first_chunk::<HEADER_SIZE>)
        .context(OutOfBoundsSnafu { offset, capacity })?;
    Header::decode(raw).context(BadHeaderSnafu { offset })
}

/// Writes `header` at `offset` within `bytes`.
///
/// # Panics
///
/// Panics if the header does not fit in `bytes` at `offset`. Callers only
/// write headers at offsets derived from a validated chain.
pub(crate) fn write(bytes: &mut [u8], offset: usize, header: Header) {
    bytes[offset..offset + HEADER_SIZE].copy_from_slice(&header.encode());
}
