//! Deallocation with eager coalescing.
//!
//! A freed block is merged with a free right neighbour and then with a free
//! left neighbour, so the chain never holds two adjacent free blocks once
//! [`Arena::free`] returns. The left neighbour is found for free: the lookup
//! that validates the pointer walks the chain from offset 0 and remembers the
//! header it passed last.
//!
//! ```text
//! before:  │ free A │ used B (freed) │ free C │ used D │
//! after:   │ free A + B + C                   │ used D │
//! ```

use derive_more::IsVariant;
use snafu::{ResultExt as _, Snafu};

use crate::{
    arena::{Arena, BlockPtr},
    chain::{self, CorruptionError},
    header::{HEADER_SIZE, Header},
    location::Location,
};

/// Errors returned by [`Arena::free`].
#[derive(Debug, Snafu, IsVariant)]
pub enum FreeError {
    #[snafu(display("{ptr} is not the payload of any block in this arena"))]
    InvalidPointer {
        ptr: BlockPtr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {ptr} is already free"))]
    DoubleFree {
        ptr: BlockPtr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena corrupted while freeing {ptr}"))]
    Corrupted {
        ptr: BlockPtr,
        source: CorruptionError,
        #[snafu(implicit)]
        location: Location,
    },
}

impl<S> Arena<S>
where
    S: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Returns the block at `ptr` to the arena.
    ///
    /// # Errors
    ///
    /// - [`FreeError::InvalidPointer`] if `ptr` is not the first payload byte
    ///   of a block on the chain, or if it was made by another arena or before
    ///   the last [`reset`](Arena::reset).
    /// - [`FreeError::DoubleFree`] if the block is already free.
    /// - [`FreeError::Corrupted`] if the header chain is damaged.
    ///
    /// The arena is left untouched whenever an error is returned.
    pub fn free(&mut self, ptr: BlockPtr) -> Result<(), FreeError> {
        let Some(found) = self.locate(ptr).context(CorruptedSnafu { ptr })? else {
            log::warn!("rejected free of {ptr}: not a block of this arena");
            return InvalidPointerSnafu { ptr }.fail();
        };
        if !found.header.used {
            log::warn!("rejected free of {ptr}: block is already free");
            return DoubleFreeSnafu { ptr }.fail();
        }

        let mut start = found.offset;
        let mut size = found.header.size;

        let next = found.offset + found.header.footprint();
        if next < self.capacity() {
            let (next_header, _) = chain::step(self.bytes(), next).context(CorruptedSnafu { ptr })?;
            if !next_header.used {
                size += next_header.footprint();
                self.scrub_header(next);
            }
        }

        if let Some((prev_offset, prev)) = found.prev.filter(|(_, prev)| !prev.used) {
            size += prev.footprint();
            self.scrub_header(start);
            start = prev_offset;
        }

        self.write_header(start, Header::free(size));
        log::trace!(
            "freed {ptr}: free block at offset {start} now holds {size} bytes (+{HEADER_SIZE} header)"
        );
        Ok(())
    }
}
