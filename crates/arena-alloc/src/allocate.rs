//! Best-fit allocation.
//!
//! # Algorithm
//!
//! - **Search**: walk the whole chain and keep the free block whose payload
//!   exceeds the request by the least. Ties go to the lowest offset.
//! - **Split**: if the chosen block leaves at least [`min_split`] bytes after
//!   the rounded request, a new free header is written right after the
//!   granted payload and covers the rest.
//! - **Absorb**: otherwise the whole block is granted. A remainder too small
//!   for a header and one alignment unit would never be usable on its own.
//!
//! The remainder of a split never needs coalescing: the block it was cut from
//! was free, so its right neighbour is used or the arena end.
//!
//! [`min_split`]: crate::ArenaConfig::min_split

use derive_more::IsVariant;
use snafu::{ResultExt as _, Snafu, ensure};

use crate::{
    arena::{Arena, BlockPtr},
    chain::CorruptionError,
    header::{HEADER_SIZE, Header},
    location::Location,
};

/// Errors returned by [`Arena::allocate`].
#[derive(Debug, Snafu, IsVariant)]
pub enum AllocError {
    #[snafu(display("invalid allocation size {size}"))]
    InvalidSize {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("no free block can hold {size} bytes"))]
    OutOfMemory {
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena corrupted while allocating {size} bytes"))]
    Corrupted {
        size: usize,
        source: CorruptionError,
        #[snafu(implicit)]
        location: Location,
    },
}

impl<S> Arena<S>
where
    S: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Allocates a block with at least `size` payload bytes.
    ///
    /// The request is rounded up to the configured alignment unit and served
    /// from the best-fitting free block.
    ///
    /// # Errors
    ///
    /// - [`AllocError::InvalidSize`] if `size` is zero or a header plus `size`
    ///   exceeds the arena capacity.
    /// - [`AllocError::OutOfMemory`] if no free block is large enough.
    /// - [`AllocError::Corrupted`] if the header chain is damaged.
    pub fn allocate(&mut self, size: usize) -> Result<BlockPtr, AllocError> {
        self.allocate_block(size).map(|(ptr, _granted)| ptr)
    }

    /// Allocates like [`allocate`](Self::allocate) and zeroes the whole
    /// granted payload.
    pub fn allocate_zeroed(&mut self, size: usize) -> Result<BlockPtr, AllocError> {
        let (ptr, granted) = self.allocate_block(size)?;
        let start = ptr.offset();
        self.bytes_mut()[start..start + granted].fill(0);
        Ok(ptr)
    }

    fn allocate_block(&mut self, size: usize) -> Result<(BlockPtr, usize), AllocError> {
        let capacity = self.capacity();
        ensure!(
            size > 0 && size <= capacity - HEADER_SIZE,
            InvalidSizeSnafu { size }
        );

        let config = self.config();
        let rounded = size.next_multiple_of(config.align());
        let Some((offset, header)) = self.best_fit(size).context(CorruptedSnafu { size })? else {
            log::debug!("arena exhausted: no free block holds {size} bytes");
            return OutOfMemorySnafu { size }.fail();
        };

        let granted = if header.size >= rounded && header.size - rounded >= config.min_split() {
            let remainder = header.size - rounded - HEADER_SIZE;
            self.write_header(offset + HEADER_SIZE + rounded, Header::free(remainder));
            rounded
        } else {
            header.size
        };
        self.write_header(offset, Header::used(granted));

        let ptr = self.ptr_at(offset + HEADER_SIZE);
        log::trace!("allocated {ptr}: requested={size} granted={granted}");
        Ok((ptr, granted))
    }

    /// Finds the free block with the smallest payload of at least `size`
    /// bytes.
    fn best_fit(&self, size: usize) -> Result<Option<(usize, Header)>, CorruptionError> {
        let mut best: Option<(usize, Header)> = None;
        for entry in self.chain() {
            let (offset, header) = entry?;
            if header.used || header.size < size {
                continue;
            }
            if best.is_none_or(|(_, b)| header.size < b.size) {
                best = Some((offset, header));
                if header.size == size {
                    break;
                }
            }
        }
        Ok(best)
    }
}
