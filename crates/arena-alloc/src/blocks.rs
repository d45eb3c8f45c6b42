//! Read-only views of the header chain for diagnostics and tests.

use core::{fmt, iter::FusedIterator};

use derive_more::Display;
use snafu::ensure;

use crate::{
    arena::Arena,
    chain::{AdjacentFreeSnafu, Chain, CorruptionError},
    header::HEADER_SIZE,
};

/// One block of the chain as seen by [`Arena::iterate_blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the block header.
    pub offset: usize,
    /// Payload size in bytes.
    pub size: usize,
    /// Whether the block is allocated.
    pub used: bool,
}

impl BlockInfo {
    /// Returns the offset of the first payload byte.
    ///
    /// [`Arena::ptr_at`] turns it back into a pointer.
    #[must_use]
    pub const fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }

    /// Returns the offset one past the last payload byte.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.offset + HEADER_SIZE + self.size
    }
}

/// Iterator over the blocks of an arena, from offset 0 to the end.
///
/// Stops early, after logging the damage, if the chain is corrupted. Use
/// [`Arena::check`] to get the error itself.
#[derive(Debug, Clone)]
pub struct Blocks<'a> {
    chain: Chain<'a>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let (offset, header) = self.chain.next()?.ok()?;
        Some(BlockInfo {
            offset,
            size: header.size,
            used: header.used,
        })
    }
}

impl FusedIterator for Blocks<'_> {}

/// Summary of the arena contents.
#[derive(Debug, Default, Display, Clone, Copy, PartialEq, Eq)]
#[display(
    "{blocks} blocks ({used_blocks} used, {free_blocks} free), \
     {used_bytes} B used, {free_bytes} B free, {overhead_bytes} B headers, \
     largest free {largest_free} B"
)]
pub struct ArenaStats {
    pub blocks: usize,
    pub used_blocks: usize,
    pub free_blocks: usize,
    /// Payload bytes held by used blocks.
    pub used_bytes: usize,
    /// Payload bytes held by free blocks.
    pub free_bytes: usize,
    /// Bytes taken by headers.
    pub overhead_bytes: usize,
    /// Largest single request that can currently succeed.
    pub largest_free: usize,
}

impl ArenaStats {
    fn record(&mut self, size: usize, used: bool) {
        self.blocks += 1;
        self.overhead_bytes += HEADER_SIZE;
        if used {
            self.used_blocks += 1;
            self.used_bytes += size;
        } else {
            self.free_blocks += 1;
            self.free_bytes += size;
            self.largest_free = self.largest_free.max(size);
        }
    }
}

impl<S> Arena<S>
where
    S: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Returns an iterator over every block, in address order.
    ///
    /// The iterator borrows the arena immutably and can be recreated at any
    /// time to restart from the first block.
    #[must_use]
    pub fn iterate_blocks(&self) -> Blocks<'_> {
        Blocks {
            chain: self.chain(),
        }
    }

    /// Walks the chain and summarizes it.
    pub fn stats(&self) -> Result<ArenaStats, CorruptionError> {
        let mut stats = ArenaStats::default();
        for entry in self.chain() {
            let (_offset, header) = entry?;
            stats.record(header.size, header.used);
        }
        Ok(stats)
    }

    /// Validates every structural invariant of the chain.
    ///
    /// On top of what [`stats`](Self::stats) verifies (headers decode, blocks
    /// stay inside the arena, the chain ends exactly at the capacity), this
    /// rejects two adjacent free blocks, which coalescing never leaves behind.
    pub fn check(&self) -> Result<ArenaStats, CorruptionError> {
        let mut stats = ArenaStats::default();
        let mut prev_free = None;
        for entry in self.chain() {
            let (offset, header) = entry?;
            if let Some(prev) = prev_free {
                if !header.used {
                    log::error!("arena corrupted: free blocks at {prev} and {offset} are adjacent");
                }
                ensure!(header.used, AdjacentFreeSnafu { offset: prev, next: offset });
            }
            prev_free = (!header.used).then_some(offset);
            stats.record(header.size, header.used);
        }
        debug_assert_eq!(
            stats.overhead_bytes + stats.used_bytes + stats.free_bytes,
            self.capacity()
        );
        Ok(stats)
    }

    /// Returns a [`Display`](fmt::Display) adapter that renders the block
    /// table.
    ///
    /// ```
    /// use arena_alloc::Arena;
    ///
    /// let mut arena = Arena::new([0u8; 64]).unwrap();
    /// arena.allocate(8).unwrap();
    /// let table = arena.dump().to_string();
    /// assert!(table.contains("used"));
    /// ```
    #[must_use]
    pub fn dump(&self) -> Dump<'_, S> {
        Dump { arena: self }
    }
}

/// Block table of an arena; see [`Arena::dump`].
pub struct Dump<'a, S> {
    arena: &'a Arena<S>,
}

impl<S> fmt::Display for Dump<'_, S>
where
    S: AsRef<[u8]> + AsMut<[u8]>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>10} {:>10}  state", "header", "payload", "size")?;
        let mut stats = ArenaStats::default();
        for entry in self.arena.chain() {
            let (offset, header) = match entry {
                Ok(block) => block,
                Err(e) => return writeln!(f, "<corrupted: {e}>"),
            };
            let state = if header.used { "used" } else { "free" };
            writeln!(
                f,
                "{offset:>#10x} {:>#10x} {:>10}  {state}",
                offset + HEADER_SIZE,
                header.size
            )?;
            stats.record(header.size, header.used);
        }
        write!(f, "{stats}")
    }
}
