//! Address-derived header chain.
//!
//! Blocks carry no link to their neighbours. The header following a block
//! starts at `offset + HEADER_SIZE + size`, and the chain ends when that
//! address equals the arena capacity. Walking the chain is the only way to
//! discover block boundaries.

use core::iter::FusedIterator;

use snafu::{ResultExt as _, Snafu};

use crate::{
    header::{self, HEADER_SIZE, Header, HeaderError},
    location::Location,
};

/// Structural damage found while walking the header chain.
///
/// This is never the result of an ordinary request; it means arena bytes
/// outside of any payload were overwritten, or the allocator itself broke an
/// invariant.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CorruptionError {
    #[snafu(display("invalid header in chain: {source}"))]
    Header {
        source: HeaderError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display(
        "block at offset {offset} with payload {size} overruns the {capacity}-byte arena"
    ))]
    Overrun {
        offset: usize,
        size: usize,
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("free blocks at offsets {offset} and {next} were not coalesced"))]
    AdjacentFree {
        offset: usize,
        next: usize,
        #[snafu(implicit)]
        location: Location,
    },
    /// Backstop for the walk bound. `step` advances by at least one header
    /// and rejects blocks past the capacity, so a walk ends before the budget
    /// runs out.
    #[snafu(display("header chain did not terminate within {steps} steps"))]
    WalkLimit {
        steps: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Reads the header at `offset` and computes where the next one starts.
///
/// Returns `None` as the next offset when the block ends exactly at the end of
/// the arena.
pub(crate) fn step(
    bytes: &[u8],
    offset: usize,
) -> Result<(Header, Option<usize>), CorruptionError> {
    let capacity = bytes.len();
    let header = header::read(bytes, offset).context(HeaderSnafu)?;
    let end = offset
        .checked_add(header.footprint())
        .filter(|&end| end <= capacity)
        .ok_or_else(|| {
            OverrunSnafu {
                offset,
                size: header.size,
                capacity,
            }
            .build()
        })?;
    let next = (end < capacity).then_some(end);
    Ok((header, next))
}

/// Iterator over `(offset, header)` pairs from offset 0 to the end of the
/// arena.
///
/// The walk is bounded by `capacity / HEADER_SIZE` steps and stops after the
/// first error, so it terminates on any byte content.
#[derive(Debug, Clone)]
pub(crate) struct Chain<'a> {
    bytes: &'a [u8],
    next: Option<usize>,
    budget: usize,
}

impl<'a> Chain<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            next: Some(0),
            budget: bytes.len() / HEADER_SIZE,
        }
    }
}

impl Iterator for Chain<'_> {
    type Item = Result<(usize, Header), CorruptionError>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next.take()?;
        debug_assert!(self.budget > 0, "chain walk outlived its step budget");
        if self.budget == 0 {
            let steps = self.bytes.len() / HEADER_SIZE;
            log::error!("arena corrupted: chain still open after {steps} steps");
            return Some(WalkLimitSnafu { steps }.fail());
        }
        self.budget -= 1;

        match step(self.bytes, offset) {
            Ok((header, next)) => {
                self.next = next;
                Some(Ok((offset, header)))
            }
            Err(e) => {
                log::error!("arena corrupted: {e}");
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for Chain<'_> {}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    fn chain_of(bytes: &[u8]) -> Vec<Result<(usize, Header), CorruptionError>> {
        Chain::new(bytes).collect()
    }

    #[test]
    fn test_single_block() {
        let mut bytes = [0u8; 32];
        header::write(&mut bytes, 0, Header::free(24));

        let blocks = chain_of(&bytes);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].as_ref().ok(), Some(&(0, Header::free(24))));
    }

    #[test]
    fn test_multiple_blocks() {
        let mut bytes = [0u8; 48];
        header::write(&mut bytes, 0, Header::used(8));
        header::write(&mut bytes, 16, Header::free(8));
        header::write(&mut bytes, 32, Header::used(8));

        let offsets = Chain::new(&bytes)
            .map(|e| e.map(|(offset, header)| (offset, header.used)).ok())
            .collect::<Vec<_>>();
        assert_eq!(
            offsets,
            [Some((0, true)), Some((16, false)), Some((32, true))]
        );
    }

    #[test]
    fn test_zero_size_terminal_block() {
        let mut bytes = [0u8; HEADER_SIZE];
        header::write(&mut bytes, 0, Header::free(0));

        let blocks = chain_of(&bytes);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].as_ref().ok(), Some(&(0, Header::free(0))));
    }

    #[test]
    fn test_overrun_stops_walk() {
        let mut bytes = [0u8; 32];
        header::write(&mut bytes, 0, Header::used(8));
        header::write(&mut bytes, 16, Header::free(100));

        let blocks = chain_of(&bytes);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(
            blocks[1],
            Err(CorruptionError::Overrun {
                offset: 16,
                size: 100,
                capacity: 32,
                ..
            })
        ));
    }

    #[test]
    fn test_overwritten_header_stops_walk() {
        let mut bytes = [0u8; 32];
        header::write(&mut bytes, 0, Header::used(8));
        header::write(&mut bytes, 16, Header::free(8));
        bytes[16..24].fill(0x33);

        let blocks = chain_of(&bytes);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(blocks[1], Err(CorruptionError::Header { .. })));
    }

    #[test]
    fn test_truncated_tail_is_corruption() {
        let mut bytes = [0u8; 20];
        header::write(&mut bytes, 0, Header::used(8));

        let blocks = chain_of(&bytes);
        assert_eq!(blocks.len(), 2);
        assert!(matches!(
            blocks[1],
            Err(CorruptionError::Header {
                source: HeaderError::OutOfBounds { offset: 16, .. },
                ..
            })
        ));
    }
}
