//! The arena: one fixed-capacity byte buffer and the header chain inside it.
//!
//! An [`Arena`] owns its backing storage for its whole lifetime. All block
//! state lives in the storage bytes; the `Arena` value itself only adds the
//! configuration and the tag stamped into every [`BlockPtr`] it hands out.
//! Blocks are addressed by arena-relative offsets, which keeps
//! every bounds check a plain comparison against the capacity and lets the
//! storage be moved together with the arena.
//!
//! ```text
//! Arena Layout:
//! ┌────────┬───────────────┬────────┬──────────────────┬────────┬─────────┐
//! │ header │ payload (used)│ header │ payload (free)   │ header │ payload │
//! └────────┴───────────────┴────────┴──────────────────┴────────┴─────────┘
//! 0        8                                                     capacity ┘
//! ```

use core::sync::atomic::{AtomicU32, Ordering};

use derive_more::{Display, IsVariant};
use snafu::{ResultExt as _, Snafu, ensure};

use crate::{
    chain::{self, Chain, CorruptionError},
    config::ArenaConfig,
    header::{self, HEADER_SIZE, Header, HeaderError, MAX_CAPACITY},
    location::Location,
};

/// Errors that prevent an arena from being initialized.
#[derive(Debug, Snafu, IsVariant)]
pub enum InitError {
    #[snafu(display("arena capacity {capacity} cannot hold a {HEADER_SIZE}-byte header"))]
    TooSmall {
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena capacity {capacity} exceeds the {MAX_CAPACITY}-byte limit"))]
    TooLarge {
        capacity: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("alignment {align} is not a power of two up to {HEADER_SIZE}"))]
    InvalidAlign {
        align: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// Errors returned when resolving a pointer to its payload.
#[derive(Debug, Snafu, IsVariant)]
pub enum AccessError {
    #[snafu(display("{ptr} is not the payload of any block in this arena"))]
    InvalidPointer {
        ptr: BlockPtr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("block at {ptr} is not allocated"))]
    NotAllocated {
        ptr: BlockPtr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("arena corrupted while resolving {ptr}"))]
    Corrupted {
        ptr: BlockPtr,
        source: CorruptionError,
        #[snafu(implicit)]
        location: Location,
    },
}

static NEXT_ARENA_ID: AtomicU32 = AtomicU32::new(0);

/// Identity of one arena between two resets.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("#{id}.{generation}")]
struct ArenaTag {
    id: u32,
    generation: u32,
}

impl ArenaTag {
    fn fresh() -> Self {
        Self {
            id: NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed),
            generation: 0,
        }
    }

    const fn next_generation(self) -> Self {
        Self {
            id: self.id,
            generation: self.generation.wrapping_add(1),
        }
    }
}

/// Handle to an allocated payload.
///
/// Holds the arena-relative offset of the first payload byte (the block
/// header sits [`HEADER_SIZE`] bytes before it) and the tag of the arena that
/// produced it. A `BlockPtr` from another arena, or from before a
/// [`reset`](Arena::reset), is rejected as an invalid pointer.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{tag}@{offset:#x}")]
pub struct BlockPtr {
    tag: ArenaTag,
    offset: usize,
}

impl BlockPtr {
    /// Returns the payload offset relative to the arena start.
    #[must_use]
    pub const fn offset(self) -> usize {
        self.offset
    }
}

/// A block found by walking the chain, together with its predecessor.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Located {
    pub(crate) prev: Option<(usize, Header)>,
    pub(crate) offset: usize,
    pub(crate) header: Header,
}

/// A fixed-capacity arena serving best-fit allocations from `S`.
///
/// `S` is any owned or borrowed byte buffer: `[u8; N]`, `&mut [u8]`,
/// `Box<[u8]>`, and so on. The arena never grows, never moves its blocks and
/// never calls a system allocator.
///
/// # Thread Safety
///
/// An `Arena` has no interior synchronization. Mutating operations take
/// `&mut self`; callers sharing one arena between threads must hold a lock
/// around every call.
///
/// # Examples
///
/// ```
/// use arena_alloc::Arena;
///
/// let mut arena = Arena::new([0u8; 256]).unwrap();
/// let ptr = arena.allocate(10).unwrap();
/// arena.payload_mut(ptr).unwrap()[..5].copy_from_slice(b"hello");
/// assert_eq!(&arena.payload(ptr).unwrap()[..5], b"hello");
/// arena.free(ptr).unwrap();
/// ```
#[derive(Debug)]
pub struct Arena<S> {
    storage: S,
    config: ArenaConfig,
    tag: ArenaTag,
}

/// An arena that stores its `N` bytes inline.
pub type InlineArena<const N: usize> = Arena<[u8; N]>;

impl<const N: usize> Arena<[u8; N]> {
    /// Creates a zero-filled inline arena with the default configuration.
    pub fn inline() -> Result<Self, InitError> {
        Self::new([0; N])
    }
}

impl<S> Arena<S>
where
    S: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Initializes an arena over `storage` with the default configuration.
    ///
    /// The capacity is the length of `storage`. The arena starts out as a
    /// single free block spanning all of it.
    pub fn new(storage: S) -> Result<Self, InitError> {
        Self::with_config(storage, ArenaConfig::new())
    }

    /// Initializes an arena over `storage` with `config`.
    pub fn with_config(storage: S, config: ArenaConfig) -> Result<Self, InitError> {
        ensure!(
            config.is_valid_align(),
            InvalidAlignSnafu {
                align: config.align()
            }
        );
        let capacity = storage.as_ref().len();
        ensure!(capacity >= HEADER_SIZE, TooSmallSnafu { capacity });
        ensure!(capacity <= MAX_CAPACITY, TooLargeSnafu { capacity });

        let mut arena = Self {
            storage,
            config,
            tag: ArenaTag::fresh(),
        };
        arena.format();
        Ok(arena)
    }

    fn format(&mut self) {
        let capacity = self.capacity();
        if let Some(byte) = self.config.fill().init_byte() {
            self.bytes_mut().fill(byte);
        }
        self.write_header(0, Header::free(capacity - HEADER_SIZE));
        log::debug!(
            "arena {} initialized: capacity={capacity} align={} fill={:?}",
            self.tag,
            self.config.align(),
            self.config.fill()
        );
    }

    /// Re-initializes the arena in place.
    ///
    /// Every outstanding [`BlockPtr`] becomes invalid, even one whose offset
    /// is handed out again afterwards.
    pub fn reset(&mut self) {
        self.tag = self.tag.next_generation();
        self.format();
    }

    /// Tears the arena down and returns its storage.
    pub fn into_inner(self) -> S {
        self.storage
    }

    /// Returns the total number of bytes managed by the arena.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.bytes().len()
    }

    #[must_use]
    pub fn config(&self) -> ArenaConfig {
        self.config
    }

    /// Builds a pointer to the payload starting at `offset` in this arena.
    ///
    /// Nothing is checked here; the pointer is validated like any other when
    /// it is used.
    #[must_use]
    pub const fn ptr_at(&self, offset: usize) -> BlockPtr {
        BlockPtr {
            tag: self.tag,
            offset,
        }
    }

    /// Returns the raw arena bytes, headers included.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.bytes()
    }

    /// Reads the header stored at `offset`.
    ///
    /// `offset` does not have to be on the chain; this only decodes the
    /// bytes found there.
    pub fn header_at(&self, offset: usize) -> Result<Header, HeaderError> {
        header::read(self.bytes(), offset)
    }

    /// Returns the offset of the header following the one at `offset`, or
    /// `None` if that block is the last one in the arena.
    pub fn next_offset(&self, offset: usize) -> Result<Option<usize>, CorruptionError> {
        chain::step(self.bytes(), offset).map(|(_header, next)| next)
    }

    /// Returns the usable size of the allocation at `ptr`.
    ///
    /// This is the granted block size, which may exceed the requested size by
    /// rounding or by an absorbed remainder.
    pub fn block_size(&self, ptr: BlockPtr) -> Result<usize, AccessError> {
        self.resolve(ptr).map(|found| found.header.size)
    }

    /// Borrows the payload of the allocation at `ptr`.
    pub fn payload(&self, ptr: BlockPtr) -> Result<&[u8], AccessError> {
        let found = self.resolve(ptr)?;
        let start = found.offset + HEADER_SIZE;
        Ok(&self.bytes()[start..start + found.header.size])
    }

    /// Mutably borrows the payload of the allocation at `ptr`.
    pub fn payload_mut(&mut self, ptr: BlockPtr) -> Result<&mut [u8], AccessError> {
        let found = self.resolve(ptr)?;
        let start = found.offset + HEADER_SIZE;
        Ok(&mut self.bytes_mut()[start..start + found.header.size])
    }

    fn resolve(&self, ptr: BlockPtr) -> Result<Located, AccessError> {
        let Some(found) = self.locate(ptr).context(CorruptedSnafu { ptr })? else {
            return InvalidPointerSnafu { ptr }.fail();
        };
        ensure!(found.header.used, NotAllocatedSnafu { ptr });
        Ok(found)
    }

    /// Finds the block whose payload starts at `ptr`.
    ///
    /// Walks the chain from offset 0, remembering the previous header so
    /// callers can coalesce backwards without a second walk. Returns `None` if
    /// `ptr` was made by another arena or before the last reset, or if no
    /// header on the chain matches.
    pub(crate) fn locate(&self, ptr: BlockPtr) -> Result<Option<Located>, CorruptionError> {
        if ptr.tag != self.tag {
            return Ok(None);
        }
        let Some(target) = ptr.offset.checked_sub(HEADER_SIZE) else {
            return Ok(None);
        };

        let mut prev = None;
        for entry in self.chain() {
            let (offset, header) = entry?;
            if offset == target {
                return Ok(Some(Located {
                    prev,
                    offset,
                    header,
                }));
            }
            if offset > target {
                break;
            }
            prev = Some((offset, header));
        }
        Ok(None)
    }

    pub(crate) fn chain(&self) -> Chain<'_> {
        Chain::new(self.bytes())
    }

    pub(crate) fn write_header(&mut self, offset: usize, header: Header) {
        header::write(self.bytes_mut(), offset, header);
    }

    /// Overwrites a header that no longer exists after coalescing.
    pub(crate) fn scrub_header(&mut self, offset: usize) {
        let byte = self.config.fill().scrub_byte();
        self.bytes_mut()[offset..offset + HEADER_SIZE].fill(byte);
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.storage.as_ref()
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        self.storage.as_mut()
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Fill;

    #[test]
    fn test_initialize() {
        let arena = Arena::new([0xFFu8; 64]).unwrap();
        assert_eq!(arena.capacity(), 64);
        assert_eq!(arena.header_at(0).unwrap(), Header::free(64 - HEADER_SIZE));
        assert_eq!(arena.next_offset(0).unwrap(), None);
        assert!(arena.as_bytes()[HEADER_SIZE..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_initialize_keep_fill() {
        let config = ArenaConfig::new().with_fill(Fill::Keep);
        let arena = Arena::with_config([0x5Au8; 32], config).unwrap();
        assert!(arena.as_bytes()[HEADER_SIZE..].iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_initialize_pattern_fill() {
        let config = ArenaConfig::new().with_fill(Fill::Pattern(0xC3));
        let arena = Arena::with_config([0u8; 32], config).unwrap();
        assert!(arena.as_bytes()[HEADER_SIZE..].iter().all(|&b| b == 0xC3));
    }

    #[test]
    fn test_initialize_too_small() {
        let err = Arena::new([0u8; HEADER_SIZE - 1]).unwrap_err();
        assert!(matches!(err, InitError::TooSmall { capacity: 7, .. }));

        let err = Arena::new([0u8; 0]).unwrap_err();
        assert!(err.is_too_small());
    }

    #[test]
    fn test_initialize_exactly_one_header() {
        let arena = Arena::new([0u8; HEADER_SIZE]).unwrap();
        assert_eq!(arena.header_at(0).unwrap(), Header::free(0));
        assert_eq!(arena.next_offset(0).unwrap(), None);
    }

    #[test]
    fn test_initialize_invalid_align() {
        for align in [0, 3, 16] {
            let config = ArenaConfig::new().with_align(align);
            let err = Arena::with_config([0u8; 64], config).unwrap_err();
            assert!(err.is_invalid_align());
        }
    }

    #[test]
    fn test_inline_and_borrowed_storage() {
        let mut arena = InlineArena::<128>::inline().unwrap();
        assert_eq!(arena.capacity(), 128);
        arena.allocate(16).unwrap();

        let mut buf = vec![0u8; 96];
        let arena = Arena::new(buf.as_mut_slice()).unwrap();
        assert_eq!(arena.capacity(), 96);

        let arena = Arena::new(vec![0u8; 40].into_boxed_slice()).unwrap();
        assert_eq!(arena.into_inner().len(), 40);
    }

    #[test]
    fn test_header_at_out_of_bounds() {
        let arena = Arena::new([0u8; 32]).unwrap();
        assert!(matches!(
            arena.header_at(25),
            Err(HeaderError::OutOfBounds {
                offset: 25,
                capacity: 32,
                ..
            })
        ));
        assert!(arena.header_at(24).is_err());
    }

    #[test]
    fn test_next_offset_walks_chain() {
        let mut arena = Arena::new([0u8; 64]).unwrap();
        let a = arena.allocate(8).unwrap();
        arena.allocate(8).unwrap();

        assert_eq!(a.offset(), HEADER_SIZE);
        assert_eq!(arena.next_offset(0).unwrap(), Some(16));
        assert_eq!(arena.next_offset(16).unwrap(), Some(32));
        assert_eq!(arena.next_offset(32).unwrap(), None);
    }

    #[test]
    fn test_payload_access() {
        let mut arena = Arena::new([0u8; 64]).unwrap();
        let ptr = arena.allocate(5).unwrap();

        assert_eq!(arena.block_size(ptr).unwrap(), 8);
        arena.payload_mut(ptr).unwrap().copy_from_slice(b"abcdefgh");
        assert_eq!(arena.payload(ptr).unwrap(), b"abcdefgh");
        assert_eq!(&arena.as_bytes()[ptr.offset()..ptr.offset() + 8], b"abcdefgh");
    }

    #[test]
    fn test_payload_access_errors() {
        let mut arena = Arena::new([0u8; 64]).unwrap();
        let ptr = arena.allocate(8).unwrap();

        let interior = arena.ptr_at(ptr.offset() + 1);
        assert!(arena.payload(interior).unwrap_err().is_invalid_pointer());
        assert!(arena.payload(arena.ptr_at(0)).unwrap_err().is_invalid_pointer());

        arena.free(ptr).unwrap();
        assert!(arena.payload(ptr).unwrap_err().is_not_allocated());
        assert!(arena.block_size(ptr).unwrap_err().is_not_allocated());
    }

    #[test]
    fn test_payload_access_corrupted() {
        let mut arena = Arena::new([0u8; 64]).unwrap();
        let a = arena.allocate(8).unwrap();
        let b = arena.allocate(8).unwrap();

        // overrun `a` into the header of `b`
        let offset = a.offset();
        arena.bytes_mut()[offset..offset + 16].fill(0x33);
        assert!(arena.payload(b).unwrap_err().is_corrupted());
        assert!(arena.payload(a).is_ok());
    }

    #[test]
    fn test_reset() {
        let mut arena = Arena::new([0u8; 64]).unwrap();
        let first = arena.allocate(8).unwrap();
        let second = arena.allocate(8).unwrap();
        arena.payload_mut(second).unwrap().fill(0x77);

        arena.reset();
        assert_eq!(arena.as_bytes(), Arena::new([0u8; 64]).unwrap().as_bytes());
        assert!(arena.payload(first).unwrap_err().is_invalid_pointer());
        assert!(arena.payload(second).unwrap_err().is_invalid_pointer());

        // the same offset is handed out again, but the old pointer stays dead
        let fresh = arena.allocate(8).unwrap();
        assert_eq!(fresh.offset(), first.offset());
        assert_ne!(fresh, first);
        assert!(arena.free(first).unwrap_err().is_invalid_pointer());
        assert!(arena.header_at(0).unwrap().used);
        arena.free(fresh).unwrap();
    }

    #[test]
    fn test_pointers_are_bound_to_their_arena() {
        let mut x = Arena::new([0u8; 64]).unwrap();
        let mut y = Arena::new([0u8; 64]).unwrap();
        let x_ptr = x.allocate(16).unwrap();
        let y_ptr = y.allocate(16).unwrap();
        assert_eq!(x_ptr.offset(), y_ptr.offset());
        assert_ne!(x_ptr, y_ptr);

        assert!(x.payload(y_ptr).unwrap_err().is_invalid_pointer());
        assert!(x.block_size(y_ptr).unwrap_err().is_invalid_pointer());
        assert!(x.header_at(0).unwrap().used);
        assert_eq!(y.payload(y_ptr).unwrap().len(), 16);
    }

    #[test]
    fn test_block_ptr_display() {
        let arena = Arena::new([0u8; 64]).unwrap();
        let text = arena.ptr_at(0x18).to_string();
        assert!(text.starts_with('#'));
        assert!(text.ends_with(".0@0x18"), "{text}");
    }
}
