//! Best-fit block allocator over a single fixed-capacity arena.
//!
//! This crate serves variable-sized requests out of one contiguous byte buffer
//! that is supplied once and never grows. It never calls a system allocator,
//! which makes it usable on targets with no heap at all and in code paths that
//! must not touch the global allocator.
//!
//! # Design
//!
//! Every block is a fixed-size [`Header`] followed by its payload. Blocks keep
//! no links to each other: the header of the next block starts right after the
//! current payload, so the whole structure is one chain that is derived from
//! the sizes alone. All positions are arena-relative offsets.
//!
//! - **Allocation** ([`Arena::allocate`]): best fit. The smallest free block
//!   that can hold the request is chosen and split when the remainder can
//!   stand on its own.
//! - **Deallocation** ([`Arena::free`]): the pointer is validated against the
//!   chain, then the block is merged with any free neighbour on either side.
//! - **Introspection** ([`Arena::iterate_blocks`], [`Arena::check`],
//!   [`Arena::dump`]): read-only views used for diagnostics.
//!
//! # Usage Example
//!
//! ```rust
//! use arena_alloc::{Arena, ArenaConfig, Fill};
//!
//! let config = ArenaConfig::new().with_align(4).with_fill(Fill::Zero);
//! let mut arena = Arena::with_config([0u8; 1024], config).unwrap();
//!
//! let a = arena.allocate(100).unwrap();
//! let b = arena.allocate(200).unwrap();
//! arena.payload_mut(a).unwrap()[0] = 42;
//!
//! arena.free(b).unwrap();
//! assert!(arena.free(b).unwrap_err().is_double_free());
//! arena.free(a).unwrap();
//!
//! // everything coalesced back into one free block
//! assert_eq!(arena.iterate_blocks().count(), 1);
//! ```
//!
//! # Thread Safety
//!
//! [`Arena`] is `Send` when its storage is, but it has no internal locking.
//! Every mutating call takes `&mut self`; share an arena between threads only
//! behind a mutex that is held for the whole call.
//!
//! # Performance Characteristics
//!
//! - **Allocation**: O(n) in the number of blocks (full best-fit scan)
//! - **Deallocation**: O(n) in the number of blocks (pointer validation walk)
//! - **Memory Overhead**: 8 bytes per block
//! - **Fragmentation**: adjacent free blocks are always merged eagerly

#![cfg_attr(not(test), no_std)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod allocate;
mod arena;
mod blocks;
mod chain;
mod config;
mod free;
mod header;
mod location;

pub use self::{
    allocate::AllocError,
    arena::{AccessError, Arena, BlockPtr, InitError, InlineArena},
    blocks::{ArenaStats, BlockInfo, Blocks, Dump},
    chain::CorruptionError,
    config::{ArenaConfig, Fill},
    free::FreeError,
    header::{HEADER_SIZE, Header, HeaderError, MAX_CAPACITY},
    location::Location,
};
