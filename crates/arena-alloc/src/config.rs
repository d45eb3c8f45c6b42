//! Arena configuration.

use derive_more::IsVariant;

use crate::header::HEADER_SIZE;

/// How arena bytes are prepared at initialization.
///
/// The same byte is used to scrub headers that disappear when blocks are
/// coalesced. With [`Zero`](Self::Zero) and [`Pattern`](Self::Pattern) a fully
/// freed arena is therefore byte-for-byte equal to a freshly initialized one
/// (apart from payload bytes written by callers). [`Keep`](Self::Keep) has no
/// byte to restore, so the places where split headers once sat read as zero.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, IsVariant)]
pub enum Fill {
    /// Zero the whole buffer.
    #[default]
    Zero,
    /// Leave the buffer as supplied; only headers are written, and absorbed
    /// headers are scrubbed with zero.
    Keep,
    /// Fill the whole buffer with a byte pattern.
    Pattern(u8),
}

impl Fill {
    /// Byte written over the whole buffer at initialization, if any.
    #[must_use]
    pub const fn init_byte(self) -> Option<u8> {
        match self {
            Self::Zero => Some(0),
            Self::Keep => None,
            Self::Pattern(byte) => Some(byte),
        }
    }

    /// Byte written over headers absorbed by coalescing.
    #[must_use]
    pub const fn scrub_byte(self) -> u8 {
        match self {
            Self::Zero | Self::Keep => 0,
            Self::Pattern(byte) => byte,
        }
    }
}

/// Configuration applied when an arena is initialized.
///
/// # Examples
///
/// ```
/// use arena_alloc::{ArenaConfig, Fill};
///
/// let config = ArenaConfig::new().with_align(4).with_fill(Fill::Keep);
/// assert_eq!(config.align(), 4);
/// assert_eq!(config.fill(), Fill::Keep);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaConfig {
    align: usize,
    fill: Fill,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ArenaConfig {
    /// Alignment unit used unless configured otherwise.
    pub const DEFAULT_ALIGN: usize = 8;

    /// Creates the default configuration: 8-byte alignment, zero fill.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            align: Self::DEFAULT_ALIGN,
            fill: Fill::Zero,
        }
    }

    /// Sets the alignment unit that request sizes are rounded up to.
    ///
    /// Must be a power of two no larger than [`HEADER_SIZE`]; this is checked
    /// when the arena is initialized.
    #[must_use]
    pub const fn with_align(mut self, align: usize) -> Self {
        self.align = align;
        self
    }

    /// Sets how the buffer is prepared at initialization.
    #[must_use]
    pub const fn with_fill(mut self, fill: Fill) -> Self {
        self.fill = fill;
        self
    }

    #[must_use]
    pub const fn align(&self) -> usize {
        self.align
    }

    #[must_use]
    pub const fn fill(&self) -> Fill {
        self.fill
    }

    /// Smallest free remainder worth splitting off: a header plus one
    /// alignment unit of payload.
    #[must_use]
    pub const fn min_split(&self) -> usize {
        HEADER_SIZE + self.align
    }

    pub(crate) const fn is_valid_align(&self) -> bool {
        self.align.is_power_of_two() && self.align <= HEADER_SIZE
    }
}
