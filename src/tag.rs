//! A `Tag` is a 31-bit size with the chunk state in the most significant bit.
//!
//! Every chunk header is two tags: the previous chunk's size and state,
//! followed by this chunk's size and state.

/// The reserved size denoting "no previous chunk" on the begin chunk's
/// `prev` tag or "no next chunk" on the end chunk's `curr` tag.
pub const SIZE_MARKER: u32 = (1 << 31) - 1;

/// Byte size of the two packed tags at the start of every header.
pub const TAG_SIZE: usize = 2 * core::mem::size_of::<u32>();

/// Whether a chunk is available for allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Available to the allocation policy.
    Free = 0,
    /// Handed out by the allocation policy, or a marker.
    Used = 1,
}

/// A packed `(size, state)` pair as it is stored in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Tag(pub(crate) u32);

impl core::fmt::Debug for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut debug_struct = f.debug_struct("Tag");

        if self.is_marker() {
            debug_struct.field("size", &format_args!("MARKER"));
        } else {
            debug_struct.field("size", &self.size());
        }

        debug_struct.field("state", &self.state()).finish()
    }
}

impl Tag {
    pub const USED_FLAG: u32 = 1 << 31;
    const SIZE_MASK: u32 = !Self::USED_FLAG;

    /// # Panics
    /// Panics if `size` doesn't fit in 31 bits.
    #[inline]
    #[track_caller]
    pub const fn new(size: u32, state: State) -> Self {
        assert!(size <= SIZE_MARKER, "chunk sizes are limited to 31 bits");

        match state {
            State::Free => Self(size),
            State::Used => Self(size | Self::USED_FLAG),
        }
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn to_bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn size(self) -> u32 {
        self.0 & Self::SIZE_MASK
    }

    #[inline]
    pub const fn state(self) -> State {
        if self.0 & Self::USED_FLAG != 0 {
            State::Used
        } else {
            State::Free
        }
    }

    #[inline]
    pub const fn is_free(self) -> bool {
        self.0 & Self::USED_FLAG == 0
    }

    #[inline]
    pub const fn is_used(self) -> bool {
        self.0 & Self::USED_FLAG != 0
    }

    #[inline]
    pub const fn is_marker(self) -> bool {
        self.size() == SIZE_MARKER
    }

    #[inline]
    #[track_caller]
    pub const fn with_size(self, size: u32) -> Self {
        assert!(size <= SIZE_MARKER, "chunk sizes are limited to 31 bits");
        Self((self.0 & Self::USED_FLAG) | size)
    }

    #[inline]
    pub const fn with_state(self, state: State) -> Self {
        match state {
            State::Free => Self(self.0 & Self::SIZE_MASK),
            State::Used => Self(self.0 | Self::USED_FLAG),
        }
    }
}

/// A decoded chunk header.
///
/// # Layout
/// ```not_rust
/// byte  0        4        8            8 + X
///       ├─prev───┼─curr───┼─extra (X)──┤ data ...
/// ```
/// Each tag is a little-endian `u32`, size in bits `0..31`, state in bit 31.
/// Read as one little-endian `u64`, `prev` is the low half.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Header {
    /// The previous chunk's size and state.
    pub prev: Tag,
    /// This chunk's size and state.
    pub curr: Tag,
}

impl Header {
    #[inline]
    pub fn from_bytes(bytes: [u8; TAG_SIZE]) -> Self {
        let packed = u64::from_le_bytes(bytes);
        Self { prev: Tag(packed as u32), curr: Tag((packed >> 32) as u32) }
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; TAG_SIZE] {
        (self.prev.0 as u64 | (self.curr.0 as u64) << 32).to_le_bytes()
    }
}
