//! Error types for recoverable heap and trace failures.
//!
//! Broken preconditions on a live heap are bugs in the calling policy and panic instead.

use thiserror::Error;

/// Errors reported when a byte range can't hold, or doesn't hold, a valid heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    /// The range can't fit the descriptor and both markers.
    #[error("heap of {size} bytes is smaller than the {required} bytes of fixed overhead")]
    TooSmall {
        /// Size of the provided range.
        size: usize,
        /// Minimum size, see [`min_heap_size`](crate::min_heap_size).
        required: usize,
    },

    /// The initial free chunk wouldn't fit in a 31-bit size.
    #[error("arena of {arena_size} bytes exceeds the largest representable chunk")]
    TooLarge {
        /// Size of the arena that would be created.
        arena_size: usize,
    },

    /// A descriptor field disagrees with the byte range it was read from.
    #[error("descriptor field `{field}` is {found}, expected {expected}")]
    Descriptor {
        /// Name of the offending field.
        field: &'static str,
        /// The stored value.
        found: u64,
        /// The value implied by the byte range.
        expected: u64,
    },

    /// A chunk header breaks a heap invariant.
    #[error("chunk at offset {offset} is corrupt: {corruption}")]
    Corrupt {
        /// Offset of the offending header.
        offset: usize,
        /// The broken invariant.
        corruption: Corruption,
    },
}

/// The invariant a corrupt chunk header breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Corruption {
    /// `prev_size` doesn't match the previous chunk's `curr_size`.
    #[error("prev_size {found} doesn't match the previous chunk's size {expected}")]
    PrevSize {
        /// The stored `prev_size`.
        found: u32,
        /// The previous chunk's `curr_size`.
        expected: u32,
    },
    /// `prev_state` doesn't match the previous chunk's `curr_state`.
    #[error("prev_state doesn't match the previous chunk's state")]
    PrevState,
    /// The chunk's extent runs past the end marker.
    #[error("chunk extends beyond the arena")]
    OutOfBounds,
    /// The begin chunk lacks its marker, or a later chunk carries it.
    #[error("begin marker misplaced")]
    BeginMarker,
    /// The walk didn't land on the end marker where the descriptor says it is.
    #[error("end marker misplaced")]
    EndMarker,
    /// The end marker isn't marked used.
    #[error("end marker isn't marked used")]
    EndState,
}

/// Errors reported while parsing or replaying an allocation trace.
#[cfg(feature = "sim")]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TraceError {
    /// The first word of a line isn't `alloc` or `free`.
    #[error("line {line}: unknown action `{word}`")]
    UnknownAction {
        /// 1-based line number.
        line: usize,
        /// The unrecognized word.
        word: alloc::string::String,
    },

    /// A line ends before all its arguments were read.
    #[error("line {line}: missing {what}")]
    Missing {
        /// 1-based line number.
        line: usize,
        /// Which argument is missing.
        what: &'static str,
    },

    /// An argument isn't an unsigned integer.
    #[error("line {line}: invalid number `{text}`")]
    InvalidNumber {
        /// 1-based line number.
        line: usize,
        /// The unparsable text.
        text: alloc::string::String,
    },

    /// A line carries words after its last argument.
    #[error("line {line}: unexpected `{text}`")]
    Unexpected {
        /// 1-based line number.
        line: usize,
        /// The first extra word.
        text: alloc::string::String,
    },

    /// An allocation reuses an id that hasn't been freed.
    #[error("allocation id {0} is still in use")]
    DuplicateId(usize),

    /// A free names an id that was never allocated or is already freed.
    #[error("allocation id {0} is unknown")]
    UnknownId(usize),
}
