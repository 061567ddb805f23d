#![doc = include_str!("../README.md")]
#![cfg_attr(not(any(test, feature = "std")), no_std)]

#[cfg(feature = "sim")]
extern crate alloc;

#[cfg(feature = "lock_api")]
mod sync;

mod descriptor;
mod error;
mod heap;
mod policy;
mod stats;
mod tag;

#[cfg(feature = "sim")]
pub mod sim;

pub use descriptor::Descriptor;
pub use error::{Corruption, HeapError};
pub use heap::{Chunk, Chunks, Heap};
pub use policy::{BestFit, FirstFit, Policy};
pub use stats::Stats;
pub use tag::{Header, State, Tag, SIZE_MARKER, TAG_SIZE};

#[cfg(feature = "sim")]
pub use error::TraceError;
#[cfg(feature = "lock_api")]
pub use sync::{AssumeUnlockable, HeapLock};

/// Size of a chunk header carrying `X` extension bytes.
pub const fn header_size<const X: usize>() -> usize {
    TAG_SIZE + X
}

/// Size of the heap descriptor carrying `M` extension bytes.
pub const fn descriptor_size<const M: usize>() -> usize {
    descriptor::DESCRIPTOR_FIELDS_SIZE + M
}

/// The smallest byte range [`Heap::try_init`] accepts: the descriptor plus the
/// headers of the begin chunk and the end marker.
///
/// Such a heap has a single free chunk of zero usable bytes.
pub const fn min_heap_size<const X: usize, const M: usize>() -> usize {
    descriptor_size::<M>() + 2 * header_size::<X>()
}
