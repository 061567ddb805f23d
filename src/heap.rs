//! This module provides the chunk heap via the [`Heap`] type: initialization,
//! navigation between neighboring chunks, and the structural mutators.

use core::{fmt::Debug, ops::Range};

use log::{debug, trace};

use crate::{
    descriptor::{Descriptor, DESCRIPTOR_FIELDS_SIZE},
    descriptor_size,
    error::{Corruption, HeapError},
    header_size, min_heap_size,
    tag::{Header, State, Tag, SIZE_MARKER, TAG_SIZE},
};

/// A handle to a chunk, expressed as the offset of its header within the heap.
///
/// A [`Chunk`] is only meaningful to the [`Heap`] that produced it,
/// and only until it's absorbed by [`Heap::coalesce`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Chunk(pub(crate) usize);

impl Debug for Chunk {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Chunk({:#x})", self.0)
    }
}

impl Chunk {
    /// Offset of this chunk's header from the start of the heap.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0
    }
}

/// A boundary-tag heap over a borrowed byte range.
///
/// Every chunk starts with a header holding its own size and state as well as
/// the size and state of the chunk below it, so the heap can be walked in both
/// directions without a free list. The begin chunk's `prev` size and the end
/// chunk's `curr` size hold [`SIZE_MARKER`].
///
/// # Generic Parameters
/// - `X` bytes are reserved after each chunk's tags for the allocation policy.
/// - `M` bytes are reserved after the descriptor for the allocation policy.
///
/// [`Heap`] never reads or writes either reservation.
///
/// # Panics
/// Operations whose preconditions don't hold panic rather than corrupt the heap.
/// This includes double frees, splitting used chunks, and navigating past the markers.
pub struct Heap<'a, const X: usize = 0, const M: usize = 0> {
    mem: &'a mut [u8],
    desc: Descriptor,
}

impl<'a, const X: usize, const M: usize> Debug for Heap<'a, X, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("descriptor", &self.desc)
            .field("header_size", &Self::HEADER_SIZE)
            .finish()
    }
}

impl<'a, const X: usize, const M: usize> Heap<'a, X, M> {
    /// Size of a chunk header: the tags plus `X` extension bytes.
    pub const HEADER_SIZE: usize = header_size::<X>();
    /// Size of the descriptor: its fields plus `M` extension bytes.
    pub const DESCRIPTOR_SIZE: usize = descriptor_size::<M>();

    /// Initialize a heap over `mem`, with the whole arena as a single free chunk.
    ///
    /// # Panics
    /// Panics if `mem` is smaller than [`min_heap_size`] or if the
    /// free chunk wouldn't fit in 31 bits. See [`Heap::try_init`].
    #[track_caller]
    pub fn init(mem: &'a mut [u8]) -> Self {
        match Self::try_init(mem) {
            Ok(heap) => heap,
            Err(err) => panic!("failed to initialize heap: {}", err),
        }
    }

    /// Initialize a heap over `mem`, with the whole arena as a single free chunk.
    pub fn try_init(mem: &'a mut [u8]) -> Result<Self, HeapError> {
        let desc = Self::layout(mem.len())?;
        desc.write(&mut mem[..DESCRIPTOR_FIELDS_SIZE]);

        let mut heap = Self { mem, desc };

        let free_size = (desc.arena_size - 2 * Self::HEADER_SIZE) as u32;
        heap.write_header(
            desc.begin,
            Header {
                prev: Tag::new(SIZE_MARKER, State::Used),
                curr: Tag::new(free_size, State::Free),
            },
        );
        heap.write_header(
            desc.end,
            Header {
                prev: Tag::new(free_size, State::Free),
                curr: Tag::new(SIZE_MARKER, State::Used),
            },
        );

        debug!("initialized heap of {} bytes, {} bytes free", desc.heap_size, free_size);

        Ok(heap)
    }

    /// Re-open a byte range that already contains a heap, e.g. a dump.
    ///
    /// The descriptor must agree with `mem` and every chunk must pass [`Heap::check`].
    pub fn attach(mem: &'a mut [u8]) -> Result<Self, HeapError> {
        let desc = Self::layout(mem.len())?;

        let found = Descriptor::read(&mem[..DESCRIPTOR_FIELDS_SIZE]);
        let expected = [desc.heap_size, desc.arena, desc.arena_size, desc.begin, desc.end];
        let names = ["heap_size", "arena", "arena_size", "begin", "end"];

        for ((field, found), expected) in names.into_iter().zip(found).zip(expected) {
            if found != expected as u64 {
                return Err(HeapError::Descriptor { field, found, expected: expected as u64 });
            }
        }

        let heap = Self { mem, desc };
        heap.check()?;

        debug!("attached heap of {} bytes", desc.heap_size);

        Ok(heap)
    }

    /// Where everything lives in a heap of `heap_size` bytes.
    ///
    /// Fails if the range can't hold the markers, or if merging the whole
    /// arena into one chunk would produce a size that reads as [`SIZE_MARKER`].
    fn layout(heap_size: usize) -> Result<Descriptor, HeapError> {
        let required = min_heap_size::<X, M>();

        if heap_size < required {
            return Err(HeapError::TooSmall { size: heap_size, required });
        }

        let arena = Self::DESCRIPTOR_SIZE;
        let arena_size = heap_size - arena;

        if arena_size - 2 * Self::HEADER_SIZE >= SIZE_MARKER as usize {
            return Err(HeapError::TooLarge { arena_size });
        }

        Ok(Descriptor {
            heap_size,
            arena,
            arena_size,
            begin: arena,
            end: heap_size - Self::HEADER_SIZE,
        })
    }

    /// Release the borrow of the underlying bytes.
    pub fn into_inner(self) -> &'a mut [u8] {
        self.mem
    }

    /// Returns the heap's extent and marker positions.
    #[inline]
    pub fn descriptor(&self) -> Descriptor {
        self.desc
    }

    /// Size of the whole byte range, descriptor included.
    #[inline]
    pub fn heap_size(&self) -> usize {
        self.desc.heap_size
    }

    /// Size of the arena following the descriptor.
    #[inline]
    pub fn arena_size(&self) -> usize {
        self.desc.arena_size
    }

    #[inline]
    #[track_caller]
    fn read_tag(&self, at: usize) -> Tag {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.mem[at..at + 4]);
        Tag::from_bits(u32::from_le_bytes(bytes))
    }

    #[inline]
    #[track_caller]
    fn write_tag(&mut self, at: usize, tag: Tag) {
        self.mem[at..at + 4].copy_from_slice(&tag.to_bits().to_le_bytes());
    }

    #[inline]
    #[track_caller]
    fn prev_tag(&self, chunk: Chunk) -> Tag {
        self.read_tag(chunk.0)
    }

    #[inline]
    #[track_caller]
    fn curr_tag(&self, chunk: Chunk) -> Tag {
        self.read_tag(chunk.0 + 4)
    }

    #[inline]
    #[track_caller]
    fn set_prev_tag(&mut self, chunk: Chunk, tag: Tag) {
        self.write_tag(chunk.0, tag)
    }

    #[inline]
    #[track_caller]
    fn set_curr_tag(&mut self, chunk: Chunk, tag: Tag) {
        self.write_tag(chunk.0 + 4, tag)
    }

    #[track_caller]
    fn write_header(&mut self, at: usize, header: Header) {
        self.mem[at..at + TAG_SIZE].copy_from_slice(&header.to_bytes());
    }

    /// Decode `chunk`'s header.
    #[track_caller]
    pub fn header(&self, chunk: Chunk) -> Header {
        let mut bytes = [0u8; TAG_SIZE];
        bytes.copy_from_slice(&self.mem[chunk.0..chunk.0 + TAG_SIZE]);
        Header::from_bytes(bytes)
    }

    /// The number of usable bytes in `chunk`.
    #[inline]
    #[track_caller]
    pub fn size(&self, chunk: Chunk) -> usize {
        self.curr_tag(chunk).size() as usize
    }

    #[inline]
    #[track_caller]
    pub fn is_free(&self, chunk: Chunk) -> bool {
        self.curr_tag(chunk).is_free()
    }

    #[inline]
    #[track_caller]
    pub fn is_used(&self, chunk: Chunk) -> bool {
        self.curr_tag(chunk).is_used()
    }

    #[inline]
    #[track_caller]
    pub fn is_prev_free(&self, chunk: Chunk) -> bool {
        self.prev_tag(chunk).is_free()
    }

    #[inline]
    #[track_caller]
    pub fn is_prev_used(&self, chunk: Chunk) -> bool {
        self.prev_tag(chunk).is_used()
    }

    /* Navigation */

    #[inline]
    #[track_caller]
    pub fn is_begin(&self, chunk: Chunk) -> bool {
        self.prev_tag(chunk).is_marker()
    }

    #[inline]
    #[track_caller]
    pub fn is_end(&self, chunk: Chunk) -> bool {
        self.curr_tag(chunk).is_marker()
    }

    /// The chunk at the bottom of the arena. This is the first real chunk.
    #[inline]
    pub fn begin(&self) -> Chunk {
        Chunk(self.desc.begin)
    }

    /// The marker at the top of the arena. It has no usable bytes.
    #[inline]
    pub fn end(&self) -> Chunk {
        Chunk(self.desc.end)
    }

    #[inline]
    pub fn first(&self) -> Chunk {
        self.begin()
    }

    #[inline]
    pub fn last(&self) -> Chunk {
        self.prev(self.end())
    }

    #[inline]
    #[track_caller]
    pub fn is_first(&self, chunk: Chunk) -> bool {
        self.is_begin(chunk)
    }

    /// # Panics
    /// Panics if `chunk` is the end marker.
    #[inline]
    #[track_caller]
    pub fn is_last(&self, chunk: Chunk) -> bool {
        self.is_end(self.next(chunk))
    }

    /// The chunk directly above `chunk`.
    ///
    /// # Panics
    /// Panics if `chunk` is the end marker.
    #[inline]
    #[track_caller]
    pub fn next(&self, chunk: Chunk) -> Chunk {
        assert!(!self.is_end(chunk), "no chunk follows the end marker");

        Chunk(chunk.0 + Self::HEADER_SIZE + self.size(chunk))
    }

    /// The chunk directly below `chunk`.
    ///
    /// # Panics
    /// Panics if `chunk` is the begin chunk.
    #[inline]
    #[track_caller]
    pub fn prev(&self, chunk: Chunk) -> Chunk {
        assert!(!self.is_begin(chunk), "no chunk precedes the begin chunk");

        Chunk(chunk.0 - self.prev_tag(chunk).size() as usize - Self::HEADER_SIZE)
    }

    /// Iterate over every chunk from [`first`](Heap::first) up to, not including, the end marker.
    pub fn chunks(&self) -> Chunks<'_, 'a, X, M> {
        Chunks { heap: self, next: Some(self.first()) }
    }

    /* Chunk contents */

    /// Offsets of `chunk`'s usable bytes.
    ///
    /// # Panics
    /// Panics if `chunk` is the end marker.
    #[inline]
    #[track_caller]
    pub fn data_range(&self, chunk: Chunk) -> Range<usize> {
        assert!(!self.is_end(chunk), "the end marker has no data");

        let base = chunk.0 + Self::HEADER_SIZE;
        base..base + self.size(chunk)
    }

    #[track_caller]
    pub fn data(&self, chunk: Chunk) -> &[u8] {
        let range = self.data_range(chunk);
        &self.mem[range]
    }

    #[track_caller]
    pub fn data_mut(&mut self, chunk: Chunk) -> &mut [u8] {
        let range = self.data_range(chunk);
        &mut self.mem[range]
    }

    /// Recover the chunk whose usable bytes start at `offset`.
    ///
    /// # Panics
    /// Panics if `offset` lies below the first chunk's data.
    #[inline]
    #[track_caller]
    pub fn chunk_of_data(&self, offset: usize) -> Chunk {
        let first_data = self.desc.begin + Self::HEADER_SIZE;
        assert!(offset >= first_data, "offset {} precedes the arena", offset);

        Chunk(offset - Self::HEADER_SIZE)
    }

    /// The `X` policy-owned bytes in `chunk`'s header.
    #[track_caller]
    pub fn extra(&self, chunk: Chunk) -> &[u8; X] {
        match self.mem[chunk.0 + TAG_SIZE..].first_chunk::<X>() {
            Some(extra) => extra,
            None => panic!("{:?} lies outside the heap", chunk),
        }
    }

    #[track_caller]
    pub fn extra_mut(&mut self, chunk: Chunk) -> &mut [u8; X] {
        match self.mem[chunk.0 + TAG_SIZE..].first_chunk_mut::<X>() {
            Some(extra) => extra,
            None => panic!("{:?} lies outside the heap", chunk),
        }
    }

    /// The `M` policy-owned bytes following the descriptor.
    pub fn meta_extra(&self) -> &[u8; M] {
        match self.mem[DESCRIPTOR_FIELDS_SIZE..].first_chunk::<M>() {
            Some(extra) => extra,
            None => unreachable!(),
        }
    }

    pub fn meta_extra_mut(&mut self) -> &mut [u8; M] {
        match self.mem[DESCRIPTOR_FIELDS_SIZE..].first_chunk_mut::<M>() {
            Some(extra) => extra,
            None => unreachable!(),
        }
    }

    /* Mutators */

    /// Shrink `chunk` to `size` usable bytes and turn the rest into a new free
    /// chunk directly above.
    ///
    /// Returns the new chunk. It holds `self.size(chunk) - size - HEADER_SIZE`
    /// bytes, possibly zero.
    ///
    /// # Panics
    /// Panics if `chunk` isn't free or `size + HEADER_SIZE` exceeds its size.
    #[track_caller]
    pub fn split(&mut self, chunk: Chunk, size: usize) -> Chunk {
        assert!(self.is_free(chunk), "split of non-free {:?}", chunk);

        let chunk_size = self.size(chunk);
        assert!(
            size.checked_add(Self::HEADER_SIZE).is_some_and(|needed| needed <= chunk_size),
            "split of {:?} at {} leaves no room for a header in {} bytes",
            chunk,
            size,
            chunk_size
        );

        let above = self.next(chunk);
        let remainder = Chunk(chunk.0 + Self::HEADER_SIZE + size);
        let remainder_size = chunk_size - size - Self::HEADER_SIZE;
        assert!(size < SIZE_MARKER as usize && remainder_size < SIZE_MARKER as usize);

        let (size, remainder_size) = (size as u32, remainder_size as u32);

        self.set_curr_tag(chunk, Tag::new(size, State::Free));
        self.write_header(
            remainder.0,
            Header {
                prev: Tag::new(size, State::Free),
                curr: Tag::new(remainder_size, State::Free),
            },
        );
        self.set_prev_tag(above, Tag::new(remainder_size, State::Free));

        trace!("split {:?} into {} + {} at {:?}", chunk, size, remainder_size, remainder);

        remainder
    }

    /// Merge `chunk` into the free chunk directly below it.
    ///
    /// Returns the enlarged lower chunk. `chunk` is no longer a valid handle afterwards.
    ///
    /// # Panics
    /// Panics unless both `chunk` and the chunk below it are free.
    #[track_caller]
    pub fn coalesce(&mut self, chunk: Chunk) -> Chunk {
        assert!(self.is_free(chunk), "coalesce of non-free {:?}", chunk);
        assert!(self.is_prev_free(chunk), "coalesce of {:?} without a free chunk below", chunk);

        let below = self.prev(chunk);
        let above = self.next(chunk);
        let size = above.0 - below.0 - Self::HEADER_SIZE;
        assert!(size < SIZE_MARKER as usize, "merged chunk at {:?} would read as a marker", below);
        let size = size as u32;

        self.set_curr_tag(below, Tag::new(size, State::Free));
        self.set_prev_tag(above, Tag::new(size, State::Free));

        trace!("coalesced {:?} into {:?}, now {} bytes", chunk, below, size);

        below
    }

    /// Mark a used chunk free.
    ///
    /// # Panics
    /// Panics if `chunk` is already free (double free) or is the end marker.
    #[track_caller]
    pub fn mark_free(&mut self, chunk: Chunk) {
        assert!(!self.is_end(chunk), "the end marker can't be freed");
        assert!(self.is_used(chunk), "double free of {:?}", chunk);

        self.set_state(chunk, State::Free);
    }

    /// Mark a free chunk used.
    ///
    /// # Panics
    /// Panics if `chunk` is already used or is the end marker.
    #[track_caller]
    pub fn mark_used(&mut self, chunk: Chunk) {
        assert!(self.is_free(chunk), "{:?} is already in use", chunk);

        self.set_state(chunk, State::Used);
    }

    #[track_caller]
    fn set_state(&mut self, chunk: Chunk, state: State) {
        let above = self.next(chunk);

        let curr = self.curr_tag(chunk).with_state(state);
        let prev = self.prev_tag(above).with_state(state);
        self.set_curr_tag(chunk, curr);
        self.set_prev_tag(above, prev);

        trace!("marked {:?} {:?}", chunk, state);
    }

    /// Walk the whole heap, verifying the markers and that every header
    /// agrees with the header below it.
    pub fn check(&self) -> Result<(), HeapError> {
        let corrupt =
            |chunk: Chunk, corruption| Err(HeapError::Corrupt { offset: chunk.0, corruption });

        let mut chunk = self.begin();
        let mut below: Option<Tag> = None;

        loop {
            if chunk.0 + TAG_SIZE > self.mem.len() {
                return corrupt(chunk, Corruption::OutOfBounds);
            }

            let header = self.header(chunk);

            match below {
                None if !header.prev.is_marker() || !header.prev.is_used() => {
                    return corrupt(chunk, Corruption::BeginMarker);
                }
                Some(_) if header.prev.is_marker() => {
                    return corrupt(chunk, Corruption::BeginMarker);
                }
                Some(below) if header.prev.size() != below.size() => {
                    let corruption =
                        Corruption::PrevSize { found: header.prev.size(), expected: below.size() };
                    return corrupt(chunk, corruption);
                }
                Some(below) if header.prev.state() != below.state() => {
                    return corrupt(chunk, Corruption::PrevState);
                }
                _ => {}
            }

            if header.curr.is_marker() {
                if chunk.0 != self.desc.end {
                    return corrupt(chunk, Corruption::EndMarker);
                }
                if !header.curr.is_used() {
                    return corrupt(chunk, Corruption::EndState);
                }

                return Ok(());
            }

            if chunk.0 >= self.desc.end {
                return corrupt(chunk, Corruption::EndMarker);
            }

            let above = chunk.0 + Self::HEADER_SIZE + header.curr.size() as usize;
            if above > self.desc.end {
                return corrupt(chunk, Corruption::OutOfBounds);
            }

            below = Some(header.curr);
            chunk = Chunk(above);
        }
    }
}

/// Iterator over a heap's chunks, from the begin chunk up to the end marker.
///
/// See [`Heap::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks<'h, 'a, const X: usize, const M: usize> {
    heap: &'h Heap<'a, X, M>,
    next: Option<Chunk>,
}

impl<'h, 'a, const X: usize, const M: usize> Iterator for Chunks<'h, 'a, X, M> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.next.filter(|&chunk| !self.heap.is_end(chunk))?;
        self.next = Some(self.heap.next(chunk));
        Some(chunk)
    }
}

impl<'h, 'a, const X: usize, const M: usize> core::iter::FusedIterator for Chunks<'h, 'a, X, M> {}
