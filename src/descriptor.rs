//! The heap descriptor written at the bottom of every heap.

/// Byte size of the descriptor's fixed fields, not counting the policy's extension bytes.
pub const DESCRIPTOR_FIELDS_SIZE: usize = 5 * core::mem::size_of::<u64>();

/// Describes the extent of a heap and where its begin and end chunks live.
///
/// All positions are byte offsets from the start of the heap's byte range.
///
/// # Layout
///
/// ```not_rust
///     ├──────────────────────────────Heap────────────────────────────────────┤
/// ────┬────────────┬───────┬─────────────┬────────┬──────────────────┬───────┬────
/// ... | Descriptor | Extra | Begin chunk | ...... | Last chunk       |  End  | ...
/// ────┴────────────┴───────┴─────────────┴────────┴──────────────────┴───────┴────
///                          ├──────────────────Arena──────────────────────────┤
/// ```
///
/// The descriptor fields are five little-endian `u64`s in declaration order,
/// followed by `M` bytes owned by the allocation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor {
    /// Size of the whole byte range, descriptor included.
    pub heap_size: usize,
    /// Offset of the arena, which immediately follows the descriptor.
    pub arena: usize,
    /// Size of the arena, both markers included.
    pub arena_size: usize,
    /// Offset of the begin chunk's header.
    pub begin: usize,
    /// Offset of the end chunk's header.
    pub end: usize,
}

impl Descriptor {
    pub(crate) fn read(bytes: &[u8]) -> [u64; 5] {
        let mut fields = [0u64; 5];

        for (i, field) in fields.iter_mut().enumerate() {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[i * 8..i * 8 + 8]);
            *field = u64::from_le_bytes(word);
        }

        fields
    }

    pub(crate) fn write(&self, bytes: &mut [u8]) {
        let fields = [self.heap_size, self.arena, self.arena_size, self.begin, self.end];

        for (i, field) in fields.iter().enumerate() {
            bytes[i * 8..i * 8 + 8].copy_from_slice(&(*field as u64).to_le_bytes());
        }
    }
}
