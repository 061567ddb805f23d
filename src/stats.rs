//! Measure fragmentation and metadata overhead of a [`Heap`].

use crate::heap::Heap;

/// A snapshot of a heap's chunk statistics, see [`Heap::stats`].
///
/// # Example
///
/// ```
/// # use tagheap::Heap;
/// let mut mem = [0u8; 1024];
/// let heap = Heap::<0, 0>::init(&mut mem);
/// let stats = heap.stats();
/// assert_eq!(stats.free_chunks, 1);
/// assert_eq!(stats.external_fragmentation(), 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stats {
    /// Size of the whole byte range, descriptor included.
    pub heap_size: usize,

    /// Sum of free chunks' usable bytes.
    pub free_size: usize,
    /// Usable bytes of the largest free chunk.
    pub largest_free: usize,
    /// Number of free chunks.
    pub free_chunks: usize,

    /// Sum of used chunks' usable bytes.
    pub used_size: usize,
    /// Number of used chunks.
    pub used_chunks: usize,

    /// Bytes taken up by the descriptor and chunk headers.
    pub meta_size: usize,
}

impl Stats {
    /// External fragmentation: `1 - largest_free / free_size`.
    ///
    /// `0.0` when all free memory is a single chunk, approaching `1.0` as free
    /// memory is scattered among many small chunks. When there's no free memory
    /// at all, this is `1.0`.
    pub fn external_fragmentation(&self) -> f64 {
        if self.free_size == 0 {
            1.0
        } else {
            1.0 - self.largest_free as f64 / self.free_size as f64
        }
    }

    /// The share of free memory available in a single chunk: `largest_free / free_size`.
    ///
    /// This is the complement of [`external_fragmentation`](Stats::external_fragmentation)
    /// except that it's also `1.0` when there's no free memory.
    pub fn largest_free_ratio(&self) -> f64 {
        if self.free_size == 0 {
            1.0
        } else {
            self.largest_free as f64 / self.free_size as f64
        }
    }

    /// Metadata overhead: `meta_size / heap_size`, or `0.0` for an empty [`Stats`].
    pub fn metadata_ratio(&self) -> f64 {
        if self.heap_size == 0 {
            0.0
        } else {
            self.meta_size as f64 / self.heap_size as f64
        }
    }
}

impl core::fmt::Display for Stats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            r#"Stat                 | Bytes               | Chunks
---------------------|---------------------|--------------------
Free                 | {:>19} | {:>19}
Largest Free         | {:>19} |                 N/A
Used                 | {:>19} | {:>19}
Metadata             | {:>19} |                 N/A
Heap                 | {:>19} |                 N/A
External Frag.       | {:>19.4} |                 N/A
Metadata Ratio       | {:>19.4} |                 N/A"#,
            self.free_size,
            self.free_chunks,
            self.largest_free,
            self.used_size,
            self.used_chunks,
            self.meta_size,
            self.heap_size,
            self.external_fragmentation(),
            self.metadata_ratio(),
        )
    }
}

impl<'a, const X: usize, const M: usize> Heap<'a, X, M> {
    /// Walk every chunk and collect fragmentation and metadata statistics.
    ///
    /// This is linear in the number of chunks.
    pub fn stats(&self) -> Stats {
        let mut stats = Stats { heap_size: self.heap_size(), ..Stats::default() };
        let mut chunk_bytes = 0;

        for chunk in self.chunks() {
            let size = self.size(chunk);
            chunk_bytes += size;

            if self.is_free(chunk) {
                stats.free_size += size;
                stats.free_chunks += 1;
                stats.largest_free = stats.largest_free.max(size);
            } else {
                stats.used_size += size;
                stats.used_chunks += 1;
            }
        }

        stats.meta_size = stats.heap_size - chunk_bytes;
        stats
    }
}
