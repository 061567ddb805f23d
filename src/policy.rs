//! Allocation policies layered on top of [`Heap`]'s navigation and mutators.
//!
//! A policy only decides which free chunk satisfies a request. Right-sizing the
//! chosen chunk, marking it used, and coalescing on release are shared by every
//! policy through the provided methods of [`Policy`].

use log::debug;

use crate::heap::{Chunk, Heap};

/// Choose free chunks to satisfy allocation requests.
///
/// Implementors only need to provide [`find`](Policy::find).
/// The policy may keep state of its own, and may use the heap's
/// extension bytes ([`Heap::extra`], [`Heap::meta_extra`]).
pub trait Policy {
    /// Find a free chunk with at least `size` usable bytes, without modifying the heap.
    fn find<const X: usize, const M: usize>(&mut self, heap: &Heap<'_, X, M>, size: usize)
        -> Option<Chunk>;

    /// Allocate a chunk with at least `size` usable bytes.
    ///
    /// The chosen chunk is split if the remainder would have any usable bytes,
    /// otherwise it's handed out whole. Returns `None` if no chunk is large enough.
    fn allocate<const X: usize, const M: usize>(
        &mut self,
        heap: &mut Heap<'_, X, M>,
        size: usize,
    ) -> Option<Chunk> {
        let Some(chunk) = self.find(heap, size) else {
            debug!("no free chunk of {} bytes", size);
            return None;
        };

        debug_assert!(heap.is_free(chunk) && heap.size(chunk) >= size);

        if heap.size(chunk) > size.saturating_add(Heap::<X, M>::HEADER_SIZE) {
            heap.split(chunk, size);
        }

        heap.mark_used(chunk);

        Some(chunk)
    }

    /// Release a chunk previously returned by [`allocate`](Policy::allocate),
    /// merging it with free neighbors.
    ///
    /// Returns the resulting free chunk.
    ///
    /// # Panics
    /// Panics if `chunk` is already free.
    #[track_caller]
    fn release<const X: usize, const M: usize>(
        &mut self,
        heap: &mut Heap<'_, X, M>,
        chunk: Chunk,
    ) -> Chunk {
        heap.mark_free(chunk);

        // the end marker is always used, so this never merges past it
        let above = heap.next(chunk);
        if heap.is_free(above) {
            heap.coalesce(above);
        }

        if heap.is_prev_free(chunk) {
            heap.coalesce(chunk)
        } else {
            chunk
        }
    }
}

/// Picks the lowest-addressed free chunk that is large enough.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstFit;

impl Policy for FirstFit {
    fn find<const X: usize, const M: usize>(
        &mut self,
        heap: &Heap<'_, X, M>,
        size: usize,
    ) -> Option<Chunk> {
        heap.chunks().find(|&chunk| heap.is_free(chunk) && heap.size(chunk) >= size)
    }
}

/// Picks the smallest free chunk that is large enough, preferring lower addresses on ties.
#[derive(Debug, Clone, Copy, Default)]
pub struct BestFit;

impl Policy for BestFit {
    fn find<const X: usize, const M: usize>(
        &mut self,
        heap: &Heap<'_, X, M>,
        size: usize,
    ) -> Option<Chunk> {
        let mut best: Option<(Chunk, usize)> = None;

        for chunk in heap.chunks() {
            let chunk_size = heap.size(chunk);

            if heap.is_free(chunk) && chunk_size >= size {
                if chunk_size == size {
                    return Some(chunk);
                }

                if best.map_or(true, |(_, best_size)| chunk_size < best_size) {
                    best = Some((chunk, chunk_size));
                }
            }
        }

        best.map(|(chunk, _)| chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const H: usize = Heap::<0, 0>::HEADER_SIZE;

    /// Lays out `free 100 | used 10 | free 50 | used 10 | free rest`.
    fn holey_heap<P: Policy>(heap: &mut Heap<'_, 0, 0>, policy: &mut P) -> (Chunk, Chunk) {
        let a = policy.allocate(heap, 100).unwrap();
        let _b = policy.allocate(heap, 10).unwrap();
        let c = policy.allocate(heap, 50).unwrap();
        let _d = policy.allocate(heap, 10).unwrap();

        assert_eq!(policy.release(heap, a), a);
        assert_eq!(policy.release(heap, c), c);
        heap.check().unwrap();

        (a, c)
    }

    #[test]
    fn first_fit_takes_lowest() {
        let mut mem = vec![0u8; 2048];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let (a, _) = holey_heap(&mut heap, &mut FirstFit);

        assert_eq!(FirstFit.allocate(&mut heap, 40), Some(a));
        assert_eq!(heap.size(a), 40);
        assert!(heap.is_free(heap.next(a)));
        heap.check().unwrap();
    }

    #[test]
    fn best_fit_takes_smallest() {
        let mut mem = vec![0u8; 2048];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let (a, c) = holey_heap(&mut heap, &mut BestFit);

        assert_eq!(BestFit.allocate(&mut heap, 40), Some(c));
        assert_eq!(BestFit.allocate(&mut heap, 100), Some(a));
        assert_eq!(BestFit.find(&heap, 2), Some(heap.next(c)));
        heap.check().unwrap();
    }

    #[test]
    fn exact_fit_is_not_split() {
        let mut mem = vec![0u8; 512];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let whole = heap.size(heap.first());

        // a remainder of zero usable bytes isn't worth a header
        let chunk = FirstFit.allocate(&mut heap, whole - H).unwrap();
        assert_eq!(heap.size(chunk), whole);
        assert_eq!(heap.chunks().count(), 1);

        FirstFit.release(&mut heap, chunk);
        let chunk = FirstFit.allocate(&mut heap, whole - H - 1).unwrap();
        assert_eq!(heap.size(chunk), whole - H - 1);
        assert_eq!(heap.size(heap.next(chunk)), 1);
        heap.check().unwrap();
    }

    #[test]
    fn exhaustion_is_not_an_error() {
        let mut mem = vec![0u8; 256];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let whole = heap.size(heap.first());

        assert_eq!(FirstFit.allocate(&mut heap, whole + 1), None);
        assert_eq!(BestFit.allocate(&mut heap, usize::MAX), None);

        let chunk = FirstFit.allocate(&mut heap, whole).unwrap();
        assert_eq!(FirstFit.allocate(&mut heap, 0), None);
        FirstFit.release(&mut heap, chunk);
        heap.check().unwrap();
    }

    #[test]
    fn release_coalesces_both_sides() {
        let mut mem = vec![0u8; 1024];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let initial = heap.header(heap.first());

        let a = FirstFit.allocate(&mut heap, 64).unwrap();
        let b = FirstFit.allocate(&mut heap, 64).unwrap();
        let c = FirstFit.allocate(&mut heap, 64).unwrap();
        assert_eq!(heap.chunks().count(), 4);

        FirstFit.release(&mut heap, a);
        FirstFit.release(&mut heap, c);
        assert_eq!(heap.chunks().count(), 3);

        let merged = FirstFit.release(&mut heap, b);
        assert_eq!(merged, a);
        assert_eq!(heap.chunks().count(), 1);
        assert_eq!(heap.header(merged), initial);
        heap.check().unwrap();
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_release_panics() {
        let mut mem = vec![0u8; 512];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let a = FirstFit.allocate(&mut heap, 16).unwrap();
        let _b = FirstFit.allocate(&mut heap, 16).unwrap();
        FirstFit.release(&mut heap, a);
        FirstFit.release(&mut heap, a);
    }

    fn alloc_free_returns_to_initial<P: Policy>(mut policy: P) {
        let mut mem = vec![0u8; 1 << 16];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let initial = heap.header(heap.first());

        for n in [1, 2, 7, 40] {
            let chunks = (0..n)
                .map(|i| policy.allocate(&mut heap, 1 + i * 13 % 300).unwrap())
                .collect::<Vec<_>>();
            heap.check().unwrap();

            // release in an interleaved order to exercise both merge directions
            let (even, odd): (Vec<_>, Vec<_>) =
                chunks.iter().enumerate().partition(|(i, _)| i % 2 == 0);
            for (_, &chunk) in even.into_iter().chain(odd) {
                policy.release(&mut heap, chunk);
                heap.check().unwrap();
            }

            assert_eq!(heap.chunks().count(), 1);
            assert_eq!(heap.header(heap.first()), initial);
        }
    }

    #[test]
    fn alloc_free_returns_to_initial_first_fit() {
        alloc_free_returns_to_initial(FirstFit);
    }

    #[test]
    fn alloc_free_returns_to_initial_best_fit() {
        alloc_free_returns_to_initial(BestFit);
    }

    fn random_actions<P: Policy>(mut policy: P) {
        let mut mem = vec![0u8; 1 << 14];
        let mut heap = Heap::<0, 0>::init(&mut mem);
        let mut live = Vec::new();

        for _ in 0..2000 {
            if fastrand::usize(0..=9) < 6 {
                let size = fastrand::usize(0..400);
                if let Some(chunk) = policy.allocate(&mut heap, size) {
                    assert!(heap.size(chunk) >= size);
                    heap.data_mut(chunk).fill(0xab);
                    live.push(chunk);
                }
            } else if !live.is_empty() {
                let chunk = live.swap_remove(fastrand::usize(0..live.len()));
                policy.release(&mut heap, chunk);
            }

            heap.check().unwrap();

            // no two free chunks are ever left adjacent
            for chunk in heap.chunks().filter(|&c| heap.is_free(c)) {
                assert!(!heap.is_prev_free(chunk));
            }
        }

        for chunk in live.drain(..) {
            policy.release(&mut heap, chunk);
        }

        assert_eq!(heap.chunks().count(), 1);
        assert_eq!(heap.stats().external_fragmentation(), 0.0);
    }

    #[test]
    fn random_actions_first_fit() {
        random_actions(FirstFit);
    }

    #[test]
    fn random_actions_best_fit() {
        random_actions(BestFit);
    }
}
