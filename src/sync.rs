//! [`HeapLock`] guards a whole [`Heap`] with a single [`lock_api`] mutex,
//! so multiple threads can share one arena.
//!
//! Every search+split or free+coalesce sequence runs under the lock, as does the
//! statistics walk. Locking individual chunks isn't sound: marking a chunk
//! touches the header above it, and coalescing touches the header above the
//! absorbed chunk.

use crate::{
    heap::{Chunk, Heap},
    policy::Policy,
    stats::Stats,
};

/// A mutex-locked [`Heap`].
///
/// # Example
/// ```rust
/// # use tagheap::{Heap, FirstFit};
/// use spin::Mutex;
///
/// let mut mem = [0u8; 1024];
/// let heap = Heap::<0, 0>::init(&mut mem).lock::<Mutex<()>>();
///
/// let chunk = heap.allocate(&mut FirstFit, 100).unwrap();
/// heap.lock().data_mut(chunk).fill(0xab);
/// heap.release(&mut FirstFit, chunk);
///
/// assert_eq!(heap.stats().free_chunks, 1);
/// ```
#[derive(Debug)]
pub struct HeapLock<'a, R: lock_api::RawMutex, const X: usize = 0, const M: usize = 0> {
    mutex: lock_api::Mutex<R, Heap<'a, X, M>>,
}

impl<'a, R: lock_api::RawMutex, const X: usize, const M: usize> HeapLock<'a, R, X, M> {
    /// Create a new [`HeapLock`].
    pub const fn new(heap: Heap<'a, X, M>) -> Self {
        Self { mutex: lock_api::Mutex::new(heap) }
    }

    /// Lock the mutex and access the inner [`Heap`].
    ///
    /// Hold the guard for the whole of any multi-step mutation.
    #[track_caller]
    pub fn lock(&self) -> lock_api::MutexGuard<'_, R, Heap<'a, X, M>> {
        self.mutex.lock()
    }

    /// Try to lock the mutex and access the inner [`Heap`].
    pub fn try_lock(&self) -> Option<lock_api::MutexGuard<'_, R, Heap<'a, X, M>>> {
        self.mutex.try_lock()
    }

    /// Returns a mutable reference to the inner [`Heap`].
    ///
    /// This avoids locking, as having a mutable reference statically
    /// guarantees that `self` is not locked.
    pub fn get_mut(&mut self) -> &mut Heap<'a, X, M> {
        self.mutex.get_mut()
    }

    /// Retrieve the inner [`Heap`].
    pub fn into_inner(self) -> Heap<'a, X, M> {
        self.mutex.into_inner()
    }

    /// Allocate under the lock. See [`Policy::allocate`].
    pub fn allocate<P: Policy>(&self, policy: &mut P, size: usize) -> Option<Chunk> {
        policy.allocate(&mut *self.lock(), size)
    }

    /// Release under the lock. See [`Policy::release`].
    #[track_caller]
    pub fn release<P: Policy>(&self, policy: &mut P, chunk: Chunk) -> Chunk {
        policy.release(&mut *self.lock(), chunk)
    }

    /// Collect statistics under the lock. See [`Heap::stats`].
    pub fn stats(&self) -> Stats {
        self.lock().stats()
    }
}

impl<'a, const X: usize, const M: usize> Heap<'a, X, M> {
    /// Wrap in [`HeapLock`], a mutex-locked wrapper struct using [`lock_api`].
    ///
    /// # Examples
    /// ```
    /// # use tagheap::Heap;
    /// use spin::Mutex;
    ///
    /// let mut mem = [0u8; 256];
    /// let heap = Heap::<0, 0>::init(&mut mem).lock::<Mutex<()>>();
    /// assert!(heap.lock().check().is_ok());
    /// ```
    pub const fn lock<R: lock_api::RawMutex>(self) -> HeapLock<'a, R, X, M> {
        HeapLock::new(self)
    }
}

/// A [`RawMutex`](lock_api::RawMutex) that never blocks, for a [`HeapLock`]
/// that is only ever touched by one thread.
///
/// Every `lock` succeeds immediately, so two threads can hold the guard at
/// once and race on the same headers. Sharing such a [`HeapLock`] across
/// threads is undefined behaviour even though no `unsafe` appears at the call
/// site. Prefer a spin lock unless the target lacks atomics.
pub struct AssumeUnlockable;

// SAFETY: not a real mutex. Callers promise a single thread, see above.
unsafe impl lock_api::RawMutex for AssumeUnlockable {
    const INIT: AssumeUnlockable = AssumeUnlockable;

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {}

    fn try_lock(&self) -> bool {
        true
    }

    unsafe fn unlock(&self) {}
}

#[cfg(test)]
mod tests {
    use crate::FirstFit;

    use super::*;

    #[test]
    fn shared_between_threads() {
        let mut mem = vec![0u8; 1 << 17];
        let heap = Heap::<0, 0>::init(&mut mem).lock::<spin::Mutex<()>>();
        let initial = heap.stats();

        std::thread::scope(|scope| {
            for t in 0..4 {
                let heap = &heap;

                scope.spawn(move || {
                    let mut live = Vec::new();

                    for i in 0..200 {
                        if let Some(chunk) = heap.allocate(&mut FirstFit, 8 + (t * 31 + i) % 120) {
                            heap.lock().data_mut(chunk).fill(t as u8);
                            live.push(chunk);
                        }

                        if i % 2 == 1 && !live.is_empty() {
                            let chunk = live.swap_remove(0);
                            // nobody else may have touched this thread's data
                            assert!(heap.lock().data(chunk).iter().all(|&b| b == t as u8));
                            heap.release(&mut FirstFit, chunk);
                        }
                    }

                    for chunk in live {
                        heap.release(&mut FirstFit, chunk);
                    }
                });
            }
        });

        let heap = heap.into_inner();
        heap.check().unwrap();
        assert_eq!(heap.stats(), initial);
    }

    #[test]
    fn try_lock_while_locked() {
        let mut mem = vec![0u8; 512];
        let mut heap = Heap::<0, 0>::init(&mut mem).lock::<spin::Mutex<()>>();

        {
            let _guard = heap.lock();
            assert!(heap.try_lock().is_none());
        }
        assert!(heap.try_lock().is_some());

        let begin = heap.get_mut().begin();
        assert!(heap.get_mut().is_free(begin));
    }

    #[test]
    fn assume_unlockable() {
        let mut mem = vec![0u8; 512];
        let heap = Heap::<0, 0>::init(&mut mem).lock::<AssumeUnlockable>();

        let chunk = heap.allocate(&mut FirstFit, 32).unwrap();
        assert_eq!(heap.stats().used_chunks, 1);
        heap.release(&mut FirstFit, chunk);
        assert_eq!(heap.stats().used_chunks, 0);
    }
}
