//! Bounded multi-producer multi-consumer queue.
//!
//! Fixed-capacity array queue with a per-slot sequence counter.  Producers
//! and consumers claim positions with CAS loops; no locks are taken and no
//! interrupt masking is required, so the enqueue path is safe from
//! interrupt handlers and the dequeue path is safe across CPUs (the
//! cross-CPU thread migration in the scheduler dequeues from queues it
//! does not own).
//!
//! A slot's sequence tells each side whose turn it is: `seq == pos` means
//! free for the producer claiming `pos`, `seq == pos + 1` means filled for
//! the consumer claiming `pos`.  After a dequeue the slot is re-armed one
//! full lap ahead (`pos + N`).  Losing a race simply reloads the position
//! and retries; "full" and "empty" are definitive answers, not races.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    seq: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Slot<T> {
    const fn new() -> Self {
        Self {
            seq: AtomicUsize::new(0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// A bounded MPMC queue of `N` elements. `N` must be a power of two.
pub struct BoundedQueue<T, const N: usize> {
    enqueue_pos: AtomicUsize,
    dequeue_pos: AtomicUsize,
    slots: [Slot<T>; N],
}

// SAFETY: slots are handed off between producers and consumers through the
// sequence protocol; a value is written exactly once before its slot is
// published and read exactly once after it is claimed.
unsafe impl<T: Send, const N: usize> Send for BoundedQueue<T, N> {}
unsafe impl<T: Send, const N: usize> Sync for BoundedQueue<T, N> {}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "queue capacity must be a power of two");
        let slots = {
            let mut slots = [const { Slot::new() }; N];
            let mut i = 0;
            while i < N {
                slots[i].seq = AtomicUsize::new(i);
                i += 1;
            }
            slots
        };
        Self {
            enqueue_pos: AtomicUsize::new(0),
            dequeue_pos: AtomicUsize::new(0),
            slots,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Append `value`. Fails with the value back when the queue is full.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & (N - 1)];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;
            if diff == 0 {
                match self.enqueue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // Position claimed; the slot is ours until we bump seq.
                        unsafe { (*slot.value.get()).write(value) };
                        slot.seq.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                // The slot still holds a value from one lap ago: full.
                return Err(value);
            } else {
                pos = self.enqueue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Remove the oldest element, or `None` when empty.
    pub fn dequeue(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & (N - 1)];
            let seq = slot.seq.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;
            if diff == 0 {
                match self.dequeue_pos.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        // Re-arm the slot for the producer one lap ahead.
                        slot.seq.store(pos.wrapping_add(N), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.load(Ordering::Relaxed);
            }
        }
    }

    /// Racy element count; exact only while the queue is quiescent.
    #[inline]
    pub fn len(&self) -> usize {
        let tail = self.enqueue_pos.load(Ordering::Relaxed);
        let head = self.dequeue_pos.load(Ordering::Relaxed);
        tail.wrapping_sub(head).min(N)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all queued elements and restore the initial state.
    ///
    /// Only valid while no other CPU is touching the queue; used by the
    /// scheduler (re)initialization path.
    pub fn reset(&self) {
        while self.dequeue().is_some() {}
        for (i, slot) in self.slots.iter().enumerate() {
            slot.seq.store(i, Ordering::Relaxed);
        }
        self.enqueue_pos.store(0, Ordering::Relaxed);
        self.dequeue_pos.store(0, Ordering::Relaxed);
    }
}

impl<T, const N: usize> Default for BoundedQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for BoundedQueue<T, N> {
    fn drop(&mut self) {
        while self.dequeue().is_some() {}
    }
}
