//! Lock-free CPU bitmap.
//!
//! One bit per logical CPU, mutated with atomic read-modify-writes so any
//! CPU can flip any bit without a lock.  The scheduler uses an instance of
//! this as the idle mask: readers take racy snapshots by design (a CPU may
//! appear idle just as it wakes), and the queues downstream absorb the
//! resulting double-claims.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::MAX_CPUS;

const WORD_BITS: usize = 64;
const MASK_WORDS: usize = MAX_CPUS.div_ceil(WORD_BITS);

pub struct CpuMask {
    words: [AtomicU64; MASK_WORDS],
}

impl CpuMask {
    pub const fn new() -> Self {
        Self {
            words: [const { AtomicU64::new(0) }; MASK_WORDS],
        }
    }

    #[inline]
    fn word_and_bit(cpu: usize) -> (usize, u64) {
        (cpu / WORD_BITS, 1u64 << (cpu % WORD_BITS))
    }

    /// Set the bit for `cpu`.
    ///
    /// Sequentially consistent so that a waker scanning the mask after this
    /// store is guaranteed to observe it (the set-then-halt protocol relies
    /// on the ordering against the halting CPU's queue reads).
    #[inline]
    pub fn set(&self, cpu: usize) {
        debug_assert!(cpu < MAX_CPUS);
        let (word, bit) = Self::word_and_bit(cpu);
        self.words[word].fetch_or(bit, Ordering::SeqCst);
    }

    /// Clear the bit for `cpu`, returning its prior value.
    ///
    /// This doubles as the test-and-clear used by `wakeup_cpu`: exactly one
    /// of several racing wakers observes `true`.
    #[inline]
    pub fn clear(&self, cpu: usize) -> bool {
        debug_assert!(cpu < MAX_CPUS);
        let (word, bit) = Self::word_and_bit(cpu);
        self.words[word].fetch_and(!bit, Ordering::SeqCst) & bit != 0
    }

    #[inline]
    pub fn get(&self, cpu: usize) -> bool {
        debug_assert!(cpu < MAX_CPUS);
        let (word, bit) = Self::word_and_bit(cpu);
        self.words[word].load(Ordering::SeqCst) & bit != 0
    }

    /// Index of the first set bit in `[start, start + count)`, or `None`.
    ///
    /// The scan is a snapshot: bits may flip while it runs.
    pub fn first_set_in_range(&self, start: usize, count: usize) -> Option<usize> {
        if start >= MAX_CPUS || count == 0 {
            return None;
        }
        let end = MAX_CPUS.min(start.saturating_add(count));
        let mut bit = start;
        while bit < end {
            let word = self.words[bit / WORD_BITS].load(Ordering::SeqCst) >> (bit % WORD_BITS);
            if word == 0 {
                // Next word boundary.
                bit = (bit / WORD_BITS + 1) * WORD_BITS;
                continue;
            }
            let found = bit + word.trailing_zeros() as usize;
            // `found` is the first set bit at or after `bit`; later words
            // only hold higher indices, so out of range here means out of
            // range everywhere.
            return if found < end { Some(found) } else { None };
        }
        None
    }

    pub fn clear_all(&self) {
        for word in &self.words {
            word.store(0, Ordering::SeqCst);
        }
    }
}

impl Default for CpuMask {
    fn default() -> Self {
        Self::new()
    }
}
