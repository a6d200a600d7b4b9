//! Deadline-ordered timer storage for the run loop.
//!
//! A binary min-heap keyed on `(deadline, seq)` where `seq` increases
//! monotonically per insertion, so equal deadlines pop in FIFO order.
//! Entries are refcounted: the heap holds one reference, the caller's
//! [`Timer`] handle holds another, and cancellation is a flag flip on the
//! shared entry.  Dead entries stay in the heap until a sweep or a
//! `next_deadline` query reaches them, then they are dropped.
//!
//! All deadlines are stored on the MonotonicRaw basis in nanoseconds; the
//! heap owns translation from the caller's clock id at registration time.
//!
//! Mutation is only permitted while the kernel lock is held; the spin
//! mutex wrapped around the scheduler's instance backs that discipline
//! with memory safety but is not a substitute for it.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::platform::{self, ClockId};

/// Sentinel deadline meaning "no pending timer".
pub const TIMESTAMP_MAX: u64 = u64::MAX;

type TimerCallback = Box<dyn Fn() + Send + Sync>;

/// A pending timer shared between the heap and its [`Timer`] handle.
pub struct TimerEntry {
    deadline: AtomicU64,
    /// Clock domain the caller registered against.
    clock: ClockId,
    /// Re-arm period in nanoseconds; 0 for one-shot timers.
    interval: u64,
    cancelled: AtomicBool,
    handler: TimerCallback,
}

impl TimerEntry {
    #[inline]
    pub fn deadline(&self) -> u64 {
        self.deadline.load(Ordering::Acquire)
    }

    #[inline]
    pub fn clock_id(&self) -> ClockId {
        self.clock
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_periodic(&self) -> bool {
        self.interval != 0
    }

    #[inline]
    pub(crate) fn invoke(&self) {
        (self.handler)()
    }
}

/// Cancellation handle returned by timer registration.
///
/// Dropping the handle does not cancel the timer; it merely releases the
/// caller's reference.
pub struct Timer(Arc<TimerEntry>);

impl Timer {
    /// Mark the timer dead.  The expiry sweep skips dead entries, so a
    /// cancelled timer is never applied; a cancelled periodic timer is not
    /// re-armed.
    pub fn cancel(&self) {
        self.0.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Current deadline on the MonotonicRaw basis.
    pub fn deadline(&self) -> u64 {
        self.0.deadline()
    }

    pub fn clock_id(&self) -> ClockId {
        self.0.clock_id()
    }
}

struct HeapSlot {
    deadline: u64,
    seq: u64,
    entry: Arc<TimerEntry>,
}

pub struct TimerHeap {
    slots: Vec<HeapSlot>,
    next_seq: u64,
}

impl TimerHeap {
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            next_seq: 0,
        }
    }

    #[inline]
    fn precedes(a: &HeapSlot, b: &HeapSlot) -> bool {
        (a.deadline, a.seq) < (b.deadline, b.seq)
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if Self::precedes(&self.slots[index], &self.slots[parent]) {
                self.slots.swap(index, parent);
                index = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let len = self.slots.len();
        loop {
            let left = 2 * index + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && Self::precedes(&self.slots[left], &self.slots[smallest]) {
                smallest = left;
            }
            if right < len && Self::precedes(&self.slots[right], &self.slots[smallest]) {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.slots.swap(index, smallest);
            index = smallest;
        }
    }

    fn push_slot(&mut self, deadline: u64, entry: Arc<TimerEntry>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push(HeapSlot {
            deadline,
            seq,
            entry,
        });
        self.sift_up(self.slots.len() - 1);
    }

    fn pop_slot(&mut self) -> Option<HeapSlot> {
        let len = self.slots.len();
        if len == 0 {
            return None;
        }
        self.slots.swap(0, len - 1);
        let slot = self.slots.pop();
        if !self.slots.is_empty() {
            self.sift_down(0);
        }
        slot
    }

    /// Register a timer.
    ///
    /// `val` is a deadline in `id`'s clock domain when `absolute`, else a
    /// delay from now.  Either way the stored deadline is translated onto
    /// the MonotonicRaw basis here, so the expiry sweep compares a single
    /// clock.  A past absolute deadline fires on the next sweep.
    pub fn register(
        &mut self,
        id: ClockId,
        val: u64,
        absolute: bool,
        interval: Option<u64>,
        handler: impl Fn() + Send + Sync + 'static,
    ) -> Timer {
        let now_raw = platform::now(ClockId::MonotonicRaw);
        let deadline = if absolute {
            let now_id = platform::now(id);
            now_raw.saturating_add(val.saturating_sub(now_id))
        } else {
            now_raw.saturating_add(val)
        };
        let entry = Arc::new(TimerEntry {
            deadline: AtomicU64::new(deadline),
            clock: id,
            interval: interval.unwrap_or(0),
            cancelled: AtomicBool::new(false),
            handler: Box::new(handler),
        });
        self.push_slot(deadline, entry.clone());
        Timer(entry)
    }

    /// Pop the next live entry with `deadline <= now`, dropping any dead
    /// entries encountered on the way.  Returns entries in deadline order.
    pub fn pop_expired(&mut self, now: u64) -> Option<Arc<TimerEntry>> {
        loop {
            let (deadline, cancelled) = match self.slots.first() {
                None => return None,
                Some(head) => (head.deadline, head.entry.is_cancelled()),
            };
            if cancelled {
                self.pop_slot();
                continue;
            }
            if deadline > now {
                return None;
            }
            return self.pop_slot().map(|slot| slot.entry);
        }
    }

    /// Re-insert a periodic entry at `deadline + interval`.
    pub fn rearm_periodic(&mut self, entry: Arc<TimerEntry>) {
        debug_assert!(entry.is_periodic());
        let next = entry.deadline().saturating_add(entry.interval);
        entry.deadline.store(next, Ordering::Release);
        self.push_slot(next, entry);
    }

    /// Earliest live deadline, or [`TIMESTAMP_MAX`] when nothing is pending.
    /// Dead entries reached at the top are dropped as a side effect.
    pub fn next_deadline(&mut self) -> u64 {
        loop {
            let (deadline, cancelled) = match self.slots.first() {
                None => return TIMESTAMP_MAX,
                Some(head) => (head.deadline, head.entry.is_cancelled()),
            };
            if cancelled {
                self.pop_slot();
                continue;
            }
            return deadline;
        }
    }

    /// Pending entry count, dead entries included.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.next_seq = 0;
    }
}

impl Default for TimerHeap {
    fn default() -> Self {
        Self::new()
    }
}
