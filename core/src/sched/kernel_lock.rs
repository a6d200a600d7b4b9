//! The global kernel lock.
//!
//! A single flat spin lock guarding all lock-class work: the run queue,
//! the timer heap and periodic maintenance.  Ownership is mirrored into
//! the per-CPU `have_kernel_lock` flag so nested entry and the shutdown
//! path can assert correctness.

use core::sync::atomic::{AtomicBool, Ordering};

use nimbus_lib::klog_fatal;

use super::cpu::{CpuInfo, CpuState};
use crate::platform;

static KERNEL_LOCK: AtomicBool = AtomicBool::new(false);

#[inline]
fn try_acquire() -> bool {
    KERNEL_LOCK
        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
        .is_ok()
}

/// Acquire the kernel lock, spinning until it is free.
///
/// The spin runs with interrupts *enabled* so IPIs the current holder may
/// depend on still get delivered; the previous (disabled) interrupt state
/// is restored before returning, so the caller enters its critical section
/// atomically.
pub fn kern_lock(ci: &CpuInfo) {
    if ci.state() != CpuState::Kernel {
        klog_fatal!("kern_lock on CPU {} in state {}", ci.id(), ci.state().as_str());
        panic!("kern_lock outside kernel state");
    }
    let flags = platform::irq_enable_save();
    while !try_acquire() {
        core::hint::spin_loop();
    }
    ci.set_have_kernel_lock(true);
    platform::irq_restore(flags);
}

/// Acquire the kernel lock only if it is immediately free.
///
/// Never valid from interrupt state: interrupt handlers may only push to
/// the bottom-half queue.
pub fn kern_try_lock(ci: &CpuInfo) -> bool {
    if ci.state() == CpuState::Interrupt {
        klog_fatal!("kern_try_lock from interrupt state on CPU {}", ci.id());
        panic!("kern_try_lock from interrupt state");
    }
    if !try_acquire() {
        return false;
    }
    ci.set_have_kernel_lock(true);
    true
}

pub fn kern_unlock(ci: &CpuInfo) {
    if ci.state() == CpuState::Interrupt {
        klog_fatal!("kern_unlock from interrupt state on CPU {}", ci.id());
        panic!("kern_unlock from interrupt state");
    }
    if !ci.have_kernel_lock() {
        klog_fatal!("kern_unlock without ownership on CPU {}", ci.id());
        panic!("kern_unlock without ownership");
    }
    ci.set_have_kernel_lock(false);
    KERNEL_LOCK.store(false, Ordering::Release);
}

/// Force the lock back to its initial state.  (Re)initialization only.
pub(crate) fn reset() {
    KERNEL_LOCK.store(false, Ordering::Release);
}
