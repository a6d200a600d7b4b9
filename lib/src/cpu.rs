//! CPU flag and halt primitives.
//!
//! The handful of instructions the scheduler reaches for directly,
//! scoped to its two uses: the interrupt-flag dance around the
//! kernel-lock spin (the lock spins with interrupts open so IPIs keep
//! landing, then closes them again before the critical section), and the
//! halt loop a CPU parks in once the shutdown IPI has fired.  Everything
//! else hardware-facing goes through the `x86_64` crate in the platform
//! provider.

use core::arch::asm;

use bitflags::bitflags;

bitflags! {
    /// RFLAGS bits consulted when deciding whether a saved flags word had
    /// the interrupt window open.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RFlags: u64 {
        const CARRY = 1 << 0;
        const ZERO = 1 << 6;
        const SIGN = 1 << 7;
        const INTERRUPT = 1 << 9;
        const DIRECTION = 1 << 10;
    }
}

/// Open the interrupt window (STI).
///
/// `kern_lock` runs its spin under this so wakeup and shutdown IPIs are
/// delivered while the CPU waits for the current holder.
#[inline(always)]
pub fn enable_interrupts() {
    unsafe {
        asm!("sti", options(nomem, nostack));
    }
}

/// Close the interrupt window (CLI).  Every run-loop pass begins here,
/// and `irq_restore` lands here when the saved flags had IF clear.
#[inline(always)]
pub fn disable_interrupts() {
    unsafe {
        asm!("cli", options(nomem, nostack));
    }
}

/// Snapshot RFLAGS.
///
/// Taken just before `enable_interrupts` in the lock path so the prior
/// interrupt state can be reinstated once the lock is held; test the
/// result against [`RFlags::INTERRUPT`].
#[inline(always)]
pub fn read_rflags() -> u64 {
    let flags: u64;
    unsafe {
        asm!("pushfq; pop {}", out(reg) flags, options(nomem, preserves_flags));
    }
    flags
}

/// Stop until the next interrupt (HLT).
#[inline(always)]
pub fn halt() {
    unsafe {
        asm!("hlt", options(nomem, nostack, preserves_flags));
    }
}

/// Park this CPU for good.
///
/// The tail of `machine_halt`: called with interrupts already closed, so
/// nothing short of INIT brings the CPU back out of here.
#[inline(always)]
pub fn halt_loop() -> ! {
    loop {
        halt();
    }
}
