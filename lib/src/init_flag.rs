//! One-shot initialization latch.

use core::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether a subsystem has been initialized.
///
/// `init_once()` returns `true` for exactly one caller; everyone else sees
/// `false` and must assume another CPU already did (or is doing) the work.
pub struct InitFlag(AtomicBool);

impl InitFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    /// Claim the initialization. Returns `true` if this caller won.
    #[inline]
    pub fn init_once(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Reset the latch so `init_once()` can succeed again.
    /// Only valid while no other CPU can race the subsystem.
    #[inline]
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for InitFlag {
    fn default() -> Self {
        Self::new()
    }
}
