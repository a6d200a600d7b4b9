//! Platform service seam.
//!
//! The scheduler drives hardware exclusively through a table of function
//! pointers registered at boot.  The bring-up code installs the real
//! provider (see [`crate::arch`]); tests install a mock with a virtual
//! clock and a switchable current-CPU id, which is what lets multi-CPU
//! scenarios run deterministically on one thread of execution.
//!
//! Before registration every entry point falls back to a benign default so
//! early callers never fault.
//!
//! Three collaborator hooks ride alongside the hardware table: the thread
//! layer's pause callback, the memory-management service pass, and the TLB
//! invalidation drain.  They default to no-ops and are registered
//! individually, klog-backend style, by the subsystems that own them.

use core::sync::atomic::{AtomicPtr, Ordering};

/// Clock identifiers understood by `now()`.
///
/// The timer heap translates everything to the MonotonicRaw basis at
/// registration; the other ids exist for callers expressing deadlines in
/// their own domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockId {
    Monotonic,
    MonotonicRaw,
    Realtime,
}

/// The hardware services the scheduler consumes.
///
/// All timestamps and timeouts are nanoseconds.
pub struct PlatformOps {
    pub current_cpu_id: fn() -> usize,
    pub now: fn(ClockId) -> u64,
    pub send_ipi: fn(cpu: usize, vector: u8),
    pub allocate_ipi_vector: fn() -> Option<u8>,
    pub register_interrupt: fn(vector: u8, handler: fn(), label: &'static str),
    /// Program the one-shot hardware timer `timeout_ns` from now.
    pub runloop_timer: fn(timeout_ns: u64),
    /// Block until the next interrupt is delivered and handled.
    pub wait_for_interrupt: fn(),
    /// Enable interrupts, returning the previous RFLAGS for `irq_restore`.
    pub irq_enable_save: fn() -> u64,
    /// Restore the interrupt state captured by `irq_enable_save`.
    pub irq_restore: fn(flags: u64),
    pub disable_interrupts: fn(),
    pub machine_halt: fn() -> !,
}

fn default_cpu_id() -> usize {
    0
}

fn default_now(_id: ClockId) -> u64 {
    0
}

fn default_send_ipi(_cpu: usize, _vector: u8) {}

fn default_allocate_ipi_vector() -> Option<u8> {
    None
}

fn default_register_interrupt(_vector: u8, _handler: fn(), _label: &'static str) {}

fn default_runloop_timer(_timeout_ns: u64) {}

fn default_wait_for_interrupt() {
    core::hint::spin_loop();
}

fn default_irq_enable_save() -> u64 {
    0
}

fn default_irq_restore(_flags: u64) {}

fn default_disable_interrupts() {}

fn default_machine_halt() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

static DEFAULT_OPS: PlatformOps = PlatformOps {
    current_cpu_id: default_cpu_id,
    now: default_now,
    send_ipi: default_send_ipi,
    allocate_ipi_vector: default_allocate_ipi_vector,
    register_interrupt: default_register_interrupt,
    runloop_timer: default_runloop_timer,
    wait_for_interrupt: default_wait_for_interrupt,
    irq_enable_save: default_irq_enable_save,
    irq_restore: default_irq_restore,
    disable_interrupts: default_disable_interrupts,
    machine_halt: default_machine_halt,
};

static PLATFORM: AtomicPtr<PlatformOps> = AtomicPtr::new(core::ptr::null_mut());

/// Install the platform provider.  Must happen before `init_scheduler`.
pub fn register_platform_ops(ops: &'static PlatformOps) {
    PLATFORM.store(ops as *const PlatformOps as *mut PlatformOps, Ordering::Release);
}

#[inline]
pub fn platform_ops() -> &'static PlatformOps {
    let ptr = PLATFORM.load(Ordering::Acquire);
    if ptr.is_null() {
        &DEFAULT_OPS
    } else {
        // SAFETY: only &'static PlatformOps values are ever stored.
        unsafe { &*ptr }
    }
}

#[inline(always)]
pub fn current_cpu_id() -> usize {
    (platform_ops().current_cpu_id)()
}

#[inline(always)]
pub fn now(id: ClockId) -> u64 {
    (platform_ops().now)(id)
}

#[inline(always)]
pub fn send_ipi(cpu: usize, vector: u8) {
    (platform_ops().send_ipi)(cpu, vector)
}

#[inline(always)]
pub fn allocate_ipi_vector() -> Option<u8> {
    (platform_ops().allocate_ipi_vector)()
}

#[inline(always)]
pub fn register_interrupt(vector: u8, handler: fn(), label: &'static str) {
    (platform_ops().register_interrupt)(vector, handler, label)
}

#[inline(always)]
pub fn runloop_timer(timeout_ns: u64) {
    (platform_ops().runloop_timer)(timeout_ns)
}

#[inline(always)]
pub fn wait_for_interrupt() {
    (platform_ops().wait_for_interrupt)()
}

#[inline(always)]
pub fn irq_enable_save() -> u64 {
    (platform_ops().irq_enable_save)()
}

#[inline(always)]
pub fn irq_restore(flags: u64) {
    (platform_ops().irq_restore)(flags)
}

#[inline(always)]
pub fn disable_interrupts() {
    (platform_ops().disable_interrupts)()
}

#[inline(always)]
pub fn machine_halt() -> ! {
    (platform_ops().machine_halt)()
}

// ---------------------------------------------------------------------------
// Collaborator hooks
// ---------------------------------------------------------------------------

pub type HookFn = fn();

static THREAD_PAUSE_HOOK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static MM_SERVICE_HOOK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());
static TLB_FLUSH_HOOK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

#[inline]
fn call_hook(slot: &AtomicPtr<()>) {
    let ptr = slot.load(Ordering::Acquire);
    if !ptr.is_null() {
        // SAFETY: only `HookFn` values are stored in the hook slots.
        let hook: HookFn = unsafe { core::mem::transmute(ptr) };
        hook();
    }
}

/// Register the thread layer's pause callback.
///
/// The callback persists the current thread's architectural state into its
/// own context.  It MUST be idempotent: the run loop invokes it twice per
/// pass, and the second call on an already-paused thread is a no-op.
pub fn register_thread_pause_hook(hook: HookFn) {
    THREAD_PAUSE_HOOK.store(hook as *mut (), Ordering::Release);
}

/// Register the memory-management bookkeeping pass run under the kernel lock.
pub fn register_mm_service_hook(hook: HookFn) {
    MM_SERVICE_HOOK.store(hook as *mut (), Ordering::Release);
}

/// Register the drain for TLB invalidations queued against the current CPU.
pub fn register_tlb_flush_hook(hook: HookFn) {
    TLB_FLUSH_HOOK.store(hook as *mut (), Ordering::Release);
}

#[inline]
pub(crate) fn thread_pause() {
    call_hook(&THREAD_PAUSE_HOOK);
}

#[inline]
pub(crate) fn mm_service() {
    call_hook(&MM_SERVICE_HOOK);
}

#[inline]
pub(crate) fn page_invalidate_flush() {
    call_hook(&TLB_FLUSH_HOOK);
}
