//! Cooperative per-CPU run-loop scheduler.
//!
//! Three classes of work flow through here, drained in a fixed priority
//! order by every CPU's run loop: bottom-half I/O completions (`bhqueue`,
//! outside the kernel lock), kernel-lock tasks (`runqueue`, plus timer
//! expiry and maintenance), and user threads (per-CPU queues with idle-CPU
//! migration).  See [`runloop`] for the phase machine itself.

pub mod cpu;
pub mod kernel_lock;
pub mod lifecycle;
pub mod migrate;
pub mod runloop;
pub mod task;

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use nimbus_lib::BoundedQueue;
use nimbus_lib::{klog_debug, klog_fatal};
use spin::Mutex;

use crate::platform::ClockId;
use crate::timer::{Timer, TimerHeap};
use self::cpu::CpuInfo;
use self::task::Task;

/// Capacity of `bhqueue`, `runqueue` and every per-CPU thread queue.
pub const QUEUE_DEPTH: usize = 2048;

/// Floor for timer coalescing; bounds the interrupt rate.
pub const RUNLOOP_TIMER_MIN_PERIOD_US: u64 = 1_000;
/// Ceiling for timer programming; bounds migration latency.
pub const RUNLOOP_TIMER_MAX_PERIOD_US: u64 = 100_000;

pub(crate) const RUNLOOP_TIMER_MIN_NS: u64 = RUNLOOP_TIMER_MIN_PERIOD_US * 1_000;
pub(crate) const RUNLOOP_TIMER_MAX_NS: u64 = RUNLOOP_TIMER_MAX_PERIOD_US * 1_000;

pub(crate) const INVALID_VECTOR: u32 = u32::MAX;

/// Bottom-half completions, drained outside the kernel lock.
static BHQUEUE: BoundedQueue<Task, QUEUE_DEPTH> = BoundedQueue::new();
/// Kernel-lock work, drained only while holding the kernel lock.
static RUNQUEUE: BoundedQueue<Task, QUEUE_DEPTH> = BoundedQueue::new();
static RUNLOOP_TIMERS: Mutex<TimerHeap> = Mutex::new(TimerHeap::new());
/// Deadline the platform timer was last programmed to fire at.
static LAST_TIMER_UPDATE: AtomicU64 = AtomicU64::new(0);
static SHUTTING_DOWN: AtomicBool = AtomicBool::new(false);
static WAKEUP_VECTOR: AtomicU32 = AtomicU32::new(INVALID_VECTOR);
static SHUTDOWN_VECTOR: AtomicU32 = AtomicU32::new(INVALID_VECTOR);

#[inline]
pub(crate) fn bhqueue() -> &'static BoundedQueue<Task, QUEUE_DEPTH> {
    &BHQUEUE
}

#[inline]
pub(crate) fn runqueue() -> &'static BoundedQueue<Task, QUEUE_DEPTH> {
    &RUNQUEUE
}

#[inline]
pub(crate) fn runloop_timers() -> &'static Mutex<TimerHeap> {
    &RUNLOOP_TIMERS
}

#[inline]
pub(crate) fn last_timer_update() -> u64 {
    LAST_TIMER_UPDATE.load(Ordering::Acquire)
}

#[inline]
pub(crate) fn set_last_timer_update(deadline: u64) {
    LAST_TIMER_UPDATE.store(deadline, Ordering::Release);
}

#[inline]
pub fn shutting_down() -> bool {
    SHUTTING_DOWN.load(Ordering::Acquire)
}

#[inline]
pub(crate) fn set_shutting_down(value: bool) {
    SHUTTING_DOWN.store(value, Ordering::SeqCst);
}

#[inline]
pub(crate) fn wakeup_vector() -> u8 {
    WAKEUP_VECTOR.load(Ordering::Acquire) as u8
}

#[inline]
pub(crate) fn shutdown_vector() -> u8 {
    SHUTDOWN_VECTOR.load(Ordering::Acquire) as u8
}

pub(crate) fn set_ipi_vectors(wakeup: u8, shutdown: u8) {
    WAKEUP_VECTOR.store(wakeup as u32, Ordering::Release);
    SHUTDOWN_VECTOR.store(shutdown as u32, Ordering::Release);
}

// ---------------------------------------------------------------------------
// Producer API
// ---------------------------------------------------------------------------

/// Queue an I/O completion for the next run-loop pass.
///
/// Safe from interrupt context: the enqueue path is lock-free and never
/// touches the kernel lock.  A full bottom-half queue means completions are
/// being produced faster than any CPU can ever drain them, which is a bug,
/// not a load condition.
pub fn enqueue_bottom_half(task: Task) {
    if BHQUEUE.enqueue(task).is_err() {
        klog_fatal!("bhqueue overflow");
        panic!("bhqueue overflow");
    }
}

/// Queue deferred kernel work, run with the kernel lock held.
pub fn enqueue_kernel_task(task: Task) {
    if RUNQUEUE.enqueue(task).is_err() {
        klog_fatal!("runqueue overflow");
        panic!("runqueue overflow");
    }
}

/// Queue a runnable thread on a specific CPU, typically paired with
/// [`migrate::wakeup_cpu`].
///
/// Overflow is impossible by construction (at most one entry per runnable
/// thread, and threads are bounded well below the queue depth), so hitting
/// it is fatal.
pub fn enqueue_thread(ci: &CpuInfo, task: Task) {
    if ci.thread_queue.enqueue(task).is_err() {
        klog_fatal!("thread queue overflow on CPU {}", ci.id());
        panic!("thread queue overflow");
    }
}

/// Register a timer on the run-loop timer heap.
///
/// Must be called with the kernel lock held; timer mutation belongs to the
/// lock class.
pub fn kern_register_timer(
    id: ClockId,
    val: u64,
    absolute: bool,
    interval: Option<u64>,
    handler: impl Fn() + Send + Sync + 'static,
) -> Timer {
    RUNLOOP_TIMERS.lock().register(id, val, absolute, interval, handler)
}

// ---------------------------------------------------------------------------
// Internals shared by the run loop
// ---------------------------------------------------------------------------

pub(crate) fn run_thunk(ci: &CpuInfo, task: Task) {
    klog_debug!("run thunk, state {}", ci.state().as_str());
    task.run();
}

/// Expiry sweep: move every timer with `deadline <= now` onto the run
/// queue, in deadline order, re-arming periodic ones.  Called with the
/// kernel lock held.
pub(crate) fn timer_service(now: u64) {
    let mut timers = RUNLOOP_TIMERS.lock();
    while let Some(entry) = timers.pop_expired(now) {
        let callback = entry.clone();
        // The cancelled check runs again inside the thunk: cancellation
        // between sweep and execution must still suppress the handler.
        enqueue_kernel_task(Task::new(move || {
            if !callback.is_cancelled() {
                callback.invoke();
            }
        }));
        if entry.is_periodic() && !entry.is_cancelled() {
            timers.rearm_periodic(entry);
        }
    }
}
