//! The per-CPU run loop.
//!
//! Every CPU funnels back here after every interrupt return, syscall
//! return and voluntary yield.  One pass drains the work classes in fixed
//! priority order:
//!
//! 1. pause the interrupted thread, flush pending TLB work;
//! 2. drain the bottom-half queue (no kernel lock);
//! 3. opportunistically take the kernel lock: service expired timers,
//!    drain the run queue, run maintenance, reprogram the platform timer;
//! 4. pick a user thread, migrating to/from idle CPUs as needed, and run
//!    it, or mark this CPU idle and halt until the next interrupt.
//!
//! The loop never preempts kernel work; a CPU only suspends inside
//! `wait_for_interrupt` or while spinning on the kernel lock (interrupts
//! enabled there).

use nimbus_lib::klog_debug;

use super::cpu::{CpuInfo, CpuState, current_cpu, idle_cpu_mask, total_processors};
use super::kernel_lock::{kern_try_lock, kern_unlock};
use super::migrate::{migrate_from_self, migrate_to_self, steal_from_running};
use super::{
    RUNLOOP_TIMER_MAX_NS, RUNLOOP_TIMER_MIN_NS, bhqueue, last_timer_update, run_thunk, runqueue,
    runloop_timers, set_last_timer_update, shutting_down, timer_service,
};
use crate::platform::{self, ClockId};
use crate::timer::TIMESTAMP_MAX;

/// Drive the run loop forever.  Entered once per CPU after bring-up;
/// every interrupt return lands back in the next pass.
pub fn runloop() -> ! {
    loop {
        runloop_pass(current_cpu());
    }
}

/// One full pass of the run-loop state machine.
///
/// Exposed separately from [`runloop`] so interrupt-return glue (and the
/// test harness) can drive single iterations.
pub fn runloop_pass(ci: &CpuInfo) {
    sched_thread_pause();
    platform::disable_interrupts();
    ci.set_state(CpuState::Kernel);
    // A timer or device interrupt wakes a halted CPU without anyone doing
    // the wakeup_cpu test-and-clear; the bit comes off here instead.
    idle_cpu_mask().clear(ci.id());
    klog_debug!(
        "runloop b:{} r:{} t:{}{}",
        bhqueue().len(),
        runqueue().len(),
        ci.thread_queue.len(),
        if ci.have_kernel_lock() { " locked" } else { "" }
    );
    platform::page_invalidate_flush();

    // Bottom halves run outside the kernel lock and must not assume it:
    // they are the completion side of asynchronous I/O.
    while let Some(task) = bhqueue().dequeue() {
        run_thunk(ci, task);
    }

    let mut timer_updated = false;
    if kern_try_lock(ci) {
        timer_service(platform::now(ClockId::MonotonicRaw));

        while let Some(task) = runqueue().dequeue() {
            run_thunk(ci, task);
        }

        platform::mm_service();
        timer_updated = update_timer(ci);
        kern_unlock(ci);
    }
    // If the lock was taken elsewhere, another CPU owns timers this round.

    let mut ran_thread = false;
    if !shutting_down() {
        let total = total_processors();
        let mut task = ci.thread_queue.dequeue();
        if task.is_none() {
            // Steal from an idle CPU first (it does not need waking to give
            // up a queued thread), scanning self+1..total then 0..self so no
            // CPU is structurally favored.
            if ci.id() + 1 < total {
                task = migrate_to_self(task, ci.id() + 1, total - ci.id() - 1);
            }
            if ci.id() > 0 {
                task = migrate_to_self(task, 0, ci.id());
            }
            if task.is_none() {
                // Last resort: take a queued thread from a CPU that is busy
                // running another one.
                task = steal_from_running(ci);
            }
        } else {
            // We have work; top up idle CPUs from our own queue.
            if ci.id() + 1 < total {
                migrate_from_self(ci, ci.id() + 1, total - ci.id() - 1);
            }
            if ci.id() > 0 {
                migrate_from_self(ci, 0, ci.id());
            }
        }
        if let Some(task) = task {
            if !timer_updated && total > 1 {
                arm_migration_timer(ci);
            }
            run_thunk(ci, task);
            ran_thread = true;
        }
    }

    sched_thread_pause();
    if !ran_thread {
        kernel_sleep(ci);
    }
}

/// Recompute and program the platform one-shot timer.  Kernel lock held.
///
/// `timeout` is the coalesced delay: at least the min period (so timer
/// storms cannot swamp the CPU), at most the max period (so migration and
/// maintenance still run while the next real deadline is far out).
/// Returns whether the hardware was reprogrammed.
fn update_timer(ci: &CpuInfo) -> bool {
    let next = runloop_timers().lock().next_deadline();
    let last = last_timer_update();
    if last != 0 && next == last {
        return false;
    }
    let now = platform::now(ClockId::MonotonicRaw);
    let timeout = if next == TIMESTAMP_MAX {
        RUNLOOP_TIMER_MAX_NS
    } else {
        let delta = next.wrapping_sub(now) as i64;
        if delta > RUNLOOP_TIMER_MIN_NS as i64 {
            (delta as u64).min(RUNLOOP_TIMER_MAX_NS)
        } else {
            RUNLOOP_TIMER_MIN_NS
        }
    };
    // Record the deadline the hardware will actually fire at, which the
    // clamping may have moved off the heap deadline.
    let programmed = now.wrapping_add(timeout);
    set_last_timer_update(programmed);
    ci.set_last_timer_update(programmed);
    klog_debug!("platform timer in {} ns", timeout);
    platform::runloop_timer(timeout);
    true
}

/// Make sure a timer fires here within the max period even though Phase 2
/// did not reprogram, so the next migration cycle happens.  Multi-CPU only.
fn arm_migration_timer(ci: &CpuInfo) {
    let here = platform::now(ClockId::MonotonicRaw);
    let remaining = ci.last_timer_update().wrapping_sub(here) as i64;
    if remaining < 0 || remaining > RUNLOOP_TIMER_MAX_NS as i64 {
        klog_debug!("arming migration timer");
        platform::runloop_timer(RUNLOOP_TIMER_MAX_NS);
        ci.set_last_timer_update(here.wrapping_add(RUNLOOP_TIMER_MAX_NS));
    }
}

/// Persist the current thread's state via the thread layer's hook.
///
/// Called twice per pass; the hook is idempotent, so the second call on an
/// unchanged thread is a no-op.  Skipped entirely during shutdown.
fn sched_thread_pause() {
    if shutting_down() {
        return;
    }
    platform::thread_pause();
}

/// Mark this CPU idle and halt until an interrupt arrives.
///
/// The mask bit must be visible before the halt: a peer that sees the bit
/// and sends a wakeup IPI has to be guaranteed the IPI breaks the halt.
/// The mask's RMW plus the explicit fence provide that ordering; on
/// x86_64 the `sti; hlt` pair in `wait_for_interrupt` closes the window
/// between enabling interrupts and halting.
fn kernel_sleep(ci: &CpuInfo) {
    klog_debug!("sleep");
    ci.set_state(CpuState::Idle);
    idle_cpu_mask().set(ci.id());
    core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
    platform::wait_for_interrupt();
}
