//! Scheduler lifecycle: initialization, SMP bring-up, shutdown.

use nimbus_lib::{MAX_CPUS, klog_fatal, klog_info};

use super::cpu::{cpuinfo_from_id, idle_cpu_mask, set_total_processors};
use super::migrate::broadcast_shutdown;
use super::{
    bhqueue, kernel_lock, runloop_timers, runqueue, set_ipi_vectors, set_last_timer_update,
    set_shutting_down,
};
use crate::platform;

/// Wakeup IPI handler.  Intentionally empty: delivery alone breaks the
/// target CPU out of its halt, and the next run-loop pass does the rest.
fn wakeup_ipi() {}

/// Shutdown IPI handler.
fn shutdown_ipi() {
    platform::machine_halt();
}

/// Initialize the global scheduler state.
///
/// Requires the platform provider to be registered first; failing to get
/// the two IPI vectors is fatal at boot.  Re-running resets queues, timers
/// and flags; tests use that to construct a fresh context.
pub fn init_scheduler() {
    kernel_lock::reset();
    bhqueue().reset();
    runqueue().reset();
    runloop_timers().lock().clear();
    set_last_timer_update(0);
    set_shutting_down(false);

    let Some(wakeup) = platform::allocate_ipi_vector() else {
        klog_fatal!("init_scheduler: out of IPI vectors");
        panic!("init_scheduler: out of IPI vectors");
    };
    platform::register_interrupt(wakeup, wakeup_ipi, "wakeup ipi");
    let Some(shutdown) = platform::allocate_ipi_vector() else {
        klog_fatal!("init_scheduler: out of IPI vectors");
        panic!("init_scheduler: out of IPI vectors");
    };
    platform::register_interrupt(shutdown, shutdown_ipi, "shutdown ipi");
    set_ipi_vectors(wakeup, shutdown);

    klog_info!(
        "scheduler ready, wakeup vector {:#x}, shutdown vector {:#x}",
        wakeup,
        shutdown
    );
}

/// Size the per-CPU tables once SMP bring-up knows the processor count.
pub fn init_scheduler_cpus(total: usize) {
    if total == 0 || total > MAX_CPUS {
        panic!("init_scheduler_cpus: bad processor count {}", total);
    }
    set_total_processors(total);
    idle_cpu_mask().clear_all();
    for cpu in 0..MAX_CPUS {
        cpuinfo_from_id(cpu).reset(cpu < total);
    }
    klog_info!("scheduling on {} processor(s)", total);
}

/// Stop scheduling everywhere.
///
/// Every CPU skips thread selection on its next run-loop pass and halts;
/// the broadcast IPI pulls halted CPUs straight into `machine_halt`.  No
/// queue cleanup: the kernel is ending.
pub fn scheduler_shutdown() {
    set_shutting_down(true);
    broadcast_shutdown();
}
