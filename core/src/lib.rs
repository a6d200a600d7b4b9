#![no_std]

extern crate alloc;

pub mod arch;
pub mod platform;
pub mod sched;
pub mod timer;

pub(crate) mod test_support;
pub mod timer_tests;

pub use platform::{ClockId, PlatformOps, platform_ops, register_platform_ops};
pub use sched::cpu::{CpuInfo, CpuState, cpuinfo_from_id, current_cpu, idle_cpu_mask, total_processors};
pub use sched::kernel_lock::{kern_lock, kern_try_lock, kern_unlock};
pub use sched::lifecycle::{init_scheduler, init_scheduler_cpus, scheduler_shutdown};
pub use sched::migrate::{wakeup_cpu, wakeup_or_interrupt_cpu_all};
pub use sched::runloop::{runloop, runloop_pass};
pub use sched::task::Task;
pub use sched::{
    QUEUE_DEPTH, RUNLOOP_TIMER_MAX_PERIOD_US, RUNLOOP_TIMER_MIN_PERIOD_US, enqueue_bottom_half,
    enqueue_kernel_task, enqueue_thread, kern_register_timer, shutting_down,
};
pub use timer::{TIMESTAMP_MAX, Timer, TimerHeap};
