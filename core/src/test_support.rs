//! Mock platform and fixture shared by the in-crate test suites.
//!
//! The mock gives the suites a virtual clock, a switchable current-CPU id
//! and recorders for IPIs, timer programming and halts, so multi-CPU
//! scheduler scenarios run deterministically on a single thread: a test
//! "moves" to another CPU by flipping `CURRENT_CPU` and driving
//! `runloop_pass` against that CPU's state.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use nimbus_lib::MAX_CPUS;
use spin::Mutex;

use crate::platform::{
    ClockId, PlatformOps, register_mm_service_hook, register_platform_ops,
    register_thread_pause_hook,
};
use crate::sched::cpu::{CpuInfo, current_cpu};
use crate::sched::lifecycle::{init_scheduler, init_scheduler_cpus};

/// Virtual time base the clock starts from; nonzero so "never programmed"
/// (timestamp 0) stays distinguishable.
pub(crate) const CLOCK_BASE_NS: u64 = 1_000_000_000;

pub(crate) static CURRENT_CPU: AtomicUsize = AtomicUsize::new(0);
pub(crate) static NOW_NS: AtomicU64 = AtomicU64::new(CLOCK_BASE_NS);
/// Offset of the Monotonic clock over MonotonicRaw, for translation tests.
pub(crate) static MONOTONIC_OFFSET_NS: AtomicU64 = AtomicU64::new(0);
static REALTIME_OFFSET_NS: AtomicU64 = AtomicU64::new(0);

static NEXT_VECTOR: AtomicU8 = AtomicU8::new(0x40);

pub(crate) static IPI_COUNTS: [AtomicU32; MAX_CPUS] = [const { AtomicU32::new(0) }; MAX_CPUS];
pub(crate) static LAST_IPI_VECTOR: [AtomicU8; MAX_CPUS] = [const { AtomicU8::new(0) }; MAX_CPUS];

pub(crate) static TIMER_PROGRAMS: AtomicU32 = AtomicU32::new(0);
pub(crate) static LAST_TIMEOUT_NS: AtomicU64 = AtomicU64::new(0);

pub(crate) static WFI_COUNT: AtomicU32 = AtomicU32::new(0);
pub(crate) static PAUSE_CALLS: AtomicU32 = AtomicU32::new(0);
pub(crate) static MM_SERVICE_CALLS: AtomicU32 = AtomicU32::new(0);

/// Ordered record of handler/task executions.
static EVENTS: Mutex<Vec<u32>> = Mutex::new(Vec::new());

pub(crate) fn push_event(value: u32) {
    EVENTS.lock().push(value);
}

pub(crate) fn events() -> Vec<u32> {
    EVENTS.lock().clone()
}

fn mock_cpu_id() -> usize {
    CURRENT_CPU.load(Ordering::Relaxed)
}

fn mock_now(id: ClockId) -> u64 {
    let raw = NOW_NS.load(Ordering::Relaxed);
    match id {
        ClockId::MonotonicRaw => raw,
        ClockId::Monotonic => raw.wrapping_add(MONOTONIC_OFFSET_NS.load(Ordering::Relaxed)),
        ClockId::Realtime => raw.wrapping_add(REALTIME_OFFSET_NS.load(Ordering::Relaxed)),
    }
}

fn mock_send_ipi(cpu: usize, vector: u8) {
    IPI_COUNTS[cpu].fetch_add(1, Ordering::Relaxed);
    LAST_IPI_VECTOR[cpu].store(vector, Ordering::Relaxed);
}

fn mock_allocate_ipi_vector() -> Option<u8> {
    Some(NEXT_VECTOR.fetch_add(1, Ordering::Relaxed))
}

fn mock_register_interrupt(_vector: u8, _handler: fn(), _label: &'static str) {}

fn mock_runloop_timer(timeout_ns: u64) {
    TIMER_PROGRAMS.fetch_add(1, Ordering::Relaxed);
    LAST_TIMEOUT_NS.store(timeout_ns, Ordering::Relaxed);
}

fn mock_wait_for_interrupt() {
    WFI_COUNT.fetch_add(1, Ordering::Relaxed);
}

fn mock_irq_enable_save() -> u64 {
    0
}

fn mock_irq_restore(_flags: u64) {}

fn mock_disable_interrupts() {}

fn mock_machine_halt() -> ! {
    panic!("machine_halt invoked under mock platform");
}

static MOCK_OPS: PlatformOps = PlatformOps {
    current_cpu_id: mock_cpu_id,
    now: mock_now,
    send_ipi: mock_send_ipi,
    allocate_ipi_vector: mock_allocate_ipi_vector,
    register_interrupt: mock_register_interrupt,
    runloop_timer: mock_runloop_timer,
    wait_for_interrupt: mock_wait_for_interrupt,
    irq_enable_save: mock_irq_enable_save,
    irq_restore: mock_irq_restore,
    disable_interrupts: mock_disable_interrupts,
    machine_halt: mock_machine_halt,
};

fn count_pause() {
    PAUSE_CALLS.fetch_add(1, Ordering::Relaxed);
}

fn count_mm_service() {
    MM_SERVICE_CALLS.fetch_add(1, Ordering::Relaxed);
}

/// Install the mock provider and wind every recorder back to zero.
pub(crate) fn install_mock_platform() {
    register_platform_ops(&MOCK_OPS);
    nimbus_lib::klog_register_cpu_id_fn(mock_cpu_id);
    register_thread_pause_hook(count_pause);
    register_mm_service_hook(count_mm_service);
    CURRENT_CPU.store(0, Ordering::Relaxed);
    NOW_NS.store(CLOCK_BASE_NS, Ordering::Relaxed);
    MONOTONIC_OFFSET_NS.store(0, Ordering::Relaxed);
    REALTIME_OFFSET_NS.store(0, Ordering::Relaxed);
    NEXT_VECTOR.store(0x40, Ordering::Relaxed);
    for count in &IPI_COUNTS {
        count.store(0, Ordering::Relaxed);
    }
    for vector in &LAST_IPI_VECTOR {
        vector.store(0, Ordering::Relaxed);
    }
    TIMER_PROGRAMS.store(0, Ordering::Relaxed);
    LAST_TIMEOUT_NS.store(0, Ordering::Relaxed);
    WFI_COUNT.store(0, Ordering::Relaxed);
    PAUSE_CALLS.store(0, Ordering::Relaxed);
    MM_SERVICE_CALLS.store(0, Ordering::Relaxed);
    EVENTS.lock().clear();
}

/// RAII fixture: fresh mock platform plus a fresh scheduler context.
pub(crate) struct SchedFixture;

impl SchedFixture {
    pub(crate) fn new(total_cpus: usize) -> Self {
        install_mock_platform();
        init_scheduler();
        init_scheduler_cpus(total_cpus);
        Self
    }

    /// Make `cpu` the calling CPU and return its state.
    pub(crate) fn on_cpu(&self, cpu: usize) -> &'static CpuInfo {
        CURRENT_CPU.store(cpu, Ordering::Relaxed);
        current_cpu()
    }

    pub(crate) fn advance_clock(&self, ns: u64) {
        NOW_NS.fetch_add(ns, Ordering::Relaxed);
    }
}
