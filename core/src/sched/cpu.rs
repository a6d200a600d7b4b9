//! Per-CPU execution state.
//!
//! One [`CpuInfo`] per logical CPU, created at SMP bring-up and never
//! destroyed.  Each CPU owns its own entry: the state field and timer
//! stamp are written only by that CPU, while the thread queue and the
//! state *reads* are shared (migration dequeues across CPUs, and the
//! migration scan takes racy snapshots of peer states; that staleness is
//! part of the protocol).

use core::ptr;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU8, AtomicU64, AtomicUsize, Ordering};

use nimbus_lib::{BoundedQueue, CpuMask, MAX_CPUS};

use super::QUEUE_DEPTH;
use super::task::Task;
use crate::platform;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CpuState {
    NotPresent = 0,
    Idle = 1,
    Kernel = 2,
    Interrupt = 3,
    User = 4,
}

impl CpuState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => CpuState::Idle,
            2 => CpuState::Kernel,
            3 => CpuState::Interrupt,
            4 => CpuState::User,
            _ => CpuState::NotPresent,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CpuState::NotPresent => "not present",
            CpuState::Idle => "idle",
            CpuState::Kernel => "kernel",
            CpuState::Interrupt => "interrupt",
            CpuState::User => "user",
        }
    }
}

pub struct CpuInfo {
    id: u32,
    state: AtomicU8,
    /// Threads runnable on this CPU.  MPMC: peers dequeue during migration.
    pub thread_queue: BoundedQueue<Task, QUEUE_DEPTH>,
    /// Deadline this CPU last programmed the platform timer for.
    last_timer_update: AtomicU64,
    have_kernel_lock: AtomicBool,
    /// Suspended execution context of the interrupted thread, owned by the
    /// thread layer; opaque to the scheduler.
    current_frame: AtomicPtr<()>,
}

impl CpuInfo {
    const fn new() -> Self {
        Self {
            id: 0,
            state: AtomicU8::new(CpuState::NotPresent as u8),
            thread_queue: BoundedQueue::new(),
            last_timer_update: AtomicU64::new(0),
            have_kernel_lock: AtomicBool::new(false),
            current_frame: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id as usize
    }

    #[inline]
    pub fn state(&self) -> CpuState {
        CpuState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Transition the CPU's state.  Only the CPU itself may call this
    /// (other CPUs observe, they never write), except for test setup.
    #[inline]
    pub fn set_state(&self, state: CpuState) {
        self.state.store(state as u8, Ordering::Release);
    }

    #[inline]
    pub fn have_kernel_lock(&self) -> bool {
        self.have_kernel_lock.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_have_kernel_lock(&self, held: bool) {
        self.have_kernel_lock.store(held, Ordering::Release);
    }

    #[inline]
    pub fn last_timer_update(&self) -> u64 {
        self.last_timer_update.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_last_timer_update(&self, deadline: u64) {
        self.last_timer_update.store(deadline, Ordering::Release);
    }

    #[inline]
    pub fn current_frame(&self) -> *mut () {
        self.current_frame.load(Ordering::Acquire)
    }

    #[inline]
    pub fn set_current_frame(&self, frame: *mut ()) {
        self.current_frame.store(frame, Ordering::Release);
    }

    pub(crate) fn reset(&self, present: bool) {
        let state = if present {
            CpuState::Kernel
        } else {
            CpuState::NotPresent
        };
        self.set_state(state);
        self.thread_queue.reset();
        self.last_timer_update.store(0, Ordering::Release);
        self.have_kernel_lock.store(false, Ordering::Release);
        self.current_frame.store(ptr::null_mut(), Ordering::Release);
    }
}

static CPUS: [CpuInfo; MAX_CPUS] = {
    let mut cpus = [const { CpuInfo::new() }; MAX_CPUS];
    let mut i = 0;
    while i < MAX_CPUS {
        cpus[i].id = i as u32;
        i += 1;
    }
    cpus
};

static TOTAL_PROCESSORS: AtomicUsize = AtomicUsize::new(1);

/// CPUs currently blocked in `wait_for_interrupt`.
static IDLE_CPU_MASK: CpuMask = CpuMask::new();

#[inline]
pub fn idle_cpu_mask() -> &'static CpuMask {
    &IDLE_CPU_MASK
}

#[inline]
pub fn total_processors() -> usize {
    TOTAL_PROCESSORS.load(Ordering::Acquire)
}

pub(crate) fn set_total_processors(total: usize) {
    TOTAL_PROCESSORS.store(total, Ordering::Release);
}

#[inline]
pub fn cpuinfo_from_id(cpu: usize) -> &'static CpuInfo {
    &CPUS[cpu]
}

/// The calling CPU's state, resolved through the platform seam.
#[inline]
pub fn current_cpu() -> &'static CpuInfo {
    cpuinfo_from_id(platform::current_cpu_id())
}
