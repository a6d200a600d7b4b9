//! Thread migration between CPUs.
//!
//! The idle mask is the only cross-CPU hint.  Scans walk a snapshot of it;
//! by the time a decision lands the bit may be stale, and two CPUs may
//! race for the same queued thread.  Both outcomes are benign: the MPMC
//! queue lets at most one dequeue win, and a wasted wakeup IPI just costs
//! one empty run-loop pass.

use nimbus_lib::klog_debug;

use super::cpu::{CpuInfo, CpuState, cpuinfo_from_id, current_cpu, idle_cpu_mask, total_processors};
use super::task::Task;
use super::{enqueue_thread, shutdown_vector, wakeup_vector};
use crate::platform;

/// Wake `cpu` if it is idle.
///
/// Test-and-clear on the idle bit: of all racing wakers exactly one
/// observes the bit set and sends the IPI.
pub fn wakeup_cpu(cpu: usize) {
    if idle_cpu_mask().clear(cpu) {
        klog_debug!("waking up CPU {}", cpu);
        platform::send_ipi(cpu, wakeup_vector());
    }
}

/// Kick every other CPU out of its halt unconditionally.
///
/// Used to force a global rendezvous before global state changes; the IPI
/// is sent whether or not the target looked idle.
pub fn wakeup_or_interrupt_cpu_all() {
    let ci = current_cpu();
    for cpu in 0..total_processors() {
        if cpu != ci.id() {
            idle_cpu_mask().clear(cpu);
            platform::send_ipi(cpu, wakeup_vector());
        }
    }
}

/// Broadcast the shutdown vector to every other CPU.
pub(crate) fn broadcast_shutdown() {
    let ci = current_cpu();
    for cpu in 0..total_processors() {
        if cpu != ci.id() {
            idle_cpu_mask().clear(cpu);
            platform::send_ipi(cpu, shutdown_vector());
        }
    }
}

/// Scan idle CPUs in `[first_cpu, first_cpu + ncpus)`, stealing one thread
/// for the current CPU if `task` is still empty.
///
/// A thread found on an idle CPU is always stolen rather than woken in
/// place: the stealer is already running and can make immediate progress.
/// But an idle CPU whose queue is still non-empty afterwards gets a wakeup
/// so it drains the remainder itself.
pub(crate) fn migrate_to_self(
    mut task: Option<Task>,
    mut first_cpu: usize,
    mut ncpus: usize,
) -> Option<Task> {
    while ncpus > 0 {
        let Some(cpu) = idle_cpu_mask().first_set_in_range(first_cpu, ncpus) else {
            break;
        };
        let cpui = cpuinfo_from_id(cpu);
        if task.is_none() {
            task = cpui.thread_queue.dequeue();
            if task.is_some() {
                klog_debug!("migrating thread from idle CPU {} to self", cpu);
            }
        }
        if task.is_some() && !cpui.thread_queue.is_empty() {
            wakeup_cpu(cpu);
        }
        ncpus -= cpu - first_cpu + 1;
        first_cpu = cpu + 1;
    }
    task
}

/// Scan idle CPUs in `[first_cpu, first_cpu + ncpus)`, pushing surplus
/// threads from `ci`'s queue onto them.
///
/// An idle CPU observed with work already queued (it went idle and then
/// got work, a narrow race) is just woken; otherwise one of our threads
/// moves over and the target is woken to run it.
pub(crate) fn migrate_from_self(ci: &CpuInfo, mut first_cpu: usize, mut ncpus: usize) {
    while ncpus > 0 {
        let Some(cpu) = idle_cpu_mask().first_set_in_range(first_cpu, ncpus) else {
            break;
        };
        let cpui = cpuinfo_from_id(cpu);
        if !cpui.thread_queue.is_empty() {
            wakeup_cpu(cpu);
        } else if let Some(task) = ci.thread_queue.dequeue() {
            klog_debug!("migrating thread from self to idle CPU {}", cpu);
            enqueue_thread(cpui, task);
            wakeup_cpu(cpu);
        }
        ncpus -= cpu - first_cpu + 1;
        first_cpu = cpu + 1;
    }
}

/// Fallback when no idle CPU yielded a thread: walk the other CPUs
/// circularly from `self + 1` and steal a queued thread from one that is
/// busy in user mode.
pub(crate) fn steal_from_running(ci: &CpuInfo) -> Option<Task> {
    let total = total_processors();
    let mut cpu = ci.id() + 1;
    loop {
        if cpu >= total {
            cpu = 0;
        }
        if cpu == ci.id() {
            return None;
        }
        let cpui = cpuinfo_from_id(cpu);
        if cpui.state() == CpuState::User {
            if let Some(task) = cpui.thread_queue.dequeue() {
                klog_debug!("migrating thread from CPU {} to self", cpu);
                return Some(task);
            }
        }
        cpu += 1;
    }
}
