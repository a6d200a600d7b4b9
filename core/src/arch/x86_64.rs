//! x86_64 platform service provider.
//!
//! Implements [`PlatformOps`] on the bare hardware: x2APIC MSRs for IPIs,
//! the TSC for timekeeping and TSC-deadline mode for the one-shot
//! run-loop timer.  Bring-up code registers each CPU's APIC id and the
//! calibrated TSC rate, points its IDT stubs for the scheduler vector
//! window at [`dispatch_interrupt`], then calls [`install`] before
//! `init_scheduler`.

use core::sync::atomic::{AtomicPtr, AtomicU8, AtomicU32, AtomicU64, Ordering};

use nimbus_lib::cpu::{self, RFlags};
use nimbus_lib::klog_debug;
use nimbus_lib::{InitFlag, MAX_CPUS, tsc};
use x86_64::instructions::interrupts;
use x86_64::registers::model_specific::Msr;

use crate::platform::{ClockId, PlatformOps, register_platform_ops};

const IA32_TSC_DEADLINE: u32 = 0x6E0;
const X2APIC_APICID: u32 = 0x802;
const X2APIC_ICR: u32 = 0x830;

/// ICR level bit (assert).
const ICR_LEVEL_ASSERT: u64 = 1 << 14;

/// Interrupt vector window reserved for scheduler IPIs.
pub const IPI_VECTOR_BASE: u8 = 0xF0;
pub const IPI_VECTOR_COUNT: u8 = 8;

static NEXT_IPI_VECTOR: AtomicU8 = AtomicU8::new(IPI_VECTOR_BASE);

/// CPU index → APIC id, filled in during bring-up.
static APIC_IDS: [AtomicU32; MAX_CPUS] = [const { AtomicU32::new(u32::MAX) }; MAX_CPUS];

/// Calibrated TSC rate; 0 until bring-up measures it, and every clock
/// accessor returns 0 until then.
static TSC_KHZ: AtomicU64 = AtomicU64::new(0);

/// Realtime = MonotonicRaw + this offset, set once the RTC is read.
static WALL_OFFSET_NS: AtomicU64 = AtomicU64::new(0);

static IPI_HANDLERS: [AtomicPtr<()>; IPI_VECTOR_COUNT as usize] =
    [const { AtomicPtr::new(core::ptr::null_mut()) }; IPI_VECTOR_COUNT as usize];

/// Record the APIC id backing a logical CPU index.
pub fn register_cpu_apic_id(cpu: usize, apic_id: u32) {
    APIC_IDS[cpu].store(apic_id, Ordering::Release);
}

/// Install the calibrated TSC frequency.
pub fn set_tsc_frequency_khz(khz: u64) {
    TSC_KHZ.store(khz, Ordering::Release);
}

/// Anchor the realtime clock: offset of wall time over the TSC basis.
pub fn set_wall_clock_offset_ns(offset_ns: u64) {
    WALL_OFFSET_NS.store(offset_ns, Ordering::Release);
}

#[inline]
fn tsc_ns() -> u64 {
    let khz = TSC_KHZ.load(Ordering::Acquire);
    if khz == 0 {
        return 0;
    }
    (tsc::rdtsc() as u128 * 1_000_000 / khz as u128) as u64
}

#[inline]
fn ns_to_tsc(ns: u64) -> u64 {
    let khz = TSC_KHZ.load(Ordering::Acquire);
    (ns as u128 * khz as u128 / 1_000_000) as u64
}

fn current_cpu_id() -> usize {
    // SAFETY: the x2APIC id register is readable once bring-up has
    // enabled x2APIC mode, which precedes any scheduling.
    let apic_id = unsafe { Msr::new(X2APIC_APICID).read() } as u32;
    for (index, slot) in APIC_IDS.iter().enumerate() {
        if slot.load(Ordering::Acquire) == apic_id {
            return index;
        }
    }
    0
}

fn now(id: ClockId) -> u64 {
    match id {
        ClockId::Monotonic | ClockId::MonotonicRaw => tsc_ns(),
        ClockId::Realtime => tsc_ns().wrapping_add(WALL_OFFSET_NS.load(Ordering::Acquire)),
    }
}

fn send_ipi(cpu: usize, vector: u8) {
    let apic_id = APIC_IDS[cpu].load(Ordering::Acquire);
    if apic_id == u32::MAX {
        return;
    }
    let icr = ((apic_id as u64) << 32) | ICR_LEVEL_ASSERT | vector as u64;
    // SAFETY: fixed-delivery IPI to a registered APIC id on a vector the
    // scheduler owns.
    unsafe { Msr::new(X2APIC_ICR).write(icr) };
}

fn allocate_ipi_vector() -> Option<u8> {
    NEXT_IPI_VECTOR
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |vector| {
            if vector < IPI_VECTOR_BASE + IPI_VECTOR_COUNT {
                Some(vector + 1)
            } else {
                None
            }
        })
        .ok()
}

fn register_interrupt(vector: u8, handler: fn(), label: &'static str) {
    let Some(slot) = vector
        .checked_sub(IPI_VECTOR_BASE)
        .map(usize::from)
        .filter(|slot| *slot < IPI_VECTOR_COUNT as usize)
    else {
        return;
    };
    IPI_HANDLERS[slot].store(handler as *mut (), Ordering::Release);
    klog_debug!("registered '{}' on vector {:#x}", label, vector);
}

/// Entry point for the IDT stubs covering the scheduler vector window.
pub fn dispatch_interrupt(vector: u8) {
    let Some(slot) = vector
        .checked_sub(IPI_VECTOR_BASE)
        .map(usize::from)
        .filter(|slot| *slot < IPI_VECTOR_COUNT as usize)
    else {
        return;
    };
    let ptr = IPI_HANDLERS[slot].load(Ordering::Acquire);
    if !ptr.is_null() {
        // SAFETY: only `fn()` values are stored by register_interrupt.
        let handler: fn() = unsafe { core::mem::transmute(ptr) };
        handler();
    }
}

fn runloop_timer(timeout_ns: u64) {
    if TSC_KHZ.load(Ordering::Acquire) == 0 {
        return;
    }
    let deadline = tsc::rdtsc().wrapping_add(ns_to_tsc(timeout_ns));
    // SAFETY: TSC-deadline mode is configured by the bring-up code that
    // also calibrated the TSC.
    unsafe { Msr::new(IA32_TSC_DEADLINE).write(deadline) };
}

fn wait_for_interrupt() {
    // sti;hlt is atomic on x86: an interrupt pending across the sti
    // cannot slip in before the halt.
    interrupts::enable_and_hlt();
    cpu::disable_interrupts();
}

fn irq_enable_save() -> u64 {
    let flags = cpu::read_rflags();
    cpu::enable_interrupts();
    flags
}

fn irq_restore(flags: u64) {
    if RFlags::from_bits_truncate(flags).contains(RFlags::INTERRUPT) {
        cpu::enable_interrupts();
    } else {
        cpu::disable_interrupts();
    }
}

fn disable_interrupts() {
    cpu::disable_interrupts();
}

fn machine_halt() -> ! {
    cpu::disable_interrupts();
    cpu::halt_loop();
}

static X86_64_OPS: PlatformOps = PlatformOps {
    current_cpu_id,
    now,
    send_ipi,
    allocate_ipi_vector,
    register_interrupt,
    runloop_timer,
    wait_for_interrupt,
    irq_enable_save,
    irq_restore,
    disable_interrupts,
    machine_halt,
};

static INSTALLED: InitFlag = InitFlag::new();

/// Make this provider the active platform.  Idempotent.
pub fn install() {
    if !INSTALLED.init_once() {
        return;
    }
    register_platform_ops(&X86_64_OPS);
    nimbus_lib::klog_register_cpu_id_fn(current_cpu_id);
}
