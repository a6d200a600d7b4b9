//! Kernel log.
//!
//! Scheduler diagnostics are formatted into a fixed stack buffer, stamped
//! with the originating CPU and a level tag, and handed to the registered
//! sink as one complete newline-terminated line.  Until a sink exists
//! (early boot, or a platform with no console driver yet) lines fall back
//! to raw COM1 writes, which is enough to watch the run loop come up.
//!
//! Two properties matter to the scheduler:
//!
//! * The threshold check is a single relaxed atomic load, so the debug
//!   logging on the run-loop hot path costs nothing at the production
//!   level of `Info`.
//! * Fatal diagnostics (queue overflow, kernel-lock misuse, vector
//!   exhaustion) go through [`emit_fatal`], which ignores the threshold:
//!   the reason for a halt must be the last line on the wire no matter
//!   how quiet the log was set.
//!
//! CPU attribution comes from a registered id provider rather than a
//! format-string convention, so every subsystem's lines carry the same
//! `[NN L]` stamp and cross-CPU interleavings stay readable.

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicPtr, AtomicU8, Ordering};

use crate::ports::{COM1, serial_write_bytes};

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KlogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
}

impl KlogLevel {
    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => KlogLevel::Error,
            1 => KlogLevel::Warn,
            2 => KlogLevel::Info,
            _ => KlogLevel::Debug,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            KlogLevel::Error => "E",
            KlogLevel::Warn => "W",
            KlogLevel::Info => "I",
            KlogLevel::Debug => "D",
        }
    }
}

static THRESHOLD: AtomicU8 = AtomicU8::new(KlogLevel::Info as u8);

#[inline(always)]
fn passes_threshold(level: KlogLevel) -> bool {
    level as u8 <= THRESHOLD.load(Ordering::Relaxed)
}

// ---------------------------------------------------------------------------
// Sink and CPU-id registration
// ---------------------------------------------------------------------------

/// A sink receives one complete, newline-terminated line.  It must write
/// the slice atomically with respect to other CPUs (the line was already
/// assembled on the caller's stack, so a spinlock around the device is
/// all it takes).
pub type KlogSink = fn(&[u8]);

static SINK: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Resolves the CPU id stamped onto each line.  Registered by whichever
/// layer owns per-CPU identification; until then lines carry `--`.
pub type KlogCpuIdFn = fn() -> usize;

static CPU_ID_FN: AtomicPtr<()> = AtomicPtr::new(core::ptr::null_mut());

/// Install the line sink, replacing the raw COM1 fallback.
pub fn klog_register_sink(sink: KlogSink) {
    SINK.store(sink as *mut (), Ordering::Release);
}

/// Install the CPU id provider used for line stamping.
pub fn klog_register_cpu_id_fn(cpu_id: KlogCpuIdFn) {
    CPU_ID_FN.store(cpu_id as *mut (), Ordering::Release);
}

// ---------------------------------------------------------------------------
// Line assembly
// ---------------------------------------------------------------------------

/// Longest line the log emits; longer messages are cut and marked with
/// a trailing `..`.
const LINE_CAP: usize = 256;

struct LineBuffer {
    bytes: [u8; LINE_CAP],
    len: usize,
    truncated: bool,
}

impl LineBuffer {
    const fn new() -> Self {
        Self {
            bytes: [0; LINE_CAP],
            len: 0,
            truncated: false,
        }
    }

    #[inline]
    fn push(&mut self, byte: u8) {
        // The last byte stays reserved for the newline.
        if self.len < LINE_CAP - 1 {
            self.bytes[self.len] = byte;
            self.len += 1;
        } else {
            self.truncated = true;
        }
    }

    /// Terminate the line and hand back the bytes to write.
    fn finish(&mut self) -> &[u8] {
        if self.truncated && self.len >= 2 {
            self.bytes[self.len - 2] = b'.';
            self.bytes[self.len - 1] = b'.';
        }
        self.bytes[self.len] = b'\n';
        self.len += 1;
        &self.bytes[..self.len]
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            self.push(byte);
        }
        Ok(())
    }
}

fn stamped_cpu() -> Option<usize> {
    let ptr = CPU_ID_FN.load(Ordering::Acquire);
    if ptr.is_null() {
        return None;
    }
    // SAFETY: only `KlogCpuIdFn` values are stored by
    // `klog_register_cpu_id_fn`.
    let cpu_id: KlogCpuIdFn = unsafe { core::mem::transmute(ptr) };
    Some(cpu_id())
}

fn write_out(line: &[u8]) {
    let ptr = SINK.load(Ordering::Acquire);
    if ptr.is_null() {
        // SAFETY: COM1 is the conventional debug UART.  Early-boot writers
        // are single threaded; later racers may interleave characters,
        // which beats dropping the line.
        unsafe { serial_write_bytes(COM1, line) };
    } else {
        // SAFETY: only `KlogSink` values are stored by `klog_register_sink`.
        let sink: KlogSink = unsafe { core::mem::transmute(ptr) };
        sink(line);
    }
}

fn format_and_write(level: KlogLevel, args: fmt::Arguments<'_>) {
    let mut line = LineBuffer::new();
    match stamped_cpu() {
        Some(cpu) => {
            let _ = write!(line, "[{:02} {}] ", cpu, level.tag());
        }
        None => {
            let _ = write!(line, "[-- {}] ", level.tag());
        }
    }
    let _ = line.write_fmt(args);
    write_out(line.finish());
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Emit a line at `level`, subject to the threshold.
pub fn emit(level: KlogLevel, args: fmt::Arguments<'_>) {
    if !passes_threshold(level) {
        return;
    }
    format_and_write(level, args);
}

/// Emit an error line regardless of the threshold.
///
/// For diagnostics immediately preceding a halt: the message has to reach
/// the wire even on a quieted log.
pub fn emit_fatal(args: fmt::Arguments<'_>) {
    format_and_write(KlogLevel::Error, args);
}

/// Reset the threshold to the boot default.  Called very early.
pub fn klog_init() {
    THRESHOLD.store(KlogLevel::Info as u8, Ordering::Relaxed);
}

pub fn klog_set_level(level: KlogLevel) {
    THRESHOLD.store(level as u8, Ordering::Relaxed);
}

pub fn klog_get_level() -> KlogLevel {
    KlogLevel::from_raw(THRESHOLD.load(Ordering::Relaxed))
}

pub fn klog_is_enabled(level: KlogLevel) -> bool {
    passes_threshold(level)
}

// ---------------------------------------------------------------------------
// Macros
// ---------------------------------------------------------------------------

#[macro_export]
macro_rules! klog_error {
    ($($arg:tt)*) => {
        $crate::klog::emit($crate::klog::KlogLevel::Error, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_warn {
    ($($arg:tt)*) => {
        $crate::klog::emit($crate::klog::KlogLevel::Warn, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_info {
    ($($arg:tt)*) => {
        $crate::klog::emit($crate::klog::KlogLevel::Info, ::core::format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! klog_debug {
    ($($arg:tt)*) => {
        $crate::klog::emit($crate::klog::KlogLevel::Debug, ::core::format_args!($($arg)*))
    };
}

/// Last-words logging: ignores the threshold.  Pair with the `panic!`
/// that follows an invariant violation.
#[macro_export]
macro_rules! klog_fatal {
    ($($arg:tt)*) => {
        $crate::klog::emit_fatal(::core::format_args!($($arg)*))
    };
}
