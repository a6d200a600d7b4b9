// Test harness types: TestSuiteResult, TestSuiteDesc, TestRunSummary.
// Suites are emitted into .test_registry by define_test_suite! and collected
// by the tests crate's registry.

use core::sync::atomic::{AtomicU64, Ordering};

/// Maximum number of test suites that can be registered.
pub const HARNESS_MAX_SUITES: usize = 40;

/// Default cycles per millisecond estimate (3 GHz).
const DEFAULT_CYCLES_PER_MS: u64 = 3_000_000;

static CYCLES_PER_MS: AtomicU64 = AtomicU64::new(DEFAULT_CYCLES_PER_MS);

/// Install a calibrated TSC rate for elapsed-time reporting.
pub fn set_cycles_per_ms(cycles: u64) {
    if cycles > 0 {
        CYCLES_PER_MS.store(cycles, Ordering::Relaxed);
    }
}

/// Convert a TSC interval to milliseconds using the calibrated rate.
pub fn measure_elapsed_ms(start: u64, end: u64) -> u32 {
    let cycles = end.saturating_sub(start);
    (cycles / CYCLES_PER_MS.load(Ordering::Relaxed)) as u32
}

/// Result of executing a single test suite.
#[derive(Clone, Copy)]
pub struct TestSuiteResult {
    pub name: &'static str,
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub elapsed_ms: u32,
}

impl TestSuiteResult {
    pub const fn empty() -> Self {
        Self {
            name: "",
            total: 0,
            passed: 0,
            failed: 0,
            elapsed_ms: 0,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

pub type SuiteRunnerFn = fn(&mut TestSuiteResult) -> i32;

#[derive(Clone, Copy)]
pub struct TestSuiteDesc {
    pub name: &'static str,
    pub run: Option<SuiteRunnerFn>,
}

/// Aggregated results from running all registered suites.
#[derive(Clone, Copy)]
pub struct TestRunSummary {
    pub suites: [TestSuiteResult; HARNESS_MAX_SUITES],
    pub suite_count: usize,
    pub total_tests: u32,
    pub passed: u32,
    pub failed: u32,
    pub elapsed_ms: u32,
}

impl TestRunSummary {
    pub const fn empty() -> Self {
        Self {
            suites: [TestSuiteResult::empty(); HARNESS_MAX_SUITES],
            suite_count: 0,
            total_tests: 0,
            passed: 0,
            failed: 0,
            elapsed_ms: 0,
        }
    }

    /// Fold one suite's results into the summary.
    pub fn add_suite_result(&mut self, result: &TestSuiteResult) {
        if self.suite_count < HARNESS_MAX_SUITES {
            self.suites[self.suite_count] = *result;
            self.suite_count += 1;
        }
        self.total_tests = self.total_tests.saturating_add(result.total);
        self.passed = self.passed.saturating_add(result.passed);
        self.failed = self.failed.saturating_add(result.failed);
        self.elapsed_ms = self.elapsed_ms.saturating_add(result.elapsed_ms);
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl Default for TestRunSummary {
    fn default() -> Self {
        Self::empty()
    }
}
