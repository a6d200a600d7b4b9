#![no_std]

//! Test-suite registry.
//!
//! Collects the suites defined across the workspace and runs them through
//! the shared harness.  The kernel's management path calls
//! [`tests_register_system_suites`] followed by [`tests_run_all`] when
//! booted with testing enabled.

use nimbus_lib::klog_info;
pub use nimbus_lib::testing::{
    HARNESS_MAX_SUITES, TestRunSummary, TestSuiteDesc, TestSuiteResult,
};

pub const TESTS_MAX_SUITES: usize = HARNESS_MAX_SUITES;

static mut REGISTRY: [Option<&'static TestSuiteDesc>; TESTS_MAX_SUITES] = [None; TESTS_MAX_SUITES];
static mut REGISTRY_COUNT: usize = 0;

fn registry_mut() -> *mut [Option<&'static TestSuiteDesc>; TESTS_MAX_SUITES] {
    &raw mut REGISTRY
}

fn registry_count_mut() -> *mut usize {
    &raw mut REGISTRY_COUNT
}

pub fn tests_reset_registry() {
    unsafe {
        (*registry_mut()).iter_mut().for_each(|slot| *slot = None);
        *registry_count_mut() = 0;
    }
}

pub fn tests_register_suite(desc: &'static TestSuiteDesc) -> i32 {
    if desc.run.is_none() {
        return -1;
    }
    unsafe {
        if *registry_count_mut() >= TESTS_MAX_SUITES {
            return -1;
        }
        (*registry_mut())[*registry_count_mut()] = Some(desc);
        *registry_count_mut() += 1;
    }
    0
}

/// Register every suite the workspace ships.
pub fn tests_register_system_suites() {
    suites::register_all();
}

/// Run all registered suites and log a per-suite line plus a final tally.
pub fn tests_run_all() -> TestRunSummary {
    let mut summary = TestRunSummary::empty();
    let count = unsafe { *registry_count_mut() };
    for index in 0..count {
        let desc = unsafe { (*registry_mut())[index] };
        let Some(desc) = desc else { continue };
        let Some(run) = desc.run else { continue };
        let mut result = TestSuiteResult::empty();
        let rc = run(&mut result);
        klog_info!(
            "suite {}: {}/{} passed in {} ms{}",
            result.name,
            result.passed,
            result.total,
            result.elapsed_ms,
            if rc == 0 { "" } else { " [FAILED]" }
        );
        summary.add_suite_result(&result);
    }
    klog_info!(
        "test run: {} suites, {}/{} passed",
        summary.suite_count,
        summary.passed,
        summary.total_tests
    );
    summary
}

mod suites {
    use super::tests_register_suite;

    pub fn register_all() {
        let _ = tests_register_suite(&nimbus_lib::queue_tests::QUEUE_SUITE_DESC);
        let _ = tests_register_suite(&nimbus_lib::cpu_mask_tests::CPU_MASK_SUITE_DESC);
        let _ = tests_register_suite(&nimbus_core::timer_tests::TIMER_SUITE_DESC);
        let _ = tests_register_suite(&nimbus_core::sched_tests::SCHED_SUITE_DESC);
    }
}
