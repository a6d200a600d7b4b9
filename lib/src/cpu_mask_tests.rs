//! CPU mask tests: bit flips, prior-value reporting, range scans.

use crate::cpu_mask::CpuMask;
use crate::testing::TestResult;
use crate::{MAX_CPUS, assert_eq_test, assert_test, define_test_suite};

pub fn test_set_and_clear_report_prior() -> TestResult {
    let mask = CpuMask::new();
    assert_test!(!mask.get(3));
    mask.set(3);
    assert_test!(mask.get(3));
    // First clear observes the bit, second does not: the test-and-clear
    // contract behind wakeup_cpu.
    assert_test!(mask.clear(3));
    assert_test!(!mask.clear(3));
    TestResult::Pass
}

pub fn test_first_set_in_range_basic() -> TestResult {
    let mask = CpuMask::new();
    mask.set(2);
    mask.set(5);
    assert_eq_test!(mask.first_set_in_range(0, MAX_CPUS), Some(2));
    assert_eq_test!(mask.first_set_in_range(3, MAX_CPUS - 3), Some(5));
    assert_eq_test!(mask.first_set_in_range(6, MAX_CPUS - 6), None);
    TestResult::Pass
}

pub fn test_first_set_respects_count() -> TestResult {
    let mask = CpuMask::new();
    mask.set(5);
    // Range [0, 5) stops one short of the set bit.
    assert_eq_test!(mask.first_set_in_range(0, 5), None);
    assert_eq_test!(mask.first_set_in_range(0, 6), Some(5));
    assert_eq_test!(mask.first_set_in_range(5, 1), Some(5));
    TestResult::Pass
}

pub fn test_first_set_empty_and_bounds() -> TestResult {
    let mask = CpuMask::new();
    assert_eq_test!(mask.first_set_in_range(0, MAX_CPUS), None);
    assert_eq_test!(mask.first_set_in_range(MAX_CPUS, 4), None);
    assert_eq_test!(mask.first_set_in_range(0, 0), None);
    mask.set(MAX_CPUS - 1);
    assert_eq_test!(mask.first_set_in_range(0, MAX_CPUS), Some(MAX_CPUS - 1));
    TestResult::Pass
}

pub fn test_clear_all() -> TestResult {
    let mask = CpuMask::new();
    for cpu in 0..MAX_CPUS {
        mask.set(cpu);
    }
    mask.clear_all();
    assert_eq_test!(mask.first_set_in_range(0, MAX_CPUS), None);
    TestResult::Pass
}

define_test_suite!(
    cpu_mask,
    [
        test_set_and_clear_report_prior,
        test_first_set_in_range_basic,
        test_first_set_respects_count,
        test_first_set_empty_and_bounds,
        test_clear_all,
    ]
);
