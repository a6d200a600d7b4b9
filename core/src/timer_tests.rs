//! Timer heap tests: ordering, tie-breaks, cancellation, clock translation.

use core::sync::atomic::Ordering;

use nimbus_lib::testing::TestResult;
use nimbus_lib::{assert_eq_test, assert_test, define_test_suite};

use crate::platform::ClockId;
use crate::test_support::{self as mock, CLOCK_BASE_NS, MONOTONIC_OFFSET_NS, install_mock_platform};
use crate::timer::{TIMESTAMP_MAX, TimerHeap};

const MS: u64 = 1_000_000;

pub fn test_pops_in_deadline_order() -> TestResult {
    install_mock_platform();
    let mut heap = TimerHeap::new();
    let _c = heap.register(ClockId::MonotonicRaw, 30 * MS, false, None, || {});
    let _a = heap.register(ClockId::MonotonicRaw, 10 * MS, false, None, || {});
    let _b = heap.register(ClockId::MonotonicRaw, 20 * MS, false, None, || {});

    let now = CLOCK_BASE_NS + 40 * MS;
    let mut last = 0;
    let mut popped = 0;
    while let Some(entry) = heap.pop_expired(now) {
        assert_test!(entry.deadline() >= last, "deadline order violated");
        last = entry.deadline();
        popped += 1;
    }
    assert_eq_test!(popped, 3);
    TestResult::Pass
}

pub fn test_fifo_on_equal_deadlines() -> TestResult {
    install_mock_platform();
    let mut heap = TimerHeap::new();
    let _first = heap.register(ClockId::MonotonicRaw, 10 * MS, false, None, || {
        mock::push_event(1)
    });
    let _second = heap.register(ClockId::MonotonicRaw, 10 * MS, false, None, || {
        mock::push_event(2)
    });

    let now = CLOCK_BASE_NS + 10 * MS;
    while let Some(entry) = heap.pop_expired(now) {
        entry.invoke();
    }
    assert_eq_test!(mock::events(), alloc::vec![1, 2]);
    TestResult::Pass
}

pub fn test_pop_expired_respects_now() -> TestResult {
    install_mock_platform();
    let mut heap = TimerHeap::new();
    let _t = heap.register(ClockId::MonotonicRaw, 10 * MS, false, None, || {});

    assert_test!(heap.pop_expired(CLOCK_BASE_NS + 5 * MS).is_none());
    assert_test!(heap.pop_expired(CLOCK_BASE_NS + 10 * MS).is_some());
    assert_test!(heap.is_empty());
    TestResult::Pass
}

pub fn test_next_deadline_skips_cancelled() -> TestResult {
    install_mock_platform();
    let mut heap = TimerHeap::new();
    let doomed = heap.register(ClockId::MonotonicRaw, 10 * MS, false, None, || {});
    let _kept = heap.register(ClockId::MonotonicRaw, 20 * MS, false, None, || {});

    doomed.cancel();
    // The dead head is dropped on the way to the answer.
    assert_eq_test!(heap.next_deadline(), CLOCK_BASE_NS + 20 * MS);
    assert_eq_test!(heap.len(), 1);
    TestResult::Pass
}

pub fn test_empty_heap_sentinel() -> TestResult {
    install_mock_platform();
    let mut heap = TimerHeap::new();
    assert_eq_test!(heap.next_deadline(), TIMESTAMP_MAX);
    TestResult::Pass
}

pub fn test_absolute_deadline_translation() -> TestResult {
    install_mock_platform();
    // Monotonic runs 500 ms ahead of the raw basis; an absolute deadline
    // expressed in Monotonic must land on the raw timeline.
    MONOTONIC_OFFSET_NS.store(500 * MS, Ordering::Relaxed);
    let mut heap = TimerHeap::new();
    let monotonic_now = CLOCK_BASE_NS + 500 * MS;
    let _t = heap.register(ClockId::Monotonic, monotonic_now + 10 * MS, true, None, || {});

    assert_eq_test!(heap.next_deadline(), CLOCK_BASE_NS + 10 * MS);
    TestResult::Pass
}

pub fn test_rearm_periodic_advances_deadline() -> TestResult {
    install_mock_platform();
    let mut heap = TimerHeap::new();
    let _t = heap.register(ClockId::MonotonicRaw, 10 * MS, false, Some(5 * MS), || {});

    let entry = heap
        .pop_expired(CLOCK_BASE_NS + 10 * MS)
        .expect("timer did not expire");
    assert_test!(entry.is_periodic());
    heap.rearm_periodic(entry);
    assert_eq_test!(heap.next_deadline(), CLOCK_BASE_NS + 15 * MS);
    TestResult::Pass
}

define_test_suite!(
    timer,
    [
        test_pops_in_deadline_order,
        test_fifo_on_equal_deadlines,
        test_pop_expired_respects_now,
        test_next_deadline_skips_cancelled,
        test_empty_heap_sentinel,
        test_absolute_deadline_translation,
        test_rearm_periodic_advances_deadline,
    ]
);
