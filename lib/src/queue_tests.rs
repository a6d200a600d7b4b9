//! Bounded MPMC queue tests: FIFO order, exactly-once dequeue, capacity
//! edges, and sequence wrap-around.

use crate::queue::BoundedQueue;
use crate::testing::TestResult;
use crate::{assert_eq_test, assert_test, define_test_suite};

pub fn test_fifo_order() -> TestResult {
    let q: BoundedQueue<u32, 8> = BoundedQueue::new();
    for v in 0..5u32 {
        assert_test!(q.enqueue(v).is_ok());
    }
    for v in 0..5u32 {
        assert_eq_test!(q.dequeue(), Some(v));
    }
    assert_eq_test!(q.dequeue(), None);
    TestResult::Pass
}

pub fn test_empty_dequeue_is_none() -> TestResult {
    let q: BoundedQueue<u32, 4> = BoundedQueue::new();
    assert_eq_test!(q.dequeue(), None);
    assert_test!(q.is_empty());
    assert_eq_test!(q.len(), 0);
    TestResult::Pass
}

pub fn test_full_enqueue_rejected() -> TestResult {
    let q: BoundedQueue<u32, 4> = BoundedQueue::new();
    for v in 0..4u32 {
        assert_test!(q.enqueue(v).is_ok());
    }
    // A full queue hands the value back instead of overwriting.
    assert_eq_test!(q.enqueue(99), Err(99));
    assert_eq_test!(q.len(), 4);
    assert_eq_test!(q.dequeue(), Some(0));
    assert_test!(q.enqueue(99).is_ok());
    TestResult::Pass
}

pub fn test_len_tracks_operations() -> TestResult {
    let q: BoundedQueue<u32, 8> = BoundedQueue::new();
    assert_eq_test!(q.len(), 0);
    for v in 0..3u32 {
        assert_test!(q.enqueue(v).is_ok());
    }
    assert_eq_test!(q.len(), 3);
    let _ = q.dequeue();
    assert_eq_test!(q.len(), 2);
    TestResult::Pass
}

pub fn test_wraparound_many_laps() -> TestResult {
    // Drive the positions through several laps of a small queue so the
    // sequence re-arm logic is exercised past the first lap.
    let q: BoundedQueue<u32, 4> = BoundedQueue::new();
    for lap in 0..10u32 {
        for v in 0..4u32 {
            assert_test!(q.enqueue(lap * 4 + v).is_ok());
        }
        for v in 0..4u32 {
            assert_eq_test!(q.dequeue(), Some(lap * 4 + v));
        }
    }
    assert_eq_test!(q.dequeue(), None);
    TestResult::Pass
}

pub fn test_reset_restores_capacity() -> TestResult {
    let q: BoundedQueue<u32, 4> = BoundedQueue::new();
    for v in 0..3u32 {
        assert_test!(q.enqueue(v).is_ok());
    }
    q.reset();
    assert_test!(q.is_empty());
    for v in 10..14u32 {
        assert_test!(q.enqueue(v).is_ok());
    }
    assert_eq_test!(q.dequeue(), Some(10));
    TestResult::Pass
}

pub fn test_each_value_dequeued_once() -> TestResult {
    // Exactly-once: every enqueued value comes out exactly one time even
    // with interleaved producers and consumers.
    let q: BoundedQueue<u32, 8> = BoundedQueue::new();
    let mut seen = [0u8; 16];
    let mut enqueued = 0u32;
    let mut dequeued = 0;
    while dequeued < 16 {
        while enqueued < 16 && q.enqueue(enqueued).is_ok() {
            enqueued += 1;
        }
        if let Some(v) = q.dequeue() {
            seen[v as usize] += 1;
            dequeued += 1;
        }
    }
    for (v, count) in seen.iter().enumerate() {
        assert_eq_test!(*count, 1, v);
    }
    TestResult::Pass
}

define_test_suite!(
    queue,
    [
        test_fifo_order,
        test_empty_dequeue_is_none,
        test_full_enqueue_rejected,
        test_len_tracks_operations,
        test_wraparound_many_laps,
        test_reset_restores_capacity,
        test_each_value_dequeued_once,
    ]
);
