//! One-shot task thunks.

use alloc::boxed::Box;

/// A heap-allocated callable plus its captured state.
///
/// Ownership follows the work: enqueueing moves the task into a queue,
/// dequeueing moves it to the executing CPU, and running consumes it.  A
/// task that wants to continue re-enqueues itself (or a successor) before
/// returning.
pub struct Task {
    thunk: Box<dyn FnOnce() + Send>,
}

impl Task {
    pub fn new(thunk: impl FnOnce() + Send + 'static) -> Self {
        Self {
            thunk: Box::new(thunk),
        }
    }

    /// Execute and consume the task.
    pub fn run(self) {
        (self.thunk)()
    }
}
