/*
 * Generic Wait Queue
 *
 * The one blocking primitive every higher-level suspension point is built
 * from: user mutexes waiting for release, message queues waiting for a
 * sender slot, message topics waiting for a post, and pipes waiting for
 * space or data all enqueue task ids here and call `wake_all` when their
 * condition becomes true.
 *
 * Unlike a condvar, a wait queue carries no notion of *which* condition a
 * waiter cares about — that's the caller's job (check the condition, and
 * only then insert yourself). `wake_all` simply flips every waiting task
 * back to `Running` and empties the queue; there is no ordering guarantee
 * among wakers.
 */

use alloc::vec::Vec;
use spin::Mutex;

use crate::tasking::task::TaskId;

/// A lock-guarded list of task ids blocked on some resource event.
pub struct WaitQueue {
    waiters: Mutex<Vec<TaskId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Registers `task` as waiting. O(1).
    pub fn add(&self, task: TaskId) {
        self.waiters.lock().push(task);
    }

    /// Removes every occurrence of `task` from the queue (used when a
    /// timed wait resolves some other way and the stale entry must be
    /// cleaned up). O(n).
    pub fn remove(&self, task: TaskId) {
        self.waiters.lock().retain(|&t| t != task);
    }

    /// Wakes every waiting task (transition WAITING -> RUNNING under each
    /// task's own lock) and empties the queue.
    pub fn wake_all(&self) {
        let drained: Vec<TaskId> = core::mem::take(&mut *self.waiters.lock());
        for task in drained {
            crate::tasking::task::wake(task);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
