/*
 * Kernel Synchronization Primitives
 *
 * This module groups the two lock-like building blocks the rest of the
 * kernel is built on:
 *
 * - `mutex`: the interrupt-disciplined kernel spinlock (section "Mutex" of
 *   the core design) used to guard every kernel-owned structure (tasks,
 *   processes, message queues/topics, pipes, the user-mutex table).
 * - `wait_queue`: the generic "list of blocked task ids" primitive that
 *   user mutexes, message queues, message topics and pipes all build on
 *   top of.
 *
 * `user_mutex` (the id-indexed, timeout- and reentrancy-aware mutex that
 * userland threads acquire via syscall) lives in `crate::tasking` since it
 * is keyed by task id and intimately tied to task status transitions.
 */

pub mod mutex;
pub mod wait_queue;

pub use mutex::KernelMutex;
pub use wait_queue::WaitQueue;
