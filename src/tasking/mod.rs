/*
 * Tasking
 *
 * Owns the task and process registries, the per-CPU round-robin
 * scheduler, the per-CPU clock, the userland mutex table, and the
 * two-phase process spawn protocol. Everything else in the kernel that
 * needs to block or wake a task goes through this module or through
 * `crate::sync`.
 */

pub mod clock;
pub mod cleanup;
pub mod process;
pub mod scheduler;
pub mod spawn;
pub mod task;
pub mod user_mutex;

pub use process::{Process, ProcessId};
pub use task::{Task, TaskId};

/// Index of the CPU executing the calling code.
///
/// The scheduler and clock are organized per-CPU (arrays sized
/// `sync::mutex::MAX_CPUS`) so that true SMP scheduling can be dropped in
/// without reshaping either module, but this kernel brings up only the
/// bootstrap processor; every caller runs on CPU 0.
pub fn current_cpu() -> usize {
    0
}

/// Brings up essential kernel tasks: the idle task (never scheduled away
/// from the actual work, falls back to `hlt` when nothing else is
/// runnable) and the cleanup task (reaps dead tasks and zombie
/// processes).
pub fn initialize() {
    scheduler::initialize_local(current_cpu());
    spawn::initialize();
    user_mutex::initialize();
    scheduler::create_essential_tasks();
    log::info!("tasking: initialized");
}
