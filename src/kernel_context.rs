/*
 * Kernel Context
 *
 * The aggregate root for kernel global state: the task and process
 * registries, the per-CPU clocks and schedules, the user-mutex table,
 * the message queues and topics, and the pipe table. Each of those
 * lives as its own lazily-initialized static next to the module that
 * owns it (`tasking::task::TASK_MAP`, `messaging::message_queue::QUEUES`,
 * `pipes::pipe::PIPES`, ...) rather than as fields of one literal
 * struct — every one of them is already guarded independently (by its
 * own `spin::Mutex`, sometimes nested per-id) and a single outer lock
 * would only serialize access that today is deliberately per-resource.
 * This module is the "well-defined root" instead: it sequences
 * initialization and teardown in the order the rest of the kernel
 * depends on, and it is the one place a caller reaches for if they want
 * "everything this kernel knows about running tasks and their IPC
 * objects" without reaching into five different submodules.
 */

/// Brings every kernel-context subsystem up, in dependency order:
/// tasking (task/process registries, clock, scheduler, user mutexes)
/// before messaging and pipes, since both wake tasks looked up through
/// the task registry tasking owns.
///
/// Called once from `kstart`, after memory management and before
/// interrupts are enabled.
pub fn initialize() {
    crate::tasking::initialize();
    crate::messaging::initialize();
    crate::pipes::initialize();
    log::info!("kernel_context: initialized");
}
