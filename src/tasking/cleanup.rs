/*
 * Cleanup Task
 *
 * A vital kernel task created alongside the idle task. Once per sweep it
 * walks the local schedule list, pulls out every task marked `Dead`, and
 * tears each one down: wakes anyone joined on it, unregisters it from the
 * global task map and its process's task list, and reaps the process
 * itself once its task list empties. Between sweeps it parks itself on
 * the clock for a few seconds rather than busy-looping.
 */

const SWEEP_INTERVAL_MS: u64 = 3000;

/// Body of the cleanup kernel task. Never returns; intended to be run as
/// the entry point of the task created by
/// `tasking::scheduler::create_essential_tasks`.
pub fn run() -> ! {
    loop {
        sweep();

        let cpu = super::current_cpu();
        if let Some(self_id) = super::scheduler::current_task(cpu) {
            super::clock::wait_for_time(cpu, self_id, super::clock::time(cpu) + SWEEP_INTERVAL_MS);
            super::task::set_waiting(self_id);
        }
        super::scheduler::yield_now();
    }
}

fn sweep() {
    for task_id in super::task::all_ids() {
        let handle = match super::task::get_by_id(task_id) {
            Some(h) => h,
            None => continue,
        };

        let (is_dead, process_id) = {
            let task = handle.lock();
            (task.is_dead(), task.process_id)
        };
        if !is_dead {
            continue;
        }

        destroy_task(task_id, process_id);
    }
}

fn destroy_task(task_id: super::task::TaskId, process_id: super::process::ProcessId) {
    if let Some(handle) = super::task::get_by_id(task_id) {
        let mut task = handle.lock();
        task.waiters_join.wake_all();
        free_thread_local(&task.thread_local);
        task.thread_local = super::task::TaskLocalStorage::default();
    }

    crate::messaging::message_queue::task_removed(task_id);
    super::scheduler::remove(super::current_cpu(), task_id);

    if let Some(process) = super::process::get_by_id(process_id) {
        let mut locked = process.lock();
        locked.remove_task(task_id);
    }

    super::task::unregister(task_id);
    log::debug!("tasking: destroyed task {}", task_id);

    if let Some(process) = super::process::get_by_id(process_id) {
        if process.lock().is_zombie() {
            super::process::reap(process_id);
        }
    }
}

/// Drops the per-task TLS master copy allocated by
/// `tasking::spawn::finalize`, reversing the `core::mem::forget` used to
/// hand ownership to the task for its lifetime.
fn free_thread_local(thread_local: &super::task::TaskLocalStorage) {
    if thread_local.start == 0 || thread_local.end <= thread_local.start {
        return;
    }
    let len = thread_local.end - thread_local.start;
    unsafe {
        drop(alloc::vec::Vec::from_raw_parts(thread_local.start as *mut u8, len, len));
    }
}
