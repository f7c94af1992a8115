/*
 * Per-CPU Round-Robin Scheduler
 *
 * Each CPU keeps a flat list of task ids and a cursor ("current"). Picking
 * the next task walks forward from the cursor, skipping anything not in
 * `Running` status, and wraps back to the list head. A single global
 * "preferred task" hint — checked on every CPU, not per-CPU — lets a
 * waker request an immediate switch to a specific task the next time that
 * CPU reschedules; it's a best-effort nudge, not a guarantee, and the
 * first CPU to observe it consumes it.
 *
 * Voluntary yield is a software interrupt in the original; here it is a
 * direct call into `schedule`, which is enough to model the scheduling
 * policy without needing a real interrupt-driven context switch.
 */

use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::process::ProcessId;
use super::task::{SecurityLevel, Task, TaskId, TaskStatus, TaskType, TASK_ID_NONE};
use crate::sync::mutex::MAX_CPUS;

struct CpuSchedule {
    list: Vec<TaskId>,
    current: Option<usize>,
    idle_task: TaskId,
}

impl CpuSchedule {
    const fn new() -> Self {
        Self {
            list: Vec::new(),
            current: None,
            idle_task: TASK_ID_NONE,
        }
    }
}

static SCHEDULES: [Mutex<CpuSchedule>; MAX_CPUS] = {
    const INIT: Mutex<CpuSchedule> = Mutex::new(CpuSchedule::new());
    [INIT; MAX_CPUS]
};

/// Hint checked on every CPU's reschedule; consumed by whichever CPU sees
/// it first. `None` means no preference is outstanding.
static PREFERRED_TASK: Mutex<Option<TaskId>> = Mutex::new(None);

/// Number of CPUs actually brought up. Only bootstrap processor bring-up
/// is implemented, so this is always 1; `assign_balanced` scans exactly
/// this many entries rather than the full `MAX_CPUS` reservation.
static ACTIVE_CPUS: AtomicUsize = AtomicUsize::new(1);

pub fn active_cpu_count() -> usize {
    ACTIVE_CPUS.load(Ordering::Relaxed)
}

pub fn initialize_local(cpu: usize) {
    let mut schedule = SCHEDULES[cpu].lock();
    schedule.list.clear();
    schedule.current = None;
    schedule.idle_task = TASK_ID_NONE;
}

/// Creates the idle task (falls back to `hlt` when nothing else is
/// runnable) and the cleanup task (reaps dead tasks and zombie
/// processes), both marked vital so `cleanup` never tears them down.
pub fn create_essential_tasks() {
    let cpu = super::current_cpu();

    let idle_process = super::process::create();
    let idle_task = spawn_kernel_task(idle_process.lock().id, TaskType::Vital);
    SCHEDULES[cpu].lock().idle_task = idle_task;
    log::info!("tasking: core {} idle task {}", cpu, idle_task);

    let cleanup_process = super::process::create();
    let cleanup_task = spawn_kernel_task(cleanup_process.lock().id, TaskType::Vital);
    assign(cpu, cleanup_task);
    log::info!("tasking: core {} cleanup task {}", cpu, cleanup_task);
}

fn spawn_kernel_task(process_id: ProcessId, task_type: TaskType) -> TaskId {
    let id = super::task::next_task_id();
    let mut task = Task::new(id, process_id, SecurityLevel::Kernel, task_type);
    task.status = TaskStatus::Running;
    super::task::register(task);
    if let Some(process) = super::process::get_by_id(process_id) {
        process.lock().add_task(id);
    }
    id
}

/// Adds `task` to `cpu`'s schedule list if it isn't already there.
pub fn assign(cpu: usize, task: TaskId) {
    let mut schedule = SCHEDULES[cpu].lock();
    if !schedule.list.contains(&task) {
        schedule.list.push(task);
    }
}

/// Assigns `task` to whichever CPU currently has the fewest non-dead
/// tasks. With a single CPU brought up this always resolves to CPU 0, but
/// the scan keeps the same shape the original load balancer uses so a
/// real SMP bring-up only needs to grow the CPU count.
pub fn assign_balanced(task: TaskId) -> usize {
    let mut lowest = None;
    let mut target = 0usize;
    for cpu in 0..active_cpu_count() {
        let schedule = SCHEDULES[cpu].lock();
        let count = schedule
            .list
            .iter()
            .filter(|&&t| {
                super::task::get_by_id(t)
                    .map(|h| !h.lock().is_dead())
                    .unwrap_or(false)
            })
            .count();
        if lowest.is_none() || count < lowest.unwrap() {
            lowest = Some(count);
            target = cpu;
        }
    }
    assign(target, task);
    target
}

pub fn remove(cpu: usize, task: TaskId) {
    SCHEDULES[cpu].lock().list.retain(|&t| t != task);
}

/// Requests that the next reschedule on any CPU switch straight to
/// `task`, if it's found there.
pub fn prefer(task: TaskId) {
    *PREFERRED_TASK.lock() = Some(task);
}

/// Returns the id of the task currently executing on `cpu`.
pub fn current_task(cpu: usize) -> Option<TaskId> {
    let schedule = SCHEDULES[cpu].lock();
    schedule.current.map(|idx| schedule.list[idx])
}

fn next_index(schedule: &CpuSchedule) -> Option<usize> {
    if schedule.list.is_empty() {
        return None;
    }

    if let Some(preferred) = *PREFERRED_TASK.lock() {
        if let Some(idx) = schedule.list.iter().position(|&t| t == preferred) {
            *PREFERRED_TASK.lock() = None;
            return Some(idx);
        }
    }

    let start = schedule.current.map(|c| (c + 1) % schedule.list.len()).unwrap_or(0);
    Some(start)
}

/// Advances `cpu`'s current task by one round-robin step, skipping over
/// anything not `Running`, and bumps `times_scheduled` on the task it
/// lands on.
pub fn schedule(cpu: usize) {
    let mut schedule = SCHEDULES[cpu].lock();
    if schedule.list.is_empty() {
        return;
    }

    let len = schedule.list.len();
    let mut idx = match next_index(&schedule) {
        Some(i) => i,
        None => return,
    };

    for _ in 0..len {
        let task_id = schedule.list[idx];
        if let Some(handle) = super::task::get_by_id(task_id) {
            let mut task = handle.lock();
            if task.status == TaskStatus::Running {
                task.statistics.times_scheduled += 1;
                schedule.current = Some(idx);
                return;
            }
        }
        idx = (idx + 1) % len;
    }

    // Nothing runnable; fall back to the idle task.
    if let Some(pos) = schedule.list.iter().position(|&t| t == schedule.idle_task) {
        schedule.current = Some(pos);
    }
}

/// Voluntary yield. Panics if the calling CPU holds a `Flavor::Global`
/// mutex, mirroring the kernel-wide invariant that global locks must
/// never be held across a reschedule.
pub fn yield_now() {
    let cpu = super::current_cpu();
    if crate::sync::mutex::global_lock_depth(cpu) > 0 {
        panic!("attempted yield while holding global lock");
    }

    if let Some(task_id) = current_task(cpu) {
        if let Some(handle) = super::task::get_by_id(task_id) {
            handle.lock().statistics.times_yielded += 1;
        }
    }

    schedule(cpu);
}

/// Marks the calling task dead and wakes anyone joined on it, then yields
/// away from it for the last time.
pub fn exit_current() {
    let cpu = super::current_cpu();
    if let Some(task_id) = current_task(cpu) {
        if let Some(handle) = super::task::get_by_id(task_id) {
            let mut task = handle.lock();
            task.status = TaskStatus::Dead;
            task.waiters_join.wake_all();
        }
    }
    yield_now();
}
