/*
 * Clock Ordering Test
 *
 * Exercises `tasking::clock`'s wait list directly: three tasks sleep
 * with wake times scattered out of insertion order, and ticking the
 * clock forward must wake them in time order, one at a time, regardless
 * of the order they registered in.
 */

use crate::tasking::clock;
use crate::tasking::process::ProcessId;
use crate::tasking::task::{self, SecurityLevel, TaskStatus, TaskType};

fn spawn_waiting_task() -> task::TaskId {
    let id = task::next_task_id();
    let t = task::Task::new(id, ProcessId(0), SecurityLevel::Application, TaskType::Default);
    task::register(t);
    task::set_waiting(id);
    id
}

fn status_of(id: task::TaskId) -> TaskStatus {
    task::get_by_id(id).map(|t| t.lock().status).unwrap_or(TaskStatus::Dead)
}

/// Three tasks sleep with wake times now+30, now+10, now+20 (in that
/// insertion order); ticking the clock forward must wake them in wall
/// order 10, 20, 30.
pub fn test_clock_wakes_in_time_order() -> bool {
    log::info!("TEST: clock wakes waiters in time order, not insertion order");

    const CPU: usize = 0;
    let now = clock::time(CPU);

    let t30 = spawn_waiting_task();
    let t10 = spawn_waiting_task();
    let t20 = spawn_waiting_task();

    clock::wait_for_time(CPU, t30, now + 30);
    clock::wait_for_time(CPU, t10, now + 10);
    clock::wait_for_time(CPU, t20, now + 20);

    // Advance to now+10: only t10 should be woken.
    clock::tick(CPU, 10);
    if status_of(t10) != TaskStatus::Running {
        log::error!("  FAIL: t10 not woken at +10ms");
        return false;
    }
    if status_of(t20) != TaskStatus::Waiting || status_of(t30) != TaskStatus::Waiting {
        log::error!("  FAIL: t20/t30 woken too early at +10ms");
        return false;
    }

    // Advance to now+20: t20 should wake, t30 still waiting.
    clock::tick(CPU, 10);
    if status_of(t20) != TaskStatus::Running {
        log::error!("  FAIL: t20 not woken at +20ms");
        return false;
    }
    if status_of(t30) != TaskStatus::Waiting {
        log::error!("  FAIL: t30 woken too early at +20ms");
        return false;
    }

    // Advance to now+30: t30 should wake.
    clock::tick(CPU, 10);
    if status_of(t30) != TaskStatus::Running {
        log::error!("  FAIL: t30 not woken at +30ms");
        return false;
    }

    log::info!("  PASS: clock woke t10, t20, t30 in that order");
    true
}
