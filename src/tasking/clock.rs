/*
 * Per-CPU Clock
 *
 * Each CPU keeps its own millisecond counter, bumped by the timer
 * interrupt handler, plus a wait list ordered ascending by wake time.
 * `update` is called once per tick and wakes every waiter whose time has
 * come; `wait_for_time`/`unwait_for_time`/`has_timed_out` are the building
 * blocks `tasking::user_mutex` and any other timeout-aware blocking point
 * use to implement a deadline.
 */

use alloc::vec::Vec;

use spin::Mutex;

use super::task::TaskId;
use crate::sync::mutex::MAX_CPUS;

struct ClockWaiter {
    task: TaskId,
    wake_time: u64,
}

struct ClockLocal {
    time: u64,
    waiters: Vec<ClockWaiter>,
}

impl ClockLocal {
    const fn new() -> Self {
        Self {
            time: 0,
            waiters: Vec::new(),
        }
    }
}

static CLOCKS: [Mutex<ClockLocal>; MAX_CPUS] = {
    const INIT: Mutex<ClockLocal> = Mutex::new(ClockLocal::new());
    [INIT; MAX_CPUS]
};

/// Current approximate milliseconds this CPU has run.
pub fn time(cpu: usize) -> u64 {
    CLOCKS[cpu].lock().time
}

/// Called by the timer interrupt handler on tick.
pub fn tick(cpu: usize, delta_ms: u64) {
    let mut clock = CLOCKS[cpu].lock();
    clock.time += delta_ms;
    update_locked(&mut clock);
}

fn update_locked(clock: &mut ClockLocal) {
    let now = clock.time;
    let mut i = 0;
    clock.waiters.sort_by_key(|w| w.wake_time);
    while i < clock.waiters.len() && clock.waiters[i].wake_time <= now {
        super::task::wake(clock.waiters[i].task);
        i += 1;
    }
    clock.waiters.drain(0..i);
}

/// Inserts `task` into `cpu`'s wait list, ordered ascending by wake time.
pub fn wait_for_time(cpu: usize, task: TaskId, wake_time: u64) {
    let mut clock = CLOCKS[cpu].lock();
    let pos = clock
        .waiters
        .iter()
        .position(|w| w.wake_time > wake_time)
        .unwrap_or(clock.waiters.len());
    clock.waiters.insert(pos, ClockWaiter { task, wake_time });
}

/// Removes every wait-list entry for `task` on `cpu`.
pub fn unwait_for_time(cpu: usize, task: TaskId) {
    CLOCKS[cpu].lock().waiters.retain(|w| w.task != task);
}

/// True once `task`'s deadline on `cpu` has passed (or it has no entry
/// left, meaning it was already woken and removed).
pub fn has_timed_out(cpu: usize, task: TaskId) -> bool {
    let clock = CLOCKS[cpu].lock();
    let now = clock.time;
    !clock
        .waiters
        .iter()
        .any(|w| w.task == task && now < w.wake_time)
}
