/*
 * Userland Mutex Table
 *
 * Backs the `MUTEX_*` syscalls (call numbers 60-63). Each mutex is an
 * id-indexed entry with a value (0 = free, >0 = held) and an optional
 * reentrancy flag; a reentrant mutex lets its owning task re-acquire it
 * without blocking, incrementing the value each time, and only actually
 * releases once the value drops back to zero.
 *
 * Acquisition with a timeout layers on top of `tasking::clock`: the
 * caller registers a deadline, then spins trying the fast path and
 * yielding until either it succeeds or the clock says time is up.
 */

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use super::task::TaskId;
use crate::sync::WaitQueue;

pub type UserMutexId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMutexStatus {
    Acquired,
    Timeout,
    NotAcquired,
}

struct UserMutexEntry {
    value: u32,
    reentrant: bool,
    owner: Option<TaskId>,
    waiters: WaitQueue,
}

impl UserMutexEntry {
    fn new(reentrant: bool) -> Self {
        Self {
            value: 0,
            reentrant,
            owner: None,
            waiters: WaitQueue::new(),
        }
    }
}

static NEXT_MUTEX_ID: AtomicU32 = AtomicU32::new(1);
static MUTEX_MAP: Mutex<BTreeMap<UserMutexId, Mutex<UserMutexEntry>>> = Mutex::new(BTreeMap::new());

pub fn initialize() {
    MUTEX_MAP.lock().clear();
}

pub fn create(reentrant: bool) -> UserMutexId {
    let id = NEXT_MUTEX_ID.fetch_add(1, Ordering::SeqCst);
    MUTEX_MAP.lock().insert(id, Mutex::new(UserMutexEntry::new(reentrant)));
    id
}

pub fn destroy(mutex: UserMutexId) {
    release(mutex);
    MUTEX_MAP.lock().remove(&mutex);
}

/// Non-blocking attempt; never touches the clock or the scheduler.
pub fn try_acquire(task: TaskId, mutex: UserMutexId) -> UserMutexStatus {
    let map = MUTEX_MAP.lock();
    let entry = match map.get(&mutex) {
        Some(e) => e,
        None => {
            log::warn!("user_mutex: task {} tried to lock unknown mutex {}", task, mutex);
            return UserMutexStatus::NotAcquired;
        }
    };

    let mut entry = entry.lock();
    if entry.value > 0 {
        if entry.reentrant && entry.owner == Some(task) {
            entry.value += 1;
            UserMutexStatus::Acquired
        } else {
            UserMutexStatus::NotAcquired
        }
    } else {
        entry.value = 1;
        entry.owner = if entry.reentrant { Some(task) } else { None };
        UserMutexStatus::Acquired
    }
}

/// Blocking acquire. `timeout_ms == 0` means wait forever; `trying` means
/// give up after the first failed fast-path attempt instead of blocking.
pub fn acquire(task: TaskId, mutex: UserMutexId, timeout_ms: u64, trying: bool) -> UserMutexStatus {
    let cpu = super::current_cpu();
    let use_timeout = timeout_ms > 0;
    if use_timeout {
        super::clock::wait_for_time(cpu, task, super::clock::time(cpu) + timeout_ms);
    }

    let mut timed_out = false;
    let mut acquired = false;
    loop {
        if use_timeout && super::clock::has_timed_out(cpu, task) {
            timed_out = true;
            break;
        }

        if try_acquire(task, mutex) == UserMutexStatus::Acquired {
            acquired = true;
            break;
        }

        if trying {
            break;
        }

        wait_for_acquire(mutex, task);
        super::task::set_waiting(task);
        super::scheduler::yield_now();
    }

    if use_timeout {
        super::clock::unwait_for_time(cpu, task);
    }
    unwait_for_acquire(mutex, task);

    if timed_out {
        UserMutexStatus::Timeout
    } else if acquired {
        UserMutexStatus::Acquired
    } else {
        UserMutexStatus::NotAcquired
    }
}

pub fn release(mutex: UserMutexId) {
    let map = MUTEX_MAP.lock();
    let entry = match map.get(&mutex) {
        Some(e) => e,
        None => {
            log::warn!("user_mutex: tried to unlock unknown mutex {}", mutex);
            return;
        }
    };

    let mut entry = entry.lock();
    if entry.reentrant {
        entry.value = entry.value.saturating_sub(1);
        if entry.value == 0 {
            entry.owner = None;
            entry.waiters.wake_all();
        }
    } else {
        entry.value = 0;
        entry.waiters.wake_all();
    }
}

pub fn wait_for_acquire(mutex: UserMutexId, task: TaskId) {
    let map = MUTEX_MAP.lock();
    if let Some(entry) = map.get(&mutex) {
        entry.lock().waiters.add(task);
    }
}

pub fn unwait_for_acquire(mutex: UserMutexId, task: TaskId) {
    let map = MUTEX_MAP.lock();
    if let Some(entry) = map.get(&mutex) {
        entry.lock().waiters.remove(task);
    }
}
