/*
 * Task
 *
 * A task is a single thread of control executing at some security level,
 * either in kernel or application context. Tasks are grouped into
 * processes (`tasking::process`); the scheduler (`tasking::scheduler`)
 * walks a flat per-CPU list of them.
 *
 * Fields mirror the five things every other subsystem needs to touch:
 * identity (id, process id), scheduling state (status, assignment,
 * statistics), privilege (security level), and the wait-queue
 * membership used by `taskingExit`'s joiners.
 */

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::sync::WaitQueue;

/// Unique task identifier, monotonically assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Sentinel used by the scheduler's "preferred task" hint when no task is
/// preferred.
pub const TASK_ID_NONE: TaskId = TaskId(usize::MAX);

/// Three-way security classification (glossary: Security level).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityLevel {
    Kernel,
    Driver,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Waiting,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Default,
    Vm86,
    Vital,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStatistics {
    pub times_scheduled: u64,
    pub times_yielded: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct EntryPoint {
    pub function: usize,
    pub data: usize,
}

/// Thread-local storage pointers for this task (kernel and user sides).
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskLocalStorage {
    pub kernel_tls: usize,
    pub user_tls: usize,
    pub start: usize,
    pub end: usize,
}

pub struct Task {
    pub id: TaskId,
    pub process_id: super::process::ProcessId,
    pub security_level: SecurityLevel,
    pub status: TaskStatus,
    pub task_type: TaskType,
    /// Whether this task is presently running on its assigned CPU.
    pub active: bool,
    /// Index of the CPU this task is assigned to (never migrated after
    /// assignment, per section 4.2).
    pub assignment: Option<usize>,
    pub statistics: TaskStatistics,
    /// Cross-address-space page directory override, used by kernel-side
    /// helper work that must run inside a different process's space.
    pub override_page_directory: Option<usize>,
    pub thread_local: TaskLocalStorage,
    pub entry: Option<EntryPoint>,
    /// Tasks parked on `taskingExit` (join).
    pub waiters_join: WaitQueue,
}

impl Task {
    pub fn new(
        id: TaskId,
        process_id: super::process::ProcessId,
        security_level: SecurityLevel,
        task_type: TaskType,
    ) -> Self {
        Self {
            id,
            process_id,
            security_level,
            status: TaskStatus::Waiting,
            task_type,
            active: false,
            assignment: None,
            statistics: TaskStatistics::default(),
            override_page_directory: None,
            thread_local: TaskLocalStorage::default(),
            entry: None,
            waiters_join: WaitQueue::new(),
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.status, TaskStatus::Dead)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("process_id", &self.process_id)
            .field("status", &self.status)
            .field("type", &self.task_type)
            .field("assignment", &self.assignment)
            .finish()
    }
}

static NEXT_TASK_ID: AtomicUsize = AtomicUsize::new(1);

/// Global task map (section 9: "Replace file-scope statics ... with a
/// single kernel context"; reachable through `kernel_context` but defined
/// here to keep the task/lookup API colocated with its type).
static TASK_MAP: Mutex<BTreeMap<TaskId, Arc<Mutex<Task>>>> = Mutex::new(BTreeMap::new());

pub fn next_task_id() -> TaskId {
    TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::SeqCst))
}

/// Inserts a freshly created task into the global map.
pub fn register(task: Task) -> Arc<Mutex<Task>> {
    let id = task.id;
    let handle = Arc::new(Mutex::new(task));
    TASK_MAP.lock().insert(id, handle.clone());
    handle
}

/// Looks up a task by id. Mirrors `taskingGetById`.
pub fn get_by_id(id: TaskId) -> Option<Arc<Mutex<Task>>> {
    TASK_MAP.lock().get(&id).cloned()
}

/// Removes a task from the global map; called by cleanup once a task is
/// dead and unlinked from its CPU's schedule list.
pub fn unregister(id: TaskId) {
    TASK_MAP.lock().remove(&id);
}

/// Flips a task's status from WAITING to RUNNING under its own lock.
/// Shared by the clock, wait queues, message queues/topics and pipes as
/// the uniform "wake" primitive (section 5: "Wakeups flip status back to
/// RUNNING under task lock").
pub fn wake(id: TaskId) {
    if let Some(task) = get_by_id(id) {
        let mut task = task.lock();
        if task.status == TaskStatus::Waiting {
            task.status = TaskStatus::Running;
        }
    }
}

/// Flips a task's status to WAITING. Called by a task just before it
/// registers itself on a wait queue and yields, mirroring the
/// `task->status = G_TASK_STATUS_WAITING` sequence used throughout the
/// blocking primitives.
pub fn set_waiting(id: TaskId) {
    if let Some(task) = get_by_id(id) {
        task.lock().status = TaskStatus::Waiting;
    }
}

/// Every live task id, for diagnostics (`KERNQUERY` task-list command).
pub fn all_ids() -> alloc::vec::Vec<TaskId> {
    TASK_MAP.lock().keys().copied().collect()
}

pub fn count() -> usize {
    TASK_MAP.lock().len()
}
