/*
 * Process
 *
 * A process groups one or more tasks sharing an address space. The
 * process id always equals the id of its main task (data model
 * invariant); the task list is kept by id rather than by pointer so that
 * lookups go through the global task map instead of creating a cyclic
 * owning reference between process and task (design note, section 9).
 */

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::task::TaskId;
use crate::sync::WaitQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub usize);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Still has at least one non-dead task.
    Running,
    /// Task list is empty; awaiting reap by cleanup.
    Zombie,
}

/// TLS master image location, matching the layout composed by the ELF
/// loader (section 4.9): `[executable TLS][user-thread-local][shared-lib TLS...]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TlsMaster {
    pub location: usize,
    pub size: u32,
    pub user_thread_offset: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImageRange {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Heap {
    pub brk: usize,
    pub start: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub arguments: String,
    pub executable_path: String,
    pub working_directory: String,
}

/// On-demand file-to-memory mapping list node (section 3).
#[derive(Debug, Clone, Copy)]
pub struct MemoryFileOnDemand {
    pub fd: i32,
    pub file_offset: u64,
    pub file_start: usize,
    pub file_size: usize,
    pub mem_size: usize,
}

/// Arguments stashed on the process while a spawn is in progress
/// (section 4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnStatus {
    Pending,
    Successful,
    FormatError,
    DependencyError,
    IoError,
    MemoryError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnValidationDetails {
    None,
    Elf32NotElf,
    Elf32IoError,
    Elf32WrongClass,
    Elf32WrongEncoding,
    Elf32WrongVersion,
    Elf32WrongMachine,
    Elf32WrongType,
}

#[derive(Debug, Clone, Copy)]
pub struct ProcessSpawnArguments {
    pub fd: i32,
    pub security_level: super::task::SecurityLevel,
    pub entry: usize,
    pub status: SpawnStatus,
    pub validation: SpawnValidationDetails,
}

pub struct Process {
    pub id: ProcessId,
    pub main_task: Option<TaskId>,
    pub tasks: Vec<TaskId>,
    pub state: ProcessState,
    /// Physical address of this process's PML4, mirrored out of
    /// `address_space` for callers that only need the raw CR3 value.
    /// Zero until `address_space` is populated during spawn phase 1.
    pub page_directory: usize,
    /// Owns the process's page table root and virtual-range pool; kept
    /// alive for the process's lifetime so its `Drop` impl only runs
    /// (freeing the PML4 frame) when the process itself is reaped.
    pub address_space: Option<crate::memory::AddressSpace>,
    pub tls_master: TlsMaster,
    pub image: ImageRange,
    /// Root ELF object id for this process, if any (id into the
    /// process-scoped ELF object table owned by `loaders::elf_object`).
    pub root_elf_object: Option<crate::loaders::elf_object::ElfObjectId>,
    pub heap: Heap,
    pub environment: Environment,
    pub spawn_args: Option<ProcessSpawnArguments>,
    pub waiters_spawn: WaitQueue,
    pub on_demand_mappings: Vec<MemoryFileOnDemand>,
}

impl Process {
    fn new(id: ProcessId) -> Self {
        Self {
            id,
            main_task: None,
            tasks: Vec::new(),
            state: ProcessState::Running,
            page_directory: 0,
            address_space: None,
            tls_master: TlsMaster::default(),
            image: ImageRange::default(),
            root_elf_object: None,
            heap: Heap::default(),
            environment: Environment::default(),
            spawn_args: None,
            waiters_spawn: WaitQueue::new(),
            on_demand_mappings: Vec::new(),
        }
    }

    pub fn add_task(&mut self, task_id: TaskId) {
        if self.main_task.is_none() {
            self.main_task = Some(task_id);
            self.id = ProcessId(task_id.0);
        }
        self.tasks.push(task_id);
    }

    pub fn remove_task(&mut self, task_id: TaskId) {
        self.tasks.retain(|&t| t != task_id);
        if self.tasks.is_empty() {
            self.state = ProcessState::Zombie;
        }
    }

    pub fn is_zombie(&self) -> bool {
        self.state == ProcessState::Zombie
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

static NEXT_PROCESS_ID: AtomicUsize = AtomicUsize::new(1);
static PROCESS_MAP: Mutex<BTreeMap<ProcessId, Arc<Mutex<Process>>>> = Mutex::new(BTreeMap::new());

/// Allocates a fresh process id without creating the process yet; used so
/// the caller can create the main task (whose id will become the process
/// id) before the process itself is registered.
pub fn next_process_id() -> ProcessId {
    ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::SeqCst))
}

/// Creates and registers a new, empty process.
pub fn create() -> Arc<Mutex<Process>> {
    let id = next_process_id();
    let process = Arc::new(Mutex::new(Process::new(id)));
    PROCESS_MAP.lock().insert(id, process.clone());
    process
}

pub fn get_by_id(id: ProcessId) -> Option<Arc<Mutex<Process>>> {
    PROCESS_MAP.lock().get(&id).cloned()
}

/// Removes a zombie process from the global map and frees its resources.
/// Called only by `tasking::cleanup` once the task list has emptied.
/// Flips every task of a process to DEAD (section 5: "Cancellation and
/// timeouts"). The scheduler skips DEAD tasks on its next pass; the
/// cleanup task reaps them and, once the task list empties, the process
/// itself.
pub fn kill_all_tasks(id: ProcessId) {
    let Some(process) = get_by_id(id) else {
        return;
    };
    let task_ids = process.lock().tasks.clone();
    for task_id in task_ids {
        if let Some(task) = super::task::get_by_id(task_id) {
            task.lock().status = super::task::TaskStatus::Dead;
        }
    }
}

pub fn reap(id: ProcessId) -> bool {
    let process = match get_by_id(id) {
        Some(p) => p,
        None => return false,
    };
    let is_zombie = process.lock().is_zombie();
    if !is_zombie {
        return false;
    }
    {
        let mut locked = process.lock();
        if let Some(root) = locked.root_elf_object.take() {
            let pool = locked.address_space.as_mut().map(|a| &mut a.range_pool);
            crate::loaders::elf_object::destroy_tree(root, pool);
        }
        locked.on_demand_mappings.clear();
        locked.tasks.clear();
    }
    PROCESS_MAP.lock().remove(&id);
    log::info!("tasking: reaped process {}", id);
    true
}

pub fn count() -> usize {
    PROCESS_MAP.lock().len()
}
