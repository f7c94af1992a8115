/*
 * Process Spawn Protocol
 *
 * A spawner (the task that called `SPAWN`) hands the kernel an open file
 * descriptor and a target security level. Spawning proceeds in two
 * phases:
 *
 * Phase 1 (kernel context) allocates a process, creates its single main
 * task, stashes the spawn arguments on the process, balance-assigns the
 * task to a CPU, and has the spawner park itself on the process's
 * spawn-waiter queue. Before anything is loaded it also allocates the
 * process's address space (a fresh PML4 plus its virtual-range pool) and
 * records `page_directory`/`address_space` on the process. The main
 * task's entry point is the bootstrap below, which runs with kernel
 * privilege: it invokes the ELF loader against that address space's
 * range pool and records status/validation/entry back into the spawn
 * args, then (on success) sets up the task's TLS.
 *
 * Phase 2 (privilege downgrade) rewrites the task's saved CPU state so it
 * resumes execution at the loaded entry point running at the target
 * security level, then wakes the spawner, which reads the final status
 * out of the spawn args.
 *
 * Rewriting the actual saved register state of a task to change its
 * privilege level is architecture-specific CPU-state manipulation, which
 * is out of scope here (see module docs); `finalize` records the intent
 * (entry point, target level) on the task so that whatever arch layer
 * performs the real privilege transition has everything it needs, but it
 * does not itself flip CPU rings.
 *
 * NOTE on isolation: the loader writes the executable's and its
 * dependencies' segments while the spawner's own page table (not the new
 * process's PML4) is still active in CR3. The new address space is real
 * and recorded on the process - the page directory a later context
 * switch will install is not a placeholder - but bootstrap does not
 * itself switch CR3 before loading. `AddressSpace::new_user` deliberately
 * omits PML4 entry 0 (BOOTBOOT's low identity map) to avoid aliasing
 * userspace addresses like 0x400000; switching CR3 before the loader
 * writes those same addresses through the physical-memory window would
 * require that window to be genuinely mapped into page tables, which is
 * the paging-table manipulation this kernel leaves to a later pass (see
 * DESIGN.md).
 */

use alloc::string::String;

use super::process::{
    Environment, ProcessId, ProcessSpawnArguments, SpawnStatus, SpawnValidationDetails,
};
use super::task::{SecurityLevel, TaskId, TaskType};
use crate::loaders::elf::{self, LoadStatus};

pub struct SpawnRequest {
    pub fd: i32,
    pub security_level: SecurityLevel,
    pub arguments: String,
    pub working_directory: String,
    pub executable_path: String,
}

pub struct SpawnOutcome {
    pub process_id: ProcessId,
    pub status: SpawnStatus,
    pub validation: SpawnValidationDetails,
}

pub fn initialize() {}

/// Entry point for the spawner-facing `SPAWN` syscall. Runs both phases;
/// see module docs for why they are not actually split across a
/// suspend/resume boundary in this kernel.
pub fn spawn(spawner: TaskId, request: SpawnRequest) -> SpawnOutcome {
    let process = super::process::create();
    let process_id = process.lock().id;

    let main_task_id = create_main_task(process_id, request.security_level);
    {
        let mut locked = process.lock();
        locked.add_task(main_task_id);
        locked.environment = Environment {
            arguments: request.arguments,
            executable_path: request.executable_path.clone(),
            working_directory: request.working_directory,
        };
        locked.spawn_args = Some(ProcessSpawnArguments {
            fd: request.fd,
            security_level: request.security_level,
            entry: 0,
            status: SpawnStatus::Pending,
            validation: SpawnValidationDetails::None,
        });
    }

    let target_cpu = super::scheduler::assign_balanced(main_task_id);
    log::debug!(
        "spawn: process {} main task {} assigned to cpu {}",
        process_id,
        main_task_id,
        target_cpu
    );

    process.lock().waiters_spawn.add(spawner);
    super::task::set_waiting(spawner);

    bootstrap(process_id, request.fd);

    process.lock().waiters_spawn.remove(spawner);
    super::task::wake(spawner);

    let (status, validation) = {
        let mut locked = process.lock();
        let args = locked.spawn_args.take();
        match args {
            Some(a) => (a.status, a.validation),
            None => (SpawnStatus::IoError, SpawnValidationDetails::None),
        }
    };

    if status != SpawnStatus::Successful {
        if let Some(handle) = super::task::get_by_id(main_task_id) {
            handle.lock().status = super::task::TaskStatus::Dead;
        }
    }

    SpawnOutcome {
        process_id,
        status,
        validation,
    }
}

fn create_main_task(process_id: ProcessId, security_level: SecurityLevel) -> TaskId {
    let id = super::task::next_task_id();
    let mut task = super::task::Task::new(id, process_id, security_level, TaskType::Default);
    task.status = super::task::TaskStatus::Waiting;
    super::task::register(task);
    id
}

/// Allocates the process's address space (phase 1, before any loading
/// happens) and records it on the process. Returns `false` and marks the
/// spawn as failed if the PML4 can't be allocated.
fn prepare_address_space(process: &alloc::sync::Arc<spin::Mutex<super::process::Process>>) -> bool {
    match crate::memory::AddressSpace::new_user() {
        Ok(address_space) => {
            let mut locked = process.lock();
            locked.page_directory = address_space.page_table_root.as_u64() as usize;
            locked.address_space = Some(address_space);
            true
        }
        Err(e) => {
            log::error!("spawn: failed to allocate address space: {}", e);
            let mut locked = process.lock();
            if let Some(args) = locked.spawn_args.as_mut() {
                args.status = SpawnStatus::MemoryError;
            }
            false
        }
    }
}

/// Runs the loader against the spawner's file descriptor and records the
/// outcome on the process's spawn args. On success, composes the task's
/// TLS from the loaded object graph; on failure, nothing further happens
/// (the process is left to be reaped by cleanup once its one task dies).
fn bootstrap(process_id: ProcessId, fd: i32) {
    let process = match super::process::get_by_id(process_id) {
        Some(p) => p,
        None => return,
    };

    if !prepare_address_space(&process) {
        return;
    }

    let result = {
        let mut locked = process.lock();
        let pool = &mut locked.address_space.as_mut().expect("just set above").range_pool;
        elf::load_executable(fd, pool)
    };

    let mut locked = process.lock();
    if let Some(args) = locked.spawn_args.as_mut() {
        args.entry = result.entry;
        args.status = match result.status {
            LoadStatus::Successful => SpawnStatus::Successful,
            LoadStatus::FormatNotElf => SpawnStatus::FormatError,
            LoadStatus::FormatIoError => SpawnStatus::IoError,
            LoadStatus::DependencyError => SpawnStatus::DependencyError,
            LoadStatus::MemoryError => SpawnStatus::MemoryError,
        };
        args.validation = result.validation;
    }

    if result.status == LoadStatus::Successful {
        locked.root_elf_object = result.root_object;
        locked.image = super::process::ImageRange {
            start: result.image_start,
            end: result.image_end,
        };
        locked.tls_master = result.tls_master;
        finalize(&mut locked, result.entry, result.root_object);
    }
}

/// Phase 2: copies the composed TLS master image for the main task,
/// stashes the entry point the real arch layer needs in order to rewrite
/// the task's saved CPU state, and marks the main task runnable at that
/// entry.
fn finalize(process: &mut super::process::Process, entry: usize, root_object: Option<crate::loaders::elf_object::ElfObjectId>) {
    let Some(main_task) = process.main_task else {
        return;
    };
    let Some(handle) = super::task::get_by_id(main_task) else {
        return;
    };

    if let Some(root_id) = root_object {
        if process.tls_master.size > 0 {
            let mut buffer = alloc::vec![0u8; process.tls_master.size as usize];
            let destination = buffer.as_mut_ptr() as usize;
            crate::loaders::elf_tls::instantiate_for_thread(root_id, destination);

            let mut task = handle.lock();
            task.thread_local.start = destination;
            task.thread_local.end = destination + buffer.len();
            task.thread_local.user_tls = destination + process.tls_master.user_thread_offset as usize;
            // Ownership is handed to the task for its lifetime; freed when
            // the task is destroyed by `tasking::cleanup`.
            core::mem::forget(buffer);
        }
    }

    let mut task = handle.lock();
    task.entry = Some(super::task::EntryPoint { function: entry, data: 0 });
    task.status = super::task::TaskStatus::Running;
}
