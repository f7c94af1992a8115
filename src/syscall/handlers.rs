/*
 * System Call Handlers
 *
 * Each handler validates its userspace pointers, performs the requested
 * operation against the relevant subsystem (`tasking`, `messaging`,
 * `pipes`, `vfs`), and returns a result or negative error code. The
 * handful of calls whose arguments don't fit three registers (spawn,
 * send/receive message, user-mutex acquire, topic, kernquery) instead
 * take a pointer to one of `super::structs`'s call structs, with `out_*`
 * fields written back in place before returning.
 */

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use super::numbers::*;
use super::structs::*;

use crate::messaging::{message_queue, message_topic};
use crate::pipes::pipe;
use crate::tasking::process::ProcessId;
use crate::tasking::task::{SecurityLevel, TaskId};
use crate::tasking::{process, scheduler, spawn, task, user_mutex};

/// Validate a user pointer
///
/// Checks that a pointer from userspace is:
/// - Not NULL
/// - Within userspace address range (< 0x0000_8000_0000_0000)
/// - Does not overflow when adding count
///
/// Returns Ok(()) if valid, Err(error_code) otherwise.
fn validate_user_ptr<T>(ptr: *const T, count: usize) -> Result<(), isize> {
    let addr = ptr as usize;

    if addr == 0 {
        return Err(-EFAULT);
    }

    if addr >= 0x0000_8000_0000_0000 {
        return Err(-EFAULT);
    }

    if addr.checked_add(count * core::mem::size_of::<T>()).is_none() {
        return Err(-EFAULT);
    }

    Ok(())
}

fn current_task_id() -> TaskId {
    let cpu = crate::tasking::current_cpu();
    scheduler::current_task(cpu).unwrap_or(task::TASK_ID_NONE)
}

/// Copies a userspace byte slice into a kernel `Vec`, validating the
/// pointer first.
unsafe fn read_user_bytes(ptr: *const u8, len: usize) -> Result<Vec<u8>, isize> {
    if len == 0 {
        return Ok(Vec::new());
    }
    validate_user_ptr(ptr, len)?;
    Ok(unsafe { core::slice::from_raw_parts(ptr, len) }.to_vec())
}

unsafe fn read_user_str(ptr: *const u8, len: usize) -> Result<String, isize> {
    let bytes = unsafe { read_user_bytes(ptr, len) }?;
    core::str::from_utf8(&bytes).map(|s| s.into()).map_err(|_| -EINVAL)
}

unsafe fn write_user_bytes(ptr: *mut u8, capacity: usize, content: &[u8]) -> Result<(), isize> {
    validate_user_ptr(ptr as *const u8, capacity)?;
    if content.len() > capacity {
        return Err(-EINVAL);
    }
    unsafe { core::slice::from_raw_parts_mut(ptr, content.len()) }.copy_from_slice(content);
    Ok(())
}

// ---------------------------------------------------------------------
// Tasking
// ---------------------------------------------------------------------

pub fn sys_spawn(call: *mut SpawnCall) -> isize {
    if let Err(e) = validate_user_ptr(call, 1) {
        return e;
    }
    let call = unsafe { &mut *call };

    let path = match unsafe { read_user_str(call.path, call.path_len) } {
        Ok(p) => p,
        Err(e) => return e,
    };
    let args = match unsafe { read_user_str(call.args, call.args_len) } {
        Ok(a) => a,
        Err(e) => return e,
    };
    let workdir = match unsafe { read_user_str(call.workdir, call.workdir_len) } {
        Ok(w) => w,
        Err(e) => return e,
    };

    let security_level = match call.security_level {
        0 => SecurityLevel::Kernel,
        1 => SecurityLevel::Driver,
        _ => SecurityLevel::Application,
    };

    let fd = crate::vfs::vfs_open(&path, crate::vfs::protocol::O_RDONLY);
    if fd < 0 {
        return fd;
    }

    let outcome = spawn::spawn(
        current_task_id(),
        spawn::SpawnRequest {
            fd: fd as i32,
            security_level,
            arguments: args,
            working_directory: workdir,
            executable_path: path,
        },
    );

    call.out_pid = outcome.process_id.0;
    call.out_status = outcome.status as u32;
    call.out_validation = outcome.validation as u32;

    if outcome.status == process::SpawnStatus::Successful {
        0
    } else {
        -EINVAL
    }
}

pub fn sys_exit(status: i32) -> ! {
    log::info!("task {} exiting with status {}", current_task_id(), status);
    scheduler::exit_current();
    loop {
        x86_64::instructions::hlt();
    }
}

pub fn sys_yield() -> isize {
    scheduler::yield_now();
    0
}

pub fn sys_join(target: usize) -> isize {
    let target = TaskId(target);
    let waiter = current_task_id();

    let Some(handle) = task::get_by_id(target) else {
        return 0;
    };

    loop {
        let dead = handle.lock().is_dead();
        if dead {
            return 0;
        }
        handle.lock().waiters_join.add(waiter);
        task::set_waiting(waiter);
        scheduler::yield_now();
        handle.lock().waiters_join.remove(waiter);
    }
}

pub fn sys_kill_all_tasks(process_id: usize) -> isize {
    process::kill_all_tasks(ProcessId(process_id));
    0
}

// ---------------------------------------------------------------------
// Memory
// ---------------------------------------------------------------------

pub fn sys_brk(_addr: *mut u8) -> isize {
    -ENOSYS
}

// ---------------------------------------------------------------------
// User mutex
// ---------------------------------------------------------------------

pub fn sys_mutex_create(reentrant: usize) -> isize {
    user_mutex::create(reentrant != 0) as isize
}

pub fn sys_mutex_acquire(call: *mut UserMutexAcquireCall) -> isize {
    if let Err(e) = validate_user_ptr(call, 1) {
        return e;
    }
    let call = unsafe { &mut *call };

    let status = user_mutex::acquire(current_task_id(), call.mutex, call.timeout_ms, call.trying != 0);
    call.out_was_set = (status == user_mutex::UserMutexStatus::Acquired) as u8;
    call.out_has_timed_out = (status == user_mutex::UserMutexStatus::Timeout) as u8;
    0
}

pub fn sys_mutex_release(mutex: usize) -> isize {
    user_mutex::release(mutex as u32);
    0
}

pub fn sys_mutex_destroy(mutex: usize) -> isize {
    user_mutex::destroy(mutex as u32);
    0
}

// ---------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------

pub fn sys_send_message(call: *mut SendMessageCall) -> isize {
    if let Err(e) = validate_user_ptr(call, 1) {
        return e;
    }
    let call = unsafe { &mut *call };

    let content = match unsafe { read_user_bytes(call.buffer, call.length) } {
        Ok(c) => c,
        Err(e) => return e,
    };

    let sender = current_task_id();
    let receiver = TaskId(call.receiver);
    let blocking = call.mode == SEND_MODE_BLOCKING;

    loop {
        let status = message_queue::send(sender, receiver, &content, call.transaction);
        if status != message_queue::SendStatus::Full || !blocking {
            call.out_status = match status {
                message_queue::SendStatus::Successful => STATUS_SUCCESSFUL,
                message_queue::SendStatus::Full => STATUS_FULL,
                message_queue::SendStatus::ExceedsMaximum => STATUS_EXCEEDS_MAXIMUM,
            };
            return 0;
        }

        message_queue::wait_for_send(sender, receiver);
        task::set_waiting(sender);
        scheduler::yield_now();
        message_queue::unwait_for_send(sender, receiver);
    }
}

pub fn sys_receive_message(call: *mut ReceiveMessageCall) -> isize {
    if let Err(e) = validate_user_ptr(call, 1) {
        return e;
    }
    let call = unsafe { &mut *call };

    if let Err(e) = validate_user_ptr(call.buffer as *const u8, call.maximum) {
        return e;
    }

    let receiver = current_task_id();
    let blocking = call.mode == SEND_MODE_BLOCKING;
    let mut out = vec![0u8; call.maximum];

    loop {
        let (status, written) = message_queue::receive(receiver, &mut out, call.transaction);
        if status != message_queue::ReceiveStatus::Empty || !blocking {
            call.out_status = match status {
                message_queue::ReceiveStatus::Successful => STATUS_SUCCESSFUL,
                message_queue::ReceiveStatus::Empty => STATUS_EMPTY,
                message_queue::ReceiveStatus::ExceedsBufferSize => STATUS_EXCEEDS_BUFFER_SIZE,
            };
            call.out_written = written;
            if status == message_queue::ReceiveStatus::Successful {
                if let Err(e) = unsafe { write_user_bytes(call.buffer, call.maximum, &out[..written]) } {
                    return e;
                }
            }
            return 0;
        }

        if call.break_condition != 0 && user_mutex::try_acquire(receiver, call.break_condition) == user_mutex::UserMutexStatus::Acquired {
            user_mutex::release(call.break_condition);
            call.out_status = STATUS_EMPTY;
            call.out_written = 0;
            return 0;
        }

        task::set_waiting(receiver);
        scheduler::yield_now();
    }
}

pub fn sys_topic(call: *mut TopicCall) -> isize {
    if let Err(e) = validate_user_ptr(call, 1) {
        return e;
    }
    let call = unsafe { &mut *call };

    let name = match unsafe { read_user_str(call.name, call.name_len) } {
        Ok(n) => n,
        Err(e) => return e,
    };

    match call.mode {
        TOPIC_MODE_POST => {
            let content = match unsafe { read_user_bytes(call.buffer as *const u8, call.length) } {
                Ok(c) => c,
                Err(e) => return e,
            };
            let status = message_topic::post(&name, current_task_id(), &content);
            call.out_status = match status {
                message_queue::SendStatus::Successful => STATUS_SUCCESSFUL,
                message_queue::SendStatus::Full => STATUS_FULL,
                message_queue::SendStatus::ExceedsMaximum => STATUS_EXCEEDS_MAXIMUM,
            };
            0
        }
        TOPIC_MODE_RECEIVE => {
            if let Err(e) = validate_user_ptr(call.buffer as *const u8, call.length) {
                return e;
            }
            let mut out = vec![0u8; call.length];
            let (status, written) = message_topic::receive(&name, call.start_after, &mut out);
            call.out_status = match status {
                message_queue::ReceiveStatus::Successful => STATUS_SUCCESSFUL,
                message_queue::ReceiveStatus::Empty => STATUS_EMPTY,
                message_queue::ReceiveStatus::ExceedsBufferSize => STATUS_EXCEEDS_BUFFER_SIZE,
            };
            call.out_written = written;
            if status == message_queue::ReceiveStatus::Successful {
                if let Err(e) = unsafe { write_user_bytes(call.buffer, call.length, &out[..written]) } {
                    return e;
                }
            }
            0
        }
        _ => -EINVAL,
    }
}

// ---------------------------------------------------------------------
// Filesystem
// ---------------------------------------------------------------------

pub fn sys_fs_open(path: *const u8, path_len: usize, flags: i32) -> isize {
    let path = match unsafe { read_user_str(path, path_len) } {
        Ok(p) => p,
        Err(e) => return e,
    };
    crate::vfs::vfs_open(&path, flags)
}

pub fn sys_fs_read(fd: i32, buf: *mut u8, count: usize) -> isize {
    if let Err(e) = validate_user_ptr(buf as *const u8, count) {
        return e;
    }
    let mut scratch = vec![0u8; count];
    let result = crate::vfs::vfs_read(fd, &mut scratch, count);
    if result > 0 {
        if let Err(e) = unsafe { write_user_bytes(buf, count, &scratch[..result as usize]) } {
            return e;
        }
    }
    result
}

pub fn sys_fs_write(fd: i32, buf: *const u8, count: usize) -> isize {
    let data = match unsafe { read_user_bytes(buf, count) } {
        Ok(d) => d,
        Err(e) => return e,
    };
    crate::vfs::vfs_write(fd, &data, count)
}

pub fn sys_fs_close(fd: i32) -> isize {
    crate::vfs::vfs_close(fd)
}

pub fn sys_fs_seek(fd: i32, offset: i64, whence: i32) -> isize {
    crate::vfs::vfs_lseek(fd, offset, whence)
}

pub fn sys_fs_tell(fd: i32) -> isize {
    crate::vfs::vfs_lseek(fd, 0, crate::vfs::protocol::SEEK_CUR)
}

/// Stat isn't wired to a real delegate message in this build — the
/// filesystem-delegate protocol itself is a black-box boundary here
/// (section 1).
pub fn sys_fs_stat(_fd: i32, _statbuf: *mut u8) -> isize {
    -ENOSYS
}

pub fn sys_fs_pipe(fds: *mut [i32; 2]) -> isize {
    if let Err(e) = validate_user_ptr(fds, 1) {
        return e;
    }
    let id = pipe::create();
    pipe::add_reference(id, false);
    pipe::add_reference(id, true);
    unsafe {
        (*fds)[0] = id as i32;
        (*fds)[1] = id as i32;
    }
    0
}

/// Same reasoning as `sys_fs_stat`: cloning a descriptor across the
/// delegate protocol isn't something this build implements.
pub fn sys_fs_clonefd(_fd: i32) -> isize {
    -ENOSYS
}

pub fn sys_fs_isatty(_fd: i32) -> isize {
    0
}

// ---------------------------------------------------------------------
// System / kernquery
// ---------------------------------------------------------------------

pub fn sys_kernquery(call: *mut KernqueryCall) -> isize {
    if let Err(e) = validate_user_ptr(call, 1) {
        return e;
    }
    let call = unsafe { &mut *call };

    match call.command {
        KERNQUERY_TASK_COUNT => {
            let count = task::count();
            if let Err(e) = unsafe { write_user_bytes(call.buffer, call.buffer_len, &count.to_le_bytes()) } {
                return e;
            }
            call.out_filled = core::mem::size_of::<usize>();
            call.out_status = STATUS_SUCCESSFUL;
            0
        }
        KERNQUERY_TASK_LIST => {
            let ids = task::all_ids();
            let capacity = call.buffer_len / core::mem::size_of::<usize>();
            let filled = ids.len().min(capacity);
            let mut encoded = Vec::with_capacity(filled * core::mem::size_of::<usize>());
            for id in ids.iter().take(filled) {
                encoded.extend_from_slice(&id.0.to_le_bytes());
            }
            if let Err(e) = unsafe { write_user_bytes(call.buffer, call.buffer_len, &encoded) } {
                return e;
            }
            call.out_filled = filled;
            call.out_status = STATUS_SUCCESSFUL;
            0
        }
        KERNQUERY_TASK_GET_BY_ID => {
            if call.buffer_len < core::mem::size_of::<usize>() {
                return -EINVAL;
            }
            let mut id_bytes = [0u8; core::mem::size_of::<usize>()];
            if let Err(e) = validate_user_ptr(call.buffer as *const u8, call.buffer_len) {
                return e;
            }
            id_bytes.copy_from_slice(unsafe {
                core::slice::from_raw_parts(call.buffer, core::mem::size_of::<usize>())
            });
            let id = TaskId(usize::from_le_bytes(id_bytes));

            let Some(handle) = task::get_by_id(id) else {
                call.out_status = STATUS_NOT_FOUND;
                return 0;
            };
            let locked = handle.lock();
            let mut encoded = Vec::new();
            encoded.extend_from_slice(&locked.process_id.0.to_le_bytes());
            encoded.push(locked.task_type as u8);
            if let Err(e) = unsafe { write_user_bytes(call.buffer, call.buffer_len, &encoded) } {
                return e;
            }
            call.out_filled = encoded.len();
            call.out_status = STATUS_SUCCESSFUL;
            0
        }
        _ => -EINVAL,
    }
}
