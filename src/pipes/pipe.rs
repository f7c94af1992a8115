/*
 * Pipe
 *
 * A byte-oriented ring buffer shared between one or more writers and
 * one or more readers, identified by an id handed out by the
 * filesystem delegate that fronts it (out of scope here; this module
 * only exposes the operations the delegate routes read/write/close
 * calls through). Reference counts are tracked separately for the read
 * and write ends so a pipe survives until both sides have been fully
 * closed, matching the split `references_read`/`references_write`
 * design rather than the single shared counter an older revision used.
 */

use alloc::collections::BTreeMap;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::sync::WaitQueue;
use crate::tasking::task::TaskId;

pub type PipeId = u32;

pub const DEFAULT_CAPACITY: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    Successful,
    Busy,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Successful,
    Busy,
    Error,
}

struct Pipe {
    buffer: alloc::vec::Vec<u8>,
    capacity: usize,
    size: usize,
    read_position: usize,
    write_position: usize,

    references_read: u16,
    references_write: u16,

    waiters_read: WaitQueue,
    waiters_write: WaitQueue,
}

impl Pipe {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: alloc::vec![0u8; capacity],
            capacity,
            size: 0,
            read_position: 0,
            write_position: 0,
            references_read: 0,
            references_write: 0,
            waiters_read: WaitQueue::new(),
            waiters_write: WaitQueue::new(),
        }
    }
}

static NEXT_PIPE_ID: AtomicU32 = AtomicU32::new(1);
static PIPES: Mutex<BTreeMap<PipeId, Mutex<Pipe>>> = Mutex::new(BTreeMap::new());

pub fn initialize() {
    PIPES.lock().clear();
}

pub fn create() -> PipeId {
    let id = NEXT_PIPE_ID.fetch_add(1, Ordering::SeqCst);
    PIPES.lock().insert(id, Mutex::new(Pipe::new(DEFAULT_CAPACITY)));
    id
}

/// `for_write` selects which reference count is incremented; a pipe
/// opened for both reading and writing calls this twice.
pub fn add_reference(id: PipeId, for_write: bool) {
    let map = PIPES.lock();
    let Some(pipe) = map.get(&id) else {
        log::warn!("pipe: tried to add reference to non-existing pipe {}", id);
        return;
    };
    let mut pipe = pipe.lock();
    if for_write {
        pipe.references_write += 1;
    } else {
        pipe.references_read += 1;
    }
}

pub fn remove_reference(id: PipeId, for_write: bool) {
    let should_delete = {
        let map = PIPES.lock();
        let Some(pipe) = map.get(&id) else {
            log::warn!("pipe: tried to remove reference from non-existing pipe {}", id);
            return;
        };
        let mut pipe = pipe.lock();
        if for_write {
            pipe.references_write = pipe.references_write.saturating_sub(1);
        } else {
            pipe.references_read = pipe.references_read.saturating_sub(1);
        }
        pipe.references_read == 0 && pipe.references_write == 0
    };

    if should_delete {
        PIPES.lock().remove(&id);
        log::debug!("pipe: deleted pipe {}", id);
    }
}

pub fn read(id: PipeId, out: &mut [u8]) -> (ReadStatus, usize) {
    let map = PIPES.lock();
    let Some(pipe) = map.get(&id) else {
        return (ReadStatus::Error, 0);
    };
    let mut pipe = pipe.lock();

    let length = out.len().min(pipe.size);
    if length == 0 {
        return (ReadStatus::Busy, 0);
    }

    let space_to_end = pipe.capacity - pipe.read_position;
    if length > space_to_end {
        let remaining = length - space_to_end;
        out[..space_to_end].copy_from_slice(&pipe.buffer[pipe.read_position..pipe.capacity]);
        out[space_to_end..length].copy_from_slice(&pipe.buffer[..remaining]);
        pipe.read_position = remaining;
    } else {
        out[..length].copy_from_slice(&pipe.buffer[pipe.read_position..pipe.read_position + length]);
        pipe.read_position += length;
    }

    if pipe.read_position == pipe.capacity {
        pipe.read_position = 0;
    }

    pipe.size -= length;
    pipe.waiters_write.wake_all();
    (ReadStatus::Successful, length)
}

pub fn write(id: PipeId, data: &[u8]) -> (WriteStatus, usize) {
    let map = PIPES.lock();
    let Some(pipe) = map.get(&id) else {
        return (WriteStatus::Error, 0);
    };
    let mut pipe = pipe.lock();

    let space = pipe.capacity - pipe.size;
    if space == 0 {
        return (WriteStatus::Busy, 0);
    }

    let length = data.len().min(space);
    let space_to_end = pipe.capacity - pipe.write_position;
    if length > space_to_end {
        let remaining = length - space_to_end;
        pipe.buffer[pipe.write_position..pipe.capacity].copy_from_slice(&data[..space_to_end]);
        pipe.buffer[..remaining].copy_from_slice(&data[space_to_end..length]);
        pipe.write_position = remaining;
    } else {
        pipe.buffer[pipe.write_position..pipe.write_position + length].copy_from_slice(&data[..length]);
        pipe.write_position += length;
    }

    if pipe.write_position == pipe.capacity {
        pipe.write_position = 0;
    }

    pipe.size += length;
    pipe.waiters_read.wake_all();
    (WriteStatus::Successful, length)
}

pub fn length(id: PipeId) -> Option<usize> {
    let map = PIPES.lock();
    map.get(&id).map(|pipe| pipe.lock().size)
}

pub fn truncate(id: PipeId) -> bool {
    let map = PIPES.lock();
    let Some(pipe) = map.get(&id) else {
        return false;
    };
    let mut pipe = pipe.lock();
    pipe.size = 0;
    pipe.read_position = 0;
    pipe.write_position = 0;
    true
}

pub fn wait_for_read(task: TaskId, id: PipeId) {
    let map = PIPES.lock();
    if let Some(pipe) = map.get(&id) {
        pipe.lock().waiters_read.add(task);
    }
}

pub fn wait_for_write(task: TaskId, id: PipeId) {
    let map = PIPES.lock();
    if let Some(pipe) = map.get(&id) {
        pipe.lock().waiters_write.add(task);
    }
}
