/*
 * Message Queue
 *
 * Every task that has ever been sent a message owns a queue, created
 * lazily on first send. Delivery is asymmetric: a successful send wakes
 * its receiver directly by flipping the receiver task's status (the
 * receiver sleeps on its own task status, not on a wait queue), while a
 * receiver that frees up space wakes blocked senders through the
 * queue's `waiters_send` wait queue.
 *
 * Transaction ids returned by `next_transaction_id` are global and
 * monotonic, handed out from a counter behind its own mutex so callers
 * can correlate a request with its reply across an arbitrary number of
 * unrelated messages in between.
 */

use alloc::collections::{BTreeMap, VecDeque};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Mutex;

use crate::sync::WaitQueue;
use crate::tasking::task::TaskId;

pub type MessageTransaction = u32;
pub const TRANSACTION_NONE: MessageTransaction = 0;

/// Per-message cap; a single message larger than this is rejected outright.
pub const MAXIMUM_MESSAGE_LENGTH: usize = 8 * 1024;
/// Per-queue cap on the combined size of all pending messages.
pub const MAXIMUM_QUEUE_CONTENT: usize = 64 * 1024;

const HEADER_SIZE: usize = core::mem::size_of::<u32>() + core::mem::size_of::<MessageTransaction>();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Successful,
    Full,
    ExceedsMaximum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    Successful,
    Empty,
    ExceedsBufferSize,
}

pub struct QueuedMessage {
    pub sender: TaskId,
    pub transaction: MessageTransaction,
    pub content: Vec<u8>,
}

impl QueuedMessage {
    fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.content.len()
    }
}

struct Queue {
    owner: TaskId,
    messages: VecDeque<QueuedMessage>,
    size: usize,
    waiters_send: WaitQueue,
}

impl Queue {
    fn new(owner: TaskId) -> Self {
        Self {
            owner,
            messages: VecDeque::new(),
            size: 0,
            waiters_send: WaitQueue::new(),
        }
    }
}

static NEXT_TRANSACTION: AtomicU32 = AtomicU32::new(TRANSACTION_NONE + 1);
static QUEUES: Mutex<BTreeMap<TaskId, Mutex<Queue>>> = Mutex::new(BTreeMap::new());

pub fn initialize() {
    QUEUES.lock().clear();
}

pub fn next_transaction_id() -> MessageTransaction {
    NEXT_TRANSACTION.fetch_add(1, Ordering::SeqCst)
}

fn with_queue<R>(receiver: TaskId, f: impl FnOnce(&mut Queue) -> R) -> R {
    let mut map = QUEUES.lock();
    let queue = map.entry(receiver).or_insert_with(|| Mutex::new(Queue::new(receiver)));
    let mut locked = queue.lock();
    f(&mut locked)
}

pub fn send(sender: TaskId, receiver: TaskId, content: &[u8], tx: MessageTransaction) -> SendStatus {
    if content.len() > MAXIMUM_MESSAGE_LENGTH {
        return SendStatus::ExceedsMaximum;
    }

    let message = QueuedMessage {
        sender,
        transaction: tx,
        content: content.to_vec(),
    };

    let status = with_queue(receiver, |queue| {
        if queue.size + message.encoded_len() > MAXIMUM_QUEUE_CONTENT {
            return SendStatus::Full;
        }

        queue.size += message.encoded_len();
        queue.messages.push_back(message);
        SendStatus::Successful
    });

    if status == SendStatus::Successful {
        crate::tasking::task::wake(receiver);
    }
    status
}

/// Copies header fields plus content into `out`, in the encoding used to
/// report `encoded_len()`: sender id, transaction, then payload bytes.
fn encode(message: &QueuedMessage, out: &mut [u8]) -> usize {
    let len = message.encoded_len();
    out[0..4].copy_from_slice(&(message.sender.0 as u32).to_le_bytes());
    out[4..8].copy_from_slice(&message.transaction.to_le_bytes());
    out[8..len].copy_from_slice(&message.content);
    len
}

pub fn receive(receiver: TaskId, out: &mut [u8], tx: MessageTransaction) -> (ReceiveStatus, usize) {
    with_queue(receiver, |queue| {
        let index = queue
            .messages
            .iter()
            .position(|m| tx == TRANSACTION_NONE || m.transaction == tx);

        let Some(index) = index else {
            return (ReceiveStatus::Empty, 0);
        };

        let encoded_len = queue.messages[index].encoded_len();
        if encoded_len > out.len() {
            return (ReceiveStatus::ExceedsBufferSize, 0);
        }

        let message = queue.messages.remove(index).expect("index just located");
        queue.size -= encoded_len;
        let written = encode(&message, out);
        queue.waiters_send.wake_all();
        (ReceiveStatus::Successful, written)
    })
}

/// Drains and frees a task's receive queue; called from
/// `tasking::cleanup` once a task has been torn down.
pub fn task_removed(task: TaskId) {
    QUEUES.lock().remove(&task);
}

pub fn wait_for_send(sender: TaskId, receiver: TaskId) {
    with_queue(receiver, |queue| queue.waiters_send.add(sender));
}

pub fn unwait_for_send(sender: TaskId, receiver: TaskId) {
    with_queue(receiver, |queue| queue.waiters_send.remove(sender));
}
