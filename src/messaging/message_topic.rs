/*
 * Message Topic
 *
 * A topic is a named, persistent multicast log rather than a per-task
 * mailbox: posting never removes anything, and receiving never advances
 * a shared read cursor. Each receiver tracks its own last-seen
 * transaction id and passes it back in as `start_after`; the log hands
 * back the first message with a strictly greater transaction. Topics
 * are created lazily by name and are never torn down, so unbounded
 * growth is a known property of this design, not a bug.
 */

use alloc::collections::{BTreeMap, VecDeque};
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::messaging::message_queue::{MessageTransaction, ReceiveStatus, SendStatus};
use crate::sync::WaitQueue;
use crate::tasking::task::TaskId;

struct PostedMessage {
    sender: TaskId,
    transaction: MessageTransaction,
    content: Vec<u8>,
}

impl PostedMessage {
    fn encoded_len(&self) -> usize {
        core::mem::size_of::<u32>() + core::mem::size_of::<MessageTransaction>() + self.content.len()
    }
}

struct Topic {
    messages: VecDeque<PostedMessage>,
    size: usize,
    next_transaction: MessageTransaction,
    waiters_receive: WaitQueue,
}

impl Topic {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            size: 0,
            next_transaction: 0,
            waiters_receive: WaitQueue::new(),
        }
    }
}

static TOPICS: Mutex<BTreeMap<String, Mutex<Topic>>> = Mutex::new(BTreeMap::new());

pub fn initialize() {
    TOPICS.lock().clear();
}

fn with_topic<R>(name: &str, f: impl FnOnce(&mut Topic) -> R) -> R {
    let mut map = TOPICS.lock();
    let topic = map
        .entry(name.into())
        .or_insert_with(|| Mutex::new(Topic::new()));
    let mut locked = topic.lock();
    f(&mut locked)
}

pub fn post(name: &str, sender: TaskId, content: &[u8]) -> SendStatus {
    with_topic(name, |topic| {
        let transaction = topic.next_transaction;
        topic.next_transaction += 1;

        let message = PostedMessage {
            sender,
            transaction,
            content: content.to_vec(),
        };
        topic.size += message.encoded_len();
        topic.messages.push_back(message);
        topic.waiters_receive.wake_all();
        SendStatus::Successful
    })
}

fn encode(message: &PostedMessage, out: &mut [u8]) -> usize {
    let len = message.encoded_len();
    out[0..4].copy_from_slice(&(message.sender.0 as u32).to_le_bytes());
    out[4..8].copy_from_slice(&message.transaction.to_le_bytes());
    out[8..len].copy_from_slice(&message.content);
    len
}

/// `start_after` is signed: -1 (or anything below the first transaction)
/// selects the earliest message still on the topic.
pub fn receive(name: &str, start_after: i64, out: &mut [u8]) -> (ReceiveStatus, usize) {
    with_topic(name, |topic| {
        let found = topic.messages.iter().find(|m| (m.transaction as i64) > start_after);

        let Some(message) = found else {
            return (ReceiveStatus::Empty, 0);
        };

        let encoded_len = message.encoded_len();
        if encoded_len > out.len() {
            return (ReceiveStatus::ExceedsBufferSize, 0);
        }

        let written = encode(message, out);
        (ReceiveStatus::Successful, written)
    })
}

pub fn wait_for_receive(name: &str, receiver: TaskId) {
    with_topic(name, |topic| topic.waiters_receive.add(receiver));
}

pub fn unwait_for_receive(name: &str, receiver: TaskId) {
    with_topic(name, |topic| topic.waiters_receive.remove(receiver));
}
