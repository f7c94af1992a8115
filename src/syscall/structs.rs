/*
 * Syscall call structs
 *
 * The handful of calls whose arguments don't fit comfortably in three
 * registers (spawn, messaging, user-mutex acquire, kernquery) take a
 * single pointer to one of these instead; the handler reads the `in`
 * fields and writes the `out` ones back in place before returning.
 */

#[repr(C)]
pub struct SpawnCall {
    pub path: *const u8,
    pub path_len: usize,
    pub security_level: u32,
    pub args: *const u8,
    pub args_len: usize,
    pub workdir: *const u8,
    pub workdir_len: usize,
    pub out_pid: usize,
    pub out_status: u32,
    pub out_validation: u32,
}

#[repr(C)]
pub struct SendMessageCall {
    pub receiver: usize,
    pub buffer: *const u8,
    pub length: usize,
    pub mode: u32,
    pub transaction: u32,
    pub out_status: u32,
}

#[repr(C)]
pub struct ReceiveMessageCall {
    pub buffer: *mut u8,
    pub maximum: usize,
    pub mode: u32,
    pub transaction: u32,
    pub break_condition: u32,
    pub out_status: u32,
    pub out_written: usize,
}

#[repr(C)]
pub struct TopicCall {
    pub name: *const u8,
    pub name_len: usize,
    pub mode: u32,
    pub buffer: *mut u8,
    pub length: usize,
    /// Signed so callers can pass -1 for "everything", matching a topic
    /// with no messages observed yet; transactions themselves are never
    /// negative.
    pub start_after: i64,
    pub out_status: u32,
    pub out_written: usize,
}

pub const TOPIC_MODE_POST: u32 = 0;
pub const TOPIC_MODE_RECEIVE: u32 = 1;

#[repr(C)]
pub struct UserMutexAcquireCall {
    pub mutex: u32,
    pub timeout_ms: u64,
    pub trying: u8,
    pub out_was_set: u8,
    pub out_has_timed_out: u8,
}

#[repr(C)]
pub struct KernqueryCall {
    pub command: u32,
    pub buffer: *mut u8,
    pub buffer_len: usize,
    pub out_status: u32,
    pub out_filled: usize,
}

/// Mirrors `userMutexTryAcquire`/`Acquire`'s three-way result as wire
/// values for `UserMutexAcquireCall::out_was_set`/`out_has_timed_out`
/// and `KernqueryCall::out_status`.
pub const STATUS_SUCCESSFUL: u32 = 0;
pub const STATUS_FULL: u32 = 1;
pub const STATUS_EXCEEDS_MAXIMUM: u32 = 2;
pub const STATUS_EMPTY: u32 = 3;
pub const STATUS_EXCEEDS_BUFFER_SIZE: u32 = 4;
pub const STATUS_NOT_FOUND: u32 = 5;

pub const SEND_MODE_NON_BLOCKING: u32 = 0;
pub const SEND_MODE_BLOCKING: u32 = 1;
