/*
 * System Call Numbers
 *
 * Call numbers are partitioned by subsystem rather than mirroring a
 * host ABI: 1-29 tasking, 40-49 memory, 60-63 user mutex, 70-72
 * messaging, 80-97 filesystem, 120-129 system/kernquery.
 *
 * Mechanism: RAX carries the call number; RDI carries either a single
 * argument or a pointer to a call-specific struct (spawn, send/receive
 * message, user-mutex acquire, topic, kernquery); the POSIX-shaped
 * filesystem calls keep the multi-register (fd, buf, count) convention
 * instead of a wrapper struct, matching how they're already laid out
 * below. Return value in RAX, negative on error.
 */

/// Syscall error codes (negative values returned in RAX)
pub const ENOSYS: isize = 38;   // Function not implemented
pub const EBADF: isize = 9;     // Bad file descriptor
pub const EFAULT: isize = 14;   // Bad address (invalid pointer from userspace)
pub const EINVAL: isize = 22;   // Invalid argument
pub const ENOMEM: isize = 12;   // Out of memory
pub const ESPIPE: isize = 29;   // Illegal seek (e.g., seek on TTY)

// ---------------------------------------------------------------------
// Tasking (1-29)
// ---------------------------------------------------------------------

/// `SPAWN { path, securityLevel, args, workdir; out pid, status, validationDetails }`.
/// RDI points at a `structs::SpawnCall`.
pub const SYS_SPAWN: usize = 1;

/// Exit the calling task. Arguments: (status: i32) -> !
pub const SYS_EXIT: usize = 2;

/// Yield the CPU to the scheduler. No arguments.
pub const SYS_YIELD: usize = 3;

/// Wait for another task to become DEAD. Arguments: (task_id: usize) -> isize
pub const SYS_JOIN: usize = 4;

/// Flip every task of a process to DEAD. Arguments: (process_id: usize) -> isize
pub const SYS_KILL_ALL_TASKS: usize = 5;

// ---------------------------------------------------------------------
// Memory (40-49)
// ---------------------------------------------------------------------

/// Set program break. Arguments: (addr: *mut u8) -> isize
pub const SYS_BRK: usize = 40;

// ---------------------------------------------------------------------
// User mutex (60-63)
// ---------------------------------------------------------------------

/// Create a user mutex. Arguments: (reentrant: bool as usize) -> mutex id
pub const SYS_MUTEX_CREATE: usize = 60;

/// `USER_MUTEX_ACQUIRE { mutex, timeout, trying; out wasSet, hasTimedOut }`.
/// RDI points at a `structs::UserMutexAcquireCall`.
pub const SYS_MUTEX_ACQUIRE: usize = 61;

/// Release a user mutex. Arguments: (mutex: u32 as usize) -> isize
pub const SYS_MUTEX_RELEASE: usize = 62;

/// Destroy a user mutex. Arguments: (mutex: u32 as usize) -> isize
pub const SYS_MUTEX_DESTROY: usize = 63;

// ---------------------------------------------------------------------
// Messaging (70-72)
// ---------------------------------------------------------------------

/// `SEND_MESSAGE { receiver, buffer, length, mode, transaction; out status }`.
/// RDI points at a `structs::SendMessageCall`.
pub const SYS_SEND_MESSAGE: usize = 70;

/// `RECEIVE_MESSAGE { buffer, maximum, mode, transaction, break_condition; out status }`.
/// RDI points at a `structs::ReceiveMessageCall`.
pub const SYS_RECEIVE_MESSAGE: usize = 71;

/// Named topic post/receive, selected by `structs::TopicCall::mode`.
/// RDI points at a `structs::TopicCall`.
pub const SYS_TOPIC: usize = 72;

// ---------------------------------------------------------------------
// Filesystem (80-97)
// ---------------------------------------------------------------------

/// Open a path. Arguments: (path: *const u8, path_len: usize, flags: i32) -> fd
pub const SYS_FS_OPEN: usize = 80;

/// Arguments: (fd: i32, buf: *mut u8, count: usize) -> bytes read
pub const SYS_FS_READ: usize = 81;

/// Arguments: (fd: i32, buf: *const u8, count: usize) -> bytes written
pub const SYS_FS_WRITE: usize = 82;

/// Arguments: (fd: i32) -> isize
pub const SYS_FS_CLOSE: usize = 83;

/// Arguments: (fd: i32, offset: i64, whence: i32) -> new position
pub const SYS_FS_SEEK: usize = 84;

/// Arguments: (fd: i32) -> current position
pub const SYS_FS_TELL: usize = 85;

/// Arguments: (fd: i32, statbuf: *mut u8) -> isize
pub const SYS_FS_STAT: usize = 86;

/// Create a pipe. Arguments: (fds: *mut [i32; 2]) -> isize, fds[0] = read end, fds[1] = write end
pub const SYS_FS_PIPE: usize = 87;

/// Clone a file descriptor. Arguments: (fd: i32) -> new fd
pub const SYS_FS_CLONEFD: usize = 88;

/// Arguments: (fd: i32) -> 1 if TTY, 0 if not, negative on error
pub const SYS_FS_ISATTY: usize = 89;

// ---------------------------------------------------------------------
// System / kernquery (120-129)
// ---------------------------------------------------------------------

/// `KERNQUERY { command, buffer; out status }`. RDI points at a
/// `structs::KernqueryCall`.
pub const SYS_KERNQUERY: usize = 120;

/// `KERNQUERY` commands (the `command` field of `structs::KernqueryCall`).
pub const KERNQUERY_TASK_COUNT: u32 = 0;
pub const KERNQUERY_TASK_LIST: u32 = 1;
pub const KERNQUERY_TASK_GET_BY_ID: u32 = 2;
