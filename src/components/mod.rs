/*
 * Userspace-facing Components
 *
 * Higher-level kernel components built on top of the driver layer,
 * exposed to userspace through device files or syscalls.
 */

pub mod tty;
