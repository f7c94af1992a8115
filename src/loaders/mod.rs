/*
 * Binary Loaders
 *
 * ELF32 is the only binary format this kernel loads. `elf` is the
 * top-level entry point (header validation, relocation pass, TLS master
 * composition); `elf_object` owns the loaded-object graph and dependency
 * resolution; `elf_tls` composes and instantiates per-thread TLS images.
 */

pub mod elf;
pub mod elf_object;
pub mod elf_tls;

pub use elf::{load_executable, LoadExecutableResult, LoadStatus};
