/*
 * BOOTBOOT Protocol Structures
 *
 * Rust bindings for the BOOTBOOT boot loader's handoff structure
 * (https://gitlab.com/bztsrc/bootboot). The loader maps this structure,
 * the environment string, the framebuffer, and the kernel's own stack
 * at fixed virtual addresses defined by the linker script; this module
 * only describes their layout, it doesn't parse or validate anything
 * about the boot process itself.
 */

#![allow(non_camel_case_types)]

pub const BOOTBOOT_MAGIC: [u8; 4] = *b"BOOT";

/// Memory map entry type: usable RAM.
pub const MMAP_FREE: u32 = 1;
pub const MMAP_USED: u32 = 0;
pub const MMAP_ACPI: u32 = 2;
pub const MMAP_MMIO: u32 = 3;

/// Kernel link-time virtual base address (see linker script).
pub const BOOTBOOT_CORE: u64 = 0xffff_ffff_ffe0_0000;

/// One BIOS/UEFI memory map entry. `size`'s low 4 bits hold the type
/// (`MMAP_*`), the rest is the region length in bytes.
#[repr(C, packed)]
pub struct MMapEnt {
    pub ptr: u64,
    pub size: u64,
}

/// The BOOTBOOT handoff structure, placed by the loader at a fixed
/// virtual address before jumping to the kernel entry point.
#[repr(C, packed)]
pub struct BOOTBOOT {
    pub magic: [u8; 4],
    pub size: u32,
    pub protocol: u8,
    pub fb_type: u8,
    pub numcores: u16,
    pub bspid: u16,
    pub timezone: i16,
    pub datetime: [u8; 8],
    pub initrd_ptr: u64,
    pub initrd_size: u64,
    pub fb_ptr: u64,
    pub fb_size: u32,
    pub fb_width: u32,
    pub fb_height: u32,
    pub fb_scanline: u32,
    pub arch: BootbootArch,
    /// Flexible array of `MMapEnt`, `(size - 128) / 16` entries long.
    pub mmap: MMapEnt,
}

#[repr(C, packed)]
pub struct BootbootArch {
    pub acpi_ptr: u64,
    pub smbi_ptr: u64,
    pub efi_ptr: u64,
    pub mp_ptr: u64,
    pub unused: [u64; 4],
}

unsafe extern "C" {
    /// The BOOTBOOT structure, mapped by the loader at a fixed address.
    pub static bootboot: BOOTBOOT;
    /// Start of the linear framebuffer, mapped by the loader.
    pub static mut fb: u8;
    /// NUL-terminated environment string (`key=value` lines).
    pub static environment: u8;
}
