/*
 * ELF Loader Test
 *
 * Exercises `loaders::elf::load_executable` against real ELF32/EM_386
 * images served through the VFS, the same path `tasking::spawn` uses.
 *
 * Tests cover:
 * - A minimal valid ELF32 executable (one PT_LOAD segment) loading
 *   successfully and landing its entry point inside the mapped image
 * - A non-ELF byte stream being rejected with FormatNotElf /
 *   Elf32NotElf
 * - A dynamic executable whose DT_NEEDED entry can't be resolved being
 *   rejected with DependencyError, no process left behind
 * - A dynamic executable whose DT_NEEDED entry resolves, with an
 *   R_386_GLOB_DAT relocation against an imported symbol landing on the
 *   defining library's own image range
 */

use alloc::vec::Vec;

use crate::loaders::elf::{self, LoadStatus};
use crate::loaders::elf_object;
use crate::memory::VirtualRangePool;
use crate::tasking::process::SpawnValidationDetails;
use crate::vfs;

const ELF32_EHDR_SIZE: usize = 52;
const ELF32_PHDR_SIZE: usize = 32;

/// A throwaway range pool sized like a real process's dynamic-library
/// region, for tests that call `load_executable` outside of `spawn`.
fn test_range_pool() -> VirtualRangePool {
    VirtualRangePool::new(0x1000_0000, 0x2000_0000)
}

/// Builds a minimal valid ELF32 executable: one `PT_LOAD` segment
/// covering the header itself plus a few bytes of code, entry point at
/// the start of that segment.
fn build_minimal_elf32() -> Vec<u8> {
    let entry_vaddr: u32 = 0x0000_1000;
    let filesz: u32 = ELF32_EHDR_SIZE as u32 + ELF32_PHDR_SIZE as u32 + 16;

    let mut image = alloc::vec![0u8; filesz as usize];

    // e_ident
    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1; // ELFCLASS32
    image[5] = 1; // ELFDATA2LSB
    image[6] = 1; // EV_CURRENT

    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    image[18..20].copy_from_slice(&3u16.to_le_bytes()); // e_machine = EM_386
    image[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
    image[24..28].copy_from_slice(&entry_vaddr.to_le_bytes()); // e_entry
    image[28..32].copy_from_slice(&(ELF32_EHDR_SIZE as u32).to_le_bytes()); // e_phoff
    image[42..44].copy_from_slice(&(ELF32_PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    image[44..46].copy_from_slice(&1u16.to_le_bytes()); // e_phnum

    // Program header: PT_LOAD covering the whole file, mapped at entry_vaddr.
    let ph_off = ELF32_EHDR_SIZE;
    image[ph_off..ph_off + 4].copy_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    image[ph_off + 4..ph_off + 8].copy_from_slice(&0u32.to_le_bytes()); // p_offset
    image[ph_off + 8..ph_off + 12].copy_from_slice(&entry_vaddr.to_le_bytes()); // p_vaddr
    image[ph_off + 16..ph_off + 20].copy_from_slice(&filesz.to_le_bytes()); // p_filesz
    image[ph_off + 20..ph_off + 24].copy_from_slice(&filesz.to_le_bytes()); // p_memsz
    image[ph_off + 24..ph_off + 28].copy_from_slice(&(1u32 | 4u32).to_le_bytes()); // PF_X | PF_R
    image[ph_off + 28..ph_off + 32].copy_from_slice(&0x1000u32.to_le_bytes()); // p_align

    image
}

/// Builds an ELF32 executable with a `PT_DYNAMIC` segment whose single
/// `DT_NEEDED` entry names a library not present anywhere the loader can
/// find it.
fn build_elf32_with_missing_dependency() -> Vec<u8> {
    const DT_NEEDED: u32 = 1;
    const DT_STRTAB: u32 = 5;
    const DT_NULL: u32 = 0;
    const PT_DYNAMIC: u32 = 2;

    let load_vaddr: u32 = 0x0000_1000;
    let lib_name = b"libmissing.so\0";

    let ph_off = ELF32_EHDR_SIZE as u32;
    let dyn_off = ph_off + 2 * ELF32_PHDR_SIZE as u32; // two program headers
    let strtab_off = dyn_off + 3 * 8; // three 8-byte dynamic entries
    let file_size = strtab_off + 1 + lib_name.len() as u32; // leading empty string

    let mut image = alloc::vec![0u8; file_size as usize];

    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1; // ELFCLASS32
    image[5] = 1; // ELFDATA2LSB
    image[6] = 1; // EV_CURRENT
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // e_type = ET_EXEC
    image[18..20].copy_from_slice(&3u16.to_le_bytes()); // e_machine = EM_386
    image[20..24].copy_from_slice(&1u32.to_le_bytes()); // e_version
    image[24..28].copy_from_slice(&load_vaddr.to_le_bytes()); // e_entry
    image[28..32].copy_from_slice(&ph_off.to_le_bytes()); // e_phoff
    image[42..44].copy_from_slice(&(ELF32_PHDR_SIZE as u16).to_le_bytes()); // e_phentsize
    image[44..46].copy_from_slice(&2u16.to_le_bytes()); // e_phnum

    // Program header 0: PT_LOAD covering the whole file at load_vaddr.
    let p0 = ph_off as usize;
    image[p0..p0 + 4].copy_from_slice(&1u32.to_le_bytes()); // p_type = PT_LOAD
    image[p0 + 4..p0 + 8].copy_from_slice(&0u32.to_le_bytes()); // p_offset
    image[p0 + 8..p0 + 12].copy_from_slice(&load_vaddr.to_le_bytes()); // p_vaddr
    image[p0 + 16..p0 + 20].copy_from_slice(&file_size.to_le_bytes()); // p_filesz
    image[p0 + 20..p0 + 24].copy_from_slice(&file_size.to_le_bytes()); // p_memsz
    image[p0 + 24..p0 + 28].copy_from_slice(&4u32.to_le_bytes()); // PF_R
    image[p0 + 28..p0 + 32].copy_from_slice(&0x1000u32.to_le_bytes()); // p_align

    // Program header 1: PT_DYNAMIC, mapped by the PT_LOAD segment above.
    let p1 = ph_off as usize + ELF32_PHDR_SIZE;
    let dyn_vaddr = load_vaddr + dyn_off;
    image[p1..p1 + 4].copy_from_slice(&PT_DYNAMIC.to_le_bytes());
    image[p1 + 4..p1 + 8].copy_from_slice(&dyn_off.to_le_bytes()); // p_offset
    image[p1 + 8..p1 + 12].copy_from_slice(&dyn_vaddr.to_le_bytes()); // p_vaddr
    image[p1 + 16..p1 + 20].copy_from_slice(&24u32.to_le_bytes()); // p_filesz
    image[p1 + 20..p1 + 24].copy_from_slice(&24u32.to_le_bytes()); // p_memsz
    image[p1 + 24..p1 + 28].copy_from_slice(&6u32.to_le_bytes()); // PF_R | PF_W
    image[p1 + 28..p1 + 32].copy_from_slice(&4u32.to_le_bytes()); // p_align

    // Dynamic array: DT_NEEDED -> offset 1 in strtab, DT_STRTAB -> its vaddr, DT_NULL.
    let strtab_vaddr = load_vaddr + strtab_off;
    let d = dyn_off as usize;
    image[d..d + 4].copy_from_slice(&DT_NEEDED.to_le_bytes());
    image[d + 4..d + 8].copy_from_slice(&1u32.to_le_bytes());
    image[d + 8..d + 12].copy_from_slice(&DT_STRTAB.to_le_bytes());
    image[d + 12..d + 16].copy_from_slice(&strtab_vaddr.to_le_bytes());
    image[d + 16..d + 20].copy_from_slice(&DT_NULL.to_le_bytes());
    image[d + 20..d + 24].copy_from_slice(&0u32.to_le_bytes());

    // String table: leading NUL (index 0, the "no name" entry), then the
    // missing library's soname at index 1.
    let s = strtab_off as usize;
    image[s] = 0;
    image[s + 1..s + 1 + lib_name.len()].copy_from_slice(lib_name);

    image
}

/// Builds a small shared-library image: one `PT_LOAD` segment plus a
/// `PT_DYNAMIC` segment whose symtab defines `foo` (`st_shndx != 0`) at
/// `lib_load_vaddr + 0x50`.
fn build_library_elf32() -> Vec<u8> {
    const PT_DYNAMIC: u32 = 2;
    const DT_SYMTAB: u32 = 6;
    const DT_STRTAB: u32 = 5;
    const DT_SYMENT: u32 = 11;
    const DT_NULL: u32 = 0;

    let load_vaddr: u32 = 0x0000_2000;
    let ph_off = ELF32_EHDR_SIZE as u32;
    let dyn_off = ph_off + 2 * ELF32_PHDR_SIZE as u32; // 116
    let symtab_off = dyn_off + 4 * 8; // 4 dynamic entries -> 148
    let strtab_off = symtab_off + 2 * 16; // 2 symtab entries -> 180
    let file_size = strtab_off + 1 + 4; // leading NUL + "foo\0"

    let mut image = alloc::vec![0u8; file_size as usize];

    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1;
    image[5] = 1;
    image[6] = 1;
    image[16..18].copy_from_slice(&2u16.to_le_bytes());
    image[18..20].copy_from_slice(&3u16.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..28].copy_from_slice(&load_vaddr.to_le_bytes());
    image[28..32].copy_from_slice(&ph_off.to_le_bytes());
    image[42..44].copy_from_slice(&(ELF32_PHDR_SIZE as u16).to_le_bytes());
    image[44..46].copy_from_slice(&2u16.to_le_bytes());

    let p0 = ph_off as usize;
    image[p0..p0 + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    image[p0 + 4..p0 + 8].copy_from_slice(&0u32.to_le_bytes());
    image[p0 + 8..p0 + 12].copy_from_slice(&load_vaddr.to_le_bytes());
    image[p0 + 16..p0 + 20].copy_from_slice(&file_size.to_le_bytes());
    image[p0 + 20..p0 + 24].copy_from_slice(&file_size.to_le_bytes());
    image[p0 + 24..p0 + 28].copy_from_slice(&6u32.to_le_bytes()); // PF_R | PF_W
    image[p0 + 28..p0 + 32].copy_from_slice(&0x1000u32.to_le_bytes());

    let p1 = ph_off as usize + ELF32_PHDR_SIZE;
    let dyn_vaddr = load_vaddr + dyn_off;
    image[p1..p1 + 4].copy_from_slice(&PT_DYNAMIC.to_le_bytes());
    image[p1 + 4..p1 + 8].copy_from_slice(&dyn_off.to_le_bytes());
    image[p1 + 8..p1 + 12].copy_from_slice(&dyn_vaddr.to_le_bytes());
    image[p1 + 16..p1 + 20].copy_from_slice(&32u32.to_le_bytes());
    image[p1 + 20..p1 + 24].copy_from_slice(&32u32.to_le_bytes());
    image[p1 + 24..p1 + 28].copy_from_slice(&6u32.to_le_bytes());
    image[p1 + 28..p1 + 32].copy_from_slice(&4u32.to_le_bytes());

    let symtab_vaddr = load_vaddr + symtab_off;
    let strtab_vaddr = load_vaddr + strtab_off;
    let d = dyn_off as usize;
    image[d..d + 4].copy_from_slice(&DT_SYMTAB.to_le_bytes());
    image[d + 4..d + 8].copy_from_slice(&symtab_vaddr.to_le_bytes());
    image[d + 8..d + 12].copy_from_slice(&DT_STRTAB.to_le_bytes());
    image[d + 12..d + 16].copy_from_slice(&strtab_vaddr.to_le_bytes());
    image[d + 16..d + 20].copy_from_slice(&DT_SYMENT.to_le_bytes());
    image[d + 20..d + 24].copy_from_slice(&16u32.to_le_bytes());
    image[d + 24..d + 28].copy_from_slice(&DT_NULL.to_le_bytes());
    image[d + 28..d + 32].copy_from_slice(&0u32.to_le_bytes());

    // symtab entry 0: null entry. Entry 1: "foo", defined at +0x50,
    // st_shndx = 1 (anything nonzero means "defined").
    let sym1 = symtab_off as usize + 16;
    image[sym1..sym1 + 4].copy_from_slice(&1u32.to_le_bytes()); // st_name -> strtab+1
    image[sym1 + 4..sym1 + 8].copy_from_slice(&0x50u32.to_le_bytes()); // st_value
    image[sym1 + 14..sym1 + 16].copy_from_slice(&1u16.to_le_bytes()); // st_shndx

    let s = strtab_off as usize;
    image[s] = 0;
    image[s + 1..s + 5].copy_from_slice(b"foo\0");

    image
}

/// Builds an ELF32 executable that imports `foo` from `libfoo.so` via a
/// single `R_386_GLOB_DAT` relocation against an undefined symtab entry.
/// Returns the image plus the relocated GOT slot's offset from the root
/// object's `start_address` once loaded.
fn build_elf32_with_resolvable_dependency() -> (Vec<u8>, usize) {
    const PT_DYNAMIC: u32 = 2;
    const DT_NEEDED: u32 = 1;
    const DT_STRTAB: u32 = 5;
    const DT_SYMTAB: u32 = 6;
    const DT_SYMENT: u32 = 11;
    const DT_REL: u32 = 17;
    const DT_RELSZ: u32 = 18;
    const DT_RELENT: u32 = 19;
    const DT_NULL: u32 = 0;
    const R_386_GLOB_DAT: u32 = 6;

    let load_vaddr: u32 = 0x0000_1000;
    let ph_off = ELF32_EHDR_SIZE as u32;
    let dyn_off = ph_off + 2 * ELF32_PHDR_SIZE as u32; // 116
    let symtab_off = dyn_off + 8 * 8; // 8 dynamic entries -> 180
    let rel_off = symtab_off + 2 * 16; // 2 symtab entries -> 212
    let strtab_off = rel_off + 8; // 1 rel entry -> 220
    let lib_name = b"libfoo.so\0";
    let strtab_len = 1 + lib_name.len() as u32 + 4; // NUL + name + "foo\0"
    let got_off = strtab_off + strtab_len; // relocation target word
    let file_size = got_off + 4;

    let mut image = alloc::vec![0u8; file_size as usize];

    image[0..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
    image[4] = 1;
    image[5] = 1;
    image[6] = 1;
    image[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    image[18..20].copy_from_slice(&3u16.to_le_bytes());
    image[20..24].copy_from_slice(&1u32.to_le_bytes());
    image[24..28].copy_from_slice(&load_vaddr.to_le_bytes());
    image[28..32].copy_from_slice(&ph_off.to_le_bytes());
    image[42..44].copy_from_slice(&(ELF32_PHDR_SIZE as u16).to_le_bytes());
    image[44..46].copy_from_slice(&2u16.to_le_bytes());

    let p0 = ph_off as usize;
    image[p0..p0 + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    image[p0 + 4..p0 + 8].copy_from_slice(&0u32.to_le_bytes());
    image[p0 + 8..p0 + 12].copy_from_slice(&load_vaddr.to_le_bytes());
    image[p0 + 16..p0 + 20].copy_from_slice(&file_size.to_le_bytes());
    image[p0 + 20..p0 + 24].copy_from_slice(&file_size.to_le_bytes());
    image[p0 + 24..p0 + 28].copy_from_slice(&6u32.to_le_bytes()); // PF_R | PF_W
    image[p0 + 28..p0 + 32].copy_from_slice(&0x1000u32.to_le_bytes());

    let p1 = ph_off as usize + ELF32_PHDR_SIZE;
    let dyn_vaddr = load_vaddr + dyn_off;
    image[p1..p1 + 4].copy_from_slice(&PT_DYNAMIC.to_le_bytes());
    image[p1 + 4..p1 + 8].copy_from_slice(&dyn_off.to_le_bytes());
    image[p1 + 8..p1 + 12].copy_from_slice(&dyn_vaddr.to_le_bytes());
    image[p1 + 16..p1 + 20].copy_from_slice(&64u32.to_le_bytes());
    image[p1 + 20..p1 + 24].copy_from_slice(&64u32.to_le_bytes());
    image[p1 + 24..p1 + 28].copy_from_slice(&6u32.to_le_bytes());
    image[p1 + 28..p1 + 32].copy_from_slice(&4u32.to_le_bytes());

    let symtab_vaddr = load_vaddr + symtab_off;
    let strtab_vaddr = load_vaddr + strtab_off;
    let rel_vaddr = load_vaddr + rel_off;
    let d = dyn_off as usize;
    image[d..d + 4].copy_from_slice(&DT_NEEDED.to_le_bytes());
    image[d + 4..d + 8].copy_from_slice(&1u32.to_le_bytes()); // strtab offset of "libfoo.so"
    image[d + 8..d + 12].copy_from_slice(&DT_STRTAB.to_le_bytes());
    image[d + 12..d + 16].copy_from_slice(&strtab_vaddr.to_le_bytes());
    image[d + 16..d + 20].copy_from_slice(&DT_SYMTAB.to_le_bytes());
    image[d + 20..d + 24].copy_from_slice(&symtab_vaddr.to_le_bytes());
    image[d + 24..d + 28].copy_from_slice(&DT_SYMENT.to_le_bytes());
    image[d + 28..d + 32].copy_from_slice(&16u32.to_le_bytes());
    image[d + 32..d + 36].copy_from_slice(&DT_REL.to_le_bytes());
    image[d + 36..d + 40].copy_from_slice(&rel_vaddr.to_le_bytes());
    image[d + 40..d + 44].copy_from_slice(&DT_RELSZ.to_le_bytes());
    image[d + 44..d + 48].copy_from_slice(&8u32.to_le_bytes());
    image[d + 48..d + 52].copy_from_slice(&DT_RELENT.to_le_bytes());
    image[d + 52..d + 56].copy_from_slice(&8u32.to_le_bytes());
    image[d + 56..d + 60].copy_from_slice(&DT_NULL.to_le_bytes());
    image[d + 60..d + 64].copy_from_slice(&0u32.to_le_bytes());

    // symtab entry 0: null. Entry 1: "foo", undefined (st_shndx = 0) -
    // this is what r_sym = 1 in the relocation below points at.
    let sym1 = symtab_off as usize + 16;
    let foo_name_off = 1 + lib_name.len() as u32; // right after "libfoo.so\0"
    image[sym1..sym1 + 4].copy_from_slice(&foo_name_off.to_le_bytes());

    // One R_386_GLOB_DAT relocation against symtab index 1 ("foo"),
    // targeting the GOT-like word at the end of the image.
    let got_vaddr = load_vaddr + got_off;
    let r = rel_off as usize;
    image[r..r + 4].copy_from_slice(&got_vaddr.to_le_bytes()); // r_offset
    let r_info = (1u32 << 8) | R_386_GLOB_DAT;
    image[r + 4..r + 8].copy_from_slice(&r_info.to_le_bytes());

    let s = strtab_off as usize;
    image[s] = 0;
    image[s + 1..s + 1 + lib_name.len()].copy_from_slice(lib_name);
    image[s + 1 + lib_name.len()..s + 1 + lib_name.len() + 4].copy_from_slice(b"foo\0");

    // `image_start` is `base_address + load_vaddr` (both page-aligned
    // here), so the GOT slot's offset from it equals `got_off` directly.
    (image, got_off as usize)
}

fn open_boot_file(path: &str, data: Vec<u8>) -> i32 {
    vfs::register_boot_file(path, data);
    vfs::vfs_open(path, vfs::protocol::O_RDONLY) as i32
}

/// Loads a minimal valid ELF32 executable and checks it succeeds with
/// the entry point landing inside the mapped image.
pub fn test_elf_header_parsing() -> bool {
    log::info!("TEST: load_executable with a minimal valid ELF32 executable");

    let image = build_minimal_elf32();
    let fd = open_boot_file("/boot/test-elf32-valid", image);
    if fd < 0 {
        log::error!("  FAIL: could not open test executable via VFS");
        return false;
    }

    let mut pool = test_range_pool();
    let result = elf::load_executable(fd, &mut pool);
    vfs::vfs_close(fd);

    if result.status != LoadStatus::Successful {
        log::error!("  FAIL: expected Successful, got {:?}", result.status);
        return false;
    }
    if result.validation != SpawnValidationDetails::None {
        log::error!("  FAIL: expected no validation detail, got {:?}", result.validation);
        return false;
    }
    if result.root_object.is_none() {
        log::error!("  FAIL: expected a root object id");
        return false;
    }
    if result.entry < result.image_start || result.entry >= result.image_end {
        log::error!(
            "  FAIL: entry 0x{:x} outside mapped image [0x{:x}, 0x{:x})",
            result.entry, result.image_start, result.image_end
        );
        return false;
    }

    log::info!(
        "  PASS: loaded, entry=0x{:x}, image=[0x{:x}, 0x{:x})",
        result.entry, result.image_start, result.image_end
    );
    true
}

/// Loads a file that isn't an ELF image at all and checks it's rejected
/// with the format-error status and `Elf32NotElf` validation detail.
pub fn test_elf_invalid_magic() -> bool {
    log::info!("TEST: load_executable with a non-ELF file");

    let not_elf = alloc::vec![b'M', b'Z', 0x90, 0x00, 0x03, 0x00, 0x00, 0x00];
    let fd = open_boot_file("/boot/test-elf32-invalid", not_elf);
    if fd < 0 {
        log::error!("  FAIL: could not open test file via VFS");
        return false;
    }

    let mut pool = test_range_pool();
    let result = elf::load_executable(fd, &mut pool);
    vfs::vfs_close(fd);

    if result.status != LoadStatus::FormatNotElf {
        log::error!("  FAIL: expected FormatNotElf, got {:?}", result.status);
        return false;
    }
    if result.validation != SpawnValidationDetails::Elf32NotElf {
        log::error!("  FAIL: expected Elf32NotElf, got {:?}", result.validation);
        return false;
    }

    log::info!("  PASS: non-ELF file rejected with Elf32NotElf");
    true
}

/// Loads a dynamic executable whose `DT_NEEDED` library isn't present in
/// the library search path and checks it's rejected with
/// `DependencyError` rather than partially succeeding.
pub fn test_elf_spawn_missing_dependency() -> bool {
    log::info!("TEST: load_executable with an unresolvable DT_NEEDED dependency");

    let image = build_elf32_with_missing_dependency();
    let fd = open_boot_file("/boot/test-elf32-missing-dep", image);
    if fd < 0 {
        log::error!("  FAIL: could not open test executable via VFS");
        return false;
    }

    let mut pool = test_range_pool();
    let result = elf::load_executable(fd, &mut pool);
    vfs::vfs_close(fd);

    if result.status != LoadStatus::DependencyError {
        log::error!("  FAIL: expected DependencyError, got {:?}", result.status);
        return false;
    }

    log::info!("  PASS: missing dependency rejected with DependencyError");
    true
}

/// Loads an executable that imports `foo` from a resolvable `libfoo.so`
/// dependency via an `R_386_GLOB_DAT` relocation, and checks the
/// relocated GOT slot ends up holding an address inside the library's
/// own mapped image range, not the root's.
pub fn test_elf_dynamic_relocation_resolves_import() -> bool {
    log::info!("TEST: load_executable resolving a GLOB_DAT import across a dependency");

    vfs::register_boot_file("/lib/libfoo.so", build_library_elf32());

    let (image, got_offset) = build_elf32_with_resolvable_dependency();
    let fd = open_boot_file("/boot/test-elf32-resolvable-dep", image);
    if fd < 0 {
        log::error!("  FAIL: could not open test executable via VFS");
        return false;
    }

    let mut pool = test_range_pool();
    let result = elf::load_executable(fd, &mut pool);
    vfs::vfs_close(fd);

    if result.status != LoadStatus::Successful {
        log::error!("  FAIL: expected Successful, got {:?}", result.status);
        return false;
    }

    let Some(root_id) = result.root_object else {
        log::error!("  FAIL: expected a root object id");
        return false;
    };

    let Some(dep_id) = elf_object::with_object(root_id, |root| root.loaded_objects.get("libfoo.so").copied())
        .flatten()
    else {
        log::error!("  FAIL: libfoo.so was not recorded as loaded");
        return false;
    };

    let Some((dep_start, dep_end, dep_base)) =
        elf_object::with_object(dep_id, |o| (o.start_address, o.end_address, o.base_address))
    else {
        log::error!("  FAIL: dependency object disappeared after load");
        return false;
    };

    // `image_start` is `base_address + load_vaddr` (both page-aligned in
    // this fixture), so the GOT slot's runtime address is just its offset
    // from `image_start`.
    let got_addr = result.image_start + got_offset;
    let resolved = unsafe { core::ptr::read_unaligned(got_addr as *const u32) } as usize;

    if resolved < dep_start || resolved >= dep_end {
        log::error!(
            "  FAIL: resolved address 0x{:x} outside dependency image [0x{:x}, 0x{:x})",
            resolved, dep_start, dep_end
        );
        return false;
    }
    if resolved != dep_base + 0x2000 + 0x50 {
        log::error!(
            "  FAIL: resolved address 0x{:x} does not match foo's expected definition",
            resolved
        );
        return false;
    }

    log::info!(
        "  PASS: GLOB_DAT resolved to 0x{:x}, inside libfoo.so's image [0x{:x}, 0x{:x})",
        resolved, dep_start, dep_end
    );
    true
}
