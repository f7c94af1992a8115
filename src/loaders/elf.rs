/*
 * ELF32 Loader
 *
 * Entry point for the spawn protocol's bootstrap phase (section 4.10):
 * validates the executable's header, then hands off to
 * `loaders::elf_object` for the recursive dependency-graph walk, applies
 * relocations once the whole graph has loaded, and composes the
 * process's TLS master image.
 *
 * Only the ELF32/i386 subset actually emitted by this kernel's own
 * toolchain is supported: one `PT_DYNAMIC` segment, REL-style (not RELA)
 * relocations, and the relocation kinds listed in
 * `apply_object_relocations`.
 */

use alloc::string::String;
use alloc::vec::Vec;

use super::elf_object::{self, ElfObjectId, TlsMasterInfo};
use super::elf_tls;
use crate::tasking::process::{SpawnStatus, SpawnValidationDetails, TlsMaster};

pub const ELF32_EHDR_SIZE: usize = 52;
const ELF32_PHDR_SIZE: usize = 32;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const EV_CURRENT: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;

pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_TLS: u32 = 7;
pub const PF_X: u32 = 1;
pub const PF_W: u32 = 2;

const DT_NULL: i32 = 0;
const DT_NEEDED: i32 = 1;
const DT_PLTRELSZ: i32 = 2;
const DT_HASH: i32 = 4;
const DT_STRTAB: i32 = 5;
const DT_SYMTAB: i32 = 6;
const DT_REL: i32 = 17;
const DT_RELSZ: i32 = 18;
const DT_RELENT: i32 = 19;
const DT_JMPREL: i32 = 23;
const DT_INIT_ARRAY: i32 = 25;
const DT_FINI_ARRAY: i32 = 26;
const DT_INIT_ARRAYSZ: i32 = 27;
const DT_FINI_ARRAYSZ: i32 = 28;
const DT_STRSZ: i32 = 10;
const DT_SYMENT: i32 = 11;
const DT_INIT: i32 = 12;
const DT_FINI: i32 = 13;
const DT_PREINIT_ARRAY: i32 = 32;
const DT_PREINIT_ARRAYSZ: i32 = 33;

const R_386_32: u32 = 1;
const R_386_PC32: u32 = 2;
const R_386_COPY: u32 = 5;
const R_386_GLOB_DAT: u32 = 6;
const R_386_JMP_SLOT: u32 = 7;
const R_386_RELATIVE: u32 = 8;
const R_386_TLS_DTPMOD32: u32 = 35;
const R_386_TLS_DTPOFF32: u32 = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Successful,
    FormatNotElf,
    FormatIoError,
    DependencyError,
    MemoryError,
}

pub struct LoadExecutableResult {
    pub status: LoadStatus,
    pub validation: SpawnValidationDetails,
    pub entry: usize,
    pub root_object: Option<ElfObjectId>,
    pub image_start: usize,
    pub image_end: usize,
    pub tls_master: TlsMaster,
}

/// Default user-space load base for the root executable (section 4.9:
/// `baseAddress` for the root object).
const ROOT_BASE_ADDRESS: usize = 0x0040_0000;

pub fn load_executable(fd: i32, range_pool: &mut crate::memory::VirtualRangePool) -> LoadExecutableResult {
    let root_id = ElfObjectId(0);
    // Object id 0 is reserved for "not yet assigned"; allocate the real
    // root id from the same counter every other object uses by loading
    // with `parent = None`, which `elf_object::load` treats as the root.
    let result = elf_object::load(None, root_id, "", fd, ROOT_BASE_ADDRESS, range_pool);

    let fail = |status: LoadStatus, validation: SpawnValidationDetails| LoadExecutableResult {
        status,
        validation,
        entry: 0,
        root_object: None,
        image_start: 0,
        image_end: 0,
        tls_master: TlsMaster::default(),
    };

    let Some(object_id) = result.object else {
        return fail(
            match result.status {
                SpawnStatus::DependencyError => LoadStatus::DependencyError,
                SpawnStatus::MemoryError => LoadStatus::MemoryError,
                SpawnStatus::IoError => LoadStatus::FormatIoError,
                _ => LoadStatus::FormatNotElf,
            },
            result.validation,
        );
    };

    if result.status != SpawnStatus::Successful {
        return fail(
            match result.status {
                SpawnStatus::DependencyError => LoadStatus::DependencyError,
                SpawnStatus::MemoryError => LoadStatus::MemoryError,
                _ => LoadStatus::FormatIoError,
            },
            result.validation,
        );
    }

    elf_object::apply_relocations(object_id);
    let tls_master = elf_tls::compose_master_image(object_id);

    let (entry, start, end) = elf_object::with_object(object_id, |o| (o.entry, o.start_address, o.end_address))
        .unwrap_or((0, 0, 0));

    LoadExecutableResult {
        status: LoadStatus::Successful,
        validation: SpawnValidationDetails::None,
        entry,
        root_object: Some(object_id),
        image_start: start,
        image_end: end,
        tls_master,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

pub struct Elf32Header {
    pub entry: u32,
    pub program_headers: Vec<ProgramHeader>,
}

impl Elf32Header {
    /// Parses and validates the ELF identification and program header
    /// table. `require_exec` additionally enforces `ET_EXEC` (used for
    /// the root executable; shared-library dependencies are `ET_DYN` and
    /// skip that one check).
    pub fn parse(data: &[u8], require_exec: bool) -> Result<Self, SpawnValidationDetails> {
        if data.len() < ELF32_EHDR_SIZE {
            return Err(SpawnValidationDetails::Elf32NotElf);
        }
        if data[0..4] != ELF_MAGIC {
            return Err(SpawnValidationDetails::Elf32NotElf);
        }
        if data[4] != ELFCLASS32 {
            return Err(SpawnValidationDetails::Elf32WrongClass);
        }
        if data[5] != ELFDATA2LSB {
            return Err(SpawnValidationDetails::Elf32WrongEncoding);
        }
        if data[6] != EV_CURRENT {
            return Err(SpawnValidationDetails::Elf32WrongVersion);
        }

        let e_type = u16::from_le_bytes([data[16], data[17]]);
        let e_machine = u16::from_le_bytes([data[18], data[19]]);
        let e_entry = u32::from_le_bytes([data[24], data[25], data[26], data[27]]);
        let e_phoff = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);
        let e_phentsize = u16::from_le_bytes([data[42], data[43]]);
        let e_phnum = u16::from_le_bytes([data[44], data[45]]);

        if e_machine != EM_386 {
            return Err(SpawnValidationDetails::Elf32WrongMachine);
        }
        if require_exec && e_type != ET_EXEC {
            return Err(SpawnValidationDetails::Elf32WrongType);
        }

        let mut program_headers = Vec::new();
        let ph_offset = e_phoff as usize;
        let ph_size = e_phentsize.max(ELF32_PHDR_SIZE as u16) as usize;
        for i in 0..(e_phnum as usize) {
            let off = ph_offset + i * ph_size;
            if off + ELF32_PHDR_SIZE > data.len() {
                break;
            }
            let b = &data[off..off + ELF32_PHDR_SIZE];
            program_headers.push(ProgramHeader {
                p_type: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
                p_offset: u32::from_le_bytes([b[4], b[5], b[6], b[7]]),
                p_vaddr: u32::from_le_bytes([b[8], b[9], b[10], b[11]]),
                p_filesz: u32::from_le_bytes([b[16], b[17], b[18], b[19]]),
                p_memsz: u32::from_le_bytes([b[20], b[21], b[22], b[23]]),
                p_flags: u32::from_le_bytes([b[24], b[25], b[26], b[27]]),
                p_align: u32::from_le_bytes([b[28], b[29], b[30], b[31]]),
            });
        }

        Ok(Self {
            entry: e_entry,
            program_headers,
        })
    }
}

pub struct DynSymbol {
    pub name: String,
    pub value: u32,
    /// `st_shndx != SHN_UNDEF`: whether this object actually defines the
    /// symbol, as opposed to merely importing it. Undefined entries
    /// exist in the symtab so relocations can name them by index, but
    /// must not be treated as local definitions during resolution.
    pub defined: bool,
}

/// One REL-style relocation, with the referenced symbol's name already
/// resolved out of the symbol table at parse time (the symtab entry is
/// only reachable here, while the dynamic segment is still mapped at a
/// known address; by the time relocations are applied the raw table
/// itself is no longer consulted).
#[derive(Debug, Clone)]
pub struct RelocationEntry {
    pub r_offset: u32,
    pub r_type: u32,
    /// Empty for relocation kinds that don't reference a symbol
    /// (`R_386_RELATIVE`) or whose symtab entry has no name.
    pub symbol_name: String,
}

#[derive(Default)]
pub struct DynamicInfo {
    pub needed: Vec<String>,
    pub symbols: Vec<DynSymbol>,
    pub relocations: Vec<RelocationEntry>,
    pub init: Option<usize>,
    pub fini: Option<usize>,
    pub init_array: Vec<usize>,
    pub fini_array: Vec<usize>,
    pub preinit_array: Vec<usize>,
}

impl DynamicInfo {
    /// Parses the `PT_DYNAMIC` segment already materialized in memory at
    /// `base_address + phdr.p_vaddr` (the segment was mapped by
    /// `elf_object::load` before this runs).
    pub fn parse(_fd: i32, phdr: &ProgramHeader, base_address: usize) -> Self {
        let mut info = DynamicInfo::default();
        let dyn_ptr = (base_address + phdr.p_vaddr as usize) as *const u32;
        let entries = phdr.p_memsz as usize / 8;

        let mut strtab: usize = 0;
        let mut symtab: usize = 0;
        let mut syment: usize = 16; // Elf32_Sym size
        let mut rel: usize = 0;
        let mut relsz: usize = 0;
        let mut relent: usize = 8; // Elf32_Rel size
        let mut needed_offsets = Vec::new();
        let mut init_array_base = 0usize;
        let mut init_array_size = 0usize;
        let mut fini_array_base = 0usize;
        let mut fini_array_size = 0usize;
        let mut preinit_array_base = 0usize;
        let mut preinit_array_size = 0usize;

        for i in 0..entries {
            let (tag, value) = unsafe {
                let entry = dyn_ptr.add(i * 2);
                (core::ptr::read_unaligned(entry) as i32, core::ptr::read_unaligned(entry.add(1)))
            };
            match tag {
                t if t == DT_NULL => break,
                t if t == DT_NEEDED => needed_offsets.push(value as usize),
                t if t == DT_STRTAB => strtab = base_address + value as usize,
                t if t == DT_SYMTAB => symtab = base_address + value as usize,
                t if t == DT_SYMENT => syment = value as usize,
                t if t == DT_STRSZ => {}
                t if t == DT_REL => rel = base_address + value as usize,
                t if t == DT_RELSZ => relsz = value as usize,
                t if t == DT_RELENT => relent = value as usize,
                t if t == DT_JMPREL => {
                    // PLT relocations are appended to the same REL list.
                    if rel == 0 {
                        rel = base_address + value as usize;
                    }
                }
                t if t == DT_PLTRELSZ => relsz += value as usize,
                t if t == DT_INIT => info.init = Some(base_address + value as usize),
                t if t == DT_FINI => info.fini = Some(base_address + value as usize),
                t if t == DT_INIT_ARRAY => init_array_base = base_address + value as usize,
                t if t == DT_FINI_ARRAY => fini_array_base = base_address + value as usize,
                t if t == DT_PREINIT_ARRAY => preinit_array_base = base_address + value as usize,
                t if t == DT_INIT_ARRAYSZ => init_array_size = value as usize,
                t if t == DT_FINI_ARRAYSZ => fini_array_size = value as usize,
                t if t == DT_PREINIT_ARRAYSZ => preinit_array_size = value as usize,
                t if t == DT_HASH => {}
                _ => {}
            }
        }

        info.init_array = read_ptr_array(init_array_base, init_array_size);
        info.fini_array = read_ptr_array(fini_array_base, fini_array_size);
        info.preinit_array = read_ptr_array(preinit_array_base, preinit_array_size);

        if strtab != 0 {
            for off in needed_offsets {
                info.needed.push(read_c_string(strtab + off));
            }
        }

        if symtab != 0 && strtab != 0 && syment > 0 {
            let count = if symtab < strtab { (strtab - symtab) / syment } else { 0 };
            for i in 0..count {
                let sym_ptr = (symtab + i * syment) as *const u8;
                let name_off = unsafe { core::ptr::read_unaligned(sym_ptr as *const u32) };
                let value = unsafe { core::ptr::read_unaligned(sym_ptr.add(4) as *const u32) };
                let shndx = unsafe { core::ptr::read_unaligned(sym_ptr.add(14) as *const u16) };
                if name_off == 0 {
                    continue;
                }
                info.symbols.push(DynSymbol {
                    name: read_c_string(strtab + name_off as usize),
                    value,
                    defined: shndx != 0,
                });
            }
        }

        if rel != 0 && relent > 0 {
            let count = relsz / relent;
            for i in 0..count {
                let entry = (rel + i * relent) as *const u32;
                let r_offset = unsafe { core::ptr::read_unaligned(entry) };
                let r_info = unsafe { core::ptr::read_unaligned(entry.add(1)) };
                let r_sym = r_info >> 8;
                let symbol_name = if symtab != 0 && strtab != 0 && syment > 0 {
                    let sym_ptr = (symtab + r_sym as usize * syment) as *const u32;
                    let name_off = unsafe { core::ptr::read_unaligned(sym_ptr) };
                    if name_off != 0 {
                        read_c_string(strtab + name_off as usize)
                    } else {
                        String::new()
                    }
                } else {
                    String::new()
                };
                info.relocations.push(RelocationEntry {
                    r_offset,
                    r_type: r_info & 0xff,
                    symbol_name,
                });
            }
        }

        info
    }
}

/// Reads a `byte_size`-long array of function pointers starting at
/// `base` (used for `DT_INIT_ARRAY`/`DT_FINI_ARRAY`/`DT_PREINIT_ARRAY`).
fn read_ptr_array(base: usize, byte_size: usize) -> Vec<usize> {
    if base == 0 || byte_size == 0 {
        return Vec::new();
    }
    let count = byte_size / core::mem::size_of::<u32>();
    (0..count)
        .map(|i| unsafe { core::ptr::read_unaligned((base as *const u32).add(i)) as usize })
        .collect()
}

fn read_c_string(addr: usize) -> String {
    let mut out = Vec::new();
    let mut ptr = addr as *const u8;
    unsafe {
        loop {
            let byte = core::ptr::read_unaligned(ptr);
            if byte == 0 || out.len() > 256 {
                break;
            }
            out.push(byte);
            ptr = ptr.add(1);
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Applies every relocation recorded for `object_id` against its
/// already-mapped segments. Symbol resolution walks the root's
/// lookup-order list (section 4.9).
pub fn apply_object_relocations(root_id: ElfObjectId, object_id: ElfObjectId) {
    let base = match elf_object::with_object(object_id, |o| o.base_address) {
        Some(b) => b,
        None => return,
    };
    apply_relocations_for(root_id, object_id, base);
}

fn apply_relocations_for(root_id: ElfObjectId, object_id: ElfObjectId, base: usize) {
    let relocations = PENDING_RELOCATIONS
        .lock()
        .remove(&object_id)
        .unwrap_or_default();

    for reloc in relocations {
        let r_type = reloc.r_type;
        let target = (base + reloc.r_offset as usize) as *mut u32;

        let symbol = if reloc.symbol_name.is_empty() {
            None
        } else {
            elf_object::with_object(object_id, |o| o.local_symbols.get(&reloc.symbol_name).copied()).flatten()
        };

        match r_type {
            t if t == R_386_32 => {
                if let Some(sym) = symbol {
                    unsafe {
                        let addend = core::ptr::read_unaligned(target);
                        core::ptr::write_unaligned(target, sym.absolute as u32 + addend);
                    }
                }
            }
            t if t == R_386_PC32 => {
                if let Some(sym) = symbol {
                    unsafe {
                        let addend = core::ptr::read_unaligned(target);
                        let value = (sym.absolute as u32).wrapping_add(addend).wrapping_sub(target as u32);
                        core::ptr::write_unaligned(target, value);
                    }
                }
            }
            t if t == R_386_GLOB_DAT || t == R_386_JMP_SLOT => {
                if let Some(sym) = symbol {
                    unsafe {
                        core::ptr::write_unaligned(target, sym.absolute as u32);
                    }
                } else if !reloc.symbol_name.is_empty() {
                    if let Some(sym) = resolve_by_name(root_id, &reloc.symbol_name) {
                        unsafe {
                            core::ptr::write_unaligned(target, sym.absolute as u32);
                        }
                    }
                }
            }
            t if t == R_386_RELATIVE => unsafe {
                let addend = core::ptr::read_unaligned(target);
                core::ptr::write_unaligned(target, base as u32 + addend);
            },
            t if t == R_386_COPY => {
                // Handled at load time by the caller copying the
                // dependency's definition into the executable's bss;
                // nothing to do at relocation time.
            }
            t if t == R_386_TLS_DTPMOD32 => unsafe {
                core::ptr::write_unaligned(target, object_id.0 as u32);
            },
            t if t == R_386_TLS_DTPOFF32 => {
                let offset = elf_object::with_object(object_id, |o| o.tls_part.map(|p| p.offset)).flatten();
                if let Some(offset) = offset {
                    unsafe {
                        core::ptr::write_unaligned(target, offset);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Walks the root's lookup-order list for the first defining object's
/// global symbol (section 4.9(b)): used when a `GLOB_DAT`/`JMP_SLOT`
/// relocation's symbol isn't defined locally, i.e. it's imported from
/// another object in the dependency graph.
fn resolve_by_name(root_id: ElfObjectId, name: &str) -> Option<elf_object::SymbolInfo> {
    elf_object::resolve_global_symbol(root_id, name)
}

static PENDING_RELOCATIONS: spin::Mutex<alloc::collections::BTreeMap<ElfObjectId, Vec<RelocationEntry>>> =
    spin::Mutex::new(alloc::collections::BTreeMap::new());

/// Called by `elf_object::load` right after parsing `DynamicInfo`, since
/// that is the only point at which the raw relocation table is
/// available; relocations are deferred and applied later, once every
/// object in the graph has loaded (section 4.9: "After all objects are
/// loaded...").
pub fn stash_relocations(object_id: ElfObjectId, relocations: Vec<RelocationEntry>) {
    PENDING_RELOCATIONS.lock().insert(object_id, relocations);
}
