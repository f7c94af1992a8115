/*
 * ELF32 Object Graph
 *
 * An "object" is one loaded ELF image: the root executable or one of its
 * shared-library dependencies. Objects form a tree (`parent` pointers)
 * but dependency resolution and symbol lookup both work over the whole
 * graph, so the root additionally keeps a flat `loaded_objects` map
 * (soname -> object, used as the DFS visited-set) and a
 * `symbol_lookup_order` list (depth-first post-order of loading, which
 * fixes global-symbol resolution order).
 *
 * Memory mapping itself (allocating frames, writing page table entries)
 * is delegated to `crate::memory`; this module only decides *what* to
 * map and *where* bytes come from.
 */

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Mutex;
use x86_64::structures::paging::PageTableFlags;
use x86_64::{PhysAddr, VirtAddr};

use crate::memory::{paging, phys, VirtualRangePool};
use crate::tasking::process::{SpawnStatus, SpawnValidationDetails};
use crate::vfs;

pub const PAGE_SIZE: usize = 4096;

/// Fixed-size slot reserved per dependency in the owning process's
/// virtual-range pool. Dependencies are position-independent (`ET_DYN`),
/// so any slot this size or larger fits; sized generously enough for the
/// small shared libraries this kernel's own toolchain produces.
const DEPENDENCY_SLOT_SIZE: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElfObjectId(pub u32);

#[derive(Debug, Clone, Copy)]
pub struct SymbolInfo {
    pub object: ElfObjectId,
    pub absolute: usize,
    pub value: usize,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TlsPart {
    /// Offset of this object's TLS data within the kernel-owned content
    /// buffer copied out of the file at load time.
    pub copy_size: u32,
    pub total_size: u32,
    pub alignment: u32,
    /// Offset of this object's TLS content within the process TLS master
    /// image, assigned once the whole graph has loaded.
    pub offset: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TlsMasterInfo {
    pub total_size: u32,
    pub user_thread_offset: u32,
}

pub struct ElfObject {
    pub id: ElfObjectId,
    pub parent: Option<ElfObjectId>,
    pub root: bool,
    pub name: String,

    pub entry: usize,
    pub dependencies: Vec<String>,

    pub start_address: usize,
    pub end_address: usize,
    pub base_address: usize,
    /// Set for dependencies loaded at a base address drawn from the
    /// owning address space's range pool (`(start, size)`); `None` for
    /// the root executable, which always loads at the fixed
    /// `ROOT_BASE_ADDRESS` and isn't pool-managed.
    pub range_alloc: Option<(usize, usize)>,

    pub tls_part: Option<TlsPart>,
    pub tls_content: Vec<u8>,
    /// Root only.
    pub tls_master: Option<TlsMasterInfo>,

    pub local_symbols: BTreeMap<String, SymbolInfo>,
    /// Root only: filled in load order, first definition wins.
    pub global_symbols: BTreeMap<String, SymbolInfo>,
    /// Root only: DFS visited-set, keyed by soname.
    pub loaded_objects: BTreeMap<String, ElfObjectId>,
    /// Root only: depth-first post-order of loading.
    pub symbol_lookup_order: Vec<ElfObjectId>,

    pub init: Option<usize>,
    pub fini: Option<usize>,
    pub init_array: Vec<usize>,
    pub fini_array: Vec<usize>,
    pub preinit_array: Vec<usize>,
}

impl ElfObject {
    fn new(id: ElfObjectId, parent: Option<ElfObjectId>, name: String, root: bool) -> Self {
        Self {
            id,
            parent,
            root,
            name,
            entry: 0,
            dependencies: Vec::new(),
            start_address: 0,
            end_address: 0,
            base_address: 0,
            range_alloc: None,
            tls_part: None,
            tls_content: Vec::new(),
            tls_master: None,
            local_symbols: BTreeMap::new(),
            global_symbols: BTreeMap::new(),
            loaded_objects: BTreeMap::new(),
            symbol_lookup_order: Vec::new(),
            init: None,
            fini: None,
            init_array: Vec::new(),
            fini_array: Vec::new(),
            preinit_array: Vec::new(),
        }
    }
}

static NEXT_OBJECT_ID: Mutex<u32> = Mutex::new(1);
static OBJECTS: Mutex<BTreeMap<ElfObjectId, ElfObject>> = Mutex::new(BTreeMap::new());

fn next_id() -> ElfObjectId {
    let mut next = NEXT_OBJECT_ID.lock();
    let id = ElfObjectId(*next);
    *next += 1;
    id
}

pub fn with_object<R>(id: ElfObjectId, f: impl FnOnce(&ElfObject) -> R) -> Option<R> {
    OBJECTS.lock().get(&id).map(f)
}

pub fn with_object_mut<R>(id: ElfObjectId, f: impl FnOnce(&mut ElfObject) -> R) -> Option<R> {
    OBJECTS.lock().get_mut(&id).map(f)
}

pub struct ObjectLoadResult {
    pub status: SpawnStatus,
    pub validation: SpawnValidationDetails,
    pub object: Option<ElfObjectId>,
}

/// Loads one object (root or dependency) at `base_address`, recursing
/// into its DT_NEEDED dependencies before returning. `fd` must already be
/// open and positioned at the start of the file. `pool` hands out base
/// addresses for dependencies (the root's `base_address` is always fixed
/// by the caller and isn't drawn from it); pass the same pool down
/// through the whole recursion so siblings don't collide.
pub fn load(
    parent: Option<ElfObjectId>,
    root_id: ElfObjectId,
    name: &str,
    fd: i32,
    base_address: usize,
    pool: &mut VirtualRangePool,
) -> ObjectLoadResult {
    let mut header_bytes = [0u8; super::elf::ELF32_EHDR_SIZE];
    if !read_at(fd, 0, &mut header_bytes) {
        return ObjectLoadResult {
            status: SpawnStatus::IoError,
            validation: SpawnValidationDetails::Elf32IoError,
            object: None,
        };
    }

    let is_root = parent.is_none();
    let header = match super::elf::Elf32Header::parse(&header_bytes, is_root) {
        Ok(h) => h,
        Err(validation) => {
            return ObjectLoadResult {
                status: SpawnStatus::FormatError,
                validation,
                object: None,
            };
        }
    };

    let object_id = if is_root { root_id } else { next_id() };
    let mut object = ElfObject::new(object_id, parent, name.to_string(), is_root);
    object.base_address = base_address;
    object.entry = base_address + header.entry as usize;
    if !is_root {
        object.range_alloc = Some((base_address, DEPENDENCY_SLOT_SIZE));
    }

    let mut dynamic: Option<super::elf::DynamicInfo> = None;

    for phdr in &header.program_headers {
        match phdr.p_type {
            super::elf::PT_LOAD => {
                let seg = load_segment(fd, phdr, base_address);
                if seg.status != SpawnStatus::Successful {
                    return ObjectLoadResult {
                        status: seg.status,
                        validation: SpawnValidationDetails::None,
                        object: None,
                    };
                }
                if object.start_address == 0 || seg.aligned_start < object.start_address {
                    object.start_address = seg.aligned_start;
                }
                if seg.aligned_end > object.end_address {
                    object.end_address = seg.aligned_end;
                }
            }
            super::elf::PT_DYNAMIC => {
                dynamic = Some(super::elf::DynamicInfo::parse(fd, phdr, base_address));
            }
            super::elf::PT_TLS => {
                object.tls_content = read_range(fd, phdr.p_offset as usize, phdr.p_filesz as usize);
                object.tls_part = Some(TlsPart {
                    copy_size: phdr.p_filesz,
                    total_size: phdr.p_memsz,
                    alignment: phdr.p_align.max(1),
                    offset: 0,
                });
            }
            _ => {}
        }
    }

    if let Some(dyn_info) = &dynamic {
        object.dependencies = dyn_info.needed.clone();
        object.init = dyn_info.init;
        object.fini = dyn_info.fini;
        object.init_array = dyn_info.init_array.clone();
        object.fini_array = dyn_info.fini_array.clone();
        object.preinit_array = dyn_info.preinit_array.clone();
        inspect_symbols(&mut object, dyn_info);
        super::elf::stash_relocations(object_id, dyn_info.relocations.clone());
    }

    OBJECTS.lock().insert(object_id, object);

    // Registers this object under its soname in the root's DFS
    // visited-set, whether it's the root itself (name "") or a
    // dependency, so `is_dependency_loaded` can find it on repeat
    // DT_NEEDED entries or diamond dependencies.
    with_object_mut(root_id, |root| {
        root.loaded_objects.insert(name.to_string(), object_id);
    });

    let needed = OBJECTS.lock().get(&object_id).map(|o| o.dependencies.clone()).unwrap_or_default();
    for dep_name in needed {
        if is_dependency_loaded(root_id, &dep_name) {
            continue;
        }
        let dep_fd = match open_dependency(&dep_name) {
            Some(fd) => fd,
            None => {
                return ObjectLoadResult {
                    status: SpawnStatus::DependencyError,
                    validation: SpawnValidationDetails::None,
                    object: Some(object_id),
                };
            }
        };

        let dep_base = match pool.alloc(DEPENDENCY_SLOT_SIZE) {
            Some(base) => base,
            None => {
                return ObjectLoadResult {
                    status: SpawnStatus::MemoryError,
                    validation: SpawnValidationDetails::None,
                    object: Some(object_id),
                };
            }
        };
        let result = load(Some(object_id), root_id, &dep_name, dep_fd, dep_base, pool);
        if result.status != SpawnStatus::Successful {
            return result;
        }
    }

    with_object_mut(root_id, |root| {
        root.symbol_lookup_order.push(object_id);
    });

    ObjectLoadResult {
        status: SpawnStatus::Successful,
        validation: SpawnValidationDetails::None,
        object: Some(object_id),
    }
}

pub struct SegmentLoadResult {
    pub status: SpawnStatus,
    pub aligned_start: usize,
    pub aligned_end: usize,
}

/// Reserves the page range for one PT_LOAD segment, reads `p_filesz`
/// bytes from the file into it, and zero-fills the remainder up to
/// `p_memsz`.
fn load_segment(fd: i32, phdr: &super::elf::ProgramHeader, base_address: usize) -> SegmentLoadResult {
    let vaddr = base_address + phdr.p_vaddr as usize;
    let aligned_start = align_down(vaddr, PAGE_SIZE);
    let aligned_end = align_up(vaddr + phdr.p_memsz as usize, PAGE_SIZE);

    let mut flags = PageTableFlags::PRESENT | PageTableFlags::USER_ACCESSIBLE;
    if phdr.p_flags & super::elf::PF_W != 0 {
        flags |= PageTableFlags::WRITABLE;
    }

    let mut page = aligned_start;
    while page < aligned_end {
        let frame = match phys::alloc_frame() {
            Some(f) => f,
            None => {
                return SegmentLoadResult {
                    status: SpawnStatus::MemoryError,
                    aligned_start,
                    aligned_end,
                }
            }
        };
        if paging::map_user_page(VirtAddr::new(page as u64), PhysAddr::new(frame.start_address()), flags).is_err() {
            return SegmentLoadResult {
                status: SpawnStatus::MemoryError,
                aligned_start,
                aligned_end,
            };
        }
        unsafe {
            core::ptr::write_bytes(page as *mut u8, 0, PAGE_SIZE);
        }
        page += PAGE_SIZE;
    }

    if phdr.p_filesz > 0 {
        let data = read_range(fd, phdr.p_offset as usize, phdr.p_filesz as usize);
        unsafe {
            core::ptr::copy_nonoverlapping(data.as_ptr(), vaddr as *mut u8, data.len());
        }
    }

    SegmentLoadResult {
        status: SpawnStatus::Successful,
        aligned_start,
        aligned_end,
    }
}

fn inspect_symbols(object: &mut ElfObject, dynamic: &super::elf::DynamicInfo) {
    for sym in &dynamic.symbols {
        if sym.name.is_empty() || !sym.defined {
            continue;
        }
        let info = SymbolInfo {
            object: object.id,
            absolute: object.base_address + sym.value as usize,
            value: sym.value as usize,
        };
        object.local_symbols.insert(sym.name.clone(), info);
    }
}

/// Applies relocations for every object in the root's lookup-order list.
/// Must run only after the whole dependency graph has finished loading.
pub fn apply_relocations(root_id: ElfObjectId) {
    let order = with_object(root_id, |root| root.symbol_lookup_order.clone()).unwrap_or_default();
    for object_id in order {
        super::elf::apply_object_relocations(root_id, object_id);
    }
}

/// Resolves `name` by walking the root's lookup-order list in order and
/// returning the first defining object's global symbol. The result is
/// cached in the root's `global_symbols` map (first definition wins, so
/// the cached entry never changes once written) to make repeat lookups
/// of the same imported symbol across many relocations cheap.
pub fn resolve_global_symbol(root_id: ElfObjectId, name: &str) -> Option<SymbolInfo> {
    if let Some(cached) = with_object(root_id, |root| root.global_symbols.get(name).copied()).flatten() {
        return Some(cached);
    }

    let order = with_object(root_id, |root| root.symbol_lookup_order.clone())?;
    for object_id in order {
        if let Some(info) = with_object(object_id, |o| o.local_symbols.get(name).copied()).flatten() {
            with_object_mut(root_id, |root| {
                root.global_symbols.insert(name.to_string(), info);
            });
            return Some(info);
        }
    }
    None
}

pub fn is_dependency_loaded(root_id: ElfObjectId, name: &str) -> bool {
    with_object(root_id, |root| root.loaded_objects.contains_key(name)).unwrap_or(false)
}

/// Looks up a shared library by soname under the fixed library search
/// path and opens it. The path resolution and actual open both cross the
/// filesystem-delegate boundary (out of core scope); this just shapes the
/// request.
fn open_dependency(name: &str) -> Option<i32> {
    let path = alloc::format!("/lib/{}", name);
    let fd = vfs::vfs_open(&path, 0);
    if fd < 0 {
        log::warn!("elf: dependency '{}' not found at {}", name, path);
        None
    } else {
        Some(fd as i32)
    }
}

fn read_at(fd: i32, offset: usize, buf: &mut [u8]) -> bool {
    if vfs::vfs_lseek(fd, offset as i64, 0) < 0 {
        return false;
    }
    vfs::vfs_read(fd, buf, buf.len()) as usize == buf.len()
}

fn read_range(fd: i32, offset: usize, len: usize) -> Vec<u8> {
    let mut buf = alloc::vec![0u8; len];
    if !read_at(fd, offset, &mut buf) {
        buf.clear();
        buf.resize(len, 0);
    }
    buf
}

fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

fn align_up(value: usize, align: usize) -> usize {
    align_down(value + align - 1, align)
}

/// Frees every object in the tree rooted at `root_id`, called once a
/// process is reaped. `pool` is the owning address space's range pool;
/// each dependency's reserved slot is returned to it. Pass `None` if the
/// process never got an address space (e.g. spawn failed before phase 1
/// finished) — objects are still dropped from the table, just without a
/// pool to give the ranges back to.
pub fn destroy_tree(root_id: ElfObjectId, mut pool: Option<&mut VirtualRangePool>) {
    let mut objects = OBJECTS.lock();

    let belongs_to_root = |objects: &BTreeMap<ElfObjectId, ElfObject>, mut id: ElfObjectId| -> bool {
        loop {
            if id == root_id {
                return true;
            }
            match objects.get(&id).and_then(|o| o.parent) {
                Some(parent) => id = parent,
                None => return false,
            }
        }
    };

    let members: Vec<ElfObjectId> = objects
        .keys()
        .copied()
        .filter(|&id| belongs_to_root(&objects, id))
        .collect();
    for id in members {
        if let Some(object) = objects.remove(&id) {
            if let (Some((start, size)), Some(pool)) = (object.range_alloc, pool.as_deref_mut()) {
                pool.free(start, size);
            }
        }
    }
}
