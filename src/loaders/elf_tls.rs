/*
 * TLS Master Image Composition
 *
 * Once every object in the dependency graph has loaded and claimed a
 * `tls_part`, the process's TLS master image is laid out as:
 *
 *   [executable TLS content][user-thread-local object][shared-lib TLS...]
 *
 * The user-thread-local object is a small self-pointer record userland
 * locates via segment-relative addressing; its offset within the master
 * is recorded so the GDT entry set up for each new thread can point at
 * it. Each object's `tls_part.offset` is the byte offset of *that
 * object's* TLS content within this same buffer.
 */

use super::elf_object::{self, ElfObjectId, TlsMasterInfo};
use crate::tasking::process::TlsMaster;

/// Size of the user-thread-local record: one self-pointer.
const USER_THREAD_LOCAL_SIZE: u32 = core::mem::size_of::<usize>() as u32;

/// Walks the root's lookup-order list, assigns each object's `tls_part`
/// an offset within the master image, and returns the composed layout.
/// The executable (root) goes first, then the user-thread-local record,
/// then every dependency's TLS content in load order.
pub fn compose_master_image(root_id: ElfObjectId) -> TlsMaster {
    let order = elf_object::with_object(root_id, |root| root.symbol_lookup_order.clone()).unwrap_or_default();

    let mut cursor: u32 = 0;

    // Executable TLS content first, if the root itself has a PT_TLS.
    cursor += assign_offset(root_id, cursor);

    let user_thread_offset = align_up(cursor, 4);
    cursor = user_thread_offset + USER_THREAD_LOCAL_SIZE;

    for &object_id in &order {
        if object_id == root_id {
            continue;
        }
        cursor += assign_offset(object_id, cursor);
    }

    let total_size = cursor;
    elf_object::with_object_mut(root_id, |root| {
        root.tls_master = Some(TlsMasterInfo {
            total_size,
            user_thread_offset,
        });
    });

    TlsMaster {
        location: 0,
        size: total_size,
        user_thread_offset,
    }
}

fn assign_offset(object_id: ElfObjectId, cursor: u32) -> u32 {
    elf_object::with_object_mut(object_id, |object| {
        let Some(part) = object.tls_part.as_mut() else {
            return 0;
        };
        let aligned = align_up(cursor, part.alignment.max(1));
        part.offset = aligned;
        (aligned - cursor) + part.total_size
    })
    .unwrap_or(0)
}

fn align_up(value: u32, align: u32) -> u32 {
    if align == 0 {
        return value;
    }
    (value + align - 1) & !(align - 1)
}

/// Copies the master image layout into a fresh per-thread buffer at
/// `destination` (already allocated by the caller) and fixes up the
/// user-thread-local record's self-pointer.
pub fn instantiate_for_thread(root_id: ElfObjectId, destination: usize) {
    let order = elf_object::with_object(root_id, |root| root.symbol_lookup_order.clone()).unwrap_or_default();

    for object_id in core::iter::once(root_id).chain(order.into_iter().filter(|&id| id != root_id)) {
        elf_object::with_object(object_id, |object| {
            let Some(part) = object.tls_part else { return };
            if object.tls_content.is_empty() {
                return;
            }
            unsafe {
                core::ptr::copy_nonoverlapping(
                    object.tls_content.as_ptr(),
                    (destination + part.offset as usize) as *mut u8,
                    object.tls_content.len(),
                );
            }
        });
    }

    if let Some(user_thread_offset) = elf_object::with_object(root_id, |root| root.tls_master.map(|m| m.user_thread_offset)).flatten() {
        let self_ptr = destination + user_thread_offset as usize;
        unsafe {
            core::ptr::write_unaligned(self_ptr as *mut usize, self_ptr);
        }
    }
}
