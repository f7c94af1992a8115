/*
 * CLUU Microkernel Main Entry Point
 *
 * This is the main entry point for the CLUU microkernel, a bare-metal Rust kernel
 * designed to work with the BOOTBOOT bootloader protocol. It handles the critical
 * early boot process and kernel initialization.
 *
 * Why this is important:
 * - Provides the entry point that BOOTBOOT calls when loading the kernel
 * - Handles multi-core boot process (BSP vs AP core management)
 * - Sets up proper kernel stack before entering Rust code
 * - Implements panic handling for kernel-level errors
 * - Coordinates the overall kernel initialization sequence
 *
 * Key features:
 * - Multi-core aware boot process
 * - Proper stack management for kernel execution
 * - Integration with BOOTBOOT protocol
 * - Safe transition from assembly to Rust code
 * - Comprehensive error handling and logging
 */

#![no_std]
#![no_main]
#![feature(abi_x86_interrupt)]
#![feature(alloc_error_handler)]
#![allow(dead_code)]

extern crate alloc;

use core::panic::PanicInfo;

mod arch;
mod bootboot;
mod components;
mod drivers;
mod fs;
mod initrd;
mod io;
mod kernel_context;
mod loaders;
mod memory;
mod messaging;
mod pipes;
mod scheduler;
mod shmem;
mod sync;
mod syscall;
mod tasking;
mod utils;
mod vfs;

#[repr(C, align(16))]
pub struct AlignedBspStack([u8; 64 * 1024]);

#[unsafe(no_mangle)]
pub static mut BSP_STACK: AlignedBspStack = AlignedBspStack([0; 64 * 1024]);

/// ===============================
///  EARLY ENTRY POINT (_start)
/// ===============================
///
/// Called directly by BOOTBOOT loader on ALL CORES.
/// Required to:
///   - Identify BSP using bootboot.bspid
///   - Switch to our own 64 KiB kernel stack
///   - Call into Rust's `kstart`
///   - Park APs
///
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn _start() -> ! {
    core::arch::naked_asm!(
        // CPUID leaf 1 → EBX[31:24] = APIC ID
        "mov eax, 1",
        "cpuid",
        "shr ebx, 24",                 // EBX now holds core ID

        // Load &bootboot into RAX
        "lea rax, [rip + bootboot]",

        // Read bspid (u16 @ offset 0x0C)
        "movzx ecx, word ptr [rax + 0x0C]",

        // Compare APIC ID vs bspid
        "cmp ebx, ecx",
        "jne 2f",                      // If not BSP → jump to AP section

        // =======================
        //       BSP PATH
        // =======================

        // Switch to our 64 KiB BSP stack
        "lea rax, [rip + BSP_STACK]",
        "add rax, {stack_size}",
        "mov rsp, rax",

        // Jump into real Rust kernel entry
        "jmp kstart",

        // =======================
        //       AP PATH
        // =======================
        "2:",
        "1:",
        "hlt",
        "jmp 1b",

        stack_size = const 64 * 1024,
    );
}

/// ===============================
///  RUST KERNEL ENTRY POINT
/// ===============================
///
/// Now running on our safe, large BSP stack.
/// APs never run this function.
///
#[unsafe(no_mangle)]
pub extern "C" fn kstart() -> ! {
    // Step 1: Initialize debug infrastructure first
    utils::debug::init_debug_infrastructure();

    // Step 2: Initialize logging system
    utils::debug::logger::init(true);
    log::info!("CLUU Kernel starting...");

    // Step 3: Initialize GDT (Global Descriptor Table)
    arch::x86_64::gdt::init();

    // Step 3.5: Initialize IDT (Interrupt Descriptor Table)
    // CRITICAL: Must be initialized BEFORE memory management (CR3 switch)
    // If any exception/NMI occurs during CR3 switch and IDT isn't set up,
    // the CPU will triple fault
    arch::x86_64::idt::init();

    // Step 3.6: Initialize SYSCALL/SYSRET mechanism
    syscall::init();

    // Step 4: Initialize memory management
    log::info!("Initializing memory management...");
    unsafe {
        memory::init(core::ptr::addr_of!(bootboot::bootboot));
    }

    // Test heap allocation
    {
        use alloc::vec::Vec;
        let mut test_vec = Vec::new();
        test_vec.push(42);
        test_vec.push(1337);
        log::info!("Heap test successful: {:?}", test_vec);
    }

    log::info!("Memory management initialized successfully");

    // Step 4.5: Initialize initrd (initial ramdisk)
    initrd::init();

    // Step 6: Initialize system drivers
    drivers::system::init();

    // Step 7: Initialize display driver
    drivers::display::init();

    // Step 8: Initialize input drivers
    drivers::input::init();

    // Step 9: Initialize console
    utils::io::console::init();

    // Step 10: Bring up the kernel context — the tasking subsystem
    // (scheduler, clock, user mutexes) and the IPC primitives built on
    // top of it.
    kernel_context::initialize();

    // Step 10.5: Initialize legacy port-based IPC (still used by the VFS
    // request/response protocol below)
    scheduler::ipc::init();

    // Step 10.55: Initialize shared memory subsystem
    shmem::init();
    log::info!("Shared memory subsystem initialized");

    // Step 10.6: Initialize VFS subsystem
    vfs::init();
    log::info!("VFS subsystem initialized (waiting for VFS server)");

    // Step 11: Enable interrupts
    x86_64::instructions::interrupts::enable();
    log::info!("Interrupts enabled");

    // Step 12: Initialize TTY system
    components::tty::init_tty0();
    log::info!("TTY system initialized");

    // Step 13: Spawn the VFS server. Resuming a spawned task's saved CPU
    // state to actually run it is architecture-specific and out of scope
    // here (see `tasking::spawn`), so this exercises process/task
    // bookkeeping and the ELF loader without the server ever executing a
    // single instruction on this build.
    match vfs::spawn_server(tasking::task::TASK_ID_NONE) {
        Ok(process_id) => log::info!("VFS server process {} created", process_id),
        Err(e) => log::error!("Failed to spawn VFS server: {}", e),
    }

    log::info!("Kernel initialization complete!");

    // Step 15: Spawn the shell the same way.
    spawn_shell();

    // Main kernel idle loop
    loop {
        x86_64::instructions::hlt();
    }
}

/// Spawn the userspace shell, read directly from the initrd the same way
/// the VFS server itself is bootstrapped (see `vfs::spawn_server`).
pub fn spawn_shell() {
    log::info!("Spawning userspace shell...");

    let Ok(shell_binary) = initrd::read_file("bin/shell").map(|data| data.to_vec()) else {
        log::error!("Could not find shell binary in initrd");
        return;
    };

    const BOOT_PATH: &str = "/boot/shell";
    vfs::register_boot_file(BOOT_PATH, shell_binary);

    let fd = vfs::vfs_open(BOOT_PATH, vfs::protocol::O_RDONLY);
    if fd < 0 {
        log::error!("Failed to open shell boot file");
        return;
    }

    let outcome = tasking::spawn::spawn(
        tasking::task::TASK_ID_NONE,
        tasking::spawn::SpawnRequest {
            fd: fd as i32,
            security_level: tasking::task::SecurityLevel::Application,
            arguments: alloc::string::String::new(),
            working_directory: "/".into(),
            executable_path: BOOT_PATH.into(),
        },
    );

    if outcome.status == tasking::process::SpawnStatus::Successful {
        log::info!("Shell spawned: process {}", outcome.process_id);
    } else {
        log::warn!("Failed to spawn shell: {:?}", outcome.status);
    }
}

///  PANIC HANDLER
/// ===============================
///
/// Logging may fail early, but this is safe once the logger is up.
///
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    x86_64::instructions::interrupts::disable();

    if let Some(location) = info.location() {
        log::error!(
            "PANIC at {}:{}: {}",
            location.file(),
            location.line(),
            info.message()
        );
    } else {
        log::error!("PANIC: {}", info.message());
    }

    loop {
        x86_64::instructions::hlt();
    }
}
