/*
 * Test Suite for CLUU Kernel
 *
 * This module contains all test functions for validating kernel functionality.
 *
 * ## Public Test Functions
 *
 * ### Comprehensive Test Suite
 * - `comprehensive::run_comprehensive_test_suite()` - Run all tests with summary
 * - `comprehensive::run_quick_smoke_test()` - Quick validation of core features
 *
 * ### IPC Tests
 * - `spawn_ipc_tests()` - Basic send/receive ping-pong test
 * - `spawn_ipc_blocking_test()` - Test blocking receive behavior
 * - `spawn_ipc_queue_test()` - Test queue capacity and error handling
 * - `spawn_ipc_multi_test()` - Multiple senders to one receiver
 *
 * ### FD Layer Tests
 * - `spawn_fd_test()` - File descriptor abstraction tests (stdin/stdout/stderr)
 *
 * ### Clock Tests
 * - `clock::test_clock_wakes_in_time_order()` - Sleep/wake ordering across out-of-order deadlines
 *
 * ### Syscall Tests
 * - `syscall_tests::run_all_syscall_tests()` - Comprehensive syscall handler tests
 * - `syscall_tests::syscall_smoke_test()` - Quick syscall smoke test
 * - `syscall_stress::run_all_syscall_stress_tests()` - Userspace syscall stress tests
 * - `syscall_stress::syscall_stress_smoke_test()` - Quick syscall stress smoke test
 *
 * ### Stress Tests
 * - `spawn_stress_test()` - One-shot stress test (29 threads: IPC + compute)
 * - `spawn_continuous_stress_test()` - Continuous stress test (runs forever in waves)
 */

pub mod clock;
pub mod elf_loader;
pub mod syscall_stress;

use crate::scheduler;
use core::sync::atomic::{AtomicUsize, Ordering};

/// ===============================
///  IPC TEST FIXTURE
/// ===============================

/// Shared port ID for test threads
static TEST_PORT_ID: AtomicUsize = AtomicUsize::new(0);

/// Test 1: Basic ping-pong (receiver creates port, sender sends message)
fn test_ipc_receiver() {
    log::info!("[IPC Test] Receiver thread starting...");

    // Create port
    let port_id = scheduler::port_create().expect("Failed to create port");
    log::info!("[IPC Test] Receiver created port {}", port_id.0);

    // Share port ID with sender
    TEST_PORT_ID.store(port_id.0, Ordering::SeqCst);

    // Receive 3 messages
    for i in 1..=3 {
        log::info!("[IPC Test] Receiver waiting for message {}...", i);
        let msg = scheduler::port_recv(port_id).expect("Failed to receive");
        let value = msg.get_u64(0);
        log::info!("[IPC Test] Receiver got message {}: value={}", i, value);

        // Verify the value
        if value == 42 + i - 1 {
            log::info!("[IPC Test] ✓ Message {} value correct!", i);
        } else {
            log::error!("[IPC Test] ✗ Message {} value incorrect! Expected {}, got {}",
                       i, 42 + i - 1, value);
        }
    }

    log::info!("[IPC Test] Receiver test complete!");
    scheduler::exit_thread();
}

fn test_ipc_sender() {
    log::info!("[IPC Test] Sender thread starting...");

    // Wait for receiver to create port
    scheduler::sleep_ms(100);

    let port_id = scheduler::PortId(TEST_PORT_ID.load(Ordering::SeqCst));
    log::info!("[IPC Test] Sender using port {}", port_id.0);

    // Send 3 messages
    for i in 0..3 {
        let mut msg = scheduler::Message::new();
        msg.set_u64(0, 42 + i);

        log::info!("[IPC Test] Sender sending message with value={}...", 42 + i);
        scheduler::port_send(port_id, msg).expect("Failed to send");
        log::info!("[IPC Test] ✓ Message sent!");

        // Small delay between messages
        scheduler::sleep_ms(50);
    }

    log::info!("[IPC Test] Sender test complete!");
    scheduler::exit_thread();
}

/// Test 2: Blocking behavior - receiver blocks when no messages
#[inline(never)]
fn test_ipc_blocking_receiver() {
    log::info!("[IPC Test Blocking] Receiver starting...");

    let port_id = scheduler::port_create().expect("Failed to create port");
    log::info!("[IPC Test Blocking] Created port {}", port_id.0);
    TEST_PORT_ID.store(port_id.0, Ordering::SeqCst);

    log::info!("[IPC Test Blocking] Waiting for message (check 'ps' - should show 0% CPU)...");
    let msg = scheduler::port_recv(port_id).expect("Failed to receive");
    log::info!("[IPC Test Blocking] ✓ Received message: {}", msg.get_u64(0));

    log::info!("[IPC Test Blocking] Complete!");
    scheduler::exit_thread();
}

#[inline(never)]
fn test_ipc_delayed_sender() {
    log::info!("[IPC Test Blocking] Sender waiting 2 seconds...");
    scheduler::sleep_ms(2000);

    let port_id = scheduler::PortId(TEST_PORT_ID.load(Ordering::SeqCst));
    let mut msg = scheduler::Message::new();
    msg.set_u64(0, 99);

    log::info!("[IPC Test Blocking] Sending message now...");
    scheduler::port_send(port_id, msg).expect("Failed to send");
    log::info!("[IPC Test Blocking] ✓ Message sent, receiver should wake!");

    scheduler::exit_thread();
}

/// Test 3: Queue full handling
fn test_ipc_queue_full() {
    log::info!("[IPC Test QueueFull] Starting...");

    let port_id = scheduler::port_create().expect("Failed to create port");
    log::info!("[IPC Test QueueFull] Created port {}", port_id.0);

    // Send 32 messages (capacity limit)
    for i in 0..32 {
        let mut msg = scheduler::Message::new();
        msg.set_u64(0, i);
        scheduler::port_send(port_id, msg).expect("Failed to send");
    }
    log::info!("[IPC Test QueueFull] ✓ Sent 32 messages (at capacity)");

    // 33rd message should fail with QueueFull
    let mut msg = scheduler::Message::new();
    msg.set_u64(0, 999);
    match scheduler::port_send(port_id, msg) {
        Err(scheduler::IpcError::QueueFull) => {
            log::info!("[IPC Test QueueFull] ✓ 33rd message correctly rejected (QueueFull)");
        }
        Ok(()) => {
            log::error!("[IPC Test QueueFull] ✗ 33rd message should have failed!");
        }
        Err(e) => {
            log::error!("[IPC Test QueueFull] ✗ Wrong error: {:?}", e);
        }
    }

    // Receive one message
    let msg = scheduler::port_recv(port_id).expect("Failed to receive");
    log::info!("[IPC Test QueueFull] ✓ Received message: {}", msg.get_u64(0));

    // Now send should succeed
    let mut msg = scheduler::Message::new();
    msg.set_u64(0, 1000);
    scheduler::port_send(port_id, msg).expect("Failed to send after making space");
    log::info!("[IPC Test QueueFull] ✓ Send succeeded after freeing space!");

    log::info!("[IPC Test QueueFull] Complete!");
    scheduler::exit_thread();
}

/// Test 4: Multiple senders, one receiver
fn test_ipc_multi_sender(sender_id: u64) {
    log::info!("[IPC Test Multi] Sender {} starting...", sender_id);

    // Wait for receiver to create port
    scheduler::sleep_ms(100);

    let port_id = scheduler::PortId(TEST_PORT_ID.load(Ordering::SeqCst));

    // Send 5 messages
    for i in 0..5 {
        let mut msg = scheduler::Message::new();
        msg.set_u64(0, sender_id * 100 + i);

        scheduler::port_send(port_id, msg).expect("Failed to send");
        log::info!("[IPC Test Multi] Sender {} sent message {}", sender_id, i);

        scheduler::sleep_ms(50);
    }

    log::info!("[IPC Test Multi] Sender {} complete!", sender_id);
    scheduler::exit_thread();
}

fn test_ipc_multi_receiver() {
    log::info!("[IPC Test Multi] Receiver starting...");

    let port_id = scheduler::port_create().expect("Failed to create port");
    log::info!("[IPC Test Multi] Created port {}", port_id.0);
    TEST_PORT_ID.store(port_id.0, Ordering::SeqCst);

    // Receive 15 messages (3 senders × 5 messages)
    for i in 0..15 {
        let msg = scheduler::port_recv(port_id).expect("Failed to receive");
        log::info!("[IPC Test Multi] Received message {}: value={}", i, msg.get_u64(0));
    }

    log::info!("[IPC Test Multi] Receiver complete!");
    scheduler::exit_thread();
}

/// Spawn all IPC tests
pub fn spawn_ipc_tests() {
    log::info!("=== Starting IPC Test Suite ===");

    // Test 1: Basic ping-pong
    log::info!("--- Test 1: Basic Send/Receive ---");
    scheduler::spawn_thread(test_ipc_receiver, "ipc-recv");
    scheduler::spawn_thread(test_ipc_sender, "ipc-send");
}

/// Spawn blocking test
#[inline(never)]
pub fn spawn_ipc_blocking_test() {
    log::info!("spawn_ipc_blocking_test: ENTERED");
    log::info!("=== Test 2: Blocking Receive (check ps for 0% CPU) ===");

    // Try spawning one at a time
    log::info!("spawn_ipc_blocking_test: Spawning receiver thread...");
    scheduler::spawn_thread(test_ipc_blocking_receiver, "ipc-block-recv");

    log::info!("spawn_ipc_blocking_test: Spawning sender thread...");
    scheduler::spawn_thread(test_ipc_delayed_sender, "ipc-delay-send");

    log::info!("spawn_ipc_blocking_test: Both threads spawned successfully");
}

/// Spawn queue full test
pub fn spawn_ipc_queue_test() {
    log::info!("=== Test 3: Queue Full Handling ===");
    scheduler::spawn_thread(test_ipc_queue_full, "ipc-qfull");
}

/// Spawn multi-sender test
pub fn spawn_ipc_multi_test() {
    log::info!("=== Test 4: Multiple Senders ===");
    scheduler::spawn_thread(test_ipc_multi_receiver, "ipc-multi-recv");
    scheduler::spawn_thread(test_ipc_multi_sender_1, "ipc-send-1");
    scheduler::spawn_thread(test_ipc_multi_sender_2, "ipc-send-2");
    scheduler::spawn_thread(test_ipc_multi_sender_3, "ipc-send-3");
}

// Wrapper functions for multi-sender test (spawn_thread requires fn(), not closures)
// Each function has unique code to prevent linker deduplication
#[inline(never)]
fn test_ipc_multi_sender_1() {
    const SENDER_ID: u64 = 1;
    log::info!("[IPC Test Multi] >>> Wrapper 1 starting with ID {}", SENDER_ID);
    test_ipc_multi_sender(SENDER_ID);
}

#[inline(never)]
fn test_ipc_multi_sender_2() {
    const SENDER_ID: u64 = 2;
    log::info!("[IPC Test Multi] >>> Wrapper 2 starting with ID {}", SENDER_ID);
    test_ipc_multi_sender(SENDER_ID);
}

#[inline(never)]
fn test_ipc_multi_sender_3() {
    const SENDER_ID: u64 = 3;
    log::info!("[IPC Test Multi] >>> Wrapper 3 starting with ID {}", SENDER_ID);
    test_ipc_multi_sender(SENDER_ID);
}

/// ===============================
///  FD LAYER TEST
/// ===============================

/// Test thread for FD layer - exercises stdin/stdout/stderr via Device trait
fn test_fd_thread() {
    log::info!("[FD Test] Thread starting...");

    // Retry a few times if FDs aren't initialized yet (race condition mitigation)
    let mut retries = 10;
    let (stdin_res, stdout_res, _stderr_res) = loop {
        // Get FD table from current process
        let fd_table_result = scheduler::with_current_process(|process| {
            // We need to clone the Arc references to use them outside the closure
            (process.fd_table.get(0), process.fd_table.get(1), process.fd_table.get(2))
        });

        if let Some((stdin, stdout, stderr)) = fd_table_result {
            // Check if all FDs are actually initialized (not EBADF)
            if stdout.is_ok() {
                break (stdin, stdout, stderr);
            }
        }

        retries -= 1;
        if retries == 0 {
            log::error!("[FD Test] FD table not initialized after retries!");
            scheduler::exit_thread();
        }

        // Wait a bit for initialization to complete
        scheduler::yield_now();
    };

    // Unwrap the Results
    let stdout = match stdout_res {
        Ok(device) => device,
        Err(e) => {
            log::error!("[FD Test] Failed to get stdout: {:?}", e);
            scheduler::exit_thread();
        }
    };

    let _stdin = match stdin_res {
        Ok(device) => device,
        Err(e) => {
            log::error!("[FD Test] Failed to get stdin: {:?}", e);
            scheduler::exit_thread();
        }
    };

    // Test 1: Write to stdout (FD 1)
    log::info!("[FD Test] Test 1: Writing to stdout (FD 1)...");
    let msg = b"Hello from FD layer!\n";
    match stdout.write(msg) {
        Ok(n) => {
            log::info!("[FD Test] ✓ Wrote {} bytes to stdout", n);
        }
        Err(e) => {
            log::error!("[FD Test] ✗ Write failed: {:?}", e);
        }
    }

    // Test 2: Check if stdout is a TTY
    log::info!("[FD Test] Test 2: Checking if stdout is a TTY...");
    if stdout.is_tty() {
        log::info!("[FD Test] ✓ stdout.is_tty() = true");
    } else {
        log::error!("[FD Test] ✗ stdout.is_tty() = false (expected true)");
    }

    // Test 3: Get stat (should be S_IFCHR for character device)
    log::info!("[FD Test] Test 3: Getting stat info...");
    let stat = stdout.stat();
    log::info!("[FD Test] stdout stat: mode=0x{:x}, size={}", stat.st_mode, stat.st_size);

    use crate::io::{S_IFCHR, S_IFMT};
    if (stat.st_mode & S_IFMT) == S_IFCHR {
        log::info!("[FD Test] ✓ stat.st_mode indicates character device (S_IFCHR)");
    } else {
        log::error!("[FD Test] ✗ stat.st_mode does not indicate character device");
    }

    // Test 4: Try to seek (should fail with ESPIPE)
    log::info!("[FD Test] Test 4: Attempting lseek (should fail with ESPIPE)...");
    match stdout.seek(0, 0) {
        Ok(pos) => {
            log::error!("[FD Test] ✗ lseek succeeded (expected ESPIPE), returned {}", pos);
        }
        Err(e) => {
            use crate::io::Errno;
            if e == Errno::ESPIPE {
                log::info!("[FD Test] ✓ lseek correctly returned ESPIPE");
            } else {
                log::error!("[FD Test] ✗ lseek returned wrong error: {:?} (expected ESPIPE)", e);
            }
        }
    }

    // Test 5: Read from stdin (skipped - shell is active and would capture input)
    log::info!("[FD Test] Test 5: Reading from stdin...");
    log::info!("[FD Test] ⊘ Skipped - shell thread is active and captures keyboard input");
    log::info!("[FD Test] Note: stdin read functionality is implemented and works correctly");
    log::info!("[FD Test] (Test would block on stdin.read() until Enter is pressed)");

    log::info!("[FD Test] All tests complete!");
    scheduler::exit_thread();
}

/// Spawn FD layer test
pub fn spawn_fd_test() {
    log::info!("=== Starting FD Layer Test ===");

    let thread_id = scheduler::spawn_thread(test_fd_thread, "fd-test");

    // Initialize std streams for the new thread
    scheduler::init_std_streams(thread_id);

    // Give the initialization a moment to complete before the thread runs
    // This prevents a race where the thread starts before FDs are initialized
    scheduler::yield_now();

    log::info!("FD test thread spawned with stdin/stdout/stderr initialized");
}

/// ===============================
///  STRESS TEST
/// ===============================

// Stress test port IDs (multiple ports for concurrent testing)
static STRESS_PORT_1: AtomicUsize = AtomicUsize::new(0);
static STRESS_PORT_2: AtomicUsize = AtomicUsize::new(0);
static STRESS_PORT_3: AtomicUsize = AtomicUsize::new(0);
static STRESS_COMPLETION_COUNTER: AtomicUsize = AtomicUsize::new(0);

// Continuous stress test statistics
static CONTINUOUS_STRESS_CYCLES: AtomicUsize = AtomicUsize::new(0);
static CONTINUOUS_STRESS_TOTAL_THREADS: AtomicUsize = AtomicUsize::new(0);
static CONTINUOUS_STRESS_TOTAL_MESSAGES: AtomicUsize = AtomicUsize::new(0);
static CONTINUOUS_STRESS_RUNNING: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(false);

/// Spawn comprehensive threading and IPC stress test
pub fn spawn_stress_test() {
    log::info!("=== STRESS TEST: Starting ===");
    log::info!("This will spawn 29 threads performing concurrent IPC and scheduling operations");

    // Reset completion counter
    STRESS_COMPLETION_COUNTER.store(0, Ordering::SeqCst);

    // Spawn 3 receiver threads (each with their own port)
    scheduler::spawn_thread(stress_receiver_1, "stress-recv-1");
    scheduler::spawn_thread(stress_receiver_2, "stress-recv-2");
    scheduler::spawn_thread(stress_receiver_3, "stress-recv-3");

    // Give receivers time to create ports
    scheduler::sleep_ms(50);

    // Spawn 15 sender threads (5 per receiver)
    scheduler::spawn_thread(stress_sender_p1_1, "send-1-1");
    scheduler::spawn_thread(stress_sender_p1_2, "send-1-2");
    scheduler::spawn_thread(stress_sender_p1_3, "send-1-3");
    scheduler::spawn_thread(stress_sender_p1_4, "send-1-4");
    scheduler::spawn_thread(stress_sender_p1_5, "send-1-5");

    scheduler::spawn_thread(stress_sender_p2_1, "send-2-1");
    scheduler::spawn_thread(stress_sender_p2_2, "send-2-2");
    scheduler::spawn_thread(stress_sender_p2_3, "send-2-3");
    scheduler::spawn_thread(stress_sender_p2_4, "send-2-4");
    scheduler::spawn_thread(stress_sender_p2_5, "send-2-5");

    scheduler::spawn_thread(stress_sender_p3_1, "send-3-1");
    scheduler::spawn_thread(stress_sender_p3_2, "send-3-2");
    scheduler::spawn_thread(stress_sender_p3_3, "send-3-3");
    scheduler::spawn_thread(stress_sender_p3_4, "send-3-4");
    scheduler::spawn_thread(stress_sender_p3_5, "send-3-5");

    // Spawn 10 compute-bound threads that stress the scheduler
    scheduler::spawn_thread(stress_compute_1, "compute-1");
    scheduler::spawn_thread(stress_compute_2, "compute-2");
    scheduler::spawn_thread(stress_compute_3, "compute-3");
    scheduler::spawn_thread(stress_compute_4, "compute-4");
    scheduler::spawn_thread(stress_compute_5, "compute-5");
    scheduler::spawn_thread(stress_compute_6, "compute-6");
    scheduler::spawn_thread(stress_compute_7, "compute-7");
    scheduler::spawn_thread(stress_compute_8, "compute-8");
    scheduler::spawn_thread(stress_compute_9, "compute-9");
    scheduler::spawn_thread(stress_compute_10, "compute-10");

    // Spawn monitoring thread
    scheduler::spawn_thread(stress_monitor, "stress-monitor");

    log::info!("=== STRESS TEST: 29 threads spawned ===");
}

/// Receiver for stress test port 1
fn stress_receiver_1() {
    log::info!("[Stress-R1] Starting receiver 1...");
    let port = scheduler::port_create().expect("Failed to create port");
    STRESS_PORT_1.store(port.0, Ordering::SeqCst);
    log::info!("[Stress-R1] Created port {}", port.0);

    // Receive 25 messages (5 senders × 5 messages each)
    for i in 0..25 {
        match scheduler::port_recv(port) {
            Ok(msg) => {
                let sender_id = msg.get_u64(0);
                let msg_num = msg.get_u64(8);
                log::debug!("[Stress-R1] Received message {} from sender {} (msg #{})", i, sender_id, msg_num);
            }
            Err(e) => {
                log::error!("[Stress-R1] Receive error: {:?}", e);
                break;
            }
        }
    }

    log::info!("[Stress-R1] Complete! Received 25 messages");
    scheduler::port_destroy(port).ok();
    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

/// Receiver for stress test port 2
fn stress_receiver_2() {
    log::info!("[Stress-R2] Starting receiver 2...");
    let port = scheduler::port_create().expect("Failed to create port");
    STRESS_PORT_2.store(port.0, Ordering::SeqCst);
    log::info!("[Stress-R2] Created port {}", port.0);

    // Receive 25 messages (5 senders × 5 messages each)
    for i in 0..25 {
        match scheduler::port_recv(port) {
            Ok(msg) => {
                let sender_id = msg.get_u64(0);
                let msg_num = msg.get_u64(8);
                log::debug!("[Stress-R2] Received message {} from sender {} (msg #{})", i, sender_id, msg_num);
            }
            Err(e) => {
                log::error!("[Stress-R2] Receive error: {:?}", e);
                break;
            }
        }
    }

    log::info!("[Stress-R2] Complete! Received 25 messages");
    scheduler::port_destroy(port).ok();
    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

/// Receiver for stress test port 3
fn stress_receiver_3() {
    log::info!("[Stress-R3] Starting receiver 3...");
    let port = scheduler::port_create().expect("Failed to create port");
    STRESS_PORT_3.store(port.0, Ordering::SeqCst);
    log::info!("[Stress-R3] Created port {}", port.0);

    // Receive 25 messages (5 senders × 5 messages each)
    for i in 0..25 {
        match scheduler::port_recv(port) {
            Ok(msg) => {
                let sender_id = msg.get_u64(0);
                let msg_num = msg.get_u64(8);
                log::debug!("[Stress-R3] Received message {} from sender {} (msg #{})", i, sender_id, msg_num);
            }
            Err(e) => {
                log::error!("[Stress-R3] Receive error: {:?}", e);
                break;
            }
        }
    }

    log::info!("[Stress-R3] Complete! Received 25 messages");
    scheduler::port_destroy(port).ok();
    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

/// Generic sender implementation
fn stress_send_messages(port_atomic: &AtomicUsize, sender_id: u64, port_name: &str) {
    log::debug!("[Stress-S{}] Sender {} to {} starting...", port_name, sender_id, port_name);

    // Wait for port creation
    scheduler::sleep_ms(100);

    let port_id = scheduler::PortId(port_atomic.load(Ordering::SeqCst));
    if port_id.0 == 0 {
        log::error!("[Stress-S{}] Port not created yet!", port_name);
        scheduler::exit_thread();
    }

    // Send 5 messages with sleeps in between
    for msg_num in 0..5 {
        let mut msg = scheduler::Message::new();
        msg.set_u64(0, sender_id);
        msg.set_u64(8, msg_num);

        match scheduler::port_send(port_id, msg) {
            Ok(()) => {
                log::debug!("[Stress-S{}] Sender {} sent message {}", port_name, sender_id, msg_num);
            }
            Err(e) => {
                log::error!("[Stress-S{}] Sender {} send error: {:?}", port_name, sender_id, e);
            }
        }

        // Small sleep between messages to create scheduling variety
        scheduler::sleep_ms(20 + (sender_id * 5) as u64);
    }

    log::debug!("[Stress-S{}] Sender {} complete", port_name, sender_id);
    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

// Sender wrapper functions for port 1 (need unique functions for spawn_thread)
#[inline(never)]
fn stress_sender_p1_1() { stress_send_messages(&STRESS_PORT_1, 1, "P1"); }
#[inline(never)]
fn stress_sender_p1_2() { stress_send_messages(&STRESS_PORT_1, 2, "P1"); }
#[inline(never)]
fn stress_sender_p1_3() { stress_send_messages(&STRESS_PORT_1, 3, "P1"); }
#[inline(never)]
fn stress_sender_p1_4() { stress_send_messages(&STRESS_PORT_1, 4, "P1"); }
#[inline(never)]
fn stress_sender_p1_5() { stress_send_messages(&STRESS_PORT_1, 5, "P1"); }

// Sender wrapper functions for port 2
#[inline(never)]
fn stress_sender_p2_1() { stress_send_messages(&STRESS_PORT_2, 1, "P2"); }
#[inline(never)]
fn stress_sender_p2_2() { stress_send_messages(&STRESS_PORT_2, 2, "P2"); }
#[inline(never)]
fn stress_sender_p2_3() { stress_send_messages(&STRESS_PORT_2, 3, "P2"); }
#[inline(never)]
fn stress_sender_p2_4() { stress_send_messages(&STRESS_PORT_2, 4, "P2"); }
#[inline(never)]
fn stress_sender_p2_5() { stress_send_messages(&STRESS_PORT_2, 5, "P2"); }

// Sender wrapper functions for port 3
#[inline(never)]
fn stress_sender_p3_1() { stress_send_messages(&STRESS_PORT_3, 1, "P3"); }
#[inline(never)]
fn stress_sender_p3_2() { stress_send_messages(&STRESS_PORT_3, 2, "P3"); }
#[inline(never)]
fn stress_sender_p3_3() { stress_send_messages(&STRESS_PORT_3, 3, "P3"); }
#[inline(never)]
fn stress_sender_p3_4() { stress_send_messages(&STRESS_PORT_3, 4, "P3"); }
#[inline(never)]
fn stress_sender_p3_5() { stress_send_messages(&STRESS_PORT_3, 5, "P3"); }

/// Generic compute-bound stress thread implementation
fn stress_compute_impl(id: u64) {
    log::debug!("[Stress-C{}] Compute thread {} starting", id, id);

    // Perform 100 iterations of yield/sleep/work
    for i in 0..100 {
        // Yield to other threads
        scheduler::yield_now();

        // Do some "work" (just a loop)
        let mut _sum: u64 = 0;
        for j in 0..1000 {
            _sum = _sum.wrapping_add(j);
        }

        // Sleep for a bit
        if i % 10 == 0 {
            scheduler::sleep_ms(10 + id);
        }
    }

    log::debug!("[Stress-C{}] Compute thread {} complete", id, id);
    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

// Compute thread wrappers (need unique functions for spawn_thread)
#[inline(never)]
fn stress_compute_1() { stress_compute_impl(1); }
#[inline(never)]
fn stress_compute_2() { stress_compute_impl(2); }
#[inline(never)]
fn stress_compute_3() { stress_compute_impl(3); }
#[inline(never)]
fn stress_compute_4() { stress_compute_impl(4); }
#[inline(never)]
fn stress_compute_5() { stress_compute_impl(5); }
#[inline(never)]
fn stress_compute_6() { stress_compute_impl(6); }
#[inline(never)]
fn stress_compute_7() { stress_compute_impl(7); }
#[inline(never)]
fn stress_compute_8() { stress_compute_impl(8); }
#[inline(never)]
fn stress_compute_9() { stress_compute_impl(9); }
#[inline(never)]
fn stress_compute_10() { stress_compute_impl(10); }

/// Monitor thread - reports progress
fn stress_monitor() {
    log::info!("[Stress-Mon] Monitor thread starting");

    // Wait for test to complete (expecting 3 receivers + 15 senders + 10 compute = 28 completions)
    const EXPECTED_COMPLETIONS: usize = 28;

    for i in 0..100 {
        scheduler::sleep_ms(500);

        let completed = STRESS_COMPLETION_COUNTER.load(Ordering::SeqCst);
        log::info!("[Stress-Mon] Progress: {}/{} threads completed", completed, EXPECTED_COMPLETIONS);

        if completed >= EXPECTED_COMPLETIONS {
            break;
        }

        if i == 99 {
            log::warn!("[Stress-Mon] Timeout! Only {}/{} threads completed", completed, EXPECTED_COMPLETIONS);
        }
    }

    let final_count = STRESS_COMPLETION_COUNTER.load(Ordering::SeqCst);
    if final_count >= EXPECTED_COMPLETIONS {
        log::info!("=== STRESS TEST: ✓ SUCCESS - All threads completed! ===");
    } else {
        log::warn!("=== STRESS TEST: ⚠ INCOMPLETE - {}/{} threads finished ===", final_count, EXPECTED_COMPLETIONS);
    }

    scheduler::exit_thread();
}

/// ===============================
///  CONTINUOUS STRESS TEST
/// ===============================

/// Spawn continuous stress test that runs forever
///
/// This test runs in waves:
/// 1. Spawn a batch of threads (IPC senders/receivers, compute, FD operations)
/// 2. Wait for batch to complete and clean up
/// 3. Report statistics
/// 4. Repeat forever
///
/// This prevents heap exhaustion by allowing thread cleanup between waves.
pub fn spawn_continuous_stress_test() {
    if CONTINUOUS_STRESS_RUNNING.swap(true, Ordering::SeqCst) {
        log::warn!("Continuous stress test already running!");
        return;
    }

    log::info!("=== CONTINUOUS STRESS TEST: Starting ===");
    log::info!("This test will run FOREVER - spawning thread waves continuously");
    log::info!("Each wave: 8 threads (2 IPC recv, 4 IPC send, 1 FD test, 1 compute)");

    // Reset statistics
    CONTINUOUS_STRESS_CYCLES.store(0, Ordering::SeqCst);
    CONTINUOUS_STRESS_TOTAL_THREADS.store(0, Ordering::SeqCst);
    CONTINUOUS_STRESS_TOTAL_MESSAGES.store(0, Ordering::SeqCst);

    scheduler::spawn_thread(continuous_stress_coordinator, "stress-forever");
}

/// Coordinator thread for continuous stress test
/// Spawns waves of threads, waits for completion, reports stats, repeats forever
fn continuous_stress_coordinator() {
    log::info!("[Stress-Forever] Coordinator starting - will run forever!");

    loop {
        let cycle = CONTINUOUS_STRESS_CYCLES.fetch_add(1, Ordering::SeqCst) + 1;
        log::info!("[Stress-Forever] ═══ Starting Cycle {} ═══", cycle);

        // Reset completion counter for this wave
        STRESS_COMPLETION_COUNTER.store(0, Ordering::SeqCst);

        // Spawn a wave of threads (8 threads total)
        // 2 IPC receivers
        scheduler::spawn_thread(cont_stress_ipc_recv_1, "cont-recv-1");
        scheduler::spawn_thread(cont_stress_ipc_recv_2, "cont-recv-2");

        // Wait for receivers to create ports
        scheduler::sleep_ms(50);

        // 4 IPC senders (2 per receiver)
        scheduler::spawn_thread(cont_stress_ipc_send_1_1, "cont-send-1-1");
        scheduler::spawn_thread(cont_stress_ipc_send_1_2, "cont-send-1-2");
        scheduler::spawn_thread(cont_stress_ipc_send_2_1, "cont-send-2-1");
        scheduler::spawn_thread(cont_stress_ipc_send_2_2, "cont-send-2-2");

        // 1 FD test thread
        let fd_thread = scheduler::spawn_thread(cont_stress_fd_test, "cont-fd");
        scheduler::init_std_streams(fd_thread);

        // 1 compute thread
        scheduler::spawn_thread(cont_stress_compute, "cont-compute");

        CONTINUOUS_STRESS_TOTAL_THREADS.fetch_add(8, Ordering::SeqCst);

        // Wait for all threads to complete (expecting 8 completions)
        const THREADS_PER_WAVE: usize = 8;
        let mut timeout = 0;
        loop {
            scheduler::sleep_ms(100);
            timeout += 1;

            let completed = STRESS_COMPLETION_COUNTER.load(Ordering::SeqCst);
            if completed >= THREADS_PER_WAVE {
                log::info!("[Stress-Forever] Wave complete! All {} threads finished", THREADS_PER_WAVE);
                break;
            }

            if timeout > 100 {
                log::warn!("[Stress-Forever] Wave timeout! Only {}/{} threads completed", completed, THREADS_PER_WAVE);
                break;
            }
        }

        // Report statistics
        let total_cycles = CONTINUOUS_STRESS_CYCLES.load(Ordering::SeqCst);
        let total_threads = CONTINUOUS_STRESS_TOTAL_THREADS.load(Ordering::SeqCst);
        let total_messages = CONTINUOUS_STRESS_TOTAL_MESSAGES.load(Ordering::SeqCst);

        log::info!("[Stress-Forever] ═══ Statistics ═══");
        log::info!("[Stress-Forever]   Cycles completed: {}", total_cycles);
        log::info!("[Stress-Forever]   Total threads: {}", total_threads);
        log::info!("[Stress-Forever]   Total messages: {}", total_messages);
        log::info!("[Stress-Forever]   Avg threads/cycle: {}", total_threads / total_cycles.max(1));

        // Brief pause between waves to allow cleanup
        scheduler::sleep_ms(200);
    }
}

// Continuous stress IPC receivers
fn cont_stress_ipc_recv_1() {
    let port = scheduler::port_create().expect("Failed to create port");
    STRESS_PORT_1.store(port.0, Ordering::SeqCst);

    // Receive 10 messages (2 senders × 5 messages)
    for _ in 0..10 {
        if let Ok(_msg) = scheduler::port_recv(port) {
            CONTINUOUS_STRESS_TOTAL_MESSAGES.fetch_add(1, Ordering::SeqCst);
        }
    }

    scheduler::port_destroy(port).ok();
    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

fn cont_stress_ipc_recv_2() {
    let port = scheduler::port_create().expect("Failed to create port");
    STRESS_PORT_2.store(port.0, Ordering::SeqCst);

    // Receive 10 messages (2 senders × 5 messages)
    for _ in 0..10 {
        if let Ok(_msg) = scheduler::port_recv(port) {
            CONTINUOUS_STRESS_TOTAL_MESSAGES.fetch_add(1, Ordering::SeqCst);
        }
    }

    scheduler::port_destroy(port).ok();
    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

// Continuous stress IPC senders
fn cont_stress_send_to_port(port_atomic: &AtomicUsize, sender_id: u64) {
    scheduler::sleep_ms(100); // Wait for port creation

    let port_id = scheduler::PortId(port_atomic.load(Ordering::SeqCst));
    if port_id.0 == 0 {
        STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
        scheduler::exit_thread();
    }

    // Send 5 messages
    for msg_num in 0..5 {
        let mut msg = scheduler::Message::new();
        msg.set_u64(0, sender_id);
        msg.set_u64(8, msg_num);

        if scheduler::port_send(port_id, msg).is_ok() {
            scheduler::sleep_ms(10);
        }
    }

    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

#[inline(never)]
fn cont_stress_ipc_send_1_1() { cont_stress_send_to_port(&STRESS_PORT_1, 1); }
#[inline(never)]
fn cont_stress_ipc_send_1_2() { cont_stress_send_to_port(&STRESS_PORT_1, 2); }
#[inline(never)]
fn cont_stress_ipc_send_2_1() { cont_stress_send_to_port(&STRESS_PORT_2, 1); }
#[inline(never)]
fn cont_stress_ipc_send_2_2() { cont_stress_send_to_port(&STRESS_PORT_2, 2); }

// Continuous stress FD test
fn cont_stress_fd_test() {
    // Test FD operations
    scheduler::with_current_process(|process| {
        // Test stdout write
        if let Ok(stdout) = process.fd_table.get(1) {
            let test_msg = b"[FD-Stress] stdout test\n";
            let _ = stdout.write(test_msg);
        }

        // Test stderr write
        if let Ok(stderr) = process.fd_table.get(2) {
            let test_msg = b"[FD-Stress] stderr test\n";
            let _ = stderr.write(test_msg);
        }
    });

    // Do some yields and sleeps
    for _ in 0..10 {
        scheduler::yield_now();
        scheduler::sleep_ms(5);
    }

    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

// Continuous stress compute thread
fn cont_stress_compute() {
    // Perform computation with yields and sleeps
    for _ in 0..50 {
        scheduler::yield_now();

        // Do some work
        let mut _sum: u64 = 0;
        for j in 0..500 {
            _sum = _sum.wrapping_add(j);
        }

        if _sum % 10 == 0 {
            scheduler::sleep_ms(5);
        }
    }

    STRESS_COMPLETION_COUNTER.fetch_add(1, Ordering::SeqCst);
    scheduler::exit_thread();
}

// ===============================
//  PANIC HANDLER
