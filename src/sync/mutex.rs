/*
 * Kernel Spinlock with Interrupt Discipline
 *
 * This is the lowest-level lock in the kernel: every other structure
 * (task, process, message queue/topic, pipe, user-mutex table) is guarded
 * by one of these.
 *
 * Two initialization flavors exist, matching the two call sites that show
 * up throughout the kernel:
 *
 * - `Flavor::Task`   — may be held across a voluntary yield by a kernel
 *   task (e.g. while a kernel-level bootstrap task walks the ELF object
 *   graph). Holding one does not trip the "yielded while holding a global
 *   lock" panic.
 * - `Flavor::Global` — meant for short critical sections only. Disables
 *   interrupts on the owning CPU for as long as it is held and bumps that
 *   CPU's global-lock depth counter, which `tasking::scheduler` asserts is
 *   zero before a task is allowed to yield.
 *
 * Acquiring is a simple compare-and-swap spin on an owner-CPU slot backed
 * by `AtomicUsize`; re-acquiring on the same CPU just bumps a nesting
 * count instead of deadlocking, so a function may call another that locks
 * the same mutex without precondition checks at every call site.
 */

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use x86_64::instructions::interrupts;

/// No CPU currently owns the lock.
const NO_OWNER: usize = usize::MAX;

/// Hard cap on CPUs this kernel will ever schedule across (matches the
/// per-CPU scheduler arrays in `tasking`).
pub const MAX_CPUS: usize = 32;

/// Per-CPU count of currently held `Flavor::Global` mutexes.
///
/// `tasking::scheduler::yield_now` reads this to enforce "a task must not
/// yield while holding a non-task mutex" (section 4.1 / 5 of the design).
static GLOBAL_LOCK_DEPTH: [AtomicUsize; MAX_CPUS] = {
    const ZERO: AtomicUsize = AtomicUsize::new(0);
    [ZERO; MAX_CPUS]
};

pub fn global_lock_depth(cpu: usize) -> usize {
    GLOBAL_LOCK_DEPTH[cpu].load(Ordering::Acquire)
}

/// Which discipline a [`KernelMutex`] was initialized with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// May be held across a voluntary yield.
    Task,
    /// Short critical section only; disables interrupts while held.
    Global,
}

/// A kernel spinlock that disables interrupts on the owning CPU for the
/// duration of the outermost acquisition and restores them on the
/// matching outermost release.
pub struct KernelMutex {
    flavor: Flavor,
    owner_cpu: AtomicUsize,
    depth: AtomicUsize,
    interrupts_were_enabled: AtomicBool,
}

impl KernelMutex {
    pub const fn new(flavor: Flavor) -> Self {
        Self {
            flavor,
            owner_cpu: AtomicUsize::new(NO_OWNER),
            depth: AtomicUsize::new(0),
            interrupts_were_enabled: AtomicBool::new(false),
        }
    }

    pub const fn new_task() -> Self {
        Self::new(Flavor::Task)
    }

    pub const fn new_global() -> Self {
        Self::new(Flavor::Global)
    }

    /// Acquires the mutex, spinning until it can be claimed. Safe to call
    /// re-entrantly from the same CPU.
    pub fn acquire(&self, cpu: usize) {
        loop {
            if self.try_acquire(cpu) {
                return;
            }
            core::hint::spin_loop();
        }
    }

    /// Non-blocking acquire; returns `false` if another CPU currently
    /// holds the lock.
    pub fn try_acquire(&self, cpu: usize) -> bool {
        if self.owner_cpu.load(Ordering::Acquire) == cpu {
            // Re-entrant acquisition by the same CPU.
            self.depth.fetch_add(1, Ordering::AcqRel);
            return true;
        }

        if self
            .owner_cpu
            .compare_exchange(NO_OWNER, cpu, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let was_enabled = interrupts::are_enabled();
            interrupts::disable();
            self.interrupts_were_enabled
                .store(was_enabled, Ordering::Release);
            self.depth.store(1, Ordering::Release);
            if self.flavor == Flavor::Global {
                GLOBAL_LOCK_DEPTH[cpu].fetch_add(1, Ordering::AcqRel);
            }
            true
        } else {
            false
        }
    }

    /// Releases one level of nesting. On the outermost release, restores
    /// the interrupt flag that was in effect before the first acquisition.
    pub fn release(&self, cpu: usize) {
        debug_assert_eq!(self.owner_cpu.load(Ordering::Acquire), cpu);

        let remaining = self.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining > 0 {
            return;
        }

        if self.flavor == Flavor::Global {
            GLOBAL_LOCK_DEPTH[cpu].fetch_sub(1, Ordering::AcqRel);
        }

        self.owner_cpu.store(NO_OWNER, Ordering::Release);
        if self.interrupts_were_enabled.load(Ordering::Acquire) {
            interrupts::enable();
        }
    }

    pub fn flavor(&self) -> Flavor {
        self.flavor
    }
}

// Locks are always shared via `&'static` references into global
// structures guarded by exactly the lock they describe.
unsafe impl Sync for KernelMutex {}
