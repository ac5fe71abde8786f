//! Round-Robin Scheduler
//!
//! Scans the process table circularly starting after the current process
//! and runs the first Runnable one. With nothing Runnable it spins forever,
//! refreshing the display every [`IDLE_REFRESH_SPINS`] scan steps.

use crate::kernel::{KernelContext, Machine};
use crate::process::{Pid, ProcessTable, NPROC};

/// Scan steps between display refreshes while idle.
pub const IDLE_REFRESH_SPINS: u64 = 1 << 12;

// Idle spins advance a whole table circuit at a time.
const _: () = assert!(IDLE_REFRESH_SPINS % NPROC as u64 == 0);

/// First Runnable pid after `after`, wrapping around; `after` itself is
/// checked last. Takes at most [`NPROC`] steps.
pub fn next_runnable(table: &ProcessTable, after: Pid) -> Option<Pid> {
    let mut pid = after;
    for _ in 0..NPROC {
        pid = pid.next();
        if table[pid].is_runnable() {
            return Some(pid);
        }
    }
    None
}

impl KernelContext {
    /// Pick the next process to run and make it current.
    ///
    /// Never gives up: if no process is Runnable this busy-waits, one
    /// [`next_runnable`] circuit at a time.
    pub fn schedule<M: Machine + ?Sized>(&mut self, machine: &mut M) -> Pid {
        let mut spins: u64 = 0;
        loop {
            if let Some(pid) = next_runnable(&self.processes, self.current) {
                log::trace!("[SCHED] {} -> {}", self.current, pid);
                self.current = pid;
                return pid;
            }

            if spins % IDLE_REFRESH_SPINS == 0 {
                machine.refresh_display(self);
            }
            spins = spins.wrapping_add(NPROC as u64);
        }
    }
}
