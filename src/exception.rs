//! Exception Handling
//!
//! Every entry into the kernel is a trap: a system call, a timer interrupt,
//! or a fault. The trap-entry glue saves the interrupted process's registers
//! into a [`Registers`] snapshot and calls [`KernelContext::exception`], which
//! decides which process runs next.
//!
//! Hardware interrupts stay masked for the whole of trap handling, so the
//! frame pool and process table are only ever touched by one thread of
//! control at a time.
//!
//! # Trap Types
//! - Syscall: dispatched on `rax`, see [`crate::syscall`]
//! - Timer: bumps the tick counter and reschedules
//! - Page fault: fatal in the kernel, quarantines the process in user mode

use alloc::string::String;
use core::fmt;

use bitflags::bitflags;

use crate::kernel::{KernelContext, Machine};
use crate::process::{Pid, ProcessError, ProcessState};
use crate::syscall::SyscallOutcome;

/// Page fault vector.
pub const INT_PAGEFAULT: u64 = 14;
/// Timer interrupt vector (IRQ 0).
pub const INT_TIMER: u64 = 32;
/// System call vector.
pub const INT_SYSCALL: u64 = 48;

/// Register snapshot saved on trap entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Registers {
    /// Syscall number on entry, return value on exit.
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    /// First syscall argument.
    pub rdi: u64,
    pub rbp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    /// Trap vector.
    pub intno: u64,
    /// Hardware error code (page faults).
    pub err: u64,
    /// Program counter
    pub rip: u64,
    /// Flags register
    pub rflags: u64,
    /// User stack pointer.
    pub rsp: u64,
    /// Faulting address (CR2) for page faults.
    pub fault_addr: u64,
}

impl Registers {
    /// All registers zero.
    pub const ZERO: Self = Self {
        rax: 0,
        rbx: 0,
        rcx: 0,
        rdx: 0,
        rsi: 0,
        rdi: 0,
        rbp: 0,
        r8: 0,
        r9: 0,
        r10: 0,
        r11: 0,
        r12: 0,
        r13: 0,
        r14: 0,
        r15: 0,
        intno: 0,
        err: 0,
        rip: 0,
        rflags: 0,
        rsp: 0,
        fault_addr: 0,
    };
}

/// Trap classified from its vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    Syscall,
    Timer,
    PageFault,
    Other(u64),
}

impl From<u64> for Trap {
    fn from(intno: u64) -> Self {
        match intno {
            INT_SYSCALL => Trap::Syscall,
            INT_TIMER => Trap::Timer,
            INT_PAGEFAULT => Trap::PageFault,
            other => Trap::Other(other),
        }
    }
}

bitflags! {
    /// Page fault error code bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFaultError: u64 {
        /// Protection violation on a present page (clear: missing page).
        const PRESENT = 1 << 0;
        /// Faulting access was a write.
        const WRITE = 1 << 1;
        /// Fault happened in user mode.
        const USER = 1 << 2;
    }
}

impl PageFaultError {
    /// "read" or "write".
    pub const fn operation(self) -> &'static str {
        if self.contains(Self::WRITE) {
            "write"
        } else {
            "read"
        }
    }

    /// "protection problem" or "missing page".
    pub const fn problem(self) -> &'static str {
        if self.contains(Self::PRESENT) {
            "protection problem"
        } else {
            "missing page"
        }
    }
}

/// Fatal kernel conditions. Returning one halts the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelPanic {
    /// A process invoked the `Panic` system call.
    UserPanic { pid: Pid, message: Option<String> },
    /// Unrecognized system call number.
    UnknownSyscall { pid: Pid, number: u64 },
    /// Unrecognized trap vector.
    UnexpectedTrap { number: u64 },
    /// Page fault while the kernel itself was running.
    KernelPageFault { addr: u64, error: PageFaultError, rip: u64 },
    /// Boot could not build the kernel address space.
    OutOfMemory,
    /// Boot scenario names a program that was not supplied.
    MissingProgram(usize),
    /// Process-table invariant violated.
    Process(ProcessError),
}

impl From<ProcessError> for KernelPanic {
    fn from(err: ProcessError) -> Self {
        Self::Process(err)
    }
}

impl fmt::Display for KernelPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserPanic { pid, message: Some(msg) } => {
                write!(f, "process {} panicked: {}", pid, msg)
            }
            Self::UserPanic { pid, message: None } => write!(f, "process {} panicked", pid),
            Self::UnknownSyscall { pid, number } => {
                write!(f, "Unexpected system call {} from process {}!", number, pid)
            }
            Self::UnexpectedTrap { number } => write!(f, "Unexpected exception {}!", number),
            Self::KernelPageFault { addr, error, rip } => write!(
                f,
                "Kernel page fault for {:#x} ({} {}, rip={:#x})!",
                addr,
                error.operation(),
                error.problem(),
                rip
            ),
            Self::OutOfMemory => write!(f, "out of memory during boot"),
            Self::MissingProgram(n) => write!(f, "no program image {}", n),
            Self::Process(err) => write!(f, "process table: {}", err),
        }
    }
}

impl KernelContext {
    /// Handle one trap taken while `current` was running.
    ///
    /// Saves `regs` into the current descriptor, acts on the trap, and returns
    /// the process to run next: the current one if it is still Runnable and
    /// the trap does not force a reschedule, otherwise the scheduler's pick.
    ///
    /// # Errors
    /// Returns the [`KernelPanic`] that must halt the machine.
    pub fn exception<M: Machine + ?Sized>(
        &mut self,
        regs: &Registers,
        machine: &mut M,
    ) -> Result<Pid, KernelPanic> {
        let pid = self.current;
        self.processes[pid].regs = *regs;

        let trap = Trap::from(regs.intno);
        let fault = PageFaultError::from_bits_truncate(regs.err);
        if trap != Trap::PageFault || fault.contains(PageFaultError::USER) {
            machine.refresh_display(self);
        }

        match trap {
            Trap::Syscall => match self.syscall()? {
                SyscallOutcome::Return(value) => self.processes[pid].regs.rax = value as u64,
                SyscallOutcome::Reschedule => return Ok(self.schedule(machine)),
            },

            Trap::Timer => {
                self.ticks += 1;
                return Ok(self.schedule(machine));
            }

            Trap::PageFault => {
                if !fault.contains(PageFaultError::USER) {
                    let panic = KernelPanic::KernelPageFault {
                        addr: regs.fault_addr,
                        error: fault,
                        rip: regs.rip,
                    };
                    log::error!("[EXCEPTION] {}", panic);
                    return Err(panic);
                }
                log::warn!(
                    "[EXCEPTION] Process {} page fault for {:#x} ({} {}, rip={:#x})!",
                    pid,
                    regs.fault_addr,
                    fault.operation(),
                    fault.problem(),
                    regs.rip
                );
                self.processes[pid].set_state(ProcessState::Broken);
            }

            Trap::Other(number) => {
                let panic = KernelPanic::UnexpectedTrap { number };
                log::error!("[EXCEPTION] {}", panic);
                return Err(panic);
            }
        }

        if self.processes[pid].is_runnable() {
            Ok(pid)
        } else {
            Ok(self.schedule(machine))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_vectors() {
        assert_eq!(Trap::from(48), Trap::Syscall);
        assert_eq!(Trap::from(32), Trap::Timer);
        assert_eq!(Trap::from(14), Trap::PageFault);
        assert_eq!(Trap::from(13), Trap::Other(13));
    }

    #[test]
    fn kernel_fault_message_names_access() {
        let panic = KernelPanic::KernelPageFault {
            addr: 0x1234,
            error: PageFaultError::WRITE,
            rip: 0x4_0010,
        };
        assert_eq!(
            alloc::format!("{}", panic),
            "Kernel page fault for 0x1234 (write missing page, rip=0x40010)!"
        );
        let user = PageFaultError::USER | PageFaultError::PRESENT;
        assert_eq!(user.operation(), "read");
        assert_eq!(user.problem(), "protection problem");
    }
}
