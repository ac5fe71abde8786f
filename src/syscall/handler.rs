//! System Call Handler
//!
//! Dispatches system calls for the current process and implements the
//! individual calls.

use alloc::string::String;
use alloc::vec;

use super::validate::validate_page_alloc;
use super::{Syscall, SyscallError};
use crate::exception::KernelPanic;
use crate::kernel::KernelContext;
use crate::mm::{AddressSpace, FrameOwner, PteFlags, VirtAddr, PAGE_SIZE};
use crate::process::{Pid, ProcessError};

/// What the trap dispatcher does after a system call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Store the value in the caller's `rax`.
    Return(i64),
    /// The caller gave up the CPU (or no longer exists); pick someone else.
    Reschedule,
}

impl KernelContext {
    /// Dispatch the system call in the current process's saved registers.
    ///
    /// # Errors
    /// `Panic`, unknown call numbers, and broken process-table invariants are
    /// fatal.
    pub(crate) fn syscall(&mut self) -> Result<SyscallOutcome, KernelPanic> {
        let pid = self.current;
        let regs = self.processes[pid].regs;
        let space = self.processes[pid]
            .address_space()
            .copied()
            .ok_or(ProcessError::NotRunning(pid))?;

        let call = match Syscall::try_from(regs.rax) {
            Ok(call) => call,
            Err(number) => {
                let panic = KernelPanic::UnknownSyscall { pid, number };
                log::error!("[SYSCALL] {}", panic);
                return Err(panic);
            }
        };
        log::debug!("[SYSCALL] process {}: {:?}({:#x})", pid, call, regs.rdi);

        match call {
            Syscall::Panic => {
                let message = self.user_message(&space, regs.rdi);
                let panic = KernelPanic::UserPanic { pid, message };
                log::error!("[SYSCALL] {}", panic);
                Err(panic)
            }

            Syscall::GetPid => Ok(SyscallOutcome::Return(pid.as_usize() as i64)),

            Syscall::Yield => {
                self.processes[pid].regs.rax = 0;
                Ok(SyscallOutcome::Reschedule)
            }

            Syscall::PageAlloc => {
                let result = match self.sys_page_alloc(pid, &space, regs.rdi) {
                    Ok(()) => 0,
                    Err(err) => {
                        log::warn!("[SYSCALL] page_alloc({:#x}) for {}: {}", regs.rdi, pid, err);
                        err.code()
                    }
                };
                Ok(SyscallOutcome::Return(result))
            }

            Syscall::Fork => {
                let result = match self.processes.fork(pid, &mut self.frames) {
                    Ok(child) => child.as_usize() as i64,
                    Err(ProcessError::TableFull) => SyscallError::TableFull.code(),
                    Err(ProcessError::OutOfMemory) => {
                        log::warn!("[SYSCALL] fork of {}: out of memory", pid);
                        SyscallError::OutOfMemory.code()
                    }
                    Err(err) => return Err(err.into()),
                };
                Ok(SyscallOutcome::Return(result))
            }

            Syscall::Exit => {
                self.processes.destroy(pid, &mut self.frames)?;
                self.processes[pid].regs.rax = 0;
                Ok(SyscallOutcome::Reschedule)
            }
        }
    }

    /// Map a fresh zeroed writable page at `addr` in the caller's space.
    fn sys_page_alloc(
        &mut self,
        pid: Pid,
        space: &AddressSpace,
        addr: u64,
    ) -> Result<(), SyscallError> {
        let va = validate_page_alloc(addr, self.frames.layout())?;
        if space.lookup(&self.frames, va).is_some() {
            return Err(SyscallError::BadAddress);
        }

        let frame = self.frames.allocate_page().map_err(|_| SyscallError::OutOfMemory)?;
        self.frames.set_owner(frame, FrameOwner::Process(pid));
        if space.map(&mut self.frames, va, frame, PteFlags::USER_DATA).is_err() {
            self.frames.release(frame);
            return Err(SyscallError::OutOfMemory);
        }
        Ok(())
    }

    /// NUL-terminated string at `addr` in user memory, at most one page long.
    fn user_message(&self, space: &AddressSpace, addr: u64) -> Option<String> {
        if addr == 0 {
            return None;
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        let read = space.read_user(&self.frames, VirtAddr::new(addr as usize), &mut buf);
        let text = &buf[..read];
        let len = text.iter().position(|&b| b == 0).unwrap_or(text.len());
        (len > 0).then(|| String::from_utf8_lossy(&text[..len]).into_owned())
    }
}
