//! System Call Interface
//!
//! # ABI
//! - `rax`: call number on entry, result on return
//! - `rdi`: argument (target address for `PageAlloc`, message for `Panic`)
//!
//! Results are the pid or 0 on success and -1 on failure.
//!
//! # Current Syscalls
//! - 1: getpid() - caller's pid
//! - 2: yield() - give up the CPU
//! - 3: panic(msg) - halt the machine
//! - 4: page_alloc(addr) - map a fresh writable page at `addr`
//! - 5: fork() - duplicate the caller
//! - 6: exit() - free the caller

mod handler;
mod validate;

pub use handler::SyscallOutcome;
pub use validate::validate_page_alloc;

/// System call numbers
pub mod numbers {
    pub const SYS_GETPID: u64 = 1;
    pub const SYS_YIELD: u64 = 2;
    pub const SYS_PANIC: u64 = 3;
    pub const SYS_PAGE_ALLOC: u64 = 4;
    pub const SYS_FORK: u64 = 5;
    pub const SYS_EXIT: u64 = 6;
}

/// A decoded system call number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    GetPid,
    Yield,
    Panic,
    PageAlloc,
    Fork,
    Exit,
}

impl TryFrom<u64> for Syscall {
    type Error = u64;

    fn try_from(number: u64) -> Result<Self, u64> {
        match number {
            numbers::SYS_GETPID => Ok(Self::GetPid),
            numbers::SYS_YIELD => Ok(Self::Yield),
            numbers::SYS_PANIC => Ok(Self::Panic),
            numbers::SYS_PAGE_ALLOC => Ok(Self::PageAlloc),
            numbers::SYS_FORK => Ok(Self::Fork),
            numbers::SYS_EXIT => Ok(Self::Exit),
            other => Err(other),
        }
    }
}

/// Recoverable system call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallError {
    /// No free frame.
    OutOfMemory,
    /// No free process slot.
    TableFull,
    /// Address reserved, unaligned, out of range, or already mapped.
    BadAddress,
}

impl SyscallError {
    /// Value returned to user space.
    pub const fn code(self) -> i64 {
        -1
    }
}

impl core::fmt::Display for SyscallError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::TableFull => write!(f, "process table full"),
            Self::BadAddress => write!(f, "bad address"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_numbers() {
        assert_eq!(Syscall::try_from(numbers::SYS_FORK), Ok(Syscall::Fork));
        assert_eq!(Syscall::try_from(numbers::SYS_EXIT), Ok(Syscall::Exit));
        assert_eq!(Syscall::try_from(0), Err(0));
        assert_eq!(Syscall::try_from(99), Err(99));
    }

    #[test]
    fn failures_share_one_sentinel() {
        for err in [SyscallError::OutOfMemory, SyscallError::TableFull, SyscallError::BadAddress] {
            assert_eq!(err.code(), -1);
        }
    }
}
