//! Minnow - Teaching Kernel Core
//!
//! The machine-independent heart of a small x86-64 teaching kernel.
//!
//! # Scope
//! - Physical page allocation with owner/sharer accounting
//! - 4-level page tables stored in (simulated) physical frames
//! - Fixed-size process table: spawn, fork, exit
//! - Trap dispatch: system calls, timer, page faults
//! - Round-robin scheduling
//!
//! # Architecture
//! - All kernel state lives in one [`KernelContext`]; there are no globals
//! - Physical memory is a byte array owned by the frame pool
//! - The CPU is a [`Machine`]: it runs a process until the next trap and
//!   hands back the register snapshot
//! - Boot: [`KernelContext::boot`] then [`KernelContext::run`]

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod exception;
pub mod kernel;
pub mod mm;
pub mod process;
pub mod sched;
pub mod syscall;

pub use exception::{KernelPanic, PageFaultError, Registers, Trap};
pub use kernel::{KernelContext, Machine, Scenario};
pub use mm::{MemoryLayout, PhysAddr, PhysicalAllocator, VirtAddr, PAGE_SIZE};
pub use process::{Pid, Process, ProcessState, ProgramImage, Segment, NPROC};
pub use syscall::{Syscall, SyscallError};
