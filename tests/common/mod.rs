//! Shared fixtures: small program images, exact-size layouts, and a scripted
//! machine that replays one trap per `run`.

#![allow(dead_code)]

use std::collections::VecDeque;

use minnow::exception::{INT_PAGEFAULT, INT_SYSCALL, INT_TIMER};
use minnow::mm::{PhysicalAllocator, VirtAddr};
use minnow::{
    KernelContext, KernelPanic, Machine, MemoryLayout, Pid, Process, ProgramImage, Registers,
    Segment,
};

pub use minnow::PAGE_SIZE;

pub const CODE_VA: usize = 0x10_0000;
pub const DATA_VA: usize = 0x10_1000;
pub const STACK_VA: usize = 0x2F_F000;

/// Initial contents of every data page: a panic message.
pub const MESSAGE: &[u8] = b"oh no\0";

/// Frames the kernel template takes: root plus one table per lower level.
pub const KERNEL_TABLE_FRAMES: usize = 4;
/// Frames one spawned process takes: 5 tables, code, data, stack.
pub const PROCESS_FRAMES: usize = 8;
/// Frames a fork of a spawned process takes: 5 tables, data copy, stack copy.
pub const FORK_FRAMES: usize = 7;

const fn image(tag: &'static [u8]) -> [Segment<'static>; 2] {
    [
        Segment::code(CODE_VA, PAGE_SIZE, tag),
        Segment::data(DATA_VA, PAGE_SIZE, MESSAGE),
    ]
}

static IMAGES: [[Segment<'static>; 2]; 6] = [
    image(b"alpha"),
    image(b"bravo"),
    image(b"charlie"),
    image(b"delta"),
    image(b"fork"),
    image(b"forkexit"),
];

/// Code-page tag of program `n`.
pub fn tag(n: usize) -> &'static [u8] {
    IMAGES[n][0].data
}

/// The six boot programs: each a read-only code page and a writable data page.
pub fn programs() -> Vec<ProgramImage<'static>> {
    IMAGES.iter().map(|segments| ProgramImage::new(CODE_VA, segments)).collect()
}

/// A layout whose pool has exactly `user_frames` allocatable frames, all at
/// or above `proc_start`.
pub fn layout(user_frames: usize) -> MemoryLayout {
    MemoryLayout {
        physical_size: 0x10_0000 + user_frames * PAGE_SIZE,
        kernel_start: PAGE_SIZE,
        kernel_end: 0xA_0000,
        ..MemoryLayout::DEFAULT
    }
}

pub fn boot(command: Option<&str>, layout: MemoryLayout) -> KernelContext {
    KernelContext::boot(command, layout, &programs()).unwrap()
}

/// One trap to deliver.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// System call `number` with argument `arg`.
    Syscall(u64, u64),
    Timer,
    Fault { addr: u64, err: u64 },
    Trap(u64),
}

impl Step {
    pub fn apply(self, mut regs: Registers) -> Registers {
        match self {
            Step::Syscall(number, arg) => {
                regs.intno = INT_SYSCALL;
                regs.rax = number;
                regs.rdi = arg;
            }
            Step::Timer => regs.intno = INT_TIMER,
            Step::Fault { addr, err } => {
                regs.intno = INT_PAGEFAULT;
                regs.err = err;
                regs.fault_addr = addr;
            }
            Step::Trap(number) => regs.intno = number,
        }
        regs
    }
}

/// Replays a fixed script of traps, recording which processes ran.
#[derive(Debug, Default)]
pub struct TestMachine {
    pub script: VecDeque<Step>,
    pub ran: Vec<Pid>,
    pub refreshes: usize,
}

impl TestMachine {
    pub fn new(script: &[Step]) -> Self {
        Self {
            script: script.iter().copied().collect(),
            ..Self::default()
        }
    }
}

impl Machine for TestMachine {
    fn run(&mut self, process: &Process, _frames: &PhysicalAllocator) -> Registers {
        self.ran.push(process.pid());
        match self.script.pop_front() {
            Some(step) => step.apply(process.regs),
            None => panic!("script exhausted"),
        }
    }

    fn halt(&mut self, reason: &KernelPanic) -> ! {
        panic!("halted: {}", reason)
    }

    fn refresh_display(&mut self, _kernel: &KernelContext) {
        self.refreshes += 1;
    }
}

/// Deliver `step` as if the current process had just trapped with it.
pub fn trap(
    kernel: &mut KernelContext,
    machine: &mut TestMachine,
    step: Step,
) -> Result<Pid, KernelPanic> {
    let regs = step.apply(kernel.processes()[kernel.current()].regs);
    kernel.exception(&regs, machine)
}

/// `rax` of process `pid` as a signed return value.
pub fn ret(kernel: &KernelContext, pid: usize) -> i64 {
    kernel.processes()[Pid::new(pid)].regs.rax as i64
}

/// Frames whose owner is not Free, counted from the frame records.
pub fn owned_frames(frames: &PhysicalAllocator) -> usize {
    frames.frames().filter(|(_, frame)| !frame.is_free()).count()
}

pub fn va(addr: usize) -> VirtAddr {
    VirtAddr::new(addr)
}
