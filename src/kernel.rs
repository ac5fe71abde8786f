//! Kernel Context and Boot
//!
//! [`KernelContext`] holds all kernel state: the frame pool, the kernel's
//! template address space, the process table, the current process, and the
//! tick counter. It is built once by [`KernelContext::boot`] and lives until
//! the machine halts.
//!
//! The hardware side is a [`Machine`]: it enters user mode and comes back
//! with the next trap's register snapshot. [`KernelContext::run`] is the
//! never-returning loop that alternates the two.

use crate::exception::{KernelPanic, Registers};
use crate::mm::{
    AddressSpace, FrameOwner, MemoryLayout, PhysAddr, PhysicalAllocator, PteFlags, VirtAddr,
    PAGE_SIZE,
};
use crate::process::{Pid, Process, ProcessError, ProcessTable, ProgramImage};

/// Hardware services the kernel core depends on.
pub trait Machine {
    /// Switch to `process`'s address space and registers and run it until
    /// the next trap. Returns the trap-time register snapshot.
    fn run(&mut self, process: &Process, frames: &PhysicalAllocator) -> Registers;

    /// Stop the machine for good.
    fn halt(&mut self, reason: &KernelPanic) -> !;

    /// Redraw any memory visualisation.
    fn refresh_display(&mut self, _kernel: &KernelContext) {}
}

/// Which programs boot loads into which pids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Programs 0..=3 into pids 1..=4.
    Default,
    /// Program 4 into pid 1.
    Fork,
    /// Program 5 into pid 1.
    ForkExit,
}

impl Scenario {
    /// Parse the boot command; anything unrecognized is [`Scenario::Default`].
    pub fn from_command(command: Option<&str>) -> Self {
        match command {
            Some("fork") => Self::Fork,
            Some("forkexit") => Self::ForkExit,
            _ => Self::Default,
        }
    }

    /// `(pid, program number)` pairs to spawn.
    pub const fn assignments(self) -> &'static [(usize, usize)] {
        match self {
            Self::Default => &[(1, 0), (2, 1), (3, 2), (4, 3)],
            Self::Fork => &[(1, 4)],
            Self::ForkExit => &[(1, 5)],
        }
    }
}

/// All kernel state.
#[derive(Debug)]
pub struct KernelContext {
    pub(crate) frames: PhysicalAllocator,
    pub(crate) kernel_space: AddressSpace,
    pub(crate) processes: ProcessTable,
    pub(crate) current: Pid,
    pub(crate) ticks: u64,
}

impl KernelContext {
    /// Initialize memory and the kernel address space, with no processes.
    ///
    /// The kernel region `[PAGE_SIZE, proc_start)` is identity-mapped
    /// kernel-only, except the console page which user code may touch.
    pub fn new(layout: MemoryLayout) -> Result<Self, KernelPanic> {
        let mut frames = PhysicalAllocator::new(layout);
        let kernel_space = AddressSpace::new(&mut frames, FrameOwner::Kernel)
            .map_err(|_| KernelPanic::OutOfMemory)?;

        for addr in (PAGE_SIZE..layout.proc_start).step_by(PAGE_SIZE) {
            let va = VirtAddr::new(addr);
            let flags = if layout.is_console(va) {
                PteFlags::USER_DATA
            } else {
                PteFlags::KERNEL_DATA
            };
            kernel_space
                .map(&mut frames, va, PhysAddr::new(addr), flags)
                .map_err(|_| KernelPanic::OutOfMemory)?;
        }

        log::info!(
            "[BOOT] Memory: {} frames, {} free",
            frames.total_frames(),
            frames.free_frames()
        );

        Ok(Self {
            frames,
            kernel_space,
            processes: ProcessTable::new(),
            current: Pid::new(1),
            ticks: 1,
        })
    }

    /// Boot entry: build the kernel and load the programs `command` selects.
    ///
    /// `programs` is indexed by program number.
    ///
    /// # Errors
    /// A missing program or any failure to load one is fatal.
    pub fn boot(
        command: Option<&str>,
        layout: MemoryLayout,
        programs: &[ProgramImage<'_>],
    ) -> Result<Self, KernelPanic> {
        let mut kernel = Self::new(layout)?;
        let scenario = Scenario::from_command(command);
        log::info!("[BOOT] Scenario {:?}", scenario);

        for &(pid, number) in scenario.assignments() {
            let program = programs.get(number).ok_or(KernelPanic::MissingProgram(number))?;
            kernel.spawn(Pid::new(pid), program).map_err(|err| {
                log::error!("[BOOT] Cannot load program {} as process {}: {}", number, pid, err);
                KernelPanic::from(err)
            })?;
        }

        kernel.current = Pid::new(1);
        Ok(kernel)
    }

    /// Load `program` as process `pid`.
    pub fn spawn(&mut self, pid: Pid, program: &ProgramImage<'_>) -> Result<(), ProcessError> {
        self.processes
            .spawn(pid, program, &mut self.frames, &self.kernel_space)
    }

    /// Run processes forever, starting with the current one.
    pub fn run<M: Machine + ?Sized>(mut self, machine: &mut M) -> ! {
        let mut pid = self.current;
        loop {
            assert!(
                self.processes[pid].is_runnable(),
                "running non-runnable process {}",
                pid
            );
            self.current = pid;

            let regs = machine.run(&self.processes[pid], &self.frames);
            pid = match self.exception(&regs, machine) {
                Ok(next) => next,
                Err(panic) => {
                    log::error!("[BOOT] KERNEL PANIC: {}", panic);
                    machine.halt(&panic)
                }
            };
        }
    }

    /// Memory layout.
    #[inline]
    pub fn layout(&self) -> &MemoryLayout {
        self.frames.layout()
    }

    /// The frame pool.
    #[inline]
    pub fn frames(&self) -> &PhysicalAllocator {
        &self.frames
    }

    /// Template address space holding the kernel region.
    #[inline]
    pub fn kernel_space(&self) -> &AddressSpace {
        &self.kernel_space
    }

    /// The process table.
    #[inline]
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Currently running process.
    #[inline]
    pub fn current(&self) -> Pid {
        self.current
    }

    /// Timer interrupts since boot, starting at 1.
    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }
}
