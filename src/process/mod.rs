//! Process Table
//!
//! A fixed array of [`NPROC`] process descriptors indexed by pid. Slot 0 is
//! never used.
//!
//! # Lifecycle
//! ```text
//!   Free --spawn/fork--> Runnable --user fault--> Broken
//!    ^                      |
//!    +-------destroy--------+
//! ```
//! Broken processes are never reaped.

pub mod loader;

use core::fmt;
use core::ops::{Index, IndexMut};

use crate::exception::Registers;
use crate::mm::{
    AddressSpace, FrameOwner, MappingError, MemoryLayout, PhysAddr, PhysicalAllocator, PteFlags,
    VirtAddr, PAGE_SIZE,
};

pub use loader::{ProgramImage, Segment};

/// Number of process slots, including the unused slot 0.
pub const NPROC: usize = 16;

/// Interrupt-enable bit of the flags register; user processes start with it set.
const RFLAGS_IF: u64 = 1 << 9;

/// Process ID: the index of the descriptor in the process table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Pid(usize);

impl Pid {
    /// Create a new process ID.
    #[must_use]
    pub const fn new(id: usize) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// The pid after this one, wrapping around the table.
    #[must_use]
    pub const fn next(self) -> Self {
        Self((self.0 + 1) % NPROC)
    }

    /// Slot 1..NPROC.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 > 0 && self.0 < NPROC
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Slot is unused.
    Free,
    /// Eligible for scheduling.
    Runnable,
    /// Faulted in user mode; parked forever.
    Broken,
}

/// Process control block
#[derive(Debug, Clone)]
pub struct Process {
    pid: Pid,
    state: ProcessState,
    /// Register snapshot from the last trap (or the initial state).
    pub regs: Registers,
    space: Option<AddressSpace>,
}

impl Process {
    const fn empty(pid: Pid) -> Self {
        Self {
            pid,
            state: ProcessState::Free,
            regs: Registers::ZERO,
            space: None,
        }
    }

    /// Process ID.
    #[inline]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Current state.
    #[inline]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// Set the state. Freeing goes through [`ProcessTable::destroy`].
    pub fn set_state(&mut self, state: ProcessState) {
        debug_assert!(state != ProcessState::Free && self.space.is_some());
        self.state = state;
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == ProcessState::Runnable
    }

    /// The address space; present unless the slot is Free.
    #[inline]
    pub const fn address_space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }
}

/// Error type for process table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessError {
    /// Pid outside 1..NPROC.
    InvalidPid(Pid),
    /// Spawning into an occupied slot.
    SlotInUse(Pid),
    /// The pid names a Free slot.
    NotRunning(Pid),
    /// No Free slot for a child.
    TableFull,
    /// Frame pool exhausted.
    OutOfMemory,
    /// A segment's contents exceed its size, or it overlaps the kernel
    /// region or the stack page.
    BadSegment(VirtAddr),
    /// A mapping was requested at an unaligned address.
    Misaligned,
}

impl From<MappingError> for ProcessError {
    fn from(err: MappingError) -> Self {
        match err {
            MappingError::OutOfMemory => Self::OutOfMemory,
            MappingError::MisalignedAddress => Self::Misaligned,
        }
    }
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPid(pid) => write!(f, "invalid pid {}", pid),
            Self::SlotInUse(pid) => write!(f, "process slot {} already in use", pid),
            Self::NotRunning(pid) => write!(f, "process {} does not exist", pid),
            Self::TableFull => write!(f, "process table full"),
            Self::OutOfMemory => write!(f, "out of physical memory"),
            Self::BadSegment(va) => write!(f, "bad program segment at {}", va),
            Self::Misaligned => write!(f, "address not page-aligned"),
        }
    }
}

/// The process descriptor array.
#[derive(Debug)]
pub struct ProcessTable {
    procs: [Process; NPROC],
}

impl ProcessTable {
    /// All slots Free, `pid == index`.
    pub fn new() -> Self {
        Self {
            procs: core::array::from_fn(|i| Process::empty(Pid::new(i))),
        }
    }

    /// Descriptor for `pid`.
    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(pid.as_usize())
    }

    /// Mutable descriptor for `pid`.
    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.get_mut(pid.as_usize())
    }

    /// All descriptors, slot 0 included.
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.iter()
    }

    /// Lowest Free slot above 0.
    pub fn free_slot(&self) -> Option<Pid> {
        self.procs[1..]
            .iter()
            .find(|p| p.state == ProcessState::Free)
            .map(Process::pid)
    }

    /// Load `program` as process `pid` and mark it Runnable.
    ///
    /// The new address space replicates the kernel-region mappings of
    /// `template`, maps every segment page (writable per segment), and gets
    /// one writable stack page at [`MemoryLayout::stack_addr`].
    ///
    /// On failure everything allocated so far is released and the slot stays
    /// Free.
    pub fn spawn(
        &mut self,
        pid: Pid,
        program: &ProgramImage<'_>,
        frames: &mut PhysicalAllocator,
        template: &AddressSpace,
    ) -> Result<(), ProcessError> {
        if !pid.is_valid() {
            return Err(ProcessError::InvalidPid(pid));
        }
        if self[pid].state != ProcessState::Free {
            return Err(ProcessError::SlotInUse(pid));
        }

        let layout = *frames.layout();
        let space = AddressSpace::new(frames, FrameOwner::Process(pid))?;
        if let Err(err) = load(&space, program, frames, template, &layout) {
            log::warn!("[PROC] spawn of {} failed: {}", pid, err);
            space.destroy(frames, &layout);
            return Err(err);
        }

        let stack = layout.stack_addr();
        let process = &mut self[pid];
        process.regs = Registers {
            rip: program.entry().as_u64(),
            rsp: (stack.as_usize() + PAGE_SIZE) as u64,
            rflags: RFLAGS_IF,
            ..Registers::ZERO
        };
        process.space = Some(space);
        process.state = ProcessState::Runnable;

        log::info!("[PROC] Spawned process {} (entry {})", pid, program.entry());
        Ok(())
    }

    /// Duplicate `parent` into the lowest Free slot.
    ///
    /// Returns the child's pid; the child's return-value register is 0.
    /// On failure no frame stays allocated for the child.
    pub fn fork(
        &mut self,
        parent: Pid,
        frames: &mut PhysicalAllocator,
    ) -> Result<Pid, ProcessError> {
        let parent_space = *self
            .get(parent)
            .and_then(Process::address_space)
            .ok_or(ProcessError::NotRunning(parent))?;
        let child = self.free_slot().ok_or(ProcessError::TableFull)?;

        let layout = *frames.layout();
        let space = AddressSpace::new(frames, FrameOwner::Process(child))?;
        if let Err(err) = parent_space.duplicate_into(frames, &space, &layout) {
            space.destroy(frames, &layout);
            return Err(err.into());
        }

        let mut regs = self[parent].regs;
        regs.rax = 0;
        let process = &mut self[child];
        process.regs = regs;
        process.space = Some(space);
        process.state = ProcessState::Runnable;

        log::debug!("[PROC] Forked {} -> {}", parent, child);
        Ok(child)
    }

    /// Free process `pid` and every frame its address space holds.
    pub fn destroy(
        &mut self,
        pid: Pid,
        frames: &mut PhysicalAllocator,
    ) -> Result<(), ProcessError> {
        if !pid.is_valid() {
            return Err(ProcessError::InvalidPid(pid));
        }
        let process = &mut self[pid];
        let space = process.space.take().ok_or(ProcessError::NotRunning(pid))?;
        process.state = ProcessState::Free;

        let layout = *frames.layout();
        space.destroy(frames, &layout);
        log::info!("[PROC] Freed process {}", pid);
        Ok(())
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<Pid> for ProcessTable {
    type Output = Process;

    #[inline]
    fn index(&self, pid: Pid) -> &Self::Output {
        &self.procs[pid.as_usize()]
    }
}

impl IndexMut<Pid> for ProcessTable {
    #[inline]
    fn index_mut(&mut self, pid: Pid) -> &mut Self::Output {
        &mut self.procs[pid.as_usize()]
    }
}

/// Fill `space` with the kernel region, the program, and a stack page.
fn load(
    space: &AddressSpace,
    program: &ProgramImage<'_>,
    frames: &mut PhysicalAllocator,
    template: &AddressSpace,
    layout: &MemoryLayout,
) -> Result<(), ProcessError> {
    let mut cursor = VirtAddr::new(0);
    while let Some(kernel) = template.next_mapping(frames, cursor) {
        if !layout.is_kernel_region(kernel.va) {
            break;
        }
        space.map(frames, kernel.va, kernel.pa, kernel.flags)?;
        cursor = kernel.va.add(PAGE_SIZE);
    }

    let stack = layout.stack_addr().as_usize();
    for segment in program.segments() {
        let end = segment.va.as_usize().checked_add(segment.size);
        if segment.data.len() > segment.size
            || layout.is_kernel_region(segment.va)
            || end.map_or(true, |end| end > stack)
        {
            return Err(ProcessError::BadSegment(segment.va));
        }
        let flags = if segment.writable {
            PteFlags::USER_DATA
        } else {
            PteFlags::USER_CODE
        };

        for page in segment.pages() {
            let frame = match space.lookup(frames, page) {
                // Page shared with an earlier segment: writable if either is.
                Some(existing) if segment.writable && !existing.is_writable() => {
                    space.map(frames, page, existing.pa, PteFlags::USER_DATA)?;
                    existing.pa
                }
                Some(existing) => existing.pa,
                None => map_fresh(space, frames, page, flags)?,
            };

            // Copy the slice of initial contents that lands on this page.
            let page_start = page.as_usize().max(segment.va.as_usize());
            let data_start = page_start - segment.va.as_usize();
            let data_end =
                (page.as_usize() + PAGE_SIZE - segment.va.as_usize()).min(segment.data.len());
            if data_start < data_end {
                let offset = page_start - page.as_usize();
                let bytes = &segment.data[data_start..data_end];
                frames.memory_mut().page_mut(frame)[offset..offset + bytes.len()]
                    .copy_from_slice(bytes);
            }
        }
    }

    map_fresh(space, frames, layout.stack_addr(), PteFlags::USER_DATA)?;
    Ok(())
}

/// Allocate a frame owned by the space's owner and map it at `va`.
fn map_fresh(
    space: &AddressSpace,
    frames: &mut PhysicalAllocator,
    va: VirtAddr,
    flags: PteFlags,
) -> Result<PhysAddr, ProcessError> {
    let frame = frames.allocate_page()?;
    frames.set_owner(frame, space.owner());
    if let Err(err) = space.map(frames, va, frame, flags) {
        frames.release(frame);
        return Err(err.into());
    }
    Ok(frame)
}
