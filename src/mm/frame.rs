//! Physical Frame Allocator
//!
//! Manages physical memory pages (frames) with one [`PageFrame`] record per
//! frame, indexed by frame number.
//!
//! # Design
//! - Allocation scans from a rotating cursor that persists across calls, so
//!   freed frames are reused round-robin rather than immediately.
//! - A full circuit of the pool without finding a free frame is exhaustion.
//! - All frames are zeroed both when handed out and when returned.
//! - Frames the layout marks non-allocatable are kernel-owned from boot on
//!   and can never be released.
//!
//! # Accounting
//! `active_frames()` always equals the number of frames whose owner is not
//! [`FrameOwner::Free`]. A frame's `sharers` counts the address spaces mapping
//! it read-only *beyond* its owner; a frame with sharers is never released.

use alloc::vec::Vec;

use super::address::{PhysAddr, PAGE_SIZE};
use super::layout::MemoryLayout;
use super::memory::PhysicalMemory;
use super::paging::{MappingError, PageTableEntry};
use crate::process::Pid;

/// Who holds a physical frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOwner {
    /// Available for allocation.
    Free,
    /// Kernel image, reserved hardware, kernel tables, or freshly allocated.
    Kernel,
    /// Page or page-table frame of a process.
    Process(Pid),
}

/// Per-frame bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFrame {
    /// Current owner.
    pub owner: FrameOwner,
    /// Additional read-only mappers beyond the owner.
    pub sharers: u32,
}

impl PageFrame {
    const FREE: Self = Self {
        owner: FrameOwner::Free,
        sharers: 0,
    };

    /// Whether the frame is unowned.
    #[inline]
    pub const fn is_free(&self) -> bool {
        matches!(self.owner, FrameOwner::Free)
    }
}

/// The physical page pool.
pub struct PhysicalAllocator {
    layout: MemoryLayout,
    memory: PhysicalMemory,
    frames: Vec<PageFrame>,
    /// Next frame number to examine.
    cursor: usize,
    /// Frames with `owner != Free`.
    active: usize,
}

impl PhysicalAllocator {
    /// Build the pool for `layout`, claiming every non-allocatable frame for
    /// the kernel.
    pub fn new(layout: MemoryLayout) -> Self {
        let count = layout.frame_count();
        let mut frames = Vec::with_capacity(count);
        let mut active = 0;

        for pfn in 0..count {
            if layout.is_allocatable(PhysAddr::from_page_frame_number(pfn)) {
                frames.push(PageFrame::FREE);
            } else {
                frames.push(PageFrame {
                    owner: FrameOwner::Kernel,
                    sharers: 0,
                });
                active += 1;
            }
        }

        log::debug!(
            "[MM] Frame pool: {} frames, {} reserved for the kernel",
            count,
            active
        );

        Self {
            layout,
            memory: PhysicalMemory::new(count * PAGE_SIZE),
            frames,
            cursor: 0,
            active,
        }
    }

    /// Allocate `size` bytes, which on this allocator always means one whole
    /// zeroed frame.
    ///
    /// Returns `None` if `size` exceeds a page or every frame is taken. The
    /// frame comes back kernel-owned; the caller reassigns ownership.
    pub fn allocate(&mut self, size: usize) -> Option<PhysAddr> {
        if size > PAGE_SIZE {
            return None;
        }

        let count = self.frames.len();
        for _ in 0..count {
            let pfn = self.cursor;
            self.cursor = (self.cursor + 1) % count;

            let addr = PhysAddr::from_page_frame_number(pfn);
            if self.layout.is_allocatable(addr) && self.frames[pfn].is_free() {
                self.frames[pfn] = PageFrame {
                    owner: FrameOwner::Kernel,
                    sharers: 0,
                };
                self.active += 1;
                self.memory.zero_page(addr);
                log::trace!("[MM] allocate -> {}", addr);
                return Some(addr);
            }
        }

        None
    }

    /// Allocate one frame, returning an error instead of None.
    pub fn allocate_page(&mut self) -> Result<PhysAddr, MappingError> {
        self.allocate(PAGE_SIZE).ok_or(MappingError::OutOfMemory)
    }

    /// Return a frame to the pool.
    ///
    /// # Panics
    /// Panics if:
    /// - The address is not page-aligned
    /// - The frame is not allocatable (kernel, reserved, out of range)
    /// - The frame is already free (double free)
    /// - The frame still has sharers
    pub fn release(&mut self, addr: PhysAddr) {
        assert!(addr.is_aligned(), "Attempted to free unaligned address: {:?}", addr);
        assert!(
            self.layout.is_allocatable(addr),
            "Attempted to free frame outside the allocatable pool: {:?}",
            addr
        );

        let frame = &mut self.frames[addr.page_frame_number()];
        assert!(!frame.is_free(), "Double free detected for frame: {:?}", addr);
        assert_eq!(frame.sharers, 0, "Freeing shared frame: {:?}", addr);

        *frame = PageFrame::FREE;
        self.active -= 1;
        self.memory.zero_page(addr);
        log::trace!("[MM] release {}", addr);
    }

    /// Bookkeeping record for the frame containing `addr`.
    #[inline]
    pub fn frame(&self, addr: PhysAddr) -> &PageFrame {
        &self.frames[addr.page_frame_number()]
    }

    /// Hand an allocated frame to `owner`.
    pub fn set_owner(&mut self, addr: PhysAddr, owner: FrameOwner) {
        let frame = &mut self.frames[addr.page_frame_number()];
        debug_assert!(!frame.is_free() && owner != FrameOwner::Free);
        frame.owner = owner;
    }

    /// Record one more read-only mapper of `addr`.
    pub fn share(&mut self, addr: PhysAddr) {
        let frame = &mut self.frames[addr.page_frame_number()];
        debug_assert!(!frame.is_free());
        frame.sharers += 1;
    }

    /// Drop one read-only mapper of `addr`.
    pub fn unshare(&mut self, addr: PhysAddr) {
        let frame = &mut self.frames[addr.page_frame_number()];
        assert!(frame.sharers > 0, "Unsharing unshared frame: {:?}", addr);
        frame.sharers -= 1;
    }

    /// Iterate over all frame records in frame-number order.
    pub fn frames(&self) -> impl Iterator<Item = (PhysAddr, &PageFrame)> {
        self.frames
            .iter()
            .enumerate()
            .map(|(pfn, frame)| (PhysAddr::from_page_frame_number(pfn), frame))
    }

    /// Frames currently owned by anyone.
    #[inline]
    pub fn active_frames(&self) -> usize {
        self.active
    }

    /// Frames available for allocation.
    #[inline]
    pub fn free_frames(&self) -> usize {
        self.frames.len() - self.active
    }

    /// Total frames under management.
    #[inline]
    pub fn total_frames(&self) -> usize {
        self.frames.len()
    }

    /// The layout this pool was built for.
    #[inline]
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Contents of physical memory.
    #[inline]
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// Mutable contents of physical memory.
    #[inline]
    pub fn memory_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.memory
    }

    /// Read a page-table entry.
    #[inline]
    pub(crate) fn entry(&self, table: PhysAddr, index: usize) -> PageTableEntry {
        self.memory.entry(table, index)
    }

    /// Write a page-table entry.
    #[inline]
    pub(crate) fn set_entry(&mut self, table: PhysAddr, index: usize, entry: PageTableEntry) {
        self.memory.set_entry(table, index, entry);
    }
}

impl core::fmt::Debug for PhysicalAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PhysicalAllocator")
            .field("total", &self.frames.len())
            .field("active", &self.active)
            .field("cursor", &self.cursor)
            .finish()
    }
}
