//! Program Images
//!
//! The boot-time program loader hands the kernel a program as a list of
//! segments plus an entry point. Segment contents may be shorter than the
//! segment itself; the tail is zero-filled.

use crate::mm::VirtAddr;

/// One loadable segment.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    /// First virtual address of the segment.
    pub va: VirtAddr,
    /// Size in memory, in bytes.
    pub size: usize,
    /// Initial contents; at most `size` bytes.
    pub data: &'a [u8],
    /// Mapped writable (data) or read-only (code).
    pub writable: bool,
}

impl<'a> Segment<'a> {
    /// Read-only segment.
    pub const fn code(va: usize, size: usize, data: &'a [u8]) -> Self {
        Self {
            va: VirtAddr::new(va),
            size,
            data,
            writable: false,
        }
    }

    /// Writable segment.
    pub const fn data(va: usize, size: usize, data: &'a [u8]) -> Self {
        Self {
            va: VirtAddr::new(va),
            size,
            data,
            writable: true,
        }
    }

    /// One past the last byte of the segment.
    #[inline]
    pub const fn end(&self) -> VirtAddr {
        self.va.add(self.size)
    }

    /// Page-aligned virtual pages the segment touches.
    pub fn pages(&self) -> impl Iterator<Item = VirtAddr> {
        let start = self.va.align_down().as_usize();
        let end = self.end().align_up().as_usize();
        (start..end)
            .step_by(crate::mm::PAGE_SIZE)
            .map(VirtAddr::new)
    }
}

/// A loadable program.
#[derive(Debug, Clone, Copy)]
pub struct ProgramImage<'a> {
    entry: VirtAddr,
    segments: &'a [Segment<'a>],
}

impl<'a> ProgramImage<'a> {
    /// Program with entry point `entry`.
    pub const fn new(entry: usize, segments: &'a [Segment<'a>]) -> Self {
        Self {
            entry: VirtAddr::new(entry),
            segments,
        }
    }

    /// Entry point.
    #[inline]
    pub const fn entry(&self) -> VirtAddr {
        self.entry
    }

    /// Segments in load order. Restartable.
    pub fn segments(&self) -> impl Iterator<Item = &Segment<'a>> + '_ {
        self.segments.iter()
    }
}
