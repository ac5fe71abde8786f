//! Physical and Virtual Memory Layout
//!
//! Fixed configuration read once at boot. The default reproduces the
//! classic teaching machine:
//!
//! ```text
//!  +-----+--------------------+----------------+--------------------+---------/
//!  |     | Kernel      Kernel |       :    I/O | App 1        App 1 | App 2
//!  |     | Code + Data  Stack |  ...  : Memory | Code + Data  Stack | Code ...
//!  +-----+--------------------+----------------+--------------------+---------/
//!  0  0x40000              0x80000 0xA0000 0x100000             0x140000
//!                                              ^
//!                                              | proc_start
//! ```
//!
//! Everything below `proc_start` is the kernel region: identity-mapped into
//! every address space, never owned by a process.

use super::address::{PhysAddr, VirtAddr, PAGE_SIZE};

/// Memory layout constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// Bytes of physical memory under management.
    pub physical_size: usize,
    /// Size of each process's virtual address space.
    pub virtual_size: usize,
    /// First process-visible address; `PageAlloc` only maps above it.
    pub proc_start: usize,
    /// Start of the kernel image.
    pub kernel_start: usize,
    /// End of the kernel image (exclusive).
    pub kernel_end: usize,
    /// Top of the kernel stack; the page below it is reserved.
    pub kernel_stack_top: usize,
    /// Start of the I/O hole.
    pub io_start: usize,
    /// End of the I/O hole (exclusive).
    pub io_end: usize,
    /// Shared console page.
    pub console: usize,
}

impl MemoryLayout {
    /// The original machine: 2 MiB of RAM, 3 MiB per-process address spaces.
    pub const DEFAULT: Self = Self {
        physical_size: 0x20_0000,
        virtual_size: 0x30_0000,
        proc_start: 0x10_0000,
        kernel_start: 0x4_0000,
        kernel_end: 0x6_0000,
        kernel_stack_top: 0x8_0000,
        io_start: 0xA_0000,
        io_end: 0x10_0000,
        console: 0xB_8000,
    };

    /// Number of physical frames.
    #[inline]
    pub const fn frame_count(&self) -> usize {
        self.physical_size / PAGE_SIZE
    }

    /// Virtual address of every process's stack page.
    #[inline]
    pub const fn stack_addr(&self) -> VirtAddr {
        VirtAddr::new(self.virtual_size - PAGE_SIZE)
    }

    /// Frames the hardware owns: the null page and the I/O hole.
    pub const fn is_reserved(&self, pa: PhysAddr) -> bool {
        let pa = pa.as_usize();
        pa < PAGE_SIZE || (pa >= self.io_start && pa < self.io_end)
    }

    /// Whether the frame allocator may ever hand out `pa`.
    pub const fn is_allocatable(&self, pa: PhysAddr) -> bool {
        let raw = pa.as_usize();
        raw < self.physical_size
            && !self.is_reserved(pa)
            && (raw < self.kernel_start || raw >= self.kernel_end)
            && (raw < self.kernel_stack_top - PAGE_SIZE || raw >= self.kernel_stack_top)
    }

    /// Below the process-visible boundary.
    #[inline]
    pub const fn is_kernel_region(&self, va: VirtAddr) -> bool {
        va.as_usize() < self.proc_start
    }

    /// The shared console page.
    #[inline]
    pub const fn is_console(&self, va: VirtAddr) -> bool {
        va.as_usize() == self.console
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}
