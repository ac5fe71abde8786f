//! Physical and Virtual Address Types
//!
//! Type-safe wrappers for memory addresses that keep physical frame
//! addresses and process virtual addresses from being mixed up.
//!
//! Physical addresses index the simulated physical memory owned by the
//! frame allocator; virtual addresses are only meaningful relative to an
//! [`AddressSpace`](super::AddressSpace).

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: usize = 12;

/// Number of entries per page table (512 eight-byte entries per 4 KiB table)
pub const ENTRIES_PER_TABLE: usize = 512;
/// Bits of virtual address consumed by each table level
pub const INDEX_BITS: usize = 9;
/// Depth of the page-table tree (L3 is the root, L0 holds leaf entries)
pub const TABLE_LEVELS: usize = 4;

/// A physical memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// Create a new physical address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Get the raw address as u64 (for page table entries).
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Get the page frame number.
    #[inline]
    pub const fn page_frame_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Create from a page frame number.
    #[inline]
    pub const fn from_page_frame_number(pfn: usize) -> Self {
        Self(pfn << PAGE_SHIFT)
    }

    /// Add an offset to this address.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset)
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#010x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A virtual memory address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Get the raw address as u64.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Align the address up to the nearest page boundary.
    #[inline]
    pub const fn align_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Index into the table at `level` (0 = leaf table) for this address.
    #[inline]
    pub const fn table_index(self, level: usize) -> usize {
        (self.0 >> (PAGE_SHIFT + INDEX_BITS * level)) & (ENTRIES_PER_TABLE - 1)
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Add an offset to this address.
    #[inline]
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0.wrapping_add(offset))
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Bytes of virtual address space covered by one entry of a table at `level`.
#[inline]
pub const fn level_span(level: usize) -> usize {
    1 << (PAGE_SHIFT + INDEX_BITS * level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_alignment() {
        let addr = PhysAddr::new(0x10_1234);
        assert!(!addr.is_aligned());
        assert_eq!(addr.align_down().as_usize(), 0x10_1000);

        let va = VirtAddr::new(0x10_1001);
        assert_eq!(va.align_down().as_usize(), 0x10_1000);
        assert_eq!(va.align_up().as_usize(), 0x10_2000);
        assert_eq!(va.page_offset(), 1);
    }

    #[test]
    fn test_table_indices() {
        let va = VirtAddr::new(0x2F_F000);
        assert_eq!(va.table_index(1), 1);
        assert_eq!(va.table_index(0), 0xFF);

        let high = VirtAddr::new((3 << 39) | (5 << 30) | (7 << 21) | (9 << 12));
        let indices: [usize; TABLE_LEVELS] = core::array::from_fn(|i| high.table_index(3 - i));
        assert_eq!(indices, [3, 5, 7, 9]);
    }

    #[test]
    fn test_frame_numbers() {
        let pa = PhysAddr::from_page_frame_number(0x100);
        assert_eq!(pa.as_usize(), 0x10_0000);
        assert_eq!(pa.page_frame_number(), 0x100);
        assert_eq!(level_span(0), PAGE_SIZE);
        assert_eq!(level_span(1), 2 * 1024 * 1024);
    }
}
