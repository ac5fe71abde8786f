//! Physical Memory Backing Store
//!
//! Byte-addressable stand-in for machine RAM. Page tables live inside it as
//! little-endian 8-byte entries, exactly as the MMU would read them.

use alloc::vec;
use alloc::vec::Vec;

use super::address::{PhysAddr, ENTRIES_PER_TABLE, PAGE_SIZE};
use super::paging::PageTableEntry;

/// Contiguous physical memory, indexed by physical address.
pub struct PhysicalMemory {
    bytes: Vec<u8>,
}

impl PhysicalMemory {
    /// Allocate `size` bytes of zeroed memory.
    pub fn new(size: usize) -> Self {
        Self { bytes: vec![0; size] }
    }

    /// Total size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// The page starting at `frame`.
    ///
    /// # Panics
    /// Panics if `frame` is unaligned or outside memory.
    pub fn page(&self, frame: PhysAddr) -> &[u8] {
        assert!(frame.is_aligned(), "unaligned frame {}", frame);
        let start = frame.as_usize();
        &self.bytes[start..start + PAGE_SIZE]
    }

    /// Mutable view of the page starting at `frame`.
    pub fn page_mut(&mut self, frame: PhysAddr) -> &mut [u8] {
        assert!(frame.is_aligned(), "unaligned frame {}", frame);
        let start = frame.as_usize();
        &mut self.bytes[start..start + PAGE_SIZE]
    }

    /// Fill a page with zeros.
    #[inline]
    pub fn zero_page(&mut self, frame: PhysAddr) {
        self.page_mut(frame).fill(0);
    }

    /// Copy the whole page at `src` over the page at `dst`.
    pub fn copy_page(&mut self, dst: PhysAddr, src: PhysAddr) {
        assert!(dst.is_aligned() && src.is_aligned());
        let src = src.as_usize();
        self.bytes
            .copy_within(src..src + PAGE_SIZE, dst.as_usize());
    }

    /// Read entry `index` of the page table stored at `table`.
    pub fn entry(&self, table: PhysAddr, index: usize) -> PageTableEntry {
        debug_assert!(index < ENTRIES_PER_TABLE);
        let offset = table.as_usize() + index * 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[offset..offset + 8]);
        PageTableEntry::from_u64(u64::from_le_bytes(raw))
    }

    /// Store entry `index` of the page table stored at `table`.
    pub fn set_entry(&mut self, table: PhysAddr, index: usize, entry: PageTableEntry) {
        debug_assert!(index < ENTRIES_PER_TABLE);
        let offset = table.as_usize() + index * 8;
        self.bytes[offset..offset + 8].copy_from_slice(&entry.as_u64().to_le_bytes());
    }
}

impl core::fmt::Debug for PhysicalMemory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PhysicalMemory({:#x} bytes)", self.bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::paging::PteFlags;

    #[test]
    fn entries_round_trip_through_bytes() {
        let mut mem = PhysicalMemory::new(4 * PAGE_SIZE);
        let table = PhysAddr::new(PAGE_SIZE);
        let entry = PageTableEntry::page(PhysAddr::new(3 * PAGE_SIZE), PteFlags::USER_DATA);

        mem.set_entry(table, 7, entry);
        assert_eq!(mem.entry(table, 7), entry);
        assert!(!mem.entry(table, 6).is_present());
        assert_eq!(mem.page(table)[7 * 8], entry.as_u64() as u8);
    }

    #[test]
    fn copy_and_zero_pages() {
        let mut mem = PhysicalMemory::new(3 * PAGE_SIZE);
        let a = PhysAddr::new(PAGE_SIZE);
        let b = PhysAddr::new(2 * PAGE_SIZE);
        mem.page_mut(a)[..4].copy_from_slice(b"abcd");

        mem.copy_page(b, a);
        assert_eq!(&mem.page(b)[..4], b"abcd");

        mem.zero_page(a);
        assert!(mem.page(a).iter().all(|&byte| byte == 0));
        assert_eq!(&mem.page(b)[..4], b"abcd");
    }
}
