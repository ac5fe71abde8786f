//! Page Table Entries
//!
//! x86-64 style 4-level tables: each table is one 4 KiB frame holding 512
//! eight-byte entries. Only the present/writable/user permission bits are
//! interpreted; intermediate entries always carry all three so that the leaf
//! alone decides what a process may do.

use bitflags::bitflags;

use super::address::PhysAddr;

bitflags! {
    /// Permission bits of a page table entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PteFlags: u64 {
        /// Entry is valid.
        const PRESENT = 1 << 0;
        /// Writes are permitted.
        const WRITABLE = 1 << 1;
        /// Accessible from user mode.
        const USER = 1 << 2;

        /// Kernel-only read/write mapping.
        const KERNEL_DATA = Self::PRESENT.bits() | Self::WRITABLE.bits();
        /// User read-only mapping (code, rodata).
        const USER_CODE = Self::PRESENT.bits() | Self::USER.bits();
        /// User read/write mapping (data, heap, stack).
        const USER_DATA = Self::PRESENT.bits() | Self::WRITABLE.bits() | Self::USER.bits();
        /// Link to a next-level table.
        const TABLE = Self::USER_DATA.bits();
    }
}

/// A single page table entry.
///
/// Either points to a next-level table or maps a physical frame.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// Address mask for page table entries (bits [51:12]).
    const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

    /// Create an invalid (empty) entry.
    #[inline]
    pub const fn invalid() -> Self {
        Self(0)
    }

    /// Reinterpret raw bits loaded from a table frame.
    #[inline]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    /// Create a table entry pointing to the next level page table.
    #[inline]
    pub const fn table(next_table: PhysAddr) -> Self {
        debug_assert!(next_table.is_aligned());
        Self((next_table.as_u64() & Self::ADDR_MASK) | PteFlags::TABLE.bits())
    }

    /// Create a page entry mapping a physical frame.
    #[inline]
    pub const fn page(frame: PhysAddr, flags: PteFlags) -> Self {
        debug_assert!(frame.is_aligned());
        Self((frame.as_u64() & Self::ADDR_MASK) | flags.bits())
    }

    /// Check if the entry is valid (present).
    #[inline]
    pub const fn is_present(self) -> bool {
        self.0 & PteFlags::PRESENT.bits() != 0
    }

    /// Get the physical address from this entry.
    #[inline]
    pub const fn addr(self) -> PhysAddr {
        PhysAddr::new((self.0 & Self::ADDR_MASK) as usize)
    }

    /// Get the flags from this entry.
    #[inline]
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & !Self::ADDR_MASK)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl core::fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        if self.is_present() {
            write!(f, "PTE(addr={}, flags={:?})", self.addr(), self.flags())
        } else {
            write!(f, "PTE(invalid)")
        }
    }
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// No physical frames available for a page or page table.
    OutOfMemory,
    /// The address is not properly aligned.
    MisalignedAddress,
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of physical memory"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
        }
    }
}
