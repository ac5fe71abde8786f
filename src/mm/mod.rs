//! Memory management
//!
//! Provides:
//! - Physical frame allocation with owner/sharer accounting
//! - 4-level page tables stored in physical frames
//! - Per-process address spaces with fork-time duplication
//!
//! # Invariants
//! - A free frame has no sharers; only such frames return to the pool
//! - Every accounted user mapping is reflected in its frame's owner or sharers
//! - A virtual page maps to at most one frame in a given address space

mod address;
mod address_space;
mod frame;
mod layout;
mod memory;
mod paging;

pub use address::{PhysAddr, VirtAddr, ENTRIES_PER_TABLE, PAGE_SIZE, TABLE_LEVELS};
pub use address_space::{AddressSpace, Mapping, Mappings};
pub use frame::{FrameOwner, PageFrame, PhysicalAllocator};
pub use layout::MemoryLayout;
pub use memory::PhysicalMemory;
pub use paging::{MappingError, PageTableEntry, PteFlags};
