//! Address Spaces
//!
//! A per-process page-table tree rooted at one allocated frame. Intermediate
//! tables are allocated on demand from the [`PhysicalAllocator`] and owned by
//! whoever owns the address space.
//!
//! ## Operations
//!
//! - [`AddressSpace::map`] walks/creates the chain down to the leaf table and
//!   installs one 4 KiB mapping.
//! - [`AddressSpace::lookup`] translates one virtual page.
//! - [`AddressSpace::mappings`] iterates present leaf mappings in ascending
//!   virtual address order. The walk is driven by
//!   [`AddressSpace::next_mapping`], which callers that mutate the pool
//!   between steps use directly.
//! - [`AddressSpace::duplicate_into`] builds a child's tree for fork.
//! - [`AddressSpace::clear`] / [`AddressSpace::destroy`] give every frame back.
//!
//! ## Frame accounting
//!
//! User mappings above the kernel region are accounted against the frame's
//! [`PageFrame`](super::PageFrame) record: either the space's owner owns the
//! frame, or the frame's `sharers` count includes this space. Kernel-region
//! mappings and the console page alias kernel frames and are never accounted.

use alloc::vec::Vec;

use super::address::{
    level_span, PhysAddr, VirtAddr, ENTRIES_PER_TABLE, PAGE_SIZE, TABLE_LEVELS,
};
use super::frame::{FrameOwner, PhysicalAllocator};
use super::layout::MemoryLayout;
use super::paging::{MappingError, PageTableEntry, PteFlags};

/// One present leaf mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    /// Virtual page.
    pub va: VirtAddr,
    /// Backing frame.
    pub pa: PhysAddr,
    /// Permission bits.
    pub flags: PteFlags,
}

impl Mapping {
    /// Accessible from user mode.
    #[inline]
    pub fn is_user(&self) -> bool {
        self.flags.contains(PteFlags::USER)
    }

    /// Writable.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PteFlags::WRITABLE)
    }
}

/// Handle to one page-table tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace {
    root: PhysAddr,
    owner: FrameOwner,
}

impl AddressSpace {
    /// Allocate an empty root table for `owner`.
    pub fn new(frames: &mut PhysicalAllocator, owner: FrameOwner) -> Result<Self, MappingError> {
        let root = frames.allocate_page()?;
        frames.set_owner(root, owner);
        Ok(Self { root, owner })
    }

    /// Physical frame of the root table.
    #[inline]
    pub const fn root(&self) -> PhysAddr {
        self.root
    }

    /// Owner of this space's frames.
    #[inline]
    pub const fn owner(&self) -> FrameOwner {
        self.owner
    }

    /// Map the page at `va` to `frame` with `flags`, allocating intermediate
    /// tables as needed. An existing mapping at `va` is replaced.
    ///
    /// # Errors
    /// - [`MappingError::MisalignedAddress`] if either address is unaligned.
    /// - [`MappingError::OutOfMemory`] if an intermediate table cannot be
    ///   allocated. Tables linked before the failure stay in the tree.
    pub fn map(
        &self,
        frames: &mut PhysicalAllocator,
        va: VirtAddr,
        frame: PhysAddr,
        flags: PteFlags,
    ) -> Result<(), MappingError> {
        if !va.is_aligned() || !frame.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }

        let mut table = self.root;
        for level in (1..TABLE_LEVELS).rev() {
            let index = va.table_index(level);
            let entry = frames.entry(table, index);
            table = if entry.is_present() {
                entry.addr()
            } else {
                let next = frames.allocate_page()?;
                frames.set_owner(next, self.owner);
                frames.set_entry(table, index, PageTableEntry::table(next));
                next
            };
        }

        frames.set_entry(table, va.table_index(0), PageTableEntry::page(frame, flags));
        log::trace!("[MM] map {} -> {} {:?}", va, frame, flags);
        Ok(())
    }

    /// Translate the page containing `va`.
    pub fn lookup(&self, frames: &PhysicalAllocator, va: VirtAddr) -> Option<Mapping> {
        let page = va.align_down();
        let mut table = self.root;
        for level in (1..TABLE_LEVELS).rev() {
            let entry = frames.entry(table, page.table_index(level));
            if !entry.is_present() {
                return None;
            }
            table = entry.addr();
        }

        let leaf = frames.entry(table, page.table_index(0));
        leaf.is_present().then(|| Mapping {
            va: page,
            pa: leaf.addr(),
            flags: leaf.flags(),
        })
    }

    /// First present mapping at or above `from`.
    pub fn next_mapping(&self, frames: &PhysicalAllocator, from: VirtAddr) -> Option<Mapping> {
        walk(frames, self.root, TABLE_LEVELS - 1, 0, from.align_down().as_usize())
    }

    /// Present mappings in ascending virtual address order.
    pub fn mappings<'a>(&'a self, frames: &'a PhysicalAllocator) -> Mappings<'a> {
        Mappings {
            space: self,
            frames,
            next: Some(VirtAddr::new(0)),
        }
    }

    /// Intermediate table frames below the root, children before parents.
    pub fn table_frames(&self, frames: &PhysicalAllocator) -> Vec<PhysAddr> {
        let mut out = Vec::new();
        collect_tables(frames, self.root, TABLE_LEVELS - 1, &mut out);
        out
    }

    /// Copy every mapping of this (parent) space into the empty `child`.
    ///
    /// - Kernel-region and console mappings are replicated verbatim.
    /// - Writable user pages are copied into fresh frames owned by the child.
    /// - Read-only user pages are shared: same frame, `sharers + 1`.
    ///
    /// On failure the child is cleared back to an empty root and every frame
    /// allocated or shared on its behalf is given back.
    pub fn duplicate_into(
        &self,
        frames: &mut PhysicalAllocator,
        child: &AddressSpace,
        layout: &MemoryLayout,
    ) -> Result<(), MappingError> {
        let mut cursor = Some(VirtAddr::new(0));
        while let Some(from) = cursor {
            let Some(mapping) = self.next_mapping(frames, from) else {
                break;
            };
            cursor = mapping.va.as_usize().checked_add(PAGE_SIZE).map(VirtAddr::new);

            if let Err(err) = child.inherit(frames, mapping, layout) {
                log::warn!("[MM] duplicate failed at {}: {}", mapping.va, err);
                child.clear(frames, layout);
                return Err(err);
            }
        }
        Ok(())
    }

    /// Install one parent mapping in this (child) space.
    fn inherit(
        &self,
        frames: &mut PhysicalAllocator,
        mapping: Mapping,
        layout: &MemoryLayout,
    ) -> Result<(), MappingError> {
        if !self.is_accounted(&mapping, layout) {
            return self.map(frames, mapping.va, mapping.pa, mapping.flags);
        }

        if mapping.is_writable() {
            let copy = frames.allocate_page()?;
            frames.set_owner(copy, self.owner);
            if let Err(err) = self.map(frames, mapping.va, copy, mapping.flags) {
                frames.release(copy);
                return Err(err);
            }
            frames.memory_mut().copy_page(copy, mapping.pa);
        } else {
            self.map(frames, mapping.va, mapping.pa, mapping.flags)?;
            frames.share(mapping.pa);
        }
        Ok(())
    }

    /// Whether `mapping` is counted against its frame's owner/sharers.
    #[inline]
    fn is_accounted(&self, mapping: &Mapping, layout: &MemoryLayout) -> bool {
        mapping.is_user() && !layout.is_kernel_region(mapping.va) && !layout.is_console(mapping.va)
    }

    /// Give back every accounted page and every intermediate table, leaving
    /// an empty root.
    ///
    /// Exclusively held pages return to the pool; shared ones lose a sharer.
    pub fn clear(&self, frames: &mut PhysicalAllocator, layout: &MemoryLayout) {
        let mut cursor = Some(VirtAddr::new(0));
        while let Some(from) = cursor {
            let Some(mapping) = self.next_mapping(frames, from) else {
                break;
            };
            cursor = mapping.va.as_usize().checked_add(PAGE_SIZE).map(VirtAddr::new);

            if !self.is_accounted(&mapping, layout) {
                continue;
            }
            if frames.frame(mapping.pa).sharers > 0 {
                frames.unshare(mapping.pa);
            } else {
                frames.release(mapping.pa);
            }
        }

        for table in self.table_frames(frames) {
            frames.release(table);
        }
        frames.memory_mut().zero_page(self.root);
    }

    /// [`clear`](Self::clear) and release the root table.
    pub fn destroy(self, frames: &mut PhysicalAllocator, layout: &MemoryLayout) {
        self.clear(frames, layout);
        frames.release(self.root);
    }

    /// Copy bytes starting at `va` out of user-accessible pages, stopping at
    /// the first unmapped or kernel-only page.
    pub fn read_user(&self, frames: &PhysicalAllocator, va: VirtAddr, buf: &mut [u8]) -> usize {
        let mut done = 0;
        while done < buf.len() {
            let at = va.add(done);
            let Some(mapping) = self.lookup(frames, at) else {
                break;
            };
            if !mapping.is_user() {
                break;
            }
            let offset = at.page_offset();
            let len = (PAGE_SIZE - offset).min(buf.len() - done);
            let page = frames.memory().page(mapping.pa);
            buf[done..done + len].copy_from_slice(&page[offset..offset + len]);
            done += len;
        }
        done
    }
}

/// Depth-first search for the first present leaf at or above `start` in the
/// table at `level` covering addresses from `base`.
fn walk(
    frames: &PhysicalAllocator,
    table: PhysAddr,
    level: usize,
    base: usize,
    start: usize,
) -> Option<Mapping> {
    let span = level_span(level);
    let first = start.saturating_sub(base) / span;

    for index in first..ENTRIES_PER_TABLE {
        let entry = frames.entry(table, index);
        if !entry.is_present() {
            continue;
        }
        let va = base + index * span;
        if level == 0 {
            return Some(Mapping {
                va: VirtAddr::new(va),
                pa: entry.addr(),
                flags: entry.flags(),
            });
        }
        if let Some(found) = walk(frames, entry.addr(), level - 1, va, start.max(va)) {
            return Some(found);
        }
    }
    None
}

fn collect_tables(
    frames: &PhysicalAllocator,
    table: PhysAddr,
    level: usize,
    out: &mut Vec<PhysAddr>,
) {
    if level == 0 {
        return;
    }
    for index in 0..ENTRIES_PER_TABLE {
        let entry = frames.entry(table, index);
        if entry.is_present() {
            collect_tables(frames, entry.addr(), level - 1, out);
            out.push(entry.addr());
        }
    }
}

/// Lazy, restartable iterator over the present mappings of an
/// [`AddressSpace`].
pub struct Mappings<'a> {
    space: &'a AddressSpace,
    frames: &'a PhysicalAllocator,
    next: Option<VirtAddr>,
}

impl Mappings<'_> {
    /// Continue the walk from `va` instead.
    pub fn seek(&mut self, va: VirtAddr) {
        self.next = Some(va);
    }
}

impl Iterator for Mappings<'_> {
    type Item = Mapping;

    fn next(&mut self) -> Option<Mapping> {
        let from = self.next?;
        let found = self.space.next_mapping(self.frames, from);
        self.next = found.and_then(|m| m.va.as_usize().checked_add(PAGE_SIZE).map(VirtAddr::new));
        found
    }
}
