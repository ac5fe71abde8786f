//! System Call Input Validation
//!
//! Arguments are checked against the memory layout before the kernel acts
//! on them; a rejected argument leaves all kernel state untouched.

use super::SyscallError;
use crate::mm::{MemoryLayout, VirtAddr};

/// Validate the target of `page_alloc(addr)`.
///
/// # Security Checks
/// 1. Strictly above the process-visible boundary (kernel region and the
///    first process page are off limits)
/// 2. Page-aligned
/// 3. Inside the process address space
pub fn validate_page_alloc(addr: u64, layout: &MemoryLayout) -> Result<VirtAddr, SyscallError> {
    let addr = usize::try_from(addr).map_err(|_| SyscallError::BadAddress)?;

    if addr <= layout.proc_start {
        return Err(SyscallError::BadAddress);
    }

    let va = VirtAddr::new(addr);
    if !va.is_aligned() || addr >= layout.virtual_size {
        return Err(SyscallError::BadAddress);
    }

    Ok(va)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LAYOUT: MemoryLayout = MemoryLayout::DEFAULT;

    #[test]
    fn test_reserved_region() {
        assert!(validate_page_alloc(0, &LAYOUT).is_err());
        assert!(validate_page_alloc(0xB_8000, &LAYOUT).is_err());
        assert!(validate_page_alloc(0x10_0000, &LAYOUT).is_err());
    }

    #[test]
    fn test_alignment_and_range() {
        assert!(validate_page_alloc(0x10_1001, &LAYOUT).is_err());
        assert!(validate_page_alloc(0x30_0000, &LAYOUT).is_err());
        assert!(validate_page_alloc(u64::MAX, &LAYOUT).is_err());
    }

    #[test]
    fn test_valid_target() {
        assert_eq!(validate_page_alloc(0x10_1000, &LAYOUT), Ok(VirtAddr::new(0x10_1000)));
        assert_eq!(validate_page_alloc(0x2F_F000, &LAYOUT), Ok(VirtAddr::new(0x2F_F000)));
    }
}
