//! Address types and page geometry

use static_assertions::const_assert;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;
/// Block device sector size
pub const SECTOR_SIZE: usize = 512;
/// Number of sectors transferred per page of swap traffic
pub const SECTORS_PER_PAGE: usize = PAGE_SIZE / SECTOR_SIZE;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(PAGE_SIZE % SECTOR_SIZE == 0);
const_assert!(PAGE_SIZE == 1 << PAGE_SHIFT);

/// Align address down to page boundary
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// A virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Creates a new virtual address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the virtual address as a raw usize value.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the offset within the current page.
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Returns the page number for this virtual address.
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Checks if the virtual address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Rounds down the virtual address to the previous page boundary.
    pub const fn page_round_down(self) -> Self {
        Self(page_round_down(self.0))
    }

    /// Rounds up the virtual address to the next page boundary.
    pub const fn page_round_up(self) -> Self {
        Self(page_round_up(self.0))
    }

    /// Returns the address `pages` pages after this one.
    pub const fn add_pages(self, pages: usize) -> Self {
        Self(self.0 + pages * PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(page_round_down(0x1234), 0x1000);
        assert_eq!(page_round_down(0x1000), 0x1000);
        assert_eq!(page_round_up(0x1001), 0x2000);
        assert_eq!(page_round_up(0x1000), 0x1000);
    }

    #[test]
    fn test_virt_addr() {
        let va = VirtAddr::new(0x4032_1abc);
        assert_eq!(va.page_offset(), 0xabc);
        assert!(!va.is_page_aligned());
        assert_eq!(va.page_round_down(), VirtAddr::new(0x4032_1000));
        assert_eq!(va.page_round_down().add_pages(2), VirtAddr::new(0x4032_3000));
        assert_eq!(va.page_number(), 0x40321);
    }
}
