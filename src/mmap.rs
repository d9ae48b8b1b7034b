//! Memory-mapped files
//!
//! An mmap range is a contiguous run of lazily loaded file-backed
//! pages. The range itself is not stored anywhere: the first page
//! records the total page count, and unmap walks that many page-size
//! strides. Each mapping holds its own reopened file handle, so
//! closing or unmapping one mapping never affects another mapping of
//! the same file.

use alloc::string::ToString;
use alloc::sync::Arc;

use crate::addr::{PAGE_SIZE, VirtAddr};
use crate::error::{Result, VmError};
use crate::hal::VmFile;
use crate::page::{FileSlice, PageFlags, TargetKind};
use crate::spt::AddressSpace;
use crate::vm::Vm;

impl Vm {
    /// Maps `length` bytes of `file` starting at `offset` into the
    /// address space at `addr`, lazily: pages materialize on first
    /// fault. Requires `addr` and `offset` page-aligned. Returns the
    /// mapping address.
    ///
    /// On failure partway through the walk, pages already created are
    /// not rolled back; the caller sees the error and tears the space
    /// down on its usual path.
    pub fn mmap(
        &self,
        space: &AddressSpace,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &Arc<dyn VmFile>,
        offset: u64,
    ) -> Result<VirtAddr> {
        if addr.as_usize() == 0 || !addr.is_page_aligned() {
            return Err(VmError::InvalidArgument("mmap address not page-aligned".to_string()));
        }
        if offset % PAGE_SIZE as u64 != 0 {
            return Err(VmError::InvalidArgument("mmap offset not page-aligned".to_string()));
        }
        if length == 0 {
            return Err(VmError::InvalidArgument("mmap length is zero".to_string()));
        }

        // Mapping-private handle, independent of the caller's.
        let handle = file.reopen()?;

        let total_pages = if length <= PAGE_SIZE {
            1
        } else {
            length.div_ceil(PAGE_SIZE)
        };
        // Read the smaller of the file and the requested window; the
        // remainder of the last page is zero padding.
        let mut remaining = core::cmp::min(handle.len() as usize, length);

        let flags = if writable {
            PageFlags::WRITABLE
        } else {
            PageFlags::empty()
        };

        let mut va = addr;
        let mut off = offset;
        for _ in 0..total_pages {
            let read_len = remaining.min(PAGE_SIZE);
            let slice = FileSlice {
                file: handle.clone(),
                offset: off,
                read_len,
                zero_len: PAGE_SIZE - read_len,
            };
            if !self.alloc_page_with_initializer(space, TargetKind::File, va, flags, None, Some(slice)) {
                return Err(VmError::AlreadyMapped(va));
            }
            remaining -= read_len;
            off += read_len as u64;
            va = va.add_pages(1);
        }

        // Only the first page records the extent of the mapping.
        if let Some(first) = space.spt().find(addr) {
            first.lock().mapped_page_count = Some(total_pages);
        }
        log::debug!(
            "mmap {:#x}: {} pages of {} bytes",
            addr.as_usize(),
            total_pages,
            length
        );
        Ok(addr)
    }

    /// Unmaps the range starting at `addr`: flushes dirty pages back to
    /// the file and removes every page of the range from the address
    /// space.
    pub fn munmap(&self, space: &AddressSpace, addr: VirtAddr) -> Result<()> {
        let first = space
            .spt()
            .find(addr)
            .ok_or(VmError::NotMapped(addr.page_round_down()))?;
        let count = {
            let page = first.lock();
            page.mapped_page_count.ok_or_else(|| {
                VmError::InvalidArgument("munmap address is not the start of a mapping".to_string())
            })?
        };
        log::debug!("munmap {:#x}: {} pages", addr.as_usize(), count);
        let mut va = addr.page_round_down();
        for _ in 0..count {
            if space.spt().find(va).is_some() {
                self.remove_page(space, va)?;
            }
            va = va.add_pages(1);
        }
        Ok(())
    }
}
