//! External collaborator interfaces
//!
//! The paging core does not encode page table entries, drive disks or
//! implement a filesystem. It talks to those subsystems through the
//! traits in this module: an opaque per-process hardware translation
//! table, a sector-granular block device backing the swap store, a file
//! object backing mmap regions, and a pool of physical page frames.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::addr::{PAGE_SIZE, VirtAddr};
use crate::error::Result;

/// One page of physical memory, addressable by the kernel.
///
/// The pool hands these out as owned values; the frame table keeps one
/// per registered frame. The buffer's address is stable for its
/// lifetime and serves as the frame's kernel address.
pub struct PageBuf {
    data: Box<[u8; PAGE_SIZE]>,
}

impl PageBuf {
    /// Allocates a zero-filled page buffer.
    pub fn zeroed() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
        }
    }

    /// The kernel address of this page's memory.
    pub fn addr(&self) -> usize {
        self.data.as_ptr() as usize
    }

    /// Read access to the page contents.
    pub fn as_slice(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Write access to the page contents.
    pub fn as_mut_slice(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

/// Pool of physical page frames.
///
/// `allocate` may block while the underlying pool manager blocks; it
/// returns `None` on exhaustion, which is the frame table's cue to
/// evict.
pub trait FramePool: Send + Sync {
    /// Takes one page of physical memory out of the pool, or `None` if
    /// the pool is exhausted.
    fn allocate(&self) -> Option<PageBuf>;

    /// Returns a page of physical memory to the pool.
    fn release(&self, buf: PageBuf);
}

/// Per-process hardware translation table.
///
/// Implementations carry their own interior mutability; every method
/// takes `&self` so a table can be shared between the fault path and
/// the eviction scan.
pub trait TranslationTable: Send + Sync {
    /// Installs a mapping from `va` to the physical frame at `pa`.
    fn map(&self, va: VirtAddr, pa: usize, writable: bool);

    /// Removes any mapping for `va`.
    fn clear(&self, va: VirtAddr);

    /// Queries the hardware accessed bit for `va`.
    fn is_accessed(&self, va: VirtAddr) -> bool;

    /// Sets or clears the hardware accessed bit for `va`.
    fn set_accessed(&self, va: VirtAddr, accessed: bool);

    /// Queries the hardware dirty bit for `va`.
    fn is_dirty(&self, va: VirtAddr) -> bool;

    /// Sets or clears the hardware dirty bit for `va`.
    fn set_dirty(&self, va: VirtAddr, dirty: bool);
}

/// Fixed-sector block device backing the swap store.
///
/// The device serializes concurrent sector access itself; callers only
/// guard their own bookkeeping.
pub trait BlockDevice: Send + Sync {
    /// Total number of sectors on the device.
    fn sector_count(&self) -> usize;

    /// Reads one sector into `buf` (`buf.len() == SECTOR_SIZE`).
    fn read_sector(&self, index: usize, buf: &mut [u8]) -> Result<()>;

    /// Writes one sector from `buf` (`buf.len() == SECTOR_SIZE`).
    fn write_sector(&self, index: usize, buf: &[u8]) -> Result<()>;
}

/// File object backing a memory mapping.
pub trait VmFile: Send + Sync {
    /// Reads up to `buf.len()` bytes at `offset`, returning the number
    /// of bytes read (short at end of file).
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize>;

    /// Writes `buf` at `offset`, returning the number of bytes written.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize>;

    /// Current length of the file in bytes.
    fn len(&self) -> u64;

    /// Whether the file is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Obtains an independent handle to the same underlying file, so
    /// closing or unmapping one mapping never affects another.
    fn reopen(&self) -> Result<Arc<dyn VmFile>>;
}
