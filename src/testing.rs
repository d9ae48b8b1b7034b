//! Software reference implementations of the collaborator traits
//!
//! A counting frame pool, a software translation table, a RAM-backed
//! block device and a vec-backed file. These back the test suites and
//! benches, and serve as the model for real implementations of the
//! `hal` traits.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::Mutex;

use crate::addr::{SECTOR_SIZE, VirtAddr};
use crate::error::{Result, VmError};
use crate::hal::{BlockDevice, FramePool, PageBuf, TranslationTable, VmFile};

/// Frame pool with a fixed capacity of page frames.
pub struct CountingFramePool {
    available: Mutex<usize>,
}

impl CountingFramePool {
    /// Creates a pool holding `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            available: Mutex::new(capacity),
        }
    }

    /// Frames currently left in the pool.
    pub fn available(&self) -> usize {
        *self.available.lock()
    }
}

impl FramePool for CountingFramePool {
    fn allocate(&self) -> Option<PageBuf> {
        let mut available = self.available.lock();
        if *available == 0 {
            return None;
        }
        *available -= 1;
        Some(PageBuf::zeroed())
    }

    fn release(&self, buf: PageBuf) {
        *self.available.lock() += 1;
        drop(buf);
    }
}

#[derive(Clone, Copy)]
struct SoftMapping {
    pa: usize,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// Software translation table: a map from virtual page address to a
/// mapping record with accessed/dirty bits.
pub struct SoftTranslationTable {
    entries: Mutex<HashMap<VirtAddr, SoftMapping>>,
}

impl SoftTranslationTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Whether a mapping for `va` is installed.
    pub fn is_mapped(&self, va: VirtAddr) -> bool {
        self.entries.lock().contains_key(&va)
    }

    /// The physical address `va` maps to, if mapped.
    pub fn mapping(&self, va: VirtAddr) -> Option<usize> {
        self.entries.lock().get(&va).map(|m| m.pa)
    }

    /// Whether the mapping for `va` is writable.
    pub fn is_writable(&self, va: VirtAddr) -> bool {
        self.entries.lock().get(&va).map(|m| m.writable).unwrap_or(false)
    }
}

impl Default for SoftTranslationTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TranslationTable for SoftTranslationTable {
    fn map(&self, va: VirtAddr, pa: usize, writable: bool) {
        self.entries.lock().insert(
            va,
            SoftMapping {
                pa,
                writable,
                accessed: false,
                dirty: false,
            },
        );
    }

    fn clear(&self, va: VirtAddr) {
        self.entries.lock().remove(&va);
    }

    fn is_accessed(&self, va: VirtAddr) -> bool {
        self.entries.lock().get(&va).map(|m| m.accessed).unwrap_or(false)
    }

    fn set_accessed(&self, va: VirtAddr, accessed: bool) {
        if let Some(mapping) = self.entries.lock().get_mut(&va) {
            mapping.accessed = accessed;
        }
    }

    fn is_dirty(&self, va: VirtAddr) -> bool {
        self.entries.lock().get(&va).map(|m| m.dirty).unwrap_or(false)
    }

    fn set_dirty(&self, va: VirtAddr, dirty: bool) {
        if let Some(mapping) = self.entries.lock().get_mut(&va) {
            mapping.dirty = dirty;
        }
    }
}

/// RAM-backed block device with fixed-size sectors.
pub struct RamDisk {
    sectors: Mutex<Vec<u8>>,
    sector_count: usize,
}

impl RamDisk {
    /// Creates a zero-filled disk of `sector_count` sectors.
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![0u8; sector_count * SECTOR_SIZE]),
            sector_count,
        }
    }
}

impl BlockDevice for RamDisk {
    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read_sector(&self, index: usize, buf: &mut [u8]) -> Result<()> {
        if index >= self.sector_count {
            return Err(VmError::Io("sector index out of range".into()));
        }
        let sectors = self.sectors.lock();
        buf.copy_from_slice(&sectors[index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&self, index: usize, buf: &[u8]) -> Result<()> {
        if index >= self.sector_count {
            return Err(VmError::Io("sector index out of range".into()));
        }
        let mut sectors = self.sectors.lock();
        sectors[index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }
}

/// Vec-backed file. `reopen` hands out a new handle over the same
/// shared contents, mirroring independent descriptors on one inode.
pub struct RamFile {
    data: Arc<Mutex<Vec<u8>>>,
}

impl RamFile {
    /// Creates a file with the given contents.
    pub fn new(contents: Vec<u8>) -> Self {
        Self {
            data: Arc::new(Mutex::new(contents)),
        }
    }

    /// A copy of the file's current contents.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl VmFile for RamFile {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize> {
        let data = self.data.lock();
        let offset = offset as usize;
        if offset >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize> {
        let mut data = self.data.lock();
        let offset = offset as usize;
        let end = offset + buf.len();
        if end > data.len() {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn reopen(&self) -> Result<Arc<dyn VmFile>> {
        Ok(Arc::new(RamFile {
            data: self.data.clone(),
        }))
    }
}

/// Builds a detached anonymous page handle for frame table tests.
#[cfg(test)]
pub(crate) fn anon_page_ref(va: usize) -> crate::page::PageRef {
    use crate::page::{Page, PageFlags, TargetKind};
    let table: Arc<dyn TranslationTable> = Arc::new(SoftTranslationTable::new());
    let mut page = Page::new_uninit(
        VirtAddr::new(va),
        PageFlags::WRITABLE,
        TargetKind::Anon,
        None,
        None,
        table,
    );
    let _ = page.attach_backing();
    Arc::new(Mutex::new(page))
}
