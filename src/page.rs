//! Virtual pages and their variant backends
//!
//! A [`Page`] is one process-owned virtual memory unit. Its backing
//! starts out [`PageBacking::Uninit`] and transitions to anonymous or
//! file-backed on the first fault that touches it. The three variants
//! share one four-operation contract (initialize, swap in, swap out,
//! destroy) so the fault resolver and the frame table stay
//! variant-agnostic.
//!
//! Invariant: a page has content in at most one of its frame, its swap
//! slot, or its not-yet-loaded backing file; an uninitialized page has
//! no frame.

use alloc::string::ToString;
use alloc::sync::Arc;

use bitflags::bitflags;
use spin::Mutex;

use crate::addr::{PAGE_SIZE, VirtAddr};
use crate::error::{Result, VmError};
use crate::frame::FrameId;
use crate::hal::{TranslationTable, VmFile};
use crate::swap::SwapStore;

bitflags! {
    /// Per-page flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// Write faults on this page are permitted
        const WRITABLE = 1 << 0;
        /// Page was created by stack growth rather than by an ordinary
        /// data/heap allocation
        const STACK = 1 << 1;
    }
}

/// The kind a page will have after first-touch initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// Anonymous memory, persisted to swap on eviction
    Anon,
    /// File-backed memory, written back to its file on eviction
    File,
}

/// Optional content initializer run once on first touch, after the
/// backend's own load. Receives the frame contents and the page's
/// lazy-load descriptor, if any.
pub type PageInitFn = Arc<dyn Fn(&mut [u8], Option<&FileSlice>) -> bool + Send + Sync>;

/// Lazy-load descriptor for one page of a file mapping.
#[derive(Clone)]
pub struct FileSlice {
    /// Mapping-private handle to the backing file
    pub file: Arc<dyn VmFile>,
    /// Byte offset of this page's window into the file
    pub offset: u64,
    /// Bytes read from the file into the page
    pub read_len: usize,
    /// Zero-filled bytes padding the remainder of the page
    pub zero_len: usize,
}

impl FileSlice {
    /// Loads this slice into `buf`: `read_len` bytes from the file,
    /// the rest zero-filled.
    pub(crate) fn load(&self, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        let n = self.file.read_at(&mut buf[..self.read_len], self.offset)?;
        if n != self.read_len {
            return Err(VmError::Io("short read from backing file".to_string()));
        }
        buf[self.read_len..].fill(0);
        Ok(())
    }

    /// Writes the read window of `buf` back to the file.
    pub(crate) fn write_back(&self, buf: &[u8]) -> Result<()> {
        let n = self.file.write_at(&buf[..self.read_len], self.offset)?;
        if n != self.read_len {
            return Err(VmError::Io("short write to backing file".to_string()));
        }
        Ok(())
    }
}

/// Variant-specific backing state.
pub enum PageBacking {
    /// Allocated but never touched; materializes into `target` on the
    /// first fault.
    Uninit {
        /// Kind this page becomes on first touch
        target: TargetKind,
        /// Optional caller-supplied content initializer
        init: Option<PageInitFn>,
        /// Lazy-load descriptor, consumed by file-backed initialization
        aux: Option<FileSlice>,
    },
    /// Anonymous memory; `slot` is set while the contents live in swap.
    Anon {
        /// Occupied swap slot, if the page is currently swapped out
        slot: Option<crate::swap::SlotId>,
    },
    /// File-backed memory from an mmap range.
    File {
        /// Window of the backing file this page mirrors
        slice: FileSlice,
    },
}

/// A process's virtual memory unit.
pub struct Page {
    va: VirtAddr,
    flags: PageFlags,
    backing: PageBacking,
    /// Frame currently holding this page's content, if resident
    pub(crate) frame: Option<FrameId>,
    /// Set only on the first page of an mmap range: total pages mapped
    pub(crate) mapped_page_count: Option<usize>,
    /// The owning process's hardware translation table
    table: Arc<dyn TranslationTable>,
}

/// Shared handle to a page. The mutex serializes concurrent claims on
/// the same page, which the faulting path otherwise would not.
pub type PageRef = Arc<Mutex<Page>>;

impl Page {
    /// Creates an uninitialized page pending its first touch.
    pub fn new_uninit(
        va: VirtAddr,
        flags: PageFlags,
        target: TargetKind,
        init: Option<PageInitFn>,
        aux: Option<FileSlice>,
        table: Arc<dyn TranslationTable>,
    ) -> Self {
        Self {
            va,
            flags,
            backing: PageBacking::Uninit { target, init, aux },
            frame: None,
            mapped_page_count: None,
            table,
        }
    }

    /// The page-aligned virtual address keying this page.
    pub fn va(&self) -> VirtAddr {
        self.va
    }

    /// The page's flag bits.
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Whether write faults on this page are permitted.
    pub fn writable(&self) -> bool {
        self.flags.contains(PageFlags::WRITABLE)
    }

    /// Whether this page currently occupies a frame.
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// The frame currently holding this page's content, if resident.
    pub fn frame_id(&self) -> Option<FrameId> {
        self.frame
    }

    /// The kind this page has, or will have once initialized.
    pub fn target_kind(&self) -> TargetKind {
        match &self.backing {
            PageBacking::Uninit { target, .. } => *target,
            PageBacking::Anon { .. } => TargetKind::Anon,
            PageBacking::File { .. } => TargetKind::File,
        }
    }

    /// Whether the page is still pending first-touch initialization.
    pub fn is_uninit(&self) -> bool {
        matches!(self.backing, PageBacking::Uninit { .. })
    }

    /// Read access to the backing variant.
    pub fn backing(&self) -> &PageBacking {
        &self.backing
    }

    /// The owning process's translation table.
    pub(crate) fn table(&self) -> &Arc<dyn TranslationTable> {
        &self.table
    }

    /// Attaches variant-specific state to a pending page, replacing the
    /// `Uninit` backing with its target variant. The anonymous variant
    /// starts with no slot; the file variant takes over the lazy-load
    /// descriptor. Returns the initializer and descriptor for the
    /// caller to drive the first-touch load.
    ///
    /// Fails only if a file-backed page was allocated without a
    /// descriptor.
    pub(crate) fn attach_backing(&mut self) -> Result<(Option<PageInitFn>, Option<FileSlice>)> {
        match &self.backing {
            PageBacking::Uninit { target: TargetKind::File, aux: None, .. } => {
                return Err(VmError::InvalidArgument(
                    "file-backed page without lazy-load descriptor".to_string(),
                ));
            }
            PageBacking::Uninit { .. } => {}
            // Already initialized; nothing to do.
            _ => return Ok((None, None)),
        }
        let PageBacking::Uninit { target, init, aux } = core::mem::replace(
            &mut self.backing,
            PageBacking::Anon { slot: None },
        ) else {
            unreachable!()
        };
        if target == TargetKind::File {
            // Checked above: the descriptor is present.
            if let Some(slice) = aux.clone() {
                self.backing = PageBacking::File { slice };
            }
        }
        Ok((init, aux))
    }

    /// Restores or materializes this page's content into `buf`, the
    /// contents of its freshly linked frame.
    ///
    /// - Uninitialized: attach the target variant, then perform the
    ///   first-touch load (zero fill for anonymous, file read plus zero
    ///   padding for file-backed) and run the caller initializer.
    /// - Anonymous: read the recorded swap slot, free it and clear the
    ///   record; fails if no occupied slot matches.
    /// - File-backed: identical to first-touch lazy loading.
    pub(crate) fn swap_in(&mut self, swap: &SwapStore, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        if self.is_uninit() {
            let (init, aux) = self.attach_backing()?;
            match &self.backing {
                PageBacking::Anon { .. } => buf.fill(0),
                PageBacking::File { slice } => slice.load(buf)?,
                PageBacking::Uninit { .. } => unreachable!(),
            }
            if let Some(init) = init {
                if !init(buf, aux.as_ref()) {
                    return Err(VmError::Io("page initializer failed".to_string()));
                }
            }
            return Ok(());
        }
        match &mut self.backing {
            PageBacking::Anon { slot } => {
                let id = slot.ok_or(VmError::SwapSlotMissing)?;
                swap.read(id, buf)?;
                swap.free(id);
                *slot = None;
                Ok(())
            }
            PageBacking::File { slice } => slice.load(buf),
            PageBacking::Uninit { .. } => unreachable!(),
        }
    }

    /// Evicts this page's content out of its current frame, whose
    /// contents are `buf`. On success the page's side of the frame
    /// link is detached and the hardware mapping invalidated; on
    /// failure the page is left untouched, still resident.
    ///
    /// Anonymous pages take the first free swap slot; exhaustion is
    /// fatal. File-backed pages write back only when the hardware dirty
    /// bit is set, since the file itself is the backing store.
    pub(crate) fn swap_out(&mut self, swap: &SwapStore, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), PAGE_SIZE);
        match &mut self.backing {
            PageBacking::Anon { slot } => {
                let id = swap.allocate().ok_or(VmError::SwapExhausted)?;
                if let Err(e) = swap.write(id, buf) {
                    swap.free(id);
                    return Err(e);
                }
                *slot = Some(id);
            }
            PageBacking::File { slice } => {
                if self.table.is_dirty(self.va) {
                    slice.write_back(buf)?;
                    self.table.set_dirty(self.va, false);
                }
            }
            PageBacking::Uninit { .. } => {
                debug_assert!(false, "uninitialized page cannot be resident");
            }
        }
        self.frame = None;
        self.table.clear(self.va);
        Ok(())
    }

    /// Releases variant-held resources. The frame, if any, is released
    /// by the caller; `buf` carries its contents when the page is still
    /// resident so dirty file-backed content can be flushed.
    pub(crate) fn destroy(&mut self, swap: &SwapStore, buf: Option<&[u8]>) -> Result<()> {
        match &mut self.backing {
            PageBacking::Anon { slot } => {
                if let Some(id) = slot.take() {
                    swap.free(id);
                }
            }
            PageBacking::File { slice } => {
                if self.table.is_dirty(self.va)
                    && let Some(buf) = buf
                {
                    slice.write_back(buf)?;
                    self.table.set_dirty(self.va, false);
                }
                self.table.clear(self.va);
            }
            PageBacking::Uninit { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::SoftTranslationTable;

    fn table() -> Arc<dyn TranslationTable> {
        Arc::new(SoftTranslationTable::new())
    }

    #[test]
    fn test_uninit_reports_target_kind() {
        let page = Page::new_uninit(
            VirtAddr::new(0x40_0000),
            PageFlags::WRITABLE,
            TargetKind::Anon,
            None,
            None,
            table(),
        );
        assert!(page.is_uninit());
        assert_eq!(page.target_kind(), TargetKind::Anon);
        assert!(!page.is_resident());
    }

    #[test]
    fn test_attach_backing_anon() {
        let mut page = Page::new_uninit(
            VirtAddr::new(0x40_0000),
            PageFlags::WRITABLE | PageFlags::STACK,
            TargetKind::Anon,
            None,
            None,
            table(),
        );
        page.attach_backing().unwrap();
        assert!(!page.is_uninit());
        assert!(matches!(page.backing(), PageBacking::Anon { slot: None }));
        assert!(page.flags().contains(PageFlags::STACK));
    }

    #[test]
    fn test_attach_backing_file_requires_descriptor() {
        let mut page = Page::new_uninit(
            VirtAddr::new(0x40_0000),
            PageFlags::empty(),
            TargetKind::File,
            None,
            None,
            table(),
        );
        assert!(page.attach_backing().is_err());
    }
}
