//! Supplemental page table and address spaces
//!
//! The supplemental page table (SPT) is the per-process map from
//! page-aligned virtual address to page metadata. It never creates
//! entries as a side effect of lookup, and insertion fails rather than
//! overwrites. An [`AddressSpace`] bundles the SPT with the process's
//! hardware translation table and the stack pointer recorded at kernel
//! entry, which the fault resolver consults for kernel-mode faults.

use alloc::sync::Arc;
use alloc::vec::Vec;

use core::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashMap;
use spin::Mutex;

use crate::addr::VirtAddr;
use crate::hal::TranslationTable;
use crate::page::{Page, PageRef};

/// Per-process mapping from virtual page address to page metadata.
pub struct SupplementalPageTable {
    pages: Mutex<HashMap<VirtAddr, PageRef>>,
}

impl SupplementalPageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            pages: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up the page containing `va`. The address is rounded down
    /// to its page boundary; no entry is ever created by lookup.
    pub fn find(&self, va: VirtAddr) -> Option<PageRef> {
        self.pages.lock().get(&va.page_round_down()).cloned()
    }

    /// Inserts `page`, failing (without mutation) if an entry at the
    /// same address already exists.
    pub fn insert(&self, page: Page) -> bool {
        let va = page.va();
        let mut pages = self.pages.lock();
        if pages.contains_key(&va) {
            return false;
        }
        pages.insert(va, Arc::new(Mutex::new(page)));
        true
    }

    /// Removes the entry for `va` from the table, returning it.
    /// Variant teardown is the caller's responsibility.
    pub(crate) fn take(&self, va: VirtAddr) -> Option<PageRef> {
        self.pages.lock().remove(&va.page_round_down())
    }

    /// Removes and returns every entry, in unspecified order.
    pub(crate) fn drain(&self) -> Vec<PageRef> {
        self.pages.lock().drain().map(|(_, page)| page).collect()
    }

    /// A snapshot of every entry, in unspecified order.
    pub fn snapshot(&self) -> Vec<PageRef> {
        self.pages.lock().values().cloned().collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.pages.lock().len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.pages.lock().is_empty()
    }
}

impl Default for SupplementalPageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// One process's virtual memory state.
pub struct AddressSpace {
    spt: SupplementalPageTable,
    table: Arc<dyn TranslationTable>,
    /// User stack pointer recorded when the process last entered the
    /// kernel; the fault resolver falls back to it for faults taken in
    /// kernel mode.
    kernel_entry_sp: AtomicUsize,
}

impl AddressSpace {
    /// Creates an address space over the process's hardware table.
    pub fn new(table: Arc<dyn TranslationTable>) -> Self {
        Self {
            spt: SupplementalPageTable::new(),
            table,
            kernel_entry_sp: AtomicUsize::new(0),
        }
    }

    /// The process's supplemental page table.
    pub fn spt(&self) -> &SupplementalPageTable {
        &self.spt
    }

    /// The process's hardware translation table.
    pub fn table(&self) -> &Arc<dyn TranslationTable> {
        &self.table
    }

    /// Records the user stack pointer at kernel entry.
    pub fn record_stack_pointer(&self, sp: usize) {
        self.kernel_entry_sp.store(sp, Ordering::Relaxed);
    }

    /// The stack pointer recorded at kernel entry.
    pub fn recorded_stack_pointer(&self) -> usize {
        self.kernel_entry_sp.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{PageFlags, TargetKind};
    use crate::testing::SoftTranslationTable;

    fn page(table: &Arc<dyn TranslationTable>, va: usize) -> Page {
        Page::new_uninit(
            VirtAddr::new(va),
            PageFlags::WRITABLE,
            TargetKind::Anon,
            None,
            None,
            table.clone(),
        )
    }

    #[test]
    fn test_find_rounds_down() {
        let table: Arc<dyn TranslationTable> = Arc::new(SoftTranslationTable::new());
        let spt = SupplementalPageTable::new();
        assert!(spt.insert(page(&table, 0x40_0000)));
        let found = spt.find(VirtAddr::new(0x40_0abc)).unwrap();
        assert_eq!(found.lock().va(), VirtAddr::new(0x40_0000));
        assert!(spt.find(VirtAddr::new(0x40_1000)).is_none());
    }

    #[test]
    fn test_duplicate_insert_fails() {
        let table: Arc<dyn TranslationTable> = Arc::new(SoftTranslationTable::new());
        let spt = SupplementalPageTable::new();
        assert!(spt.insert(page(&table, 0x40_0000)));
        assert!(!spt.insert(page(&table, 0x40_0000)));
        assert_eq!(spt.len(), 1);
    }

    #[test]
    fn test_take_removes_entry() {
        let table: Arc<dyn TranslationTable> = Arc::new(SoftTranslationTable::new());
        let spt = SupplementalPageTable::new();
        assert!(spt.insert(page(&table, 0x40_0000)));
        assert!(spt.take(VirtAddr::new(0x40_0000)).is_some());
        assert!(spt.is_empty());
    }
}
