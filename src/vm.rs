//! Top-level virtual memory object
//!
//! [`Vm`] owns the two process-wide singletons, the frame table and the
//! swap store, and exposes the operations the rest of the kernel calls:
//! page allocation, claiming, fault resolution, address space teardown
//! and fork-time duplication.

use alloc::sync::Arc;

use crate::addr::VirtAddr;
use crate::error::{Result, VmError};
use crate::frame::{FrameId, FrameTable};
use crate::hal::{BlockDevice, FramePool, PageBuf};
use crate::layout;
use crate::page::{FileSlice, Page, PageBacking, PageFlags, PageInitFn, PageRef, TargetKind};
use crate::spt::AddressSpace;
use crate::swap::SwapStore;

/// Machine context of a fault, as captured by the trap entry path.
pub struct FaultContext {
    /// The trapped stack pointer.
    pub stack_pointer: usize,
}

/// The virtual memory subsystem.
pub struct Vm {
    frames: FrameTable,
    swap: SwapStore,
}

/// Snapshot of a source page taken under its lock during fork copying.
enum ForkSource {
    Uninit {
        target: TargetKind,
        init: Option<PageInitFn>,
        aux: Option<FileSlice>,
    },
    File {
        slice: FileSlice,
        frame: Option<FrameId>,
    },
    Anon,
}

impl Vm {
    /// Initializes the subsystem: an empty frame table over `pool` and
    /// a swap store spanning `swap_device`.
    pub fn new(pool: Arc<dyn FramePool>, swap_device: Arc<dyn BlockDevice>) -> Self {
        Self {
            frames: FrameTable::new(pool),
            swap: SwapStore::new(swap_device),
        }
    }

    /// The global frame table.
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// The global swap store.
    pub fn swap(&self) -> &SwapStore {
        &self.swap
    }

    /// Creates a pending page at `va` that materializes as `target` on
    /// first touch. Returns `false` if an entry at that address already
    /// exists, without mutating anything.
    pub fn alloc_page_with_initializer(
        &self,
        space: &AddressSpace,
        target: TargetKind,
        va: VirtAddr,
        flags: PageFlags,
        init: Option<PageInitFn>,
        aux: Option<FileSlice>,
    ) -> bool {
        let va = va.page_round_down();
        let page = Page::new_uninit(va, flags, target, init, aux, space.table().clone());
        space.spt().insert(page)
    }

    /// Creates a pending page with no content initializer.
    pub fn alloc_page(
        &self,
        space: &AddressSpace,
        target: TargetKind,
        va: VirtAddr,
        flags: PageFlags,
    ) -> bool {
        self.alloc_page_with_initializer(space, target, va, flags, None, None)
    }

    /// Claims the page at `va`: binds it to a frame, installs the
    /// hardware mapping and loads its content. Returns `Ok(false)` if
    /// no page exists at `va`.
    pub fn claim_page(&self, space: &AddressSpace, va: VirtAddr) -> Result<bool> {
        let Some(page_ref) = space.spt().find(va) else {
            return Ok(false);
        };
        let mut page = page_ref.lock();
        self.claim_locked(&mut page, &page_ref)?;
        Ok(true)
    }

    /// Claim with the page lock already held. A page that is already
    /// resident is left alone, which is what serializes two threads
    /// racing to fault on the same page.
    fn claim_locked(&self, page: &mut Page, page_ref: &PageRef) -> Result<()> {
        if page.is_resident() {
            return Ok(());
        }
        let id = self.frames.allocate(&self.swap)?;
        self.frames.attach(id, Arc::clone(page_ref));
        page.frame = Some(id);
        let va = page.va();
        let writable = page.writable();
        let loaded = self.frames.with_buffer(id, |buf| {
            page.table().map(va, buf.addr(), writable);
            page.swap_in(&self.swap, buf.as_mut_slice())
        });
        match loaded {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) | Err(e) => {
                // Undo the half-claim so no stale links survive.
                page.table().clear(va);
                page.frame = None;
                self.frames.detach(id);
                let _ = self.frames.release(id);
                Err(e)
            }
        }
    }

    /// Resolves one hardware page fault.
    ///
    /// Returns `Ok(true)` when the fault was handled, `Ok(false)` when
    /// it was not (the caller's convention is to terminate the faulting
    /// process), and `Err` only for unrecoverable conditions such as
    /// swap exhaustion during the claim.
    pub fn try_handle_fault(
        &self,
        space: &AddressSpace,
        ctx: &FaultContext,
        addr: VirtAddr,
        user: bool,
        write: bool,
        not_present: bool,
    ) -> Result<bool> {
        if addr.as_usize() == 0 {
            return Ok(false);
        }
        if layout::is_kernel_address(addr.as_usize()) {
            return Ok(false);
        }
        if !not_present {
            // Protection violation on an existing mapping, e.g. a write
            // to a read-only page that is already mapped.
            return Ok(false);
        }

        let sp = if user {
            ctx.stack_pointer
        } else {
            space.recorded_stack_pointer()
        };
        if layout::is_stack_growth(addr, sp) {
            self.stack_growth(space, addr);
        }

        let Some(page_ref) = space.spt().find(addr) else {
            log::debug!("unhandled fault at {:#x}: no mapping", addr.as_usize());
            return Ok(false);
        };
        let mut page = page_ref.lock();
        if write && !page.writable() {
            log::debug!("unhandled fault at {:#x}: write to read-only page", addr.as_usize());
            return Ok(false);
        }
        self.claim_locked(&mut page, &page_ref)?;
        Ok(true)
    }

    /// Allocates the anonymous page backing one page of stack growth.
    fn stack_growth(&self, space: &AddressSpace, addr: VirtAddr) {
        log::debug!("stack growth at {:#x}", addr.as_usize());
        self.alloc_page(
            space,
            TargetKind::Anon,
            addr.page_round_down(),
            PageFlags::WRITABLE | PageFlags::STACK,
        );
    }

    /// Runs `f` over the resident contents of the page at `va`,
    /// updating the hardware accessed (and, for writes, dirty) bits the
    /// way a real access would. This is the seam the syscall
    /// copy-in/out layer uses.
    pub fn with_mapped<R>(
        &self,
        space: &AddressSpace,
        va: VirtAddr,
        write: bool,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Result<R> {
        let va = va.page_round_down();
        let page_ref = space
            .spt()
            .find(va)
            .ok_or(VmError::NotMapped(va))?;
        let page = page_ref.lock();
        let id = page.frame.ok_or(VmError::NotMapped(va))?;
        if write && !page.writable() {
            return Err(VmError::ReadOnly(va));
        }
        let result = self.frames.with_buffer(id, |buf| f(buf.as_mut_slice()))?;
        page.table().set_accessed(va, true);
        if write {
            page.table().set_dirty(va, true);
        }
        Ok(result)
    }

    /// Removes the page at `va` from the address space: flushes dirty
    /// file-backed content, releases its frame and swap slot, and drops
    /// the table entry.
    pub fn remove_page(&self, space: &AddressSpace, va: VirtAddr) -> Result<()> {
        let page_ref = space
            .spt()
            .take(va)
            .ok_or(VmError::NotMapped(va.page_round_down()))?;
        self.tear_down_page(&page_ref)
    }

    /// Tears down every remaining entry of the address space, in
    /// unspecified order, flushing dirty file-backed content as it
    /// goes. Returns the first error encountered while still tearing
    /// down the rest.
    pub fn destroy_space(&self, space: &AddressSpace) -> Result<()> {
        let mut first_error = None;
        for page_ref in space.spt().drain() {
            if let Err(e) = self.tear_down_page(&page_ref) {
                log::warn!("page teardown failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Variant-specific destruction plus frame release. The frame is
    /// returned to the pool only when this page is the one the frame
    /// references, so a frame shared with a fork child is released
    /// exactly once.
    fn tear_down_page(&self, page_ref: &PageRef) -> Result<()> {
        let mut page = page_ref.lock();
        let va = page.va();
        if let Some(id) = page.frame {
            let owns = self
                .frames
                .resident(id)
                .is_some_and(|resident| Arc::ptr_eq(&resident, page_ref));
            let flushed = self
                .frames
                .with_buffer(id, |buf| page.destroy(&self.swap, Some(buf.as_slice())));
            match flushed {
                Ok(result) => result?,
                // The frame vanished under us (shared-frame teardown in
                // another space); fall back to a frameless destroy.
                Err(_) => page.destroy(&self.swap, None)?,
            }
            page.table().clear(va);
            page.frame = None;
            if owns {
                self.frames.detach(id);
                self.frames.release(id)?;
            }
        } else {
            page.destroy(&self.swap, None)?;
            page.table().clear(va);
        }
        Ok(())
    }

    /// Duplicates `src`'s virtual memory state into `dst` at fork time.
    ///
    /// Uninitialized pages are re-created pending (materialization
    /// stays deferred). File-backed pages are re-created with a copied
    /// lazy-load descriptor, initialized immediately, and share the
    /// source's physical frame rather than duplicating content — writes
    /// on either side stay mutually visible, a deliberate preservation
    /// of the shared-file-cache behavior. Everything else is claimed in
    /// the destination and copied byte for byte.
    ///
    /// A failure aborts the copy; destination entries created so far
    /// are left for the caller's teardown.
    pub fn copy_address_space(&self, dst: &AddressSpace, src: &AddressSpace) -> Result<()> {
        for src_ref in src.spt().snapshot() {
            let (va, flags, source) = {
                let page = src_ref.lock();
                let source = match page.backing() {
                    PageBacking::Uninit { target, init, aux } => ForkSource::Uninit {
                        target: *target,
                        init: init.clone(),
                        aux: aux.clone(),
                    },
                    PageBacking::File { slice } => ForkSource::File {
                        slice: slice.clone(),
                        frame: page.frame,
                    },
                    PageBacking::Anon { .. } => ForkSource::Anon,
                };
                (page.va(), page.flags(), source)
            };

            match source {
                ForkSource::Uninit { target, init, aux } => {
                    if !self.alloc_page_with_initializer(dst, target, va, flags, init, aux) {
                        return Err(VmError::AlreadyMapped(va));
                    }
                }
                ForkSource::File { slice, frame } => {
                    if !self.alloc_page_with_initializer(
                        dst,
                        TargetKind::File,
                        va,
                        flags,
                        None,
                        Some(slice),
                    ) {
                        return Err(VmError::AlreadyMapped(va));
                    }
                    let dst_ref = dst.spt().find(va).ok_or(VmError::NotMapped(va))?;
                    let mut dst_page = dst_ref.lock();
                    dst_page.attach_backing()?;
                    if let Some(id) = frame {
                        // Share the parent's frame instead of copying;
                        // the frame's back-reference stays on the
                        // parent, which therefore owns its release.
                        let pa = self.frames.with_buffer(id, |buf| buf.addr())?;
                        dst_page.frame = Some(id);
                        dst.table().map(va, pa, flags.contains(PageFlags::WRITABLE));
                    }
                }
                ForkSource::Anon => {
                    // Materialized page: make sure the source is
                    // resident, stage its content, then claim an
                    // equivalent page in the destination and copy.
                    let mut staged = PageBuf::zeroed();
                    {
                        let mut src_page = src_ref.lock();
                        self.claim_locked(&mut src_page, &src_ref)?;
                        let id = src_page.frame.ok_or(VmError::NotMapped(va))?;
                        self.frames.with_buffer(id, |buf| {
                            staged.as_mut_slice().copy_from_slice(buf.as_slice());
                        })?;
                    }
                    if !self.alloc_page(dst, TargetKind::Anon, va, flags) {
                        return Err(VmError::AlreadyMapped(va));
                    }
                    let dst_ref = dst.spt().find(va).ok_or(VmError::NotMapped(va))?;
                    let mut dst_page = dst_ref.lock();
                    self.claim_locked(&mut dst_page, &dst_ref)?;
                    let id = dst_page.frame.ok_or(VmError::NotMapped(va))?;
                    self.frames.with_buffer(id, |buf| {
                        buf.as_mut_slice().copy_from_slice(staged.as_slice());
                    })?;
                }
            }
        }
        Ok(())
    }
}
